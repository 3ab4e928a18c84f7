//! Title and simplified-text extraction from rendered HTML.

use scraper::{ElementRef, Html, Node, Selector};

/// Elements whose subtree never contributes text.
const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "head", "canvas", "object",
];

/// Title and text rendering of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub title: Option<String>,
    /// Line-oriented rendering: headings as `#`, list items as `- `.
    pub text: String,
}

/// Extract the title and a simplified text rendering.
pub fn extract(html: &str) -> Extracted {
    let document = Html::parse_document(html);
    let title = extract_title(&document);

    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());

    let mut renderer = Renderer::default();
    renderer.walk(root);
    renderer.flush_line();

    Extracted {
        title,
        text: renderer.lines.join("\n"),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    for selector in ["title", "h1"] {
        let Ok(sel) = Selector::parse(selector) else {
            continue;
        };
        if let Some(el) = document.select(&sel).next() {
            let text = collapse_whitespace(&el.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Line prefix for block-level elements; `None` for inline ones.
fn block_prefix(name: &str) -> Option<&'static str> {
    match name {
        "h1" => Some("# "),
        "h2" => Some("## "),
        "h3" => Some("### "),
        "h4" => Some("#### "),
        "h5" => Some("##### "),
        "h6" => Some("###### "),
        "li" => Some("- "),
        "blockquote" => Some("> "),
        "p" | "div" | "section" | "article" | "header" | "footer" | "main" | "nav" | "aside"
        | "ul" | "ol" | "table" | "tr" | "pre" | "figure" | "figcaption" | "dl" | "dt" | "dd"
        | "form" | "fieldset" | "address" | "hr" => Some(""),
        _ => None,
    }
}

#[derive(Default)]
struct Renderer {
    lines: Vec<String>,
    current: String,
    prefix: &'static str,
    pending_space: bool,
}

impl Renderer {
    fn walk(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.push_text(text),
                Node::Element(el) => {
                    let name = el.name();
                    if SKIPPED.contains(&name) {
                        continue;
                    }
                    if name == "br" {
                        self.flush_line();
                        continue;
                    }
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    match block_prefix(name) {
                        Some(prefix) => {
                            self.flush_line();
                            if !prefix.is_empty() {
                                self.prefix = prefix;
                            }
                            self.walk(child_el);
                            self.flush_line();
                            self.prefix = "";
                        }
                        None => self.walk(child_el),
                    }
                }
                _ => {}
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        let mut words = text.split_whitespace().peekable();
        if words.peek().is_none() {
            if !text.is_empty() {
                self.pending_space = true;
            }
            return;
        }
        if !self.current.is_empty()
            && (self.pending_space || text.starts_with(char::is_whitespace))
        {
            self.current.push(' ');
        }
        for (i, word) in words.enumerate() {
            if i > 0 {
                self.current.push(' ');
            }
            self.current.push_str(word);
        }
        self.pending_space = text.ends_with(char::is_whitespace);
    }

    /// Emit the pending line. The prefix survives when nothing was emitted so
    /// that `<li><p>x</p></li>` still renders as a list item.
    fn flush_line(&mut self) {
        self.pending_space = false;
        if self.current.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.current);
        self.lines.push(format!("{}{}", self.prefix, line));
        self.prefix = "";
    }
}
