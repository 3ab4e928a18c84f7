//! Offline block detection against a saved page.

use std::path::Path;

use console::style;

use webacquire::detect::{self, Verdict};
use webacquire::extract;

pub async fn cmd_classify(file: &Path, status: Option<u16>, url: Option<&str>) -> anyhow::Result<()> {
    let html = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;

    match detect::classify(status, url.unwrap_or_default(), &html) {
        Verdict::Blocked(kind) => {
            println!("{} Blocked: {}", style("✗").red(), style(kind).yellow());
            println!(
                "  {} The site is asking for human verification; automated access should stop here.",
                style("→").dim()
            );
        }
        Verdict::Clear => {
            let extracted = extract::extract(&html);
            println!("{} Clear", style("✓").green());
            if let Some(title) = extracted.title {
                println!("  {} Title: {}", style("→").dim(), title);
            }
            println!(
                "  {} {} characters of text",
                style("→").dim(),
                extracted.text.chars().count()
            );
        }
    }
    Ok(())
}
