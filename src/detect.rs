//! Anti-automation defense detection.
//!
//! Signature based and deliberately conservative: a normal page flagged as
//! blocked is an acceptable cost, a challenge page reported as content is not.
//! A positive verdict ends the attempt; nothing here or downstream retries.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which kind of defense was recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Interstitial "checking your browser" style challenge.
    ChallengePage,
    /// Web application firewall or rate-limit rejection.
    WafBlock,
    /// A CAPTCHA widget was served instead of content.
    CaptchaPresented,
    /// Plain access-denied response.
    AccessDenied,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::ChallengePage => "challenge_page",
            BlockKind::WafBlock => "waf_block",
            BlockKind::CaptchaPresented => "captcha_presented",
            BlockKind::AccessDenied => "access_denied",
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detector verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clear,
    Blocked(BlockKind),
}

impl Verdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Blocked(_))
    }
}

/// CAPTCHA widget markers (matched against lowercased content).
const CAPTCHA_MARKERS: &[&str] = &[
    "g-recaptcha",
    "google.com/recaptcha/",
    "recaptcha/api.js",
    "h-captcha",
    "hcaptcha.com/1/api.js",
    "cf-turnstile",
    "challenges.cloudflare.com/turnstile",
    "captcha-delivery.com",
    "px-captcha",
    "funcaptcha",
    "arkoselabs.com",
    "geetest_",
];

/// Interstitial challenge markers.
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_opt",
    "__cf_chl_",
    "/cdn-cgi/challenge-platform/",
    "checking your browser before accessing",
    "checking if the site connection is secure",
    "verifying you are human",
    "enable javascript and cookies to continue",
    "ddos-guard",
    "please wait while we verify",
    "_pxhd",
    "perimeterx",
    "awswaf.com/challenge",
];

/// Firewall block markers.
const WAF_MARKERS: &[&str] = &[
    "incapsula incident id",
    "_incapsula_resource",
    "sucuri website firewall",
    "the requested url was rejected. please consult with your administrator",
    "request rejected by the web application firewall",
    "web application firewall",
    "mod_security",
    "you have been blocked",
    "error code: 1020",
    "cloudflare ray id",
    "request blocked.",
];

/// Access-denied markers that are specific enough to trust in a page body.
const ACCESS_DENIED_MARKERS: &[&str] = &[
    "you don't have permission to access",
    "you do not have permission to access this",
    "your access to this site has been limited",
    "your ip has been blocked",
    "access to this page has been denied",
];

static BLOCK_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(just a moment|attention required|access denied|security check|are you a robot|one more step|please verify you are a human|ddos-guard|pardon our interruption|request rejected|403 forbidden)",
    )
    .unwrap()
});

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

/// Classify a loaded page.
///
/// `status_code` is `None` when the browser could not report one.
pub fn classify(status_code: Option<u16>, final_url: &str, content: &str) -> Verdict {
    let body = content.to_lowercase();
    let url = final_url.to_lowercase();

    if contains_any(&body, CAPTCHA_MARKERS) || url.contains("captcha") {
        return Verdict::Blocked(BlockKind::CaptchaPresented);
    }

    if contains_any(&body, CHALLENGE_MARKERS) || url.contains("/cdn-cgi/challenge-platform") {
        return Verdict::Blocked(BlockKind::ChallengePage);
    }

    if contains_any(&body, WAF_MARKERS) {
        return Verdict::Blocked(BlockKind::WafBlock);
    }

    if contains_any(&body, ACCESS_DENIED_MARKERS) {
        return Verdict::Blocked(BlockKind::AccessDenied);
    }

    if let Some(kind) = classify_title(content) {
        return Verdict::Blocked(kind);
    }

    match status_code {
        Some(429) => Verdict::Blocked(BlockKind::WafBlock),
        Some(401) | Some(403) => Verdict::Blocked(BlockKind::AccessDenied),
        _ => Verdict::Clear,
    }
}

fn classify_title(content: &str) -> Option<BlockKind> {
    let title = TITLE.captures(content)?.get(1)?.as_str();
    let m = BLOCK_TITLE.captures(title)?.get(1)?.as_str().to_lowercase();
    let kind = match m.as_str() {
        "access denied" | "403 forbidden" => BlockKind::AccessDenied,
        "request rejected" => BlockKind::WafBlock,
        "are you a robot" | "please verify you are a human" => BlockKind::CaptchaPresented,
        _ => BlockKind::ChallengePage,
    };
    Some(kind)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
