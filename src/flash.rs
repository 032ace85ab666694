//! One-shot user messages carried across a redirect in a cookie.

use serde::{Deserialize, Serialize};
use tower_cookies::{Cookie, Cookies};

const FLASH_COOKIE: &str = "flash";
/// Row warnings beyond this are folded into one summary line so the cookie
/// stays under browser size limits.
const MAX_ROW_WARNINGS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Info,
    Warning,
    Error,
}

impl Level {
    /// Bootstrap alert class.
    pub fn css(&self) -> &'static str {
        match self {
            Level::Success => "success",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "danger",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub level: Level,
    pub text: String,
}

impl FlashMessage {
    pub fn css(&self) -> &'static str {
        self.level.css()
    }
}

pub fn encode(messages: &[FlashMessage]) -> String {
    let json = serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string());
    urlencoding::encode(&json).into_owned()
}

pub fn decode(raw: &str) -> Vec<FlashMessage> {
    urlencoding::decode(raw)
        .ok()
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default()
}

pub fn push(cookies: &Cookies, level: Level, text: impl Into<String>) {
    let mut messages = cookies
        .get(FLASH_COOKIE)
        .map(|c| decode(c.value()))
        .unwrap_or_default();
    messages.push(FlashMessage {
        level,
        text: text.into(),
    });
    let cookie = Cookie::build((FLASH_COOKIE, encode(&messages)))
        .path("/")
        .http_only(true)
        .build();
    cookies.add(cookie);
}

pub fn success(cookies: &Cookies, text: impl Into<String>) {
    push(cookies, Level::Success, text);
}

pub fn info(cookies: &Cookies, text: impl Into<String>) {
    push(cookies, Level::Info, text);
}

pub fn warning(cookies: &Cookies, text: impl Into<String>) {
    push(cookies, Level::Warning, text);
}

pub fn error(cookies: &Cookies, text: impl Into<String>) {
    push(cookies, Level::Error, text);
}

/// Queues per-row import warnings, folding the overflow into a count.
pub fn row_warnings(cookies: &Cookies, warnings: &[String]) {
    for text in capped(warnings) {
        warning(cookies, text);
    }
}

fn capped(warnings: &[String]) -> Vec<String> {
    let mut shown: Vec<String> = warnings.iter().take(MAX_ROW_WARNINGS).cloned().collect();
    if warnings.len() > MAX_ROW_WARNINGS {
        shown.push(format!("另有 {} 筆警告未顯示。", warnings.len() - MAX_ROW_WARNINGS));
    }
    shown
}

/// Drains pending messages; called once per rendered page.
pub fn take(cookies: &Cookies) -> Vec<FlashMessage> {
    match cookies.get(FLASH_COOKIE) {
        Some(cookie) => {
            let messages = decode(cookie.value());
            cookies.remove(Cookie::build((FLASH_COOKIE, "")).path("/").build());
            messages
        }
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_keeps_chinese_text() {
        let messages = vec![
            FlashMessage {
                level: Level::Success,
                text: "物料確認已儲存".to_string(),
            },
            FlashMessage {
                level: Level::Warning,
                text: "物料 A-1 的確認數量 5 超過需求數量 3".to_string(),
            },
        ];
        let raw = encode(&messages);
        assert!(!raw.contains(' '));
        assert_eq!(decode(&raw), messages);
    }

    #[test]
    fn test_decode_garbage_is_empty() {
        assert!(decode("not%20json").is_empty());
        assert!(decode("").is_empty());
    }

    #[test]
    fn test_row_warnings_are_capped() {
        let warnings: Vec<String> = (1..=13).map(|n| format!("跳過第 {} 行", n)).collect();
        let shown = capped(&warnings);
        assert_eq!(shown.len(), MAX_ROW_WARNINGS + 1);
        assert_eq!(shown.last().unwrap(), "另有 3 筆警告未顯示。");
        assert_eq!(capped(&warnings[..2]).len(), 2);
    }

    #[test]
    fn test_level_css() {
        assert_eq!(Level::Error.css(), "danger");
        assert_eq!(Level::Info.css(), "info");
    }
}
