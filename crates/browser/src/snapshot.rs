//! DOM snapshot parsing.
//!
//! The automation server renders the accessibility tree as indented text
//! where interactive nodes carry `[ref=...]` tokens. Refs are scoped to one
//! snapshot: the server invalidates them across page mutations, so element
//! references are recomputed per attempt and never persisted.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[ref=([^\]]+)\]").expect("ref regex is valid"));

/// Roles worth surfacing to the resolver and planner.
const INTERACTIVE_KEYWORDS: &[&str] = &[
    "button", "link", "input", "combobox", "textbox", "searchbox", "search",
];

/// A snapshot-scoped handle to one DOM node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementRef {
    pub ref_id: String,
    pub role: String,
    /// The full snapshot line, used for candidate substring matching.
    pub line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub text: String,
    pub elements: Vec<ElementRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: Option<String>,
    pub title: Option<String>,
    pub preview: String,
}

/// Collect the interactive elements out of a rendered snapshot.
pub fn parse_snapshot(text: &str) -> Snapshot {
    let mut elements = Vec::new();

    for line in text.lines() {
        let lower = line.to_lowercase();
        if !INTERACTIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
            continue;
        }
        if let Some(captures) = REF_RE.captures(line) {
            let ref_id = captures[1].to_string();
            let role = line
                .split_whitespace()
                .nth(1)
                .unwrap_or("element")
                .to_string();
            elements.push(ElementRef {
                ref_id,
                role,
                line: line.trim().to_string(),
            });
        }
    }

    Snapshot {
        text: text.to_string(),
        elements,
    }
}

/// First element whose snapshot line contains the candidate as a substring.
pub fn find_element<'a>(snapshot: &'a Snapshot, candidate: &str) -> Option<&'a ElementRef> {
    snapshot
        .elements
        .iter()
        .find(|element| element.line.contains(candidate))
}

/// Pull `Page URL:` / `Page Title:` lines plus a short content preview out
/// of a navigation result.
pub fn extract_page_info(text: &str) -> PageInfo {
    let mut info = PageInfo::default();

    for line in text.lines() {
        if let Some(url) = line.split("Page URL:").nth(1) {
            info.url = Some(url.trim().to_string());
        } else if let Some(title) = line.split("Page Title:").nth(1) {
            info.title = Some(title.trim().to_string());
        }
    }

    info.preview = if text.chars().count() > 200 {
        let cut: String = text.chars().take(200).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    };
    info
}

/// The text block out of an MCP tool result (`result.content[0].text`).
pub fn content_text(result: &Value) -> Option<String> {
    result
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|item| item.get("text"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = "\
- document \"Example\"
  - heading \"Welcome\" [level=1]
  - link \"NFL scores\" [ref=e1]
  - button \"Search\" [ref=e2]
  - textbox \"Search query\" [ref=e3]
  - generic
";

    #[test]
    fn test_parse_snapshot_collects_interactive_refs() {
        let snapshot = parse_snapshot(SAMPLE);
        assert_eq!(snapshot.elements.len(), 3);
        assert_eq!(snapshot.elements[0].ref_id, "e1");
        assert_eq!(snapshot.elements[0].role, "link");
        assert_eq!(snapshot.elements[2].role, "textbox");
    }

    #[test]
    fn test_find_element_matches_substring() {
        let snapshot = parse_snapshot(SAMPLE);
        let element = find_element(&snapshot, "NFL").unwrap();
        assert_eq!(element.ref_id, "e1");
        assert!(find_element(&snapshot, "checkout").is_none());
    }

    #[test]
    fn test_extract_page_info() {
        let text = "Page URL: https://example.com/home\nPage Title: Example Home\nbody text";
        let info = extract_page_info(text);
        assert_eq!(info.url.as_deref(), Some("https://example.com/home"));
        assert_eq!(info.title.as_deref(), Some("Example Home"));
        assert!(info.preview.contains("body text"));
    }

    #[test]
    fn test_content_text_unwraps_mcp_result() {
        let result = json!({"content": [{"type": "text", "text": "hello"}]});
        assert_eq!(content_text(&result).as_deref(), Some("hello"));
        assert!(content_text(&json!({})).is_none());
    }
}
