//! Semantic browser actions and the uniform result shape.
//!
//! An [`Action`] describes *what* to do and which element it targets,
//! independent of how the element is ultimately located on the page. The
//! resolver turns it into concrete tool calls; every public operation
//! reports back through [`ActionOutcome`] so callers never branch on
//! transport internals.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use webpilot_core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    Screenshot,
    Snapshot,
    ExtractText,
    Hover,
    Scroll,
    Wait,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Screenshot => "screenshot",
            ActionKind::Snapshot => "snapshot",
            ActionKind::ExtractText => "extract_text",
            ActionKind::Hover => "hover",
            ActionKind::Scroll => "scroll",
            ActionKind::Wait => "wait",
        }
    }
}

/// One requested browser operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Natural-language label of the target element. Used for memory lookup
    /// and vision prompts.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub primary_selector: Option<String>,
    /// Caller-supplied alternates; insertion order is priority order.
    #[serde(default)]
    pub fallback_selectors: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub coordinates: Option<(i64, i64)>,
}

impl Action {
    pub fn new(kind: ActionKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            primary_selector: None,
            fallback_selectors: Vec::new(),
            url: None,
            text: None,
            duration_secs: None,
            coordinates: None,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        let url = url.into();
        let mut action = Self::new(ActionKind::Navigate, url.clone());
        action.url = Some(url);
        action
    }

    pub fn click(description: impl Into<String>) -> Self {
        Self::new(ActionKind::Click, description)
    }

    pub fn type_text(description: impl Into<String>, text: impl Into<String>) -> Self {
        let mut action = Self::new(ActionKind::Type, description);
        action.text = Some(text.into());
        action
    }

    pub fn hover(description: impl Into<String>) -> Self {
        Self::new(ActionKind::Hover, description)
    }

    pub fn wait(duration_secs: u64) -> Self {
        let mut action = Self::new(ActionKind::Wait, format!("wait {}s", duration_secs));
        action.duration_secs = Some(duration_secs);
        action
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.primary_selector = Some(selector.into());
        self
    }

    pub fn with_coordinates(mut self, x: i64, y: i64) -> Self {
        self.coordinates = Some((x, y));
        self
    }

    /// Append a fallback unless it is already present.
    pub fn add_fallback(&mut self, selector: impl Into<String>) {
        let selector = selector.into();
        if self.primary_selector.as_deref() != Some(selector.as_str())
            && !self.fallback_selectors.contains(&selector)
        {
            self.fallback_selectors.push(selector);
        }
    }

    pub fn with_fallback(mut self, selector: impl Into<String>) -> Self {
        self.add_fallback(selector);
        self
    }

    /// Explicit selectors in priority order: primary first, then fallbacks.
    pub fn selectors(&self) -> Vec<String> {
        let mut selectors = Vec::new();
        if let Some(primary) = &self.primary_selector {
            selectors.push(primary.clone());
        }
        selectors.extend(self.fallback_selectors.iter().cloned());
        selectors
    }

    /// The kind determines which payload fields are required; missing ones
    /// fail fast before any I/O.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            ActionKind::Navigate => {
                if self.url.as_deref().map_or(true, |u| u.is_empty()) {
                    return Err(Error::Validation("navigate requires a url".into()));
                }
            }
            ActionKind::Type => {
                if self.text.is_none() {
                    return Err(Error::Validation("type requires text".into()));
                }
            }
            ActionKind::Wait => {
                if self.duration_secs.is_none() {
                    return Err(Error::Validation("wait requires a duration".into()));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
    Disabled,
}

/// Uniform result of every facade operation. Failures are inspectable data,
/// never exceptions escaping the facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<(i64, i64)>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovered_by_vision: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ActionOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
            selector: None,
            url: None,
            title: None,
            coordinates: None,
            recovered_by_vision: false,
            detail: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            ..Self::success(message)
        }
    }

    pub fn disabled() -> Self {
        Self {
            status: OutcomeStatus::Disabled,
            ..Self::success("browser automation is disabled")
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

impl From<&Error> for ActionOutcome {
    fn from(err: &Error) -> Self {
        match err {
            Error::Disabled => ActionOutcome::disabled(),
            other => ActionOutcome::error(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_without_text_is_invalid() {
        let action = Action::new(ActionKind::Type, "search box");
        assert!(matches!(action.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_navigate_without_url_is_invalid() {
        let action = Action::new(ActionKind::Navigate, "somewhere");
        assert!(matches!(action.validate(), Err(Error::Validation(_))));
        assert!(Action::navigate("https://example.com").validate().is_ok());
    }

    #[test]
    fn test_wait_requires_duration() {
        let action = Action::new(ActionKind::Wait, "pause");
        assert!(action.validate().is_err());
        assert!(Action::wait(2).validate().is_ok());
    }

    #[test]
    fn test_add_fallback_checks_membership() {
        let mut action = Action::click("login").with_selector("#login");
        action.add_fallback(".login");
        action.add_fallback(".login");
        action.add_fallback("#login");
        assert_eq!(action.fallback_selectors, vec![".login".to_string()]);
        assert_eq!(action.selectors(), vec!["#login".to_string(), ".login".to_string()]);
    }
}
