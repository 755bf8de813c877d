//! Selector resolution.
//!
//! Turns a semantic [`Action`] into concrete tool calls using a layered
//! fallback strategy: memory-learned selector first (it encodes empirical
//! success history), then the explicit primary, then caller-supplied
//! fallbacks, and finally a single vision-guided retry when a
//! [`SelectorSuggester`] is configured. A failing candidate is recovered
//! locally by advancing to the next one; only exhaustion of the whole plan
//! surfaces as a failure outcome.

use serde_json::{json, Value};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use webpilot_core::{Error, Result};
use webpilot_storage::{ActionRecord, SelectorStore};

use crate::action::{Action, ActionKind, ActionOutcome};
use crate::rpc::ToolClient;
use crate::screenshot;
use crate::snapshot::{self, ElementRef};
use crate::vision::SelectorSuggester;

/// Tool names exposed by the automation server.
pub mod tools {
    pub const NAVIGATE: &str = "browser_navigate";
    pub const CLICK: &str = "browser_click";
    pub const CLICK_COORDINATES: &str = "browser_click_coordinates";
    pub const TYPE: &str = "browser_type";
    pub const HOVER: &str = "browser_hover";
    pub const SNAPSHOT: &str = "browser_snapshot";
    pub const SCREENSHOT: &str = "browser_screenshot";
    pub const WAIT: &str = "browser_wait";
    pub const PRESS_KEY: &str = "browser_press_key";
}

/// Pause between the focus click and typing; some pages attach focus
/// handlers asynchronously.
const FOCUS_DELAY: Duration = Duration::from_millis(500);

/// Ordered candidate plan: memory-learned selector first, then the explicit
/// primary, then fallbacks. Deduplicated by value, first occurrence wins.
pub fn build_candidates(memory_known: Option<&str>, action: &Action) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    if let Some(known) = memory_known {
        candidates.push(known.to_string());
    }
    for selector in action.selectors() {
        if !candidates.contains(&selector) {
            candidates.push(selector);
        }
    }
    candidates
}

pub struct Resolver<'a> {
    pub client: &'a dyn ToolClient,
    pub memory: &'a SelectorStore,
    pub suggester: Option<&'a dyn SelectorSuggester>,
    pub screenshots_dir: &'a Path,
}

impl<'a> Resolver<'a> {
    /// Drive one action to a terminal outcome. Never returns an error: every
    /// failure mode is folded into a structured [`ActionOutcome`].
    pub async fn resolve(&self, domain: &str, action: &Action) -> ActionOutcome {
        let started = Instant::now();

        // Explicit pixel coordinates bypass the candidate machinery.
        if let Some((x, y)) = action.coordinates {
            return self.click_coordinates(domain, action, x, y, started).await;
        }

        let memory_known = self
            .memory
            .best_selector(domain, &action.description)
            .unwrap_or_else(|e| {
                warn!(error = %e, "memory lookup failed, continuing without it");
                None
            });

        let candidates = build_candidates(memory_known.as_deref(), action);
        debug!(
            action = action.kind.as_str(),
            description = %action.description,
            candidates = candidates.len(),
            "candidate plan built"
        );

        for (index, candidate) in candidates.iter().enumerate() {
            info!(
                attempt = index + 1,
                total = candidates.len(),
                selector = %candidate,
                "trying selector"
            );
            match self.attempt(action, candidate).await {
                Ok(()) => return self.succeed(domain, action, candidate, false, started),
                Err(e) => {
                    warn!(selector = %candidate, error = %e, "selector failed");
                }
            }
        }

        self.recover_with_vision(domain, action, started).await
    }

    /// One execution attempt against a single candidate: prefer a live
    /// element reference from a fresh snapshot (more robust against markup
    /// changes than a raw selector), fall back to the raw selector.
    async fn attempt(&self, action: &Action, candidate: &str) -> Result<()> {
        let element = self.live_element(candidate).await;
        match action.kind {
            ActionKind::Click => {
                self.client
                    .call_tool(tools::CLICK, element_args(element.as_ref(), candidate))
                    .await?;
            }
            ActionKind::Hover => {
                self.client
                    .call_tool(tools::HOVER, element_args(element.as_ref(), candidate))
                    .await?;
            }
            ActionKind::Type => {
                let text = action.text.as_deref().unwrap_or_default();
                // Click to focus the field, then type.
                self.client
                    .call_tool(tools::CLICK, element_args(element.as_ref(), candidate))
                    .await?;
                tokio::time::sleep(FOCUS_DELAY).await;

                let mut args = element_args(element.as_ref(), candidate);
                args["text"] = json!(text);
                args["submit"] = json!(false);
                self.client.call_tool(tools::TYPE, args).await?;
            }
            other => {
                return Err(Error::Validation(format!(
                    "'{}' actions do not go through selector resolution",
                    other.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Resolve a candidate to a live reference via a fresh snapshot. Refs
    /// are snapshot-scoped, so this is recomputed per attempt. Any failure
    /// here just means "no reference": the raw selector is used instead.
    async fn live_element(&self, candidate: &str) -> Option<ElementRef> {
        let result = self.client.call_tool(tools::SNAPSHOT, json!({})).await.ok()?;
        let text = snapshot::content_text(&result)?;
        let snap = snapshot::parse_snapshot(&text);
        snapshot::find_element(&snap, candidate).cloned()
    }

    async fn recover_with_vision(
        &self,
        domain: &str,
        action: &Action,
        started: Instant,
    ) -> ActionOutcome {
        let Some(suggester) = self.suggester else {
            let message = format!(
                "all selectors failed for '{}'; no vision collaborator available for recovery",
                action.description
            );
            self.record_history(domain, action, None, false, Some(&message), started);
            return ActionOutcome::error(message);
        };

        info!(description = %action.description, "all selectors failed, attempting vision recovery");
        match self.vision_attempt(suggester, action).await {
            Ok(selector) => self.succeed(domain, action, &selector, true, started),
            Err(e) => {
                let message = format!(
                    "vision recovery failed for '{}': {}",
                    action.description, e
                );
                self.record_history(domain, action, None, false, Some(&message), started);
                ActionOutcome::error(message)
            }
        }
    }

    /// Screenshot → suggestion → exactly one retry.
    async fn vision_attempt(
        &self,
        suggester: &dyn SelectorSuggester,
        action: &Action,
    ) -> Result<String> {
        let result = self.client.call_tool(tools::SCREENSHOT, json!({})).await?;
        let data = screenshot::extract_image_data(&result)
            .ok_or_else(|| Error::Vision("no screenshot data received".into()))?;
        let path = screenshot::save_screenshot(self.screenshots_dir, &data)?;
        let path = screenshot::optimize_for_vision(&path);

        let selector = suggester
            .suggest_selector(&path, &action.description)
            .await?
            .ok_or_else(|| Error::Vision("vision analysis did not provide a selector".into()))?;

        self.attempt(action, &selector).await?;
        Ok(selector)
    }

    async fn click_coordinates(
        &self,
        domain: &str,
        action: &Action,
        x: i64,
        y: i64,
        started: Instant,
    ) -> ActionOutcome {
        match self
            .client
            .call_tool(tools::CLICK_COORDINATES, json!({ "x": x, "y": y }))
            .await
        {
            Ok(_) => {
                self.record_history(domain, action, None, true, None, started);
                let mut outcome = ActionOutcome::success(format!("clicked at ({}, {})", x, y));
                outcome.coordinates = Some((x, y));
                outcome
            }
            Err(e) => {
                let message = format!("coordinate click at ({}, {}) failed: {}", x, y, e);
                self.record_history(domain, action, None, false, Some(&message), started);
                ActionOutcome::error(message)
            }
        }
    }

    fn succeed(
        &self,
        domain: &str,
        action: &Action,
        selector: &str,
        recovered: bool,
        started: Instant,
    ) -> ActionOutcome {
        if let Err(e) = self
            .memory
            .record_success(domain, &action.description, selector)
        {
            warn!(error = %e, "failed to persist successful selector");
        }
        self.record_history(domain, action, Some(selector), true, None, started);

        info!(
            action = action.kind.as_str(),
            description = %action.description,
            selector,
            recovered,
            "action resolved"
        );
        let mut outcome = ActionOutcome::success(format!(
            "{} succeeded for '{}'",
            action.kind.as_str(),
            action.description
        ))
        .with_selector(selector);
        outcome.recovered_by_vision = recovered;
        outcome
    }

    fn record_history(
        &self,
        domain: &str,
        action: &Action,
        selector: Option<&str>,
        success: bool,
        error_message: Option<&str>,
        started: Instant,
    ) {
        let record = ActionRecord {
            domain,
            action_kind: action.kind.as_str(),
            description: &action.description,
            selector_used: selector,
            success,
            error_message,
            duration_ms: Some(started.elapsed().as_millis() as u64),
        };
        if let Err(e) = self.memory.record_action(record) {
            warn!(error = %e, "failed to append action history");
        }
    }
}

fn element_args(element: Option<&ElementRef>, candidate: &str) -> Value {
    match element {
        Some(el) => json!({ "element": el.role, "ref": el.ref_id }),
        None => json!({ "element": candidate }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const ONE_PIXEL_PNG: &str =
        "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

    /// Scripted automation server. Snapshot calls always answer with the
    /// configured tree; other tools pop queued responses and default to an
    /// empty success.
    #[derive(Default)]
    struct FakeClient {
        snapshot_text: Mutex<String>,
        scripted: Mutex<HashMap<String, VecDeque<std::result::Result<Value, String>>>>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl FakeClient {
        fn set_snapshot(&self, text: &str) {
            *self.snapshot_text.lock().unwrap() = text.to_string();
        }

        fn script(&self, tool: &str, response: std::result::Result<Value, String>) {
            self.scripted
                .lock()
                .unwrap()
                .entry(tool.to_string())
                .or_default()
                .push_back(response);
        }

        fn calls_for(&self, tool: &str) -> Vec<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(name, _)| name == tool)
                .map(|(_, args)| args.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ToolClient for FakeClient {
        async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((tool.to_string(), arguments));
            if tool == tools::SNAPSHOT {
                let text = self.snapshot_text.lock().unwrap().clone();
                return Ok(json!({"content": [{"type": "text", "text": text}]}));
            }
            match self
                .scripted
                .lock()
                .unwrap()
                .get_mut(tool)
                .and_then(|queue| queue.pop_front())
            {
                Some(Ok(value)) => Ok(value),
                Some(Err(message)) => Err(Error::Rpc {
                    code: -1,
                    message,
                    data: None,
                }),
                None => Ok(json!({})),
            }
        }
    }

    struct FixedSuggester(Option<String>);

    #[async_trait]
    impl SelectorSuggester for FixedSuggester {
        async fn suggest_selector(
            &self,
            _image_path: &Path,
            _description: &str,
        ) -> Result<Option<String>> {
            Ok(self.0.clone())
        }
    }

    struct Fixture {
        client: FakeClient,
        memory: SelectorStore,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let memory = SelectorStore::open(&dir.path().join("selectors.db")).unwrap();
            Self {
                client: FakeClient::default(),
                memory,
                dir,
            }
        }

        fn resolver<'a>(&'a self, suggester: Option<&'a dyn SelectorSuggester>) -> Resolver<'a> {
            Resolver {
                client: &self.client,
                memory: &self.memory,
                suggester,
                screenshots_dir: self.dir.path(),
            }
        }
    }

    #[test]
    fn test_candidate_ordering_memory_first_with_dedup() {
        let action = Action::click("NFL link")
            .with_selector("a.primary")
            .with_fallback("a.fb1")
            .with_fallback("a.fb2");
        let candidates = build_candidates(Some("a.known"), &action);
        assert_eq!(candidates, vec!["a.known", "a.primary", "a.fb1", "a.fb2"]);

        // The memory selector deduplicates against explicit ones.
        let candidates = build_candidates(Some("a.fb1"), &action);
        assert_eq!(candidates, vec!["a.fb1", "a.primary", "a.fb2"]);
    }

    #[tokio::test]
    async fn test_clean_click_uses_live_reference_and_learns() {
        let fixture = Fixture::new();
        fixture
            .client
            .set_snapshot("- link \"NFL link\" [ref=e1]\n- button \"Search\" [ref=e2]");

        let action = Action::click("NFL link").with_selector("NFL link");
        let outcome = fixture.resolver(None).resolve("espn.com", &action).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.selector.as_deref(), Some("NFL link"));
        assert!(!outcome.recovered_by_vision);

        let clicks = fixture.client.calls_for(tools::CLICK);
        assert_eq!(clicks.len(), 1);
        assert_eq!(clicks[0]["element"], "link");
        assert_eq!(clicks[0]["ref"], "e1");

        let best = fixture.memory.best_selector("espn.com", "NFL link").unwrap();
        assert_eq!(best.as_deref(), Some("NFL link"));
    }

    #[tokio::test]
    async fn test_fallback_chain_reports_winning_selector() {
        let fixture = Fixture::new();
        fixture.client.set_snapshot("- generic page, nothing interactive");
        fixture
            .client
            .script(tools::CLICK, Err("element not found".into()));

        let action = Action::click("login button")
            .with_selector("#login")
            .with_fallback(".login-btn");
        let outcome = fixture.resolver(None).resolve("example.com", &action).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.selector.as_deref(), Some(".login-btn"));

        let clicks = fixture.client.calls_for(tools::CLICK);
        assert_eq!(clicks.len(), 2);
        assert_eq!(clicks[0]["element"], "#login");
        assert_eq!(clicks[1]["element"], ".login-btn");
    }

    #[tokio::test]
    async fn test_memory_selector_is_tried_first() {
        let fixture = Fixture::new();
        fixture
            .memory
            .record_success("example.com", "search box", "#learned")
            .unwrap();
        fixture.client.set_snapshot("");

        let action = Action::click("search box").with_selector("#explicit");
        let outcome = fixture.resolver(None).resolve("example.com", &action).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.selector.as_deref(), Some("#learned"));
    }

    #[tokio::test]
    async fn test_exhaustion_without_suggester_names_missing_recovery() {
        let fixture = Fixture::new();
        fixture.client.set_snapshot("");
        fixture.client.script(tools::CLICK, Err("nope".into()));

        let action = Action::click("ghost button").with_selector("#ghost");
        let outcome = fixture.resolver(None).resolve("example.com", &action).await;

        assert_eq!(outcome.status, crate::action::OutcomeStatus::Error);
        assert!(outcome.message.contains("no vision collaborator"));

        let stats = fixture.memory.domain_stats("example.com").unwrap();
        assert_eq!(stats.total_actions, 1);
        assert_eq!(stats.successful_actions, 0);
    }

    #[tokio::test]
    async fn test_vision_recovery_retries_once_and_learns() {
        let fixture = Fixture::new();
        fixture.client.set_snapshot("");
        // Candidate click fails, recovery click succeeds.
        fixture.client.script(tools::CLICK, Err("stale selector".into()));
        fixture.client.script(
            tools::SCREENSHOT,
            Ok(json!({"content": [{"type": "image", "data": ONE_PIXEL_PNG}]})),
        );

        let suggester = FixedSuggester(Some("#suggested".into()));
        let action = Action::click("accept cookies").with_selector("#old");
        let outcome = fixture
            .resolver(Some(&suggester))
            .resolve("example.com", &action)
            .await;

        assert!(outcome.is_success());
        assert!(outcome.recovered_by_vision);
        assert_eq!(outcome.selector.as_deref(), Some("#suggested"));

        let best = fixture
            .memory
            .best_selector("example.com", "accept cookies")
            .unwrap();
        assert_eq!(best.as_deref(), Some("#suggested"));
    }

    #[tokio::test]
    async fn test_vision_recovery_failure_is_distinguished() {
        let fixture = Fixture::new();
        fixture.client.set_snapshot("");
        fixture.client.script(tools::CLICK, Err("nope".into()));
        fixture.client.script(
            tools::SCREENSHOT,
            Ok(json!({"content": [{"type": "image", "data": ONE_PIXEL_PNG}]})),
        );

        let suggester = FixedSuggester(None);
        let action = Action::click("ghost").with_selector("#ghost");
        let outcome = fixture
            .resolver(Some(&suggester))
            .resolve("example.com", &action)
            .await;

        assert_eq!(outcome.status, crate::action::OutcomeStatus::Error);
        assert!(outcome.message.contains("vision recovery failed"));
    }

    #[tokio::test]
    async fn test_coordinate_click_bypasses_candidates() {
        let fixture = Fixture::new();

        let action = Action::click("somewhere").with_coordinates(120, 300);
        let outcome = fixture.resolver(None).resolve("example.com", &action).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.coordinates, Some((120, 300)));

        let coordinate_calls = fixture.client.calls_for(tools::CLICK_COORDINATES);
        assert_eq!(coordinate_calls.len(), 1);
        assert_eq!(coordinate_calls[0]["x"], 120);
        assert!(fixture.client.calls_for(tools::SNAPSHOT).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_clicks_to_focus_before_typing() {
        let fixture = Fixture::new();
        fixture.client.set_snapshot("- textbox \"Search query\" [ref=e3]");

        let action = Action::type_text("Search query", "rust async").with_selector("Search query");
        let outcome = fixture.resolver(None).resolve("example.com", &action).await;

        assert!(outcome.is_success());
        assert_eq!(fixture.client.calls_for(tools::CLICK).len(), 1);
        let types = fixture.client.calls_for(tools::TYPE);
        assert_eq!(types.len(), 1);
        assert_eq!(types[0]["text"], "rust async");
        assert_eq!(types[0]["submit"], false);
        assert_eq!(types[0]["ref"], "e3");
    }
}
