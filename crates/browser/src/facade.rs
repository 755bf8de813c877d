//! The public browser surface.
//!
//! Composes the process supervisor, RPC transport, resolver, selector
//! memory, and the optional vision collaborator into one API for the
//! workflow driver. Every operation returns a uniform [`ActionOutcome`];
//! when automation is disabled by configuration, every operation reports
//! `disabled` without attempting any I/O.

use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;
use webpilot_core::{Config, Error, Paths, Result};
use webpilot_storage::{ActionRecord, SelectorStore};

use crate::action::{Action, ActionOutcome};
use crate::resolver::{tools, Resolver};
use crate::rpc::{McpToolClient, ToolClient};
use crate::screenshot;
use crate::snapshot;
use crate::supervisor::ProcessSupervisor;
use crate::vision::{OpenAiSuggester, SelectorSuggester};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    fn key(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "PageUp",
            ScrollDirection::Down => "PageDown",
        }
    }
}

pub struct Browser {
    config: Config,
    paths: Paths,
    supervisor: ProcessSupervisor,
    client: Option<McpToolClient>,
    store: SelectorStore,
    suggester: Option<Box<dyn SelectorSuggester>>,
    current_url: Option<String>,
}

impl Browser {
    pub fn new(config: Config, paths: Paths) -> Result<Self> {
        paths.ensure_dirs()?;
        let store = SelectorStore::open(&paths.memory_db())?;

        let suggester: Option<Box<dyn SelectorSuggester>> = config
            .vision_api_key()
            .map(|key| {
                Box::new(OpenAiSuggester::new(&config.vision, key)) as Box<dyn SelectorSuggester>
            });
        if suggester.is_none() {
            debug!("no vision API key configured; selector recovery unavailable");
        }

        Ok(Self {
            supervisor: ProcessSupervisor::new(config.browser.server.clone()),
            config,
            paths,
            client: None,
            store,
            suggester,
            current_url: None,
        })
    }

    /// Swap the vision collaborator (or inject a scripted one in tests).
    pub fn with_suggester(mut self, suggester: Box<dyn SelectorSuggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    pub fn enabled(&self) -> bool {
        self.config.browser.enabled
    }

    pub fn store(&self) -> &SelectorStore {
        &self.store
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    /// Start the automation server and run the protocol handshake.
    /// Returns `Ok(false)` when automation is disabled.
    pub async fn start(&mut self) -> Result<bool> {
        if !self.enabled() {
            warn!("browser automation is disabled");
            return Ok(false);
        }
        self.ensure_started().await?;
        Ok(true)
    }

    pub async fn stop(&mut self) {
        self.supervisor.stop().await;
        self.client = None;
        info!("browser stopped");
    }

    pub async fn restart(&mut self) -> Result<bool> {
        self.stop().await;
        self.start().await
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.browser.call_timeout_secs)
    }

    /// The memory partition key: host of the currently loaded page.
    fn domain(&self) -> String {
        self.current_url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    async fn ensure_started(&mut self) -> Result<()> {
        if !self.enabled() {
            return Err(Error::Disabled);
        }
        if self.client.is_some() && self.supervisor.is_running() {
            return Ok(());
        }

        // Never started, or the server died out from under us. Old stream
        // handles are useless either way; spawn fresh ones.
        self.supervisor.stop().await;
        self.client = None;

        let handles = self.supervisor.start().await?.ok_or_else(|| {
            Error::Start("automation server restart yielded no stream handles".into())
        })?;
        let client = McpToolClient::new(handles, self.call_timeout());
        client.initialize().await?;
        self.client = Some(client);
        Ok(())
    }

    fn client(&self) -> Result<&McpToolClient> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::Start("automation server not started".into()))
    }

    pub async fn navigate(&mut self, url: &str) -> ActionOutcome {
        let action = Action::navigate(url);
        if let Err(e) = action.validate() {
            return ActionOutcome::error(e.to_string());
        }
        if !self.enabled() {
            return ActionOutcome::disabled();
        }
        match self.navigate_inner(&action).await {
            Ok(outcome) => outcome,
            Err(e) => ActionOutcome::from(&e),
        }
    }

    async fn navigate_inner(&mut self, action: &Action) -> Result<ActionOutcome> {
        self.ensure_started().await?;
        let url = action.url.clone().unwrap_or_default();
        let domain = Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        let started = Instant::now();

        info!(%url, "navigating");
        let result = self
            .client()?
            .call_tool(tools::NAVIGATE, json!({ "url": url }))
            .await;

        match result {
            Ok(value) => {
                self.current_url = Some(url.clone());
                let info = snapshot::content_text(&value)
                    .map(|text| snapshot::extract_page_info(&text))
                    .unwrap_or_default();
                self.record_history(&domain, action, None, true, None, started);

                let mut outcome =
                    ActionOutcome::success(format!("navigated to {}", url));
                outcome.url = Some(url);
                outcome.title = info.title;
                outcome.detail = Some(json!({ "preview": info.preview }));
                Ok(outcome)
            }
            Err(e) => {
                let message = format!("navigation to {} failed: {}", url, e);
                self.record_history(&domain, action, None, false, Some(&message), started);
                Ok(ActionOutcome::error(message))
            }
        }
    }

    pub async fn click(&mut self, action: &Action) -> ActionOutcome {
        self.run_resolved(action).await
    }

    pub async fn type_text(&mut self, action: &Action) -> ActionOutcome {
        self.run_resolved(action).await
    }

    pub async fn hover(&mut self, action: &Action) -> ActionOutcome {
        self.run_resolved(action).await
    }

    async fn run_resolved(&mut self, action: &Action) -> ActionOutcome {
        if let Err(e) = action.validate() {
            return ActionOutcome::error(e.to_string());
        }
        if !self.enabled() {
            return ActionOutcome::disabled();
        }
        if let Err(e) = self.ensure_started().await {
            return ActionOutcome::from(&e);
        }
        let client = match self.client() {
            Ok(client) => client,
            Err(e) => return ActionOutcome::from(&e),
        };

        let domain = self.domain();
        let screenshots_dir = self.paths.screenshots_dir();
        let resolver = Resolver {
            client,
            memory: &self.store,
            suggester: self.suggester.as_deref(),
            screenshots_dir: &screenshots_dir,
        };
        resolver.resolve(&domain, action).await
    }

    pub async fn scroll(&mut self, direction: ScrollDirection) -> ActionOutcome {
        self.press_key(direction.key()).await
    }

    pub async fn press_key(&mut self, key: &str) -> ActionOutcome {
        if !self.enabled() {
            return ActionOutcome::disabled();
        }
        if let Err(e) = self.ensure_started().await {
            return ActionOutcome::from(&e);
        }
        let result = match self.client() {
            Ok(client) => client.call_tool(tools::PRESS_KEY, json!({ "key": key })).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => ActionOutcome::success(format!("pressed {}", key)),
            Err(e) => ActionOutcome::error(format!("press {} failed: {}", key, e)),
        }
    }

    /// Waiting must never block the workflow: if the RPC wait fails for any
    /// reason, fall back to a plain timed pause.
    pub async fn wait(&mut self, seconds: u64) -> ActionOutcome {
        if !self.enabled() {
            return ActionOutcome::disabled();
        }

        let rpc_result = match self.ensure_started().await {
            Ok(()) => match self.client() {
                Ok(client) => {
                    client
                        .call_tool(tools::WAIT, json!({ "time": seconds }))
                        .await
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match rpc_result {
            Ok(_) => ActionOutcome::success(format!("waited {}s", seconds)),
            Err(e) => {
                debug!(error = %e, "RPC wait failed, sleeping locally");
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                ActionOutcome::success(format!("waited {}s (local fallback)", seconds))
            }
        }
    }

    /// Capture a screenshot, persist it under the screenshots directory,
    /// and run it through vision optimization. The outcome's `detail.path`
    /// carries the final image path.
    pub async fn screenshot(&mut self) -> ActionOutcome {
        if !self.enabled() {
            return ActionOutcome::disabled();
        }
        if let Err(e) = self.ensure_started().await {
            return ActionOutcome::from(&e);
        }
        let result = match self.client() {
            Ok(client) => client.call_tool(tools::SCREENSHOT, json!({})).await,
            Err(e) => Err(e),
        };

        let value = match result {
            Ok(value) => value,
            Err(e) => return ActionOutcome::error(format!("screenshot failed: {}", e)),
        };
        let Some(data) = screenshot::extract_image_data(&value) else {
            return ActionOutcome::error("no screenshot data received");
        };
        match screenshot::save_screenshot(&self.paths.screenshots_dir(), &data) {
            Ok(path) => {
                let path = screenshot::optimize_for_vision(&path);
                ActionOutcome::success(path.display().to_string())
                    .with_detail(json!({ "path": path }))
            }
            Err(e) => ActionOutcome::error(format!("failed to save screenshot: {}", e)),
        }
    }

    /// DOM snapshot: full rendered text plus the interactive elements with
    /// their snapshot-scoped refs.
    pub async fn snapshot(&mut self) -> ActionOutcome {
        match self.snapshot_text().await {
            Ok(text) => {
                let snap = snapshot::parse_snapshot(&text);
                ActionOutcome::success(format!(
                    "DOM snapshot captured ({} chars, {} elements)",
                    text.len(),
                    snap.elements.len()
                ))
                .with_detail(json!({ "text": text, "elements": snap.elements }))
            }
            Err(e) => ActionOutcome::from(&e),
        }
    }

    /// Visible page text via the snapshot tool.
    pub async fn extract_text(&mut self) -> ActionOutcome {
        match self.snapshot_text().await {
            Ok(text) => ActionOutcome::success(format!("extracted {} chars", text.len()))
                .with_detail(json!({ "text": text })),
            Err(e) => ActionOutcome::from(&e),
        }
    }

    async fn snapshot_text(&mut self) -> Result<String> {
        if !self.enabled() {
            return Err(Error::Disabled);
        }
        self.ensure_started().await?;
        let result = self.client()?.call_tool(tools::SNAPSHOT, json!({})).await?;
        snapshot::content_text(&result)
            .ok_or_else(|| Error::Transport("snapshot result carried no text content".into()))
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
        if let Err(e) = self.store.record_action(record) {
            warn!(error = %e, "failed to append action history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::OutcomeStatus;
    use tempfile::TempDir;

    fn disabled_browser(dir: &TempDir) -> Browser {
        let mut config = Config::default();
        config.browser.enabled = false;
        let paths = Paths::with_base(dir.path().to_path_buf());
        Browser::new(config, paths).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_browser_returns_disabled_outcomes() {
        let dir = TempDir::new().unwrap();
        let mut browser = disabled_browser(&dir);

        assert!(!browser.start().await.unwrap());
        assert_eq!(browser.navigate("https://example.com").await.status, OutcomeStatus::Disabled);
        assert_eq!(
            browser.click(&Action::click("anything")).await.status,
            OutcomeStatus::Disabled
        );
        assert_eq!(browser.wait(1).await.status, OutcomeStatus::Disabled);
        assert_eq!(browser.screenshot().await.status, OutcomeStatus::Disabled);
        assert_eq!(browser.snapshot().await.status, OutcomeStatus::Disabled);
        assert_eq!(browser.extract_text().await.status, OutcomeStatus::Disabled);
    }

    #[tokio::test]
    async fn test_invalid_action_fails_fast() {
        let dir = TempDir::new().unwrap();
        let mut browser = disabled_browser(&dir);

        // Validation runs before the disabled gate and before any I/O.
        let mut action = Action::click("search box");
        action.kind = crate::action::ActionKind::Type;
        let outcome = browser.type_text(&action).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.message.contains("requires text"));
    }

    #[test]
    fn test_domain_extraction() {
        let dir = TempDir::new().unwrap();
        let mut browser = disabled_browser(&dir);
        assert_eq!(browser.domain(), "unknown");
        browser.current_url = Some("https://www.espn.com/nfl/".to_string());
        assert_eq!(browser.domain(), "www.espn.com");
    }
}
