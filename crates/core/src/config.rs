use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

/// Automation-server launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// External runtime the server package runs on. Must resolve on PATH.
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Launcher command used to start the server package.
    #[serde(default = "default_launcher")]
    pub launcher: String,
    /// Server package passed to the launcher.
    #[serde(default = "default_package")]
    pub package: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Fixed warm-up interval after spawn before the first liveness check.
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
    /// Grace period for a clean exit before the process is force-killed.
    #[serde(default = "default_grace_secs")]
    pub stop_grace_secs: u64,
}

fn default_runtime() -> String {
    "node".to_string()
}

fn default_launcher() -> String {
    "npx".to_string()
}

fn default_package() -> String {
    "@browsermcp/mcp@latest".to_string()
}

fn default_warmup_ms() -> u64 {
    2000
}

fn default_grace_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            launcher: default_launcher(),
            package: default_package(),
            extra_args: Vec::new(),
            warmup_ms: default_warmup_ms(),
            stop_grace_secs: default_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-call RPC timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_call_timeout() -> u64 {
    30
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            call_timeout_secs: default_call_timeout(),
            server: ServerConfig::default(),
        }
    }
}

/// Optional vision collaborator used for last-resort selector recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_vision_api_base")]
    pub api_base: String,
    #[serde(default = "default_vision_model")]
    pub model: String,
}

fn default_vision_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_vision_api_base(),
            model: default_vision_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub vision: VisionConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `WEBPILOT_BROWSER_ENABLED` and `WEBPILOT_BROWSER_TIMEOUT` override
    /// the config file so deployments can gate automation without editing
    /// config.json.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WEBPILOT_BROWSER_ENABLED") {
            self.browser.enabled = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("WEBPILOT_BROWSER_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                self.browser.call_timeout_secs = secs;
            }
        }
    }

    pub fn vision_api_key(&self) -> Option<String> {
        let key = self.vision.api_key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
        std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert!(cfg.browser.enabled);
        assert_eq!(cfg.browser.call_timeout_secs, 30);
        assert_eq!(cfg.browser.server.launcher, "npx");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{ "browser": { "enabled": false } }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert!(!cfg.browser.enabled);
        assert_eq!(cfg.browser.call_timeout_secs, 30);
        assert_eq!(cfg.browser.server.runtime, "node");
    }
}
