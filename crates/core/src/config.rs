use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Remote debugging port of the browser to drive.
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
    /// Explicit browser-level WebSocket endpoint. Discovered from `debugPort` when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Launch a local Chrome/Chromium instead of connecting to a running one.
    #[serde(default)]
    pub launch: bool,
    #[serde(default)]
    pub headed: bool,
    #[serde(default)]
    pub executable: Option<String>,
}

fn default_debug_port() -> u16 {
    9222
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            debug_port: default_debug_port(),
            endpoint: None,
            launch: false,
            headed: false,
            executable: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Hard deadline for the auxiliary print-view navigation.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    /// Soft deadline for print-view content to become ready.
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
    #[serde(default = "default_readiness_poll_ms")]
    pub readiness_poll_ms: u64,
    #[serde(default = "default_min_ready_text_length")]
    pub min_ready_text_length: usize,
    #[serde(default = "default_true")]
    pub print_background: bool,
    #[serde(default = "default_true")]
    pub prefer_css_page_size: bool,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Largest document the direct fetch will download.
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: u64,
}

fn default_navigation_timeout_ms() -> u64 {
    15_000
}

fn default_readiness_timeout_ms() -> u64 {
    8_000
}

fn default_readiness_poll_ms() -> u64 {
    100
}

fn default_min_ready_text_length() -> usize {
    200
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_fetch_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: default_navigation_timeout_ms(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            readiness_poll_ms: default_readiness_poll_ms(),
            min_ready_text_length: default_min_ready_text_length(),
            print_background: true,
            prefer_css_page_size: true,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_fetch_bytes: default_max_fetch_bytes(),
        }
    }
}

impl CaptureConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Period of the automatic re-capture timer.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Delay between a destination page load and the automatic capture it triggers.
    #[serde(default = "default_load_settle_ms")]
    pub load_settle_ms: u64,
    /// Minimum spacing of activity-triggered captures.
    #[serde(default = "default_activity_throttle_ms")]
    pub activity_throttle_ms: u64,
    /// Release the capture session after every capture instead of holding it.
    #[serde(default)]
    pub release_after_capture: bool,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_load_settle_ms() -> u64 {
    1_000
}

fn default_activity_throttle_ms() -> u64 {
    2_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            load_settle_ms: default_load_settle_ms(),
            activity_throttle_ms: default_activity_throttle_ms(),
            release_after_capture: false,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn load_settle(&self) -> Duration {
        Duration::from_millis(self.load_settle_ms)
    }

    pub fn activity_throttle(&self) -> Duration {
        Duration::from_millis(self.activity_throttle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryConfig {
    /// Known destination models. Captures accept any model name.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Write captures to this directory instead of the pending-capture store.
    #[serde(default)]
    pub outbox_dir: Option<String>,
    #[serde(default = "default_pending_max_age_secs")]
    pub pending_max_age_secs: u64,
}

fn default_models() -> Vec<String> {
    vec!["chatgpt".to_string(), "gemini".to_string()]
}

fn default_model() -> String {
    "chatgpt".to_string()
}

fn default_pending_max_age_secs() -> u64 {
    10
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            default_model: default_model(),
            outbox_dir: None,
            pending_max_age_secs: default_pending_max_age_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
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

    /// Browser-level debugging endpoint discovery URL.
    pub fn debug_http_base(&self) -> String {
        format!("http://127.0.0.1:{}", self.browser.debug_port)
    }
}
