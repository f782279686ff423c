use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [transport]
//                    failure_threshold = 3
//
//   env var:         TASKBAY_TRANSPORT__FAILURE_THRESHOLD=3   (double underscore = nesting)
//
//   (single underscore stays within field names: TASKBAY_TRANSPORT__PRIMARY_RETRY_MS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub endpoints: EndpointFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub transport: TransportFileConfig,
    #[serde(default)]
    pub router: RouterFileConfig,
}

/// Platform endpoints (lives under `[endpoints]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointFileConfig {
    /// HTTP base url of the platform API; the websocket url is derived.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_messages_path")]
    pub messages_path: String,
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
}

impl Default for EndpointFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            messages_path: default_messages_path(),
            stream_path: default_stream_path(),
        }
    }
}

/// Session tunables (lives under `[session]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// Refresh the access token when it expires within this margin.
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: default_refresh_margin_secs(),
        }
    }
}

/// Transport tunables (lives under `[transport]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportFileConfig {
    /// Skip the duplex transport entirely and run on the fallback stream.
    /// For environments whose proxies strip websocket upgrades.
    #[serde(default)]
    pub force_fallback: bool,
    #[serde(default = "default_primary_retry_ms")]
    pub primary_retry_ms: u64,
    #[serde(default = "default_fallback_retry_ms")]
    pub fallback_retry_ms: u64,
    /// Consecutive primary failures before the fallback takes over.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Failures further apart than this window do not accumulate.
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
}

impl Default for TransportFileConfig {
    fn default() -> Self {
        Self {
            force_fallback: false,
            primary_retry_ms: default_primary_retry_ms(),
            fallback_retry_ms: default_fallback_retry_ms(),
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
        }
    }
}

/// Event router tunables (lives under `[router]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouterFileConfig {
    #[serde(default = "default_dedupe_max_entries")]
    pub dedupe_max_entries: usize,
    #[serde(default = "default_dedupe_max_age_secs")]
    pub dedupe_max_age_secs: u64,
}

impl Default for RouterFileConfig {
    fn default() -> Self {
        Self {
            dedupe_max_entries: default_dedupe_max_entries(),
            dedupe_max_age_secs: default_dedupe_max_age_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_messages_path() -> String {
    "/messages".to_string()
}
fn default_stream_path() -> String {
    "/notifications/stream".to_string()
}
fn default_refresh_margin_secs() -> u64 {
    30
}
fn default_primary_retry_ms() -> u64 {
    2_000
}
fn default_fallback_retry_ms() -> u64 {
    10_000
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_failure_window_secs() -> u64 {
    30
}
fn default_dedupe_max_entries() -> usize {
    500
}
fn default_dedupe_max_age_secs() -> u64 {
    300
}

/// Build a figment that layers: defaults → config.toml → TASKBAY_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `TASKBAY_ENDPOINTS__BASE_URL=https://api.taskbay.app`
///   `TASKBAY_TRANSPORT__FORCE_FALLBACK=true`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("TASKBAY_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the client)
// =============================================================================

/// Endpoint configuration (runtime view).
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    pub base_url: String,
    pub messages_path: String,
    pub stream_path: String,
}

impl EndpointConfig {
    pub fn from_file(fc: &EndpointFileConfig) -> Self {
        Self {
            base_url: fc.base_url.trim_end_matches('/').to_string(),
            messages_path: fc.messages_path.clone(),
            stream_path: fc.stream_path.clone(),
        }
    }

    /// Duplex endpoint: the base url with its scheme swapped to websocket.
    pub fn ws_url(&self) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{}{}", base, self.messages_path)
    }

    /// Server-push stream endpoint, plain HTTP.
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url, self.stream_path)
    }
}

/// Transport configuration (runtime view).
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub force_fallback: bool,
    pub primary_retry: Duration,
    pub fallback_retry: Duration,
    pub failure_threshold: u32,
    pub failure_window: Duration,
}

impl TransportConfig {
    pub fn from_file(fc: &TransportFileConfig) -> Self {
        Self {
            force_fallback: fc.force_fallback,
            primary_retry: Duration::from_millis(fc.primary_retry_ms),
            fallback_retry: Duration::from_millis(fc.fallback_retry_ms),
            failure_threshold: fc.failure_threshold.max(1),
            failure_window: Duration::from_secs(fc.failure_window_secs),
        }
    }
}

/// Event router configuration (runtime view).
#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub dedupe_max_entries: usize,
    pub dedupe_max_age: Duration,
}

impl RouterConfig {
    pub fn from_file(fc: &RouterFileConfig) -> Self {
        Self {
            dedupe_max_entries: fc.dedupe_max_entries,
            dedupe_max_age: Duration::from_secs(fc.dedupe_max_age_secs),
        }
    }
}

/// Everything the sync client needs, resolved.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub endpoints: EndpointConfig,
    pub refresh_margin: Duration,
    pub transport: TransportConfig,
    pub router: RouterConfig,
}

impl SyncConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            endpoints: EndpointConfig::from_file(&fc.endpoints),
            refresh_margin: Duration::from_secs(fc.session.refresh_margin_secs),
            transport: TransportConfig::from_file(&fc.transport),
            router: RouterConfig::from_file(&fc.router),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}
