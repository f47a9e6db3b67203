use serde::Deserialize;

/// Main configuration structure for Scribe
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Conversation capture configuration
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Ephemeral queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Durable store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// HTTP proxy server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Address to listen on (e.g., "127.0.0.1:8484")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Upstream message API base URL
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    /// Upstream API key (optional - falls back to the env var below)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable name for the upstream API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_url: default_upstream_url(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProxyConfig {
    /// Resolve the upstream API key for a single request.
    ///
    /// Checked lazily at request time so that a missing credential fails
    /// only the request that needs it, never proxy construction. Explicit
    /// config wins; otherwise the env var named by `api_key_env` is read.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8484".to_string()
}

fn default_upstream_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

/// Conversation capture configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Enable conversation capture
    #[serde(default = "default_capture_enabled")]
    pub enabled: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: default_capture_enabled(),
        }
    }
}

fn default_capture_enabled() -> bool {
    true
}

/// Ephemeral queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Queue server URL (optional - direct store writes are used when unset)
    #[serde(default)]
    pub url: Option<String>,
    /// List key that capture payloads are pushed onto
    #[serde(default = "default_queue_key")]
    pub key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: None,
            key: default_queue_key(),
        }
    }
}

fn default_queue_key() -> String {
    "scribe:capture".to_string()
}

/// Durable store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// REST base URL of the durable store (optional - capture is a no-op
    /// when neither queue nor store is configured)
    #[serde(default)]
    pub url: Option<String>,
    /// Store API key (optional - falls back to the env var below)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable name for the store API key
    #[serde(default = "default_store_api_key_env")]
    pub api_key_env: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            api_key_env: default_store_api_key_env(),
        }
    }
}

impl StoreConfig {
    /// Resolve the store API key (explicit config, else environment)
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
    }
}

fn default_store_api_key_env() -> String {
    "SCRIBE_STORE_KEY".to_string()
}
