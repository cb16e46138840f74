use serde::{Deserialize, Serialize};

/// Relay service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether to allow LAN access
    /// - false: loopback only, 127.0.0.1
    /// - true: bind 0.0.0.0
    #[serde(default = "default_allow_lan")]
    pub allow_lan_access: bool,

    /// Conversation cache capacity (entries)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Backend connect timeout (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Cap on aggregating a full response in non-streaming mode (seconds)
    #[serde(default = "default_collect_timeout")]
    pub collect_timeout_secs: u64,

    /// Model catalog file
    #[serde(default = "default_models_file")]
    pub models_file: String,

    /// Caller-facing API key list file
    #[serde(default = "default_client_keys_file")]
    pub client_keys_file: String,

    /// Backend auth token list file
    #[serde(default = "default_tokens_file")]
    pub tokens_file: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            allow_lan_access: default_allow_lan(),
            cache_capacity: default_cache_capacity(),
            connect_timeout_secs: default_connect_timeout(),
            collect_timeout_secs: default_collect_timeout(),
            models_file: default_models_file(),
            client_keys_file: default_client_keys_file(),
            tokens_file: default_tokens_file(),
        }
    }
}

fn default_port() -> u16 {
    8000
}

fn default_allow_lan() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    100
}

fn default_connect_timeout() -> u64 {
    20
}

fn default_collect_timeout() -> u64 {
    crate::proxy::mappers::openai::DEFAULT_COLLECT_TIMEOUT_SECS
}

fn default_models_file() -> String {
    "models.json".to_string()
}

fn default_client_keys_file() -> String {
    "client_api_keys.json".to_string()
}

fn default_tokens_file() -> String {
    "vertical.txt".to_string()
}

impl RelayConfig {
    /// Actual listen address for the configured access policy.
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }
}
