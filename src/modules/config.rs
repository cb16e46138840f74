use std::fs;
use std::path::Path;

use crate::proxy::config::RelayConfig;
use crate::proxy::error::{RelayError, RelayResult};

const CONFIG_FILE: &str = "relay_config.json";

/// Load relay configuration, writing defaults back when the file is missing.
pub fn load_relay_config() -> RelayResult<RelayConfig> {
    let config_path = Path::new(CONFIG_FILE);

    if !config_path.exists() {
        let config = RelayConfig::default();
        let _ = save_relay_config(&config);
        return Ok(config);
    }

    let content = fs::read_to_string(config_path)
        .map_err(|e| RelayError::config(format!("failed to read {}: {}", CONFIG_FILE, e)))?;

    serde_json::from_str(&content)
        .map_err(|e| RelayError::config(format!("failed to parse {}: {}", CONFIG_FILE, e)))
}

/// Save relay configuration.
pub fn save_relay_config(config: &RelayConfig) -> RelayResult<()> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| RelayError::config(format!("failed to serialize config: {}", e)))?;

    fs::write(CONFIG_FILE, content)
        .map_err(|e| RelayError::config(format!("failed to save {}: {}", CONFIG_FILE, e)))
}
