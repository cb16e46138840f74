//! Caller key and backend token loading.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::proxy::error::{RelayError, RelayResult};

/// Load the caller-facing API key list (a JSON array of strings).
///
/// An empty set is valid at load time; requests are then rejected with 503
/// until keys are provisioned.
pub fn load_client_keys(path: &Path) -> RelayResult<HashSet<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| RelayError::config(format!("failed to read {}: {}", path.display(), e)))?;
    parse_client_keys(&content)
}

pub fn parse_client_keys(content: &str) -> RelayResult<HashSet<String>> {
    let keys: Vec<String> = serde_json::from_str(content)
        .map_err(|e| RelayError::config(format!("failed to parse client key list: {}", e)))?;
    Ok(keys.into_iter().collect())
}

/// Load backend auth tokens, one per line.
///
/// Lines may carry extra `----`-separated fields after the token; only the
/// first field is kept. Blank lines are skipped.
pub fn load_auth_tokens(path: &Path) -> RelayResult<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| RelayError::config(format!("failed to read {}: {}", path.display(), e)))?;
    Ok(parse_auth_tokens(&content))
}

pub fn parse_auth_tokens(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            line.split("----").next().map(|token| token.to_string())
        })
        .collect()
}
