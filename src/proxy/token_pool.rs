use std::sync::atomic::{AtomicUsize, Ordering};

use crate::proxy::error::{RelayError, RelayResult};

/// Fixed pool of backend auth tokens handed out round-robin.
///
/// Selection is a single atomic advance, so arbitrary concurrent callers each
/// get exactly one token and every token keeps being selected under sustained
/// calling.
pub struct TokenPool {
    tokens: Vec<String>,
    cursor: AtomicUsize,
}

impl TokenPool {
    /// An empty pool is a configuration error, rejected here rather than at
    /// call time.
    pub fn new(tokens: Vec<String>) -> RelayResult<Self> {
        if tokens.is_empty() {
            return Err(RelayError::config("no backend auth tokens configured"));
        }
        Ok(Self {
            tokens,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Next token in rotation, wrapping to the first after the last.
    pub fn next_token(&self) -> &str {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.tokens.len();
        &self.tokens[idx]
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
