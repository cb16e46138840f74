use std::collections::HashMap;
use std::sync::Mutex;

use crate::proxy::fingerprint::ConversationFingerprint;

/// A cached binding from a conversation history to a backend chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSession {
    pub chat_id: String,
    pub model_url: String,
}

struct CacheEntry {
    session: CachedSession,
    last_used: u64,
}

struct CacheInner {
    entries: HashMap<ConversationFingerprint, CacheEntry>,
    access_counter: u64,
}

/// Bounded fingerprint -> chat session store with LRU eviction.
///
/// Every operation is a single compound step under one lock, so concurrent
/// callers always observe a consistent state. The lock is never held across
/// network I/O; entries never expire by time alone.
pub struct ConversationCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl ConversationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                access_counter: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Look up a session and mark it most recently used.
    ///
    /// A hit additionally requires the stored backend model URL to match, so a
    /// conversation never continues against a different backend.
    pub fn lookup(
        &self,
        fingerprint: &ConversationFingerprint,
        model_url: &str,
    ) -> Option<CachedSession> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.access_counter += 1;
        let stamp = inner.access_counter;
        let entry = inner.entries.get_mut(fingerprint)?;
        if entry.session.model_url != model_url {
            return None;
        }
        entry.last_used = stamp;
        Some(entry.session.clone())
    }

    /// Insert or replace a binding, evicting the least recently used entry
    /// once the configured capacity is exceeded.
    pub fn insert(&self, fingerprint: ConversationFingerprint, session: CachedSession) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.access_counter += 1;
        let stamp = inner.access_counter;
        inner.entries.insert(
            fingerprint,
            CacheEntry {
                session,
                last_used: stamp,
            },
        );
        while inner.entries.len() > self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(fp, _)| fp.clone());
            match oldest {
                Some(fp) => {
                    inner.entries.remove(&fp);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(label: &str) -> ConversationFingerprint {
        ConversationFingerprint::compute("", vec![("user", label)])
    }

    fn session(chat_id: &str) -> CachedSession {
        CachedSession {
            chat_id: chat_id.to_string(),
            model_url: "https://backend/chat/model-a".to_string(),
        }
    }

    #[test]
    fn test_lookup_hit_and_miss() {
        let cache = ConversationCache::new(4);
        cache.insert(fp("a"), session("chat-1"));

        let hit = cache.lookup(&fp("a"), "https://backend/chat/model-a");
        assert_eq!(hit.map(|s| s.chat_id), Some("chat-1".to_string()));
        assert!(cache.lookup(&fp("b"), "https://backend/chat/model-a").is_none());
    }

    #[test]
    fn test_model_url_mismatch_is_a_miss() {
        let cache = ConversationCache::new(4);
        cache.insert(fp("a"), session("chat-1"));
        assert!(cache.lookup(&fp("a"), "https://backend/chat/model-b").is_none());
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = ConversationCache::new(3);
        cache.insert(fp("a"), session("chat-a"));
        cache.insert(fp("b"), session("chat-b"));
        cache.insert(fp("c"), session("chat-c"));

        // Touch "a" so "b" becomes the oldest.
        assert!(cache.lookup(&fp("a"), "https://backend/chat/model-a").is_some());

        cache.insert(fp("d"), session("chat-d"));
        assert_eq!(cache.len(), 3);
        assert!(cache.lookup(&fp("b"), "https://backend/chat/model-a").is_none());
        assert!(cache.lookup(&fp("a"), "https://backend/chat/model-a").is_some());
        assert!(cache.lookup(&fp("c"), "https://backend/chat/model-a").is_some());
        assert!(cache.lookup(&fp("d"), "https://backend/chat/model-a").is_some());
    }

    #[test]
    fn test_reinsert_replaces_and_touches() {
        let cache = ConversationCache::new(2);
        cache.insert(fp("a"), session("chat-1"));
        cache.insert(fp("b"), session("chat-2"));
        cache.insert(fp("a"), session("chat-3"));
        assert_eq!(cache.len(), 2);

        // "b" is now the LRU entry and goes first.
        cache.insert(fp("c"), session("chat-4"));
        assert!(cache.lookup(&fp("b"), "https://backend/chat/model-a").is_none());
        let hit = cache.lookup(&fp("a"), "https://backend/chat/model-a");
        assert_eq!(hit.map(|s| s.chat_id), Some("chat-3".to_string()));
    }

    #[test]
    fn test_concurrent_access_keeps_invariants() {
        use std::sync::Arc;

        let cache = Arc::new(ConversationCache::new(8));
        let mut handles = Vec::new();
        for t in 0..4 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let label = format!("t{}-{}", t, i);
                    cache.insert(fp(&label), session(&label));
                    cache.lookup(&fp(&label), "https://backend/chat/model-a");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 8);
    }
}
