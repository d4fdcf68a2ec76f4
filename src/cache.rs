//! Response Cache
//!
//! In-memory cache of successful upstream bodies keyed by a digest of the
//! request fields that determine the response.

use crate::api::completion::{ChatRequest, MessageContent};
use crate::config::CacheConfig;
use bytes::Bytes;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache key derived from a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest of model, ordered messages (role and content), prompt,
    /// max tokens and temperature. Other fields do not contribute.
    pub fn of(request: &ChatRequest) -> Self {
        let mut hasher = Sha256::new();

        write_field(&mut hasher, b'm', request.model.as_bytes());

        hasher.update((request.messages.len() as u64).to_le_bytes());
        for message in &request.messages {
            write_field(&mut hasher, b'r', message.role.as_bytes());
            match &message.content {
                Some(MessageContent::Text(text)) => write_field(&mut hasher, b't', text.as_bytes()),
                Some(MessageContent::Parts(parts)) => {
                    // serde_json maps keep keys sorted, so this is stable
                    let encoded = serde_json::to_vec(parts).unwrap_or_default();
                    write_field(&mut hasher, b'p', &encoded);
                }
                None => write_field(&mut hasher, b'n', &[]),
            }
        }

        match &request.prompt {
            Some(prompt) => write_field(&mut hasher, b'P', prompt.as_bytes()),
            None => write_field(&mut hasher, b'-', &[]),
        }

        match request.max_tokens {
            Some(max) => write_field(&mut hasher, b'k', &max.to_le_bytes()),
            None => write_field(&mut hasher, b'-', &[]),
        }

        match request.temperature {
            // -0.0 and 0.0 sample identically
            Some(t) => {
                let t = if t == 0.0 { 0.0 } else { t };
                write_field(&mut hasher, b'T', &t.to_bits().to_le_bytes())
            }
            None => write_field(&mut hasher, b'-', &[]),
        }

        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tag and length-prefix a field so adjacent fields cannot alias
fn write_field(hasher: &mut Sha256, tag: u8, bytes: &[u8]) {
    hasher.update([tag]);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    body: Bytes,
    expires_at: Instant,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl: Duration,
}

impl CacheStats {
    /// Hit rate in percent
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

/// Response cache for successful completions
#[derive(Debug)]
pub struct ResponseCache {
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled && config.ttl_seconds > 0 && config.max_entries > 0,
            ttl: config.ttl(),
            max_entries: config.max_entries,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache with a fixed ttl and default capacity
    pub fn with_ttl(ttl: Duration) -> Self {
        let max_entries = CacheConfig::default().max_entries;
        Self {
            enabled: !ttl.is_zero() && max_entries > 0,
            ttl,
            max_entries,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stored body for `key`, unless absent or expired
    pub fn lookup(&self, key: &Fingerprint) -> Option<Bytes> {
        if !self.enabled {
            return None;
        }

        let now = Instant::now();
        let found = self
            .entries
            .read()
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.body.clone());

        match &found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %key, "cache hit");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %key, "cache miss");
            }
        }
        found
    }

    /// Store `body` under `key` for one ttl, replacing any previous entry
    pub fn store(&self, key: Fingerprint, body: Bytes) {
        if !self.enabled {
            return;
        }

        let now = Instant::now();
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| now < entry.expires_at);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                body,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Remove every entry, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl: self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn request(body: &str) -> ChatRequest {
        ChatRequest::parse(body.as_bytes()).unwrap()
    }

    #[test]
    fn test_fingerprint_ignores_unrelated_fields() {
        let a = request(r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hello"}],"max_tokens":10,"temperature":0.5}"#);
        let b = request(r#"{"temperature":0.5,"user":"someone","stream":false,"model":"gpt-4","max_tokens":10,"messages":[{"role":"user","content":"Hello","name":"x"}]}"#);
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
        assert_eq!(Fingerprint::of(&a).as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_relevant_fields() {
        let base = r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hello"}],"max_tokens":10,"temperature":0.5}"#;
        let variants = [
            r#"{"model":"gpt-4o","messages":[{"role":"user","content":"Hello"}],"max_tokens":10,"temperature":0.5}"#,
            r#"{"model":"gpt-4","messages":[{"role":"system","content":"Hello"}],"max_tokens":10,"temperature":0.5}"#,
            r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hello!"}],"max_tokens":10,"temperature":0.5}"#,
            r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hello"}],"max_tokens":11,"temperature":0.5}"#,
            r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hello"}],"max_tokens":10,"temperature":0.6}"#,
            r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hello"}],"temperature":0.5}"#,
            r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hello"}],"max_tokens":10}"#,
            r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hello"},{"role":"user","content":""}],"max_tokens":10,"temperature":0.5}"#,
            r#"{"model":"gpt-4","messages":[{"role":"user","content":[{"type":"text","text":"Hello"}]}],"max_tokens":10,"temperature":0.5}"#,
        ];

        let base = Fingerprint::of(&request(base));
        for variant in variants {
            assert_ne!(base, Fingerprint::of(&request(variant)), "{}", variant);
        }
    }

    #[test]
    fn test_fingerprint_field_boundaries() {
        // concatenating role and content would make these equal
        let a = request(r#"{"model":"gpt-4","messages":[{"role":"user","content":"ab"}]}"#);
        let b = request(r#"{"model":"gpt-4","messages":[{"role":"usera","content":"b"}]}"#);
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));

        // message order matters
        let a = request(r#"{"model":"m","messages":[{"role":"user","content":"1"},{"role":"user","content":"2"}]}"#);
        let b = request(r#"{"model":"m","messages":[{"role":"user","content":"2"},{"role":"user","content":"1"}]}"#);
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));

        // different prompts never share an entry
        let a = request(r#"{"model":"claude-2","prompt":"one"}"#);
        let b = request(r#"{"model":"claude-2","prompt":"two"}"#);
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_store_lookup_overwrite() {
        let cache = ResponseCache::with_ttl(Duration::from_secs(60));
        let key = Fingerprint::of(&request(r#"{"model":"gpt-4"}"#));

        assert!(cache.lookup(&key).is_none());
        cache.store(key.clone(), Bytes::from_static(b"first"));
        assert_eq!(cache.lookup(&key).unwrap(), Bytes::from_static(b"first"));

        cache.store(key.clone(), Bytes::from_static(b"second"));
        assert_eq!(cache.lookup(&key).unwrap(), Bytes::from_static(b"second"));
        assert_eq!(cache.len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 66.666).abs() < 0.1);
    }

    #[test]
    fn test_entry_expires() {
        let cache = ResponseCache::with_ttl(Duration::from_millis(40));
        let key = Fingerprint::of(&request(r#"{"model":"gpt-4"}"#));

        cache.store(key.clone(), Bytes::from_static(b"body"));
        assert!(cache.lookup(&key).is_some());

        thread::sleep(Duration::from_millis(70));
        assert!(cache.lookup(&key).is_none());
    }

    #[test]
    fn test_clear() {
        let cache = ResponseCache::with_ttl(Duration::from_secs(60));
        for model in ["a", "b", "c"] {
            let key = Fingerprint::of(&request(&format!(r#"{{"model":"{}"}}"#, model)));
            cache.store(key, Bytes::from_static(b"x"));
        }
        assert_eq!(cache.clear(), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_soonest_expiry() {
        let cache = ResponseCache::new(&CacheConfig {
            enabled: true,
            ttl_seconds: 60,
            max_entries: 2,
        });
        let keys: Vec<Fingerprint> = ["a", "b", "c"]
            .iter()
            .map(|m| Fingerprint::of(&request(&format!(r#"{{"model":"{}"}}"#, m))))
            .collect();

        cache.store(keys[0].clone(), Bytes::from_static(b"a"));
        thread::sleep(Duration::from_millis(5));
        cache.store(keys[1].clone(), Bytes::from_static(b"b"));
        thread::sleep(Duration::from_millis(5));
        cache.store(keys[2].clone(), Bytes::from_static(b"c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&keys[0]).is_none());
        assert!(cache.lookup(&keys[1]).is_some());
        assert!(cache.lookup(&keys[2]).is_some());
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let cache = ResponseCache::new(&CacheConfig {
            enabled: false,
            ..Default::default()
        });
        let key = Fingerprint::of(&request(r#"{"model":"gpt-4"}"#));
        cache.store(key.clone(), Bytes::from_static(b"x"));
        assert!(cache.lookup(&key).is_none());
        assert!(cache.is_empty());
    }
}
