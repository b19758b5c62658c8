//! TTL response cache keyed by request fingerprint.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lg_jsonrpc::{Request, Response};
use lg_store::NodeId;
use sha3::{Digest, Sha3_256};

/// Cache key: the 32-byte fingerprint of `(params ∥ method)` plus the
/// target-node hint, so a request pinned to a specific node never
/// shares an entry with the dispatcher-choice variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    fingerprint: [u8; 32],
    target: Option<NodeId>,
}

impl CacheKey {
    pub fn of(request: &Request, target: Option<&NodeId>) -> Self {
        let params = serde_json::to_vec(&request.params).expect("a serde_json::Value always serializes");
        let mut hasher = Sha3_256::new();
        hasher.update(&params);
        hasher.update(request.method.as_bytes());
        Self { fingerprint: hasher.finalize().into(), target: target.cloned() }
    }
}

struct CacheEntry {
    response: Response,
    expires_at: Instant,
}

/// A TTL map from [`CacheKey`] to a previously produced response.
///
/// Entries expire `ttl` after insertion and are purged lazily: an
/// expired entry observed by [`get`](Self::get) is removed on the
/// spot. There is no explicit delete.
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Response> {
        let mut entries = self.entries.lock().expect("response cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: CacheKey, response: Response) {
        let entry = CacheEntry { response, expires_at: Instant::now() + self.ttl };
        self.entries.lock().expect("response cache lock poisoned").insert(key, entry);
    }
}
