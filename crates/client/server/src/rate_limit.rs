//! Per-(method, client-host) rate limiting.
//!
//! One keyed token-bucket limiter per method, keyed by client host.
//! Buckets for unseen hosts are created lazily by the keyed state
//! store; checks on distinct keys do not serialize against each other.

use std::collections::HashMap;
use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::Quota;
use lg_jsonrpc::Method;

type KeyedLimiter = governor::RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock, NoOpMiddleware>;

/// A per-second replenishment rate and the burst it may accumulate.
#[derive(Clone, Copy, Debug)]
pub struct RateLimit {
    pub per_second: u32,
    pub burst: u32,
}

impl RateLimit {
    pub fn new(per_second: u32, burst: u32) -> Self {
        Self { per_second, burst }
    }

    fn quota(&self) -> Quota {
        // A zero rate or burst would make the limiter unconstructible;
        // clamp to the smallest usable bucket instead.
        let per_second = NonZeroU32::new(self.per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst).unwrap_or(NonZeroU32::MIN);
        Quota::per_second(per_second).allow_burst(burst)
    }
}

/// Per-method `(rate, burst)` pairs with a fallback for methods that
/// are not listed.
#[derive(Clone, Debug)]
pub struct RateLimits {
    pub default: RateLimit,
    pub per_method: HashMap<Method, RateLimit>,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self { default: RateLimit::new(10, 20), per_method: HashMap::new() }
    }
}

impl RateLimits {
    pub fn with_method(mut self, method: Method, limit: RateLimit) -> Self {
        self.per_method.insert(method, limit);
        self
    }

    fn for_method(&self, method: Method) -> RateLimit {
        self.per_method.get(&method).copied().unwrap_or(self.default)
    }
}

/// Decides whether a `(method, client host)` pair may proceed now.
pub struct RateLimiter {
    limiters: HashMap<Method, KeyedLimiter>,
}

impl RateLimiter {
    pub fn new(limits: &RateLimits) -> Self {
        let limiters = Method::ALL
            .into_iter()
            .map(|method| (method, governor::RateLimiter::keyed(limits.for_method(method).quota())))
            .collect();
        Self { limiters }
    }

    /// Non-blocking: true iff the bucket for `(method, host)` holds a
    /// token right now. The token is consumed on success.
    pub fn allow(&self, method: Method, host: &str) -> bool {
        self.limiters
            .get(&method)
            .expect("a limiter exists for every catalogued method")
            .check_key(&host.to_string())
            .is_ok()
    }
}
