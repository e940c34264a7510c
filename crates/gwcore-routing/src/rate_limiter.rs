use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use gwcore_common::CredentialId;

use crate::model::RateLimitSpec;

/// Sliding-window timestamp log for one rate-limited credential.
struct WindowEntry {
    timestamps: Vec<Instant>,
}

impl WindowEntry {
    fn new() -> Self {
        Self {
            timestamps: Vec::new(),
        }
    }

    fn evict_before(&mut self, cutoff: Instant) {
        self.timestamps.retain(|ts| *ts >= cutoff);
    }
}

/// Sliding 1-second window rate limiter (spec §4.2.1), shaped after the
/// teacher pack's `RateLimiter`/`RateLimitEntry` pair: a `timestamps: Vec`
/// per key, evicted lazily on each check rather than on a background
/// timer.
pub struct RateLimiter {
    window: Duration,
    entries: RwLock<HashMap<CredentialId, WindowEntry>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            window: Duration::from_secs(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Non-blocking test-and-increment: records `now` as a hit and returns
    /// whether the credential stayed under `spec.requests_per_second`
    /// (burst allowance included) for the trailing window.
    pub fn check(&self, credential_id: CredentialId, spec: &RateLimitSpec, now: Instant) -> bool {
        let cutoff = now - self.window;
        let limit = spec.requests_per_second.max(0.0) as usize + spec.burst_size as usize;

        let mut entries = self.entries.write().expect("rate limiter lock poisoned");
        let entry = entries
            .entry(credential_id)
            .or_insert_with(WindowEntry::new);
        entry.evict_before(cutoff);

        if entry.timestamps.len() >= limit {
            return false;
        }
        entry.timestamps.push(now);
        true
    }

    /// Drops bookkeeping for credentials no longer present after a reload,
    /// so disabled/removed credentials don't leak memory indefinitely.
    pub fn retain_known(&self, known: impl Fn(&CredentialId) -> bool) {
        let mut entries = self.entries.write().expect("rate limiter lock poisoned");
        entries.retain(|id, _| known(id));
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new();
        let spec = RateLimitSpec {
            requests_per_second: 2.0,
            burst_size: 0,
        };
        let credential = CredentialId(1);
        let t0 = Instant::now();

        assert!(limiter.check(credential, &spec, t0));
        assert!(limiter.check(credential, &spec, t0));
        assert!(!limiter.check(credential, &spec, t0));
    }

    #[test]
    fn window_slides_and_frees_capacity() {
        let limiter = RateLimiter::new();
        let spec = RateLimitSpec {
            requests_per_second: 1.0,
            burst_size: 0,
        };
        let credential = CredentialId(1);
        let t0 = Instant::now();

        assert!(limiter.check(credential, &spec, t0));
        assert!(!limiter.check(credential, &spec, t0));
        assert!(limiter.check(credential, &spec, t0 + Duration::from_millis(1100)));
    }

    #[test]
    fn separate_credentials_have_independent_windows() {
        let limiter = RateLimiter::new();
        let spec = RateLimitSpec {
            requests_per_second: 1.0,
            burst_size: 0,
        };
        let t0 = Instant::now();

        assert!(limiter.check(CredentialId(1), &spec, t0));
        assert!(limiter.check(CredentialId(2), &spec, t0));
    }
}
