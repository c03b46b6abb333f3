//! Shadow alert deduplication.
//!
//! The volatility gate may be evaluated several times for the same bar, and
//! each evaluation that crosses the entry threshold would otherwise raise a
//! fresh notification. [`ShadowAlertRegister`] remembers which decision ids
//! have already alerted so only the *first* crossing per id goes out.
//!
//! Ids are hashed with xxHash64 and kept with their registration time. An
//! entry expires once it is older than the configured TTL; when the register
//! is full the oldest entry is evicted first.

use std::collections::VecDeque;

use ahash::AHashMap;
use chrono::{DateTime, Duration, Utc};

/// Time-windowed set of alerted decision ids.
///
/// # Thread safety
///
/// Not thread-safe. The gate worker owns its own instance.
pub struct ShadowAlertRegister {
    ttl: Duration,
    capacity: usize,
    /// hash -> registration time
    entries: AHashMap<u64, DateTime<Utc>>,
    /// Registration order, oldest first. May hold stale pairs for hashes that
    /// were re-registered after expiry; those are skipped on eviction.
    order: VecDeque<(u64, DateTime<Utc>)>,
}

impl ShadowAlertRegister {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: AHashMap::new(),
            order: VecDeque::new(),
        }
    }

    #[inline]
    fn hash_id(id: &str) -> u64 {
        xxhash_rust::xxh64::xxh64(id.as_bytes(), 0)
    }

    /// Register `id` if it should alert and has not alerted yet.
    ///
    /// Returns `true` when a new alert should be emitted. Returns `false` when
    /// `should_alert` is false (nothing is registered) or when `id` is still
    /// registered from an earlier call.
    pub fn try_register(&mut self, id: &str, should_alert: bool, now: DateTime<Utc>) -> bool {
        self.evict_expired(now);
        if !should_alert {
            return false;
        }

        let hash = Self::hash_id(id);
        if self.entries.contains_key(&hash) {
            return false;
        }

        while self.entries.len() >= self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }
        self.entries.insert(hash, now);
        self.order.push_back((hash, now));
        true
    }

    /// Whether `id` is currently registered (ignores expiry until the next
    /// mutating call).
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(&Self::hash_id(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all state.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        while let Some(&(hash, at)) = self.order.front() {
            if now - at < self.ttl {
                break;
            }
            self.order.pop_front();
            if self.entries.get(&hash) == Some(&at) {
                self.entries.remove(&hash);
            }
        }
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some((hash, at)) = self.order.pop_front() {
            if self.entries.get(&hash) == Some(&at) {
                self.entries.remove(&hash);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn first_registration_wins() {
        let mut r = ShadowAlertRegister::new(Duration::hours(1), 16);
        assert!(r.try_register("gvrs:1", true, t0()));
        assert!(!r.try_register("gvrs:1", true, t0())); // duplicate
        assert!(r.try_register("gvrs:2", true, t0()));
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn no_alert_registers_nothing() {
        let mut r = ShadowAlertRegister::new(Duration::hours(1), 16);
        assert!(!r.try_register("gvrs:1", false, t0()));
        assert!(r.is_empty());
        assert!(r.try_register("gvrs:1", true, t0()));
    }

    #[test]
    fn expires_after_ttl() {
        let mut r = ShadowAlertRegister::new(Duration::minutes(10), 16);
        assert!(r.try_register("gvrs:1", true, t0()));
        assert!(!r.try_register("gvrs:1", true, t0() + Duration::minutes(9)));
        assert!(r.try_register("gvrs:1", true, t0() + Duration::minutes(10)));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut r = ShadowAlertRegister::new(Duration::hours(1), 2);
        assert!(r.try_register("a", true, t0()));
        assert!(r.try_register("b", true, t0() + Duration::seconds(1)));
        assert!(r.try_register("c", true, t0() + Duration::seconds(2)));
        assert_eq!(r.len(), 2);
        assert!(!r.contains("a"));
        assert!(r.contains("b") && r.contains("c"));
    }
}
