//! # In-Memory TTL Store
//!
//! The sole in-process owner of value bytes. Every entry carries an absolute
//! expiry instant; once that instant passes, reads behave as if the entry
//! does not exist regardless of whether the background sweeper has removed
//! it yet. The sweeper is eventual cleanup, never the source of truth.
//!
//! ## Isolation
//!
//! Bytes are copied on the way in and on the way out. Mutating a buffer you
//! passed to [`Store::put`], or one you got back from [`Store::get`], never
//! affects what the store holds.
//!
//! ## Capacity
//!
//! `total_bytes` tracks the exact sum of live entry sizes. With a non-zero
//! `max_bytes`, a write is rejected when the post-write total would exceed
//! the cap. Overwrites are charged only their size delta, so shrinking a key
//! always succeeds even on a full store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// A stored value and its lifetime bookkeeping. Never mutated in place:
/// overwrites replace the whole entry.
#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    created_at: SystemTime,
    original_ttl: Duration,
    expires_at: Instant,
    size: usize,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn remaining_ttl(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Metadata returned alongside the value by [`Store::get_with_metadata`].
/// The HTTP adapter maps these onto the `X-Created-At`, `X-Original-TTL`,
/// and `X-Remaining-TTL` response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Wall-clock write time on this replica.
    pub created_at: SystemTime,
    /// The TTL requested by the caller, after clamping.
    pub original_ttl: Duration,
    /// Time left until expiry, measured at the moment of the read.
    pub remaining_ttl: Duration,
}

/// Entry count and live byte total, as one consistent snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    /// Number of entries currently held (may include expired entries the
    /// sweeper has not yet removed — they are invisible to reads).
    pub entries: usize,
    /// Sum of held entry sizes in bytes.
    pub bytes: u64,
}

/// The store's only failure mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The write would push `total_bytes` past `max_bytes`.
    #[error("store capacity exceeded: {needed} bytes needed, {available} available")]
    CapacityExceeded {
        /// Size of the rejected value.
        needed: u64,
        /// Bytes that could still be written (accounting for any entry the
        /// write would have replaced).
        available: u64,
    },
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct Inner {
    entries: HashMap<String, Entry>,
    total_bytes: u64,
}

/// Concurrent in-memory key/value store with per-entry TTL.
///
/// Reads take a shared lock and proceed in parallel; writes are exclusive.
/// All operations are safe under parallel callers.
pub struct Store {
    inner: RwLock<Inner>,
    max_bytes: u64,
    clock: Arc<dyn Clock>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Store {
    /// Creates a store with the given byte capacity (0 = unlimited), backed
    /// by the system clock.
    pub fn new(max_bytes: u64) -> Self {
        Self::with_clock(max_bytes, Arc::new(SystemClock))
    }

    /// Creates a store with an injected clock. Tests use this with
    /// [`crate::clock::ManualClock`] to exercise expiry without sleeping.
    pub fn with_clock(max_bytes: u64, clock: Arc<dyn Clock>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                total_bytes: 0,
            }),
            max_bytes,
            clock,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Inserts or overwrites `key`.
    ///
    /// The bytes are copied into owned storage; the caller's buffer can be
    /// reused freely afterwards. `created_at` is stamped from this store's
    /// clock and the TTL becomes an absolute expiry instant. An overwrite
    /// whose target has already expired is charged as a fresh insert — the
    /// dead entry's bytes are released before the cap check.
    pub fn put(&self, key: &str, data: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        let size = data.len() as u64;

        let mut inner = self.inner.write();
        let old_size = inner.entries.get(key).map(|e| e.size as u64).unwrap_or(0);
        let new_total = inner.total_bytes - old_size + size;

        if self.max_bytes > 0 && new_total > self.max_bytes {
            let available = self.max_bytes.saturating_sub(inner.total_bytes - old_size);
            return Err(StoreError::CapacityExceeded {
                needed: size,
                available,
            });
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                data: data.to_vec(),
                created_at: self.clock.wall_now(),
                original_ttl: ttl,
                expires_at: now + ttl,
                size: data.len(),
            },
        );
        inner.total_bytes = new_total;

        trace!(key, size, ttl_secs = ttl.as_secs(), "stored entry");
        Ok(())
    }

    /// Returns a copy of the value, or `None` if the key is absent or
    /// expired. Expired entries are invisible even before the sweeper runs.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.clock.now();
        let inner = self.inner.read();
        inner
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.data.clone())
    }

    /// Like [`Store::get`], but also returns the entry's lifetime metadata.
    pub fn get_with_metadata(&self, key: &str) -> Option<(Vec<u8>, EntryMetadata)> {
        let now = self.clock.now();
        let inner = self.inner.read();
        inner.entries.get(key).filter(|e| !e.is_expired(now)).map(|e| {
            (
                e.data.clone(),
                EntryMetadata {
                    created_at: e.created_at,
                    original_ttl: e.original_ttl,
                    remaining_ttl: e.remaining_ttl(now),
                },
            )
        })
    }

    /// Snapshot of live keys, optionally filtered by prefix. Order is
    /// unspecified.
    pub fn scan(&self, prefix: Option<&str>) -> Vec<String> {
        let now = self.clock.now();
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .filter(|(k, _)| prefix.map_or(true, |p| k.starts_with(p)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Visits every live entry as `(key, remaining_ttl_seconds)`. The
    /// visitor returning `false` stops the walk early; the return value says
    /// whether the walk completed. The read lock is held for the duration of
    /// the visit, so keep visitors cheap.
    pub fn range(&self, mut visit: impl FnMut(&str, u64) -> bool) -> bool {
        let now = self.clock.now();
        let inner = self.inner.read();
        for (key, entry) in &inner.entries {
            if entry.is_expired(now) {
                continue;
            }
            if !visit(key, entry.remaining_ttl(now).as_secs()) {
                return false;
            }
        }
        true
    }

    /// Current entry count and byte total.
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read();
        StoreStats {
            entries: inner.entries.len(),
            bytes: inner.total_bytes,
        }
    }

    /// Removes expired entries and releases their bytes. Returns how many
    /// were removed. Called by the background sweeper; safe to call
    /// directly.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = inner.entries.remove(key) {
                inner.total_bytes -= entry.size as u64;
            }
        }

        if !expired.is_empty() {
            debug!(removed = expired.len(), "swept expired entries");
        }
        expired.len()
    }

    /// Spawns the background sweeper on the current tokio runtime. Runs
    /// until [`Store::close`] is called.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let store = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        store.sweep();
                    }
                    _ = shutdown.changed() => {
                        debug!("store sweeper stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Stops the background sweeper. Idempotent; operations after close are
    /// permitted but the store no longer cleans up after itself.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_manual_clock(max_bytes: u64) -> (Store, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let store = Store::with_clock(max_bytes, Arc::clone(&clock) as Arc<dyn Clock>);
        (store, clock)
    }

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn round_trip() {
        let (store, _clock) = store_with_manual_clock(0);
        store.put("k", b"hello", TTL).unwrap();
        assert_eq!(store.get("k").as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn missing_key_is_none() {
        let (store, _clock) = store_with_manual_clock(0);
        assert_eq!(store.get("absent"), None);
    }

    #[test]
    fn zero_length_value_is_stored() {
        let (store, _clock) = store_with_manual_clock(10);
        store.put("empty", b"", TTL).unwrap();
        assert_eq!(store.get("empty").as_deref(), Some(&b""[..]));
        assert_eq!(store.stats().bytes, 0);
    }

    #[test]
    fn expired_entry_is_invisible_before_sweep() {
        let (store, clock) = store_with_manual_clock(0);
        store.put("k", b"v", Duration::from_secs(10)).unwrap();

        clock.advance(Duration::from_secs(11));

        // The sweeper has not run; the entry is still physically present.
        assert_eq!(store.stats().entries, 1);
        assert_eq!(store.get("k"), None);
        assert!(store.get_with_metadata("k").is_none());
        assert!(store.scan(None).is_empty());
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let (store, clock) = store_with_manual_clock(0);
        store.put("k", b"v", Duration::from_secs(10)).unwrap();

        // now == expires_at means expired.
        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn copy_in_isolation() {
        let (store, _clock) = store_with_manual_clock(0);
        let mut buf = b"original".to_vec();
        store.put("k", &buf, TTL).unwrap();

        buf[0] = b'X';
        assert_eq!(store.get("k").as_deref(), Some(&b"original"[..]));
    }

    #[test]
    fn copy_out_isolation() {
        let (store, _clock) = store_with_manual_clock(0);
        store.put("k", b"original", TTL).unwrap();

        let mut out = store.get("k").unwrap();
        out[0] = b'X';
        assert_eq!(store.get("k").as_deref(), Some(&b"original"[..]));
    }

    #[test]
    fn overwrite_refreshes_ttl() {
        let (store, clock) = store_with_manual_clock(0);
        store.put("k", b"v1", Duration::from_secs(10)).unwrap();

        clock.advance(Duration::from_secs(8));
        store.put("k", b"v2", Duration::from_secs(10)).unwrap();

        // Past the first entry's expiry, within the second's.
        clock.advance(Duration::from_secs(5));
        assert_eq!(store.get("k").as_deref(), Some(&b"v2"[..]));

        let (_, meta) = store.get_with_metadata("k").unwrap();
        assert_eq!(meta.original_ttl, Duration::from_secs(10));
        assert_eq!(meta.remaining_ttl, Duration::from_secs(5));
    }

    #[test]
    fn capacity_rejects_new_key_when_full() {
        let (store, _clock) = store_with_manual_clock(10);
        store.put("a", &[0u8; 10], TTL).unwrap();

        let err = store.put("b", &[0u8; 1], TTL).unwrap_err();
        assert_eq!(
            err,
            StoreError::CapacityExceeded {
                needed: 1,
                available: 0
            }
        );
    }

    #[test]
    fn capacity_allows_shrinking_overwrite_when_full() {
        let (store, _clock) = store_with_manual_clock(10);
        store.put("a", &[0u8; 10], TTL).unwrap();

        // Overwrite that shrinks succeeds even though the store is full.
        store.put("a", &[1u8; 5], TTL).unwrap();
        assert_eq!(store.stats().bytes, 5);

        // And the freed room is usable.
        store.put("b", &[2u8; 5], TTL).unwrap();
        assert_eq!(store.stats().bytes, 10);
    }

    #[test]
    fn capacity_rejects_growing_overwrite_past_cap() {
        let (store, _clock) = store_with_manual_clock(10);
        store.put("a", &[0u8; 6], TTL).unwrap();
        store.put("b", &[0u8; 4], TTL).unwrap();

        let err = store.put("a", &[0u8; 7], TTL).unwrap_err();
        assert_eq!(
            err,
            StoreError::CapacityExceeded {
                needed: 7,
                available: 6
            }
        );
        // The original entry is untouched.
        assert_eq!(store.get("a").as_deref(), Some(&[0u8; 6][..]));
    }

    #[test]
    fn unlimited_capacity_when_max_is_zero() {
        let (store, _clock) = store_with_manual_clock(0);
        store.put("big", &vec![0u8; 1 << 20], TTL).unwrap();
        assert_eq!(store.stats().bytes, 1 << 20);
    }

    #[test]
    fn accounting_tracks_live_bytes_through_churn() {
        let (store, clock) = store_with_manual_clock(0);
        store.put("a", &[0u8; 100], Duration::from_secs(10)).unwrap();
        store.put("b", &[0u8; 50], Duration::from_secs(100)).unwrap();
        store.put("a", &[0u8; 30], Duration::from_secs(10)).unwrap();
        assert_eq!(store.stats().bytes, 80);

        clock.advance(Duration::from_secs(20));
        let removed = store.sweep();
        assert_eq!(removed, 1);

        let stats = store.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.bytes, 50);
    }

    #[test]
    fn overwriting_expired_entry_releases_dead_bytes_first() {
        let (store, clock) = store_with_manual_clock(10);
        store.put("a", &[0u8; 10], Duration::from_secs(5)).unwrap();

        clock.advance(Duration::from_secs(6));

        // "a" is expired but unswept; its bytes must not count against the
        // overwrite.
        store.put("a", &[1u8; 8], Duration::from_secs(5)).unwrap();
        assert_eq!(store.stats().bytes, 8);
        assert_eq!(store.get("a").as_deref(), Some(&[1u8; 8][..]));
    }

    #[test]
    fn scan_filters_by_prefix() {
        let (store, _clock) = store_with_manual_clock(0);
        store.put("app:1", b"x", TTL).unwrap();
        store.put("app:2", b"y", TTL).unwrap();
        store.put("other", b"z", TTL).unwrap();

        let mut keys = store.scan(Some("app:"));
        keys.sort();
        assert_eq!(keys, vec!["app:1", "app:2"]);
        assert_eq!(store.scan(None).len(), 3);
    }

    #[test]
    fn range_visits_live_entries_and_stops_early() {
        let (store, clock) = store_with_manual_clock(0);
        store.put("a", b"x", Duration::from_secs(100)).unwrap();
        store.put("b", b"y", Duration::from_secs(200)).unwrap();
        store.put("dead", b"z", Duration::from_secs(1)).unwrap();
        clock.advance(Duration::from_secs(5));

        let mut visited = Vec::new();
        let completed = store.range(|key, remaining| {
            visited.push((key.to_string(), remaining));
            true
        });
        assert!(completed);
        visited.sort();
        assert_eq!(
            visited,
            vec![("a".to_string(), 95), ("b".to_string(), 195)]
        );

        let mut count = 0;
        let completed = store.range(|_, _| {
            count += 1;
            false
        });
        assert!(!completed);
        assert_eq!(count, 1);
    }

    #[test]
    fn close_is_idempotent() {
        let (store, _clock) = store_with_manual_clock(0);
        store.close();
        store.close();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_entries() {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(Store::with_clock(0, Arc::clone(&clock) as Arc<dyn Clock>));
        store.put("k", b"v", Duration::from_secs(10)).unwrap();
        store.start_sweeper(Duration::from_secs(30));

        clock.advance(Duration::from_secs(11));
        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert_eq!(store.stats().entries, 0);
        store.close();
    }
}
