//! Expiring in-memory memoization
//!
//! `ExpiringMemo` guards an expensive, idempotent operation behind a
//! time-bounded store keyed by the operation's arguments. Each memo owns its
//! own store, so two wrapped operations never share entries.
//!
//! Failures are never cached, and an empty result is a perfectly good cached
//! value. No lock is held while the wrapped operation runs: two callers that
//! miss on the same key at the same time will both compute, and the last
//! write wins.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

/// Source of "now" for expiry decisions
pub trait Clock: Send + Sync {
    /// Returns the current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when advanced explicitly
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Cache key built from an operation's argument list
///
/// Positional arguments keep their order. Keyword arguments are stored sorted
/// by name, so `kwarg("a", 1).kwarg("b", 2)` and `kwarg("b", 2).kwarg("a", 1)`
/// produce equal keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    args: Vec<String>,
    kwargs: BTreeMap<String, String>,
}

impl CacheKey {
    /// The key of a call with no arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument
    pub fn arg(mut self, value: impl ToString) -> Self {
        self.args.push(value.to_string());
        self
    }

    /// Sets a keyword argument
    pub fn kwarg(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.kwargs.insert(name.into(), value.to_string());
        self
    }

    /// True for the key of a call with no arguments
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

struct Entry<V> {
    value: V,
    stored_at: DateTime<Utc>,
    last_used: u64,
}

struct Store<K, V> {
    entries: HashMap<K, Entry<V>>,
    tick: u64,
}

/// Time-bounded memo for a single operation
///
/// Entries are fresh while `now - stored_at < ttl`. Stale entries are not
/// removed; they are overwritten by the next successful computation. With a
/// `max_entries` bound the least recently used entry is evicted to make room.
pub struct ExpiringMemo<K, V> {
    ttl: Duration,
    max_entries: Option<usize>,
    clock: Arc<dyn Clock>,
    store: Mutex<Store<K, V>>,
}

impl<K, V> ExpiringMemo<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an unbounded memo using the system clock
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            max_entries: None,
            clock: Arc::new(SystemClock),
            store: Mutex::new(Store {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Bounds the number of stored entries (minimum 1)
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1));
        self
    }

    /// Replaces the clock used for expiry checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the stored value for `key` if it is still fresh
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut store = self.lock();
        store.tick += 1;
        let tick = store.tick;
        let entry = store.entries.get_mut(key)?;
        if now - entry.stored_at < self.ttl {
            entry.last_used = tick;
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Stores `value` under `key`, stamped with the current time
    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        let mut store = self.lock();
        store.tick += 1;
        let tick = store.tick;

        if let Some(max) = self.max_entries {
            if !store.entries.contains_key(&key) && store.entries.len() >= max {
                let oldest = store
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    store.entries.remove(&oldest);
                }
            }
        }

        store.entries.insert(
            key,
            Entry {
                value,
                stored_at: now,
                last_used: tick,
            },
        );
    }

    /// Returns the fresh value for `key`, computing and storing it on a miss
    ///
    /// # Arguments
    /// * `key` - Cache key for this call
    /// * `op` - Computes the value; only invoked on a miss or after expiry
    ///
    /// # Returns
    /// * `Ok(V)` from the store or from `op`
    /// * `Err(E)` if `op` fails; nothing is stored in that case
    pub fn get_or_try_insert_with<E, F>(&self, key: K, op: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = op()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Async counterpart of [`get_or_try_insert_with`](Self::get_or_try_insert_with)
    ///
    /// The store lock is released while `op` is awaited.
    pub async fn get_or_try_insert_with_async<E, F, Fut>(&self, key: K, op: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = op().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Number of stored entries, fresh or stale
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Store<K, V>> {
        self.store.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Wraps `op` in its own expiring memo
///
/// The returned closure caches by its full argument value; use a tuple or a
/// [`CacheKey`] for multi-argument operations.
pub fn memoize<A, V, E, F>(ttl: Duration, op: F) -> impl Fn(A) -> Result<V, E>
where
    A: Eq + Hash + Clone,
    V: Clone,
    F: Fn(A) -> Result<V, E>,
{
    let memo = ExpiringMemo::new(ttl);
    move |args: A| memo.get_or_try_insert_with(args.clone(), || op(args))
}
