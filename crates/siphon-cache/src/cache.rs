use crate::error::CacheError;
use crate::stats::{hit_rate, CacheStats, EvictionCause, EvictionCounts};
use parking_lot::Mutex;
use siphon_memory::{CallbackId, PressureLevel, PressureMonitor};
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Capacity at [`PressureLevel::Normal`].
    pub capacity_bytes: u64,
    /// Entries older than this (since insertion) are dropped on the next access.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 256 * 1024 * 1024,
            ttl: None,
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    size_bytes: u64,
    inserted_at: Instant,
    last_access: Instant,
    // Position in `Inner::order`; strictly increasing with every access.
    tick: u64,
}

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    // Access tick -> key, oldest first.
    order: BTreeMap<u64, K>,
    next_tick: u64,
    occupied: u64,
    level: PressureLevel,
    hits: u64,
    misses: u64,
    insertions: u64,
    rejections: u64,
    evictions: EvictionCounts,
}

struct Attachment {
    monitor: PressureMonitor,
    callback: CallbackId,
}

/// Thread-safe LRU cache bounded by a pressure-scaled byte capacity.
///
/// Invariant: the bytes of live entries never exceed
/// [`AdaptiveCache::effective_capacity`].
pub struct AdaptiveCache<K, V> {
    config: CacheConfig,
    inner: Mutex<Inner<K, V>>,
    attachment: Mutex<Option<Attachment>>,
}

impl<K, V> std::fmt::Debug for AdaptiveCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("AdaptiveCache")
            .field("config", &self.config)
            .field("entries", &inner.entries.len())
            .field("occupied", &inner.occupied)
            .field("level", &inner.level)
            .finish()
    }
}

impl<K, V> AdaptiveCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
                occupied: 0,
                level: PressureLevel::Normal,
                hits: 0,
                misses: 0,
                insertions: 0,
                rejections: 0,
                evictions: EvictionCounts::default(),
            }),
            attachment: Mutex::new(None),
        }
    }

    /// Build a cache and subscribe it to `monitor`'s level changes.
    pub fn with_monitor(config: CacheConfig, monitor: &PressureMonitor) -> Arc<Self> {
        let cache = Arc::new(Self::new(config));
        cache.attach(monitor);
        cache
    }

    /// Follow `monitor`'s level from now on, replacing any previous attachment.
    ///
    /// The monitor only holds a weak reference to the cache.
    pub fn attach(self: &Arc<Self>, monitor: &PressureMonitor) {
        self.detach();

        let weak: Weak<Self> = Arc::downgrade(self);
        let callback = monitor.register_callback(move |event| {
            if let Some(cache) = weak.upgrade() {
                cache.apply_pressure(event.level);
            }
        });
        *self.attachment.lock() = Some(Attachment {
            monitor: monitor.clone(),
            callback,
        });
        self.apply_pressure(monitor.current_level());
    }

    /// Stop following the attached monitor. The current level is kept.
    pub fn detach(&self) {
        if let Some(attachment) = self.attachment.lock().take() {
            attachment.monitor.unregister_callback(attachment.callback);
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Recompute capacity for `level` and evict down to it.
    ///
    /// When the level rises, at least [`PressureLevel::eviction_target_bytes`]
    /// of the current occupancy is shed. A lower level only restores capacity.
    pub fn apply_pressure(&self, level: PressureLevel) {
        let mut inner = self.inner.lock();
        let previous = inner.level;
        if previous == level {
            return;
        }
        inner.level = level;

        let before = inner.occupied;
        let target = if level > previous {
            level.eviction_target_bytes(before)
        } else {
            0
        };
        let capacity = self.capacity_for(level);

        let mut evicted = 0usize;
        while inner.occupied > 0
            && (before - inner.occupied < target || inner.occupied > capacity)
        {
            if !inner.evict_oldest(EvictionCause::Pressure) {
                break;
            }
            evicted += 1;
        }

        tracing::debug!(
            target = "siphon.cache",
            ?previous,
            ?level,
            evicted,
            before_bytes = before,
            after_bytes = inner.occupied,
            effective_capacity = capacity,
            "cache applied pressure level"
        );
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => self.is_expired(entry, now),
        };
        if expired {
            inner.remove_entry(key, Some(EvictionCause::Ttl));
            inner.misses += 1;
            return None;
        }

        let tick = inner.bump_tick();
        let entry = inner.entries.get_mut(key)?;
        if let Some(owner) = inner.order.remove(&entry.tick) {
            inner.order.insert(tick, owner);
        }
        entry.tick = tick;
        entry.last_access = now;
        let value = entry.value.clone();
        inner.hits += 1;
        Some(value)
    }

    /// Insert `value` accounted as `size_bytes`, evicting least recently used
    /// entries until it fits.
    ///
    /// Artifacts larger than the whole effective capacity are rejected and the
    /// cache is left untouched, apart from dropping expired entries.
    pub fn put(&self, key: K, value: V, size_bytes: u64) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.purge_expired_locked(&mut inner, now);

        let capacity = self.capacity_for(inner.level);
        if size_bytes > capacity {
            inner.rejections += 1;
            tracing::debug!(
                target = "siphon.cache",
                size_bytes,
                effective_capacity = capacity,
                level = ?inner.level,
                "cache rejected oversized artifact"
            );
            return Err(CacheError::TooLarge {
                size_bytes,
                effective_capacity: capacity,
            });
        }

        // Replacing a key is not an eviction.
        inner.remove_entry(&key, None);

        while inner.occupied + size_bytes > capacity {
            let cause = if inner.occupied + size_bytes > self.config.capacity_bytes {
                EvictionCause::Capacity
            } else {
                EvictionCause::Pressure
            };
            if !inner.evict_oldest(cause) {
                break;
            }
        }

        let tick = inner.bump_tick();
        inner.order.insert(tick, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                size_bytes,
                inserted_at: now,
                last_access: now,
                tick,
            },
        );
        inner.occupied += size_bytes;
        inner.insertions += 1;
        Ok(())
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().remove_entry(key, None)
    }

    /// Whether a live (unexpired) entry exists. Does not count as an access.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .is_some_and(|entry| !self.is_expired(entry, now))
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.occupied = 0;
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        self.purge_expired_locked(&mut inner, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn occupied_bytes(&self) -> u64 {
        self.inner.lock().occupied
    }

    pub fn level(&self) -> PressureLevel {
        self.inner.lock().level
    }

    pub fn effective_capacity(&self) -> u64 {
        self.capacity_for(self.inner.lock().level)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: hit_rate(inner.hits, inner.misses),
            insertions: inner.insertions,
            rejections: inner.rejections,
            entries: inner.entries.len(),
            occupied_bytes: inner.occupied,
            capacity_bytes: self.config.capacity_bytes,
            effective_capacity: self.capacity_for(inner.level),
            level: inner.level,
            evictions: inner.evictions,
        }
    }

    fn capacity_for(&self, level: PressureLevel) -> u64 {
        ((self.config.capacity_bytes as f64) * level.capacity_fraction()).floor() as u64
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        self.config
            .ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.inserted_at) >= ttl)
    }

    fn purge_expired_locked(&self, inner: &mut Inner<K, V>, now: Instant) -> usize {
        if self.config.ttl.is_none() {
            return 0;
        }
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove_entry(key, Some(EvictionCause::Ttl));
        }
        if !expired.is_empty() {
            tracing::debug!(
                target = "siphon.cache",
                expired = expired.len(),
                "cache dropped expired entries"
            );
        }
        expired.len()
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash,
{
    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn remove_entry<Q>(&mut self, key: &Q, cause: Option<EvictionCause>) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        self.occupied -= entry.size_bytes;
        if let Some(cause) = cause {
            self.evictions.record(cause);
        }
        Some(entry.value)
    }

    /// Evict the least recently used entry. `false` when the cache is empty.
    fn evict_oldest(&mut self, cause: EvictionCause) -> bool {
        let Some((_, key)) = self.order.pop_first() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.occupied -= entry.size_bytes;
            self.evictions.record(cause);
            tracing::trace!(
                target = "siphon.cache",
                ?cause,
                size_bytes = entry.size_bytes,
                idle_ms = entry.last_access.elapsed().as_millis() as u64,
                "cache evicted entry"
            );
        }
        true
    }
}

impl<K, V> Drop for AdaptiveCache<K, V> {
    fn drop(&mut self) {
        if let Some(attachment) = self.attachment.get_mut().take() {
            attachment.monitor.unregister_callback(attachment.callback);
        }
    }
}
