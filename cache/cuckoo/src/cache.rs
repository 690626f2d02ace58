//! The cuckoo hash storage engine.
//!
//! A `CuckooCache` owns one contiguous preallocated slot region. Every
//! operation runs inside a single critical section (shared for reads,
//! exclusive for mutations), so a displacement chain commits in full or not
//! at all and readers never observe a key in two slots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::CuckooConfig;
use crate::error::{CacheError, CacheResult};
use crate::hash::{KeyHasher, NUM_HASHES};
use crate::numeric;
use crate::policy::DisplacementPolicy;
use crate::slot::SlotLayout;
use crate::time::CoarseClock;
use crate::MAX_KEY_LEN;

/// Outcome of a conditional store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The item was written.
    Stored,
    /// Precondition failed: key present for `add`, absent for `replace`.
    NotStored,
    /// CAS token did not match the resident item.
    Exists,
    /// CAS target was absent.
    NotFound,
}

/// Owned snapshot of an item returned by [`CuckooCache::get`].
#[derive(Debug, Clone)]
pub struct ItemGuard {
    value: Vec<u8>,
    flags: u32,
    cas: u64,
}

impl ItemGuard {
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn into_value(self) -> Vec<u8> {
        self.value
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// CAS stamp of the snapshot. Zero when CAS is disabled.
    pub fn cas(&self) -> u64 {
        self.cas
    }
}

impl AsRef<[u8]> for ItemGuard {
    fn as_ref(&self) -> &[u8] {
        &self.value
    }
}

enum PutVerb {
    Set,
    Add,
    Replace,
    Cas(u64),
}

/// Interior table state, guarded by the cache's lock.
#[derive(Debug)]
struct Table {
    slots: Box<[u8]>,
    layout: SlotLayout,
    nitem: usize,
    occupied: usize,
    rng: Xoshiro256PlusPlus,
    /// Coarse time at which the last flush takes effect; 0 = no flush issued.
    flush_at: u32,
    /// Items stamped at or below this value are dead once the flush is in
    /// effect. CAS counter value when CAS is enabled, coarse create time
    /// otherwise.
    flush_watermark: u64,
    cas_enabled: bool,
}

impl Table {
    #[inline]
    fn slot(&self, idx: usize) -> &[u8] {
        let size = self.layout.item_size();
        &self.slots[idx * size..(idx + 1) * size]
    }

    #[inline]
    fn slot_mut(&mut self, idx: usize) -> &mut [u8] {
        let size = self.layout.item_size();
        &mut self.slots[idx * size..(idx + 1) * size]
    }

    #[inline]
    fn expired(&self, idx: usize, now: u32) -> bool {
        let expire = self.layout.expire(self.slot(idx));
        expire != 0 && expire <= now
    }

    #[inline]
    fn flushed(&self, idx: usize, now: u32) -> bool {
        if self.flush_at == 0 || now < self.flush_at {
            return false;
        }
        let slot = self.slot(idx);
        let stamp = if self.cas_enabled {
            self.layout.cas(slot)
        } else {
            self.layout.create(slot) as u64
        };
        stamp <= self.flush_watermark
    }

    /// Occupied and holding a logically present item.
    #[inline]
    fn is_live(&self, idx: usize, now: u32) -> bool {
        self.layout.occupied(self.slot(idx)) && !self.expired(idx, now) && !self.flushed(idx, now)
    }

    /// Vacant, or occupied by an item that is expired or flushed out.
    #[inline]
    fn is_insertable(&self, idx: usize, now: u32) -> bool {
        !self.is_live(idx, now)
    }

    /// First candidate slot holding a live item with this exact key.
    fn find_live(&self, candidates: &[usize], key: &[u8], now: u32) -> Option<usize> {
        candidates
            .iter()
            .copied()
            .find(|&idx| self.is_live(idx, now) && self.layout.key(self.slot(idx)) == key)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_item(
        &mut self,
        idx: usize,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expire: u32,
        now: u32,
        cas: u64,
    ) {
        if !self.layout.occupied(self.slot(idx)) {
            self.occupied += 1;
        }
        let layout = self.layout;
        layout.write(self.slot_mut(idx), key, value, flags, expire, now, cas);
    }

    fn move_item(&mut self, src: usize, dst: usize) {
        debug_assert_ne!(src, dst);
        if !self.layout.occupied(self.slot(dst)) {
            self.occupied += 1;
        }
        let size = self.layout.item_size();
        self.slots.copy_within(src * size..(src + 1) * size, dst * size);
    }

    fn clear_item(&mut self, idx: usize) {
        if self.layout.occupied(self.slot(idx)) {
            self.occupied -= 1;
        }
        let layout = self.layout;
        layout.clear(self.slot_mut(idx));
    }
}

/// Fixed-capacity cuckoo hash cache.
#[derive(Debug)]
pub struct CuckooCache {
    table: RwLock<Table>,
    hasher: KeyHasher,
    clock: Arc<CoarseClock>,
    cas_counter: AtomicU64,
    evicted: AtomicU64,
    reclaimed: AtomicU64,
    layout: SlotLayout,
    nitem: usize,
    cas_enabled: bool,
    policy: DisplacementPolicy,
    displace_depth: usize,
}

impl CuckooCache {
    /// Allocate the slot region and build the cache.
    ///
    /// Fails when the slot size cannot hold a header plus a maximum-length
    /// key, or when the slot count is zero.
    pub fn new(config: CuckooConfig, clock: Arc<CoarseClock>) -> CacheResult<Self> {
        let layout = SlotLayout::new(config.item_size, config.item_cas);
        if config.item_size < layout.header_len() + MAX_KEY_LEN {
            return Err(CacheError::ItemSizeTooSmall);
        }
        if config.nitem == 0 {
            return Err(CacheError::CapacityZero);
        }

        let slots = vec![0u8; config.nitem * config.item_size].into_boxed_slice();
        let table = Table {
            slots,
            layout,
            nitem: config.nitem,
            occupied: 0,
            rng: Xoshiro256PlusPlus::seed_from_u64(config.hash_seed ^ 0xd1ce_d1ce_d1ce_d1ce),
            flush_at: 0,
            flush_watermark: 0,
            cas_enabled: config.item_cas,
        };

        Ok(Self {
            table: RwLock::new(table),
            hasher: KeyHasher::new(config.hash_seed),
            clock,
            cas_counter: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
            layout,
            nitem: config.nitem,
            cas_enabled: config.item_cas,
            policy: config.policy,
            displace_depth: config.displace_depth,
        })
    }

    /// Look up a key. Expired and flushed items are misses.
    pub fn get(&self, key: &[u8]) -> Option<ItemGuard> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return None;
        }
        let now = self.clock.now();
        let candidates = self.hasher.candidates(key, self.nitem);
        let table = self.table.read();
        let idx = table.find_live(&candidates, key, now)?;
        let slot = table.slot(idx);
        Some(ItemGuard {
            value: self.layout.value(slot).to_vec(),
            flags: self.layout.flags(slot),
            cas: self.layout.cas(slot),
        })
    }

    /// Unconditional store.
    pub fn set(&self, key: &[u8], value: &[u8], flags: u32, expire: u32) -> CacheResult<()> {
        self.put(key, value, flags, expire, PutVerb::Set).map(|_| ())
    }

    /// Store only if the key is absent (or expired).
    pub fn add(&self, key: &[u8], value: &[u8], flags: u32, expire: u32) -> CacheResult<StoreOutcome> {
        self.put(key, value, flags, expire, PutVerb::Add)
    }

    /// Store only if the key is present and live.
    pub fn replace(
        &self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expire: u32,
    ) -> CacheResult<StoreOutcome> {
        self.put(key, value, flags, expire, PutVerb::Replace)
    }

    /// Store only if the resident item's CAS stamp equals `token`.
    pub fn cas(
        &self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expire: u32,
        token: u64,
    ) -> CacheResult<StoreOutcome> {
        self.put(key, value, flags, expire, PutVerb::Cas(token))
    }

    /// Remove a key. Returns `true` if a live item was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return false;
        }
        let now = self.clock.now();
        let candidates = self.hasher.candidates(key, self.nitem);
        let mut table = self.table.write();
        match table.find_live(&candidates, key, now) {
            Some(idx) => {
                table.clear_item(idx);
                true
            }
            None => false,
        }
    }

    /// Increment the stored decimal value, wrapping at 2^64.
    pub fn incr(&self, key: &[u8], delta: u64) -> CacheResult<u64> {
        self.arith(key, delta, true)
    }

    /// Decrement the stored decimal value, saturating at zero.
    pub fn decr(&self, key: &[u8], delta: u64) -> CacheResult<u64> {
        self.arith(key, delta, false)
    }

    /// Update an item's expiry without touching its value.
    pub fn touch(&self, key: &[u8], expire: u32) -> bool {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return false;
        }
        let now = self.clock.now();
        let candidates = self.hasher.candidates(key, self.nitem);
        let mut table = self.table.write();
        match table.find_live(&candidates, key, now) {
            Some(idx) => {
                let layout = self.layout;
                layout.set_expire(table.slot_mut(idx), expire);
                true
            }
            None => false,
        }
    }

    /// Invalidate all current items after `after` seconds. O(1); space is
    /// reclaimed lazily as slots are revisited.
    pub fn flush(&self, after: u32) {
        let now = self.clock.now();
        let mut table = self.table.write();
        table.flush_at = now.saturating_add(after);
        table.flush_watermark = if self.cas_enabled {
            self.cas_counter.load(Ordering::Relaxed)
        } else {
            now.saturating_sub(1) as u64
        };
    }

    /// Number of occupied slots. Counts items that expired or were flushed
    /// but whose slots have not been reclaimed yet.
    pub fn item_count(&self) -> usize {
        self.table.read().occupied
    }

    /// Total slot count.
    pub fn capacity(&self) -> usize {
        self.nitem
    }

    /// Items overwritten by depth-bounded displacement.
    pub fn evictions(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Expired or flushed slots reclaimed by later insertions.
    pub fn expirations(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }

    /// Largest value that fits in a slot beside a one-byte key.
    pub fn max_value_len(&self) -> usize {
        self.layout.payload_len() - 1
    }

    fn check_key(&self, key: &[u8]) -> CacheResult<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(CacheError::KeyTooLong);
        }
        Ok(())
    }

    fn next_cas(&self) -> u64 {
        if self.cas_enabled {
            self.cas_counter.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            0
        }
    }

    fn put(
        &self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expire: u32,
        verb: PutVerb,
    ) -> CacheResult<StoreOutcome> {
        self.check_key(key)?;
        if key.len() + value.len() > self.layout.payload_len() {
            return Err(CacheError::ItemTooLarge);
        }

        let now = self.clock.now();
        let candidates = self.hasher.candidates(key, self.nitem);
        let mut table = self.table.write();
        let existing = table.find_live(&candidates, key, now);

        match verb {
            PutVerb::Set => {}
            PutVerb::Add => {
                if existing.is_some() {
                    return Ok(StoreOutcome::NotStored);
                }
            }
            PutVerb::Replace => {
                if existing.is_none() {
                    return Ok(StoreOutcome::NotStored);
                }
            }
            PutVerb::Cas(token) => match existing {
                None => return Ok(StoreOutcome::NotFound),
                Some(idx) => {
                    if self.layout.cas(table.slot(idx)) != token {
                        return Ok(StoreOutcome::Exists);
                    }
                }
            },
        }

        let cas = self.next_cas();
        let idx = match existing {
            Some(idx) => idx,
            None => match self.find_insertable(&table, &candidates, now) {
                Some(idx) => idx,
                None => self.displace(&mut table, &candidates, now, 0),
            },
        };
        table.write_item(idx, key, value, flags, expire, now, cas);
        Ok(StoreOutcome::Stored)
    }

    /// First candidate that is vacant or holds a dead item.
    fn find_insertable(&self, table: &Table, candidates: &[usize], now: u32) -> Option<usize> {
        let idx = candidates
            .iter()
            .copied()
            .find(|&idx| table.is_insertable(idx, now))?;
        if table.layout.occupied(table.slot(idx)) {
            self.reclaimed.fetch_add(1, Ordering::Relaxed);
        }
        Some(idx)
    }

    /// Free one of `candidates` by displacing its resident item, bounded by
    /// the configured depth. Returns the freed slot index; the caller
    /// overwrites it. All candidates are live on entry.
    fn displace(&self, table: &mut Table, candidates: &[usize], now: u32, depth: usize) -> usize {
        let victim = self.pick_victim(table, candidates);
        if depth >= self.displace_depth {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            return victim;
        }

        let victim_key = table.layout.key(table.slot(victim)).to_vec();
        let all = self.hasher.candidates(&victim_key, self.nitem);
        let mut others = [0usize; NUM_HASHES];
        let mut n = 0;
        for &c in &all {
            if c != victim {
                others[n] = c;
                n += 1;
            }
        }
        if n == 0 {
            // Every hash maps the victim to its current slot; it cannot move.
            self.evicted.fetch_add(1, Ordering::Relaxed);
            return victim;
        }
        let others = &others[..n];

        let dest = match self.find_insertable(table, others, now) {
            Some(idx) => idx,
            None => self.displace(table, others, now, depth + 1),
        };
        table.move_item(victim, dest);
        victim
    }

    fn pick_victim(&self, table: &mut Table, candidates: &[usize]) -> usize {
        match self.policy {
            DisplacementPolicy::Random => {
                candidates[(table.rng.next_u64() % candidates.len() as u64) as usize]
            }
            DisplacementPolicy::ExpireFirst => {
                let mut nearest = u32::MAX;
                let mut ties = [0usize; NUM_HASHES];
                let mut n = 0;
                for &idx in candidates {
                    let expire = table.layout.expire(table.slot(idx));
                    let effective = if expire == 0 { u32::MAX } else { expire };
                    if effective < nearest {
                        nearest = effective;
                        n = 0;
                    }
                    if effective == nearest {
                        ties[n] = idx;
                        n += 1;
                    }
                }
                ties[(table.rng.next_u64() % n as u64) as usize]
            }
        }
    }

    fn arith(&self, key: &[u8], delta: u64, incr: bool) -> CacheResult<u64> {
        self.check_key(key)?;
        let now = self.clock.now();
        let candidates = self.hasher.candidates(key, self.nitem);
        let mut table = self.table.write();
        let idx = table
            .find_live(&candidates, key, now)
            .ok_or(CacheError::KeyNotFound)?;

        let old = numeric::parse_decimal(self.layout.value(table.slot(idx)))
            .ok_or(CacheError::NotNumeric)?;
        let new = if incr {
            old.wrapping_add(delta)
        } else {
            old.saturating_sub(delta)
        };

        let mut buf = [0u8; 20];
        let len = numeric::format_decimal(new, &mut buf);
        let klen = self.layout.key(table.slot(idx)).len();
        if klen + len > self.layout.payload_len() {
            return Err(CacheError::ItemTooLarge);
        }

        let cas = self.next_cas();
        let layout = self.layout;
        layout.rewrite_value(table.slot_mut(idx), &buf[..len], now, cas);
        Ok(new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_cache(config: CuckooConfig) -> CuckooCache {
        CuckooCache::new(config, Arc::new(CoarseClock::new())).unwrap()
    }

    fn small_cache() -> CuckooCache {
        new_cache(CuckooConfig::new().item_size(512).nitem(1024))
    }

    #[test]
    fn test_rejects_item_size_too_small() {
        let config = CuckooConfig::new().item_size(64);
        let err = CuckooCache::new(config, Arc::new(CoarseClock::new())).unwrap_err();
        assert_eq!(err, CacheError::ItemSizeTooSmall);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let config = CuckooConfig::new().nitem(0);
        let err = CuckooCache::new(config, Arc::new(CoarseClock::new())).unwrap_err();
        assert_eq!(err, CacheError::CapacityZero);
    }

    #[test]
    fn test_set_get_roundtrip() {
        let cache = small_cache();
        cache.set(b"foo", b"bar", 42, 0).unwrap();

        let guard = cache.get(b"foo").unwrap();
        assert_eq!(guard.value(), b"bar");
        assert_eq!(guard.flags(), 42);
        assert!(guard.cas() > 0);
    }

    #[test]
    fn test_get_miss() {
        let cache = small_cache();
        assert!(cache.get(b"missing").is_none());
    }

    #[test]
    fn test_set_overwrites_in_place() {
        let cache = small_cache();
        cache.set(b"k", b"v1", 0, 0).unwrap();
        cache.set(b"k", b"v2", 0, 0).unwrap();

        assert_eq!(cache.get(b"k").unwrap().value(), b"v2");
        assert_eq!(cache.item_count(), 1);
    }

    #[test]
    fn test_add_only_when_absent() {
        let cache = small_cache();
        assert_eq!(cache.add(b"k", b"v", 0, 0).unwrap(), StoreOutcome::Stored);
        assert_eq!(
            cache.add(b"k", b"other", 0, 0).unwrap(),
            StoreOutcome::NotStored
        );
        assert_eq!(cache.get(b"k").unwrap().value(), b"v");
    }

    #[test]
    fn test_add_succeeds_over_expired_item() {
        let cache = small_cache();
        let past = cache.clock.now() - 1;
        cache.set(b"k", b"old", 0, past).unwrap();
        assert_eq!(cache.add(b"k", b"new", 0, 0).unwrap(), StoreOutcome::Stored);
        assert_eq!(cache.get(b"k").unwrap().value(), b"new");
    }

    #[test]
    fn test_replace_only_when_present() {
        let cache = small_cache();
        assert_eq!(
            cache.replace(b"k", b"v", 0, 0).unwrap(),
            StoreOutcome::NotStored
        );
        cache.set(b"k", b"v", 0, 0).unwrap();
        assert_eq!(
            cache.replace(b"k", b"v2", 0, 0).unwrap(),
            StoreOutcome::Stored
        );
        assert_eq!(cache.get(b"k").unwrap().value(), b"v2");
    }

    #[test]
    fn test_cas_flow() {
        let cache = small_cache();
        cache.set(b"k", b"v1", 0, 0).unwrap();
        let token = cache.get(b"k").unwrap().cas();

        assert_eq!(
            cache.cas(b"k", b"v2", 0, 0, token).unwrap(),
            StoreOutcome::Stored
        );
        assert_eq!(cache.get(b"k").unwrap().value(), b"v2");

        // Stale token now.
        assert_eq!(
            cache.cas(b"k", b"v3", 0, 0, token).unwrap(),
            StoreOutcome::Exists
        );

        assert_eq!(
            cache.cas(b"missing", b"v", 0, 0, token).unwrap(),
            StoreOutcome::NotFound
        );
    }

    #[test]
    fn test_cas_tokens_monotonic() {
        let cache = small_cache();
        let mut last = 0;
        for i in 0..10u32 {
            let key = format!("k{i}");
            cache.set(key.as_bytes(), b"v", 0, 0).unwrap();
            let cas = cache.get(key.as_bytes()).unwrap().cas();
            assert!(cas > last);
            last = cas;
        }
    }

    #[test]
    fn test_delete() {
        let cache = small_cache();
        cache.set(b"k", b"v", 0, 0).unwrap();

        assert!(cache.delete(b"k"));
        assert!(cache.get(b"k").is_none());
        assert!(!cache.delete(b"k"));
        assert_eq!(cache.item_count(), 0);
    }

    #[test]
    fn test_incr_decr() {
        let cache = small_cache();
        cache.set(b"n", b"41", 0, 0).unwrap();

        assert_eq!(cache.incr(b"n", 1).unwrap(), 42);
        assert_eq!(cache.get(b"n").unwrap().value(), b"42");

        assert_eq!(cache.decr(b"n", 100).unwrap(), 0);
        assert_eq!(cache.get(b"n").unwrap().value(), b"0");
    }

    #[test]
    fn test_incr_wraps_decr_saturates() {
        let cache = small_cache();
        cache.set(b"n", b"18446744073709551615", 0, 0).unwrap();
        assert_eq!(cache.incr(b"n", 1).unwrap(), 0);

        cache.set(b"m", b"3", 0, 0).unwrap();
        assert_eq!(cache.decr(b"m", 10).unwrap(), 0);
    }

    #[test]
    fn test_incr_non_numeric() {
        let cache = small_cache();
        cache.set(b"k", b"hello", 0, 0).unwrap();
        assert_eq!(cache.incr(b"k", 1).unwrap_err(), CacheError::NotNumeric);
    }

    #[test]
    fn test_incr_missing_key() {
        let cache = small_cache();
        assert_eq!(cache.incr(b"nope", 1).unwrap_err(), CacheError::KeyNotFound);
    }

    #[test]
    fn test_incr_bumps_cas() {
        let cache = small_cache();
        cache.set(b"n", b"1", 0, 0).unwrap();
        let before = cache.get(b"n").unwrap().cas();
        cache.incr(b"n", 1).unwrap();
        assert!(cache.get(b"n").unwrap().cas() > before);
    }

    #[test]
    fn test_expired_item_is_a_miss() {
        let cache = small_cache();
        let past = cache.clock.now() - 1;
        cache.set(b"k", b"v", 0, past).unwrap();
        assert!(cache.get(b"k").is_none());
    }

    #[test]
    fn test_future_expiry_is_a_hit() {
        let cache = small_cache();
        let future = cache.clock.now() + 3600;
        cache.set(b"k", b"v", 0, future).unwrap();
        assert!(cache.get(b"k").is_some());
    }

    #[test]
    fn test_touch() {
        let cache = small_cache();
        cache.set(b"k", b"v", 0, 0).unwrap();

        let past = cache.clock.now() - 1;
        assert!(cache.touch(b"k", past));
        assert!(cache.get(b"k").is_none());

        assert!(!cache.touch(b"missing", 0));
    }

    #[test]
    fn test_flush_immediate() {
        let cache = small_cache();
        cache.set(b"a", b"1", 0, 0).unwrap();
        cache.set(b"b", b"2", 0, 0).unwrap();

        cache.flush(0);
        assert!(cache.get(b"a").is_none());
        assert!(cache.get(b"b").is_none());

        // Stores after the flush are visible.
        cache.set(b"c", b"3", 0, 0).unwrap();
        assert!(cache.get(b"c").is_some());
    }

    #[test]
    fn test_flush_delayed_not_yet_effective() {
        let cache = small_cache();
        cache.set(b"a", b"1", 0, 0).unwrap();
        cache.flush(100);
        assert!(cache.get(b"a").is_some());
    }

    #[test]
    fn test_flushed_slot_is_reusable() {
        let cache = small_cache();
        cache.set(b"a", b"old", 0, 0).unwrap();
        cache.flush(0);
        cache.set(b"a", b"new", 0, 0).unwrap();
        assert_eq!(cache.get(b"a").unwrap().value(), b"new");
    }

    #[test]
    fn test_key_length_bounds() {
        let cache = small_cache();

        let key = vec![b'k'; 250];
        cache.set(&key, b"v", 0, 0).unwrap();
        assert!(cache.get(&key).is_some());

        let long = vec![b'k'; 251];
        assert_eq!(
            cache.set(&long, b"v", 0, 0).unwrap_err(),
            CacheError::KeyTooLong
        );

        assert_eq!(cache.set(b"", b"v", 0, 0).unwrap_err(), CacheError::InvalidKey);
    }

    #[test]
    fn test_value_too_large() {
        let cache = small_cache();
        let max = cache.max_value_len();

        let value = vec![b'v'; max];
        cache.set(b"k", &value, 0, 0).unwrap();
        assert_eq!(cache.get(b"k").unwrap().value().len(), max);

        let oversize = vec![b'v'; max + 1];
        assert_eq!(
            cache.set(b"k", &oversize, 0, 0).unwrap_err(),
            CacheError::ItemTooLarge
        );
    }

    #[test]
    fn test_empty_value_is_allowed() {
        let cache = small_cache();
        cache.set(b"k", b"", 0, 0).unwrap();
        assert_eq!(cache.get(b"k").unwrap().value(), b"");
    }

    #[test]
    fn test_overfill_evicts_but_never_panics() {
        let cache = new_cache(CuckooConfig::new().item_size(512).nitem(16));

        for i in 0..200u32 {
            let key = format!("key-{i}");
            cache.set(key.as_bytes(), b"v", 0, 0).unwrap();
        }

        assert!(cache.item_count() <= 16);
        assert!(cache.evictions() > 0);

        // Any surviving key still returns the value that was stored for it.
        for i in 0..200u32 {
            let key = format!("key-{i}");
            if let Some(guard) = cache.get(key.as_bytes()) {
                assert_eq!(guard.value(), b"v");
            }
        }
    }

    #[test]
    fn test_overfill_with_expire_first_policy() {
        let cache = new_cache(
            CuckooConfig::new()
                .item_size(512)
                .nitem(16)
                .policy(DisplacementPolicy::ExpireFirst),
        );
        let far = cache.clock.now() + 10_000;

        for i in 0..200u32 {
            let key = format!("key-{i}");
            let expire = if i % 2 == 0 { far } else { 0 };
            cache.set(key.as_bytes(), b"v", 0, expire).unwrap();
        }

        assert!(cache.item_count() <= 16);
    }

    #[test]
    fn test_each_key_observable_at_most_once() {
        // Fill a small table hard, then confirm a freshly stored key reads
        // back exactly the stored value (never a stale copy from a slot the
        // displacement chain passed through).
        let cache = new_cache(CuckooConfig::new().item_size(512).nitem(32));

        for round in 0..20u32 {
            for i in 0..40u32 {
                let key = format!("key-{i}");
                let value = format!("value-{round}");
                cache.set(key.as_bytes(), value.as_bytes(), 0, 0).unwrap();
                let guard = cache.get(key.as_bytes()).unwrap();
                assert_eq!(guard.value(), value.as_bytes());
            }
        }
    }

    #[test]
    fn test_cas_disabled_stamps_zero() {
        let cache = new_cache(CuckooConfig::new().item_size(512).nitem(64).item_cas(false));
        cache.set(b"k", b"v", 0, 0).unwrap();
        assert_eq!(cache.get(b"k").unwrap().cas(), 0);
    }
}
