//! Record store: local (authoritative) and cache (remote) resource
//! record tables, TTL expiry, and cache-flush handling (spec.md
//! section 4.2).
//!
//! Grounded on `mdnsd_new(class, max_records)` and `records_clear()` in
//! `original_source/src/mdnsd.c`: one engine owns exactly these two
//! tables, and the cache is capped at `max_records` as flood
//! protection, evicting the nearest-expiry entry when full.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::engine::Token;
use crate::rng::Jitter;
use crate::wire::{Name, Record, Type};

/// Upper bound (as a fraction of TTL) of the random jitter applied to
/// each refresh threshold (spec.md section 4.2: "up to 2% random
/// jitter"), so many cached records with the same TTL don't all
/// re-query in lockstep.
const REFRESH_JITTER_FRACTION: f64 = 0.02;

/// Refresh points for a cached record, expressed as a bitmask of which
/// of the 80/85/90/95%-of-TTL thresholds have already fired (spec.md
/// section 4.2).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshFlags(u8);

const REFRESH_POINTS: [f64; 4] = [0.80, 0.85, 0.90, 0.95];

impl RefreshFlags {
    fn is_set(&self, i: usize) -> bool {
        self.0 & (1 << i) != 0
    }

    fn set(&mut self, i: usize) {
        self.0 |= 1 << i;
    }

    fn clear(&mut self) {
        self.0 = 0;
    }
}

/// A resource record published by this host.
#[derive(Clone, Debug)]
pub struct LocalRecord {
    pub record: Record,
    pub unique: bool,
    pub token: Token,
}

/// A resource record learned from the network.
#[derive(Clone, Debug)]
pub struct CachedRecord {
    pub record: Record,
    pub expiry: Instant,
    pub original_ttl: Duration,
    refresh: RefreshFlags,
    refresh_jitter: Duration,
}

impl CachedRecord {
    /// Remaining time-to-live relative to `now`, zero if expired.
    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.expiry.saturating_duration_since(now)
    }

    /// Per the Known-Answer Suppression rule (spec.md section 4.3): an
    /// answer counts as "known" once its remaining TTL is still more
    /// than half its original TTL.
    pub fn is_known_answer(&self, now: Instant) -> bool {
        self.remaining_ttl(now) * 2 > self.original_ttl
    }
}

type Key = (Vec<u8>, Type);

fn key_for(name: &Name, r#type: Type) -> Key {
    (name.as_key().to_vec(), r#type)
}

/// Outcome of inserting a cached record, used by the query tracker to
/// decide whether to fire answer callbacks.
pub struct CacheInsertResult {
    /// True if this is new information the query tracker hasn't
    /// reported to any caller yet (a fresh record, or a TTL refresh of
    /// rdata it already knew about does not count as new).
    pub is_new: bool,
    pub evicted: Option<Record>,
}

#[derive(Default)]
pub struct RecordStore {
    local: HashMap<Key, Vec<LocalRecord>>,
    cache: HashMap<Key, Vec<CachedRecord>>,
    max_records: usize,
}

impl RecordStore {
    pub fn new(max_records: usize) -> RecordStore {
        RecordStore {
            local: HashMap::new(),
            cache: HashMap::new(),
            max_records,
        }
    }

    // ---- local table --------------------------------------------------

    /// Inserts a local record. Returns `false` (and does nothing) if an
    /// identical (name, type, rdata) record is already published
    /// (spec.md section 3, invariant 1: idempotent duplicates).
    pub fn insert_local(&mut self, entry: LocalRecord) -> bool {
        let key = key_for(&entry.record.name, entry.record.r#type());
        let bucket = self.local.entry(key).or_default();

        if bucket
            .iter()
            .any(|r| r.record.resource == entry.record.resource)
        {
            return false;
        }

        bucket.push(entry);
        true
    }

    pub fn remove_local(&mut self, token: Token) -> Option<LocalRecord> {
        for bucket in self.local.values_mut() {
            if let Some(idx) = bucket.iter().position(|r| r.token == token) {
                return Some(bucket.remove(idx));
            }
        }
        None
    }

    pub fn find_local(&self, token: Token) -> Option<&LocalRecord> {
        self.local.values().flatten().find(|r| r.token == token)
    }

    pub fn find_local_mut(&mut self, token: Token) -> Option<&mut LocalRecord> {
        self.local.values_mut().flatten().find(|r| r.token == token)
    }

    pub fn local_by_name_type(&self, name: &Name, r#type: Type) -> impl Iterator<Item = &LocalRecord> {
        let key = key_for(name, r#type);
        self.local.get(&key).into_iter().flatten()
    }

    /// All local records matching a question, honoring `Type::ANY`.
    pub fn local_matching(&self, name: &Name, qtype: Type) -> Vec<&LocalRecord> {
        if qtype == Type::ANY {
            self.local
                .iter()
                .filter(|((n, _), _)| n == name.as_key())
                .flat_map(|(_, v)| v.iter())
                .collect()
        } else {
            self.local_by_name_type(name, qtype).collect()
        }
    }

    pub fn iter_local(&self) -> impl Iterator<Item = &LocalRecord> {
        self.local.values().flatten()
    }

    // ---- cache table ----------------------------------------------------

    /// Inserts a record received from the network. Implements the
    /// cache-flush bit (evict prior entries not matching rdata), TTL=0
    /// goodbye smoothing (expire in 1s, not immediately, RFC 6762
    /// section 10.1), and the global eviction cap.
    pub fn insert_cached(&mut self, record: Record, now: Instant, jitter: &dyn Jitter) -> CacheInsertResult {
        let key = key_for(&record.name, record.r#type());
        let goodbye = record.ttl.is_zero();
        let ttl = if goodbye { Duration::from_secs(1) } else { record.ttl };
        let expiry = now + ttl;
        let refresh_jitter = Self::random_refresh_jitter(ttl, jitter);

        let bucket = self.cache.entry(key).or_default();

        if record.cache_flush {
            bucket.retain(|r| r.record.resource == record.resource);
        }

        if let Some(existing) = bucket
            .iter_mut()
            .find(|r| r.record.resource == record.resource)
        {
            existing.expiry = expiry;
            existing.original_ttl = ttl;
            if record.cache_flush {
                existing.refresh.clear();
                existing.refresh_jitter = refresh_jitter;
            }
            return CacheInsertResult {
                is_new: false,
                evicted: None,
            };
        }

        bucket.push(CachedRecord {
            record,
            expiry,
            original_ttl: ttl,
            refresh: RefreshFlags::default(),
            refresh_jitter,
        });

        let evicted = self.enforce_cap();

        CacheInsertResult {
            is_new: true,
            evicted,
        }
    }

    /// A one-time random offset in `[0, 2% of ttl]`, added to every
    /// refresh threshold for a cached record so records that share a
    /// TTL don't all re-query in the same instant.
    fn random_refresh_jitter(ttl: Duration, jitter: &dyn Jitter) -> Duration {
        let max_ms = ((ttl.as_millis() as f64) * REFRESH_JITTER_FRACTION) as u64;
        jitter.jitter_ms(0, max_ms.max(1))
    }

    fn total_cached(&self) -> usize {
        self.cache.values().map(|v| v.len()).sum()
    }

    /// Evicts the cached record with the nearest expiry once the store
    /// exceeds `max_records` (spec.md section 4.2).
    fn enforce_cap(&mut self) -> Option<Record> {
        if self.max_records == 0 || self.total_cached() <= self.max_records {
            return None;
        }

        let mut nearest: Option<(Key, usize, Instant)> = None;
        for (key, bucket) in self.cache.iter() {
            for (idx, r) in bucket.iter().enumerate() {
                if nearest.as_ref().map(|(_, _, exp)| r.expiry < *exp).unwrap_or(true) {
                    nearest = Some((key.clone(), idx, r.expiry));
                }
            }
        }

        let (key, idx, _) = nearest?;
        let bucket = self.cache.get_mut(&key)?;
        let removed = bucket.remove(idx);
        if bucket.is_empty() {
            self.cache.remove(&key);
        }
        Some(removed.record)
    }

    pub fn cached_by_name_type(&self, name: &Name, r#type: Type) -> impl Iterator<Item = &CachedRecord> {
        let key = key_for(name, r#type);
        self.cache.get(&key).into_iter().flatten()
    }

    pub fn cached_matching(&self, name: &Name, qtype: Type) -> Vec<&CachedRecord> {
        if qtype == Type::ANY {
            self.cache
                .iter()
                .filter(|((n, _), _)| n == name.as_key())
                .flat_map(|(_, v)| v.iter())
                .collect()
        } else {
            self.cached_by_name_type(name, qtype).collect()
        }
    }

    /// Removes every cached record whose expiry has passed, returning
    /// them so the caller (the query tracker) can notify anyone
    /// watching that the record is gone.
    pub fn expire_cached(&mut self, now: Instant) -> Vec<Record> {
        let mut expired = Vec::new();
        self.cache.retain(|_, bucket| {
            let (gone, kept): (Vec<_>, Vec<_>) =
                bucket.drain(..).partition(|r| r.expiry <= now);
            expired.extend(gone.into_iter().map(|r| r.record));
            *bucket = kept;
            !bucket.is_empty()
        });
        expired
    }

    /// Computes the next point in time any cached record either
    /// expires or crosses a refresh threshold, firing refresh
    /// thresholds as a side effect and returning the names that need
    /// to be re-queried (spec.md section 4.2).
    pub fn poll_refresh(&mut self, now: Instant) -> Vec<(Name, Type)> {
        let mut due = Vec::new();

        for bucket in self.cache.values_mut() {
            for cached in bucket.iter_mut() {
                let elapsed = cached
                    .original_ttl
                    .saturating_sub(cached.expiry.saturating_duration_since(now));

                for (i, pct) in REFRESH_POINTS.iter().enumerate() {
                    if cached.refresh.is_set(i) {
                        continue;
                    }
                    let threshold = cached.original_ttl.mul_f64(*pct) + cached.refresh_jitter;
                    if elapsed >= threshold {
                        cached.refresh.set(i);
                        due.push((cached.record.name.clone(), cached.record.r#type()));
                    }
                }
            }
        }

        due
    }

    /// The earliest instant at which `expire_cached` would have
    /// something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.cache
            .values()
            .flatten()
            .map(|r| r.expiry)
            .min()
    }

    /// The earliest instant at which `poll_refresh` would have a new
    /// threshold to fire, so the step loop doesn't oversleep past a
    /// refresh point while waiting for a record's expiry (spec.md
    /// section 4.5, invariant 5).
    pub fn next_refresh_deadline(&self) -> Option<Instant> {
        let mut best: Option<Instant> = None;

        for cached in self.cache.values().flatten() {
            let created_at = cached.expiry - cached.original_ttl;
            for (i, pct) in REFRESH_POINTS.iter().enumerate() {
                if cached.refresh.is_set(i) {
                    continue;
                }
                let at = created_at + cached.original_ttl.mul_f64(*pct) + cached.refresh_jitter;
                best = Some(best.map_or(at, |b| b.min(at)));
                break;
            }
        }

        best
    }

    pub fn len_cached(&self) -> usize {
        self.total_cached()
    }
}
