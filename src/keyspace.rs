//! The typed keyspace: a chained hash table mapping key bytes to `Entry`
//! (C1+C2). This is deliberately hand-rolled rather than built on
//! `std::collections::HashMap` -- the chaining, bucket count, and lazy
//! expiration sweep are exactly the design this store is meant to exercise,
//! mirrored from the bucket-array-of-chains layout in the original C
//! implementation (`database.c`).

use crate::error::KeyspaceError;
use crate::value::{Entry, Value};
use std::collections::VecDeque;
use std::time::Instant;

/// Bucket count for the keyspace table. Must stay a reasonably-sized power
/// of two; any value >= 128 satisfies the spec.
const BUCKET_COUNT: usize = 1024;

/// FNV-1a: a fast, well-dispersed, non-cryptographic hash over raw bytes.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn bucket_index(key: &[u8]) -> usize {
    (fnv1a(key) as usize) % BUCKET_COUNT
}

/// A chained hash table of key bytes -> `Entry`.
pub struct Keyspace {
    buckets: Vec<Vec<(Vec<u8>, Entry)>>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
        }
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        let bucket = &self.buckets[bucket_index(key)];
        bucket.iter().position(|(k, _)| k == key)
    }

    /// Lazily-expiring lookup: returns a live entry, deleting it first if
    /// it has expired. This is the one path every read/write op uses to
    /// decide liveness (§3 "entry exists" consistency requirement).
    fn live_entry(&mut self, key: &[u8], now: Instant) -> Option<&Entry> {
        let idx = bucket_index(key);
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(k, _)| k == key)?;
        if bucket[pos].1.is_live(now) {
            Some(&self.buckets[idx][pos].1)
        } else {
            bucket.remove(pos);
            None
        }
    }

    fn live_entry_mut(&mut self, key: &[u8], now: Instant) -> Option<&mut Entry> {
        let idx = bucket_index(key);
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(k, _)| k == key)?;
        if bucket[pos].1.is_live(now) {
            Some(&mut bucket[pos].1)
        } else {
            bucket.remove(pos);
            None
        }
    }

    fn remove_raw(&mut self, key: &[u8]) -> Option<Entry> {
        let idx = bucket_index(key);
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(k, _)| k == key)?;
        Some(bucket.remove(pos).1)
    }

    fn insert_raw(&mut self, key: Vec<u8>, entry: Entry) {
        let idx = bucket_index(&key);
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket.iter().position(|(k, _)| *k == key) {
            bucket[pos].1 = entry;
        } else {
            bucket.push((key, entry));
        }
    }

    // ---- string kind ----------------------------------------------------

    /// REPLACES any existing entry with a new String entry, clearing TTL.
    pub fn set(&mut self, key: &[u8], bytes: Vec<u8>) {
        self.insert_raw(key.to_vec(), Entry::persistent(Value::String(bytes)));
    }

    pub fn get(&mut self, key: &[u8], now: Instant) -> Option<Vec<u8>> {
        match self.live_entry(key, now)? {
            Entry {
                value: Value::String(s),
                ..
            } => Some(s.clone()),
            _ => None,
        }
    }

    pub fn exists(&mut self, key: &[u8], now: Instant) -> bool {
        self.live_entry(key, now).is_some()
    }

    pub fn delete(&mut self, key: &[u8], now: Instant) -> bool {
        if self.live_entry(key, now).is_none() {
            return false;
        }
        self.remove_raw(key).is_some()
    }

    pub fn incr(&mut self, key: &[u8], now: Instant) -> Result<i64, KeyspaceError> {
        self.add_delta(key, 1, now)
    }

    pub fn decr(&mut self, key: &[u8], now: Instant) -> Result<i64, KeyspaceError> {
        self.add_delta(key, -1, now)
    }

    fn add_delta(&mut self, key: &[u8], delta: i64, now: Instant) -> Result<i64, KeyspaceError> {
        let current: i64 = match self.live_entry(key, now) {
            None => 0,
            Some(Entry {
                value: Value::String(s),
                ..
            }) => parse_signed_decimal(s)?,
            Some(_) => return Err(KeyspaceError::WrongType),
        };
        let updated = current
            .checked_add(delta)
            .ok_or(KeyspaceError::NotAnInteger)?;
        self.insert_raw(
            key.to_vec(),
            Entry::persistent(Value::String(updated.to_string().into_bytes())),
        );
        Ok(updated)
    }

    // ---- TTL --------------------------------------------------------

    pub fn expire(&mut self, key: &[u8], seconds: i64, now: Instant) -> Result<bool, KeyspaceError> {
        if seconds < 0 {
            return Err(KeyspaceError::InvalidExpire);
        }
        match self.live_entry_mut(key, now) {
            Some(entry) => {
                entry.set_ttl(seconds, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn ttl(&mut self, key: &[u8], now: Instant) -> i64 {
        match self.live_entry(key, now) {
            None => -2,
            Some(entry) => match entry.ttl_seconds(now) {
                None => -1,
                Some(secs) => secs,
            },
        }
    }

    pub fn persist(&mut self, key: &[u8], now: Instant) -> bool {
        match self.live_entry_mut(key, now) {
            Some(entry) if entry.expires_at.is_some() => {
                entry.clear_ttl();
                true
            }
            _ => false,
        }
    }

    // ---- list kind ----------------------------------------------------

    fn list_mut(&mut self, key: &[u8], now: Instant) -> Result<&mut VecDeque<Vec<u8>>, KeyspaceError> {
        if self.live_entry(key, now).is_none() {
            self.insert_raw(key.to_vec(), Entry::persistent(Value::List(VecDeque::new())));
        }
        match &mut self.live_entry_mut(key, now).unwrap().value {
            Value::List(list) => Ok(list),
            _ => Err(KeyspaceError::WrongType),
        }
    }

    pub fn lpush(&mut self, key: &[u8], bytes: Vec<u8>, now: Instant) -> Result<i64, KeyspaceError> {
        let list = self.list_mut(key, now)?;
        list.push_front(bytes);
        Ok(list.len() as i64)
    }

    pub fn rpush(&mut self, key: &[u8], bytes: Vec<u8>, now: Instant) -> Result<i64, KeyspaceError> {
        let list = self.list_mut(key, now)?;
        list.push_back(bytes);
        Ok(list.len() as i64)
    }

    fn pop(&mut self, key: &[u8], front: bool, now: Instant) -> Result<Option<Vec<u8>>, KeyspaceError> {
        let Some(entry) = self.live_entry_mut(key, now) else {
            return Ok(None);
        };
        let list = match &mut entry.value {
            Value::List(list) => list,
            _ => return Err(KeyspaceError::WrongType),
        };
        let popped = if front { list.pop_front() } else { list.pop_back() };
        if list.is_empty() {
            self.remove_raw(key);
        }
        Ok(popped)
    }

    pub fn lpop(&mut self, key: &[u8], now: Instant) -> Result<Option<Vec<u8>>, KeyspaceError> {
        self.pop(key, true, now)
    }

    pub fn rpop(&mut self, key: &[u8], now: Instant) -> Result<Option<Vec<u8>>, KeyspaceError> {
        self.pop(key, false, now)
    }

    pub fn llen(&mut self, key: &[u8], now: Instant) -> Result<i64, KeyspaceError> {
        match self.live_entry(key, now) {
            None => Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len() as i64),
            Some(_) => Err(KeyspaceError::WrongType),
        }
    }

    pub fn lrange(
        &mut self,
        key: &[u8],
        start: i64,
        stop: i64,
        now: Instant,
    ) -> Result<Vec<Vec<u8>>, KeyspaceError> {
        let list = match self.live_entry(key, now) {
            None => return Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list,
            Some(_) => return Err(KeyspaceError::WrongType),
        };
        let len = list.len() as i64;
        if len == 0 {
            return Ok(Vec::new());
        }
        let normalize = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i
            }
        };
        let start = normalize(start).min(len - 1).max(0);
        let stop = normalize(stop).min(len - 1);
        if start > stop || stop < 0 {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    // ---- hash kind ----------------------------------------------------

    fn hash_mut(
        &mut self,
        key: &[u8],
        now: Instant,
    ) -> Result<&mut Vec<(Vec<u8>, Vec<u8>)>, KeyspaceError> {
        if self.live_entry(key, now).is_none() {
            self.insert_raw(key.to_vec(), Entry::persistent(Value::Hash(Vec::new())));
        }
        match &mut self.live_entry_mut(key, now).unwrap().value {
            Value::Hash(fields) => Ok(fields),
            _ => Err(KeyspaceError::WrongType),
        }
    }

    pub fn hset(
        &mut self,
        key: &[u8],
        field: &[u8],
        bytes: Vec<u8>,
        now: Instant,
    ) -> Result<bool, KeyspaceError> {
        let fields = self.hash_mut(key, now)?;
        match fields.iter_mut().find(|(f, _)| f == field) {
            Some((_, v)) => {
                *v = bytes;
                Ok(false)
            }
            None => {
                fields.push((field.to_vec(), bytes));
                Ok(true)
            }
        }
    }

    pub fn hget(&mut self, key: &[u8], field: &[u8], now: Instant) -> Result<Option<Vec<u8>>, KeyspaceError> {
        match self.live_entry(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.iter().find(|(f, _)| f == field).map(|(_, v)| v.clone())),
            Some(_) => Err(KeyspaceError::WrongType),
        }
    }

    pub fn hdel(&mut self, key: &[u8], field: &[u8], now: Instant) -> Result<bool, KeyspaceError> {
        let Some(entry) = self.live_entry_mut(key, now) else {
            return Ok(false);
        };
        let fields = match &mut entry.value {
            Value::Hash(fields) => fields,
            _ => return Err(KeyspaceError::WrongType),
        };
        let Some(pos) = fields.iter().position(|(f, _)| f == field) else {
            return Ok(false);
        };
        fields.remove(pos);
        if fields.is_empty() {
            self.remove_raw(key);
        }
        Ok(true)
    }

    pub fn hexists(&mut self, key: &[u8], field: &[u8], now: Instant) -> Result<bool, KeyspaceError> {
        Ok(self.hget(key, field, now)?.is_some())
    }

    pub fn hgetall(&mut self, key: &[u8], now: Instant) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KeyspaceError> {
        match self.live_entry(key, now) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.clone()),
            Some(_) => Err(KeyspaceError::WrongType),
        }
    }

    // ---- whole-keyspace ops --------------------------------------------

    /// Count of live entries. Walks every bucket, lazily reclaiming expired
    /// entries along the way -- the closest thing to a sweep this store runs.
    pub fn dbsize(&mut self, now: Instant) -> usize {
        for bucket in &mut self.buckets {
            bucket.retain(|(_, entry)| entry.is_live(now));
        }
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn flushall(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    /// Insert an already-constructed entry verbatim, bypassing liveness
    /// checks. Used by the persistence codec to repopulate a staging
    /// keyspace while loading a snapshot.
    pub fn restore_entry(&mut self, key: Vec<u8>, entry: Entry) {
        self.insert_raw(key, entry);
    }

    /// Iterate every live entry; used by the persistence codec to build a
    /// snapshot. Order is bucket order, not insertion order.
    pub fn iter_live(&self, now: Instant) -> impl Iterator<Item = (&[u8], &Entry)> {
        self.buckets
            .iter()
            .flatten()
            .filter(move |(_, e)| e.is_live(now))
            .map(|(k, e)| (k.as_slice(), e))
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Strict signed-decimal parse: optional leading `+`/`-`, digits only, no
/// whitespace. Used by INCR/DECR (§4.1).
fn parse_signed_decimal(bytes: &[u8]) -> Result<i64, KeyspaceError> {
    let s = std::str::from_utf8(bytes).map_err(|_| KeyspaceError::NotAnInteger)?;
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KeyspaceError::NotAnInteger);
    }
    s.parse::<i64>().map_err(|_| KeyspaceError::NotAnInteger)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Instant {
        Instant::now()
    }

    #[test]
    fn set_get_roundtrip() {
        let mut ks = Keyspace::new();
        ks.set(b"k", b"v".to_vec());
        assert_eq!(ks.get(b"k", now()), Some(b"v".to_vec()));
    }

    #[test]
    fn del_then_exists_is_false() {
        let mut ks = Keyspace::new();
        ks.set(b"k", b"v".to_vec());
        assert!(ks.delete(b"k", now()));
        assert!(!ks.exists(b"k", now()));
    }

    #[test]
    fn set_on_list_key_replaces_kind_and_clears_ttl() {
        let mut ks = Keyspace::new();
        ks.rpush(b"k", b"a".to_vec(), now()).unwrap();
        ks.expire(b"k", 100, now()).unwrap();
        ks.set(b"k", b"str".to_vec());
        assert_eq!(ks.get(b"k", now()), Some(b"str".to_vec()));
        assert_eq!(ks.ttl(b"k", now()), -1);
    }

    #[test]
    fn list_write_against_string_is_wrongtype() {
        let mut ks = Keyspace::new();
        ks.set(b"k", b"v".to_vec());
        assert_eq!(ks.rpush(b"k", b"a".to_vec(), now()), Err(KeyspaceError::WrongType));
        // untouched
        assert_eq!(ks.get(b"k", now()), Some(b"v".to_vec()));
    }

    #[test]
    fn incr_creates_from_absent() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.incr(b"c", now()), Ok(1));
        assert_eq!(ks.incr(b"c", now()), Ok(2));
        ks.set(b"c", b"abc".to_vec());
        assert_eq!(ks.incr(b"c", now()), Err(KeyspaceError::NotAnInteger));
    }

    #[test]
    fn incr_overflow_is_error() {
        let mut ks = Keyspace::new();
        ks.set(b"c", i64::MAX.to_string().into_bytes());
        assert_eq!(ks.incr(b"c", now()), Err(KeyspaceError::NotAnInteger));
    }

    #[test]
    fn expire_rejects_negative_seconds() {
        let mut ks = Keyspace::new();
        ks.set(b"k", b"v".to_vec());
        assert_eq!(ks.expire(b"k", -1, now()), Err(KeyspaceError::InvalidExpire));
    }

    #[test]
    fn ttl_states() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.ttl(b"missing", now()), -2);
        ks.set(b"k", b"v".to_vec());
        assert_eq!(ks.ttl(b"k", now()), -1);
        ks.expire(b"k", 100, now()).unwrap();
        assert!(ks.ttl(b"k", now()) > 0);
    }

    #[test]
    fn expired_key_reads_as_absent_on_every_path() {
        let mut ks = Keyspace::new();
        ks.set(b"k", b"v".to_vec());
        ks.expire(b"k", 0, now()).unwrap();
        let later = now() + std::time::Duration::from_secs(1);
        assert_eq!(ks.get(b"k", later), None);
        assert!(!ks.exists(b"k", later));
        assert_eq!(ks.ttl(b"k", later), -2);
    }

    #[test]
    fn list_ops_and_empty_deletion() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.rpush(b"q", b"a".to_vec(), now()), Ok(1));
        assert_eq!(ks.rpush(b"q", b"b".to_vec(), now()), Ok(2));
        assert_eq!(ks.lpush(b"q", b"z".to_vec(), now()), Ok(3));
        assert_eq!(
            ks.lrange(b"q", 0, -1, now()),
            Ok(vec![b"z".to_vec(), b"a".to_vec(), b"b".to_vec()])
        );
        assert_eq!(ks.lpop(b"q", now()), Ok(Some(b"z".to_vec())));
        assert_eq!(ks.lpop(b"q", now()), Ok(Some(b"a".to_vec())));
        assert_eq!(ks.lpop(b"q", now()), Ok(Some(b"b".to_vec())));
        assert!(!ks.exists(b"q", now()));
    }

    #[test]
    fn lrange_last_element() {
        let mut ks = Keyspace::new();
        ks.rpush(b"q", b"a".to_vec(), now()).unwrap();
        assert_eq!(ks.lrange(b"q", -1, -1, now()), Ok(vec![b"a".to_vec()]));
        ks.lpop(b"q", now()).unwrap();
        assert_eq!(ks.lrange(b"q", -1, -1, now()), Ok(Vec::new()));
    }

    #[test]
    fn hash_ops_and_empty_deletion() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.hset(b"h", b"f1", b"v1".to_vec(), now()), Ok(true));
        assert_eq!(ks.hset(b"h", b"f1", b"v2".to_vec(), now()), Ok(false));
        assert_eq!(ks.hget(b"h", b"f1", now()), Ok(Some(b"v2".to_vec())));
        assert_eq!(
            ks.hgetall(b"h", now()),
            Ok(vec![(b"f1".to_vec(), b"v2".to_vec())])
        );
        assert_eq!(ks.hdel(b"h", b"f1", now()), Ok(true));
        assert!(!ks.exists(b"h", now()));
    }

    #[test]
    fn exists_matches_every_read_path_kind() {
        let mut ks = Keyspace::new();
        ks.rpush(b"q", b"a".to_vec(), now()).unwrap();
        assert!(ks.exists(b"q", now()));
        assert_eq!(ks.llen(b"q", now()), Ok(1));
    }

    #[test]
    fn dbsize_reclaims_expired() {
        let mut ks = Keyspace::new();
        ks.set(b"k", b"v".to_vec());
        ks.expire(b"k", 0, now()).unwrap();
        let later = now() + std::time::Duration::from_secs(1);
        assert_eq!(ks.dbsize(later), 0);
    }
}
