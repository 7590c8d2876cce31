//! A bucketed, lock-striped hash table. Each bucket holds a handful of
//! slots behind its own reader-writer lock, so probes on different
//! buckets never contend and no global lock exists.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

pub const BUCKET_SIZE: usize = 4;

/// Stored values know how to merge a fresh observation into themselves
/// and how they rank for replacement. `mark`/`unmark` maintain the set
/// of workers currently exploring the entry; non-parallel values leave
/// them as no-ops.
pub trait Value: Clone {
    /// Monotone merge: a proved value is never overwritten by an
    /// unproved one.
    fn update(&mut self, fresh: Self);

    /// Replacement rank: `true` when `self` should be kept over `other`.
    /// Must be a strict ordering.
    fn outranks(&self, other: &Self) -> bool;

    fn mark(&mut self, _worker: usize) {}
    fn unmark(&mut self, _worker: usize) {}
}

type Slot<K, V> = Option<(K, V)>;

pub struct BucketTable<K, V> {
    buckets: Vec<RwLock<[Slot<K, V>; BUCKET_SIZE]>>,
    len: AtomicUsize,
    hasher: RandomState,
}

impl<K: Clone + Eq + Hash, V: Value> BucketTable<K, V> {
    /// Capacity is rounded down to a whole number of buckets; a capacity
    /// below one bucket yields a table on which every operation is a
    /// no-op.
    pub fn with_capacity(capacity: usize) -> Self {
        BucketTable {
            buckets: (0..capacity / BUCKET_SIZE)
                .map(|_| RwLock::new(std::array::from_fn(|_| None)))
                .collect(),
            len: AtomicUsize::new(0),
            hasher: RandomState::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bucket(&self, key: &K) -> Option<&RwLock<[Slot<K, V>; BUCKET_SIZE]>> {
        if self.buckets.is_empty() {
            return None;
        }
        let hash = self.hasher.hash_one(key);
        Some(&self.buckets[(hash % self.buckets.len() as u64) as usize])
    }

    pub fn clear(&self) {
        for bucket in &self.buckets {
            let mut slots = bucket.write();
            for slot in slots.iter_mut() {
                *slot = None;
            }
        }
        self.len.store(0, Ordering::Relaxed);
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let bucket = self.bucket(key)?;
        let slots = bucket.read();
        slots
            .iter()
            .flatten()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Inserts or merges. An existing entry with the same key is updated
    /// in place and its prior value returned; otherwise an empty slot is
    /// taken, or the lowest-ranked victim in the bucket is evicted.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let bucket = self.bucket(&key)?;
        let mut slots = bucket.write();

        let mut replace = 0;
        for i in 0..BUCKET_SIZE {
            match &slots[i] {
                None => {
                    replace = i;
                    break;
                }
                Some((k, _)) if *k == key => {
                    replace = i;
                    break;
                }
                Some((_, v)) => {
                    if i != 0 {
                        if let Some((_, current)) = &slots[replace] {
                            if current.outranks(v) {
                                replace = i;
                            }
                        }
                    }
                }
            }
        }

        if let Some((k, v)) = &mut slots[replace] {
            if *k == key {
                let previous = v.clone();
                v.update(value);
                return Some(previous);
            }
        }
        if slots[replace].is_none() {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        slots[replace] = Some((key, value));
        None
    }

    pub fn mark(&self, key: &K, worker: usize) {
        if let Some(bucket) = self.bucket(key) {
            let mut slots = bucket.write();
            if let Some((_, v)) = slots.iter_mut().flatten().find(|(k, _)| k == key) {
                v.mark(worker);
            }
        }
    }

    pub fn unmark(&self, key: &K, worker: usize) {
        if let Some(bucket) = self.bucket(key) {
            let mut slots = bucket.write();
            if let Some((_, v)) = slots.iter_mut().flatten().find(|(k, _)| k == key) {
                v.unmark(worker);
            }
        }
    }

    /// Visits every occupied slot. Buckets are locked one at a time, so
    /// entries inserted concurrently may or may not be seen.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for bucket in &self.buckets {
            let slots = bucket.read();
            for (k, v) in slots.iter().flatten() {
                f(k, v);
            }
        }
    }
}
