//! Consistent-hash ring mapping a job's routing key to one of a set of live
//! broker identities.
//!
//! Each value is inserted at `repeats` pseudo-random positions on a 64-bit
//! ring (a sorted map), seeded deterministically from a hash of the value
//! itself, so every process computes the same ring from the same broker
//! set without coordination. Lookups permute the key's hash through a
//! fixed bit-shuffle before probing the ring, which decorrelates adjacent
//! keys from landing on adjacent ring positions.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Default number of virtual nodes per value, matching the original's
/// broker-ring configuration.
pub const DEFAULT_REPEATS: usize = 100;

pub struct ConsistentHash<V> {
    repeats: usize,
    ring: BTreeMap<u64, V>,
}

impl<V: Clone + Eq + Hash> ConsistentHash<V> {
    pub fn new(repeats: usize) -> ConsistentHash<V> {
        ConsistentHash {
            repeats,
            ring: BTreeMap::new(),
        }
    }

    pub fn with_default_repeats() -> ConsistentHash<V> {
        Self::new(DEFAULT_REPEATS)
    }

    /// Inserts `value` at `repeats` positions on the ring.
    pub fn insert(&mut self, value: V) {
        let mut rng = ChaCha8Rng::seed_from_u64(hash_of(&value));
        for _ in 0..self.repeats {
            let position = rng.next_u64();
            self.ring.insert(position, value.clone());
        }
    }

    /// Removes all positions previously inserted for `value`.
    pub fn erase(&mut self, value: &V) {
        let mut rng = ChaCha8Rng::seed_from_u64(hash_of(value));
        for _ in 0..self.repeats {
            let position = rng.next_u64();
            self.ring.remove(&position);
        }
    }

    /// Maps `key` to the value owning the first ring position at or after
    /// the key's shuffled hash, wrapping around to the first entry. Returns
    /// `None` on an empty ring.
    pub fn lookup<K: Hash>(&self, key: &K) -> Option<&V> {
        if self.ring.is_empty() {
            return None;
        }
        let target = shuffle(hash_of(key));
        self.ring
            .range(target..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Wang's 64-bit integer hash, used to decorrelate bit patterns in the
/// input before probing the ring.
fn shuffle(key: u64) -> u64 {
    let mut key = (!key).wrapping_add(key << 21);
    key ^= (key >> 24) | (key << 8);
    key = key.wrapping_add(key << 3).wrapping_add(key << 8);
    key ^= (key >> 14) | (key << 18);
    key = key.wrapping_add(key << 2).wrapping_add(key << 4);
    key ^= (key >> 28) | (key << 4);
    key.wrapping_add(key << 31)
}
