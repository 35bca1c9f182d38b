//! The pluggable storage collaborator, grounded in `tile_storage.hpp`'s
//! abstract `get`/`expire` interface (concrete backends such as
//! `hss_storage`/`lts_storage`/`http_storage` are out of scope here — only
//! the seam and an in-memory test double are provided).

use std::collections::HashMap;
use std::sync::Mutex;

use rendermq_proto::Job;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub bytes: Vec<u8>,
    pub last_modified: i64,
    pub expired: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub trait Storage: Send + Sync {
    fn get(&self, job: &Job) -> Result<Option<Lookup>, StorageError>;
    fn expire(&self, job: &Job) -> Result<(), StorageError>;
}

type StorageKey = (String, u8, i32, i32, i32);

/// Test/demo storage backed by an in-process map, keyed by
/// `(style, format, x, y, z)`. Real deployments plug in an object-store or
/// HTTP-backed implementation of [`Storage`] instead.
#[derive(Default)]
pub struct InMemoryStorage {
    entries: Mutex<HashMap<StorageKey, Lookup>>,
}

impl InMemoryStorage {
    pub fn new() -> InMemoryStorage {
        InMemoryStorage::default()
    }

    pub fn put(&self, job: &Job, bytes: Vec<u8>, last_modified: i64) {
        let key = key_for(job);
        self.entries.lock().unwrap().insert(
            key,
            Lookup {
                bytes,
                last_modified,
                expired: false,
            },
        );
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, job: &Job) -> Result<Option<Lookup>, StorageError> {
        Ok(self.entries.lock().unwrap().get(&key_for(job)).cloned())
    }

    fn expire(&self, job: &Job) -> Result<(), StorageError> {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(&key_for(job)) {
            entry.expired = true;
        }
        Ok(())
    }
}

fn key_for(job: &Job) -> StorageKey {
    (job.style.clone(), job.format.bits(), job.x, job.y, job.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendermq_proto::{Format, Status};

    fn job() -> Job {
        Job::new(Status::Render, 1, 2, 10, 1, "osm", Format::PNG)
    }

    #[test]
    fn missing_entry_returns_none() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.get(&job()).unwrap(), None);
    }

    #[test]
    fn put_then_get_roundtrips() {
        let storage = InMemoryStorage::new();
        storage.put(&job(), vec![1, 2, 3], 500);
        let found = storage.get(&job()).unwrap().unwrap();
        assert_eq!(found.bytes, vec![1, 2, 3]);
        assert_eq!(found.last_modified, 500);
        assert!(!found.expired);
    }

    #[test]
    fn expire_marks_entry_without_removing_it() {
        let storage = InMemoryStorage::new();
        storage.put(&job(), vec![1], 1);
        storage.expire(&job()).unwrap();
        let found = storage.get(&job()).unwrap().unwrap();
        assert!(found.expired);
    }
}
