// Storage abstraction over an ordered key/value store

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use super::StoreError;

/// Key/value persistence. Keys are ordered bytewise in `scan_prefix`.
pub trait StorageBackend: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    /// Write every row or none of them
    fn put_batch(&self, rows: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn remove(&self, key: &[u8]) -> Result<(), StoreError>;
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
    fn count_prefix(&self, prefix: &[u8]) -> Result<usize, StoreError>;
    fn flush(&self) -> Result<(), StoreError>;
}

/// In-memory storage for tests and throwaway sessions
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn put_batch(&self, rows: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        let mut data = self.data.write();
        for (key, value) in rows {
            data.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize, StoreError> {
        Ok(self
            .data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .count())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Durable storage on disk
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(backend_err)?;
        Ok(Self { db })
    }
}

fn backend_err(e: sled::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl StorageBackend for SledStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, value).map_err(backend_err)?;
        // Rows must survive a crash right after a state change
        self.db.flush().map_err(backend_err)?;
        Ok(())
    }

    fn put_batch(&self, rows: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for (key, value) in rows {
            batch.insert(key.as_slice(), value.as_slice());
        }
        self.db.apply_batch(batch).map_err(backend_err)?;
        self.db.flush().map_err(backend_err)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.db.get(key).map_err(backend_err)?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db.remove(key).map_err(backend_err)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut results = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item.map_err(backend_err)?;
            results.push((k.to_vec(), v.to_vec()));
        }
        Ok(results)
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize, StoreError> {
        Ok(self.db.scan_prefix(prefix).count())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(backend_err)?;
        Ok(())
    }
}

/// Memory storage that rejects writes under a key prefix once armed
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct FailingStorage {
    inner: MemoryStorage,
    fail_prefix: Arc<RwLock<Option<Vec<u8>>>>,
}

#[cfg(test)]
impl FailingStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_writes_under(&self, prefix: &str) {
        *self.fail_prefix.write() = Some(prefix.as_bytes().to_vec());
    }

    pub(crate) fn heal(&self) {
        *self.fail_prefix.write() = None;
    }

    fn check(&self, key: &[u8]) -> Result<(), StoreError> {
        match self.fail_prefix.read().as_deref() {
            Some(prefix) if key.starts_with(prefix) => Err(StoreError::Backend(format!(
                "write refused: {}",
                String::from_utf8_lossy(key)
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
impl StorageBackend for FailingStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.put(key, value)
    }

    fn put_batch(&self, rows: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        for (key, _) in rows {
            self.check(key)?;
        }
        self.inner.put_batch(rows)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.remove(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.inner.scan_prefix(prefix)
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize, StoreError> {
        self.inner.count_prefix(prefix)
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
