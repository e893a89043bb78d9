//! # Persistence Stores
//!
//! The wormhole registry and the event log persist through the [`Store`]
//! trait so the backing medium stays swappable.
//!
//! ## Implementations
//!
//! - [`MemoryStore`]: volatile, the default.
//! - [`JsonFileStore`]: one JSON document per store. Saves write a temp file
//!   and rename it over the target while holding an exclusive `fs2` lock on
//!   a sidecar `.lock` file, so two writers never interleave.
//!
//! Callers serialise their own writes (one owner per store); the file lock
//! guards against a second process pointed at the same data directory.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use manifold_types::StoreError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Load/save access to one persisted value.
#[async_trait]
pub trait Store<T>: Send + Sync
where
    T: Send + Sync,
{
    /// Load the value, or `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<T>, StoreError>;

    /// Replace the persisted value.
    async fn save(&self, value: &T) -> Result<(), StoreError>;
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Volatile store; contents vanish with the process.
pub struct MemoryStore<T> {
    value: Mutex<Option<T>>,
}

impl<T> MemoryStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    /// Pre-seeded store, handy for restore tests.
    #[must_use]
    pub fn with_value(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Store<T> for MemoryStore<T>
where
    T: Clone + Send + Sync,
{
    async fn load(&self) -> Result<Option<T>, StoreError> {
        Ok(self.value.lock().clone())
    }

    async fn save(&self, value: &T) -> Result<(), StoreError> {
        *self.value.lock() = Some(value.clone());
        Ok(())
    }
}

// =============================================================================
// JSON FILE STORE
// =============================================================================

/// JSON document on disk.
pub struct JsonFileStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        path.with_file_name(name)
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        path.with_file_name(name)
    }
}

fn write_locked(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let lock_path = JsonFileStore::<()>::lock_path(path);
    let lock = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)?;
    lock.try_lock_exclusive()
        .map_err(|_| StoreError::Locked(lock_path.display().to_string()))?;

    let result = write_atomic(path, bytes);
    let _ = lock.unlock();
    result
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = JsonFileStore::<()>::temp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl<T> Store<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn load(&self) -> Result<Option<T>, StoreError> {
        let path = self.path.clone();
        let bytes = tokio::task::spawn_blocking(move || read_optional(&path))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))??;

        match bytes {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)?;
                debug!(path = %self.path.display(), "Store loaded");
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_locked(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))??;
        debug!(path = %self.path.display(), "Store saved");
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
