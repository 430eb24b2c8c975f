//! Persistence backends for the store.

use super::Store;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::{fs as tokio_fs, io::AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

/// Where the store is persisted.
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Reads the persisted store. `Ok(None)` means nothing has been persisted
    /// yet (missing or empty file).
    async fn load(&self) -> StorageResult<Option<Store>>;

    /// Overwrites the persisted copy with the full store.
    async fn save(&self, store: &Store) -> StorageResult<()>;

    /// Moves unreadable persisted data out of the way before it gets
    /// overwritten with a fresh store.
    async fn quarantine(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Single pretty-printed JSON file, replaced atomically on every save.
///
/// Saves write `<file>.tmp`, fsync it, then rename it over the data file, so
/// a concurrent reader sees either the old or the new contents.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, "tmp")
    }

    fn quarantine_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, "corrupt")
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[async_trait]
impl StorageBackend for JsonFileBackend {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> StorageResult<Option<Store>> {
        let contents = match tokio_fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Data file does not exist yet");
                return Ok(None);
            }
            Err(e) => return Err(StorageError::FileRead(self.path.clone(), e)),
        };

        if contents.trim().is_empty() {
            debug!("Data file is empty");
            return Ok(None);
        }

        let value: Value = serde_json::from_str(&contents)
            .map_err(|e| StorageError::Deserialization(self.path.clone(), e))?;
        match value {
            Value::Object(map) => Ok(Some(Store::from_map(map))),
            _ => Err(StorageError::NotAnObject(self.path.clone())),
        }
    }

    #[instrument(skip(self, store), fields(path = %self.path.display()))]
    async fn save(&self, store: &Store) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(store.as_map()).map_err(StorageError::Serialization)?;
        let temp_path = self.temp_path();

        let mut file = tokio_fs::File::create(&temp_path)
            .await
            .map_err(|e| StorageError::FileCreate(temp_path.clone(), e))?;

        file.write_all(&json)
            .await
            .map_err(|e| StorageError::FileWrite(temp_path.clone(), e))?;

        file.sync_all()
            .await
            .map_err(|e| StorageError::FileSync(temp_path.clone(), e))?;
        drop(file);

        tokio_fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StorageError::FileRename(temp_path, self.path.clone(), e))?;

        debug!("Saved {} bytes", json.len());
        Ok(())
    }

    async fn quarantine(&self) -> StorageResult<()> {
        let target = self.quarantine_path();
        tokio_fs::rename(&self.path, &target)
            .await
            .map_err(|e| StorageError::FileRename(self.path.clone(), target.clone(), e))?;
        warn!("Unreadable data file preserved as {}", target.display());
        Ok(())
    }
}

/// Startup load: use the persisted store when it is readable, otherwise
/// initialise the default structure and write it out.
///
/// Never fails. A store that cannot be read or written is logged and the
/// server keeps running on the in-memory copy.
pub async fn load_or_initialize(backend: &dyn StorageBackend) -> Store {
    match backend.load().await {
        Ok(Some(store)) => {
            info!("✅ Loaded {} key(s) from storage", store.len());
            return store;
        }
        Ok(None) => {
            info!("📝 No stored data found, creating a new data file");
        }
        Err(e) => {
            warn!("Failed to load stored data, falling back to defaults: {}", e);
            if let Err(e) = backend.quarantine().await {
                warn!("Could not preserve unreadable data file: {}", e);
            }
        }
    }

    let store = Store::with_defaults();
    if let Err(e) = backend.save(&store).await {
        warn!("Failed to write initial data file: {}", e);
    }
    store
}
