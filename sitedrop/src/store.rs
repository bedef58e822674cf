//! Filesystem-backed [`ObjectStore`] for single-node deployments.
//!
//! Bodies live under `<root>/objects/<key>` and metadata as JSON under
//! `<root>/meta/<key>.json`. Writes go to a temporary sibling first and are
//! renamed into place, so a reader never sees a half-written body.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use sitedrop_core::contract::{FetchedObject, ObjectListing, ObjectStore};
use sitedrop_core::error::StorageError;
use sitedrop_core::model::StoredObject;
use tracing::{debug, warn};
use uuid::Uuid;

const OBJECTS_DIR: &str = "objects";
const META_DIR: &str = "meta";
const META_SUFFIX: &str = ".json";

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checked_relative(key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(relative.to_path_buf())
    }

    fn body_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(OBJECTS_DIR).join(Self::checked_relative(key)?))
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.root.join(META_DIR).join(Self::checked_relative(key)?);
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(META_SUFFIX);
        path.set_file_name(name);
        Ok(path)
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(format!(".tmp-{}", Uuid::new_v4().simple()));
        let tmp = path.with_file_name(tmp_name);
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn remove_if_present(path: &Path) -> io::Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_meta(bytes: &[u8], key: &str) -> Result<StoredObject, StorageError> {
        serde_json::from_slice(bytes)
            .map_err(|e| StorageError::Backend(format!("corrupt metadata for {key}: {e}")))
    }
}

/// Every key under `objects/`, sorted. Blocking.
fn walk_keys(objects_root: &Path) -> io::Result<Vec<String>> {
    let mut keys = Vec::new();
    if objects_root.exists() {
        walk(objects_root, objects_root, &mut keys)?;
    }
    keys.sort();
    Ok(keys)
}

fn walk(root: &Path, dir: &Path, keys: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, keys)?;
        } else if file_type.is_file() {
            let name = entry.file_name();
            if name.to_string_lossy().contains(".tmp-") {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(relative);
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, meta: StoredObject) -> Result<(), StorageError> {
        let body_path = self.body_path(key)?;
        let meta_path = self.meta_path(key)?;
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| StorageError::Backend(format!("metadata for {key}: {e}")))?;
        Self::write_atomic(&meta_path, &meta_json).await?;
        Self::write_atomic(&body_path, &body).await?;
        debug!(key, size = body.len(), "[STORE] Object written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<FetchedObject, StorageError> {
        let body = match tokio::fs::read(self.body_path(key)?).await {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let meta_bytes = tokio::fs::read(self.meta_path(key)?).await?;
        let meta = Self::read_meta(&meta_bytes, key)?;
        Ok(FetchedObject { body, meta })
    }

    async fn head(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        if !tokio::fs::try_exists(self.body_path(key)?).await? {
            return Ok(None);
        }
        match tokio::fs::read(self.meta_path(key)?).await {
            Ok(bytes) => Ok(Some(Self::read_meta(&bytes, key)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(key, "[STORE] Object has no metadata sidecar");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        continuation: Option<String>,
        limit: usize,
    ) -> Result<ObjectListing, StorageError> {
        let objects_root = self.root.join(OBJECTS_DIR);
        let all = tokio::task::spawn_blocking(move || walk_keys(&objects_root))
            .await
            .map_err(|e| StorageError::Backend(format!("listing task failed: {e}")))??;

        let mut matching = all
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation.as_ref().map_or(true, |token| k > token));
        let keys: Vec<String> = matching.by_ref().take(limit.max(1)).collect();
        let next = match matching.next() {
            Some(_) => keys.last().cloned(),
            None => None,
        };
        Ok(ObjectListing { keys, next })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        Self::remove_if_present(&self.body_path(key)?).await?;
        Self::remove_if_present(&self.meta_path(key)?).await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, StorageError> {
        let mut removed = 0;
        for key in keys {
            if Self::remove_if_present(&self.body_path(key)?).await? {
                removed += 1;
            }
            Self::remove_if_present(&self.meta_path(key)?).await?;
        }
        Ok(removed)
    }
}
