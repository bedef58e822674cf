//! Namespaced object storage for site artifacts.
//!
//! Every key is `{site namespace}/{sanitised relative path}`; a namespace
//! belongs to exactly one site and is never shared. [`SiteStorage`] layers
//! the key scheme, content types, cache policy and checksums over any
//! [`ObjectStore`] backend.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::classify;
use crate::contract::{FetchedObject, ObjectListing, ObjectStore};
use crate::error::StorageError;
use crate::model::{SourceType, StoredObject};
use crate::path;

/// Markup changes with every deploy, so browsers and edges revalidate it quickly.
pub const MARKUP_CACHE_CONTROL: &str = "public, max-age=300, must-revalidate";
pub const ASSET_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

pub fn cache_control_for(path: &str) -> &'static str {
    if classify::is_markup(path) {
        MARKUP_CACHE_CONTROL
    } else {
        ASSET_CACHE_CONTROL
    }
}

/// Builds the full object key for a site-relative path.
pub fn object_key(namespace: &str, relative: &str) -> Result<String, StorageError> {
    let clean = path::to_storage_path(relative)
        .map_err(|e| StorageError::InvalidKey(format!("{relative}: {e}")))?;
    Ok(format!("{namespace}/{clean}"))
}

fn namespace_prefix(namespace: &str) -> String {
    format!("{namespace}/")
}

pub fn sha256_hex(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}

/// Site-scoped facade over an [`ObjectStore`].
#[derive(Clone)]
pub struct SiteStorage {
    store: Arc<dyn ObjectStore>,
    page_size: usize,
}

impl SiteStorage {
    pub fn new(store: Arc<dyn ObjectStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Stores `body` under the site namespace with type and cache policy derived from the path.
    pub async fn put(
        &self,
        namespace: &str,
        relative: &str,
        original_name: &str,
        body: Vec<u8>,
        source: SourceType,
    ) -> Result<StoredObject, StorageError> {
        let key = object_key(namespace, relative)?;
        let stored_path = key[namespace.len() + 1..].to_string();
        let meta = StoredObject {
            content_type: classify::content_type_for(&stored_path).to_string(),
            cache_control: cache_control_for(&stored_path).to_string(),
            checksum: sha256_hex(&body),
            size: body.len() as u64,
            original_name: original_name.to_string(),
            path: stored_path,
            source,
        };
        debug!(key = %key, size = meta.size, content_type = %meta.content_type, "[STORE] put");
        self.store.put(&key, body, meta.clone()).await?;
        Ok(meta)
    }

    pub async fn get(&self, namespace: &str, relative: &str) -> Result<FetchedObject, StorageError> {
        let key = object_key(namespace, relative)?;
        self.store.get(&key).await
    }

    pub async fn head(
        &self,
        namespace: &str,
        relative: &str,
    ) -> Result<Option<StoredObject>, StorageError> {
        let key = object_key(namespace, relative)?;
        self.store.head(&key).await
    }

    /// Every site-relative path in the namespace, following all pages.
    pub async fn list(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let prefix = namespace_prefix(namespace);
        let mut paths = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.store.list(&prefix, continuation, self.page_size).await?;
            paths.extend(page.keys.iter().map(|k| k[prefix.len()..].to_string()));
            match page.next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        Ok(paths)
    }

    pub async fn delete(&self, namespace: &str, relative: &str) -> Result<(), StorageError> {
        let key = object_key(namespace, relative)?;
        self.store.delete(&key).await
    }

    /// Deletes specific site-relative paths, best effort; returns how many went away.
    pub async fn delete_paths(&self, namespace: &str, relative: &[String]) -> usize {
        let keys: Vec<String> = relative
            .iter()
            .map(|p| format!("{}{}", namespace_prefix(namespace), p))
            .collect();
        let mut deleted = 0;
        for chunk in keys.chunks(self.page_size) {
            match self.store.delete_many(chunk).await {
                Ok(n) => deleted += n,
                Err(e) => warn!(namespace, error = %e, batch = chunk.len(), "[STORE] Bulk delete failed; continuing"),
            }
        }
        deleted
    }

    /// Empties a namespace page by page. Listing or deletion failures are
    /// logged and the purge is reported incomplete.
    pub async fn delete_all(&self, namespace: &str) -> NamespacePurge {
        let prefix = namespace_prefix(namespace);
        let mut purge = NamespacePurge {
            deleted: 0,
            complete: true,
        };
        let mut continuation = None;
        loop {
            let page = match self
                .store
                .list(&prefix, continuation.clone(), self.page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(namespace, error = %e, deleted = purge.deleted, "[STORE] Listing failed during delete_all; stopping early");
                    purge.complete = false;
                    break;
                }
            };
            if !page.keys.is_empty() {
                match self.store.delete_many(&page.keys).await {
                    Ok(n) => purge.deleted += n,
                    Err(e) => {
                        warn!(namespace, error = %e, batch = page.keys.len(), "[STORE] Bulk delete failed; continuing with next page");
                        purge.complete = false;
                    }
                }
            }
            match page.next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        info!(namespace, deleted = purge.deleted, complete = purge.complete, "[STORE] Namespace emptied");
        purge
    }
}

/// Result of [`SiteStorage::delete_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespacePurge {
    pub deleted: usize,
    /// Every page was listed and every delete call succeeded.
    pub complete: bool,
}

/// In-process [`ObjectStore`] backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, (Vec<u8>, StoredObject)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned<T>(_: T) -> StorageError {
        StorageError::Backend("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, meta: StoredObject) -> Result<(), StorageError> {
        let mut objects = self.objects.write().map_err(Self::poisoned)?;
        objects.insert(key.to_string(), (body, meta));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<FetchedObject, StorageError> {
        let objects = self.objects.read().map_err(Self::poisoned)?;
        objects
            .get(key)
            .map(|(body, meta)| FetchedObject {
                body: body.clone(),
                meta: meta.clone(),
            })
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        let objects = self.objects.read().map_err(Self::poisoned)?;
        Ok(objects.get(key).map(|(_, meta)| meta.clone()))
    }

    async fn list(
        &self,
        prefix: &str,
        continuation: Option<String>,
        limit: usize,
    ) -> Result<ObjectListing, StorageError> {
        let objects = self.objects.read().map_err(Self::poisoned)?;
        let start = match &continuation {
            Some(token) => Bound::Excluded(token.clone()),
            None => Bound::Included(prefix.to_string()),
        };
        let mut matching = objects
            .range((start, Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix));
        let keys: Vec<String> = matching.by_ref().take(limit.max(1)).cloned().collect();
        let next = match matching.next() {
            Some(_) => keys.last().cloned(),
            None => None,
        };
        Ok(ObjectListing { keys, next })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut objects = self.objects.write().map_err(Self::poisoned)?;
        objects.remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, StorageError> {
        let mut objects = self.objects.write().map_err(Self::poisoned)?;
        Ok(keys.iter().filter(|k| objects.remove(*k).is_some()).count())
    }
}
