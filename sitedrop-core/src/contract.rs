#![allow(unused)]

//! # contract: collaborator interfaces for the ingestion core
//!
//! The core never talks to a concrete backend. Everything outside the
//! pipeline is reached through one of the traits below, constructed once at
//! startup and passed in:
//!
//! - [`ObjectStore`]: raw key/value object storage (S3-like, filesystem, memory).
//! - [`SiteRepository`]: owners, sites and upload records, with the atomic
//!   quota operations the ledger relies on.
//! - [`RepositoryFetcher`]: shallow clone of a remote repository into a directory.
//! - [`Notifier`]: fire-and-forget owner/platform notifications.
//! - [`Authorizer`]: turns a credential into a [`VerifiedOwner`].
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall` so tests can script collaborator
//!   behaviour; mocks are exported with the `test-export-mocks` feature.
//!
//! ## Adding Backends
//! - Implement the trait for your destination and map upstream failures onto
//!   the error enums in [`crate::error`]. Storage implementations must use
//!   [`StorageError::Transient`] only for failures worth retrying.

use std::path::Path;

use async_trait::async_trait;
use mockall::{automock, predicate::*};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{CloneError, RepoError, StorageError};
use crate::model::{
    Owner, RepoInfo, Site, SiteStatus, SourceType, StoredObject, UploadRecord, VerifiedOwner,
};

/// Boxed error used by the fire-and-forget collaborators.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Body plus metadata returned by [`ObjectStore::get`].
#[derive(Debug, Clone)]
pub struct FetchedObject {
    pub body: Vec<u8>,
    pub meta: StoredObject,
}

/// One page of keys from [`ObjectStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ObjectListing {
    pub keys: Vec<String>,
    /// Opaque token for the next page; `None` when the listing is complete.
    pub next: Option<String>,
}

/// Raw object storage. Keys are full keys, including the site namespace.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create or overwrite an object.
    async fn put(&self, key: &str, body: Vec<u8>, meta: StoredObject) -> Result<(), StorageError>;

    /// Fetch body and metadata; [`StorageError::NotFound`] when missing.
    async fn get(&self, key: &str) -> Result<FetchedObject, StorageError>;

    /// Metadata only; `Ok(None)` when missing.
    async fn head(&self, key: &str) -> Result<Option<StoredObject>, StorageError>;

    /// Keys starting with `prefix`, in lexical order, at most `limit` per page.
    async fn list(
        &self,
        prefix: &str,
        continuation: Option<String>,
        limit: usize,
    ) -> Result<ObjectListing, StorageError>;

    /// Remove one object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Remove many objects, returning how many were removed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize, StorageError>;
}

/// Everything needed to fold a finished upload batch into the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployCommit {
    pub site_id: Uuid,
    /// Prefix the batch was written under; becomes the site's live deployment.
    pub deployment_id: String,
    /// Capacity held for this batch by [`SiteRepository::reserve_bytes`].
    pub reserved_bytes: u64,
    /// Bytes that were actually written.
    pub bytes: u64,
    pub files: u64,
    pub serving_subfolder: Option<String>,
    pub index_file: String,
    pub source: SourceType,
}

/// Persistence for owners, sites and upload history.
///
/// Implementations must make `create_site`, `reserve_bytes`, `commit_deploy`
/// and `soft_delete_site` atomic with respect to each other for the same owner.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SiteRepository: Send + Sync {
    async fn get_owner(&self, owner_id: Uuid) -> Result<Owner, RepoError>;

    async fn get_site(&self, site_id: Uuid) -> Result<Site, RepoError>;

    /// Insert a new site; fails when the slug is taken by a non-deleted site
    /// or the owner is at `max_sites`. Increments `used_sites`.
    async fn create_site(&self, site: Site) -> Result<Site, RepoError>;

    /// Non-deleted sites of an owner.
    async fn list_sites(&self, owner_id: Uuid) -> Result<Vec<Site>, RepoError>;

    /// Hold `bytes` of capacity only if `used + reserved + bytes <= max`.
    async fn reserve_bytes(&self, owner_id: Uuid, bytes: u64) -> Result<Owner, RepoError>;

    async fn release_reservation(&self, owner_id: Uuid, bytes: u64) -> Result<(), RepoError>;

    /// Replace the site's usage with the batch totals and adjust the owner by
    /// the difference, releasing the reservation. Refuses to exceed the ceiling.
    async fn commit_deploy(&self, commit: DeployCommit) -> Result<(Site, Owner), RepoError>;

    /// Mark deleted and give the site's bytes and slot back to the owner.
    async fn soft_delete_site(&self, site_id: Uuid) -> Result<(Site, Owner), RepoError>;

    /// Persist status, URL, suspension and deployment fields of `site`, but
    /// only while the stored status is still `expected`; otherwise
    /// [`RepoError::StatusChanged`] and nothing is written.
    async fn save_lifecycle(&self, site: &Site, expected: SiteStatus) -> Result<(), RepoError>;

    async fn set_owner_suspended(&self, owner_id: Uuid, suspended: bool) -> Result<(), RepoError>;

    async fn list_unreclaimed_deleted(&self) -> Result<Vec<Site>, RepoError>;

    async fn mark_reclaimed(&self, site_id: Uuid) -> Result<(), RepoError>;

    async fn record_upload(&self, record: &UploadRecord) -> Result<(), RepoError>;
}

/// Checks out a repository into an existing, empty directory.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    async fn fetch(&self, url: &str, branch: &str, dest: &Path) -> Result<RepoInfo, CloneError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    SiteActivated {
        owner_id: Uuid,
        site_id: Uuid,
        slug: String,
        public_url: String,
    },
    QuotaWarning {
        owner_id: Uuid,
        used_bytes: u64,
        max_bytes: u64,
    },
    SiteSuspended {
        owner_id: Uuid,
        site_id: Uuid,
        reason: String,
    },
}

/// Fire-and-forget sink. Failures are logged by callers and never propagate.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError>;
}

/// Resolves a caller credential into a verified owner identity.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<VerifiedOwner, CollaboratorError>;
}

/// Notifier that drops everything; handy when no sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError> {
        tracing::debug!(?notification, "Notification dropped (no sink configured)");
        Ok(())
    }
}
