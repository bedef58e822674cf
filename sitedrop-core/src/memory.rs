//! In-process [`SiteRepository`] used by tests and the single-node CLI.
//!
//! A single mutex guards owners, sites and upload records, which makes every
//! trait operation atomic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::contract::{DeployCommit, SiteRepository};
use crate::error::RepoError;
use crate::model::{Owner, Site, SiteStatus, UploadRecord};

#[derive(Debug, Default)]
struct State {
    owners: HashMap<Uuid, Owner>,
    sites: HashMap<Uuid, Site>,
    uploads: Vec<UploadRecord>,
}

#[derive(Debug, Default)]
pub struct MemorySiteRepository {
    state: Mutex<State>,
}

impl MemorySiteRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RepoError> {
        self.state
            .lock()
            .map_err(|_| RepoError::Backend("repository lock poisoned".to_string()))
    }

    /// Registers or replaces an owner record.
    pub fn insert_owner(&self, owner: Owner) -> Result<(), RepoError> {
        self.lock()?.owners.insert(owner.id, owner);
        Ok(())
    }

    /// Snapshot of every recorded upload, oldest first.
    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.lock().map(|s| s.uploads.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SiteRepository for MemorySiteRepository {
    async fn get_owner(&self, owner_id: Uuid) -> Result<Owner, RepoError> {
        self.lock()?
            .owners
            .get(&owner_id)
            .cloned()
            .ok_or(RepoError::OwnerNotFound(owner_id))
    }

    async fn get_site(&self, site_id: Uuid) -> Result<Site, RepoError> {
        self.lock()?
            .sites
            .get(&site_id)
            .cloned()
            .ok_or(RepoError::SiteNotFound(site_id))
    }

    async fn create_site(&self, site: Site) -> Result<Site, RepoError> {
        let mut state = self.lock()?;
        let slug_taken = state
            .sites
            .values()
            .any(|s| !s.status.is_deleted() && s.slug == site.slug);
        if slug_taken {
            return Err(RepoError::SlugTaken(site.slug));
        }
        let owner = state
            .owners
            .get_mut(&site.owner_id)
            .ok_or(RepoError::OwnerNotFound(site.owner_id))?;
        if owner.suspended {
            return Err(RepoError::OwnerSuspended(owner.id));
        }
        if owner.used_sites >= owner.max_sites {
            return Err(RepoError::SiteLimitReached {
                max: owner.max_sites,
            });
        }
        owner.used_sites += 1;
        state.sites.insert(site.id, site.clone());
        Ok(site)
    }

    async fn list_sites(&self, owner_id: Uuid) -> Result<Vec<Site>, RepoError> {
        let state = self.lock()?;
        let mut sites: Vec<Site> = state
            .sites
            .values()
            .filter(|s| s.owner_id == owner_id && !s.status.is_deleted())
            .cloned()
            .collect();
        sites.sort_by_key(|s| s.created_at);
        Ok(sites)
    }

    async fn reserve_bytes(&self, owner_id: Uuid, bytes: u64) -> Result<Owner, RepoError> {
        let mut state = self.lock()?;
        let owner = state
            .owners
            .get_mut(&owner_id)
            .ok_or(RepoError::OwnerNotFound(owner_id))?;
        if owner.suspended {
            return Err(RepoError::OwnerSuspended(owner_id));
        }
        let available = owner.available_bytes();
        if bytes > available {
            return Err(RepoError::QuotaExceeded {
                available,
                required: bytes,
            });
        }
        owner.reserved_bytes += bytes;
        Ok(owner.clone())
    }

    async fn release_reservation(&self, owner_id: Uuid, bytes: u64) -> Result<(), RepoError> {
        let mut state = self.lock()?;
        let owner = state
            .owners
            .get_mut(&owner_id)
            .ok_or(RepoError::OwnerNotFound(owner_id))?;
        owner.reserved_bytes = owner.reserved_bytes.saturating_sub(bytes);
        Ok(())
    }

    async fn commit_deploy(&self, commit: DeployCommit) -> Result<(Site, Owner), RepoError> {
        let mut state = self.lock()?;
        let State { owners, sites, .. } = &mut *state;
        let site = sites
            .get_mut(&commit.site_id)
            .filter(|s| !s.status.is_deleted())
            .ok_or(RepoError::SiteNotFound(commit.site_id))?;
        let owner = owners
            .get_mut(&site.owner_id)
            .ok_or(RepoError::OwnerNotFound(site.owner_id))?;

        let base = owner.used_bytes.saturating_sub(site.bytes_used);
        let new_used = base + commit.bytes;
        if new_used > owner.max_bytes {
            return Err(RepoError::QuotaExceeded {
                available: owner.max_bytes.saturating_sub(base),
                required: commit.bytes,
            });
        }

        owner.reserved_bytes = owner.reserved_bytes.saturating_sub(commit.reserved_bytes);
        owner.used_bytes = new_used;
        site.bytes_used = commit.bytes;
        site.file_count = commit.files;
        site.serving_subfolder = commit.serving_subfolder;
        site.index_file = commit.index_file;
        site.deployment_id = Some(commit.deployment_id);
        site.deployment_type = Some(commit.source);
        site.last_committed_at = Some(Utc::now());
        Ok((site.clone(), owner.clone()))
    }

    async fn soft_delete_site(&self, site_id: Uuid) -> Result<(Site, Owner), RepoError> {
        let mut state = self.lock()?;
        let State { owners, sites, .. } = &mut *state;
        let site = sites
            .get_mut(&site_id)
            .filter(|s| !s.status.is_deleted())
            .ok_or(RepoError::SiteNotFound(site_id))?;
        let owner = owners
            .get_mut(&site.owner_id)
            .ok_or(RepoError::OwnerNotFound(site.owner_id))?;

        owner.used_bytes = owner.used_bytes.saturating_sub(site.bytes_used);
        owner.used_sites = owner.used_sites.saturating_sub(1);
        site.status = SiteStatus::Deleted;
        site.deleted_at = Some(Utc::now());
        Ok((site.clone(), owner.clone()))
    }

    async fn save_lifecycle(&self, site: &Site, expected: SiteStatus) -> Result<(), RepoError> {
        let mut state = self.lock()?;
        let stored = state
            .sites
            .get_mut(&site.id)
            .ok_or(RepoError::SiteNotFound(site.id))?;
        if stored.status != expected {
            return Err(RepoError::StatusChanged {
                site_id: site.id,
                expected,
                actual: stored.status,
            });
        }
        stored.status = site.status;
        stored.public_url = site.public_url.clone();
        stored.last_deployed_at = site.last_deployed_at;
        stored.deployment_count = site.deployment_count;
        stored.suspension_reason = site.suspension_reason.clone();
        stored.suspended_at = site.suspended_at;
        Ok(())
    }

    async fn set_owner_suspended(&self, owner_id: Uuid, suspended: bool) -> Result<(), RepoError> {
        let mut state = self.lock()?;
        let owner = state
            .owners
            .get_mut(&owner_id)
            .ok_or(RepoError::OwnerNotFound(owner_id))?;
        owner.suspended = suspended;
        Ok(())
    }

    async fn list_unreclaimed_deleted(&self) -> Result<Vec<Site>, RepoError> {
        let state = self.lock()?;
        Ok(state
            .sites
            .values()
            .filter(|s| s.status.is_deleted() && !s.storage_reclaimed)
            .cloned()
            .collect())
    }

    async fn mark_reclaimed(&self, site_id: Uuid) -> Result<(), RepoError> {
        let mut state = self.lock()?;
        let site = state
            .sites
            .get_mut(&site_id)
            .ok_or(RepoError::SiteNotFound(site_id))?;
        site.storage_reclaimed = true;
        Ok(())
    }

    async fn record_upload(&self, record: &UploadRecord) -> Result<(), RepoError> {
        let mut state = self.lock()?;
        match state.uploads.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => state.uploads.push(record.clone()),
        }
        Ok(())
    }
}
