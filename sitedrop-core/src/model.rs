//! Domain records shared by the ledger, lifecycle and ingestion modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Pending,
    Active,
    Suspended,
    Inactive,
    Deleted,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Pending => "pending",
            SiteStatus::Active => "active",
            SiteStatus::Suspended => "suspended",
            SiteStatus::Inactive => "inactive",
            SiteStatus::Deleted => "deleted",
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, SiteStatus::Deleted)
    }
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a bundle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Archive,
    Files,
    Repo,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Archive => "archive",
            SourceType::Files => "files",
            SourceType::Repo => "repo",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub slug: String,
    pub status: SiteStatus,
    /// Object-store prefix owned exclusively by this site.
    pub namespace: String,
    /// Prefix of the committed deployment inside `namespace`.
    pub deployment_id: Option<String>,
    pub file_count: u64,
    pub bytes_used: u64,
    pub deployment_type: Option<SourceType>,
    /// Subfolder that holds the serving index, `None` for the bundle root.
    pub serving_subfolder: Option<String>,
    pub index_file: String,
    pub public_url: Option<String>,
    pub last_committed_at: Option<DateTime<Utc>>,
    pub last_deployed_at: Option<DateTime<Utc>>,
    pub deployment_count: u64,
    pub suspension_reason: Option<String>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Set by the reclamation sweep once the namespace has been emptied.
    pub storage_reclaimed: bool,
    pub created_at: DateTime<Utc>,
}

impl Site {
    pub fn new(owner_id: Uuid, slug: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            owner_id,
            slug: slug.into(),
            status: SiteStatus::Pending,
            namespace: format!("site-{}", id.simple()),
            deployment_id: None,
            file_count: 0,
            bytes_used: 0,
            deployment_type: None,
            serving_subfolder: None,
            index_file: crate::inspect::INDEX_FILE.to_string(),
            public_url: None,
            last_committed_at: None,
            last_deployed_at: None,
            deployment_count: 0,
            suspension_reason: None,
            suspended_at: None,
            deleted_at: None,
            storage_reclaimed: false,
            created_at: Utc::now(),
        }
    }

    /// Site-relative path of the serving index.
    pub fn index_path(&self) -> String {
        crate::path::join(self.serving_subfolder.as_deref(), &self.index_file)
    }

    /// Namespace holding the committed deployment's objects, if any.
    pub fn content_namespace(&self) -> Option<String> {
        self.deployment_id
            .as_deref()
            .map(|id| deployment_namespace(&self.namespace, id))
    }

    /// True when a deployment was committed after the last activation.
    pub fn has_undeployed_commit(&self) -> bool {
        match (self.last_committed_at, self.last_deployed_at) {
            (Some(committed), Some(deployed)) => committed > deployed,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// Object-store prefix of one deployment of a site.
pub fn deployment_namespace(namespace: &str, deployment_id: &str) -> String {
    format!("{namespace}/{deployment_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub id: Uuid,
    pub max_bytes: u64,
    pub used_bytes: u64,
    /// Capacity held by in-flight submissions, not yet committed.
    pub reserved_bytes: u64,
    pub max_sites: u32,
    pub used_sites: u32,
    pub suspended: bool,
}

impl Owner {
    pub fn new(id: Uuid, max_bytes: u64, max_sites: u32) -> Self {
        Self {
            id,
            max_bytes,
            used_bytes: 0,
            reserved_bytes: 0,
            max_sites,
            used_sites: 0,
            suspended: false,
        }
    }

    pub fn available_bytes(&self) -> u64 {
        self.max_bytes
            .saturating_sub(self.used_bytes)
            .saturating_sub(self.reserved_bytes)
    }
}

/// Metadata kept alongside each stored object for serving and audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Site-relative, sanitised path.
    pub path: String,
    /// Path as it appeared in the uploaded bundle.
    pub original_name: String,
    pub size: u64,
    pub content_type: String,
    pub cache_control: String,
    /// Hex SHA-256 of the body.
    pub checksum: String,
    pub source: SourceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub site_id: Uuid,
    pub source: SourceType,
    pub status: UploadStatus,
    pub size: u64,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadRecord {
    pub fn start(site_id: Uuid, source: SourceType) -> Self {
        Self {
            id: Uuid::new_v4(),
            site_id,
            source,
            status: UploadStatus::Processing,
            size: 0,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn complete(&mut self, size: u64) {
        self.status = UploadStatus::Completed;
        self.size = size;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = UploadStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }
}

/// Owner identity that an [`crate::contract::Authorizer`] has vouched for.
///
/// Mutating operations take this instead of a raw id so that an
/// unauthenticated caller cannot reach them by accident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedOwner {
    id: Uuid,
}

impl VerifiedOwner {
    /// Only authorizer implementations should call this.
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owns(&self, site: &Site) -> bool {
        site.owner_id == self.id
    }
}

/// Commit information for a repository-sourced bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub commit_hash: String,
    pub branch: String,
}
