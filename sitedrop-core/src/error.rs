//! Error taxonomy for the ingestion pipeline.
//!
//! Each concern owns a small `thiserror` enum; [`IngestError`] is the
//! top-level type returned by the orchestrator and lifecycle operations.
//! Structural failures (no index, build required, quota) always carry the
//! complete list of violations so callers can show everything at once.

use serde::Serialize;
use uuid::Uuid;

use crate::model::SiteStatus;

/// A single rule violation found while inspecting a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Bundle-relative path the violation applies to, `None` for bundle-wide rules.
    pub path: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn bundle(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
        }
    }

    pub fn entry(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{path}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path is longer than {max} characters")]
    TooLong { max: usize },
    #[error("path is absolute")]
    Absolute,
    #[error("path contains a '..' segment")]
    Traversal,
    #[error("path contains duplicate slashes")]
    DuplicateSlash,
    #[error("path contains control characters")]
    ControlCharacter,
    #[error("path contains a backslash")]
    Backslash,
    #[error("path segment {0:?} is empty after sanitising")]
    EmptySegment(String),
}

/// Failures reported by an [`crate::contract::ObjectStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Network or backend hiccup; the same request may succeed if retried.
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(e.to_string()),
            std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::WouldBlock => StorageError::Transient(e.to_string()),
            _ => StorageError::Backend(e.to_string()),
        }
    }
}

/// Failures from the site/owner persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    #[error("site {0} not found")]
    SiteNotFound(Uuid),
    #[error("owner {0} not found")]
    OwnerNotFound(Uuid),
    #[error("slug {0:?} is already taken")]
    SlugTaken(String),
    #[error("owner has reached the site limit of {max}")]
    SiteLimitReached { max: u32 },
    #[error("quota exceeded: {available} bytes available, {required} bytes required")]
    QuotaExceeded { available: u64, required: u64 },
    #[error("owner {0} is suspended")]
    OwnerSuspended(Uuid),
    #[error("site {site_id} is {actual}, expected {expected}")]
    StatusChanged {
        site_id: Uuid,
        expected: SiteStatus,
        actual: SiteStatus,
    },
    #[error("repository backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive is corrupt or unreadable: {0}")]
    Corrupt(String),
    #[error("archive would decompress to {projected} bytes, limit is {limit}")]
    TooLarge { projected: u64, limit: u64 },
    #[error("archive contains {count} files, limit is {limit}")]
    TooManyFiles { count: usize, limit: usize },
    #[error("entry {path} decompressed past its declared size of {declared} bytes")]
    SizeMismatch { path: String, declared: u64 },
    #[error("extraction was cancelled by the consumer")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("repository url rejected: {0}")]
    InvalidUrl(String),
    #[error("branch name rejected: {0}")]
    InvalidBranch(String),
    #[error("git clone timed out after {0} seconds")]
    Timeout(u64),
    #[error("git exited with {status}: {stderr}")]
    GitFailed { status: String, stderr: String },
    #[error("failed to launch git: {0}")]
    Launch(String),
    #[error("scratch directory error: {0}")]
    Scratch(#[from] std::io::Error),
}

/// Top-level error for submissions, lifecycle transitions and serving.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("bundle failed validation: {}", join_violations(.violations))]
    Validation {
        violations: Vec<Violation>,
        warnings: Vec<String>,
    },
    #[error("bundle requires a build step ({reason}); upload the built output folder instead")]
    BuildRequired {
        reason: String,
        violations: Vec<Violation>,
        warnings: Vec<String>,
    },
    #[error("quota exceeded: {available} bytes available, {required} bytes required")]
    QuotaExceeded { available: u64, required: u64 },
    #[error("{0} not found")]
    NotFound(String),
    #[error("storage unavailable, retry later: {0}")]
    TransientStorage(String),
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),
    #[error("owner is not allowed to modify site {0}")]
    Forbidden(Uuid),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("cannot {action} a site that is {from}")]
    InvalidTransition { from: String, action: &'static str },
    #[error("activation blocked: {0}")]
    ActivationBlocked(String),
    #[error("repository clone failed: {0}")]
    Clone(#[from] CloneError),
    #[error("internal error: {0}")]
    Internal(String),
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl IngestError {
    /// Whether retrying the same request later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::TransientStorage(_))
    }
}

impl From<RepoError> for IngestError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::SiteNotFound(id) => IngestError::NotFound(format!("site {id}")),
            RepoError::OwnerNotFound(id) => IngestError::NotFound(format!("owner {id}")),
            RepoError::QuotaExceeded {
                available,
                required,
            } => IngestError::QuotaExceeded {
                available,
                required,
            },
            RepoError::SlugTaken(slug) => IngestError::Conflict(format!("slug {slug:?} is taken")),
            RepoError::SiteLimitReached { max } => {
                IngestError::Conflict(format!("site limit of {max} reached"))
            }
            RepoError::OwnerSuspended(id) => {
                IngestError::Conflict(format!("owner {id} is suspended"))
            }
            RepoError::StatusChanged {
                site_id,
                actual: SiteStatus::Deleted,
                ..
            } => IngestError::NotFound(format!("site {site_id}")),
            e @ RepoError::StatusChanged { .. } => IngestError::Conflict(e.to_string()),
            RepoError::Backend(msg) => IngestError::Internal(msg),
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Transient(msg) => IngestError::TransientStorage(msg),
            StorageError::NotFound(key) => IngestError::NotFound(format!("object {key}")),
            StorageError::Backend(msg) => IngestError::Internal(msg),
            StorageError::InvalidKey(msg) => IngestError::Validation {
                violations: vec![Violation::bundle(msg)],
                warnings: Vec::new(),
            },
        }
    }
}

impl From<ArchiveError> for IngestError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::Corrupt(msg) => IngestError::CorruptArchive(msg),
            ArchiveError::SizeMismatch { .. } => IngestError::CorruptArchive(e.to_string()),
            ArchiveError::TooLarge { .. } | ArchiveError::TooManyFiles { .. } => {
                IngestError::Validation {
                    violations: vec![Violation::bundle(e.to_string())],
                    warnings: Vec::new(),
                }
            }
            ArchiveError::Cancelled => IngestError::Internal(e.to_string()),
        }
    }
}
