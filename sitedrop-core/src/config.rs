use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

pub const DEFAULT_MAX_BUNDLE_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_FILES: usize = 10_000;

/// Limits and tuning for the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_bundle_bytes: u64,
    pub max_files: usize,
    /// Upper bound on a package manifest read for build detection.
    pub max_manifest_bytes: u64,
    /// Object-store writes in flight per submission.
    pub upload_concurrency: usize,
    /// Extra attempts for a write that failed with a transient error.
    pub upload_retries: u32,
    pub clone_timeout_secs: u64,
    /// Parent of per-clone scratch directories; system temp when unset.
    pub scratch_dir: Option<PathBuf>,
    /// Public URL pattern; `{slug}` is replaced with the site slug.
    pub public_url_template: String,
    /// Fraction of `max_bytes` past which a quota warning is sent.
    pub quota_warning_ratio: f64,
    pub list_page_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_bundle_bytes: DEFAULT_MAX_BUNDLE_BYTES,
            max_files: DEFAULT_MAX_FILES,
            max_manifest_bytes: 1024 * 1024,
            upload_concurrency: 8,
            upload_retries: 2,
            clone_timeout_secs: 120,
            scratch_dir: None,
            public_url_template: "https://{slug}.sites.localhost".to_string(),
            quota_warning_ratio: 0.8,
            list_page_size: 1000,
        }
    }
}

impl IngestConfig {
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn public_url(&self, slug: &str) -> String {
        self.public_url_template.replace("{slug}", slug)
    }

    pub fn trace_loaded(&self) {
        info!(
            max_bundle_bytes = self.max_bundle_bytes,
            max_files = self.max_files,
            upload_concurrency = self.upload_concurrency,
            clone_timeout_secs = self.clone_timeout_secs,
            "Loaded IngestConfig"
        );
        debug!(?self, "IngestConfig loaded (full debug)");
    }
}
