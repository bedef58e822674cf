/// `load_config` module: reads the YAML deployment config and injects the
/// owner identity from the environment.
///
/// This is the only place where user-supplied YAML is parsed. The core
/// crate never sees the raw file, only the typed sections below.
///
/// # Sections
/// - `storage`: where the filesystem object store keeps objects.
/// - `ingest`: pipeline limits, passed through as [`IngestConfig`]; every key is optional.
/// - `owner`: the local owner's byte and site quota.
/// - `notify`: optional webhook that receives lifecycle notifications.
///
/// # Environment
/// - `SITEDROP_OWNER_ID`: UUID of the owner performing deployments. Read
///   after `.env` has been loaded via `dotenvy`. Only `deploy` requires it.
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{anyhow, Result};
use serde::Deserialize;
use sitedrop_core::config::IngestConfig;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const OWNER_ID_VAR: &str = "SITEDROP_OWNER_ID";

pub const DEFAULT_OWNER_MAX_BYTES: u64 = 500 * 1024 * 1024;
pub const DEFAULT_OWNER_MAX_SITES: u32 = 10;

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub storage: StorageSection,
    pub ingest: IngestConfig,
    pub owner: OwnerSection,
    pub notify: NotifySection,
    /// From `SITEDROP_OWNER_ID`; `None` when unset.
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OwnerSection {
    pub max_bytes: u64,
    pub max_sites: u32,
}

impl Default for OwnerSection {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_OWNER_MAX_BYTES,
            max_sites: DEFAULT_OWNER_MAX_SITES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 5,
        }
    }
}

impl CliConfig {
    pub fn trace_loaded(&self) {
        info!(
            storage_root = ?self.storage.root,
            owner_max_bytes = self.owner.max_bytes,
            owner_max_sites = self.owner.max_sites,
            webhook = self.notify.webhook_url.is_some(),
            owner_id_set = self.owner_id.is_some(),
            "Loaded CliConfig"
        );
        self.ingest.trace_loaded();
        debug!(?self, "CliConfig loaded (full debug)");
    }

    /// The owner id, or an error explaining how to set it.
    pub fn require_owner_id(&self) -> Result<Uuid> {
        self.owner_id
            .ok_or_else(|| anyhow!("{OWNER_ID_VAR} must be set (environment or .env) to deploy"))
    }
}

/// Loads the YAML config at `path` and reads the owner id from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    #[derive(Deserialize)]
    struct RawConfig {
        storage: StorageSection,
        #[serde(default)]
        ingest: IngestConfig,
        #[serde(default)]
        owner: OwnerSection,
        #[serde(default)]
        notify: NotifySection,
    }

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(raw) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            raw
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML {:?}: {}", path_ref, e));
        }
    };

    if raw.ingest.upload_concurrency == 0 {
        return Err(anyhow!("ingest.upload_concurrency must be at least 1"));
    }
    if !(0.0..=1.0).contains(&raw.ingest.quota_warning_ratio) {
        return Err(anyhow!(
            "ingest.quota_warning_ratio must be between 0 and 1, got {}",
            raw.ingest.quota_warning_ratio
        ));
    }

    let owner_id = match env::var(OWNER_ID_VAR) {
        Ok(value) => match Uuid::parse_str(value.trim()) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = ?e, "Failed to parse {OWNER_ID_VAR}");
                return Err(anyhow!("{OWNER_ID_VAR} is not a valid UUID: {e}"));
            }
        },
        Err(_) => {
            warn!("{OWNER_ID_VAR} not set; deploy will be unavailable");
            None
        }
    };

    Ok(CliConfig {
        storage: raw.storage,
        ingest: raw.ingest,
        owner: raw.owner,
        notify: raw.notify,
        owner_id,
    })
}
