//! # repository: bundles checked out from a remote git repository
//!
//! A repository submission goes through four steps:
//!   1. The URL and branch are checked against a fixed allow-list ([`validate_url`], [`validate_branch`]).
//!   2. A [`RepositoryFetcher`] performs a shallow, single-branch clone into a fresh [`ScratchDir`].
//!   3. The working tree is listed (never `.git/`) and inspected like any other bundle.
//!   4. Accepted files under the serving subfolder are read back and handed to a sink.
//!
//! ## Cleanup
//! The scratch directory is owned by [`CheckedOut`]. Dropping it removes the
//! tree, whether the submission succeeded, failed, panicked or was cancelled.
//! [`sweep_stale_scratch`] removes whatever a crashed process left behind.
//!
//! ## Default fetcher
//! [`GitCli`] shells out to `git` with prompts disabled, a hard timeout and
//! kill-on-drop, so a hung clone cannot outlive its caller.

use std::fs;
use std::io::{self, Read};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use regex::Regex;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::archive::ExtractSummary;
use crate::config::IngestConfig;
use crate::contract::RepositoryFetcher;
use crate::error::{ArchiveError, CloneError, IngestError, Violation};
use crate::inspect::{self, BundleEntry, EntryPolicy, InspectOptions, InspectionReport, PreparedFile};
use crate::model::RepoInfo;

pub const DEFAULT_BRANCH: &str = "main";
pub const SCRATCH_PREFIX: &str = "sitedrop-clone-";
const MAX_BRANCH_LEN: usize = 255;

/// Well-known forge URL shapes, checked before the generic pattern.
pub const KNOWN_HOST_PATTERNS: &[&str] = &[
    r"^https://github\.com/[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+?(\.git)?/?$",
    r"^https://gitlab\.com/[A-Za-z0-9_.-]+(/[A-Za-z0-9_.-]+)+?(\.git)?/?$",
    r"^https://bitbucket\.org/[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+?(\.git)?/?$",
    r"^https://codeberg\.org/[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+?(\.git)?/?$",
];

/// Any other host, as long as it is plain https with a conventional path.
pub const GENERIC_HTTPS_PATTERN: &str =
    r"^https://[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+(:[0-9]{1,5})?(/[A-Za-z0-9_.-]+)+/?$";

fn url_error(url: &str, reason: &str) -> CloneError {
    CloneError::InvalidUrl(format!("{url}: {reason}"))
}

/// Checks a clone URL and returns it trimmed.
pub fn validate_url(url: &str) -> Result<String, CloneError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(url_error(url, "empty"));
    }
    if url.starts_with('-') {
        return Err(url_error(url, "must not start with '-'"));
    }
    if url.to_ascii_lowercase().starts_with("file:") {
        return Err(url_error(url, "local file URLs are not allowed"));
    }
    if url.contains("..") || url.contains('~') {
        return Err(url_error(url, "traversal and home-relative tokens are not allowed"));
    }
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(url_error(url, "contains whitespace or control characters"));
    }
    if !url.starts_with("https://") {
        return Err(url_error(url, "only https URLs are supported"));
    }
    let host = url["https://".len()..]
        .split(['/', ':', '?', '#'])
        .next()
        .unwrap_or_default();
    if host.starts_with('[') || host.parse::<Ipv4Addr>().is_ok() {
        return Err(url_error(url, "IP address hosts are not allowed"));
    }
    match host.rsplit_once('.') {
        None => return Err(url_error(url, "single-label hosts are not allowed")),
        Some((_, tld)) if tld.chars().all(|c| c.is_ascii_digit()) => {
            return Err(url_error(url, "numeric top-level labels are not allowed"))
        }
        Some(_) => {}
    }

    for pattern in KNOWN_HOST_PATTERNS.iter().chain([&GENERIC_HTTPS_PATTERN]) {
        let re = Regex::new(pattern).map_err(|e| CloneError::InvalidUrl(e.to_string()))?;
        if re.is_match(url) {
            return Ok(url.to_string());
        }
    }
    Err(url_error(url, "not a recognised repository URL"))
}

/// Checks a branch name; an empty name means [`DEFAULT_BRANCH`].
pub fn validate_branch(branch: &str) -> Result<String, CloneError> {
    let branch = branch.trim();
    if branch.is_empty() {
        return Ok(DEFAULT_BRANCH.to_string());
    }
    let reject = |reason: &str| Err(CloneError::InvalidBranch(format!("{branch}: {reason}")));
    if branch.len() > MAX_BRANCH_LEN {
        return reject("too long");
    }
    if branch.starts_with('-') || branch.starts_with('/') || branch.ends_with('/') {
        return reject("must not start with '-' or start/end with '/'");
    }
    if branch.contains("..") || branch.contains("//") || branch.ends_with(".lock") {
        return reject("contains a forbidden sequence");
    }
    if !branch
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'))
    {
        return reject("may only contain A-Z, a-z, 0-9, '.', '_', '/' and '-'");
    }
    Ok(branch.to_string())
}

/// Uniquely named temporary directory for one clone; removed on drop.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn create(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let prefix = format!("{SCRATCH_PREFIX}{}-", Uuid::new_v4().simple());
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(root)?;
        debug!(path = %dir.path().display(), "[CLONE] Scratch directory created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        debug!(path = %self.dir.path().display(), "[CLONE] Removing scratch directory");
    }
}

/// Removes scratch directories older than `max_age` under `root`.
///
/// Returns how many were removed. Entries that are not ours, or that cannot
/// be inspected, are left alone.
pub fn sweep_stale_scratch(root: &Path, max_age: Duration) -> io::Result<usize> {
    if !root.exists() {
        return Ok(0);
    }
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(SCRATCH_PREFIX) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_dir() => meta,
            _ => continue,
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                info!(path = %entry.path().display(), age_secs = age.as_secs(), "[CLONE] Removed stale scratch directory");
                removed += 1;
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "[CLONE] Could not remove stale scratch directory"),
        }
    }
    Ok(removed)
}

/// Files found in a working tree, with symlinks reported separately.
#[derive(Debug, Default)]
pub struct TreeListing {
    pub entries: Vec<BundleEntry>,
    pub symlinks: Vec<String>,
}

/// Recursively lists regular files under `root`, relative and `/`-separated.
/// `.git/` is never descended into.
pub fn list_tree(root: &Path) -> io::Result<TreeListing> {
    let mut listing = TreeListing::default();
    visit_dir(root, root, &mut listing)?;
    listing.entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(listing)
}

fn visit_dir(root: &Path, dir: &Path, listing: &mut TreeListing) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let relative = relative_path(root, &path);
        if file_type.is_symlink() {
            listing.symlinks.push(relative);
        } else if file_type.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            visit_dir(root, &path, listing)?;
        } else if file_type.is_file() {
            let size = entry.metadata()?.len();
            listing.entries.push(BundleEntry::new(relative, size));
        }
    }
    Ok(())
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lists and inspects a checked-out tree. Blocking.
pub fn scan_tree(
    root: &Path,
    options: &InspectOptions,
    max_manifest_bytes: u64,
) -> io::Result<InspectionReport> {
    let TreeListing {
        mut entries,
        symlinks,
    } = list_tree(root)?;
    for entry in entries.iter_mut() {
        if inspect::is_manifest(&entry.path) && entry.size <= max_manifest_bytes {
            entry.content = Some(fs::read(root.join(&entry.path))?);
        }
    }
    let mut report = inspect::inspect(&entries, options);
    let links: Vec<Violation> = symlinks
        .into_iter()
        .map(|link| Violation::entry(link, "symbolic links are not allowed"))
        .collect();
    if !links.is_empty() {
        if options.policy == EntryPolicy::Strict {
            report.errors.extend(links.iter().cloned());
            report.valid = false;
        }
        report.rejected_entries.extend(links);
    }
    Ok(report)
}

/// A cloned and inspected repository whose scratch tree is still on disk.
#[derive(Debug)]
pub struct CheckedOut {
    scratch: ScratchDir,
    pub info: RepoInfo,
    pub report: InspectionReport,
}

impl CheckedOut {
    pub fn root(&self) -> &Path {
        self.scratch.path()
    }

    /// Reads accepted files back from the scratch tree and passes each to `sink`.
    ///
    /// Files that changed size or vanished since listing are skipped and
    /// reported. The scratch tree is removed when this returns.
    pub fn extract<F>(self, only_serving: bool, mut sink: F) -> Result<ExtractSummary, ArchiveError>
    where
        F: FnMut(PreparedFile) -> bool,
    {
        let wanted: Vec<_> = if only_serving {
            self.report.serving_entries().cloned().collect()
        } else {
            self.report.accepted.clone()
        };

        let mut summary = ExtractSummary::default();
        for entry in wanted {
            let full = self.root().join(&entry.source_path);
            let body = match read_capped(&full, entry.size) {
                Ok(body) => body,
                Err(e) => {
                    warn!(path = %entry.source_path, error = %e, "[CLONE] Skipping unreadable file");
                    summary
                        .skipped
                        .push(Violation::entry(entry.source_path, e.to_string()));
                    continue;
                }
            };
            summary.files += 1;
            summary.bytes += body.len() as u64;
            let prepared = PreparedFile {
                source_path: entry.source_path,
                storage_path: entry.storage_path,
                body,
            };
            if !sink(prepared) {
                return Err(ArchiveError::Cancelled);
            }
        }
        Ok(summary)
    }
}

fn read_capped(path: &Path, declared: u64) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(declared as usize);
    fs::File::open(path)?
        .take(declared + 1)
        .read_to_end(&mut body)?;
    if body.len() as u64 != declared {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("file changed size since listing (expected {declared} bytes)"),
        ));
    }
    Ok(body)
}

/// Clones, lists and inspects repositories.
#[derive(Clone)]
pub struct RepositorySource {
    fetcher: Arc<dyn RepositoryFetcher>,
    scratch_root: PathBuf,
    options: InspectOptions,
    max_manifest_bytes: u64,
}

impl RepositorySource {
    pub fn new(fetcher: Arc<dyn RepositoryFetcher>, config: &IngestConfig, options: InspectOptions) -> Self {
        Self {
            fetcher,
            scratch_root: config.scratch_root(),
            options,
            max_manifest_bytes: config.max_manifest_bytes,
        }
    }

    /// Clones `url` at `branch` into a fresh scratch directory and inspects it.
    pub async fn checkout(&self, url: &str, branch: &str) -> Result<CheckedOut, IngestError> {
        let url = validate_url(url)?;
        let branch = validate_branch(branch)?;
        let scratch = ScratchDir::create(&self.scratch_root).map_err(CloneError::from)?;

        info!(url = %url, branch = %branch, path = %scratch.path().display(), "[CLONE] Cloning repository");
        let info = match self.fetcher.fetch(&url, &branch, scratch.path()).await {
            Ok(info) => info,
            Err(e) => {
                error!(url = %url, branch = %branch, error = %e, "[CLONE][ERROR] Clone failed");
                return Err(e.into());
            }
        };
        info!(url = %url, commit = %info.commit_hash, "[CLONE] Clone succeeded");

        let root = scratch.path().to_path_buf();
        let options = self.options.clone();
        let max_manifest_bytes = self.max_manifest_bytes;
        let report = tokio::task::spawn_blocking(move || scan_tree(&root, &options, max_manifest_bytes))
            .await
            .map_err(|e| IngestError::Internal(format!("tree scan task failed: {e}")))?
            .map_err(CloneError::from)?;

        Ok(CheckedOut {
            scratch,
            info,
            report,
        })
    }
}

/// [`RepositoryFetcher`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl GitCli {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(Duration::from_secs(config.clone_timeout_secs))
    }

    async fn run(&self, mut cmd: Command) -> Result<Vec<u8>, CloneError> {
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|e| CloneError::Launch(e.to_string()))?;
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| CloneError::Launch(e.to_string()))?,
            Err(_) => return Err(CloneError::Timeout(self.timeout.as_secs())),
        };
        if !output.status.success() {
            return Err(CloneError::GitFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl RepositoryFetcher for GitCli {
    async fn fetch(&self, url: &str, branch: &str, dest: &Path) -> Result<RepoInfo, CloneError> {
        let mut clone = Command::new("git");
        clone
            .arg("clone")
            .args(["--depth", "1", "--single-branch", "--no-tags", "--branch"])
            .arg(branch)
            .arg("--")
            .arg(url)
            .arg(dest);
        self.run(clone).await?;

        let mut rev_parse = Command::new("git");
        rev_parse.arg("-C").arg(dest).args(["rev-parse", "HEAD"]);
        let stdout = self.run(rev_parse).await?;
        Ok(RepoInfo {
            commit_hash: String::from_utf8_lossy(&stdout).trim().to_string(),
            branch: branch.to_string(),
        })
    }
}
