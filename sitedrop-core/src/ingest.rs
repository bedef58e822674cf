//! High-level pipeline: inspect → reserve → upload → commit, for every bundle source.
//!
//! [`Ingestor`] is the entry point callers use. It owns the collaborators
//! built at startup and runs one submission as a sequence of stages:
//!   - Inspect the bundle (archive central directory, loose files or a cloned tree).
//!   - Reject the whole submission on structural failures, before any write.
//!   - Reserve the capacity the replacement deployment needs.
//!   - Stream accepted files from a blocking producer through a bounded
//!     channel into a pool of object-store writes, retrying transient failures.
//!     Each submission writes under a fresh deployment prefix of the site
//!     namespace, so the live deployment is never overwritten in place.
//!   - Commit the written totals and the new prefix atomically, then remove
//!     the previous deployment. An aborted submission removes only its own prefix.
//!
//! Per-entry problems (disallowed types, unreadable files, failed writes)
//! are reported on the [`SubmissionReport`] and do not stop the batch.
//! Only one submission per site may be in flight at a time.
//!
//! # Navigation
//! - Submissions: [`Ingestor::submit_archive`], [`Ingestor::submit_files`], [`Ingestor::submit_repository`]
//! - Serving: [`Ingestor::get_served_file`]
//! - Lifecycle and ledger handles: [`Ingestor::lifecycle`], [`Ingestor::ledger`]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::archive::{ArchiveExtractor, ExtractSummary};
use crate::config::IngestConfig;
use crate::contract::{Notification, Notifier, ObjectStore, RepositoryFetcher, SiteRepository};
use crate::error::{ArchiveError, IngestError, StorageError, Violation};
use crate::inspect::{self, BundleEntry, EntryPolicy, InspectOptions, InspectionReport, PreparedFile};
use crate::ledger::QuotaLedger;
use crate::lifecycle::SiteLifecycle;
use crate::model::{
    deployment_namespace, RepoInfo, Site, SiteStatus, SourceType, StoredObject, UploadRecord,
    VerifiedOwner,
};
use crate::path;
use crate::repository::RepositorySource;
use crate::store::SiteStorage;

/// One file of a loose-file submission.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
        }
    }
}

/// Outcome of a committed submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub upload_id: Uuid,
    pub accepted: bool,
    /// Entries skipped during inspection or read-back.
    pub rejected_entries: Vec<Violation>,
    /// Entries whose object-store write failed; not part of the commit.
    pub failed_uploads: Vec<Violation>,
    pub warnings: Vec<String>,
    pub committed_bytes: u64,
    pub committed_files: u64,
    pub serving_subfolder: Option<String>,
    pub index_path: String,
    /// Objects of the previous deployment removed after the commit.
    pub removed_stale: usize,
    pub repo: Option<RepoInfo>,
}

/// A file resolved for serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedFile {
    /// Site-relative path that was actually served.
    pub path: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

type Producer =
    Box<dyn FnOnce(&mut dyn FnMut(PreparedFile) -> bool) -> Result<ExtractSummary, ArchiveError> + Send>;

fn boxed_producer<F>(f: F) -> Producer
where
    F: FnOnce(&mut dyn FnMut(PreparedFile) -> bool) -> Result<ExtractSummary, ArchiveError>
        + Send
        + 'static,
{
    Box::new(f)
}

/// What came out of one upload batch.
struct Batch {
    stored: Vec<StoredObject>,
    failed: Vec<Violation>,
    transient_failures: usize,
    extracted: ExtractSummary,
}

/// Removes the site from the in-flight set when dropped.
struct InFlight {
    sites: Arc<Mutex<HashSet<Uuid>>>,
    site_id: Uuid,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut sites) = self.sites.lock() {
            sites.remove(&self.site_id);
        }
    }
}

#[derive(Clone)]
pub struct Ingestor {
    config: IngestConfig,
    sites: Arc<dyn SiteRepository>,
    storage: SiteStorage,
    ledger: QuotaLedger,
    repos: RepositorySource,
    notifier: Arc<dyn Notifier>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl Ingestor {
    pub fn new(
        config: IngestConfig,
        sites: Arc<dyn SiteRepository>,
        store: Arc<dyn ObjectStore>,
        fetcher: Arc<dyn RepositoryFetcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let storage = SiteStorage::new(store, config.list_page_size);
        let ledger = QuotaLedger::new(sites.clone(), config.quota_warning_ratio);
        let repos = RepositorySource::new(fetcher, &config, Self::pipeline_options(&config));
        Self {
            config,
            sites,
            storage,
            ledger,
            repos,
            notifier,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn pipeline_options(config: &IngestConfig) -> InspectOptions {
        InspectOptions::from_config(config, EntryPolicy::Skip)
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn storage(&self) -> &SiteStorage {
        &self.storage
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Lifecycle operations sharing this ingestor's collaborators.
    pub fn lifecycle(&self) -> SiteLifecycle {
        SiteLifecycle::new(
            self.sites.clone(),
            self.storage.clone(),
            self.ledger.clone(),
            self.notifier.clone(),
            self.config.clone(),
        )
    }

    /// Deploys a ZIP archive to the site.
    pub async fn submit_archive(
        &self,
        owner: &VerifiedOwner,
        site_id: Uuid,
        bytes: Vec<u8>,
    ) -> Result<SubmissionReport, IngestError> {
        let _guard = self.claim(site_id)?;
        let site = self.writable_site(owner, site_id).await?;
        info!(site_id = %site.id, archive_bytes = bytes.len(), "[INGEST] Archive submission received");

        let extractor = ArchiveExtractor::new(
            Self::pipeline_options(&self.config),
            self.config.max_manifest_bytes,
        );
        self.recorded(&site, SourceType::Archive, async {
            let plan = tokio::task::spawn_blocking(move || extractor.plan(bytes))
                .await
                .map_err(|e| IngestError::Internal(format!("archive task failed: {e}")))??;
            let report = plan.report().clone();
            let producer = boxed_producer(move |sink| plan.extract(true, sink));
            self.deploy(&site, SourceType::Archive, report, producer, None)
                .await
        })
        .await
    }

    /// Deploys a set of loose files to the site.
    pub async fn submit_files(
        &self,
        owner: &VerifiedOwner,
        site_id: Uuid,
        files: Vec<UploadedFile>,
    ) -> Result<SubmissionReport, IngestError> {
        let _guard = self.claim(site_id)?;
        let site = self.writable_site(owner, site_id).await?;
        info!(site_id = %site.id, files = files.len(), "[INGEST] File submission received");

        self.recorded(&site, SourceType::Files, async {
            let mut duplicates = Vec::new();
            let mut bodies: HashMap<String, Vec<u8>> = HashMap::with_capacity(files.len());
            let mut entries = Vec::with_capacity(files.len());
            for file in files {
                if bodies.contains_key(&file.path) {
                    duplicates.push(Violation::entry(file.path, "duplicate file path"));
                    continue;
                }
                let entry = if inspect::is_manifest(&file.path)
                    && file.bytes.len() as u64 <= self.config.max_manifest_bytes
                {
                    BundleEntry::with_content(file.path.clone(), file.bytes.clone())
                } else {
                    BundleEntry::new(file.path.clone(), file.bytes.len() as u64)
                };
                entries.push(entry);
                bodies.insert(file.path, file.bytes);
            }

            let mut report = inspect::inspect(&entries, &Self::pipeline_options(&self.config));
            report.rejected_entries.extend(duplicates);

            let wanted: Vec<_> = report.serving_entries().cloned().collect();
            let producer = boxed_producer(move |sink| {
                let mut summary = ExtractSummary::default();
                for entry in wanted {
                    let Some(body) = bodies.remove(&entry.source_path) else {
                        continue;
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
            });
            self.deploy(&site, SourceType::Files, report, producer, None)
                .await
        })
        .await
    }

    /// Clones a repository and deploys its serving folder to the site.
    pub async fn submit_repository(
        &self,
        owner: &VerifiedOwner,
        site_id: Uuid,
        url: &str,
        branch: &str,
    ) -> Result<SubmissionReport, IngestError> {
        let _guard = self.claim(site_id)?;
        let site = self.writable_site(owner, site_id).await?;
        info!(site_id = %site.id, url, branch, "[INGEST] Repository submission received");

        self.recorded(&site, SourceType::Repo, async {
            let checked_out = self.repos.checkout(url, branch).await?;
            let report = checked_out.report.clone();
            let info = checked_out.info.clone();
            let producer = boxed_producer(move |sink| checked_out.extract(true, sink));
            self.deploy(&site, SourceType::Repo, report, producer, Some(info))
                .await
        })
        .await
    }

    /// Resolves `request_path` on an active site.
    ///
    /// Order: the literal file, then `<path>/index.html` for extensionless
    /// paths, then the serving index. Paths are relative to the serving subfolder.
    pub async fn get_served_file(&self, site_id: Uuid, request_path: &str) -> Result<ServedFile, IngestError> {
        let site = self.sites.get_site(site_id).await?;
        let content = match site.content_namespace() {
            Some(content) if site.status == SiteStatus::Active => content,
            _ => return Err(IngestError::NotFound(format!("site {site_id}"))),
        };

        let trimmed = request_path.trim_matches('/');
        let mut candidates = Vec::new();
        if !trimmed.is_empty() {
            if let Ok(clean) = path::validate(trimmed) {
                let full = path::join(site.serving_subfolder.as_deref(), &clean);
                if path::extension(&clean).is_none() {
                    candidates.push(full.clone());
                    candidates.push(format!("{full}/{}", inspect::INDEX_FILE));
                } else {
                    candidates.push(full);
                }
            }
        }
        candidates.push(site.index_path());

        for candidate in candidates {
            match self.storage.get(&content, &candidate).await {
                Ok(object) => {
                    debug!(site_id = %site.id, path = %object.meta.path, "[SERVE] Resolved");
                    return Ok(ServedFile {
                        path: object.meta.path,
                        body: object.body,
                        content_type: object.meta.content_type,
                        cache_control: object.meta.cache_control,
                    });
                }
                Err(StorageError::NotFound(_)) | Err(StorageError::InvalidKey(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(IngestError::NotFound(format!(
            "{request_path:?} on site {site_id}"
        )))
    }

    async fn writable_site(&self, owner: &VerifiedOwner, site_id: Uuid) -> Result<Site, IngestError> {
        let site = self.sites.get_site(site_id).await?;
        if site.status.is_deleted() {
            return Err(IngestError::NotFound(format!("site {site_id}")));
        }
        if !owner.owns(&site) {
            warn!(site_id = %site_id, owner_id = %owner.id(), "[INGEST] Submission for a site the caller does not own");
            return Err(IngestError::Forbidden(site_id));
        }
        if site.status == SiteStatus::Suspended {
            return Err(IngestError::Conflict(format!("site {site_id} is suspended")));
        }
        if self.sites.get_owner(owner.id()).await?.suspended {
            return Err(IngestError::Conflict(format!("owner {} is suspended", owner.id())));
        }
        Ok(site)
    }

    fn claim(&self, site_id: Uuid) -> Result<InFlight, IngestError> {
        let mut sites = self
            .in_flight
            .lock()
            .map_err(|_| IngestError::Internal("in-flight lock poisoned".to_string()))?;
        if !sites.insert(site_id) {
            return Err(IngestError::Conflict(format!(
                "a deployment to site {site_id} is already in progress"
            )));
        }
        Ok(InFlight {
            sites: self.in_flight.clone(),
            site_id,
        })
    }

    /// Wraps a submission in an [`UploadRecord`] that ends completed or failed.
    async fn recorded<F>(&self, site: &Site, source: SourceType, work: F) -> Result<SubmissionReport, IngestError>
    where
        F: std::future::Future<Output = Result<SubmissionReport, IngestError>>,
    {
        let mut record = UploadRecord::start(site.id, source);
        self.save_record(&record).await;
        let result = work.await;
        match &result {
            Ok(report) => {
                record.complete(report.committed_bytes);
                info!(upload_id = %record.id, site_id = %site.id, bytes = report.committed_bytes, "[INGEST] Submission completed");
            }
            Err(e) => {
                record.fail(e.to_string());
                error!(upload_id = %record.id, site_id = %site.id, error = %e, "[INGEST][ERROR] Submission failed");
            }
        }
        self.save_record(&record).await;
        result.map(|mut report| {
            report.upload_id = record.id;
            report
        })
    }

    async fn save_record(&self, record: &UploadRecord) {
        if let Err(e) = self.sites.record_upload(record).await {
            warn!(upload_id = %record.id, error = %e, "[INGEST] Could not persist upload record");
        }
    }

    async fn deploy(
        &self,
        site: &Site,
        source: SourceType,
        report: InspectionReport,
        producer: Producer,
        repo: Option<RepoInfo>,
    ) -> Result<SubmissionReport, IngestError> {
        if !report.valid {
            let warnings = report.warnings.clone();
            let violations = report.errors.clone();
            warn!(site_id = %site.id, violations = violations.len(), "[INGEST] Bundle rejected");
            return Err(match report.build_reason {
                Some(reason) if report.requires_build => IngestError::BuildRequired {
                    reason,
                    violations,
                    warnings,
                },
                _ => IngestError::Validation {
                    violations,
                    warnings,
                },
            });
        }
        let index_path = match report.index_path.as_deref().map(path::to_storage_path) {
            Some(Ok(index)) => index,
            _ => {
                return Err(IngestError::Internal(
                    "valid bundle without a resolvable index".to_string(),
                ))
            }
        };

        let incoming: u64 = report.serving_entries().map(|e| e.size).sum();
        let reservation = self.ledger.precheck(site, incoming).await?;

        let deployment_id = format!("d-{}", Uuid::new_v4().simple());
        let target = deployment_namespace(&site.namespace, &deployment_id);
        debug!(site_id = %site.id, %deployment_id, "[INGEST] Writing new deployment");

        let Batch {
            stored,
            failed: failed_uploads,
            transient_failures,
            extracted,
        } = match self.upload(site, &target, source, producer).await {
            Ok(batch) => batch,
            Err(e) => {
                self.ledger.cancel(reservation).await;
                return Err(e);
            }
        };

        if !stored.iter().any(|o| o.path == index_path) {
            self.ledger.cancel(reservation).await;
            self.discard_deployment(site, &target).await;
            let message = format!("serving index {index_path} could not be stored");
            return Err(if transient_failures > 0 {
                IngestError::TransientStorage(message)
            } else {
                IngestError::Validation {
                    violations: std::iter::once(Violation::bundle(message))
                        .chain(failed_uploads)
                        .collect(),
                    warnings: report.warnings,
                }
            });
        }

        let bytes: u64 = stored.iter().map(|o| o.size).sum();
        let files = stored.len() as u64;
        let index_file = path::file_name(&index_path).to_string();
        let outcome = match self
            .ledger
            .commit(
                reservation,
                deployment_id,
                bytes,
                files,
                report.serving_subfolder.clone(),
                index_file,
                source,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard_deployment(site, &target).await;
                return Err(e);
            }
        };

        let removed_stale = match site.content_namespace() {
            Some(previous) => self.storage.delete_all(&previous).await.deleted,
            None => 0,
        };
        debug!(site_id = %site.id, removed_stale, "[COMMIT] Previous deployment cleaned up");

        if outcome.crossed_warning {
            let notification = Notification::QuotaWarning {
                owner_id: outcome.owner.id,
                used_bytes: outcome.owner.used_bytes,
                max_bytes: outcome.owner.max_bytes,
            };
            if let Err(e) = self.notifier.notify(notification).await {
                error!(owner_id = %outcome.owner.id, error = %e, "[NOTIFY] Quota warning failed; continuing");
            }
        }

        let mut rejected_entries = report.rejected_entries;
        rejected_entries.extend(extracted.skipped);
        Ok(SubmissionReport {
            upload_id: Uuid::nil(),
            accepted: true,
            rejected_entries,
            failed_uploads,
            warnings: report.warnings,
            committed_bytes: bytes,
            committed_files: files,
            serving_subfolder: outcome.site.serving_subfolder.clone(),
            index_path,
            removed_stale,
            repo,
        })
    }

    /// Runs the producer on a blocking thread and writes what it yields into
    /// `target` with bounded concurrency.
    ///
    /// When the producer fails, everything already written to `target` is
    /// discarded before the error is returned.
    async fn upload(
        &self,
        site: &Site,
        target: &str,
        source: SourceType,
        producer: Producer,
    ) -> Result<Batch, IngestError> {
        let concurrency = self.config.upload_concurrency.max(1);
        let (tx, rx) = mpsc::channel::<PreparedFile>(concurrency * 2);
        let extraction = tokio::task::spawn_blocking(move || {
            producer(&mut |file: PreparedFile| tx.blocking_send(file).is_ok())
        });

        let files = stream::unfold(rx, |mut rx| async move {
            let file = rx.recv().await?;
            Some((file, rx))
        });
        let results: Vec<Result<StoredObject, (Violation, bool)>> = files
            .map(|file| self.put_with_retry(target, file, source))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let summary = match extraction.await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                self.discard_deployment(site, target).await;
                return Err(e.into());
            }
            Err(e) => {
                self.discard_deployment(site, target).await;
                return Err(IngestError::Internal(format!("extraction task failed: {e}")));
            }
        };

        let mut batch = Batch {
            stored: Vec::with_capacity(results.len()),
            failed: Vec::new(),
            transient_failures: 0,
            extracted: summary,
        };
        for result in results {
            match result {
                Ok(object) => batch.stored.push(object),
                Err((violation, retryable)) => {
                    if retryable {
                        batch.transient_failures += 1;
                    }
                    batch.failed.push(violation);
                }
            }
        }
        info!(
            site_id = %site.id,
            extracted = batch.extracted.files,
            stored = batch.stored.len(),
            failed = batch.failed.len(),
            "[UPLOAD] Batch written"
        );
        Ok(batch)
    }

    async fn put_with_retry(
        &self,
        namespace: &str,
        file: PreparedFile,
        source: SourceType,
    ) -> Result<StoredObject, (Violation, bool)> {
        let mut attempt = 0u32;
        loop {
            match self
                .storage
                .put(namespace, &file.storage_path, &file.source_path, file.body.clone(), source)
                .await
            {
                Ok(object) => return Ok(object),
                Err(e) if e.is_retryable() && attempt < self.config.upload_retries => {
                    attempt += 1;
                    warn!(path = %file.storage_path, attempt, error = %e, "[UPLOAD] Transient failure; retrying");
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
                Err(e) => {
                    error!(path = %file.storage_path, attempts = attempt + 1, error = %e, "[UPLOAD][ERROR] Write failed");
                    return Err((Violation::entry(file.source_path, e.to_string()), e.is_retryable()));
                }
            }
        }
    }

    /// Best-effort removal of everything an aborted submission wrote.
    async fn discard_deployment(&self, site: &Site, target: &str) {
        let purge = self.storage.delete_all(target).await;
        warn!(site_id = %site.id, removed = purge.deleted, complete = purge.complete, "[INGEST] Discarded writes of aborted submission");
    }
}
