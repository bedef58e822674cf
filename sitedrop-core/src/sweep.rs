//! Background reclamation of storage held by soft-deleted sites.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::contract::SiteRepository;
use crate::error::IngestError;
use crate::store::SiteStorage;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sites_reclaimed: usize,
    pub objects_deleted: usize,
    /// Sites left unreclaimed by this pass; the next pass retries them.
    pub failed_sites: Vec<Uuid>,
}

/// Empties the namespace of every deleted, unreclaimed site and marks it
/// reclaimed. A site is only marked once its namespace was fully purged.
pub async fn reclaim_deleted(
    sites: &dyn SiteRepository,
    storage: &SiteStorage,
) -> Result<SweepReport, IngestError> {
    let pending = sites.list_unreclaimed_deleted().await?;
    let mut report = SweepReport::default();
    for site in pending {
        let purge = storage.delete_all(&site.namespace).await;
        report.objects_deleted += purge.deleted;
        if !purge.complete {
            warn!(site_id = %site.id, deleted = purge.deleted, "[SWEEP] Namespace only partly purged; will retry");
            report.failed_sites.push(site.id);
            continue;
        }
        match sites.mark_reclaimed(site.id).await {
            Ok(()) => report.sites_reclaimed += 1,
            Err(e) => {
                warn!(site_id = %site.id, error = %e, "[SWEEP] Could not mark site reclaimed");
                report.failed_sites.push(site.id);
            }
        }
    }
    info!(
        sites = report.sites_reclaimed,
        objects = report.objects_deleted,
        failed = report.failed_sites.len(),
        "[SWEEP] Reclamation pass finished"
    );
    Ok(report)
}

/// Runs [`reclaim_deleted`] every `interval` until `shutdown` becomes `true`.
pub fn spawn_sweeper(
    sites: Arc<dyn SiteRepository>,
    storage: SiteStorage,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = reclaim_deleted(sites.as_ref(), &storage).await {
                        error!(error = %e, "[SWEEP][ERROR] Reclamation pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("[SWEEP] Shutting down");
                        break;
                    }
                }
            }
        }
    })
}
