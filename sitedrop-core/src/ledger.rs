//! Quota accounting over owners and their sites.
//!
//! # Invariants
//! - `site.bytes_used` equals the bytes of the site's currently committed objects.
//! - `owner.used_bytes` equals the sum of `bytes_used` over the owner's non-deleted sites.
//! - `owner.used_bytes` never exceeds `owner.max_bytes`.
//!
//! Capacity is held with a reservation before any object is written and
//! converted into usage by a conditional commit once every write has settled.
//! Two concurrent submissions for one owner therefore cannot both pass the
//! pre-check when together they would overflow the ceiling.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::contract::{DeployCommit, SiteRepository};
use crate::error::{IngestError, RepoError};
use crate::lifecycle::validate_slug;
use crate::model::{Owner, Site, SourceType, VerifiedOwner};

/// Capacity held for one in-flight submission.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation must be committed or cancelled"]
pub struct Reservation {
    pub owner_id: Uuid,
    pub site_id: Uuid,
    pub bytes: u64,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub site: Site,
    pub owner: Owner,
    /// The commit pushed the owner past the warning ratio.
    pub crossed_warning: bool,
}

#[derive(Clone)]
pub struct QuotaLedger {
    sites: Arc<dyn SiteRepository>,
    warning_ratio: f64,
}

impl QuotaLedger {
    pub fn new(sites: Arc<dyn SiteRepository>, warning_ratio: f64) -> Self {
        Self {
            sites,
            warning_ratio,
        }
    }

    /// Creates a pending site after checking the slug and the owner's site-count quota.
    pub async fn create_site(&self, owner: &VerifiedOwner, slug: &str) -> Result<Site, IngestError> {
        let slug = validate_slug(slug)?;
        let site = self.sites.create_site(Site::new(owner.id(), slug)).await?;
        info!(site_id = %site.id, owner_id = %owner.id(), slug = %site.slug, "[LEDGER] Site created");
        Ok(site)
    }

    /// Rejects the batch up front when it cannot fit, otherwise holds the capacity.
    ///
    /// Deployments replace the site's previous content, so only the growth
    /// over the site's current usage counts against the owner.
    pub async fn precheck(&self, site: &Site, incoming: u64) -> Result<Reservation, IngestError> {
        let needed = incoming.saturating_sub(site.bytes_used);
        match self.sites.reserve_bytes(site.owner_id, needed).await {
            Ok(owner) => {
                info!(
                    site_id = %site.id,
                    incoming,
                    reserved = needed,
                    owner_used = owner.used_bytes,
                    owner_max = owner.max_bytes,
                    "[LEDGER] Capacity reserved"
                );
                Ok(Reservation {
                    owner_id: site.owner_id,
                    site_id: site.id,
                    bytes: needed,
                })
            }
            Err(RepoError::QuotaExceeded { available, required }) => {
                warn!(site_id = %site.id, available, required, "[LEDGER] Batch rejected by quota pre-check");
                Err(IngestError::QuotaExceeded { available, required })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns held capacity without charging anything.
    pub async fn cancel(&self, reservation: Reservation) {
        if let Err(e) = self
            .sites
            .release_reservation(reservation.owner_id, reservation.bytes)
            .await
        {
            warn!(owner_id = %reservation.owner_id, bytes = reservation.bytes, error = %e, "[LEDGER] Failed to release reservation");
        }
    }

    /// Atomically folds the written batch into site and owner usage and makes
    /// `deployment_id` the site's live deployment.
    #[allow(clippy::too_many_arguments)]
    pub async fn commit(
        &self,
        reservation: Reservation,
        deployment_id: String,
        bytes: u64,
        files: u64,
        serving_subfolder: Option<String>,
        index_file: String,
        source: SourceType,
    ) -> Result<CommitOutcome, IngestError> {
        let before = self.sites.get_owner(reservation.owner_id).await?;
        let commit = DeployCommit {
            site_id: reservation.site_id,
            deployment_id,
            reserved_bytes: reservation.bytes,
            bytes,
            files,
            serving_subfolder,
            index_file,
            source,
        };
        match self.sites.commit_deploy(commit).await {
            Ok((site, owner)) => {
                let crossed_warning = self.crosses_warning(before.used_bytes, &owner);
                info!(
                    site_id = %site.id,
                    bytes,
                    files,
                    owner_used = owner.used_bytes,
                    "[COMMIT] Usage committed"
                );
                Ok(CommitOutcome {
                    site,
                    owner,
                    crossed_warning,
                })
            }
            Err(e) => {
                self.cancel(reservation).await;
                Err(e.into())
            }
        }
    }

    /// Soft-deletes a site and returns its usage and slot to the owner.
    pub async fn release_site(&self, site_id: Uuid) -> Result<(Site, Owner), IngestError> {
        let (site, owner) = self.sites.soft_delete_site(site_id).await?;
        info!(
            site_id = %site.id,
            released_bytes = site.bytes_used,
            owner_used = owner.used_bytes,
            owner_sites = owner.used_sites,
            "[LEDGER] Site usage released"
        );
        Ok((site, owner))
    }

    fn crosses_warning(&self, before: u64, owner: &Owner) -> bool {
        if owner.max_bytes == 0 {
            return false;
        }
        let threshold = (owner.max_bytes as f64 * self.warning_ratio) as u64;
        before <= threshold && owner.used_bytes > threshold
    }
}
