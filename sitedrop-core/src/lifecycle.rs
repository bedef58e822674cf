//! Site lifecycle state machine.
//!
//! ```text
//! pending ──activate──▶ active ◀──activate── inactive
//!                        │  ▲ └──deactivate──▶ inactive
//!               suspend  │  │ unsuspend
//!                        ▼  │
//!                      suspended
//! any non-deleted ──delete──▶ deleted (terminal, soft)
//! ```
//!
//! Entering `active` requires committed files and a serving index that is
//! actually present in the object store. Every write is conditional on the
//! status the transition was computed from, so a concurrent delete or
//! suspension wins over a stale activation.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::contract::{Notification, Notifier, SiteRepository};
use crate::error::IngestError;
use crate::ledger::QuotaLedger;
use crate::model::{Site, SiteStatus, VerifiedOwner};
use crate::store::SiteStorage;

pub const RESERVED_SLUGS: &[&str] = &["www", "api", "admin", "app", "static", "mail"];
pub const MAX_SLUG_LEN: usize = 63;

/// Lower-cases and checks a slug: `[a-z0-9]` with inner hyphens, at most 63 characters.
pub fn validate_slug(slug: &str) -> Result<String, IngestError> {
    let slug = slug.trim().to_ascii_lowercase();
    let pattern = Regex::new(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$")
        .map_err(|e| IngestError::Internal(e.to_string()))?;
    let problem = if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        Some(format!("slug must be 1 to {MAX_SLUG_LEN} characters"))
    } else if !pattern.is_match(&slug) {
        Some("slug may only contain a-z, 0-9 and inner hyphens".to_string())
    } else if RESERVED_SLUGS.contains(&slug.as_str()) {
        Some(format!("slug {slug:?} is reserved"))
    } else {
        None
    };
    match problem {
        Some(message) => Err(IngestError::Validation {
            violations: vec![crate::error::Violation::bundle(message)],
            warnings: Vec::new(),
        }),
        None => Ok(slug),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Activate,
    Deactivate,
    Suspend,
    Unsuspend,
    Delete,
}

impl Transition {
    fn verb(&self) -> &'static str {
        match self {
            Transition::Activate => "activate",
            Transition::Deactivate => "deactivate",
            Transition::Suspend => "suspend",
            Transition::Unsuspend => "unsuspend",
            Transition::Delete => "delete",
        }
    }
}

/// Pure transition table: the status a site moves to, or why it cannot.
pub fn next_status(from: SiteStatus, transition: Transition) -> Result<SiteStatus, IngestError> {
    use SiteStatus::*;
    let to = match (from, transition) {
        (Deleted, _) => return Err(IngestError::NotFound("site".to_string())),
        (Pending | Inactive | Active, Transition::Activate) => Active,
        (Active, Transition::Deactivate) => Inactive,
        (Active, Transition::Suspend) => Suspended,
        (Suspended, Transition::Unsuspend) => Active,
        (_, Transition::Delete) => Deleted,
        (from, transition) => {
            return Err(IngestError::InvalidTransition {
                from: from.to_string(),
                action: transition.verb(),
            })
        }
    };
    Ok(to)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub public_url: String,
    pub deployment_count: u64,
    /// A new commit was activated (as opposed to re-activating the same one).
    pub new_deployment: bool,
}

#[derive(Clone)]
pub struct SiteLifecycle {
    sites: Arc<dyn SiteRepository>,
    storage: SiteStorage,
    ledger: QuotaLedger,
    notifier: Arc<dyn Notifier>,
    config: IngestConfig,
}

impl SiteLifecycle {
    pub fn new(
        sites: Arc<dyn SiteRepository>,
        storage: SiteStorage,
        ledger: QuotaLedger,
        notifier: Arc<dyn Notifier>,
        config: IngestConfig,
    ) -> Self {
        Self {
            sites,
            storage,
            ledger,
            notifier,
            config,
        }
    }

    async fn owned_site(&self, owner: &VerifiedOwner, site_id: Uuid) -> Result<Site, IngestError> {
        let site = self.sites.get_site(site_id).await?;
        if site.status.is_deleted() {
            return Err(IngestError::NotFound(format!("site {site_id}")));
        }
        if !owner.owns(&site) {
            return Err(IngestError::Forbidden(site_id));
        }
        Ok(site)
    }

    /// Publishes the site.
    ///
    /// `deployment_count` and `last_deployed_at` only move when a deployment
    /// was committed since the previous activation; re-activating the same
    /// content just refreshes the public URL.
    pub async fn activate(
        &self,
        owner: &VerifiedOwner,
        site_id: Uuid,
    ) -> Result<Activation, IngestError> {
        let mut site = self.owned_site(owner, site_id).await?;
        let from = site.status;
        site.status = next_status(from, Transition::Activate)?;
        if self.sites.get_owner(site.owner_id).await?.suspended {
            return Err(IngestError::ActivationBlocked(
                "owner account is suspended".to_string(),
            ));
        }

        if site.file_count == 0 {
            return Err(IngestError::ActivationBlocked(
                "site has no deployed files".to_string(),
            ));
        }
        let index_path = site.index_path();
        let Some(content) = site.content_namespace() else {
            return Err(IngestError::ActivationBlocked(
                "site has no committed deployment".to_string(),
            ));
        };
        if self.storage.head(&content, &index_path).await?.is_none() {
            return Err(IngestError::ActivationBlocked(format!(
                "serving index {index_path} is missing from storage"
            )));
        }

        let new_deployment = site.has_undeployed_commit();
        let public_url = self.config.public_url(&site.slug);
        site.public_url = Some(public_url.clone());
        if new_deployment {
            site.last_deployed_at = Some(Utc::now());
            site.deployment_count += 1;
        }
        self.sites.save_lifecycle(&site, from).await?;
        info!(
            site_id = %site.id,
            url = %public_url,
            deployment_count = site.deployment_count,
            new_deployment,
            "[LIFECYCLE] Site activated"
        );

        self.notify(Notification::SiteActivated {
            owner_id: site.owner_id,
            site_id: site.id,
            slug: site.slug.clone(),
            public_url: public_url.clone(),
        })
        .await;

        Ok(Activation {
            public_url,
            deployment_count: site.deployment_count,
            new_deployment,
        })
    }

    pub async fn deactivate(&self, owner: &VerifiedOwner, site_id: Uuid) -> Result<Site, IngestError> {
        let mut site = self.owned_site(owner, site_id).await?;
        let from = site.status;
        site.status = next_status(from, Transition::Deactivate)?;
        self.sites.save_lifecycle(&site, from).await?;
        info!(site_id = %site.id, "[LIFECYCLE] Site deactivated");
        Ok(site)
    }

    /// Platform action: takes an active site offline with a recorded reason.
    pub async fn suspend(&self, site_id: Uuid, reason: &str) -> Result<Site, IngestError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(IngestError::Validation {
                violations: vec![crate::error::Violation::bundle(
                    "a suspension reason is required",
                )],
                warnings: Vec::new(),
            });
        }
        let mut site = self.sites.get_site(site_id).await?;
        let from = site.status;
        site.status = next_status(from, Transition::Suspend)?;
        site.suspension_reason = Some(reason.to_string());
        site.suspended_at = Some(Utc::now());
        self.sites.save_lifecycle(&site, from).await?;
        warn!(site_id = %site.id, reason, "[LIFECYCLE] Site suspended");

        self.notify(Notification::SiteSuspended {
            owner_id: site.owner_id,
            site_id: site.id,
            reason: reason.to_string(),
        })
        .await;
        Ok(site)
    }

    /// Platform action: brings a suspended site back online. Refused while
    /// the owner account itself is suspended.
    pub async fn unsuspend(&self, site_id: Uuid) -> Result<Site, IngestError> {
        let mut site = self.sites.get_site(site_id).await?;
        let from = site.status;
        site.status = next_status(from, Transition::Unsuspend)?;
        if self.sites.get_owner(site.owner_id).await?.suspended {
            return Err(IngestError::ActivationBlocked(
                "owner account is suspended".to_string(),
            ));
        }
        site.suspension_reason = None;
        site.suspended_at = None;
        self.sites.save_lifecycle(&site, from).await?;
        info!(site_id = %site.id, "[LIFECYCLE] Site unsuspended");
        Ok(site)
    }

    /// Soft delete. Quota is returned immediately; objects wait for the sweep.
    pub async fn delete(&self, owner: &VerifiedOwner, site_id: Uuid) -> Result<Site, IngestError> {
        let site = self.owned_site(owner, site_id).await?;
        next_status(site.status, Transition::Delete)?;
        let (site, _) = self.ledger.release_site(site.id).await?;
        info!(site_id = %site.id, "[LIFECYCLE] Site deleted");
        Ok(site)
    }

    /// Suspends the owner and every one of their active sites.
    pub async fn suspend_owner(&self, owner_id: Uuid, reason: &str) -> Result<Vec<Site>, IngestError> {
        self.sites.set_owner_suspended(owner_id, true).await?;
        let mut suspended = Vec::new();
        for site in self.sites.list_sites(owner_id).await? {
            if site.status != SiteStatus::Active {
                continue;
            }
            suspended.push(self.suspend(site.id, reason).await?);
        }
        warn!(%owner_id, sites = suspended.len(), "[LIFECYCLE] Owner suspended");
        Ok(suspended)
    }

    /// Soft-deletes every site of the owner and blocks further activity.
    pub async fn delete_owner(&self, owner_id: Uuid) -> Result<usize, IngestError> {
        self.sites.set_owner_suspended(owner_id, true).await?;
        let mut deleted = 0;
        for site in self.sites.list_sites(owner_id).await? {
            self.ledger.release_site(site.id).await?;
            deleted += 1;
        }
        warn!(%owner_id, deleted, "[LIFECYCLE] Owner deleted");
        Ok(deleted)
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(notification.clone()).await {
            error!(error = %e, ?notification, "[NOTIFY] Notification failed; continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use SiteStatus::*;
        struct TestCase {
            from: SiteStatus,
            transition: Transition,
            expected: Option<SiteStatus>,
        }
        let cases = vec![
            TestCase { from: Pending, transition: Transition::Activate, expected: Some(Active) },
            TestCase { from: Inactive, transition: Transition::Activate, expected: Some(Active) },
            TestCase { from: Active, transition: Transition::Activate, expected: Some(Active) },
            TestCase { from: Suspended, transition: Transition::Activate, expected: None },
            TestCase { from: Active, transition: Transition::Deactivate, expected: Some(Inactive) },
            TestCase { from: Pending, transition: Transition::Deactivate, expected: None },
            TestCase { from: Active, transition: Transition::Suspend, expected: Some(Suspended) },
            TestCase { from: Pending, transition: Transition::Suspend, expected: None },
            TestCase { from: Suspended, transition: Transition::Unsuspend, expected: Some(Active) },
            TestCase { from: Active, transition: Transition::Unsuspend, expected: None },
            TestCase { from: Suspended, transition: Transition::Delete, expected: Some(Deleted) },
            TestCase { from: Pending, transition: Transition::Delete, expected: Some(Deleted) },
            TestCase { from: Deleted, transition: Transition::Delete, expected: None },
            TestCase { from: Deleted, transition: Transition::Activate, expected: None },
        ];
        for tc in cases {
            let got = next_status(tc.from, tc.transition).ok();
            assert_eq!(got, tc.expected, "{:?} --{:?}-->", tc.from, tc.transition);
        }
    }

    #[test]
    fn slug_rules() {
        assert_eq!(validate_slug(" My-Site ").unwrap(), "my-site");
        assert!(validate_slug("-leading").is_err());
        assert!(validate_slug("trailing-").is_err());
        assert!(validate_slug("under_score").is_err());
        assert!(validate_slug("admin").is_err());
        assert!(validate_slug(&"a".repeat(64)).is_err());
        assert!(validate_slug("a").is_ok());
    }
}
