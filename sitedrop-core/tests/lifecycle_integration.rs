mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{files, Harness, INDEX_HTML};
use sitedrop_core::contract::{
    DeployCommit, MockNotifier, MockRepositoryFetcher, Notification, NullNotifier, SiteRepository,
};
use sitedrop_core::error::{IngestError, RepoError};
use sitedrop_core::ledger::QuotaLedger;
use sitedrop_core::lifecycle::SiteLifecycle;
use sitedrop_core::memory::MemorySiteRepository;
use sitedrop_core::model::{Owner, Site, SiteStatus, UploadRecord, VerifiedOwner};
use uuid::Uuid;

/// Soft-deletes `victim` the moment anyone looks up an owner, so a
/// transition that already read the site races a concurrent delete.
struct DeletesOnOwnerLookup {
    inner: Arc<MemorySiteRepository>,
    victim: Uuid,
}

#[async_trait]
impl SiteRepository for DeletesOnOwnerLookup {
    async fn get_owner(&self, owner_id: Uuid) -> Result<Owner, RepoError> {
        let _ = self.inner.soft_delete_site(self.victim).await;
        self.inner.get_owner(owner_id).await
    }
    async fn get_site(&self, site_id: Uuid) -> Result<Site, RepoError> {
        self.inner.get_site(site_id).await
    }
    async fn create_site(&self, site: Site) -> Result<Site, RepoError> {
        self.inner.create_site(site).await
    }
    async fn list_sites(&self, owner_id: Uuid) -> Result<Vec<Site>, RepoError> {
        self.inner.list_sites(owner_id).await
    }
    async fn reserve_bytes(&self, owner_id: Uuid, bytes: u64) -> Result<Owner, RepoError> {
        self.inner.reserve_bytes(owner_id, bytes).await
    }
    async fn release_reservation(&self, owner_id: Uuid, bytes: u64) -> Result<(), RepoError> {
        self.inner.release_reservation(owner_id, bytes).await
    }
    async fn commit_deploy(&self, commit: DeployCommit) -> Result<(Site, Owner), RepoError> {
        self.inner.commit_deploy(commit).await
    }
    async fn soft_delete_site(&self, site_id: Uuid) -> Result<(Site, Owner), RepoError> {
        self.inner.soft_delete_site(site_id).await
    }
    async fn save_lifecycle(&self, site: &Site, expected: SiteStatus) -> Result<(), RepoError> {
        self.inner.save_lifecycle(site, expected).await
    }
    async fn set_owner_suspended(&self, owner_id: Uuid, suspended: bool) -> Result<(), RepoError> {
        self.inner.set_owner_suspended(owner_id, suspended).await
    }
    async fn list_unreclaimed_deleted(&self) -> Result<Vec<Site>, RepoError> {
        self.inner.list_unreclaimed_deleted().await
    }
    async fn mark_reclaimed(&self, site_id: Uuid) -> Result<(), RepoError> {
        self.inner.mark_reclaimed(site_id).await
    }
    async fn record_upload(&self, record: &UploadRecord) -> Result<(), RepoError> {
        self.inner.record_upload(record).await
    }
}

async fn deployed(h: &Harness, slug: &str) -> Uuid {
    let site = h.site(slug).await;
    h.ingestor
        .submit_files(
            &h.owner,
            site.id,
            files(&[("index.html", INDEX_HTML), ("app.css", b"p{}")]),
        )
        .await
        .unwrap();
    site.id
}

#[tokio::test]
async fn activation_counts_only_new_deployments() {
    let h = Harness::new(100_000);
    let site_id = deployed(&h, "counted").await;
    let lifecycle = h.ingestor.lifecycle();

    let first = lifecycle.activate(&h.owner, site_id).await.unwrap();
    assert_eq!(first.public_url, "https://counted.sites.localhost");
    assert_eq!(first.deployment_count, 1);
    assert!(first.new_deployment);

    let again = lifecycle.activate(&h.owner, site_id).await.unwrap();
    assert_eq!(again.deployment_count, 1);
    assert!(!again.new_deployment);

    h.ingestor
        .submit_files(&h.owner, site_id, files(&[("index.html", b"<p>v2</p>")]))
        .await
        .unwrap();
    let redeployed = lifecycle.activate(&h.owner, site_id).await.unwrap();
    assert_eq!(redeployed.deployment_count, 2);

    let site = h.site_record(site_id).await;
    assert_eq!(site.status, SiteStatus::Active);
    assert!(site.last_deployed_at.is_some());
}

#[tokio::test]
async fn empty_site_cannot_be_activated() {
    let h = Harness::new(1000);
    let site = h.site("empty").await;
    let result = h.ingestor.lifecycle().activate(&h.owner, site.id).await;
    assert!(matches!(result, Err(IngestError::ActivationBlocked(_))));
    assert_eq!(h.site_record(site.id).await.status, SiteStatus::Pending);
}

#[tokio::test]
async fn missing_index_object_blocks_activation() {
    let h = Harness::new(100_000);
    let site_id = deployed(&h, "lost-index").await;
    let content = h.site_record(site_id).await.content_namespace().unwrap();
    h.ingestor
        .storage()
        .delete(&content, "index.html")
        .await
        .unwrap();

    let result = h.ingestor.lifecycle().activate(&h.owner, site_id).await;
    match result {
        Err(IngestError::ActivationBlocked(reason)) => assert!(reason.contains("index.html")),
        other => panic!("expected activation to be blocked, got {other:?}"),
    }
}

#[tokio::test]
async fn notifier_failure_does_not_abort_activation() {
    let mut notifier = MockNotifier::new();
    notifier
        .expect_notify()
        .withf(|n| matches!(n, Notification::SiteActivated { .. }))
        .times(1)
        .returning(|_| Err("webhook down".into()));
    let h = Harness::build(100_000, 5, MockRepositoryFetcher::new(), Arc::new(notifier));
    let site_id = deployed(&h, "loud").await;

    let activation = h.ingestor.lifecycle().activate(&h.owner, site_id).await;
    assert!(activation.is_ok(), "{activation:?}");
}

#[tokio::test]
async fn suspension_requires_a_reason_and_is_reversible() {
    let mut notifier = MockNotifier::new();
    notifier.expect_notify().returning(|_| Ok(()));
    let h = Harness::build(100_000, 5, MockRepositoryFetcher::new(), Arc::new(notifier));
    let site_id = deployed(&h, "naughty").await;
    let lifecycle = h.ingestor.lifecycle();
    lifecycle.activate(&h.owner, site_id).await.unwrap();

    assert!(matches!(
        lifecycle.suspend(site_id, "   ").await,
        Err(IngestError::Validation { .. })
    ));
    let suspended = lifecycle.suspend(site_id, "phishing report").await.unwrap();
    assert_eq!(suspended.status, SiteStatus::Suspended);
    assert_eq!(suspended.suspension_reason.as_deref(), Some("phishing report"));

    assert!(matches!(
        lifecycle.activate(&h.owner, site_id).await,
        Err(IngestError::InvalidTransition { .. })
    ));

    let restored = lifecycle.unsuspend(site_id).await.unwrap();
    assert_eq!(restored.status, SiteStatus::Active);
    let stored = h.site_record(site_id).await;
    assert!(stored.suspension_reason.is_none());
    assert!(stored.suspended_at.is_none());
}

#[tokio::test]
async fn activation_racing_a_delete_does_not_resurrect_the_site() {
    let h = Harness::new(100_000);
    let site_id = deployed(&h, "doomed").await;
    let racing: Arc<dyn SiteRepository> = Arc::new(DeletesOnOwnerLookup {
        inner: h.repo.clone(),
        victim: site_id,
    });
    let lifecycle = SiteLifecycle::new(
        racing.clone(),
        h.ingestor.storage().clone(),
        QuotaLedger::new(racing, h.ingestor.config().quota_warning_ratio),
        Arc::new(NullNotifier),
        h.ingestor.config().clone(),
    );

    let result = lifecycle.activate(&h.owner, site_id).await;
    assert!(matches!(result, Err(IngestError::NotFound(_))), "{result:?}");

    let site = h.site_record(site_id).await;
    assert_eq!(site.status, SiteStatus::Deleted);
    assert!(site.public_url.is_none());
    assert_eq!(site.deployment_count, 0);
    let owner = h.owner_record().await;
    assert_eq!(owner.used_bytes, 0);
    assert_eq!(owner.used_sites, 0);
}

#[tokio::test]
async fn lifecycle_writes_are_conditional_on_the_status_they_read() {
    let h = Harness::new(100_000);
    let site_id = deployed(&h, "stale").await;
    let mut stale = h.site_record(site_id).await;
    h.ingestor.lifecycle().delete(&h.owner, site_id).await.unwrap();

    stale.status = SiteStatus::Active;
    let result = h.repo.save_lifecycle(&stale, SiteStatus::Pending).await;
    assert_eq!(
        result,
        Err(RepoError::StatusChanged {
            site_id,
            expected: SiteStatus::Pending,
            actual: SiteStatus::Deleted,
        })
    );
    assert_eq!(h.site_record(site_id).await.status, SiteStatus::Deleted);
}

#[tokio::test]
async fn deactivate_only_from_active() {
    let h = Harness::new(100_000);
    let site_id = deployed(&h, "toggle").await;
    let lifecycle = h.ingestor.lifecycle();
    assert!(matches!(
        lifecycle.deactivate(&h.owner, site_id).await,
        Err(IngestError::InvalidTransition { .. })
    ));
    lifecycle.activate(&h.owner, site_id).await.unwrap();
    let site = lifecycle.deactivate(&h.owner, site_id).await.unwrap();
    assert_eq!(site.status, SiteStatus::Inactive);
    lifecycle.activate(&h.owner, site_id).await.unwrap();
}

#[tokio::test]
async fn suspending_an_owner_cascades_to_active_sites() {
    let h = Harness::new(100_000);
    let live = deployed(&h, "live").await;
    let draft = deployed(&h, "draft").await;
    let lifecycle = h.ingestor.lifecycle();
    lifecycle.activate(&h.owner, live).await.unwrap();

    let suspended = lifecycle
        .suspend_owner(h.owner.id(), "unpaid invoices")
        .await
        .unwrap();
    assert_eq!(suspended.len(), 1);
    assert_eq!(h.site_record(live).await.status, SiteStatus::Suspended);
    assert_eq!(h.site_record(draft).await.status, SiteStatus::Pending);

    let blocked = h
        .ingestor
        .submit_files(&h.owner, draft, files(&[("index.html", INDEX_HTML)]))
        .await;
    assert!(matches!(blocked, Err(IngestError::Conflict(_))));
    assert!(matches!(
        lifecycle.activate(&h.owner, draft).await,
        Err(IngestError::ActivationBlocked(_))
    ));

    let result = lifecycle.unsuspend(live).await;
    assert!(matches!(result, Err(IngestError::ActivationBlocked(_))), "{result:?}");
    assert_eq!(h.site_record(live).await.status, SiteStatus::Suspended);

    h.repo.set_owner_suspended(h.owner.id(), false).await.unwrap();
    let restored = lifecycle.unsuspend(live).await.unwrap();
    assert_eq!(restored.status, SiteStatus::Active);
}

#[tokio::test]
async fn deleting_an_owner_soft_deletes_every_site() {
    let h = Harness::new(100_000);
    let a = deployed(&h, "gone-a").await;
    let b = deployed(&h, "gone-b").await;

    let deleted = h.ingestor.lifecycle().delete_owner(h.owner.id()).await.unwrap();
    assert_eq!(deleted, 2);
    for id in [a, b] {
        assert_eq!(h.site_record(id).await.status, SiteStatus::Deleted);
    }
    let owner = h.owner_record().await;
    assert_eq!(owner.used_bytes, 0);
    assert_eq!(owner.used_sites, 0);
}

#[tokio::test]
async fn other_owners_cannot_change_a_site() {
    let h = Harness::new(100_000);
    let site_id = deployed(&h, "private").await;
    let stranger = VerifiedOwner::new(Uuid::new_v4());
    let lifecycle = h.ingestor.lifecycle();
    assert!(matches!(
        lifecycle.activate(&stranger, site_id).await,
        Err(IngestError::Forbidden(_))
    ));
    assert!(matches!(
        lifecycle.delete(&stranger, site_id).await,
        Err(IngestError::Forbidden(_))
    ));
}

#[tokio::test]
async fn deleted_sites_are_gone_and_slug_is_free_again() {
    let h = Harness::new(100_000);
    let site_id = deployed(&h, "reuse").await;
    let lifecycle = h.ingestor.lifecycle();
    lifecycle.delete(&h.owner, site_id).await.unwrap();
    assert!(matches!(
        lifecycle.activate(&h.owner, site_id).await,
        Err(IngestError::NotFound(_))
    ));
    h.site("reuse").await;
}
