use std::sync::Arc;

use sitedrop::store::FsObjectStore;
use sitedrop_core::config::IngestConfig;
use sitedrop_core::contract::{NullNotifier, ObjectStore};
use sitedrop_core::error::StorageError;
use sitedrop_core::ingest::{Ingestor, UploadedFile};
use sitedrop_core::memory::MemorySiteRepository;
use sitedrop_core::model::{Owner, SourceType, VerifiedOwner};
use sitedrop_core::repository::GitCli;
use sitedrop_core::store::SiteStorage;
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
async fn objects_round_trip_with_metadata() {
    let dir = TempDir::new().unwrap();
    let storage = SiteStorage::new(Arc::new(FsObjectStore::new(dir.path())), 100);

    let body = b"a { color: red }".to_vec();
    storage
        .put("site-1", "a/b.css", "a/b.css", body.clone(), SourceType::Files)
        .await
        .unwrap();

    let fetched = storage.get("site-1", "a/b.css").await.unwrap();
    assert_eq!(fetched.body, body);
    assert_eq!(fetched.meta.path, "a/b.css");
    assert!(fetched.meta.content_type.starts_with("text/css"));
    assert!(dir.path().join("objects/site-1/a/b.css").is_file());
    assert!(dir.path().join("meta/site-1/a/b.css.json").is_file());

    assert!(storage.head("site-1", "missing.css").await.unwrap().is_none());
    assert!(matches!(
        storage.get("site-1", "missing.css").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn listing_pages_stay_inside_the_namespace() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FsObjectStore::new(dir.path()));
    let storage = SiteStorage::new(store.clone(), 2);
    for path in ["index.html", "a.css", "img/b.png"] {
        storage
            .put("site-1", path, path, b"x".to_vec(), SourceType::Archive)
            .await
            .unwrap();
    }
    storage
        .put("site-10", "index.html", "index.html", b"y".to_vec(), SourceType::Archive)
        .await
        .unwrap();

    let first = store.list("site-1/", None, 2).await.unwrap();
    assert_eq!(first.keys, vec!["site-1/a.css", "site-1/img/b.png"]);
    assert!(first.next.is_some());

    let paths = storage.list("site-1").await.unwrap();
    assert_eq!(paths, vec!["a.css", "img/b.png", "index.html"]);

    assert_eq!(storage.delete_all("site-1").await.deleted, 3);
    assert!(storage.list("site-1").await.unwrap().is_empty());
    assert_eq!(storage.list("site-10").await.unwrap(), vec!["index.html"]);

    // Missing keys are not an error.
    store.delete("site-1/index.html").await.unwrap();
}

#[tokio::test]
async fn pipeline_deploys_onto_the_filesystem() {
    let dir = TempDir::new().unwrap();
    let owner_id = Uuid::new_v4();
    let sites = Arc::new(MemorySiteRepository::new());
    sites.insert_owner(Owner::new(owner_id, 1024 * 1024, 2)).unwrap();
    let config = IngestConfig::default();
    let ingestor = Ingestor::new(
        config.clone(),
        sites,
        Arc::new(FsObjectStore::new(dir.path())),
        Arc::new(GitCli::from_config(&config)),
        Arc::new(NullNotifier),
    );
    let owner = VerifiedOwner::new(owner_id);
    let site = ingestor.ledger().create_site(&owner, "docs").await.unwrap();

    let files = vec![
        UploadedFile::new("dist/index.html", b"<h1>docs</h1>".to_vec()),
        UploadedFile::new("dist/guide/index.html", b"<h1>guide</h1>".to_vec()),
        UploadedFile::new("README.md", b"# docs".to_vec()),
    ];
    let report = ingestor.submit_files(&owner, site.id, files).await.unwrap();
    assert!(report.accepted);
    assert_eq!(report.serving_subfolder.as_deref(), Some("dist"));

    let activation = ingestor.lifecycle().activate(&owner, site.id).await.unwrap();
    assert_eq!(activation.public_url, "https://docs.sites.localhost");

    let served = ingestor.get_served_file(site.id, "guide").await.unwrap();
    assert_eq!(served.body, b"<h1>guide</h1>");
}
