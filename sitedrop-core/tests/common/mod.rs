#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Arc;

use sitedrop_core::config::IngestConfig;
use sitedrop_core::contract::{MockRepositoryFetcher, Notifier, NullNotifier, ObjectStore};
use sitedrop_core::ingest::{Ingestor, UploadedFile};
use sitedrop_core::memory::MemorySiteRepository;
use sitedrop_core::model::{Owner, Site, VerifiedOwner};
use sitedrop_core::store::MemoryObjectStore;
use tempfile::TempDir;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const INDEX_HTML: &[u8] = b"<!doctype html><title>hello</title>";

/// Builds a ZIP archive in memory with stored (uncompressed) entries.
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, body) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn files(entries: &[(&str, &[u8])]) -> Vec<UploadedFile> {
    entries
        .iter()
        .map(|(path, body)| UploadedFile::new(*path, body.to_vec()))
        .collect()
}

/// An ingestor wired to in-memory collaborators and one registered owner.
pub struct Harness {
    pub repo: Arc<MemorySiteRepository>,
    pub store: Arc<MemoryObjectStore>,
    pub ingestor: Ingestor,
    pub owner: VerifiedOwner,
    pub scratch: TempDir,
}

impl Harness {
    pub fn new(max_bytes: u64) -> Self {
        Self::build(max_bytes, 10, MockRepositoryFetcher::new(), Arc::new(NullNotifier))
    }

    pub fn build(
        max_bytes: u64,
        max_sites: u32,
        fetcher: MockRepositoryFetcher,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = Arc::new(MemoryObjectStore::new());
        Self::with_store(max_bytes, max_sites, fetcher, notifier, store.clone(), store)
    }

    pub fn with_store(
        max_bytes: u64,
        max_sites: u32,
        fetcher: MockRepositoryFetcher,
        notifier: Arc<dyn Notifier>,
        memory: Arc<MemoryObjectStore>,
        backend: Arc<dyn ObjectStore>,
    ) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let config = IngestConfig {
            scratch_dir: Some(scratch.path().to_path_buf()),
            upload_concurrency: 4,
            ..IngestConfig::default()
        };
        let repo = Arc::new(MemorySiteRepository::new());
        let owner_id = Uuid::new_v4();
        repo.insert_owner(Owner::new(owner_id, max_bytes, max_sites))
            .unwrap();
        let ingestor = Ingestor::new(config, repo.clone(), backend, Arc::new(fetcher), notifier);
        Self {
            repo,
            store: memory,
            ingestor,
            owner: VerifiedOwner::new(owner_id),
            scratch,
        }
    }

    pub async fn site(&self, slug: &str) -> Site {
        self.ingestor
            .ledger()
            .create_site(&self.owner, slug)
            .await
            .unwrap()
    }

    pub async fn owner_record(&self) -> Owner {
        use sitedrop_core::contract::SiteRepository;
        self.repo.get_owner(self.owner.id()).await.unwrap()
    }

    pub async fn site_record(&self, site_id: Uuid) -> Site {
        use sitedrop_core::contract::SiteRepository;
        self.repo.get_site(site_id).await.unwrap()
    }
}
