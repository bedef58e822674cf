///
/// This module implements the sitedrop command line: argument parsing,
/// wiring of the concrete collaborators, and the user-visible output.
///
/// All ingestion, validation, quota and lifecycle logic lives in the
/// [`sitedrop-core`] crate. This module only builds the collaborators
/// (filesystem object store, in-process site repository, `git` fetcher,
/// optional webhook notifier, local authorizer) and drives the pipeline.
///
/// ## Subcommands
/// - `inspect <path>`: inspect a directory or `.zip` and print the report as JSON.
///   Exits non-zero when the bundle is not deployable.
/// - `deploy --config <yaml> --slug <slug> (--archive <zip> | --dir <dir> | --repo <url> [--branch <b>])`:
///   create the site, run the full pipeline, activate it and print the public URL.
/// - `sweep-scratch --config <yaml>`: remove clone scratch directories left by crashed runs.
///
/// ## How To Use
/// - From a shell: `sitedrop --help`.
/// - Programmatically: build a [`Cli`] and call [`run`].
///
/// [`sitedrop-core`]: ../../sitedrop_core/
use crate::auth::LocalAuthorizer;
use crate::load_config::{load_config, CliConfig};
use crate::notify::WebhookNotifier;
use crate::store::FsObjectStore;
use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use sitedrop_core::archive::ArchiveExtractor;
use sitedrop_core::config::IngestConfig;
use sitedrop_core::contract::{Authorizer, Notifier, NullNotifier};
use sitedrop_core::ingest::{Ingestor, SubmissionReport, UploadedFile};
use sitedrop_core::inspect::{EntryPolicy, InspectOptions, InspectionReport};
use sitedrop_core::memory::MemorySiteRepository;
use sitedrop_core::model::Owner;
use sitedrop_core::repository::{self, GitCli};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Scratch directories older than this are treated as leftovers on startup.
pub const STALE_SCRATCH_AGE: Duration = Duration::from_secs(60 * 60);

/// CLI for sitedrop: validate and deploy static sites.
#[derive(Parser)]
#[clap(
    name = "sitedrop",
    version,
    about = "Validate and deploy static sites from archives, folders or git repositories"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect a directory or .zip archive and print the report as JSON
    Inspect {
        /// Directory or .zip file to inspect
        path: PathBuf,
        /// Optional YAML config whose `ingest` limits are applied
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Create a site, deploy a bundle to it and activate it
    #[clap(group(ArgGroup::new("source").required(true).args(["archive", "dir", "repo"])))]
    Deploy {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Site slug, used in the public URL
        #[clap(long)]
        slug: String,
        /// ZIP archive to deploy
        #[clap(long)]
        archive: Option<PathBuf>,
        /// Directory of built files to deploy
        #[clap(long)]
        dir: Option<PathBuf>,
        /// HTTPS URL of a git repository to deploy
        #[clap(long)]
        repo: Option<String>,
        /// Branch to check out (defaults to main)
        #[clap(long, requires = "repo")]
        branch: Option<String>,
    },
    /// Remove stale clone scratch directories
    SweepScratch {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Minimum age in seconds before a directory is removed
        #[clap(long, default_value_t = STALE_SCRATCH_AGE.as_secs())]
        max_age_secs: u64,
    },
}

enum DeploySource {
    Archive(PathBuf),
    Dir(PathBuf),
    Repo { url: String, branch: String },
}

/// Async CLI entrypoint shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Inspect { path, config } => {
            let ingest = match config {
                Some(config_path) => load_config(config_path)?.ingest,
                None => IngestConfig::default(),
            };
            info!(command = "inspect", path = ?path, "[CLI] Inspecting bundle");
            let report = inspect_path(&path, &ingest).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                bail!("{} is not deployable", path.display());
            }
            Ok(())
        }
        Commands::Deploy {
            config,
            slug,
            archive,
            dir,
            repo,
            branch,
        } => {
            let config = load_config(config)?;
            config.trace_loaded();
            let source = match (archive, dir, repo) {
                (Some(archive), _, _) => DeploySource::Archive(archive),
                (_, Some(dir), _) => DeploySource::Dir(dir),
                (_, _, Some(url)) => DeploySource::Repo {
                    url,
                    branch: branch.unwrap_or_default(),
                },
                _ => bail!("one of --archive, --dir or --repo is required"),
            };
            deploy(&config, &slug, source).await
        }
        Commands::SweepScratch {
            config,
            max_age_secs,
        } => {
            let config = load_config(config)?;
            let root = config.ingest.scratch_root();
            let removed = tokio::task::spawn_blocking(move || {
                repository::sweep_stale_scratch(&root, Duration::from_secs(max_age_secs))
            })
            .await??;
            info!(command = "sweep-scratch", removed, "[CLI] Scratch sweep complete");
            println!("removed {removed} stale scratch directories");
            Ok(())
        }
    }
}

/// Strict inspection of a local directory or `.zip` file.
pub async fn inspect_path(path: &Path, ingest: &IngestConfig) -> Result<InspectionReport> {
    let options = InspectOptions::from_config(ingest, EntryPolicy::Strict);
    let max_manifest_bytes = ingest.max_manifest_bytes;
    if path.is_dir() {
        let root = path.to_path_buf();
        let report = tokio::task::spawn_blocking(move || {
            repository::scan_tree(&root, &options, max_manifest_bytes)
        })
        .await?
        .with_context(|| format!("Failed to scan {}", path.display()))?;
        return Ok(report);
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let extractor = ArchiveExtractor::new(options, max_manifest_bytes);
    let plan = tokio::task::spawn_blocking(move || extractor.plan(bytes))
        .await?
        .with_context(|| format!("Failed to open {} as a zip archive", path.display()))?;
    Ok(plan.report().clone())
}

fn build_notifier(config: &CliConfig) -> Result<Arc<dyn Notifier>> {
    match &config.notify.webhook_url {
        Some(url) => {
            let notifier =
                WebhookNotifier::new(url.clone(), Duration::from_secs(config.notify.timeout_secs))
                    .map_err(|e| anyhow!("Failed to build webhook notifier: {e}"))?;
            Ok(Arc::new(notifier))
        }
        None => Ok(Arc::new(NullNotifier)),
    }
}

async fn deploy(config: &CliConfig, slug: &str, source: DeploySource) -> Result<()> {
    let scratch_root = config.ingest.scratch_root();
    match tokio::task::spawn_blocking(move || {
        repository::sweep_stale_scratch(&scratch_root, STALE_SCRATCH_AGE)
    })
    .await?
    {
        Ok(removed) if removed > 0 => info!(removed, "[CLI] Removed stale scratch directories"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "[CLI] Could not sweep scratch directories"),
    }

    let owner_id = config.require_owner_id()?;
    let sites = Arc::new(MemorySiteRepository::new());
    sites.insert_owner(Owner::new(
        owner_id,
        config.owner.max_bytes,
        config.owner.max_sites,
    ))?;
    let ingestor = Ingestor::new(
        config.ingest.clone(),
        sites,
        Arc::new(FsObjectStore::new(config.storage.root.clone())),
        Arc::new(GitCli::from_config(&config.ingest)),
        build_notifier(config)?,
    );
    let authorizer = LocalAuthorizer::new([owner_id]);
    let owner = authorizer
        .verify(&owner_id.to_string())
        .await
        .map_err(|e| anyhow!("Owner verification failed: {e}"))?;

    let site = ingestor
        .ledger()
        .create_site(&owner, slug)
        .await
        .context("Failed to create site")?;
    info!(command = "deploy", site_id = %site.id, slug = %site.slug, "[CLI] Site created");

    let submission = async {
        match source {
            DeploySource::Archive(path) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Ok::<SubmissionReport, anyhow::Error>(
                    ingestor.submit_archive(&owner, site.id, bytes).await?,
                )
            }
            DeploySource::Dir(dir) => {
                let files = read_dir_files(&dir, config.ingest.max_bundle_bytes).await?;
                Ok(ingestor.submit_files(&owner, site.id, files).await?)
            }
            DeploySource::Repo { url, branch } => Ok(ingestor
                .submit_repository(&owner, site.id, &url, &branch)
                .await?),
        }
    };

    let report = tokio::select! {
        report = submission => report.context("Deployment failed")?,
        _ = tokio::signal::ctrl_c() => {
            error!(site_id = %site.id, "[CLI] Interrupted; submission abandoned");
            bail!("interrupted");
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    let activation = ingestor
        .lifecycle()
        .activate(&owner, site.id)
        .await
        .context("Activation failed")?;
    info!(
        command = "deploy",
        site_id = %site.id,
        url = %activation.public_url,
        namespace = %site.namespace,
        "[CLI] Site deployed"
    );
    println!("deployed {} to {}", site.slug, activation.public_url);
    Ok(())
}

/// Reads every regular file under `dir` (skipping `.git/`) into memory.
async fn read_dir_files(dir: &Path, max_bytes: u64) -> Result<Vec<UploadedFile>> {
    let root = dir.to_path_buf();
    let listing = tokio::task::spawn_blocking(move || repository::list_tree(&root))
        .await?
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    for link in &listing.symlinks {
        warn!(path = %link, "[CLI] Skipping symbolic link");
    }

    let total: u64 = listing.entries.iter().map(|e| e.size).sum();
    if total > max_bytes {
        bail!("{} holds {total} bytes, limit is {max_bytes}", dir.display());
    }

    let mut files = Vec::with_capacity(listing.entries.len());
    for entry in listing.entries {
        let bytes = tokio::fs::read(dir.join(&entry.path))
            .await
            .with_context(|| format!("Failed to read {}", entry.path))?;
        files.push(UploadedFile::new(entry.path, bytes));
    }
    Ok(files)
}
