//! Bundle inspection: is this file tree a ready-to-serve static site?
//!
//! Inspection is purely static. Nothing from the bundle is executed; build
//! requirements are inferred from manifests and configuration filenames
//! using the ordered [`BUILD_RULES`] table, where the first matching rule
//! supplies the human-readable reason.
//!
//! # Algorithm
//! 1. Normalise every path, dropping OS junk and recording path violations.
//! 2. Strip a single wrapping directory when the bundle has no root index.
//! 3. Resolve the serving index at the root, then in [`CANDIDATE_SUBFOLDERS`] in order.
//! 4. Classify each entry and parse the package manifest for build signals.
//! 5. Enforce file-count and size ceilings.
//!
//! Every violation is collected; inspection never stops at the first one.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classify;
use crate::config::IngestConfig;
use crate::error::Violation;
use crate::path;

pub const INDEX_FILE: &str = "index.html";
pub const INDEX_FILES: &[&str] = &["index.html", "index.htm"];
pub const MANIFEST_FILE: &str = "package.json";

/// Subfolders probed, in order, when the bundle root has no index.
pub const CANDIDATE_SUBFOLDERS: &[&str] = &[
    "public",
    "dist",
    "build",
    "out",
    "_site",
    "site-export",
    "docs",
    "static",
];

/// Manifest scripts that mean "this project has to be compiled first".
pub const BUILD_SCRIPTS: &[&str] = &["build", "generate", "export"];

/// `(dependency, framework, usual output folder)`, most specific first.
pub const FRAMEWORKS: &[(&str, &str, &str)] = &[
    ("next", "Next.js", "out"),
    ("nuxt", "Nuxt", ".output/public"),
    ("gatsby", "Gatsby", "public"),
    ("@angular/core", "Angular", "dist"),
    ("@sveltejs/kit", "SvelteKit", "build"),
    ("astro", "Astro", "dist"),
    ("@remix-run/react", "Remix", "build"),
    ("@11ty/eleventy", "Eleventy", "_site"),
    ("ember-source", "Ember", "dist"),
    ("react-scripts", "Create React App", "build"),
    ("vite", "Vite", "dist"),
    ("vue", "Vue", "dist"),
    ("svelte", "Svelte", "public"),
    ("preact", "Preact", "build"),
    ("react", "React", "build"),
];

/// `(filename, tool)` whose presence alone means a build step is expected.
pub const BUILD_CONFIG_FILES: &[(&str, &str)] = &[
    ("webpack.config.js", "webpack"),
    ("webpack.config.ts", "webpack"),
    ("vite.config.js", "Vite"),
    ("vite.config.ts", "Vite"),
    ("vite.config.mjs", "Vite"),
    ("next.config.js", "Next.js"),
    ("next.config.mjs", "Next.js"),
    ("next.config.ts", "Next.js"),
    ("nuxt.config.js", "Nuxt"),
    ("nuxt.config.ts", "Nuxt"),
    ("angular.json", "Angular"),
    ("svelte.config.js", "SvelteKit"),
    ("gatsby-config.js", "Gatsby"),
    ("gatsby-config.ts", "Gatsby"),
    ("astro.config.mjs", "Astro"),
    ("astro.config.ts", "Astro"),
    ("remix.config.js", "Remix"),
    ("vue.config.js", "Vue CLI"),
    ("rollup.config.js", "Rollup"),
    ("rollup.config.mjs", "Rollup"),
    (".parcelrc", "Parcel"),
    ("ember-cli-build.js", "Ember"),
    ("gulpfile.js", "gulp"),
    ("Gruntfile.js", "Grunt"),
    (".eleventy.js", "Eleventy"),
    ("eleventy.config.js", "Eleventy"),
    ("_config.yml", "Jekyll"),
    ("hugo.toml", "Hugo"),
    ("hugo.yaml", "Hugo"),
    ("mkdocs.yml", "MkDocs"),
];

/// Component source extensions that browsers cannot load directly.
pub const UNCOMPILED_EXTENSIONS: &[&str] = &["jsx", "tsx", "vue", "svelte"];

/// One file of a bundle as seen by the inspector.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub path: String,
    pub size: u64,
    /// Body, only needed for manifest files.
    pub content: Option<Vec<u8>>,
}

impl BundleEntry {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            content: None,
        }
    }

    pub fn with_content(path: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            size: content.len() as u64,
            content: Some(content),
        }
    }
}

/// True for the file names whose content the inspector wants to read.
pub fn is_manifest(path: &str) -> bool {
    path::file_name(path) == MANIFEST_FILE
}

/// How individually disallowed entries affect validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPolicy {
    /// Any rejected entry makes the bundle invalid.
    Strict,
    /// Rejected entries are reported and skipped; the rest may proceed.
    Skip,
}

#[derive(Debug, Clone)]
pub struct InspectOptions {
    pub max_bytes: u64,
    pub max_files: usize,
    pub policy: EntryPolicy,
}

impl InspectOptions {
    pub fn from_config(config: &IngestConfig, policy: EntryPolicy) -> Self {
        Self {
            max_bytes: config.max_bundle_bytes,
            max_files: config.max_files,
            policy,
        }
    }
}

impl Default for InspectOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default(), EntryPolicy::Strict)
    }
}

/// An entry that passed every check and may be written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedEntry {
    /// Path exactly as it appears in the source bundle.
    pub source_path: String,
    /// Sanitised path relative to the bundle root, used for storage keys.
    pub storage_path: String,
    pub size: u64,
}

/// An accepted entry with its body, ready to be written.
#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub source_path: String,
    pub storage_path: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InspectionReport {
    pub valid: bool,
    pub has_index: bool,
    pub index_path: Option<String>,
    pub serving_subfolder: Option<String>,
    pub requires_build: bool,
    pub build_reason: Option<String>,
    pub framework: Option<String>,
    pub total_size: u64,
    pub file_count: usize,
    pub errors: Vec<Violation>,
    pub warnings: Vec<String>,
    pub rejected_entries: Vec<Violation>,
    #[serde(skip)]
    pub accepted: Vec<AcceptedEntry>,
    /// Wrapper directory stripped from every source path, if any.
    pub stripped_prefix: Option<String>,
}

impl InspectionReport {
    /// Accepted entries under the serving subfolder (all of them when serving from the root).
    pub fn serving_entries(&self) -> impl Iterator<Item = &AcceptedEntry> {
        let prefix = self.serving_subfolder.as_ref().map(|s| format!("{s}/"));
        self.accepted.iter().filter(move |e| match &prefix {
            Some(prefix) => e.storage_path.starts_with(prefix.as_str()),
            None => true,
        })
    }

    pub fn accepted_bytes(&self) -> u64 {
        self.accepted.iter().map(|e| e.size).sum()
    }
}

/// Parsed view of a `package.json`.
#[derive(Debug, Default, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub scripts: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: BTreeMap<String, serde_json::Value>,
}

impl PackageManifest {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// First declared build-like script name.
    pub fn build_script(&self) -> Option<&'static str> {
        BUILD_SCRIPTS.iter().copied().find(|name| {
            self.scripts
                .get(*name)
                .and_then(|v| v.as_str())
                .map(|cmd| !cmd.trim().is_empty())
                .unwrap_or(false)
        })
    }

    /// First entry of [`FRAMEWORKS`] found in runtime or dev dependencies.
    pub fn framework(&self) -> Option<(&'static str, &'static str)> {
        FRAMEWORKS
            .iter()
            .find(|(dep, _, _)| {
                self.dependencies.contains_key(*dep) || self.dev_dependencies.contains_key(*dep)
            })
            .map(|(_, name, output)| (*name, *output))
    }
}

/// What the build rules get to look at.
pub struct BundleView<'a> {
    /// Normalised paths relative to the bundle root, including rejected entries.
    pub paths: &'a [String],
    pub manifest: Option<&'a PackageManifest>,
    pub has_index: bool,
}

impl BundleView<'_> {
    fn root_file(&self, name: &str) -> bool {
        self.paths.iter().any(|p| p == name)
    }

    fn build_config_file(&self) -> Option<(&'static str, &'static str)> {
        BUILD_CONFIG_FILES
            .iter()
            .find(|(file, _)| self.root_file(file))
            .copied()
    }
}

/// A single static build-detection heuristic.
pub struct BuildRule {
    pub name: &'static str,
    pub applies: fn(&BundleView) -> bool,
    pub reason: fn(&BundleView) -> String,
}

/// Evaluated top to bottom; the first rule that applies wins.
pub const BUILD_RULES: &[BuildRule] = &[
    BuildRule {
        name: "framework-build-script",
        applies: framework_build_script,
        reason: framework_build_reason,
    },
    BuildRule {
        name: "manifest-build-script",
        applies: manifest_build_script,
        reason: manifest_build_reason,
    },
    BuildRule {
        name: "build-tool-config",
        applies: build_tool_config,
        reason: build_tool_reason,
    },
    BuildRule {
        name: "uncompiled-sources",
        applies: uncompiled_sources,
        reason: uncompiled_reason,
    },
];

fn framework_build_script(view: &BundleView) -> bool {
    view.manifest
        .map(|m| m.build_script().is_some() && m.framework().is_some())
        .unwrap_or(false)
}

fn framework_build_reason(view: &BundleView) -> String {
    let script = view.manifest.and_then(|m| m.build_script()).unwrap_or("build");
    let (framework, output) = view
        .manifest
        .and_then(|m| m.framework())
        .unwrap_or(("JavaScript", "dist"));
    format!(
        "package.json declares a `{script}` script for a {framework} project; run it and upload the generated `{output}` folder"
    )
}

fn manifest_build_script(view: &BundleView) -> bool {
    view.manifest.and_then(|m| m.build_script()).is_some()
}

fn manifest_build_reason(view: &BundleView) -> String {
    let script = view.manifest.and_then(|m| m.build_script()).unwrap_or("build");
    format!("package.json declares a `{script}` script; run the build and upload its output folder")
}

fn build_tool_config(view: &BundleView) -> bool {
    view.build_config_file().is_some()
}

fn build_tool_reason(view: &BundleView) -> String {
    let (file, tool) = view
        .build_config_file()
        .unwrap_or(("configuration", "build tool"));
    format!("found `{file}`, a {tool} configuration; build the site and upload the output folder")
}

fn uncompiled_sources(view: &BundleView) -> bool {
    !view.has_index
        && view.paths.iter().any(|p| {
            path::extension(p)
                .map(|ext| UNCOMPILED_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or(false)
        })
}

fn uncompiled_reason(_: &BundleView) -> String {
    "bundle contains uncompiled component sources (.jsx/.tsx/.vue/.svelte) and no index.html; build it first"
        .to_string()
}

/// Runs [`BUILD_RULES`] and returns the first matching `(rule name, reason)`.
pub fn detect_build(view: &BundleView) -> Option<(&'static str, String)> {
    BUILD_RULES
        .iter()
        .find(|rule| (rule.applies)(view))
        .map(|rule| (rule.name, (rule.reason)(view)))
}

/// Static inspector bound to a set of limits.
#[derive(Debug, Clone, Default)]
pub struct BundleInspector {
    options: InspectOptions,
}

impl BundleInspector {
    pub fn new(options: InspectOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &InspectOptions {
        &self.options
    }

    pub fn inspect(&self, entries: &[BundleEntry]) -> InspectionReport {
        inspect(entries, &self.options)
    }
}

struct Normalised<'a> {
    source: &'a BundleEntry,
    relative: String,
}

pub fn inspect(entries: &[BundleEntry], options: &InspectOptions) -> InspectionReport {
    let mut report = InspectionReport::default();
    let mut entry_violations = Vec::new();
    let mut junk = 0usize;

    // Step 1: normalise
    let mut files: Vec<Normalised> = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.path.ends_with('/') {
            continue;
        }
        match path::validate(&entry.path) {
            Ok(normalised) => {
                if classify::is_os_junk(&normalised) {
                    junk += 1;
                    continue;
                }
                files.push(Normalised {
                    source: entry,
                    relative: normalised,
                });
            }
            Err(e) => entry_violations.push(Violation::entry(entry.path.clone(), e.to_string())),
        }
    }
    if junk > 0 {
        report
            .warnings
            .push(format!("Skipped {junk} operating-system metadata files"));
    }

    // Step 2: single wrapping directory
    if let Some(wrapper) = wrapping_directory(&files) {
        let prefix = format!("{wrapper}/");
        for file in &mut files {
            file.relative = file.relative[prefix.len()..].to_string();
        }
        report.warnings.push(format!(
            "All files were inside `{wrapper}/`; treating it as the bundle root"
        ));
        report.stripped_prefix = Some(wrapper);
    }

    let relative_paths: Vec<String> = files.iter().map(|f| f.relative.clone()).collect();

    // Step 3: serving index
    resolve_index(&relative_paths, &mut report);

    // Step 4: classification and manifest
    let mut manifest: Option<PackageManifest> = None;
    let manifest_locations = manifest_candidates(report.serving_subfolder.as_deref());
    let mut claimed: HashSet<String> = HashSet::with_capacity(files.len());
    for file in &files {
        report.file_count += 1;
        report.total_size = report.total_size.saturating_add(file.source.size);

        if manifest_locations.contains(&file.relative) && manifest.is_none() {
            match &file.source.content {
                Some(bytes) => match PackageManifest::parse(bytes) {
                    Ok(parsed) => manifest = Some(parsed),
                    Err(e) => report.errors.push(Violation::entry(
                        file.relative.clone(),
                        format!("package.json is not valid JSON: {e}"),
                    )),
                },
                None => debug!(path = %file.relative, "Manifest content not supplied; skipping build-script check"),
            }
        }

        let classification = classify::classify(&file.relative);
        if !classification.allowed {
            entry_violations.push(Violation::entry(
                file.relative.clone(),
                classification
                    .reason
                    .unwrap_or_else(|| "file type not allowed".to_string()),
            ));
            continue;
        }
        match path::to_storage_path(&file.relative) {
            Ok(storage_path) if !claimed.insert(storage_path.clone()) => {
                entry_violations.push(Violation::entry(
                    file.relative.clone(),
                    format!("stored name {storage_path} is already used by another file"),
                ))
            }
            Ok(storage_path) => report.accepted.push(AcceptedEntry {
                source_path: file.source.path.clone(),
                storage_path,
                size: file.source.size,
            }),
            Err(e) => {
                entry_violations.push(Violation::entry(file.relative.clone(), e.to_string()))
            }
        }
    }

    if let Some(parsed) = &manifest {
        report.framework = parsed.framework().map(|(name, _)| name.to_string());
    }

    let view = BundleView {
        paths: &relative_paths,
        manifest: manifest.as_ref(),
        has_index: report.has_index,
    };
    if let Some((rule, reason)) = detect_build(&view) {
        debug!(rule, reason = %reason, "Build rule matched");
        report.requires_build = true;
        report
            .errors
            .push(Violation::bundle(format!("Bundle requires a build step: {reason}")));
        report.build_reason = Some(reason);
    }

    if !report.has_index {
        report.errors.push(Violation::bundle(format!(
            "No {INDEX_FILE} found at the bundle root or in any of: {}",
            CANDIDATE_SUBFOLDERS.join(", ")
        )));
    }

    // Step 5: ceilings
    if report.file_count > options.max_files {
        report.errors.push(Violation::bundle(format!(
            "Bundle contains {} files; the limit is {}",
            report.file_count, options.max_files
        )));
    }
    if report.total_size > options.max_bytes {
        report.errors.push(Violation::bundle(format!(
            "Bundle is {} bytes; the limit is {} bytes",
            report.total_size, options.max_bytes
        )));
    } else if report.total_size > options.max_bytes / 5 * 4 {
        report.warnings.push(format!(
            "Bundle is {} bytes, over 80% of the {} byte limit",
            report.total_size, options.max_bytes
        ));
    }

    match options.policy {
        EntryPolicy::Strict => report.errors.extend(entry_violations.iter().cloned()),
        EntryPolicy::Skip => {}
    }
    report.rejected_entries = entry_violations;
    report.valid = report.errors.is_empty();

    info!(
        valid = report.valid,
        files = report.file_count,
        total_size = report.total_size,
        serving_subfolder = ?report.serving_subfolder,
        requires_build = report.requires_build,
        errors = report.errors.len(),
        rejected = report.rejected_entries.len(),
        "[INSPECT] Bundle inspected"
    );
    report
}

fn root_index(paths: &[String], folder: Option<&str>) -> Option<String> {
    INDEX_FILES
        .iter()
        .map(|index| path::join(folder, index))
        .find(|candidate| paths.contains(candidate))
}

fn resolve_index(paths: &[String], report: &mut InspectionReport) {
    if let Some(index) = root_index(paths, None) {
        report.has_index = true;
        report.index_path = Some(index);
        return;
    }
    for folder in CANDIDATE_SUBFOLDERS {
        if let Some(index) = root_index(paths, Some(folder)) {
            report.has_index = true;
            report.index_path = Some(index);
            report.serving_subfolder = Some(folder.to_string());
            report.warnings.push(format!(
                "No {INDEX_FILE} at the bundle root; serving from `{folder}/`"
            ));
            return;
        }
    }
}

fn manifest_candidates(serving_subfolder: Option<&str>) -> Vec<String> {
    let mut candidates = vec![MANIFEST_FILE.to_string()];
    if let Some(folder) = serving_subfolder {
        candidates.push(path::join(Some(folder), MANIFEST_FILE));
    }
    candidates
}

/// The single top-level directory shared by every file, when the root has no index of its own.
fn wrapping_directory(files: &[Normalised]) -> Option<String> {
    let first = files.first()?;
    let (wrapper, _) = first.relative.split_once('/')?;
    if CANDIDATE_SUBFOLDERS.contains(&wrapper) || wrapper == path::WELL_KNOWN_DIR {
        return None;
    }
    let prefix = format!("{wrapper}/");
    files
        .iter()
        .all(|f| f.relative.starts_with(&prefix))
        .then(|| wrapper.to_string())
}
