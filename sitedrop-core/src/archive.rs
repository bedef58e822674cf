//! ZIP archive enumeration and extraction.
//!
//! Planning reads only the central directory (plus any small manifest
//! entries), projects the total decompressed size from the headers and fails
//! fast before anything is inflated. Extraction then inflates accepted
//! entries one at a time, each capped at its declared size, and hands them to
//! a sink. Both steps are blocking and belong on a blocking thread.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::{ArchiveError, Violation};
use crate::inspect::{self, BundleEntry, EntryPolicy, InspectOptions, InspectionReport, PreparedFile};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Configured extractor; cheap to clone and share.
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    options: InspectOptions,
    max_manifest_bytes: u64,
}

/// An opened archive together with its inspection report.
pub struct ArchivePlan {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    report: InspectionReport,
    index_by_name: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub bytes: u64,
    /// Accepted entries that could not be read back and were left out.
    pub skipped: Vec<Violation>,
}

fn corrupt(e: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Corrupt(e.to_string())
}

impl ArchiveExtractor {
    pub fn new(options: InspectOptions, max_manifest_bytes: u64) -> Self {
        Self {
            options,
            max_manifest_bytes,
        }
    }

    /// Opens the archive, checks the projected size and inspects the entry list.
    pub fn plan(&self, bytes: Vec<u8>) -> Result<ArchivePlan, ArchiveError> {
        let archive_len = bytes.len();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;

        let mut listed: Vec<(String, u64, usize)> = Vec::with_capacity(archive.len());
        let mut index_by_name = HashMap::new();
        let mut early_rejections = Vec::new();
        let mut projected: u64 = 0;

        for i in 0..archive.len() {
            let file = archive.by_index_raw(i).map_err(corrupt)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let size = file.size();
            if file
                .unix_mode()
                .map(|mode| mode & S_IFMT == S_IFLNK)
                .unwrap_or(false)
            {
                early_rejections.push(Violation::entry(name, "symbolic links are not allowed"));
                continue;
            }
            if index_by_name.contains_key(&name) {
                early_rejections.push(Violation::entry(name, "duplicate archive entry"));
                continue;
            }
            projected = projected.saturating_add(size);
            index_by_name.insert(name.clone(), i);
            listed.push((name, size, i));
        }

        debug!(archive_len, entries = listed.len(), projected, "[ARCHIVE] Central directory read");
        if projected > self.options.max_bytes {
            return Err(ArchiveError::TooLarge {
                projected,
                limit: self.options.max_bytes,
            });
        }
        if listed.len() > self.options.max_files {
            return Err(ArchiveError::TooManyFiles {
                count: listed.len(),
                limit: self.options.max_files,
            });
        }

        let mut oversized_manifest = None;
        let mut entries = Vec::with_capacity(listed.len());
        for (name, size, i) in &listed {
            let mut entry = BundleEntry::new(name.clone(), *size);
            if inspect::is_manifest(name) {
                if *size > self.max_manifest_bytes {
                    oversized_manifest = Some(name.clone());
                } else {
                    let mut file = archive.by_index(*i).map_err(corrupt)?;
                    let mut content = Vec::with_capacity(*size as usize);
                    file.by_ref()
                        .take(self.max_manifest_bytes + 1)
                        .read_to_end(&mut content)
                        .map_err(corrupt)?;
                    entry.content = Some(content);
                }
            }
            entries.push(entry);
        }

        let mut report = inspect::inspect(&entries, &self.options);
        if let Some(name) = oversized_manifest {
            report.warnings.push(format!(
                "{name} is larger than {} bytes and was not checked for build scripts",
                self.max_manifest_bytes
            ));
        }
        if !early_rejections.is_empty() {
            if self.options.policy == EntryPolicy::Strict {
                report.errors.extend(early_rejections.iter().cloned());
                report.valid = false;
            }
            report.rejected_entries.extend(early_rejections);
        }

        info!(
            entries = listed.len(),
            projected,
            valid = report.valid,
            "[ARCHIVE] Archive planned"
        );
        Ok(ArchivePlan {
            archive,
            report,
            index_by_name,
        })
    }
}

impl ArchivePlan {
    pub fn report(&self) -> &InspectionReport {
        &self.report
    }

    /// Inflates accepted entries and passes each to `sink`.
    ///
    /// With `only_serving`, entries outside the serving subfolder are left
    /// alone. The sink returns `false` when its consumer has gone away, which
    /// stops extraction with [`ArchiveError::Cancelled`].
    pub fn extract<F>(mut self, only_serving: bool, mut sink: F) -> Result<ExtractSummary, ArchiveError>
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
            let Some(&index) = self.index_by_name.get(&entry.source_path) else {
                warn!(path = %entry.source_path, "[ARCHIVE] Accepted entry vanished from index; skipping");
                continue;
            };
            let mut file = self.archive.by_index(index).map_err(corrupt)?;
            let declared = file.size();
            let mut body = Vec::with_capacity(declared.min(8 * 1024 * 1024) as usize);
            file.by_ref()
                .take(declared + 1)
                .read_to_end(&mut body)
                .map_err(corrupt)?;
            if body.len() as u64 > declared {
                return Err(ArchiveError::SizeMismatch {
                    path: entry.source_path,
                    declared,
                });
            }
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
        debug!(files = summary.files, bytes = summary.bytes, "[ARCHIVE] Extraction finished");
        Ok(summary)
    }
}
