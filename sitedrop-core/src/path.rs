//! Relative path validation and sanitising for bundle entries.
//!
//! # Invariants
//! - A path accepted by [`validate`] never contains a `..` segment and is never absolute.
//! - Separators are `/` only; backslashes are refused rather than reinterpreted.
//! - [`to_storage_path`] output is safe to append to a site namespace.

use crate::error::PathError;

pub const MAX_PATH_LEN: usize = 500;

/// The one dot-prefixed directory that is kept verbatim (domain verification files).
pub const WELL_KNOWN_DIR: &str = ".well-known";

/// Validates a bundle-relative path and returns its normalised form.
///
/// A single leading `./` is dropped and a trailing `/` (directory marker) is
/// removed; everything else must already be clean.
pub fn validate(path: &str) -> Result<String, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.chars().count() > MAX_PATH_LEN {
        return Err(PathError::TooLong { max: MAX_PATH_LEN });
    }
    if path.chars().any(|c| c.is_control()) {
        return Err(PathError::ControlCharacter);
    }
    if path.contains('\\') {
        return Err(PathError::Backslash);
    }
    if path.starts_with('/') || has_drive_prefix(path) {
        return Err(PathError::Absolute);
    }

    let trimmed = path.strip_prefix("./").unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }
    if trimmed.contains("//") {
        return Err(PathError::DuplicateSlash);
    }
    if trimmed.split('/').any(|segment| segment == "..") {
        return Err(PathError::Traversal);
    }
    Ok(trimmed.to_string())
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Makes a single file or directory name safe for storage keys.
///
/// Characters outside `[A-Za-z0-9._-]` become `-`, leading dots are
/// stripped and surrounding whitespace is trimmed.
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    replaced.trim_start_matches('.').trim().to_string()
}

/// Validates `path` and sanitises every segment, preserving `.well-known`.
pub fn to_storage_path(path: &str) -> Result<String, PathError> {
    let normalised = validate(path)?;
    let mut segments = Vec::new();
    for segment in normalised.split('/') {
        if segment == "." {
            continue;
        }
        if segment == WELL_KNOWN_DIR {
            segments.push(segment.to_string());
            continue;
        }
        let clean = sanitize(segment);
        if clean.is_empty() {
            return Err(PathError::EmptySegment(segment.to_string()));
        }
        segments.push(clean);
    }
    if segments.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(segments.join("/"))
}

/// Returns the last segment of a normalised path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Lower-cased extension of the final segment, if any.
pub fn extension(path: &str) -> Option<String> {
    let name = file_name(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() && !name[1..].contains('.') {
        // ".htaccess" style names have no extension
        return None;
    }
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// True when `path` is inside the `.well-known` directory at any depth.
pub fn is_well_known(path: &str) -> bool {
    path.split('/').any(|segment| segment == WELL_KNOWN_DIR)
}

/// Joins an optional prefix folder and a relative path with a single `/`.
pub fn join(prefix: Option<&str>, path: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => {
            format!("{}/{}", prefix.trim_end_matches('/'), path.trim_start_matches('/'))
        }
        _ => path.trim_start_matches('/').to_string(),
    }
}
