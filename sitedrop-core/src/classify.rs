//! Static asset classification: which files may be served at all.
//!
//! The allow-list doubles as the content-type table so that every servable
//! extension has exactly one MIME type. The deny-list names executable and
//! server-side script types; the two lists never overlap.

use serde::Serialize;

use crate::path;

/// `(extension, content type)` for every servable file type.
pub const ALLOWED_EXTENSIONS: &[(&str, &str)] = &[
    // markup
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("xml", "application/xml"),
    ("txt", "text/plain; charset=utf-8"),
    ("md", "text/markdown; charset=utf-8"),
    // styles & scripts
    ("css", "text/css; charset=utf-8"),
    ("js", "text/javascript; charset=utf-8"),
    ("mjs", "text/javascript; charset=utf-8"),
    ("map", "application/json"),
    ("json", "application/json"),
    ("webmanifest", "application/manifest+json"),
    ("wasm", "application/wasm"),
    // images
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("ico", "image/x-icon"),
    ("bmp", "image/bmp"),
    // fonts
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("eot", "application/vnd.ms-fontobject"),
    // media
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("ogg", "audio/ogg"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("m4a", "audio/mp4"),
    ("vtt", "text/vtt"),
    // documents
    ("pdf", "application/pdf"),
    ("csv", "text/csv; charset=utf-8"),
    ("rss", "application/rss+xml"),
    ("atom", "application/atom+xml"),
];

/// Executable or server-side script extensions that are never served.
pub const DENIED_EXTENSIONS: &[&str] = &[
    "php", "phtml", "php3", "php4", "php5", "phar", "asp", "aspx", "ashx", "jsp", "jspx", "cgi",
    "pl", "py", "pyc", "rb", "sh", "bash", "zsh", "ps1", "bat", "cmd", "com", "exe", "dll",
    "so", "dylib", "bin", "msi", "jar", "war", "class", "vbs", "scr", "apk", "deb", "rpm",
];

/// Server configuration, secrets and package manifests.
pub const BANNED_FILENAMES: &[&str] = &[
    ".htaccess",
    ".htpasswd",
    ".env",
    "web.config",
    ".npmrc",
    ".yarnrc",
    ".git-credentials",
    ".gitconfig",
    ".netrc",
    "id_rsa",
    "id_ed25519",
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "composer.json",
    "composer.lock",
    "Gemfile",
    "Gemfile.lock",
    "requirements.txt",
    "Dockerfile",
    "docker-compose.yml",
    "nginx.conf",
];

/// Extensionless names that are harmless and commonly shipped with static sites.
pub const EXTENSIONLESS_ALLOWED: &[&str] = &["CNAME", "LICENSE", "_redirects", "_headers"];

/// Operating-system metadata files that are dropped silently.
pub const OS_JUNK: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];
pub const OS_JUNK_DIRS: &[&str] = &["__MACOSX", ".git"];

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Outcome of classifying one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Classification {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// True when `ext` (without the dot, any case) is on the allow-list.
pub fn is_allowed_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.iter().any(|(allowed, _)| *allowed == ext)
}

pub fn is_denied_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    DENIED_EXTENSIONS.contains(&ext.as_str())
}

/// Checks the final path segment against [`BANNED_FILENAMES`].
///
/// Anything under `.well-known/` is exempt so domain-verification files can be published.
pub fn is_banned_filename(path: &str) -> Classification {
    if path::is_well_known(path) {
        return Classification::allow();
    }
    let name = path::file_name(path);
    let lowered = name.to_ascii_lowercase();
    let banned = BANNED_FILENAMES
        .iter()
        .any(|b| b.eq_ignore_ascii_case(name))
        || lowered.starts_with(".env.");
    if banned {
        return Classification::deny(format!("{name} is a server configuration, secret or manifest file"));
    }
    if path.split('/').any(|segment| segment == ".git") {
        return Classification::deny("version control metadata is never served");
    }
    Classification::allow()
}

/// True for OS metadata that should be dropped without being reported as rejected.
pub fn is_os_junk(path: &str) -> bool {
    let name = path::file_name(path);
    OS_JUNK.contains(&name)
        || path
            .split('/')
            .any(|segment| OS_JUNK_DIRS.contains(&segment))
}

/// Full classification of a normalised bundle path: filename rules, then extension rules.
pub fn classify(path: &str) -> Classification {
    let banned = is_banned_filename(path);
    if !banned.allowed {
        return banned;
    }

    match path::extension(path) {
        Some(ext) if is_denied_extension(&ext) => {
            Classification::deny(format!(".{ext} files are executable and cannot be hosted"))
        }
        Some(ext) if is_allowed_extension(&ext) => Classification::allow(),
        Some(ext) if path::is_well_known(path) => {
            tracing::debug!(path, ext = %ext, "Allowing unlisted extension under .well-known");
            Classification::allow()
        }
        Some(ext) => Classification::deny(format!(".{ext} is not a supported static file type")),
        None if path::is_well_known(path) => Classification::allow(),
        None if EXTENSIONLESS_ALLOWED.contains(&path::file_name(path)) => Classification::allow(),
        None => Classification::deny("files without an extension are not supported"),
    }
}

/// Content type for a path, falling back to `application/octet-stream`.
pub fn content_type_for(path: &str) -> &'static str {
    let Some(ext) = path::extension(path) else {
        return if path::file_name(path) == "CNAME" || path::file_name(path) == "LICENSE" {
            "text/plain; charset=utf-8"
        } else {
            DEFAULT_CONTENT_TYPE
        };
    };
    ALLOWED_EXTENSIONS
        .iter()
        .find(|(allowed, _)| *allowed == ext)
        .map(|(_, ct)| *ct)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Markup documents change with every deploy; everything else is fingerprinted or stable.
pub fn is_markup(path: &str) -> bool {
    matches!(path::extension(path).as_deref(), Some("html") | Some("htm"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_and_deny_lists_are_disjoint() {
        for (ext, _) in ALLOWED_EXTENSIONS {
            assert!(is_allowed_extension(ext), "{ext} should be allowed");
            assert!(!is_denied_extension(ext), "{ext} is on both lists");
        }
    }

    #[test]
    fn classify_table() {
        struct TestCase {
            name: &'static str,
            path: &'static str,
            allowed: bool,
        }
        let cases = vec![
            TestCase { name: "html", path: "index.html", allowed: true },
            TestCase { name: "upper-case css", path: "css/SITE.CSS", allowed: true },
            TestCase { name: "php", path: "api/login.php", allowed: false },
            TestCase { name: "shell", path: "deploy.sh", allowed: false },
            TestCase { name: "htaccess", path: ".htaccess", allowed: false },
            TestCase { name: "nested env", path: "config/.env.production", allowed: false },
            TestCase { name: "manifest", path: "package.json", allowed: false },
            TestCase { name: "git dir", path: ".git/config", allowed: false },
            TestCase { name: "well-known", path: ".well-known/apple-app-site-association", allowed: true },
            TestCase { name: "well-known env", path: ".well-known/.env", allowed: true },
            TestCase { name: "cname", path: "CNAME", allowed: true },
            TestCase { name: "bare name", path: "Makefile", allowed: false },
            TestCase { name: "unknown ext", path: "data.sqlite", allowed: false },
        ];
        for tc in cases {
            let c = classify(tc.path);
            assert_eq!(c.allowed, tc.allowed, "{}: {:?}", tc.name, c.reason);
            assert_eq!(c.reason.is_none(), tc.allowed, "{}", tc.name);
        }
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("a/b.css"), "text/css; charset=utf-8");
        assert_eq!(content_type_for("logo.SVG"), "image/svg+xml");
        assert_eq!(content_type_for("blob"), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn os_junk_detection() {
        assert!(is_os_junk("__MACOSX/._index.html"));
        assert!(is_os_junk("img/.DS_Store"));
        assert!(!is_os_junk("img/logo.png"));
    }
}
