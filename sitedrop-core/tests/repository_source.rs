mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{Harness, INDEX_HTML};
use sitedrop_core::contract::{MockRepositoryFetcher, NullNotifier};
use sitedrop_core::error::{CloneError, IngestError};
use sitedrop_core::inspect::{EntryPolicy, InspectOptions};
use sitedrop_core::model::{RepoInfo, UploadStatus};
use sitedrop_core::repository::{
    list_tree, scan_tree, sweep_stale_scratch, validate_branch, validate_url, SCRATCH_PREFIX,
};

fn scratch_entries(root: &Path) -> usize {
    fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

fn write_file(root: &Path, relative: &str, body: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

#[test]
fn clone_urls_are_allow_listed() {
    struct TestCase {
        name: &'static str,
        url: &'static str,
        ok: bool,
    }
    let cases = vec![
        TestCase { name: "github", url: "https://github.com/acme/site", ok: true },
        TestCase { name: "github .git", url: "https://github.com/acme/site.git", ok: true },
        TestCase { name: "gitlab subgroup", url: "https://gitlab.com/group/sub/project", ok: true },
        TestCase { name: "codeberg", url: "https://codeberg.org/acme/pages", ok: true },
        TestCase { name: "self hosted", url: "https://git.example.com/team/site.git", ok: true },
        TestCase { name: "plain http", url: "http://github.com/acme/site", ok: false },
        TestCase { name: "file scheme", url: "file:///etc/passwd", ok: false },
        TestCase { name: "traversal", url: "https://github.com/../etc/passwd", ok: false },
        TestCase { name: "home relative", url: "https://example.com/~me/site", ok: false },
        TestCase { name: "option injection", url: "--upload-pack=touch /tmp/x", ok: false },
        TestCase { name: "scp style", url: "git@github.com:acme/site.git", ok: false },
        TestCase { name: "query string", url: "https://github.com/acme/site?x=1", ok: false },
        TestCase { name: "bare host", url: "https://localhost/site", ok: false },
        TestCase { name: "single label", url: "https://gitserver/team/site", ok: false },
        TestCase { name: "metadata ip", url: "https://169.254.169.254/x/y", ok: false },
        TestCase { name: "private ip with port", url: "https://10.0.0.7:8443/team/site", ok: false },
        TestCase { name: "ipv6 literal", url: "https://[::1]/team/site", ok: false },
        TestCase { name: "numeric tld", url: "https://git.example.123/team/site", ok: false },
        TestCase { name: "self hosted port", url: "https://git.example.com:8443/team/site", ok: true },
        TestCase { name: "empty", url: "  ", ok: false },
    ];
    for tc in cases {
        let result = validate_url(tc.url);
        assert_eq!(result.is_ok(), tc.ok, "case {}: {:?}", tc.name, result);
    }
}

#[test]
fn branch_names_are_checked() {
    struct TestCase {
        name: &'static str,
        branch: &'static str,
        expected: Option<&'static str>,
    }
    let cases = vec![
        TestCase { name: "simple", branch: "main", expected: Some("main") },
        TestCase { name: "nested", branch: "feature/x-1.2", expected: Some("feature/x-1.2") },
        TestCase { name: "default", branch: "", expected: Some("main") },
        TestCase { name: "option", branch: "-x", expected: None },
        TestCase { name: "dotdot", branch: "a..b", expected: None },
        TestCase { name: "space", branch: "a b", expected: None },
        TestCase { name: "lock", branch: "x.lock", expected: None },
        TestCase { name: "double slash", branch: "a//b", expected: None },
        TestCase { name: "shell", branch: "$(reboot)", expected: None },
    ];
    for tc in cases {
        let got = validate_branch(tc.branch).ok();
        assert_eq!(got.as_deref(), tc.expected, "case {}", tc.name);
    }
}

#[tokio::test]
async fn repository_serving_folder_is_deployed_and_scratch_removed() {
    let mut fetcher = MockRepositoryFetcher::new();
    fetcher
        .expect_fetch()
        .withf(|url, branch, _| url == "https://github.com/acme/site" && branch == "main")
        .times(1)
        .returning(|_, branch, dest| {
            write_file(dest, "public/index.html", INDEX_HTML);
            write_file(dest, "public/css/site.css", b"body{}");
            write_file(dest, "README.md", b"# site");
            write_file(dest, "src/app.js", b"export {}");
            write_file(dest, ".git/HEAD", b"ref: refs/heads/main");
            Ok(RepoInfo {
                commit_hash: "0123abcd".to_string(),
                branch: branch.to_string(),
            })
        });
    let h = Harness::build(100_000, 5, fetcher, Arc::new(NullNotifier));
    let site = h.site("from-git").await;

    let report = h
        .ingestor
        .submit_repository(&h.owner, site.id, "https://github.com/acme/site", "")
        .await
        .unwrap();

    assert_eq!(report.repo.as_ref().map(|r| r.commit_hash.as_str()), Some("0123abcd"));
    assert_eq!(report.serving_subfolder.as_deref(), Some("public"));
    assert_eq!(report.committed_files, 2);
    let content = h.site_record(site.id).await.content_namespace().unwrap();
    let keys = h.ingestor.storage().list(&content).await.unwrap();
    assert_eq!(keys, vec!["public/css/site.css", "public/index.html"]);
    assert_eq!(scratch_entries(h.scratch.path()), 0);

    let served = h.ingestor.get_served_file(site.id, "").await;
    assert!(served.is_err(), "pending sites are not served");
}

#[tokio::test]
async fn failed_clone_still_removes_scratch() {
    let mut fetcher = MockRepositoryFetcher::new();
    fetcher.expect_fetch().times(1).returning(|_, _, dest| {
        write_file(dest, "partial.html", b"<p>");
        Err(CloneError::GitFailed {
            status: "exit status: 128".to_string(),
            stderr: "Remote branch nope not found".to_string(),
        })
    });
    let h = Harness::build(100_000, 5, fetcher, Arc::new(NullNotifier));
    let site = h.site("broken-git").await;

    let result = h
        .ingestor
        .submit_repository(&h.owner, site.id, "https://github.com/acme/site", "nope")
        .await;
    assert!(matches!(result, Err(IngestError::Clone(CloneError::GitFailed { .. }))));
    assert_eq!(scratch_entries(h.scratch.path()), 0);

    let uploads = h.repo.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].status, UploadStatus::Failed);
    assert!(uploads[0].error.as_deref().unwrap_or("").contains("not found"));
}

#[tokio::test]
async fn rejected_url_never_reaches_the_fetcher() {
    let h = Harness::new(100_000);
    let site = h.site("no-fetch").await;
    let result = h
        .ingestor
        .submit_repository(&h.owner, site.id, "file:///srv/secret", "main")
        .await;
    assert!(matches!(result, Err(IngestError::Clone(CloneError::InvalidUrl(_)))));
    assert_eq!(scratch_entries(h.scratch.path()), 0);
}

#[test]
fn stale_scratch_directories_are_swept() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join(format!("{SCRATCH_PREFIX}dead-1"))).unwrap();
    fs::create_dir(root.path().join(format!("{SCRATCH_PREFIX}dead-2"))).unwrap();
    fs::create_dir(root.path().join("unrelated")).unwrap();

    assert_eq!(sweep_stale_scratch(root.path(), Duration::from_secs(3600)).unwrap(), 0);
    assert_eq!(sweep_stale_scratch(root.path(), Duration::ZERO).unwrap(), 2);
    assert!(root.path().join("unrelated").exists());
    assert_eq!(
        sweep_stale_scratch(&root.path().join("missing"), Duration::ZERO).unwrap(),
        0
    );
}

#[test]
fn tree_listing_skips_git_metadata() {
    let root = tempfile::tempdir().unwrap();
    write_file(root.path(), "index.html", INDEX_HTML);
    write_file(root.path(), "a/b/c.css", b"c{}");
    write_file(root.path(), ".git/config", b"[core]");
    #[cfg(unix)]
    std::os::unix::fs::symlink("/etc/passwd", root.path().join("passwd.txt")).unwrap();

    let listing = list_tree(root.path()).unwrap();
    let paths: Vec<_> = listing.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["a/b/c.css", "index.html"]);
    #[cfg(unix)]
    assert_eq!(listing.symlinks, vec!["passwd.txt"]);
}

#[cfg(unix)]
#[test]
fn strict_scan_rejects_symlinked_trees() {
    let root = tempfile::tempdir().unwrap();
    write_file(root.path(), "index.html", INDEX_HTML);
    std::os::unix::fs::symlink("/etc/passwd", root.path().join("passwd.txt")).unwrap();

    let strict = scan_tree(root.path(), &InspectOptions::default(), 1024).unwrap();
    assert!(!strict.valid);
    assert!(strict
        .errors
        .iter()
        .any(|v| v.path.as_deref() == Some("passwd.txt")));

    let lenient = InspectOptions {
        policy: EntryPolicy::Skip,
        ..InspectOptions::default()
    };
    let skipped = scan_tree(root.path(), &lenient, 1024).unwrap();
    assert!(skipped.valid, "{:?}", skipped.errors);
    assert_eq!(skipped.rejected_entries.len(), 1);
}
