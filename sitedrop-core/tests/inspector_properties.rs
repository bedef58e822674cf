use sitedrop_core::classify::{self, ALLOWED_EXTENSIONS};
use sitedrop_core::inspect::{inspect, BundleEntry, BundleInspector, EntryPolicy, InspectOptions};
use sitedrop_core::path;

fn bundle(paths: &[&str]) -> Vec<BundleEntry> {
    paths.iter().map(|p| BundleEntry::new(*p, 100)).collect()
}

fn messages(report: &sitedrop_core::inspect::InspectionReport) -> String {
    report
        .errors
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn validated_paths_are_never_absolute_or_traversing() {
    struct TestCase {
        name: &'static str,
        input: &'static str,
        accepted: bool,
    }
    let cases = vec![
        TestCase { name: "plain", input: "css/site.css", accepted: true },
        TestCase { name: "dot slash", input: "./index.html", accepted: true },
        TestCase { name: "dotdot segment", input: "a/../b.html", accepted: false },
        TestCase { name: "leading dotdot", input: "../etc/passwd", accepted: false },
        TestCase { name: "absolute", input: "/etc/passwd", accepted: false },
        TestCase { name: "drive letter", input: "C:/Windows/x.js", accepted: false },
        TestCase { name: "duplicate slash", input: "a//b.css", accepted: false },
        TestCase { name: "nul byte", input: "a\u{0}.html", accepted: false },
        TestCase { name: "delete char", input: "a\u{7f}.html", accepted: false },
        TestCase { name: "backslash", input: "a\\b.html", accepted: false },
        TestCase { name: "dots inside name", input: "a..b.html", accepted: true },
    ];
    for tc in cases {
        let result = path::validate(tc.input);
        assert_eq!(result.is_ok(), tc.accepted, "case {}: {:?}", tc.name, result);
        if let Ok(clean) = result {
            assert!(!clean.starts_with('/'), "case {}", tc.name);
            assert!(!clean.split('/').any(|s| s == ".."), "case {}", tc.name);
        }
    }

    let long = "a/".repeat(250) + "b.html";
    assert!(path::validate(&long).is_err());
}

#[test]
fn allow_list_and_deny_list_are_mutually_exclusive() {
    for (ext, _) in ALLOWED_EXTENSIONS {
        assert!(classify::is_allowed_extension(ext), "{ext}");
        assert!(!classify::is_denied_extension(ext), "{ext} is on both lists");
    }
}

#[test]
fn readme_only_bundle_is_rejected_for_missing_index() {
    let report = inspect(&bundle(&["readme.txt"]), &InspectOptions::default());
    assert!(!report.valid);
    assert!(!report.has_index);
    assert!(messages(&report).contains("index"), "{}", messages(&report));
}

#[test]
fn manifest_with_build_script_requires_build() {
    let mut entries = bundle(&["index.html"]);
    entries.push(BundleEntry::with_content(
        "package.json",
        br#"{"scripts":{"build":"vite build"},"devDependencies":{"vite":"5"}}"#.to_vec(),
    ));
    let report = inspect(&entries, &InspectOptions::default());
    assert!(!report.valid);
    assert!(report.requires_build);
    assert!(messages(&report).contains("build"));
    assert_eq!(report.framework.as_deref(), Some("Vite"));
    assert!(report.build_reason.unwrap().contains("dist"));
}

#[test]
fn build_tool_config_requires_build_without_manifest() {
    let report = inspect(
        &bundle(&["index.html", "webpack.config.js"]),
        &InspectOptions::default(),
    );
    assert!(report.requires_build);
    assert!(report.build_reason.unwrap().contains("webpack"));
}

#[test]
fn uncompiled_components_without_index_require_build() {
    let report = inspect(
        &bundle(&["src/App.tsx", "src/main.tsx"]),
        &InspectOptions::default(),
    );
    assert!(report.requires_build);
    assert!(!report.has_index);
}

#[test]
fn malformed_manifest_is_an_error() {
    let mut entries = bundle(&["index.html"]);
    entries.push(BundleEntry::with_content("package.json", b"{not json".to_vec()));
    let report = inspect(&entries, &InspectOptions::default());
    assert!(!report.valid);
    assert!(messages(&report).contains("not valid JSON"));
}

#[test]
fn public_subfolder_is_served_with_a_warning() {
    let report = inspect(
        &bundle(&["public/index.html", "public/app.js", "README.md"]),
        &InspectOptions::default(),
    );
    assert!(report.valid, "{}", messages(&report));
    assert!(report.has_index);
    assert_eq!(report.serving_subfolder.as_deref(), Some("public"));
    assert_eq!(report.index_path.as_deref(), Some("public/index.html"));
    assert!(!report.warnings.is_empty());
    assert_eq!(report.serving_entries().count(), 2);
}

#[test]
fn htm_index_is_accepted() {
    let report = inspect(&bundle(&["index.htm"]), &InspectOptions::default());
    assert!(report.valid, "{}", messages(&report));
    assert_eq!(report.index_path.as_deref(), Some("index.htm"));
}

#[test]
fn every_violation_is_reported_at_once() {
    let options = InspectOptions {
        max_files: 2,
        ..InspectOptions::default()
    };
    let report = inspect(
        &bundle(&["shell.php", ".env", "../x.css", "notes.txt"]),
        &options,
    );
    assert!(!report.valid);
    let all = messages(&report);
    assert!(all.contains("index"), "{all}");
    assert!(all.contains("shell.php"), "{all}");
    assert!(all.contains(".env"), "{all}");
    assert!(all.contains("../x.css"), "{all}");
    assert!(all.contains("limit is 2"), "{all}");
}

#[test]
fn skip_policy_keeps_the_bundle_valid() {
    let options = InspectOptions {
        policy: EntryPolicy::Skip,
        ..InspectOptions::default()
    };
    let inspector = BundleInspector::new(options);
    let report = inspector.inspect(&bundle(&["index.html", "shell.php", ".htaccess", "a.css"]));
    assert!(report.valid, "{}", messages(&report));
    assert_eq!(report.rejected_entries.len(), 2);
    let accepted: Vec<_> = report.accepted.iter().map(|e| e.storage_path.as_str()).collect();
    assert_eq!(accepted, vec!["index.html", "a.css"]);
}

#[test]
fn well_known_files_survive_and_os_junk_is_skipped() {
    let report = inspect(
        &bundle(&[
            "index.html",
            ".well-known/security.txt",
            ".well-known/apple-app-site-association",
            ".DS_Store",
            "img/Thumbs.db",
        ]),
        &InspectOptions::default(),
    );
    assert!(report.valid, "{}", messages(&report));
    assert_eq!(report.file_count, 3);
    assert!(report.warnings.iter().any(|w| w.contains("metadata")));
}

#[test]
fn size_ceiling_rejects_and_warns_near_limit() {
    let options = InspectOptions {
        max_bytes: 240,
        ..InspectOptions::default()
    };
    let report = inspect(&bundle(&["index.html", "a.css", "b.css"]), &options);
    assert!(!report.valid);

    let near = inspect(&bundle(&["index.html", "a.css"]), &options);
    assert!(near.valid);
    assert!(near.warnings.iter().any(|w| w.contains("80%")));
}
