use std::fs;
use std::path::Path;
use std::sync::Arc;

use artipilot::buildinfo::{BuildArtifact, BuildInfo, BuildModule};
use artipilot::cli::SpecArgs;
use artipilot::commands::{self, BuildTarget, TransferRequest};
use artipilot::config::Config;
use artipilot::repo::local::LocalRepository;
use artipilot::repo::{BuildInfoService, RemoteIndex, Repository, SearchQuery};
use artipilot::resolve::{SourceSide, resolve_entry};
use artipilot::spec::{FileSpecEntry, SortKey};
use artipilot::transfer::{OperationKind, SummaryReport, TransferOptions, normalize_path, sha256_hex};
use tempfile::TempDir;

struct Env {
    _home: TempDir,
    srv: TempDir,
    config: Config,
    repo: Arc<dyn Repository>,
}

fn env() -> Env {
    let home = tempfile::tempdir().unwrap();
    let srv = tempfile::tempdir().unwrap();
    let config = Config::with_home(home.path());
    let repo: Arc<dyn Repository> = Arc::new(LocalRepository::open(srv.path()).unwrap());
    Env { _home: home, srv, config, repo }
}

fn root(dir: &Path) -> String {
    normalize_path(&dir.to_string_lossy(), false)
}

fn opts() -> TransferOptions {
    TransferOptions { retries: 1, quiet: true, ..Default::default() }
}

fn run(env: &Env, kind: OperationKind, entries: Vec<FileSpecEntry>) -> SummaryReport {
    let req = TransferRequest::new(kind, entries, opts());
    commands::handle_transfer(&env.config, env.repo.clone(), req).unwrap()
}

fn upload_dir(env: &Env, dir: &Path, glob: &str, target: &str) -> SummaryReport {
    let entry = FileSpecEntry::new(OperationKind::Upload, &format!("{}/{}", root(dir), glob), Some(target));
    run(env, OperationKind::Upload, vec![entry])
}

fn remote_paths(env: &Env, repo: &str, include_dirs: bool) -> Vec<String> {
    let q = SearchQuery { repo: Some(repo.into()), recursive: true, include_dirs, ..Default::default() };
    let mut out: Vec<String> = env.repo.resolve(&q).unwrap().iter().map(|i| i.full_path()).collect();
    out.sort();
    out
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().into_owned()).collect())
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn upload_then_download_roundtrip() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("lib")).unwrap();
    fs::write(src.path().join("lib/core.jar"), b"core").unwrap();
    fs::write(src.path().join("app.jar"), b"app").unwrap();

    let report = upload_dir(&env, src.path(), "*.jar", "libs/");
    assert_eq!(report.status, "success");
    assert_eq!(report.totals.success, 2);
    // uploads are flat by default
    assert_eq!(remote_paths(&env, "libs", false), vec!["libs/app.jar", "libs/core.jar"]);

    let out = tempfile::tempdir().unwrap();
    let entry = FileSpecEntry::new(OperationKind::Download, "libs/*.jar", Some(&format!("{}/", root(out.path()))));
    let report = run(&env, OperationKind::Download, vec![entry]);
    assert_eq!(report.totals.success, 2);
    assert_eq!(fs::read(out.path().join("app.jar")).unwrap(), b"app");
    assert_eq!(fs::read(out.path().join("core.jar")).unwrap(), b"core");
}

#[test]
fn offset_windows_select_one_artifact_each() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    for n in ["a1.in", "a2.in", "a3.in"] {
        fs::write(src.path().join(n), n.as_bytes()).unwrap();
    }
    upload_dir(&env, src.path(), "*.in", "r/");

    for (offset, expected) in ["a1.in", "a2.in", "a3.in"].iter().enumerate() {
        let out = tempfile::tempdir().unwrap();
        let mut entry =
            FileSpecEntry::new(OperationKind::Download, "r/*.in", Some(&format!("{}/", root(out.path()))));
        entry.sort_by = vec![SortKey::Name];
        entry.limit = Some(1);
        entry.offset = offset;
        let report = run(&env, OperationKind::Download, vec![entry]);
        assert_eq!(report.totals.success, 1);
        assert_eq!(files_in(out.path()), vec![expected.to_string()]);
    }
}

#[test]
fn flat_dir_upload_places_bottom_chain_only() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("a/b/c")).unwrap();
    fs::write(src.path().join("a/b/c/f.txt"), b"f").unwrap();

    let mut entry = FileSpecEntry::new(OperationKind::Upload, &format!("{}/a/*", root(src.path())), Some("r1/"));
    entry.include_dirs = true;
    run(&env, OperationKind::Upload, vec![entry]);
    let r1 = remote_paths(&env, "r1", true);
    assert!(r1.contains(&"r1/c".to_string()), "{:?}", r1);
    assert!(!r1.contains(&"r1/b".to_string()), "{:?}", r1);

    fs::create_dir_all(src.path().join("a/b/c/d")).unwrap();
    let mut entry = FileSpecEntry::new(OperationKind::Upload, &format!("{}/a/*", root(src.path())), Some("r2/"));
    entry.include_dirs = true;
    run(&env, OperationKind::Upload, vec![entry]);
    let r2 = remote_paths(&env, "r2", true);
    assert!(r2.contains(&"r2/d".to_string()), "{:?}", r2);
    assert!(!r2.contains(&"r2/c".to_string()), "{:?}", r2);
}

#[test]
fn identical_content_stays_with_its_build() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("x1.bin"), b"same bytes").unwrap();
    fs::write(src.path().join("x2.bin"), b"same bytes").unwrap();

    for (file, name, number, target) in [("x1.bin", "B1", "10", "r/b1/"), ("x2.bin", "B2", "11", "r/b2/")] {
        let entry =
            FileSpecEntry::new(OperationKind::Upload, &format!("{}/{}", root(src.path()), file), Some(target));
        let mut req = TransferRequest::new(OperationKind::Upload, vec![entry], opts());
        req.build = Some(BuildTarget { name: name.into(), number: number.into(), module: None });
        let report = commands::handle_transfer(&env.config, env.repo.clone(), req).unwrap();
        assert_eq!(report.totals.success, 1);
        commands::handle_build_publish(&env.config, env.repo.as_ref(), name, number).unwrap();
    }

    let out = tempfile::tempdir().unwrap();
    let mut entry = FileSpecEntry::new(OperationKind::Download, "r/*", Some(&format!("{}/", root(out.path()))));
    entry.flat = true;
    entry.build = Some(artipilot::parse::parse_build("B1/10").unwrap());
    let report = run(&env, OperationKind::Download, vec![entry]);
    assert_eq!(report.totals.success, 1);
    assert_eq!(files_in(out.path()), vec!["x1.bin"]);

    // LATEST of B2 is 11
    let out2 = tempfile::tempdir().unwrap();
    let mut entry = FileSpecEntry::new(OperationKind::Download, "r/*", Some(&format!("{}/", root(out2.path()))));
    entry.flat = true;
    entry.build = Some(artipilot::parse::parse_build("B2").unwrap());
    run(&env, OperationKind::Download, vec![entry]);
    assert_eq!(files_in(out2.path()), vec!["x2.bin"]);
}

fn published(name: &str, number: &str, started: &str, content: &[u8]) -> BuildInfo {
    BuildInfo {
        name: name.into(),
        number: number.into(),
        started: started.into(),
        modules: vec![BuildModule {
            id: name.into(),
            artifacts: vec![BuildArtifact {
                name: format!("{}.bin", number),
                path: String::new(),
                sha256: sha256_hex(content),
                size: content.len() as u64,
            }],
        }],
    }
}

#[test]
fn latest_picks_most_recently_started_and_is_stable() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("old.bin"), b"old run").unwrap();
    fs::write(src.path().join("new.bin"), b"new run").unwrap();
    upload_dir(&env, src.path(), "*.bin", "r/");

    // number 7 started after number 9
    env.repo.publish_build(&published("nightly", "9", "2026-03-01T10:00:00.000Z", b"old run")).unwrap();
    env.repo.publish_build(&published("nightly", "7", "2026-03-02T10:00:00.000Z", b"new run")).unwrap();

    let mut entry = FileSpecEntry::new(OperationKind::Download, "r/*", Some("out/"));
    entry.build = Some(artipilot::parse::parse_build("nightly/LATEST").unwrap());
    let first = resolve_entry(&entry, SourceSide::Remote, env.repo.as_ref(), false).unwrap();
    let second = resolve_entry(&entry, SourceSide::Remote, env.repo.as_ref(), false).unwrap();
    assert_eq!(first, second);
    let names: Vec<&str> = first.iter().map(|i| i.source_path.as_str()).collect();
    assert_eq!(names, vec!["r/new.bin"]);

    entry.build = Some(artipilot::parse::parse_build("nightly/7").unwrap());
    assert_eq!(resolve_entry(&entry, SourceSide::Remote, env.repo.as_ref(), false).unwrap(), first);
}

#[test]
fn unknown_build_fails_the_entry() {
    let env = env();
    let out = tempfile::tempdir().unwrap();
    let mut entry = FileSpecEntry::new(OperationKind::Download, "r/*", Some(&format!("{}/", root(out.path()))));
    entry.build = Some(artipilot::parse::parse_build("nope/1").unwrap());
    let report = run(&env, OperationKind::Download, vec![entry]);
    assert_eq!(report.status, "failure");
    assert_eq!(report.totals.failure, 1);
}

#[test]
fn excludes_match_the_full_relative_path() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("sub")).unwrap();
    fs::write(src.path().join("a1.in"), b"1").unwrap();
    fs::write(src.path().join("a2.in"), b"2").unwrap();
    fs::write(src.path().join("sub/a1.in"), b"3").unwrap();
    for (local, target) in [("a1.in", "r/a1.in"), ("a2.in", "r/a2.in"), ("sub/a1.in", "r/sub/a1.in")] {
        let e = FileSpecEntry::new(
            OperationKind::Upload,
            &format!("{}/{}", root(src.path()), local),
            Some(target),
        );
        run(&env, OperationKind::Upload, vec![e]);
    }

    let cases: [(&str, &[&str]); 2] = [("*/a1.in", &["a1.in", "a2.in"]), ("*a1.in", &["a2.in"])];
    for (exclude, expected) in cases {
        let out = tempfile::tempdir().unwrap();
        let mut e = FileSpecEntry::new(OperationKind::Download, "r/*.in", Some(&format!("{}/", root(out.path()))));
        e.flat = true;
        e.exclude_patterns = vec![exclude.to_string()];
        let report = run(&env, OperationKind::Download, vec![e]);
        assert_eq!(report.status, "success");
        assert_eq!(files_in(out.path()), expected.to_vec(), "exclude {}", exclude);
    }
}

#[test]
fn redownload_skips_by_checksum_and_keeps_mtime() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("pkg.tgz"), b"payload").unwrap();
    upload_dir(&env, src.path(), "pkg.tgz", "r/");

    let out = tempfile::tempdir().unwrap();
    let target = format!("{}/", root(out.path()));
    let entry = FileSpecEntry::new(OperationKind::Download, "r/pkg.tgz", Some(&target));
    run(&env, OperationKind::Download, vec![entry.clone()]);
    let first = fs::metadata(out.path().join("pkg.tgz")).unwrap().modified().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(20));
    let report = run(&env, OperationKind::Download, vec![entry]);
    assert_eq!(report.totals.success, 1);
    let second = fs::metadata(out.path().join("pkg.tgz")).unwrap().modified().unwrap();
    assert_eq!(first, second);
}

#[test]
fn placeholders_rename_on_upload() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("app-1.0.bin"), b"v1").unwrap();
    fs::write(src.path().join("app-2.0.bin"), b"v2").unwrap();
    let entry = FileSpecEntry::new(
        OperationKind::Upload,
        &format!("{}/(*)-(*).bin", root(src.path())),
        Some("r/{1}/{2}/{1}.bin"),
    );
    let report = run(&env, OperationKind::Upload, vec![entry]);
    assert_eq!(report.totals.success, 2);
    assert_eq!(remote_paths(&env, "r", false), vec!["r/app/1.0/app.bin", "r/app/2.0/app.bin"]);

    let bad = FileSpecEntry::new(
        OperationKind::Upload,
        &format!("{}/(*)-(*).bin", root(src.path())),
        Some("r/{3}.bin"),
    );
    let report = run(&env, OperationKind::Upload, vec![bad]);
    assert_eq!(report.totals.failure, 2);
    assert_eq!(report.status, "failure");
}

#[cfg(unix)]
#[test]
fn symlink_cycle_upload_terminates() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("x")).unwrap();
    fs::write(src.path().join("x/f.txt"), b"f").unwrap();
    std::os::unix::fs::symlink(src.path().join("x"), src.path().join("x/loop")).unwrap();

    let report = upload_dir(&env, src.path(), "*", "r/");
    assert_eq!(report.totals.failure, 0);
    assert!(report.totals.success >= 1);
    assert!(remote_paths(&env, "r", false).contains(&"r/f.txt".to_string()));
}

#[cfg(unix)]
#[test]
fn excluded_broken_link_is_not_an_error() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    let link = src.path().join("dangling");
    std::os::unix::fs::symlink(src.path().join("gone"), &link).unwrap();
    let pattern = root(&link);

    let mut entry = FileSpecEntry::new(OperationKind::Upload, &pattern, Some("r/"));
    entry.exclude_patterns = vec!["*".into()];
    let report = run(&env, OperationKind::Upload, vec![entry]);
    assert_eq!(report.status, "success");
    assert_eq!(report.totals.failure, 0);

    let report = run(&env, OperationKind::Upload, vec![FileSpecEntry::new(OperationKind::Upload, &pattern, Some("r/"))]);
    assert_eq!(report.status, "failure");
    assert_eq!(report.totals.failure, 1);
}

#[test]
fn copy_into_existing_folder_nests_under_it() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a1.in"), b"1").unwrap();
    fs::write(src.path().join("a2.in"), b"2").unwrap();
    fs::write(src.path().join("keep.txt"), b"k").unwrap();
    upload_dir(&env, src.path(), "*.in", "r1/path/inner/");
    upload_dir(&env, src.path(), "keep.txt", "r2/path/");

    let entry = FileSpecEntry::new(OperationKind::Copy, "r1/path", Some("r2/path"));
    let report = run(&env, OperationKind::Copy, vec![entry]);
    assert_eq!(report.status, "success");
    assert_eq!(report.totals.success, 2);
    assert_eq!(
        remote_paths(&env, "r2", false),
        vec!["r2/path/keep.txt", "r2/path/path/inner/a1.in", "r2/path/path/inner/a2.in"]
    );
}

#[test]
fn move_and_copy_with_dirs_take_each_subtree_once() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("x.bin"), b"x").unwrap();
    upload_dir(&env, src.path(), "x.bin", "r/a/");

    let mut entry = FileSpecEntry::new(OperationKind::Copy, "r/*", Some("c/"));
    entry.include_dirs = true;
    let report = run(&env, OperationKind::Copy, vec![entry]);
    assert_eq!((report.totals.success, report.totals.failure), (1, 0));
    assert_eq!(remote_paths(&env, "c", false), vec!["c/a/x.bin"]);

    let mut entry = FileSpecEntry::new(OperationKind::Move, "r/*", Some("t/"));
    entry.include_dirs = true;
    let report = run(&env, OperationKind::Move, vec![entry]);
    assert_eq!(report.status, "success");
    assert_eq!((report.totals.success, report.totals.failure), (1, 0));
    assert_eq!(remote_paths(&env, "t", false), vec!["t/a/x.bin"]);
    assert!(remote_paths(&env, "r", false).is_empty());
}

#[test]
fn spec_file_entries_run_in_order() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.txt"), b"a").unwrap();
    fs::write(src.path().join("b.log"), b"b").unwrap();
    let spec_path = src.path().join("spec.json");
    let doc = serde_json::json!({
        "files": [
            { "pattern": format!("{}/*.txt", root(src.path())), "target": "r/text/" },
            { "pattern": format!("{}/*.log", root(src.path())), "target": "r/logs/", "flat": "true" }
        ]
    });
    fs::write(&spec_path, doc.to_string()).unwrap();

    let spec = SpecArgs { spec: Some(spec_path), ..Default::default() };
    let entries = commands::collect_entries(OperationKind::Upload, None, None, &spec).unwrap();
    assert_eq!(entries.len(), 2);
    let report = run(&env, OperationKind::Upload, entries);
    assert_eq!(report.totals.success, 2);
    assert_eq!(remote_paths(&env, "r", false), vec!["r/logs/b.log", "r/text/a.txt"]);
}

#[test]
fn delete_folder_and_props() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.bin"), b"a").unwrap();
    fs::write(src.path().join("b.bin"), b"b").unwrap();
    upload_dir(&env, src.path(), "*.bin", "r/dir/");
    upload_dir(&env, src.path(), "a.bin", "r/keep/");

    let mut req = TransferRequest::new(
        OperationKind::SetProps,
        vec![FileSpecEntry::new(OperationKind::SetProps, "r/keep/*", None)],
        opts(),
    );
    req.options.props = vec![("qa".into(), "passed".into())];
    assert_eq!(commands::handle_transfer(&env.config, env.repo.clone(), req).unwrap().totals.success, 1);
    let q = SearchQuery { props: vec![("qa".into(), "passed".into())], recursive: true, ..Default::default() };
    assert_eq!(env.repo.resolve(&q).unwrap().len(), 1);

    let report = run(&env, OperationKind::Delete, vec![FileSpecEntry::new(OperationKind::Delete, "r/dir/", None)]);
    assert_eq!(report.totals.success, 1);
    assert_eq!(remote_paths(&env, "r", false), vec!["r/keep/a.bin"]);
    assert!(!env.srv.path().join("r/dir/a.bin").exists());
}

#[test]
fn search_lists_matches() {
    let env = env();
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.bin"), b"a").unwrap();
    upload_dir(&env, src.path(), "a.bin", "r/x/");
    let entries = vec![FileSpecEntry::new(OperationKind::Search, "r/x/*", None)];
    let items = commands::handle_search(env.repo.as_ref(), &entries).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].source_path, "r/x/a.bin");
    let json = serde_json::to_value(&items).unwrap();
    assert_eq!(json[0]["size"], 1);
}
