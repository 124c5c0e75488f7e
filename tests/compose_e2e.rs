//! End-to-end composition tests.
//!
//! Git scenarios run against local fixture repositories over `file://` URLs
//! and are gated behind the `integration-tests` feature because they shell
//! out to the `git` binary. The http scenario serves its archive from a
//! loopback listener.

use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;

use plasma_compose::composer::{Composer, ComposerOptions};
use plasma_compose::credentials::FileStore;
use plasma_compose::error::Error;

/// Initialize a git repository with files and commit them, optionally
/// tagging the commit. The repository uses "main" as the default branch.
fn init_git_repo(dir: &Path, files: &[(&str, &str)], tag: Option<&str>) {
    run_git(dir, &["init", "-b", "main"]);
    run_git(dir, &["config", "user.email", "test@example.com"]);
    run_git(dir, &["config", "user.name", "Test User"]);
    run_git(dir, &["config", "commit.gpgsign", "false"]);

    commit_files(dir, files, "Initial commit");

    if let Some(tag) = tag {
        run_git(dir, &["tag", tag]);
    }
}

fn commit_files(dir: &Path, files: &[(&str, &str)], message: &str) {
    for (rel, content) in files {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    run_git(dir, &["add", "."]);
    run_git(dir, &["commit", "-m", message]);
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git not available");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn options() -> ComposerOptions {
    ComposerOptions {
        interactive: false,
        ..ComposerOptions::default()
    }
}

fn store(platform: &Path) -> Box<FileStore> {
    Box::new(FileStore::open(&platform.join("credentials.yaml")).unwrap())
}

fn run_compose(platform: &Path) -> plasma_compose::error::Result<()> {
    let composer = Composer::new(platform.to_path_buf(), options())?;
    composer.run_install(store(platform))
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_single_git_dependency_by_tag() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    init_git_repo(&repo, &[("a.txt", "A")], Some("0.0.7"));

    let platform = tmp.path().join("platform");
    fs::create_dir_all(&platform).unwrap();
    fs::write(
        platform.join("plasma-compose.yaml"),
        format!(
            r#"name: platform
dependencies:
    - name: dep
      source:
        url: "{}"
        ref: 0.0.7
"#,
            file_url(&repo)
        ),
    )
    .unwrap();

    run_compose(&platform).unwrap();

    // Checkout lands at <working>/<name>/<target>, build carries the file.
    assert_eq!(
        fs::read_to_string(platform.join(".compose/packages/dep/0.0.7/a.txt")).unwrap(),
        "A"
    );
    assert_eq!(
        fs::read_to_string(platform.join(".compose/build/a.txt")).unwrap(),
        "A"
    );

    // A second run finds the checkout up to date and still produces the
    // same build.
    run_compose(&platform).unwrap();
    assert_eq!(
        fs::read_to_string(platform.join(".compose/build/a.txt")).unwrap(),
        "A"
    );
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_branch_dependency_refetched_when_outdated() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    init_git_repo(&repo, &[("a.txt", "v1")], None);

    let platform = tmp.path().join("platform");
    fs::create_dir_all(&platform).unwrap();
    fs::write(
        platform.join("plasma-compose.yaml"),
        format!(
            r#"name: platform
dependencies:
    - name: dep
      source:
        url: "{}"
        ref: main
"#,
            file_url(&repo)
        ),
    )
    .unwrap();

    run_compose(&platform).unwrap();
    assert_eq!(
        fs::read_to_string(platform.join(".compose/build/a.txt")).unwrap(),
        "v1"
    );

    // Move the remote branch forward; the next run must detect the stale
    // checkout and re-fetch.
    commit_files(&repo, &[("a.txt", "v2")], "Update a.txt");

    run_compose(&platform).unwrap();
    assert_eq!(
        fs::read_to_string(platform.join(".compose/build/a.txt")).unwrap(),
        "v2"
    );
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_platform_file_wins_over_package_without_strategy() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    init_git_repo(&repo, &[("a.txt", "pkg")], None);

    let platform = tmp.path().join("platform");
    fs::create_dir_all(&platform).unwrap();
    fs::write(platform.join("a.txt"), "local").unwrap();
    fs::write(
        platform.join("plasma-compose.yaml"),
        format!(
            r#"name: platform
dependencies:
    - name: dep
      source:
        url: "{}"
        ref: main
"#,
            file_url(&repo)
        ),
    )
    .unwrap();

    run_compose(&platform).unwrap();
    assert_eq!(
        fs::read_to_string(platform.join(".compose/build/a.txt")).unwrap(),
        "local"
    );
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_overwrite_strategy_from_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    init_git_repo(&repo, &[("a.txt", "pkg")], None);

    let platform = tmp.path().join("platform");
    fs::create_dir_all(&platform).unwrap();
    fs::write(platform.join("a.txt"), "local").unwrap();
    fs::write(
        platform.join("plasma-compose.yaml"),
        format!(
            r#"name: platform
dependencies:
    - name: dep
      source:
        url: "{}"
        ref: main
        strategy:
            - name: overwrite-local-file
              path: ["."]
"#,
            file_url(&repo)
        ),
    )
    .unwrap();

    run_compose(&platform).unwrap();
    assert_eq!(
        fs::read_to_string(platform.join(".compose/build/a.txt")).unwrap(),
        "pkg"
    );
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_nested_manifest_merges_dependency_first() {
    let tmp = tempfile::tempdir().unwrap();

    let repo_b = tmp.path().join("repo-b");
    fs::create_dir_all(&repo_b).unwrap();
    init_git_repo(&repo_b, &[("c.txt", "from-b")], None);

    // Repository a carries its own manifest referencing b.
    let repo_a = tmp.path().join("repo-a");
    fs::create_dir_all(&repo_a).unwrap();
    init_git_repo(
        &repo_a,
        &[
            ("c.txt", "from-a"),
            (
                "plasma-compose.yaml",
                &format!(
                    r#"name: a
dependencies:
    - name: b
      source:
        url: "{}"
        ref: main
"#,
                    file_url(&repo_b)
                ),
            ),
        ],
        None,
    );

    let platform = tmp.path().join("platform");
    fs::create_dir_all(&platform).unwrap();
    fs::write(
        platform.join("plasma-compose.yaml"),
        format!(
            r#"name: platform
dependencies:
    - name: a
      source:
        url: "{}"
        ref: main
"#,
            file_url(&repo_a)
        ),
    )
    .unwrap();

    run_compose(&platform).unwrap();

    // Both packages were fetched, and b merged before a: first writer wins.
    assert!(platform.join(".compose/packages/b/main").exists());
    assert!(platform.join(".compose/packages/a/main").exists());
    assert_eq!(
        fs::read_to_string(platform.join(".compose/build/c.txt")).unwrap(),
        "from-b"
    );
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_missing_remote_ref_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    init_git_repo(&repo, &[("a.txt", "A")], None);

    let platform = tmp.path().join("platform");
    fs::create_dir_all(&platform).unwrap();
    fs::write(
        platform.join("plasma-compose.yaml"),
        format!(
            r#"name: platform
dependencies:
    - name: dep
      source:
        url: "{}"
        ref: no-such-ref
"#,
            file_url(&repo)
        ),
    )
    .unwrap();

    let result = run_compose(&platform);
    assert!(matches!(result, Err(Error::RefNotFound { .. })));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_skip_not_versioned_excludes_untracked_files() {
    let tmp = tempfile::tempdir().unwrap();
    let platform = tmp.path().join("platform");
    fs::create_dir_all(&platform).unwrap();

    init_git_repo(&platform, &[("tracked.txt", "tracked")], None);
    fs::write(platform.join("untracked.txt"), "untracked").unwrap();
    fs::write(platform.join("plasma-compose.yaml"), "name: platform\n").unwrap();

    let composer = Composer::new(
        platform.clone(),
        ComposerOptions {
            skip_not_versioned: true,
            interactive: false,
            ..ComposerOptions::default()
        },
    )
    .unwrap();
    composer.run_install(store(&platform)).unwrap();

    assert!(platform.join(".compose/build/tracked.txt").exists());
    assert!(!platform.join(".compose/build/untracked.txt").exists());
}

/// Serve a fixed payload for any request on a loopback listener.
fn spawn_archive_server(payload: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        while let Ok((mut stream, _)) = listener.accept() {
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request);
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/gzip\r\nConnection: close\r\n\r\n",
                payload.len()
            );
            let _ = stream.write_all(header.as_bytes());
            let _ = stream.write_all(&payload);
        }
    });

    format!("http://{addr}")
}

/// Build a tar.gz archive in memory with a single root directory.
fn archive_payload(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut dir_header = tar::Header::new_gnu();
    dir_header.set_entry_type(tar::EntryType::Directory);
    dir_header.set_size(0);
    dir_header.set_mode(0o755);
    dir_header.set_path(format!("{root}/")).unwrap();
    dir_header.set_cksum();
    builder.append(&dir_header, std::io::empty()).unwrap();

    for (rel, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_path(format!("{root}/{rel}")).unwrap();
        header.set_cksum();
        builder.append(&header, content.as_bytes()).unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap()
}

#[test]
fn test_http_dependency_extracts_and_renames_root() {
    let tmp = tempfile::tempdir().unwrap();
    let payload = archive_payload("foo-0.0.1", &[("b.txt", "B")]);
    let base = spawn_archive_server(payload);

    let platform = tmp.path().join("platform");
    fs::create_dir_all(&platform).unwrap();
    fs::write(
        platform.join("plasma-compose.yaml"),
        format!(
            r#"name: platform
dependencies:
    - name: foo
      source:
        type: http
        url: "{base}/foo-0.0.1.tar.gz"
        ref: 0.0.1
"#
        ),
    )
    .unwrap();

    run_compose(&platform).unwrap();

    // The archive root was renamed to the package target.
    assert_eq!(
        fs::read_to_string(platform.join(".compose/packages/foo/0.0.1/b.txt")).unwrap(),
        "B"
    );
    assert_eq!(
        fs::read_to_string(platform.join(".compose/build/b.txt")).unwrap(),
        "B"
    );
    // The archive itself was removed after extraction.
    assert!(!platform
        .join(".compose/packages/foo/foo-0.0.1.tar.gz")
        .exists());

    // Http archives are immutable by URL: a second run keeps the checkout.
    run_compose(&platform).unwrap();
    assert_eq!(
        fs::read_to_string(platform.join(".compose/build/b.txt")).unwrap(),
        "B"
    );
}

#[test]
fn test_http_not_found_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        while let Ok((mut stream, _)) = listener.accept() {
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request);
            let _ = stream.write_all(
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
        }
    });

    let tmp = tempfile::tempdir().unwrap();
    let platform = tmp.path().join("platform");
    fs::create_dir_all(&platform).unwrap();
    fs::write(
        platform.join("plasma-compose.yaml"),
        format!(
            r#"name: platform
dependencies:
    - name: gone
      source:
        type: http
        url: "http://{addr}/gone.tar.gz"
"#
        ),
    )
    .unwrap();

    let result = run_compose(&platform);
    assert!(matches!(result, Err(Error::RepositoryNotFound { .. })));
}
