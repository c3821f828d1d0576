//! End-to-end mirror tests against throwaway local git repositories.

use grove_core::{
    AcquireError, Acquirer, CheckoutStatus, FsError, GroveError, RefreshPolicy,
    RepositoryService, SearchEngine, ServiceOptions,
};
use std::future::Future;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Run a git command and assert it succeeded
fn git(root: &Path, args: &[&str]) -> std::process::Output {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

/// Helper to create an upstream git repo with known content
fn create_upstream() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    git(root, &["init"]);
    git(root, &["config", "user.email", "test@test.com"]);
    git(root, &["config", "user.name", "Test"]);
    git(root, &["config", "commit.gpgsign", "false"]);

    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(root.join("README.md"), "# Upstream\n\nversion one\n").unwrap();
    let numbered: String = (1..=10).map(|i| format!("line {i}\n")).collect();
    std::fs::write(root.join("src/numbers.txt"), numbered).unwrap();
    std::fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();

    git(root, &["add", "."]);
    git(root, &["commit", "-m", "init"]);
    dir
}

fn commit_readme(upstream: &Path, content: &str) {
    std::fs::write(upstream.join("README.md"), content).unwrap();
    git(upstream, &["commit", "-am", "update readme"]);
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Refresh timings long enough that the loop never fires during a test.
fn idle_policy() -> RefreshPolicy {
    RefreshPolicy {
        interval: Duration::from_secs(3600),
        retry_initial: Duration::from_secs(60),
        retry_max: Duration::from_secs(3600),
    }
}

fn start(upstream: &Path) -> RepositoryService {
    RepositoryService::start(ServiceOptions::new(file_url(upstream)).policy(idle_policy()))
}

/// Poll `check` until it returns true, failing the test after ten seconds.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

#[cfg(unix)]
const MAIN_MATCH: &str = r#"{"type":"match","data":{"path":{"text":"src/main.rs"},"line_number":1,"lines":{"text":"fn main() {}\n"}}}"#;

/// A search engine backed by a shell script written into `dir`.
#[cfg(unix)]
fn fake_rg(dir: &Path, body: &str) -> SearchEngine {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-rg");
    std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    SearchEngine::new(script.display().to_string(), 2)
}

#[tokio::test]
async fn concurrent_callers_share_one_checkout() {
    let upstream = create_upstream();
    let service = Arc::new(start(upstream.path()));

    let mut waiters = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        waiters.push(tokio::spawn(async move {
            service.session().checkout().await.unwrap()
        }));
    }

    let mut checkouts = Vec::new();
    for waiter in waiters {
        checkouts.push(waiter.await.unwrap());
    }
    let first = &checkouts[0];
    for checkout in &checkouts {
        assert!(Arc::ptr_eq(first, checkout));
        assert_eq!(first.root(), checkout.root());
    }
    assert!(first.root().join("README.md").exists());
    assert_eq!(service.session().status(), CheckoutStatus::Ready);
}

#[tokio::test]
async fn clone_failure_reaches_every_operation() {
    let missing = TempDir::new().unwrap().path().join("not-a-repo");
    let service = RepositoryService::start(ServiceOptions::new(file_url(&missing)));

    let ready = service.wait_ready().await.unwrap_err();
    let read = service.read_file_range("README.md", None, None).await.unwrap_err();
    let glob = service.glob("**").await.unwrap_err();

    match (ready, read, glob) {
        (GroveError::Acquisition(a), GroveError::Acquisition(b), GroveError::Acquisition(c)) => {
            assert!(Arc::ptr_eq(&a, &b));
            assert!(Arc::ptr_eq(&a, &c));
            assert!(matches!(*a, AcquireError::Exit { .. }));
        }
        other => panic!("expected shared acquisition errors, got {other:?}"),
    }
    assert_eq!(service.session().status(), CheckoutStatus::Failed);
}

#[tokio::test]
async fn read_range_and_glob_over_checkout() {
    let upstream = create_upstream();
    let service = start(upstream.path());

    let whole = service.read_file_range("README.md", None, None).await.unwrap();
    assert_eq!(whole, "# Upstream\n\nversion one\n");

    let middle = service
        .read_file_range("src/numbers.txt", Some(3), Some(5))
        .await
        .unwrap();
    assert_eq!(middle, "line 3\nline 4");

    let clamped = service
        .read_file_range("src/numbers.txt", Some(0), Some(3))
        .await
        .unwrap();
    assert_eq!(clamped, "line 1\nline 2");

    let err = service.read_file_range("missing.rs", None, None).await.unwrap_err();
    assert!(matches!(err, GroveError::Io(_)), "got {err:?}");

    assert_eq!(service.glob("src/*.rs").await.unwrap(), vec!["src/main.rs"]);
    let all = service.glob("**").await.unwrap();
    assert_eq!(all, vec!["README.md", "src/main.rs", "src/numbers.txt"]);
}

#[tokio::test]
async fn cached_file_changes_only_after_refresh() {
    let upstream = create_upstream();
    let service = start(upstream.path());

    let first = service.cached_file().await.unwrap();
    assert_eq!(first.path, "README.md");
    assert_eq!(&*first.content, "# Upstream\n\nversion one\n");

    commit_readme(upstream.path(), "# Upstream\n\nversion two\n");

    // No invalidation yet, and the checkout has not pulled either
    let second = service.cached_file().await.unwrap();
    assert!(Arc::ptr_eq(&first.content, &second.content));

    let generation = service.session().refresh_once().await.unwrap();
    assert_eq!(generation.value(), 1);

    let third = service.cached_file().await.unwrap();
    assert_eq!(&*third.content, "# Upstream\n\nversion two\n");
    assert_eq!(service.status().await.generation.value(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn failed_pull_keeps_serving_previous_checkout() {
    let upstream = create_upstream();
    let tools = TempDir::new().unwrap();
    let engine = fake_rg(tools.path(), &format!("printf '%s\\n' '{MAIN_MATCH}'"));
    let service = RepositoryService::start(
        ServiceOptions::new(file_url(upstream.path()))
            .policy(idle_policy())
            .engine(engine),
    );
    let before = service.cached_file().await.unwrap();

    let moved = TempDir::new().unwrap();
    let moved_path = moved.path().join("elsewhere");
    std::fs::rename(upstream.path(), &moved_path).unwrap();

    let err = service.session().refresh_once().await.unwrap_err();
    assert!(matches!(*err, AcquireError::Exit { .. }), "got {err:?}");
    assert_eq!(service.session().generation().value(), 0);

    let after = service.cached_file().await.unwrap();
    assert!(Arc::ptr_eq(&before.content, &after.content));
    assert_eq!(
        service
            .read_file_range("src/numbers.txt", Some(10), None)
            .await
            .unwrap(),
        "line 10\n"
    );
    assert_eq!(service.glob("*.md").await.unwrap(), vec!["README.md"]);

    let records = service.search("main", None, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "src/main.rs");
    assert_eq!(records[0].line_text, "fn main() {}");

    // Put it back so TempDir cleanup finds it
    std::fs::rename(&moved_path, upstream.path()).unwrap();
}

#[tokio::test]
async fn refresh_loop_follows_upstream_and_recovers_after_failures() {
    let upstream = create_upstream();
    let policy = RefreshPolicy {
        interval: Duration::from_millis(100),
        retry_initial: Duration::from_millis(50),
        retry_max: Duration::from_millis(200),
    };
    let service =
        RepositoryService::start(ServiceOptions::new(file_url(upstream.path())).policy(policy));
    let svc = &service;

    let first = service.cached_file().await.unwrap();
    assert_eq!(&*first.content, "# Upstream\n\nversion one\n");

    commit_readme(upstream.path(), "# Upstream\n\nversion two\n");
    eventually("the loop to pull version two", move || async move {
        &*svc.cached_file().await.unwrap().content == "# Upstream\n\nversion two\n"
    })
    .await;
    assert!(service.session().generation().value() >= 1);

    // Every pull now fails; the generation must stop moving
    let moved = TempDir::new().unwrap();
    let moved_path = moved.path().join("elsewhere");
    std::fs::rename(upstream.path(), &moved_path).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    let stalled = service.session().generation();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(service.session().generation(), stalled);
    assert_eq!(
        &*service.cached_file().await.unwrap().content,
        "# Upstream\n\nversion two\n"
    );
    assert_eq!(service.session().status(), CheckoutStatus::Ready);

    std::fs::rename(&moved_path, upstream.path()).unwrap();
    commit_readme(upstream.path(), "# Upstream\n\nversion three\n");
    eventually("the loop to recover and pull version three", move || async move {
        &*svc.cached_file().await.unwrap().content == "# Upstream\n\nversion three\n"
    })
    .await;
    assert!(service.session().generation() > stalled);
}

#[tokio::test]
async fn concurrent_refreshes_do_not_collide() {
    let upstream = create_upstream();
    let service = Arc::new(start(upstream.path()));
    service.wait_ready().await.unwrap();
    commit_readme(upstream.path(), "# Upstream\n\nversion two\n");

    let mut refreshes = Vec::new();
    for _ in 0..4 {
        let service = Arc::clone(&service);
        refreshes.push(tokio::spawn(async move {
            service.session().refresh_once().await
        }));
    }
    for refresh in refreshes {
        refresh.await.unwrap().unwrap();
    }

    assert_eq!(service.session().generation().value(), 4);
    assert_eq!(
        &*service.cached_file().await.unwrap().content,
        "# Upstream\n\nversion two\n"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_leaving_checkout_is_not_followed() {
    let outside = TempDir::new().unwrap();
    let secret = outside.path().join("secret.txt");
    std::fs::write(&secret, "TOP SECRET\n").unwrap();

    let upstream = create_upstream();
    std::os::unix::fs::symlink(&secret, upstream.path().join("link")).unwrap();
    std::os::unix::fs::symlink("README.md", upstream.path().join("readme-link")).unwrap();
    git(upstream.path(), &["add", "."]);
    git(upstream.path(), &["commit", "-m", "add links"]);

    let service = RepositoryService::start(
        ServiceOptions::new(file_url(upstream.path()))
            .policy(idle_policy())
            .context_file("link"),
    );

    match service.read_file_range("link", None, None).await {
        Err(GroveError::Io(FsError::Io { source, .. })) => {
            assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
        }
        other => panic!("expected permission denied, got {other:?}"),
    }
    assert!(matches!(
        service.cached_file().await,
        Err(GroveError::Io(_))
    ));
    assert_eq!(
        service.read_file_range("readme-link", None, None).await.unwrap(),
        "# Upstream\n\nversion one\n"
    );
}

#[tokio::test]
async fn shallow_clone_depth_is_applied() {
    let upstream = create_upstream();
    commit_readme(upstream.path(), "second\n");
    commit_readme(upstream.path(), "third\n");

    let acquirer = Acquirer::default().with_depth(Some(1));
    let dir = acquirer.clone_repo(&file_url(upstream.path())).await.unwrap();
    let log = git(dir.path(), &["rev-list", "--count", "HEAD"]);
    assert_eq!(String::from_utf8_lossy(&log.stdout).trim(), "1");
}

#[tokio::test]
async fn checkout_directory_removed_with_service() {
    let upstream = create_upstream();
    let service = start(upstream.path());
    let root = service.session().checkout().await.unwrap().root().to_path_buf();
    assert!(root.exists());

    drop(service);
    // The refresh task holds a reference until its abort is processed
    for _ in 0..50 {
        if !root.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!root.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn search_runs_in_checkout_and_stops_at_max_results() {
    let upstream = create_upstream();
    let tools = TempDir::new().unwrap();
    let cwd_log = tools.path().join("cwd");
    let engine = fake_rg(
        tools.path(),
        &format!(
            "pwd > '{}'\nwhile :; do printf '%s\\n' '{MAIN_MATCH}'; done",
            cwd_log.display()
        ),
    );

    let service =
        RepositoryService::start(ServiceOptions::new(file_url(upstream.path())).engine(engine));

    let records = service.search("main", Some("*.rs"), 2).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.path == "src/main.rs" && r.line_text == "fn main() {}"));

    let root = service.session().checkout().await.unwrap().root().to_path_buf();
    let logged = std::fs::read_to_string(&cwd_log).unwrap();
    assert_eq!(
        std::fs::canonicalize(logged.trim()).unwrap(),
        std::fs::canonicalize(root).unwrap()
    );
}
