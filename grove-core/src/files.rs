//! Ranged reads and glob listing under the checkout root.

use crate::error::FsError;
use globset::GlobBuilder;
use ignore::WalkBuilder;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Join `relative` onto `root`, refusing paths that could leave the root.
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf, FsError> {
    let rel = Path::new(relative);
    let escapes = rel.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(FsError::io(
            rel,
            io::Error::new(io::ErrorKind::PermissionDenied, "path leaves the checkout"),
        ));
    }
    Ok(root.join(rel))
}

/// Lines `start..end` of `content` (1-based, end exclusive), split and
/// rejoined on `\n`.
///
/// `start` defaults to 1 and `end` to one past the last line. Both clamp to
/// the available lines, so out-of-range bounds give a shorter or empty slice.
pub fn slice_lines(content: &str, start: Option<i64>, end: Option<i64>) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let len = lines.len() as i64;
    let from = (start.unwrap_or(1).max(1) - 1).min(len) as usize;
    let to = match end {
        Some(end) => end.saturating_sub(1).clamp(0, len),
        None => len,
    } as usize;
    if from >= to {
        return String::new();
    }
    lines[from..to].join("\n")
}

/// Read `relative` under `root` and return the requested line range.
pub async fn read_file_range(
    root: &Path,
    relative: &str,
    start: Option<i64>,
    end: Option<i64>,
) -> Result<String, FsError> {
    let content = read_file(root, relative).await?;
    Ok(slice_lines(&content, start, end))
}

/// Read a whole file under `root`.
///
/// Symlinks are followed only while the target stays inside `root`.
pub async fn read_file(root: &Path, relative: &str) -> Result<String, FsError> {
    let path = resolve(root, relative)?;
    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| FsError::io(root, e))?;
    let target = tokio::fs::canonicalize(&path)
        .await
        .map_err(|e| FsError::io(relative, e))?;
    if !target.starts_with(&root) {
        tracing::warn!(path = relative, "refusing read through link leaving the checkout");
        return Err(FsError::io(
            relative,
            io::Error::new(io::ErrorKind::PermissionDenied, "path leaves the checkout"),
        ));
    }
    tokio::fs::read_to_string(&target)
        .await
        .map_err(|e| FsError::io(relative, e))
}

/// Relative paths of files under `root` matching `pattern`, sorted.
///
/// `*` does not cross `/`; use `**` for that. The `.git` directory and
/// anything the repository's `.gitignore` excludes are skipped.
pub fn glob_files(root: &Path, pattern: &str) -> Result<Vec<String>, FsError> {
    let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher();

    std::fs::metadata(root).map_err(|e| FsError::io(root, e))?;

    let mut builder = WalkBuilder::new(root);
    builder.hidden(false);
    builder.git_ignore(true);
    builder.git_global(false);
    builder.git_exclude(true);
    builder.filter_entry(|entry| entry.file_name() != ".git");

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            // Entries can vanish while a pull rewrites the tree
            Err(err) if err.io_error().is_some_and(|e| e.kind() == io::ErrorKind::NotFound) => {
                tracing::debug!(error = %err, "skipping vanished entry");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if matcher.is_match(relative) {
            files.push(to_slash(relative));
        }
    }

    files.sort();
    Ok(files)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ten_lines() -> String {
        (1..=10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_no_bounds_returns_whole_file() {
        let content = format!("{}\n", ten_lines());
        assert_eq!(slice_lines(&content, None, None), content);
    }

    #[test]
    fn test_end_is_exclusive() {
        assert_eq!(slice_lines(&ten_lines(), Some(3), Some(5)), "line 3\nline 4");
    }

    #[test]
    fn test_start_clamps_to_first_line() {
        let content = ten_lines();
        assert_eq!(slice_lines(&content, Some(0), Some(3)), "line 1\nline 2");
        assert_eq!(slice_lines(&content, Some(-7), Some(2)), "line 1");
        assert_eq!(slice_lines(&content, Some(1), Some(1)), "");
        assert_eq!(slice_lines(&content, Some(i64::MIN), Some(2)), "line 1");
    }

    #[test]
    fn test_out_of_range_bounds_clamp() {
        let content = ten_lines();
        assert_eq!(slice_lines(&content, Some(9), Some(500)), "line 9\nline 10");
        assert_eq!(slice_lines(&content, Some(50), None), "");
        assert_eq!(slice_lines(&content, Some(5), Some(3)), "");
        assert_eq!(slice_lines(&content, None, Some(-1)), "");
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = Path::new("/checkout");
        assert_eq!(resolve(root, "src/lib.rs").unwrap(), root.join("src/lib.rs"));
        assert!(resolve(root, "../etc/passwd").is_err());
        assert!(resolve(root, "src/../../x").is_err());
        assert!(resolve(root, "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_read_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = read_file_range(dir.path(), "nope.txt", None, None)
            .await
            .unwrap_err();
        match err {
            FsError::Io { path, source } => {
                assert_eq!(path, PathBuf::from("nope.txt"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_root_is_denied() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "hidden\n").unwrap();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("inside.txt"), "visible\n").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("escape"))
            .unwrap();
        std::os::unix::fs::symlink("inside.txt", dir.path().join("alias")).unwrap();

        match read_file(dir.path(), "escape").await {
            Err(FsError::Io { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied)
            }
            other => panic!("expected permission denied, got {other:?}"),
        }
        assert_eq!(read_file(dir.path(), "alias").await.unwrap(), "visible\n");
    }

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join(".git/config"), "").unwrap();
        std::fs::write(root.join("README.md"), "# readme\n").unwrap();
        std::fs::write(root.join("src/lib.rs"), "").unwrap();
        std::fs::write(root.join("src/nested/mod.rs"), "").unwrap();
        std::fs::write(root.join("src/notes.txt"), "").unwrap();
        dir
    }

    #[test]
    fn test_glob_star_does_not_cross_directories() {
        let dir = tree();
        assert_eq!(glob_files(dir.path(), "src/*.rs").unwrap(), vec!["src/lib.rs"]);
        assert_eq!(
            glob_files(dir.path(), "**/*.rs").unwrap(),
            vec!["src/lib.rs", "src/nested/mod.rs"]
        );
        assert_eq!(glob_files(dir.path(), "./*.md").unwrap(), vec!["README.md"]);
    }

    #[test]
    fn test_glob_skips_git_directory() {
        let dir = tree();
        let all = glob_files(dir.path(), "**").unwrap();
        assert!(all.iter().all(|p| !p.starts_with(".git")), "{all:?}");
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_glob_bad_pattern_is_error() {
        let dir = tree();
        assert!(matches!(
            glob_files(dir.path(), "src/[.rs"),
            Err(FsError::GlobPattern(_))
        ));
    }

    #[test]
    fn test_glob_missing_root_is_io_error() {
        let dir = tree();
        let missing = dir.path().join("gone");
        assert!(matches!(glob_files(&missing, "*"), Err(FsError::Io { .. })));
    }
}
