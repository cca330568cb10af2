//! Exclusion-aware workspace walk and snapshot diffing.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

use cad_core::types::{ChangeKind, FileChange};
use ignore::gitignore::Gitignore;
use tracing::debug;

/// Directory names never snapshotted: build caches, VCS metadata, dependency
/// caches, and editor metadata.
pub const EXCLUDED_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    ".venv",
    "venv",
    "node_modules",
    ".mypy_cache",
    ".pytest_cache",
    "attachments",
    "dist",
    ".build",
    "Build",
    "DerivedData",
    "Pods",
    ".dart_tool",
    ".pub-cache",
    ".gradle",
    ".idea",
    ".vs",
    ".vscode",
    "target",
    "obj",
    "coverage",
    ".nyc_output",
    "generated",
];

const EXCLUDED_FILES: &[&str] = &["firebase-debug.log", ".DS_Store", "Thumbs.db", "desktop.ini"];

/// Dot-directories that are still walked.
const HIDDEN_ALLOWLIST: &[&str] = &[".github"];

/// Size and mtime of one file at a single instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub mtime_ns: u128,
}

/// Relative path to stamp, taken at a single instant. Never persisted.
pub type Snapshot = BTreeMap<String, FileStamp>;

fn load_gitignore(root: &Path) -> Option<Gitignore> {
    let path = root.join(".gitignore");
    if !path.is_file() {
        return None;
    }
    let (gitignore, err) = Gitignore::new(&path);
    if let Some(e) = err {
        debug!(error = %e, "partially parsed workspace .gitignore");
    }
    Some(gitignore)
}

fn ignored(gitignore: Option<&Gitignore>, rel: &Path, is_dir: bool) -> bool {
    gitignore.is_some_and(|gi| gi.matched(rel, is_dir).is_ignore())
}

/// Keys are '/'-separated regardless of platform.
fn rel_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk `root` and stamp every surviving regular file.
///
/// Skips the fixed exclusion sets, any dot-directory outside the allow-list,
/// symlinks, and anything matched by a root `.gitignore`. Unreadable entries
/// are silently dropped; the walk is best-effort.
pub fn snapshot(root: &Path) -> Snapshot {
    let mut snapshot = Snapshot::new();
    if !root.exists() {
        return snapshot;
    }
    let gitignore = load_gitignore(root);

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_symlink() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };

            if file_type.is_dir() {
                if EXCLUDED_DIRS.contains(&name) {
                    continue;
                }
                if name.starts_with('.') && !HIDDEN_ALLOWLIST.contains(&name) {
                    continue;
                }
                if ignored(gitignore.as_ref(), rel, true) {
                    continue;
                }
                stack.push(path);
                continue;
            }

            if !file_type.is_file() || EXCLUDED_FILES.contains(&name) {
                continue;
            }
            if name.starts_with('.') && !HIDDEN_ALLOWLIST.contains(&name) {
                continue;
            }
            if ignored(gitignore.as_ref(), rel, false) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let Ok(since_epoch) = modified.duration_since(UNIX_EPOCH) else {
                continue;
            };
            snapshot.insert(
                rel_key(rel),
                FileStamp {
                    size: metadata.len(),
                    mtime_ns: since_epoch.as_nanos(),
                },
            );
        }
    }
    snapshot
}

/// Change set between two snapshots.
///
/// The result is a pure function of the two maps: new paths are `created`,
/// paths with a differing stamp are `modified`, vanished paths are `deleted`
/// with size 0.
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<FileChange> {
    let mut changes = Vec::new();
    for (path, stamp) in after {
        match before.get(path) {
            None => changes.push(FileChange {
                path: path.clone(),
                change: ChangeKind::Created,
                size: stamp.size,
            }),
            Some(previous) if previous != stamp => changes.push(FileChange {
                path: path.clone(),
                change: ChangeKind::Modified,
                size: stamp.size,
            }),
            Some(_) => {}
        }
    }
    for path in before.keys() {
        if !after.contains_key(path) {
            changes.push(FileChange {
                path: path.clone(),
                change: ChangeKind::Deleted,
                size: 0,
            });
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    #[test]
    fn test_snapshot_skips_excluded_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), "node_modules/pkg/index.js", "x");
        write(dir.path(), "target/debug/out", "x");
        write(dir.path(), "__pycache__/mod.pyc", "x");

        let snap = snapshot(dir.path());
        assert_eq!(snap.keys().collect::<Vec<_>>(), ["src/main.rs"]);
    }

    #[test]
    fn test_snapshot_skips_hidden_dirs_except_allowlist() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), ".github/workflows/ci.yml", "on: push");
        write(dir.path(), ".cache/blob", "x");
        write(dir.path(), "readme.md", "hello");

        let snap = snapshot(dir.path());
        let paths: BTreeSet<_> = snap.keys().cloned().collect();
        assert!(paths.contains(".github/workflows/ci.yml"));
        assert!(paths.contains("readme.md"));
        assert!(!paths.iter().any(|p| p.starts_with(".cache")));
    }

    #[test]
    fn test_snapshot_skips_blacklisted_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), ".DS_Store", "x");
        write(dir.path(), "docs/Thumbs.db", "x");
        write(dir.path(), "docs/page.md", "content");

        let snap = snapshot(dir.path());
        assert_eq!(snap.keys().collect::<Vec<_>>(), ["docs/page.md"]);
    }

    #[test]
    fn test_snapshot_honors_root_gitignore() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), ".gitignore", "*.log\nbuild/\n");
        write(dir.path(), "main.py", "print('x')");
        write(dir.path(), "debug.log", "noise");
        write(dir.path(), "build/out.js", "bundle");

        let snap = snapshot(dir.path());
        assert_eq!(snap.keys().collect::<Vec<_>>(), ["main.py"]);
    }

    #[test]
    fn test_missing_root_yields_empty_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        assert!(snapshot(&missing).is_empty());
    }

    #[test]
    fn test_snapshot_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.txt", "one");
        write(dir.path(), "sub/b.txt", "two");
        assert_eq!(snapshot(dir.path()), snapshot(dir.path()));
    }

    #[test]
    fn test_diff_classifies_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "kept.txt", "same");
        write(dir.path(), "grows.txt", "v1");
        write(dir.path(), "doomed.txt", "bye");
        let before = snapshot(dir.path());

        write(dir.path(), "grows.txt", "version two");
        write(dir.path(), "fresh.txt", "new");
        fs::remove_file(dir.path().join("doomed.txt")).expect("remove");
        let after = snapshot(dir.path());

        let changes = diff(&before, &after);
        let by_path: std::collections::HashMap<_, _> = changes
            .iter()
            .map(|c| (c.path.as_str(), c))
            .collect();

        assert_eq!(changes.len(), 3);
        assert_eq!(by_path["fresh.txt"].change, ChangeKind::Created);
        assert_eq!(by_path["grows.txt"].change, ChangeKind::Modified);
        assert_eq!(by_path["doomed.txt"].change, ChangeKind::Deleted);
        assert_eq!(by_path["doomed.txt"].size, 0);
    }

    #[test]
    fn test_diff_symmetry_between_created_and_deleted() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "one.txt", "1");
        let before = snapshot(dir.path());
        write(dir.path(), "two.txt", "2");
        write(dir.path(), "three.txt", "3");
        let after = snapshot(dir.path());

        let created: BTreeSet<_> = diff(&before, &after)
            .into_iter()
            .filter(|c| c.change == ChangeKind::Created)
            .map(|c| c.path)
            .collect();
        let deleted: BTreeSet<_> = diff(&after, &before)
            .into_iter()
            .filter(|c| c.change == ChangeKind::Deleted)
            .map(|c| c.path)
            .collect();
        assert_eq!(created, deleted);
    }

    #[test]
    fn test_diff_of_identical_snapshots_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "stable.txt", "fixed");
        let snap = snapshot(dir.path());
        assert!(diff(&snap, &snap).is_empty());
    }
}
