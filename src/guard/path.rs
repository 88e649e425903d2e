// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Path containment for the sandbox root.
//!
//! Every path a tool touches goes through [`PathGuard::resolve`]:
//!
//! 1. Strip quoting and bracket artifacts models like to emit (`'src/main.rs'}`)
//! 2. Reject empty paths
//! 3. Join onto the root and normalize `.`/`..` lexically
//! 4. Reject anything outside the root
//! 5. Follow every symlink on the way down, dangling ones included, and
//!    reject the path if any link lands outside the root

use std::collections::VecDeque;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::GuardError;

const QUOTES: &[char] = &['\'', '"', '`'];
const TRAILING_BRACKETS: &[char] = &['}', ']'];

/// Strip whitespace, wrapping quotes/backticks and trailing `}`/`]` from a model-supplied path.
pub fn sanitize_requested_path(raw: &str) -> String {
    raw.trim()
        .trim_matches(QUOTES)
        .trim_end_matches(TRAILING_BRACKETS)
        .trim()
        .trim_matches(QUOTES)
        .trim()
        .to_string()
}

/// Resolves model-supplied paths against a fixed root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Create a guard for an existing directory. The root is canonicalized once.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::fs::canonicalize(root.as_ref())?;
        Ok(Self { root })
    }

    /// The canonical sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `requested` to an absolute path inside the root.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, GuardError> {
        let cleaned = sanitize_requested_path(requested);
        if cleaned.is_empty() {
            return Err(GuardError::EmptyPath);
        }

        let candidate = normalize_lexically(&self.root.join(&cleaned));
        if !candidate.starts_with(&self.root) {
            return Err(GuardError::OutsideRoot(cleaned));
        }

        match physical_path(&self.root, &candidate) {
            Some(real) if real.starts_with(&self.root) => {}
            _ => return Err(GuardError::OutsideRoot(cleaned)),
        }

        Ok(candidate)
    }

    /// Path relative to the root, for reporting back to the model.
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

/// Collapse `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Symlinks followed before a path is treated as a loop.
const MAX_LINK_HOPS: usize = 40;

/// Walk `path` from `root` one component at a time, substituting symlink
/// targets as they are met. Components that do not exist yet are appended
/// as-is. A dangling link still contributes its target, so writing through
/// it cannot create a file elsewhere. `None` on link loops or unreadable links.
fn physical_path(root: &Path, path: &Path) -> Option<PathBuf> {
    let rest = path.strip_prefix(root).ok()?;
    let mut pending: VecDeque<PathBuf> = rest
        .components()
        .map(|c| PathBuf::from(c.as_os_str()))
        .collect();
    let mut current = root.to_path_buf();
    let mut hops = 0;

    while let Some(part) = pending.pop_front() {
        match part.components().next() {
            Some(Component::CurDir) | None => continue,
            Some(Component::ParentDir) => {
                current.pop();
                continue;
            }
            Some(Component::RootDir) | Some(Component::Prefix(_)) => {
                current.push(&part);
                continue;
            }
            Some(Component::Normal(_)) => {}
        }

        let next = current.join(&part);
        let is_link = std::fs::symlink_metadata(&next)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            current = next;
            continue;
        }

        hops += 1;
        if hops > MAX_LINK_HOPS {
            return None;
        }
        let target = std::fs::read_link(&next).ok()?;
        for component in target.components().rev() {
            pending.push_front(PathBuf::from(component.as_os_str()));
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_strips_artifacts() {
        assert_eq!(sanitize_requested_path("  'src/main.rs'  "), "src/main.rs");
        assert_eq!(sanitize_requested_path("`README.md`"), "README.md");
        assert_eq!(sanitize_requested_path("\"pom.xml\"}"), "pom.xml");
        assert_eq!(sanitize_requested_path("src/lib.rs]"), "src/lib.rs");
        assert_eq!(sanitize_requested_path("'a.txt'}]"), "a.txt");
    }

    #[test]
    fn test_resolve_relative() {
        let temp = tempdir().unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();
        let resolved = guard.resolve("src/main.rs").unwrap();
        assert_eq!(resolved, guard.root().join("src/main.rs"));
        assert_eq!(guard.relative(&resolved), "src/main.rs");
    }

    #[test]
    fn test_resolve_dot_is_root() {
        let temp = tempdir().unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();
        assert_eq!(guard.resolve(".").unwrap(), guard.root());
        assert_eq!(guard.relative(guard.root()), ".");
    }

    #[test]
    fn test_resolve_rejects_empty() {
        let temp = tempdir().unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();
        assert_eq!(guard.resolve("   ").unwrap_err(), GuardError::EmptyPath);
        assert_eq!(guard.resolve("''").unwrap_err(), GuardError::EmptyPath);
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let temp = tempdir().unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();
        for attempt in ["../secret", "a/../../secret", "'../../etc/passwd'}", "./../x"] {
            assert!(
                matches!(guard.resolve(attempt), Err(GuardError::OutsideRoot(_))),
                "{attempt} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_inner_parent_segments_allowed() {
        let temp = tempdir().unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();
        let resolved = guard.resolve("a/b/../c.txt").unwrap();
        assert_eq!(resolved, guard.root().join("a/c.txt"));
    }

    #[test]
    fn test_resolve_absolute_paths() {
        let temp = tempdir().unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();
        assert!(matches!(
            guard.resolve("/etc/passwd"),
            Err(GuardError::OutsideRoot(_))
        ));

        let inside = guard.root().join("notes.txt");
        let resolved = guard.resolve(inside.to_str().unwrap()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[test]
    fn test_resolve_rejects_sibling_prefix() {
        let temp = tempdir().unwrap();
        std::fs::create_dir(temp.path().join("repo")).unwrap();
        std::fs::create_dir(temp.path().join("repo2")).unwrap();
        let guard = PathGuard::new(temp.path().join("repo")).unwrap();
        assert!(guard.resolve("../repo2/file").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let temp = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let root = temp.path().join("repo");
        std::fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        let guard = PathGuard::new(&root).unwrap();
        assert!(matches!(
            guard.resolve("link/file.txt"),
            Err(GuardError::OutsideRoot(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_dangling_symlink_escape() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("repo");
        let outside = temp.path().join("outside");
        std::fs::create_dir(&root).unwrap();
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink("../outside/escaped.txt", root.join("link")).unwrap();
        std::os::unix::fs::symlink("/nonexistent/dir", root.join("abs")).unwrap();

        let guard = PathGuard::new(&root).unwrap();
        assert!(matches!(guard.resolve("link"), Err(GuardError::OutsideRoot(_))));
        assert!(matches!(
            guard.resolve("abs/new.txt"),
            Err(GuardError::OutsideRoot(_))
        ));
        assert!(!outside.join("escaped.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_follows_links_inside_root() {
        let temp = tempdir().unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();
        std::fs::create_dir(guard.root().join("real")).unwrap();
        std::os::unix::fs::symlink("real", guard.root().join("alias")).unwrap();
        std::os::unix::fs::symlink("real/missing.txt", guard.root().join("pending")).unwrap();

        assert_eq!(
            guard.resolve("alias/file.txt").unwrap(),
            guard.root().join("alias/file.txt")
        );
        assert!(guard.resolve("pending").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_loop() {
        let temp = tempdir().unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();
        std::os::unix::fs::symlink("b", guard.root().join("a")).unwrap();
        std::os::unix::fs::symlink("a", guard.root().join("b")).unwrap();

        assert!(matches!(guard.resolve("a/x"), Err(GuardError::OutsideRoot(_))));
    }

    #[test]
    fn test_resolution_always_under_root() {
        let temp = tempdir().unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();
        let inputs = [
            "a", "./a", "a/./b", "../a", "/", "/tmp", "a/../../b", "\"../a\"", "`a/b`]",
            "a/b/c/../../..", "a/b/c/../../../..", "..", "}",
        ];
        for input in inputs {
            if let Ok(resolved) = guard.resolve(input) {
                assert!(resolved.starts_with(guard.root()), "{input} escaped");
            }
        }
    }
}
