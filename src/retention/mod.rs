//! Bounded retention of past session directories.
//!
//! Directories are tracked oldest-first. Pruning happens at session start,
//! before the new session's directory is added, so a limit of `n` leaves at
//! most `n` directories once the new one is in the queue.

use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDirectory {
    pub path: PathBuf,
    pub created: SystemTime,
}

impl SessionDirectory {
    fn from_path(path: PathBuf) -> Self {
        let created = creation_time(&path).unwrap_or_else(SystemTime::now);
        Self { path, created }
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Total size of every file below the directory.
    pub fn size_bytes(&self) -> u64 {
        directory_size(&self.path)
    }
}

#[derive(Debug, Default)]
pub struct RetentionManager {
    root: PathBuf,
    queue: VecDeque<SessionDirectory>,
}

impl RetentionManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            queue: VecDeque::new(),
        }
    }

    /// Builds the queue from the session directories already under `root`,
    /// ordered by creation time. A missing root yields an empty queue.
    pub fn scan(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut manager = Self::new(root.clone());
        if !root.is_dir() {
            debug!("Recording root {:?} does not exist yet", root);
            return Ok(manager);
        }

        let mut directories: Vec<SessionDirectory> = fs::read_dir(&root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .map(SessionDirectory::from_path)
            .collect();

        // Oldest first; names break ties since they are timestamp-derived
        directories.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
        manager.queue.extend(directories);

        debug!(
            "Found {} existing session directories in {:?}",
            manager.queue.len(),
            root
        );
        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Tracked directories, oldest first.
    pub fn directories(&self) -> impl Iterator<Item = &SessionDirectory> {
        self.queue.iter()
    }

    pub fn enqueue_directory(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.queue.iter().any(|d| d.path == path) {
            debug!("Session directory {:?} is already tracked", path);
            return;
        }
        self.queue.push_back(SessionDirectory::from_path(path));
    }

    /// Deletes the oldest directories while `limit` or more are tracked.
    /// A limit of zero keeps everything. Returns the paths removed from the
    /// queue, including ones that were already gone from disk.
    pub fn prune_to_limit(&mut self, limit: usize) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        if limit == 0 {
            return removed;
        }

        while self.queue.len() >= limit {
            let Some(oldest) = self.queue.pop_front() else {
                break;
            };

            if oldest.path.exists() {
                match fs::remove_dir_all(&oldest.path) {
                    Ok(()) => info!("Removed old session directory {:?}", oldest.path),
                    Err(e) => warn!(
                        "Failed to remove old session directory {:?}: {}",
                        oldest.path, e
                    ),
                }
            } else {
                debug!("Session directory {:?} already gone", oldest.path);
            }
            removed.push(oldest.path);
        }

        removed
    }

    /// Prunes for a new session and then starts tracking `new_directory`.
    /// A directory that is already tracked is the current session, so
    /// nothing is pruned for it.
    pub fn rotate(&mut self, limit: usize, new_directory: impl Into<PathBuf>) -> Vec<PathBuf> {
        let new_directory = new_directory.into();
        if self.queue.iter().any(|d| d.path == new_directory) {
            debug!("Session directory {:?} is already tracked", new_directory);
            return Vec::new();
        }

        let removed = self.prune_to_limit(limit);
        self.enqueue_directory(new_directory);
        removed
    }
}

fn creation_time(path: &Path) -> Option<SystemTime> {
    let metadata = fs::metadata(path).ok()?;
    metadata.created().or_else(|_| metadata.modified()).ok()
}

/// Sum of file sizes below `path`; unreadable entries are skipped.
pub fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.metadata().ok())
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_dir(root: &Path, name: &str) -> PathBuf {
        let path = root.join(name);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("alice_00.00.00.wav"), [0u8; 64]).unwrap();
        path
    }

    #[test]
    fn test_rotation_keeps_limit() {
        let temp = TempDir::new().unwrap();
        let mut retention = RetentionManager::new(temp.path());

        let dirs: Vec<PathBuf> = (1..=5)
            .map(|i| {
                let dir = make_dir(temp.path(), &format!("D{}", i));
                retention.rotate(3, &dir);
                dir
            })
            .collect();

        assert!(!dirs[0].exists());
        assert!(!dirs[1].exists());
        for dir in &dirs[2..] {
            assert!(dir.exists());
        }

        let tracked: Vec<&PathBuf> = retention.directories().map(|d| &d.path).collect();
        assert_eq!(tracked, dirs[2..].iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_missing_directory_is_still_consumed() {
        let temp = TempDir::new().unwrap();
        let mut retention = RetentionManager::new(temp.path());

        retention.enqueue_directory(temp.path().join("never-created"));
        retention.enqueue_directory(make_dir(temp.path(), "kept"));

        let removed = retention.prune_to_limit(2);
        assert_eq!(removed, vec![temp.path().join("never-created")]);
        assert_eq!(retention.len(), 1);
    }

    #[test]
    fn test_zero_limit_keeps_everything() {
        let temp = TempDir::new().unwrap();
        let mut retention = RetentionManager::new(temp.path());
        for i in 0..4 {
            retention.rotate(0, make_dir(temp.path(), &format!("S{}", i)));
        }
        assert_eq!(retention.len(), 4);
    }

    #[test]
    fn test_limit_of_one_keeps_only_new_session() {
        let temp = TempDir::new().unwrap();
        let mut retention = RetentionManager::new(temp.path());

        let first = make_dir(temp.path(), "first");
        retention.rotate(1, &first);
        let second = make_dir(temp.path(), "second");
        let removed = retention.rotate(1, &second);

        assert_eq!(removed, vec![first.clone()]);
        assert!(!first.exists());
        assert_eq!(retention.len(), 1);
    }

    #[test]
    fn test_rotating_into_current_session_prunes_nothing() {
        let temp = TempDir::new().unwrap();
        let mut retention = RetentionManager::new(temp.path());

        let current = make_dir(temp.path(), "current");
        retention.rotate(1, &current);
        assert!(retention.rotate(1, &current).is_empty());

        assert!(current.exists());
        assert_eq!(retention.len(), 1);
    }

    #[test]
    fn test_scan_picks_up_existing_directories() {
        let temp = TempDir::new().unwrap();
        make_dir(temp.path(), "a");
        make_dir(temp.path(), "b");
        fs::write(temp.path().join("stray.txt"), "x").unwrap();

        let retention = RetentionManager::scan(temp.path()).unwrap();
        assert_eq!(retention.len(), 2);
        assert!(retention.directories().all(|d| d.size_bytes() == 64));
    }

    #[test]
    fn test_scan_of_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let retention = RetentionManager::scan(temp.path().join("nope")).unwrap();
        assert!(retention.is_empty());
    }

    #[test]
    fn test_enqueue_ignores_duplicates() {
        let temp = TempDir::new().unwrap();
        let mut retention = RetentionManager::new(temp.path());
        let dir = make_dir(temp.path(), "dup");
        retention.enqueue_directory(&dir);
        retention.enqueue_directory(&dir);
        assert_eq!(retention.len(), 1);
        assert_eq!(directory_size(&dir), 64);
    }
}
