//! In-memory filesystem so collectors can run against canned `/proc` and
//! `/sys` trees.
//!
//! Clones share the same tree, so a test can keep a handle and rewrite
//! counter files after the collector has been moved into a sampler.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::collector::traits::FileSystem;

#[derive(Debug, Clone)]
enum Node {
    File(String),
    Dir,
}

type Tree = BTreeMap<PathBuf, Node>;

fn not_found(what: &str, path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{what} not found: {}", path.display()))
}

/// Shared in-memory file tree. Entries are kept sorted, so `read_dir`
/// lists children in path order.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    tree: Arc<RwLock<Tree>>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, path: &Path, node: Node) {
        let mut tree = self.write();
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            tree.entry(ancestor.to_path_buf()).or_insert(Node::Dir);
        }
        tree.insert(path.to_path_buf(), node);
    }

    /// Adds or replaces a file; missing parent directories are created.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.insert(path.as_ref(), Node::File(content.into()));
    }

    /// Adds an empty directory.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        self.insert(path.as_ref(), Node::Dir);
    }

    /// Removes a file, returning whether it existed.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut tree = self.write();
        if !matches!(tree.get(path), Some(Node::File(_))) {
            return false;
        }
        tree.remove(path).is_some()
    }

    /// Copies a directory captured from a real host into a fresh tree
    /// mounted at `/proc`. Files that are not valid UTF-8 are skipped.
    pub fn from_snapshot(dir: &Path) -> io::Result<Self> {
        let fs = Self::new();
        let mut pending = vec![(dir.to_path_buf(), PathBuf::from("/proc"))];

        while let Some((real, mounted)) = pending.pop() {
            fs.add_dir(&mounted);
            for entry in std::fs::read_dir(&real)? {
                let entry = entry?;
                let target = mounted.join(entry.file_name());
                let kind = entry.file_type()?;
                if kind.is_dir() {
                    pending.push((entry.path(), target));
                } else if kind.is_file() {
                    if let Ok(content) = std::fs::read_to_string(entry.path()) {
                        fs.add_file(target, content);
                    }
                }
            }
        }
        Ok(fs)
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        match self.read().get(path) {
            Some(Node::File(content)) => Ok(content.clone()),
            _ => Err(not_found("file", path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.read().contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let tree = self.read();
        if !matches!(tree.get(path), Some(Node::Dir)) {
            return Err(not_found("directory", path));
        }
        Ok(tree
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file_creates_parents() {
        let fs = MockFs::new();
        fs.add_file("/proc/self/mountinfo", "22 1 8:17 / / rw - ext4 /dev/sdb1 rw\n");

        assert!(fs.exists(Path::new("/proc/self/mountinfo")));
        assert!(fs.exists(Path::new("/proc/self")));
        assert!(fs.exists(Path::new("/proc")));
        assert!(fs.read_to_string(Path::new("/proc/self")).is_err());
    }

    #[test]
    fn test_read_dir_lists_children_sorted() {
        let fs = MockFs::new();
        fs.add_dir("/sys/block/sdb");
        fs.add_dir("/sys/block/nvme0n1");
        fs.add_file("/sys/block/sdb/stat", "0");

        let block = fs.read_dir(Path::new("/sys/block")).unwrap();
        assert_eq!(
            block,
            vec![PathBuf::from("/sys/block/nvme0n1"), PathBuf::from("/sys/block/sdb")]
        );

        let sdb = fs.read_dir(Path::new("/sys/block/sdb")).unwrap();
        assert_eq!(sdb, vec![PathBuf::from("/sys/block/sdb/stat")]);

        assert!(fs.read_dir(Path::new("/sys/class")).is_err());
        assert!(fs.read_dir(Path::new("/sys/block/sdb/stat")).is_err());
    }

    #[test]
    fn test_clones_share_tree() {
        let fs = MockFs::new();
        let handle = fs.clone();
        fs.add_file("/proc/stat", "cpu0 1 0 0 1\n");
        handle.add_file("/proc/stat", "cpu0 2 0 0 2\n");

        assert_eq!(
            fs.read_to_string(Path::new("/proc/stat")).unwrap(),
            "cpu0 2 0 0 2\n"
        );
        assert!(handle.remove_file("/proc/stat"));
        assert!(!fs.exists(Path::new("/proc/stat")));
        assert!(!handle.remove_file("/proc"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let fs = MockFs::new();
        let err = fs.read_to_string(Path::new("/proc/diskstats")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("self")).unwrap();
        std::fs::write(dir.path().join("stat"), "cpu0 1 2 3 4\n").unwrap();
        std::fs::write(
            dir.path().join("self/mountinfo"),
            "22 1 8:17 / / rw - ext4 /dev/sdb1 rw\n",
        )
        .unwrap();

        let fs = MockFs::from_snapshot(dir.path()).unwrap();
        assert_eq!(
            fs.read_to_string(Path::new("/proc/stat")).unwrap(),
            "cpu0 1 2 3 4\n"
        );
        assert!(fs.exists(Path::new("/proc/self/mountinfo")));
        assert_eq!(
            fs.read_dir(Path::new("/proc")).unwrap(),
            vec![PathBuf::from("/proc/self"), PathBuf::from("/proc/stat")]
        );
    }
}
