//! The filesystem seam under the procfs collector: the host's `/proc` and
//! `/sys` in production, an in-memory tree in tests.

use std::io;
use std::path::{Path, PathBuf};

/// Read-only view of the files a collector parses.
pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Full paths of the direct children of `path`, in unspecified order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Whether `path` names a readable file or a listable directory.
    fn exists(&self, path: &Path) -> bool {
        self.read_to_string(path).is_ok() || self.read_dir(path).is_ok()
    }
}

/// The host filesystem, through `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
