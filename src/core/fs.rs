// src/core/fs.rs

//! The filesystem operations used when reclaiming playground files.

use std::fmt;
use std::io;
use std::path::Path;

/// Identifies a file independently of the path it is reachable under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    pub device: u64,
    pub inode: u64,
}

impl FileId {
    pub fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.inode)
    }
}

/// The two removal primitives. Neither is transactional.
pub trait FileSystem {
    fn unlink(&mut self, path: &Path) -> io::Result<()>;
    fn rmdir(&mut self, path: &Path) -> io::Result<()>;
}

/// `FileSystem` backed by the host through `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFileSystem;

impl FileSystem for HostFileSystem {
    fn unlink(&mut self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn rmdir(&mut self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }
}

/// Returns true if `unlink` failed because the path names a directory.
pub fn is_directory_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::IsADirectory || err.raw_os_error() == Some(libc::EISDIR)
}

/// Maps an I/O error to the errno stored in a reclaim error set.
pub fn error_code(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}
