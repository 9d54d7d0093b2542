//! Static file lookup and read-only mappings.

use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::ptr::NonNull;

use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};
use thiserror::Error;
use tracing::warn;

const WORLD_READABLE: u32 = 0o004;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("no such file")]
    NotFound,
    #[error("file is not world-readable")]
    Forbidden,
    #[error("path is a directory")]
    Directory,
    #[error("failed to map file: {0}")]
    Map(#[from] std::io::Error),
}

/// A whole file mapped read-only. Unmapped exactly once, on drop.
#[derive(Debug)]
pub struct MappedFile {
    addr: Option<NonNull<c_void>>,
    len: usize,
}

// The mapping is private and read-only; nothing writes through it.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Checks that `path` exists, is world-readable and is not a directory,
    /// then maps it.
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let meta = std::fs::metadata(path).map_err(|_| FileError::NotFound)?;
        if meta.permissions().mode() & WORLD_READABLE == 0 {
            return Err(FileError::Forbidden);
        }
        if meta.is_dir() {
            return Err(FileError::Directory);
        }

        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        let Some(length) = NonZeroUsize::new(len) else {
            // mmap rejects zero-length mappings.
            return Ok(Self { addr: None, len: 0 });
        };
        let addr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ,
                MapFlags::MAP_PRIVATE,
                &file,
                0,
            )
        }
        .map_err(std::io::Error::from)?;
        Ok(Self {
            addr: Some(addr),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.addr {
            // SAFETY: `addr` maps `len` readable bytes until `self` drops.
            Some(addr) => unsafe { std::slice::from_raw_parts(addr.as_ptr().cast::<u8>(), self.len) },
            None => &[],
        }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if let Some(addr) = self.addr.take() {
            if let Err(e) = unsafe { munmap(addr, self.len) } {
                warn!(error = %e, len = self.len, "munmap failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn maps_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.html");
        fs::write(&path, b"<p>hi</p>").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let mapped = MappedFile::open(&path).unwrap();
        assert_eq!(mapped.as_slice(), b"<p>hi</p>");
        assert_eq!(mapped.len(), 9);
    }

    #[test]
    fn empty_file_maps_to_empty_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.html");
        fs::write(&path, b"").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let mapped = MappedFile::open(&path).unwrap();
        assert!(mapped.is_empty());
        assert_eq!(mapped.as_slice(), b"");
    }

    #[test]
    fn classifies_lookup_failures() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MappedFile::open(&dir.path().join("missing")),
            Err(FileError::NotFound)
        ));

        let private = dir.path().join("private.html");
        fs::write(&private, b"x").unwrap();
        fs::set_permissions(&private, fs::Permissions::from_mode(0o600)).unwrap();
        assert!(matches!(MappedFile::open(&private), Err(FileError::Forbidden)));

        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(MappedFile::open(&sub), Err(FileError::Directory)));
    }
}
