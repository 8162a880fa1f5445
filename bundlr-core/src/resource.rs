//! Uniform read access to a relative path, served by the overlay or, failing
//! that, by a plain file under a disk root.

use crate::bundle::{check_read_args, BundleFile};
use crate::error::{Error, Result};
use crate::layout::normalize_path;
use crate::path_safety::{resolve_under, PathPolicy};
use crate::registry::Bundles;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::debug;

struct DiskShared {
    rel_path: String,
    size: u64,
    file: Mutex<File>,
}

/// A file on disk. Every open of the same relative path shares one handle,
/// closed when the last `DiskFile` goes away.
#[derive(Clone)]
pub struct DiskFile {
    shared: Arc<DiskShared>,
}

impl DiskFile {
    pub fn size(&self) -> u64 {
        self.shared.size
    }

    pub fn relative_path(&self) -> &str {
        &self.shared.rel_path
    }

    pub fn read(&self, dst: &mut [u8], dst_offset: usize, file_offset: u64, read_size: usize) -> Result<()> {
        check_read_args(dst.len(), dst_offset, file_offset, read_size, self.shared.size)?;
        if read_size == 0 {
            return Ok(());
        }
        let mut f = self.shared.file.lock();
        f.seek(SeekFrom::Start(file_offset))?;
        f.read_exact(&mut dst[dst_offset..dst_offset + read_size])?;
        Ok(())
    }

    pub fn close(self) {}
}

impl fmt::Debug for DiskFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskFile").field("rel_path", &self.shared.rel_path).field("size", &self.shared.size).finish()
    }
}

/// A readable file, wherever it was found.
#[derive(Debug)]
pub enum ResourceFile {
    Bundle(BundleFile),
    Disk(DiskFile),
}

impl ResourceFile {
    pub fn size(&self) -> u64 {
        match self {
            ResourceFile::Bundle(f) => f.size(),
            ResourceFile::Disk(f) => f.size(),
        }
    }

    pub fn relative_path(&self) -> &str {
        match self {
            ResourceFile::Bundle(f) => f.relative_path(),
            ResourceFile::Disk(f) => f.relative_path(),
        }
    }

    pub fn is_bundled(&self) -> bool {
        matches!(self, ResourceFile::Bundle(_))
    }

    pub fn read(&self, dst: &mut [u8], dst_offset: usize, file_offset: u64, read_size: usize) -> Result<()> {
        match self {
            ResourceFile::Bundle(f) => f.read(dst, dst_offset, file_offset, read_size),
            ResourceFile::Disk(f) => f.read(dst, dst_offset, file_offset, read_size),
        }
    }

    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.size())
            .map_err(|_| Error::invalid(format!("'{}' is too large to buffer", self.relative_path())))?;
        let mut buf = vec![0u8; len];
        self.read(&mut buf, 0, 0, len)?;
        Ok(buf)
    }

    pub fn close(self) {}
}

/// Opens relative paths against an overlay with a disk fallback.
pub struct ResourceLocator {
    bundles: Bundles,
    disk_root: Option<PathBuf>,
    path_policy: PathPolicy,
    disk_files: Mutex<HashMap<String, Weak<DiskShared>>>,
}

impl ResourceLocator {
    pub fn new(bundles: Bundles) -> Self {
        Self { bundles, disk_root: None, path_policy: PathPolicy::default(), disk_files: Mutex::new(HashMap::new()) }
    }

    pub fn with_disk_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.disk_root = Some(root.into());
        self
    }

    pub fn with_path_policy(mut self, policy: PathPolicy) -> Self {
        self.path_policy = policy;
        self
    }

    pub fn bundles(&self) -> &Bundles {
        &self.bundles
    }

    pub fn disk_root(&self) -> Option<&Path> {
        self.disk_root.as_deref()
    }

    /// Overlay first, then `disk_root/rel_path`. Disk is only tried when no bundle owns the path.
    pub fn open(&self, rel_path: &str) -> Result<ResourceFile> {
        if let Some(f) = self.bundles.resolve(rel_path)? {
            return Ok(ResourceFile::Bundle(f));
        }
        self.open_disk(rel_path).map(ResourceFile::Disk)
    }

    pub fn open_disk(&self, rel_path: &str) -> Result<DiskFile> {
        if rel_path.starts_with(['/', '\\']) {
            return Err(Error::invalid(format!("absolute paths are not allowed: {rel_path:?}")));
        }
        let rel_path = normalize_path(rel_path);
        let root = self.disk_root.as_deref().ok_or_else(|| Error::NotFound(PathBuf::from(&rel_path)))?;

        let mut files = self.disk_files.lock();
        if let Some(shared) = files.get(&rel_path).and_then(Weak::upgrade) {
            return Ok(DiskFile { shared });
        }
        let abs = resolve_under(root, &rel_path, self.path_policy)?;
        if !abs.is_file() {
            return Err(Error::NotFound(abs));
        }
        let file = File::open(&abs)?;
        let size = file.metadata()?.len();
        debug!("disk fallback for '{}' -> {}", rel_path, abs.display());
        let shared = Arc::new(DiskShared { rel_path: rel_path.clone(), size, file: Mutex::new(file) });
        files.retain(|_, w| w.strong_count() > 0);
        files.insert(rel_path, Arc::downgrade(&shared));
        Ok(DiskFile { shared })
    }

    /// Number of disk files currently held open.
    pub fn open_disk_files(&self) -> usize {
        self.disk_files.lock().values().filter(|w| w.strong_count() > 0).count()
    }
}
