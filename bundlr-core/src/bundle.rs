use crate::error::{Error, Result};
use crate::handle::{CachePolicy, FileHandle};
use crate::layout::{self, normalize_key, Version};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id assigned when a bundle is opened.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BundleId(u64);

impl BundleId {
    fn next() -> Self {
        BundleId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index record of one file, bound to the bundle it was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMeta {
    owner: BundleId,
    path: String,
    pos: u64,
    size: u64,
}

impl FileMeta {
    pub fn owner(&self) -> BundleId {
        self.owner
    }

    pub fn relative_path(&self) -> &str {
        &self.path
    }

    /// Offset relative to the bundle's data start.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

type ReleaseHook = Box<dyn FnOnce(BundleId) + Send>;

/// Validate read arguments shared by every file handle.
pub(crate) fn check_read_args(
    dst_len: usize,
    dst_offset: usize,
    file_offset: u64,
    read_size: usize,
    file_size: u64,
) -> Result<()> {
    if dst_offset > dst_len || dst_len - dst_offset < read_size {
        return Err(Error::invalid(format!(
            "destination of {dst_len} bytes cannot hold {read_size} bytes at offset {dst_offset}"
        )));
    }
    let end = file_offset.checked_add(read_size as u64);
    if end.map_or(true, |end| end > file_size) {
        return Err(Error::OutOfRange { offset: file_offset, len: read_size as u64, size: file_size });
    }
    Ok(())
}

/// An opened bundle: parsed index plus a lock-guarded file handle.
///
/// All reads on one bundle are serialized by that lock, so the shared cursor
/// never interleaves between callers.
pub struct Bundle {
    id: BundleId,
    path: PathBuf,
    version: Version,
    data_start_offset: u64,
    index: RwLock<HashMap<String, FileMeta>>,
    handle: Mutex<FileHandle>,
    released: AtomicBool,
    on_release: Mutex<Vec<ReleaseHook>>,
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("version", &self.version)
            .field("files", &self.len())
            .finish()
    }
}

impl Bundle {
    /// Open with the default [`CachePolicy::RefCounted`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, CachePolicy::default())
    }

    pub fn open_with(path: impl AsRef<Path>, policy: CachePolicy) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let header = layout::read_header(&mut BufReader::new(&file), file_len)?;

        let id = BundleId::next();
        let mut index = HashMap::with_capacity(header.entries.len());
        for e in header.entries {
            let meta = FileMeta { owner: id, path: e.path, pos: e.pos, size: e.size };
            index.insert(normalize_key(&meta.path), meta);
        }
        info!(
            "opened bundle {} {} ({} files, {:?}) from {}",
            id,
            header.version,
            index.len(),
            policy,
            path.display()
        );
        Ok(Self {
            id,
            path: path.to_path_buf(),
            version: header.version,
            data_start_offset: header.data_start_offset,
            index: RwLock::new(index),
            handle: Mutex::new(FileHandle::new(path.to_path_buf(), policy, file)),
            released: AtomicBool::new(false),
            on_release: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> BundleId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn data_start_offset(&self) -> u64 {
        self.data_start_offset
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has(&self, rel_path: &str) -> bool {
        self.index.read().contains_key(&normalize_key(rel_path))
    }

    pub fn get_metadata(&self, rel_path: &str) -> Option<FileMeta> {
        self.index.read().get(&normalize_key(rel_path)).cloned()
    }

    /// Stored relative paths, sorted.
    pub fn file_list(&self) -> Vec<String> {
        let mut v: Vec<String> = self.index.read().values().map(|m| m.path.clone()).collect();
        v.sort();
        v
    }

    /// Index entries ordered by data position.
    pub fn entries(&self) -> Vec<FileMeta> {
        let mut v: Vec<FileMeta> = self.index.read().values().cloned().collect();
        v.sort_by_key(|m| (m.pos, m.size));
        v
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn is_handle_open(&self) -> bool {
        self.handle.lock().is_open()
    }

    /// Current holders of the handle under [`CachePolicy::RefCounted`].
    pub fn handle_users(&self) -> usize {
        self.handle.lock().users()
    }

    /// Begin a burst of reads. Under `RefCounted` this opens the file on the first holder.
    pub fn acquire_handle(&self) -> Result<()> {
        let mut h = self.handle.lock();
        if self.is_released() {
            return Err(Error::Released(self.id.get()));
        }
        h.acquire()?;
        Ok(())
    }

    /// End a burst of reads. Under `RefCounted` the last holder closes the file.
    pub fn release_handle(&self) {
        self.handle.lock().release();
    }

    /// Copy `read_size` bytes at `file_offset` of `meta` into `dst[dst_offset..]`.
    pub fn read(
        &self,
        meta: &FileMeta,
        dst: &mut [u8],
        dst_offset: usize,
        file_offset: u64,
        read_size: usize,
    ) -> Result<()> {
        if meta.owner != self.id {
            return Err(Error::OwnershipMismatch {
                path: meta.path.clone(),
                owner: meta.owner.get(),
                bundle: self.id.get(),
            });
        }
        check_read_args(dst.len(), dst_offset, file_offset, read_size, meta.size)?;
        if self.is_released() {
            return Err(Error::Released(self.id.get()));
        }
        if read_size == 0 {
            return Ok(());
        }
        let abs = self.data_start_offset + meta.pos + file_offset;
        let out = &mut dst[dst_offset..dst_offset + read_size];

        let mut h = self.handle.lock();
        if self.is_released() {
            return Err(Error::Released(self.id.get()));
        }
        h.with_file(|f| {
            f.seek(SeekFrom::Start(abs))?;
            f.read_exact(out)
        })?;
        Ok(())
    }

    /// Read a whole file into a new buffer.
    pub fn read_to_vec(&self, meta: &FileMeta) -> Result<Vec<u8>> {
        let len = usize::try_from(meta.size)
            .map_err(|_| Error::invalid(format!("'{}' is too large to buffer", meta.path)))?;
        let mut buf = vec![0u8; len];
        self.read(meta, &mut buf, 0, 0, len)?;
        Ok(buf)
    }

    /// Register a callback run once when this bundle is released.
    pub fn on_release(&self, hook: impl FnOnce(BundleId) + Send + 'static) {
        let mut hooks = self.on_release.lock();
        if self.is_released() {
            drop(hooks);
            hook(self.id);
            return;
        }
        hooks.push(Box::new(hook));
    }

    /// Close the file, drop the index and run release callbacks. Idempotent.
    pub fn release(&self) {
        {
            let mut h = self.handle.lock();
            if self.released.swap(true, Ordering::AcqRel) {
                return;
            }
            h.close();
        }
        self.index.write().clear();
        let hooks = std::mem::take(&mut *self.on_release.lock());
        debug!("released bundle {} ({})", self.id, self.path.display());
        for hook in hooks {
            hook(self.id);
        }
    }
}

/// A file inside a bundle, holding the bundle's handle for as long as it lives.
pub struct BundleFile {
    bundle: Arc<Bundle>,
    meta: FileMeta,
}

impl fmt::Debug for BundleFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleFile").field("bundle", &self.bundle.id).field("meta", &self.meta).finish()
    }
}

impl BundleFile {
    /// Open `rel_path` from `bundle`, failing with `NotFound` when it is not indexed.
    pub fn open(bundle: Arc<Bundle>, rel_path: &str) -> Result<Self> {
        let meta = bundle.get_metadata(rel_path).ok_or_else(|| Error::NotFound(PathBuf::from(rel_path)))?;
        Self::with_meta(bundle, meta)
    }

    pub(crate) fn with_meta(bundle: Arc<Bundle>, meta: FileMeta) -> Result<Self> {
        bundle.acquire_handle()?;
        Ok(Self { bundle, meta })
    }

    pub fn bundle(&self) -> &Arc<Bundle> {
        &self.bundle
    }

    pub fn metadata(&self) -> &FileMeta {
        &self.meta
    }

    pub fn size(&self) -> u64 {
        self.meta.size
    }

    pub fn relative_path(&self) -> &str {
        &self.meta.path
    }

    pub fn read(&self, dst: &mut [u8], dst_offset: usize, file_offset: u64, read_size: usize) -> Result<()> {
        self.bundle.read(&self.meta, dst, dst_offset, file_offset, read_size)
    }

    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        self.bundle.read_to_vec(&self.meta)
    }

    pub fn close(self) {}
}

impl Drop for BundleFile {
    fn drop(&mut self) {
        self.bundle.release_handle();
    }
}
