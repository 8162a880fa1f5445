use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// When a bundle keeps its underlying file open.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Open before every read, close right after.
    None,
    /// Open once and keep open until the bundle is released.
    AlwaysCached,
    /// Open while at least one caller holds the handle (see `Bundle::acquire_handle`).
    #[default]
    RefCounted,
}

/// Open/closed state of one bundle's file. Callers serialize access through the bundle's lock.
pub(crate) struct FileHandle {
    path: PathBuf,
    policy: CachePolicy,
    file: Option<File>,
    users: usize,
}

impl FileHandle {
    /// `opened` is the file the header was parsed from; kept only under `AlwaysCached`.
    pub(crate) fn new(path: PathBuf, policy: CachePolicy, opened: File) -> Self {
        let file = match policy {
            CachePolicy::AlwaysCached => Some(opened),
            CachePolicy::None | CachePolicy::RefCounted => None,
        };
        Self { path, policy, file, users: 0 }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub(crate) fn users(&self) -> usize {
        self.users
    }

    pub(crate) fn acquire(&mut self) -> io::Result<()> {
        if self.policy != CachePolicy::RefCounted {
            return Ok(());
        }
        if self.file.is_none() {
            debug!("opening handle for {}", self.path.display());
            self.file = Some(File::open(&self.path)?);
        }
        self.users += 1;
        Ok(())
    }

    pub(crate) fn release(&mut self) {
        if self.policy != CachePolicy::RefCounted || self.users == 0 {
            return;
        }
        self.users -= 1;
        if self.users == 0 {
            debug!("closing handle for {}", self.path.display());
            self.file = None;
        }
    }

    /// Run `f` against the cached file, or a transient one when nothing is cached.
    pub(crate) fn with_file<T>(&mut self, f: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        match self.file.as_mut() {
            Some(file) => f(file),
            None => {
                let mut file = File::open(&self.path)?;
                f(&mut file)
            }
        }
    }

    pub(crate) fn close(&mut self) {
        self.file = None;
        self.users = 0;
    }
}
