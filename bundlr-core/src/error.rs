use std::path::PathBuf;

use thiserror::Error;

use crate::layout::Version;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Archive missing at open time, or source file missing when packing.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("read of {len} bytes at offset {offset} exceeds file size {size}")]
    OutOfRange { offset: u64, len: u64, size: u64 },

    /// Metadata handed to a bundle that did not produce it.
    #[error("metadata for '{path}' belongs to bundle {owner}, not bundle {bundle}")]
    OwnershipMismatch { path: String, owner: u64, bundle: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt bundle header: {0}")]
    Corrupt(String),

    #[error("unsupported bundle version {found} (reader supports up to {supported})")]
    UnsupportedVersion { found: Version, supported: Version },

    #[error("relative path is {0} bytes, longer than the 65535 the index can store")]
    PathTooLong(usize),

    #[error("bundle {0} has been released")]
    Released(u64),

    #[error("bad exclude pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("bad overlay config: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }
}
