use crate::collect::collect_dir;
use crate::error::{Error, Result};
use crate::layout::{self, align, normalize_key, normalize_path, IndexEntry, Version};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Summary of a finished pack.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PackReport {
    pub output: PathBuf,
    pub version: Version,
    pub files: usize,
    pub data_start_offset: u64,
    pub total_bytes: u64,
    pub entries: Vec<IndexEntry>,
}

#[derive(Clone, Debug)]
struct Pending {
    rel_path: String,
    source: PathBuf,
}

/// Collects (relative path, source file) pairs and writes them into one bundle.
///
/// Paths are keyed case-insensitively; adding a path twice keeps the first
/// insertion slot but the last source.
pub struct Packer {
    output: PathBuf,
    version: Version,
    files: IndexMap<String, Pending>,
}

fn not_found_or(e: io::Error, path: &Path) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::NotFound(path.to_path_buf())
    } else {
        Error::Io(e)
    }
}

impl Packer {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self { output: output.into(), version: layout::CURRENT_VERSION, files: IndexMap::new() }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Register `source` to be stored under `rel_path`.
    pub fn add(&mut self, rel_path: &str, source: impl AsRef<Path>) -> Result<()> {
        let source = source.as_ref();
        let md = fs::metadata(source).map_err(|e| not_found_or(e, source))?;
        if !md.is_file() {
            return Err(Error::invalid(format!("{} is not a regular file", source.display())));
        }
        let rel_path = normalize_path(rel_path);
        if rel_path.is_empty() {
            return Err(Error::invalid("empty relative path"));
        }
        if rel_path.len() > u16::MAX as usize {
            return Err(Error::PathTooLong(rel_path.len()));
        }
        let pending = Pending { rel_path, source: source.to_path_buf() };
        if let Some(prev) = self.files.insert(normalize_key(&pending.rel_path), pending) {
            warn!(
                "conflict: '{}' ({}) is overwritten with {}",
                prev.rel_path,
                prev.source.display(),
                source.display()
            );
        }
        Ok(())
    }

    /// Add every file under `root`, skipping OS metadata files, `excludes`
    /// and the output bundle itself. Returns the number of files added.
    pub fn add_dir(&mut self, root: &Path, excludes: &[String]) -> Result<usize> {
        if !root.is_dir() {
            return Err(Error::NotFound(root.to_path_buf()));
        }
        let output = fs::canonicalize(&self.output).ok();
        let mut added = 0;
        for c in collect_dir(root, excludes)? {
            if output.is_some() && fs::canonicalize(&c.source).ok() == output {
                debug!("skipping {}: it is the pack output", c.source.display());
                continue;
            }
            self.add(&c.rel_path, &c.source)?;
            added += 1;
        }
        Ok(added)
    }

    /// Unregister `rel_path`. Returns whether it was registered.
    pub fn remove(&mut self, rel_path: &str) -> bool {
        self.files.shift_remove(&normalize_key(&normalize_path(rel_path))).is_some()
    }

    /// Write the bundle. Any error leaves the output unusable.
    pub fn pack(&self) -> Result<PackReport> {
        // Offsets are assigned in insertion order, each region starting aligned.
        let output = fs::canonicalize(&self.output).ok();
        let mut entries = Vec::with_capacity(self.files.len());
        let mut pos = 0u64;
        for p in self.files.values() {
            if output.is_some() && fs::canonicalize(&p.source).ok() == output {
                return Err(Error::invalid(format!("'{}' is the pack output itself", p.rel_path)));
            }
            let size = fs::metadata(&p.source).map_err(|e| not_found_or(e, &p.source))?.len();
            entries.push(IndexEntry { path: p.rel_path.clone(), pos, size });
            pos = align(pos + size);
        }
        let index = layout::encode_index(&entries)?;

        let out = File::create(&self.output)?;
        let mut w = BufWriter::new(out);
        let data_start = layout::write_header(&mut w, self.version, &index)?;

        let mut written = 0u64;
        for (p, e) in self.files.values().zip(&entries) {
            let pad = (e.pos - written) as usize;
            w.write_all(&[0u8; layout::ALIGNMENT as usize][..pad])?;
            debug!("packing '{}' from {} ({} bytes at {})", e.path, p.source.display(), e.size, e.pos);
            let src = File::open(&p.source).map_err(|err| not_found_or(err, &p.source))?;
            let copied = io::copy(&mut src.take(e.size), &mut w)?;
            if copied != e.size {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} shrank while packing: {} of {} bytes", p.source.display(), copied, e.size),
                )));
            }
            written = e.pos + e.size;
        }
        w.flush()?;

        let total_bytes = data_start + written;
        info!("packed {} file(s) into {} ({} bytes)", entries.len(), self.output.display(), total_bytes);
        Ok(PackReport {
            output: self.output.clone(),
            version: self.version,
            files: entries.len(),
            data_start_offset: data_start,
            total_bytes,
            entries,
        })
    }
}
