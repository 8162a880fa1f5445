use crate::error::Result;
use crate::handle::CachePolicy;
use crate::path_safety::PathPolicy;
use crate::registry::Bundles;
use crate::resource::ResourceLocator;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Overlay setup, usually read from JSON:
///
/// ```json
/// { "cache_policy": "ref_counted", "disk_root": "assets", "archives": ["base.blr", "patch.blr"] }
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct OverlayConfig {
    pub cache_policy: CachePolicy,
    pub disk_root: Option<PathBuf>,
    pub follow_symlinks: bool,
    /// Loaded in order; later archives shadow earlier ones.
    pub archives: Vec<PathBuf>,
}

impl OverlayConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(f))?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Build the locator, loading every archive. Archives that fail to load are skipped.
    pub fn build(&self) -> ResourceLocator {
        let bundles = Bundles::new(self.cache_policy);
        for a in &self.archives {
            if let Err(e) = bundles.load(a) {
                warn!("skipping archive {}: {}", a.display(), e);
            }
        }
        let mut loc = ResourceLocator::new(bundles)
            .with_path_policy(PathPolicy { follow_symlinks: self.follow_symlinks });
        if let Some(root) = &self.disk_root {
            loc = loc.with_disk_root(root);
        }
        loc
    }
}
