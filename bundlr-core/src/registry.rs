//! Overlay of every loaded bundle: relative path -> owning bundle, last load wins.
//!
//! Each bundle is counted by the number of distinct paths that currently
//! resolve to it. When a later load displaces its last path the bundle is
//! released. Releasing a bundle by any route removes it from the overlay.

use crate::bundle::{Bundle, BundleFile, BundleId};
use crate::error::{Error, Result};
use crate::handle::CachePolicy;
use crate::layout::normalize_key;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Tables {
    path_owner: HashMap<String, Arc<Bundle>>,
    refcounts: HashMap<BundleId, usize>,
    loaded: HashMap<BundleId, Arc<Bundle>>,
}

impl Tables {
    /// Point `key` at `bundle`. Returns the previous owner if it just lost its last path.
    fn register(&mut self, key: String, bundle: &Arc<Bundle>) -> Option<Arc<Bundle>> {
        match self.path_owner.insert(key, bundle.clone()) {
            Some(old) if old.id() == bundle.id() => None,
            Some(old) => {
                *self.refcounts.entry(bundle.id()).or_default() += 1;
                self.release_usage(old)
            }
            None => {
                *self.refcounts.entry(bundle.id()).or_default() += 1;
                None
            }
        }
    }

    fn release_usage(&mut self, bundle: Arc<Bundle>) -> Option<Arc<Bundle>> {
        let count = self.refcounts.get_mut(&bundle.id())?;
        *count = count.saturating_sub(1);
        if *count > 0 {
            return None;
        }
        self.forget(bundle.id());
        Some(bundle)
    }

    fn forget(&mut self, id: BundleId) {
        self.loaded.remove(&id);
        self.refcounts.remove(&id);
        self.path_owner.retain(|_, b| b.id() != id);
    }
}

struct Shared {
    policy: CachePolicy,
    tables: Mutex<Tables>,
}

impl Shared {
    // Ids are never reused, so forgetting an id that is already gone is a no-op.
    fn on_bundle_released(&self, id: BundleId) {
        self.tables.lock().forget(id);
        debug!("bundle {} removed from overlay", id);
    }
}

/// Shared handle to one overlay registry. Clones refer to the same tables.
#[derive(Clone)]
pub struct Bundles {
    shared: Arc<Shared>,
}

impl Default for Bundles {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

impl Bundles {
    /// Registry whose bundles are opened with `policy`.
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            shared: Arc::new(Shared { policy, tables: Mutex::new(Tables::default()) }),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.shared.policy
    }

    /// Open the bundle at `path` and make every path in it resolve there.
    /// On failure the overlay is left untouched.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<BundleId> {
        let path = path.as_ref();
        let bundle = match Bundle::open_with(path, self.shared.policy) {
            Ok(b) => Arc::new(b),
            Err(e) => {
                warn!("failed to load bundle {}: {}", path.display(), e);
                return Err(e);
            }
        };
        let id = bundle.id();
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        bundle.on_release(move |id| {
            if let Some(shared) = weak.upgrade() {
                shared.on_bundle_released(id);
            }
        });

        let displaced: Vec<Arc<Bundle>> = {
            let mut t = self.shared.tables.lock();
            t.loaded.insert(id, bundle.clone());
            t.refcounts.insert(id, 0);
            let mut displaced = Vec::new();
            for p in bundle.file_list() {
                if let Some(old) = t.register(normalize_key(&p), &bundle) {
                    displaced.push(old);
                }
            }
            displaced
        };
        // Released outside the lock: release callbacks take it again.
        for old in displaced {
            warn!("bundle {} ({}) fully shadowed, releasing", old.id(), old.path().display());
            old.release();
        }
        info!("loaded bundle {} from {}", id, path.display());
        Ok(id)
    }

    /// Open `rel_path` from whichever bundle currently owns it.
    ///
    /// `Ok(None)` means no bundle owns the path. An owner that cannot serve it
    /// (released meanwhile, or its file cannot be reopened) is an error.
    pub fn resolve(&self, rel_path: &str) -> Result<Option<BundleFile>> {
        let key = normalize_key(rel_path);
        let Some(bundle) = self.shared.tables.lock().path_owner.get(&key).cloned() else {
            return Ok(None);
        };
        let meta = bundle.get_metadata(&key).ok_or(Error::Released(bundle.id().get()))?;
        BundleFile::with_meta(bundle, meta).map(Some)
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        self.shared.tables.lock().path_owner.contains_key(&normalize_key(rel_path))
    }

    /// Id of the bundle currently serving `rel_path`.
    pub fn owner_of(&self, rel_path: &str) -> Option<BundleId> {
        self.shared.tables.lock().path_owner.get(&normalize_key(rel_path)).map(|b| b.id())
    }

    /// Every resolvable path, as stored by its owning bundle, sorted.
    pub fn file_list(&self) -> Vec<String> {
        let t = self.shared.tables.lock();
        let mut v: Vec<String> = t
            .path_owner
            .iter()
            .filter_map(|(k, b)| b.get_metadata(k).map(|m| m.relative_path().to_string()))
            .collect();
        v.sort();
        v
    }

    pub fn bundle(&self, id: BundleId) -> Option<Arc<Bundle>> {
        self.shared.tables.lock().loaded.get(&id).cloned()
    }

    pub fn loaded_count(&self) -> usize {
        self.shared.tables.lock().loaded.len()
    }

    /// Number of paths resolving to bundle `id`, `None` if it is not loaded.
    pub fn refcount(&self, id: BundleId) -> Option<usize> {
        self.shared.tables.lock().refcounts.get(&id).copied()
    }

    /// Release one bundle; its paths stop resolving. Returns whether it was loaded.
    pub fn unload(&self, id: BundleId) -> bool {
        let bundle = self.bundle(id);
        match bundle {
            Some(b) => {
                b.release();
                true
            }
            None => false,
        }
    }

    /// Reopen bundle `id` from its path. The fresh bundle is loaded on top,
    /// then the old one is released. On failure the old bundle stays.
    pub fn reload(&self, id: BundleId) -> Result<BundleId> {
        let old = self.bundle(id).ok_or_else(|| Error::invalid(format!("bundle {id} is not loaded")))?;
        let new_id = self.load(old.path())?;
        old.release();
        debug!("reloaded bundle {} as {}", id, new_id);
        Ok(new_id)
    }

    /// Release every loaded bundle and clear the overlay.
    ///
    /// Handles already handed out fail with `Released` from here on.
    pub fn dispose_all(&self) {
        let loaded = {
            let mut t = self.shared.tables.lock();
            let loaded = std::mem::take(&mut t.loaded);
            t.path_owner.clear();
            t.refcounts.clear();
            loaded
        };
        let n = loaded.len();
        for b in loaded.into_values() {
            b.release();
        }
        info!("disposed {} bundle(s)", n);
    }
}
