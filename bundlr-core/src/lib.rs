pub mod bundle;
pub mod collect;
pub mod config;
pub mod error;
pub mod handle;
pub mod layout;
pub mod packer;
pub mod path_safety;
pub mod registry;
pub mod resource;

pub use bundle::{Bundle, BundleFile, BundleId, FileMeta};
pub use error::{Error, Result};
pub use handle::CachePolicy;
pub use registry::Bundles;
pub use resource::{ResourceFile, ResourceLocator};
