//! Multi-domain render cache.
//!
//! Rendered pages are stored per URL inside an independent partition for the
//! URL's hostname. The set of domains is fixed when the store is built; asking
//! for a URL whose hostname was never registered is an error, not a miss.

pub mod domain;
pub mod entry;
pub mod error;
pub mod handler;
pub mod partition;

pub use domain::{normalize_domain, resolve_domain};
pub use entry::{cache_annotation, CacheEntry, RevalidateOptions};
pub use error::{CacheError, CacheResult};
pub use handler::{CacheHandler, CacheStats, DomainStats, InMemoryCacheHandler};
pub use partition::{Partition, PartitionStore};
