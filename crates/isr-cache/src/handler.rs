use crate::domain::{normalize_domain, resolve_domain};
use crate::entry::{CacheEntry, RevalidateOptions};
use crate::error::{CacheError, CacheResult};
use crate::partition::{Partition, PartitionStore};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// Per-domain statistics snapshot.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DomainStats {
    pub domain: String,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Statistics across every registered domain.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub domains: Vec<DomainStats>,
}

/// Cache contract consumed by the serving pipeline.
///
/// Every operation is keyed by an absolute URL and resolved to the partition
/// of the URL's hostname. The contract is async so a disk- or network-backed
/// store can replace the in-memory one without touching callers.
#[async_trait]
pub trait CacheHandler: Send + Sync {
    /// Store `content` for `url`, replacing any existing entry. The stored
    /// content gets the cache annotation appended.
    async fn add(&self, url: &str, content: &str, options: RevalidateOptions) -> CacheResult<()>;

    /// The entry for `url`, or [`CacheError::NotFound`].
    async fn get(&self, url: &str) -> CacheResult<Arc<CacheEntry>>;

    async fn has(&self, url: &str) -> CacheResult<bool>;

    /// Remove the entry for `url`. Returns whether something was removed.
    async fn delete(&self, url: &str) -> CacheResult<bool>;

    /// Every cached URL across all domains.
    async fn list_all_keys(&self) -> Vec<String>;

    /// Drop every entry of one domain, given as a hostname or base URL.
    /// Returns the number removed.
    async fn invalidate_domain(&self, domain: &str) -> CacheResult<usize>;

    async fn stats(&self) -> CacheStats;

    /// Backend name, for logs and headers.
    fn name(&self) -> &'static str;
}

/// In-process [`CacheHandler`] over a [`PartitionStore`].
pub struct InMemoryCacheHandler {
    store: PartitionStore,
}

impl InMemoryCacheHandler {
    /// Build a handler with one partition per domain.
    pub fn new<I, S>(domains: I) -> CacheResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = PartitionStore::new(domains)?;
        tracing::info!(domains = ?store.domains(), "in-memory cache handler initialized");
        Ok(Self { store })
    }

    pub fn from_store(store: PartitionStore) -> Self {
        Self { store }
    }

    pub fn domains(&self) -> &[String] {
        self.store.domains()
    }

    /// Resolve `url` to its domain and that domain's partition.
    fn route(&self, url: &str) -> CacheResult<(String, &Partition)> {
        let domain = resolve_domain(url)?;
        let partition = self.store.partition(&domain)?;
        Ok((domain, partition))
    }
}

#[async_trait]
impl CacheHandler for InMemoryCacheHandler {
    async fn add(&self, url: &str, content: &str, options: RevalidateOptions) -> CacheResult<()> {
        let (domain, partition) = self.route(url)?;
        let entry = CacheEntry::annotated(content, options, domain, Utc::now());
        let replaced = partition.insert(url.to_string(), entry).is_some();

        tracing::debug!(
            url,
            revalidate = ?options.revalidate_seconds,
            replaced,
            "cache entry stored"
        );
        Ok(())
    }

    async fn get(&self, url: &str) -> CacheResult<Arc<CacheEntry>> {
        let (_, partition) = self.route(url)?;
        match partition.get(url) {
            Some(entry) => {
                tracing::debug!(url, "cache HIT");
                Ok(entry)
            }
            None => {
                tracing::debug!(url, "cache MISS");
                Err(CacheError::not_found(url))
            }
        }
    }

    async fn has(&self, url: &str) -> CacheResult<bool> {
        let (_, partition) = self.route(url)?;
        Ok(partition.contains(url))
    }

    async fn delete(&self, url: &str) -> CacheResult<bool> {
        let (domain, partition) = self.route(url)?;
        let removed = partition.remove(url);
        tracing::info!(url, domain = %domain, removed, "cache entry invalidated");
        Ok(removed)
    }

    async fn list_all_keys(&self) -> Vec<String> {
        self.store
            .iter()
            .flat_map(|(_, partition)| partition.keys())
            .collect()
    }

    async fn invalidate_domain(&self, domain: &str) -> CacheResult<usize> {
        let domain = normalize_domain(domain)?;
        let removed = self.store.partition(&domain)?.clear();
        tracing::info!(domain = %domain, removed, "domain partition invalidated");
        Ok(removed)
    }

    async fn stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for (domain, partition) in self.store.iter() {
            let s = DomainStats {
                domain: domain.to_string(),
                entries: partition.len(),
                hits: partition.hits(),
                misses: partition.misses(),
            };
            total.total_entries += s.entries;
            total.hits += s.hits;
            total.misses += s.misses;
            total.domains.push(s);
        }
        total
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}
