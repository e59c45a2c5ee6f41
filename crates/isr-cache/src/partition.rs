use crate::domain::normalize_domain;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One domain's URL → entry map.
///
/// Reads take the shared lock, `insert`/`remove`/`clear` take the exclusive
/// lock. Every method is synchronous, so no guard outlives the call.
pub struct Partition {
    entries: RwLock<AHashMap<String, Arc<CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Partition {
    fn new() -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Insert or replace. Returns the entry that was replaced, if any.
    pub fn insert(&self, url: String, entry: CacheEntry) -> Option<Arc<CacheEntry>> {
        self.entries.write().insert(url, Arc::new(entry))
    }

    /// Look up a URL, counting the hit or miss.
    pub fn get(&self, url: &str) -> Option<Arc<CacheEntry>> {
        let found = self.entries.read().get(url).cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.read().contains_key(url)
    }

    pub fn remove(&self, url: &str) -> bool {
        self.entries.write().remove(url).is_some()
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Cached URLs, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Fixed set of per-domain partitions.
///
/// Built once from the configured domain list. Domains cannot be added
/// afterwards; unknown domains fail with [`CacheError::UnknownDomain`].
pub struct PartitionStore {
    partitions: AHashMap<String, Partition>,
    /// Registration order, for stable listings.
    order: Vec<String>,
}

impl PartitionStore {
    /// Allocate one empty partition per domain. Entries may be base URLs or
    /// bare hostnames; duplicates after normalization collapse into one.
    pub fn new<I, S>(domains: I) -> CacheResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut partitions = AHashMap::new();
        let mut order = Vec::new();

        for raw in domains {
            let domain = normalize_domain(raw.as_ref())?;
            if partitions.contains_key(&domain) {
                tracing::warn!(domain = %domain, "duplicate domain in registration list, ignoring");
                continue;
            }
            partitions.insert(domain.clone(), Partition::new());
            order.push(domain);
        }

        tracing::debug!(domains = ?order, "partition store initialized");

        Ok(Self { partitions, order })
    }

    /// The partition owning `domain`.
    pub fn partition(&self, domain: &str) -> CacheResult<&Partition> {
        self.partitions
            .get(domain)
            .ok_or_else(|| CacheError::unknown_domain(domain))
    }

    /// Registered domains in registration order.
    pub fn domains(&self) -> &[String] {
        &self.order
    }

    /// Partitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Partition)> + '_ {
        self.order
            .iter()
            .filter_map(|d| self.partitions.get(d).map(|p| (d.as_str(), p)))
    }

    /// Total entries across all partitions.
    pub fn len(&self) -> usize {
        self.partitions.values().map(Partition::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(Partition::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::RevalidateOptions;
    use chrono::Utc;

    fn entry(domain: &str) -> CacheEntry {
        CacheEntry::annotated("<p>hi</p>", RevalidateOptions::never(), domain.into(), Utc::now())
    }

    #[test]
    fn one_partition_per_domain() {
        let store = PartitionStore::new(["https://a.com", "b.com", "https://A.com/"]).unwrap();
        assert_eq!(store.domains(), ["a.com".to_string(), "b.com".to_string()]);
        assert!(store.partition("a.com").is_ok());
        assert!(store.partition("b.com").is_ok());
        assert!(store.is_empty());
    }

    #[test]
    fn unknown_domain_is_an_error() {
        let store = PartitionStore::new(["a.com"]).unwrap();
        assert_eq!(
            store.partition("c.com").err(),
            Some(CacheError::UnknownDomain {
                domain: "c.com".into()
            })
        );
    }

    #[test]
    fn bad_registration_entry_fails_construction() {
        assert!(PartitionStore::new(["a.com", "/relative/path"]).is_err());
    }

    #[test]
    fn insert_replaces_in_place() {
        let store = PartitionStore::new(["a.com"]).unwrap();
        let part = store.partition("a.com").unwrap();

        assert!(part.insert("https://a.com/x".into(), entry("a.com")).is_none());
        assert!(part.insert("https://a.com/x".into(), entry("a.com")).is_some());
        assert_eq!(part.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let store = PartitionStore::new(["a.com"]).unwrap();
        let part = store.partition("a.com").unwrap();
        part.insert("https://a.com/x".into(), entry("a.com"));

        assert!(part.remove("https://a.com/x"));
        assert!(!part.remove("https://a.com/x"));
        assert!(!part.contains("https://a.com/x"));
    }

    #[test]
    fn get_counts_hits_and_misses() {
        let store = PartitionStore::new(["a.com"]).unwrap();
        let part = store.partition("a.com").unwrap();
        part.insert("https://a.com/x".into(), entry("a.com"));

        assert!(part.get("https://a.com/x").is_some());
        assert!(part.get("https://a.com/y").is_none());
        assert!(part.get("https://a.com/z").is_none());
        assert_eq!(part.hits(), 1);
        assert_eq!(part.misses(), 2);
    }

    #[test]
    fn clear_empties_only_one_partition() {
        let store = PartitionStore::new(["a.com", "b.com"]).unwrap();
        let a = store.partition("a.com").unwrap();
        let b = store.partition("b.com").unwrap();
        a.insert("https://a.com/1".into(), entry("a.com"));
        a.insert("https://a.com/2".into(), entry("a.com"));
        b.insert("https://b.com/1".into(), entry("b.com"));

        assert_eq!(a.clear(), 2);
        assert!(a.is_empty());
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn iter_follows_registration_order() {
        let store = PartitionStore::new(["z.com", "a.com", "m.com"]).unwrap();
        let names: Vec<&str> = store.iter().map(|(d, _)| d).collect();
        assert_eq!(names, ["z.com", "a.com", "m.com"]);
    }

    #[test]
    fn is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PartitionStore>();
        assert_send_sync::<Partition>();
    }
}
