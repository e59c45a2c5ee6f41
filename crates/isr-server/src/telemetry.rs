//! Prometheus counter names and recording helpers.

use metrics::{counter, describe_counter};

pub const CACHE_HITS: &str = "isr_cache_hits_total";
pub const CACHE_MISSES: &str = "isr_cache_misses_total";
pub const CACHE_STALE: &str = "isr_cache_stale_total";
pub const CACHE_BYPASS: &str = "isr_cache_bypass_total";
pub const RENDERS: &str = "isr_renders_total";
pub const INVALIDATIONS: &str = "isr_invalidations_total";

pub fn describe() {
    describe_counter!(CACHE_HITS, "Pages served fresh from cache");
    describe_counter!(CACHE_MISSES, "Lookups with no cached copy in a registered domain");
    describe_counter!(CACHE_STALE, "Stale pages served while regenerating");
    describe_counter!(CACHE_BYPASS, "Requests served without the cache (unknown domain)");
    describe_counter!(RENDERS, "Upstream renders by outcome");
    describe_counter!(INVALIDATIONS, "Cache entries removed through the invalidation API");
}

pub fn record_lookup(name: &'static str, domain: &str) {
    counter!(name, "domain" => domain.to_string()).increment(1);
}

pub fn record_render(domain: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(RENDERS, "domain" => domain.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_invalidations(domain: &str, removed: u64) {
    counter!(INVALIDATIONS, "domain" => domain.to_string()).increment(removed);
}
