use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Revalidation policy attached to a cached page.
///
/// `revalidate_seconds: None` (or `Some(0)`) caches the page until it is
/// explicitly invalidated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevalidateOptions {
    pub revalidate_seconds: Option<u64>,
}

impl RevalidateOptions {
    pub fn after(seconds: u64) -> Self {
        Self {
            revalidate_seconds: Some(seconds),
        }
    }

    pub fn never() -> Self {
        Self::default()
    }

    /// The refresh interval, if one applies.
    pub fn interval(&self) -> Option<u64> {
        self.revalidate_seconds.filter(|secs| *secs > 0)
    }
}

/// A rendered page stored in a domain partition.
///
/// Entries are immutable once stored; a second `add` for the same URL
/// replaces the whole entry.
#[derive(Clone, Debug, Serialize)]
pub struct CacheEntry {
    /// Rendered markup with the cache annotation appended.
    pub content: String,
    pub options: RevalidateOptions,
    pub created_at: DateTime<Utc>,
    pub domain: String,
}

impl CacheEntry {
    /// Build an entry whose content carries the annotation for `created_at`.
    pub fn annotated(
        content: &str,
        options: RevalidateOptions,
        domain: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        let annotation = cache_annotation(options.revalidate_seconds, created_at);
        let mut body = String::with_capacity(content.len() + annotation.len());
        body.push_str(content);
        body.push_str(&annotation);

        Self {
            content: body,
            options,
            created_at,
            domain,
        }
    }

    /// Whether the revalidation window has passed. Advisory only: nothing is
    /// evicted because of it.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let Some(secs) = self.options.interval() else {
            return false;
        };
        let window_ms = i64::try_from(secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        now.signed_duration_since(self.created_at).num_milliseconds() > window_ms
    }
}

/// HTML comment appended to cached markup so cache hits are visible in the
/// page source.
pub fn cache_annotation(revalidate_seconds: Option<u64>, served_at: DateTime<Utc>) -> String {
    let time = served_at.format("%Y-%m-%d %H:%M:%S");

    let mut msg = String::from("<!-- ");
    let _ = write!(msg, "\n🚀 Served from cache! \n⌛ Last updated: {time}. ");
    if let Some(secs) = revalidate_seconds.filter(|secs| *secs > 0) {
        let _ = write!(msg, "\n⏭️ Next refresh is after {secs} seconds. ");
    }
    msg.push_str(" \n-->");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn annotation_with_refresh() {
        let msg = cache_annotation(Some(60), at(12, 30, 5));
        assert!(msg.starts_with("<!-- "));
        assert!(msg.ends_with(" \n-->"));
        assert!(msg.contains("Served from cache!"));
        assert!(msg.contains("Last updated: 2024-03-01 12:30:05."));
        assert!(msg.contains("Next refresh is after 60 seconds"));
    }

    #[test]
    fn annotation_without_refresh() {
        for policy in [None, Some(0)] {
            let msg = cache_annotation(policy, at(0, 0, 0));
            assert!(msg.contains("Last updated: 2024-03-01 00:00:00."));
            assert!(!msg.contains("Next refresh"));
        }
    }

    #[test]
    fn annotated_entry_keeps_original_markup_first() {
        let entry = CacheEntry::annotated(
            "<html></html>",
            RevalidateOptions::after(10),
            "a.com".into(),
            at(1, 2, 3),
        );
        assert!(entry.content.starts_with("<html></html><!-- "));
        assert!(entry.content.contains("Next refresh is after 10 seconds"));
        assert_eq!(entry.domain, "a.com");
        assert_eq!(entry.created_at, at(1, 2, 3));
    }

    #[test]
    fn staleness_follows_revalidate_window() {
        let created = at(10, 0, 0);
        let entry = CacheEntry::annotated("x", RevalidateOptions::after(60), "a.com".into(), created);

        assert!(!entry.is_stale(created));
        assert!(!entry.is_stale(created + Duration::seconds(60)));
        assert!(entry.is_stale(created + Duration::seconds(61)));
    }

    #[test]
    fn never_stale_without_policy() {
        let created = at(10, 0, 0);
        for options in [RevalidateOptions::never(), RevalidateOptions::after(0)] {
            let entry = CacheEntry::annotated("x", options, "a.com".into(), created);
            assert!(!entry.is_stale(created + Duration::days(365)));
        }
    }

    #[test]
    fn huge_window_does_not_overflow() {
        let created = at(10, 0, 0);
        let entry =
            CacheEntry::annotated("x", RevalidateOptions::after(u64::MAX), "a.com".into(), created);
        assert!(!entry.is_stale(created + Duration::days(10_000)));
    }
}
