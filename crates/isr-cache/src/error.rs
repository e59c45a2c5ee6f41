use thiserror::Error;

/// Errors surfaced by cache operations. None of them are retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The input is not an absolute URL with a hostname.
    #[error("malformed URL {url:?}: expected an absolute URL with a host")]
    MalformedUrl { url: String },

    /// The URL's hostname has no partition.
    #[error("unknown domain {domain:?}: no cache partition registered")]
    UnknownDomain { domain: String },

    /// No entry for this URL in its domain's partition.
    #[error("{url:?} does not exist in cache")]
    NotFound { url: String },
}

pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    pub(crate) fn malformed(url: &str) -> Self {
        CacheError::MalformedUrl {
            url: url.to_string(),
        }
    }

    pub(crate) fn unknown_domain(domain: &str) -> Self {
        CacheError::UnknownDomain {
            domain: domain.to_string(),
        }
    }

    pub(crate) fn not_found(url: &str) -> Self {
        CacheError::NotFound {
            url: url.to_string(),
        }
    }

    /// True for errors that only mean "no cached copy available".
    pub fn is_cache_miss(&self) -> bool {
        matches!(
            self,
            CacheError::NotFound { .. } | CacheError::UnknownDomain { .. }
        )
    }
}
