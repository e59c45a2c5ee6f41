use crate::error::{CacheError, CacheResult};
use url::Url;

/// Map an absolute URL to its owning domain (the hostname, without port).
///
/// There is no scheme inference: `a.com/x` and `/x` are rejected, as are
/// absolute URLs that carry no host (`mailto:`, `data:`, `file:///`).
pub fn resolve_domain(url: &str) -> CacheResult<String> {
    let parsed = Url::parse(url).map_err(|_| CacheError::malformed(url))?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(CacheError::malformed(url)),
    }
}

/// Normalize a configured domain entry into the hostname used as partition key.
///
/// Accepts either an absolute base URL (`https://test1.com`) or a bare
/// hostname (`test1.com`, `Test1.com:8080`). Bare entries must not carry a
/// path, query, fragment or userinfo.
pub fn normalize_domain(entry: &str) -> CacheResult<String> {
    let trimmed = entry.trim();
    if trimmed.contains("://") {
        return resolve_domain(trimmed);
    }

    if trimmed.contains(['/', '?', '#', '@']) {
        return Err(CacheError::malformed(entry));
    }

    let probe = format!("http://{trimmed}/");
    let parsed = Url::parse(&probe).map_err(|_| CacheError::malformed(entry))?;
    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(CacheError::malformed(entry));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(CacheError::malformed(entry)),
    }
}
