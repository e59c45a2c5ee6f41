use crate::config::RuntimeSettings;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderName, Method, Request, StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use isr_cache::RevalidateOptions;
use std::time::Duration;
use thiserror::Error;

pub type HttpClient = Client<HttpConnector, Body>;

/// A page produced by the renderer.
#[derive(Clone, Debug)]
pub struct RenderedPage {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to build upstream request: {0}")]
    Request(#[from] axum::http::Error),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
    #[error("failed to read upstream response body: {0}")]
    Body(#[from] hyper::Error),
    #[error("upstream render timed out after {0:?}")]
    Timeout(Duration),
}

/// Produces the markup for a page. Rendering itself happens elsewhere; this
/// is the seam the pipeline calls on a miss or a regeneration.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        host: &str,
        path_and_query: &str,
        headers: &HeaderMap,
    ) -> Result<RenderedPage, RenderError>;
}

/// Renders by forwarding `GET` requests to an upstream SSR server, keeping
/// the original `Host` so the upstream can pick the site.
pub struct UpstreamRenderer {
    client: HttpClient,
    upstream_url: String,
    timeout: Duration,
}

impl UpstreamRenderer {
    pub fn new(upstream_url: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            upstream_url: upstream_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn fetch(&self, request: Request<Body>) -> Result<RenderedPage, RenderError> {
        let response = self.client.request(request).await?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(RenderedPage {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

#[async_trait]
impl Renderer for UpstreamRenderer {
    async fn render(
        &self,
        host: &str,
        path_and_query: &str,
        headers: &HeaderMap,
    ) -> Result<RenderedPage, RenderError> {
        let uri = format!("{}{}", self.upstream_url, path_and_query);

        let mut builder = Request::builder().method(Method::GET).uri(&uri);
        for (key, value) in shareable_headers(headers).iter() {
            builder = builder.header(key, value);
        }
        let request = builder
            .header(HOST, host)
            .header("x-forwarded-host", host)
            .body(Body::empty())?;

        tracing::debug!(upstream = %uri, host, "rendering via upstream");

        tokio::time::timeout(self.timeout, self.fetch(request))
            .await
            .map_err(|_| RenderError::Timeout(self.timeout))?
    }
}

/// Headers that must not be forwarded between hops.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    )
}

/// Request headers that make a render user-specific or change its encoding.
pub fn is_private_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "cookie" | "authorization" | "proxy-authorization" | "accept-encoding"
    )
}

/// Client headers that may reach a render whose result is shared across
/// every visitor of the domain.
pub fn shareable_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(key, _)| **key != HOST && !is_hop_by_hop(key) && !is_private_header(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Parse Cache-Control header to determine cacheability and refresh interval.
pub fn parse_cache_control(value: &str) -> CacheControl {
    let mut result = CacheControl {
        cacheable: true,
        max_age: None,
    };

    let mut shared_max_age = None;
    for directive in value.split(',').map(|s| s.trim().to_lowercase()) {
        if directive == "no-store" || directive == "no-cache" || directive == "private" {
            result.cacheable = false;
        }
        if let Some(age) = directive.strip_prefix("max-age=") {
            if let Ok(secs) = age.trim().parse::<u64>() {
                result.max_age = Some(secs);
            }
        }
        if let Some(age) = directive.strip_prefix("s-maxage=") {
            if let Ok(secs) = age.trim().parse::<u64>() {
                shared_max_age = Some(secs);
            }
        }
    }

    // s-maxage takes precedence for shared caches
    if shared_max_age.is_some() {
        result.max_age = shared_max_age;
    }

    result
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheControl {
    pub cacheable: bool,
    pub max_age: Option<u64>,
}

/// Decide whether a rendered page may be stored, and with which policy.
///
/// Only `200` HTML responses within the body limit whose Cache-Control does
/// not forbid shared caching are stored. `s-maxage`/`max-age` become the
/// refresh interval; otherwise the configured default applies.
pub fn cache_decision(page: &RenderedPage, settings: &RuntimeSettings) -> Option<RevalidateOptions> {
    if page.status != StatusCode::OK || page.body.len() > settings.max_body_size {
        return None;
    }

    if let Some(ct) = page.headers.get(CONTENT_TYPE) {
        let is_html = ct
            .to_str()
            .map(|v| v.to_ascii_lowercase().starts_with("text/html"))
            .unwrap_or(false);
        if !is_html {
            return None;
        }
    }

    let control = match page.headers.get(CACHE_CONTROL) {
        Some(cc) => match cc.to_str() {
            Ok(cc) => parse_cache_control(cc),
            Err(_) => return None,
        },
        None => CacheControl {
            cacheable: true,
            max_age: None,
        },
    };

    if !control.cacheable {
        return None;
    }

    Some(RevalidateOptions {
        revalidate_seconds: control.max_age.or(settings.default_revalidate_seconds),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            default_revalidate_seconds: Some(30),
            max_body_size: 64,
            secret_token: None,
        }
    }

    fn page(status: StatusCode, headers: &[(&'static str, &'static str)], body: &'static str) -> RenderedPage {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.insert(*k, HeaderValue::from_static(*v));
        }
        RenderedPage {
            status,
            headers: map,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn cache_control_directives() {
        assert_eq!(
            parse_cache_control("public, max-age=60"),
            CacheControl {
                cacheable: true,
                max_age: Some(60)
            }
        );
        assert_eq!(parse_cache_control("s-maxage=10, max-age=60").max_age, Some(10));
        assert_eq!(parse_cache_control("max-age=60, s-maxage=10").max_age, Some(10));
        assert!(!parse_cache_control("No-Store").cacheable);
        assert!(!parse_cache_control("private, max-age=5").cacheable);
        assert_eq!(parse_cache_control("max-age=soon").max_age, None);
    }

    #[test]
    fn default_revalidate_when_no_header() {
        let decision = cache_decision(&page(StatusCode::OK, &[], "<p/>"), &settings());
        assert_eq!(decision, Some(RevalidateOptions::after(30)));
    }

    #[test]
    fn header_overrides_default() {
        let p = page(
            StatusCode::OK,
            &[("content-type", "text/html; charset=utf-8"), ("cache-control", "max-age=5")],
            "<p/>",
        );
        assert_eq!(cache_decision(&p, &settings()), Some(RevalidateOptions::after(5)));
    }

    #[test]
    fn refuses_uncacheable_pages() {
        let s = settings();
        assert!(cache_decision(&page(StatusCode::NOT_FOUND, &[], "<p/>"), &s).is_none());
        assert!(cache_decision(&page(StatusCode::OK, &[("cache-control", "no-store")], "<p/>"), &s).is_none());
        assert!(cache_decision(&page(StatusCode::OK, &[("content-type", "application/json")], "{}"), &s).is_none());
        let big = "x".repeat(65);
        let p = RenderedPage {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(big),
        };
        assert!(cache_decision(&p, &s).is_none());
    }

    #[test]
    fn hop_by_hop_headers() {
        assert!(is_hop_by_hop(&HeaderName::from_static("transfer-encoding")));
        assert!(is_hop_by_hop(&HeaderName::from_static("connection")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("accept-language")));
    }

    #[test]
    fn shared_renders_drop_credentials_and_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("session=alice"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        headers.insert("accept-encoding", HeaderValue::from_static("gzip"));
        headers.insert("host", HeaderValue::from_static("a.com"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("accept-language", HeaderValue::from_static("de"));

        let kept = shareable_headers(&headers);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept["accept-language"], "de");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_an_error() {
        let renderer = UpstreamRenderer::new("http://127.0.0.1:1", Duration::from_millis(500));
        let result = renderer.render("a.com", "/", &HeaderMap::new()).await;
        assert!(matches!(
            result,
            Err(RenderError::Upstream(_)) | Err(RenderError::Timeout(_))
        ));
    }
}
