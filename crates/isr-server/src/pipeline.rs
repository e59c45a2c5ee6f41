use crate::config::RuntimeSettings;
use crate::invalidate::{invalidate_domain_handler, invalidate_handler};
use crate::render::{cache_decision, is_hop_by_hop, shareable_headers, RenderedPage, Renderer};
use crate::telemetry;
use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::uri::Authority;
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode, Uri};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use isr_cache::{resolve_domain, CacheEntry, CacheError, CacheHandler};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Shared state passed to all handlers.
pub struct AppState {
    pub cache: Arc<dyn CacheHandler>,
    pub renderer: Arc<dyn Renderer>,
    pub settings: ArcSwap<RuntimeSettings>,
    pub public_scheme: String,
    /// URLs with a background regeneration in flight.
    regenerating: Mutex<HashSet<String>>,
}

impl AppState {
    pub fn new(
        cache: Arc<dyn CacheHandler>,
        renderer: Arc<dyn Renderer>,
        settings: RuntimeSettings,
        public_scheme: &str,
    ) -> Self {
        Self {
            cache,
            renderer,
            settings: ArcSwap::from_pointee(settings),
            public_scheme: public_scheme.to_string(),
            regenerating: Mutex::new(HashSet::new()),
        }
    }

    /// Cache key for a request: `<scheme>://<host><path?query>`.
    pub fn cache_key(&self, host: &str, path_and_query: &str) -> String {
        format!("{}://{}{}", self.public_scheme, host, path_and_query)
    }

    pub fn regenerations_in_flight(&self) -> usize {
        self.regenerating.lock().len()
    }
}

/// Marks a URL as regenerating until dropped.
pub struct RegenerationGuard {
    state: Arc<AppState>,
    key: String,
}

impl RegenerationGuard {
    /// `None` when a regeneration for `key` is already running.
    pub fn acquire(state: &Arc<AppState>, key: &str) -> Option<Self> {
        if !state.regenerating.lock().insert(key.to_string()) {
            return None;
        }
        Some(Self {
            state: Arc::clone(state),
            key: key.to_string(),
        })
    }
}

impl Drop for RegenerationGuard {
    fn drop(&mut self) {
        self.state.regenerating.lock().remove(&self.key);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// Router for the public port: pages plus the invalidation API.
pub fn page_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/invalidate", get(invalidate_handler))
        .route("/api/invalidate-domain", get(invalidate_domain_handler))
        .route("/{*path}", get(page_handler))
        .route("/", get(page_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve a page from cache, or render it and cache the result.
///
/// Stale entries are served immediately while a background render refreshes
/// them. Lookups that fail because the domain is not registered (or the key
/// is not a valid URL) bypass the cache entirely.
pub async fn page_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response<Body> {
    let start = Instant::now();

    let Some(host) = request_host(&uri, &headers) else {
        return plain_response(StatusCode::BAD_REQUEST, "missing or invalid Host header");
    };
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let key = state.cache_key(&host, &path_and_query);
    let domain = resolve_domain(&key).unwrap_or_default();

    let cacheable = match state.cache.get(&key).await {
        Ok(entry) => {
            let status = if entry.is_stale(Utc::now()) {
                telemetry::record_lookup(telemetry::CACHE_STALE, &domain);
                spawn_regeneration(&state, key.clone(), host, path_and_query);
                CacheStatus::Stale
            } else {
                telemetry::record_lookup(telemetry::CACHE_HITS, &domain);
                CacheStatus::Hit
            };

            tracing::debug!(
                key = %key,
                cache = status.as_str(),
                latency_us = start.elapsed().as_micros(),
                "served from cache"
            );
            return cached_response(&entry, status, state.cache.name());
        }
        Err(CacheError::NotFound { .. }) => {
            telemetry::record_lookup(telemetry::CACHE_MISSES, &domain);
            true
        }
        Err(e) => {
            telemetry::record_lookup(telemetry::CACHE_BYPASS, &domain);
            tracing::debug!(key = %key, error = %e, "bypassing cache");
            false
        }
    };

    let page = match state
        .renderer
        .render(&host, &path_and_query, &shareable_headers(&headers))
        .await
    {
        Ok(page) => page,
        Err(e) => {
            telemetry::record_render(&domain, false);
            tracing::error!(key = %key, error = %e, "render failed");
            return plain_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };
    telemetry::record_render(&domain, true);

    let status = if cacheable {
        let stored = store_page(&state, &key, &page).await;
        tracing::debug!(
            key = %key,
            status = page.status.as_u16(),
            cached = stored,
            latency_us = start.elapsed().as_micros(),
            "cache MISS → rendered"
        );
        CacheStatus::Miss
    } else {
        CacheStatus::Bypass
    };

    rendered_response(page, status, state.cache.name())
}

/// Render `key` again and store it when cacheable. Returns whether the cache
/// was updated.
pub async fn regenerate(
    state: &AppState,
    key: &str,
    host: &str,
    path_and_query: &str,
) -> Result<bool, crate::render::RenderError> {
    let domain = resolve_domain(key).unwrap_or_default();
    let page = match state
        .renderer
        .render(host, path_and_query, &HeaderMap::new())
        .await
    {
        Ok(page) => page,
        Err(e) => {
            telemetry::record_render(&domain, false);
            return Err(e);
        }
    };
    telemetry::record_render(&domain, true);
    Ok(store_page(state, key, &page).await)
}

fn spawn_regeneration(state: &Arc<AppState>, key: String, host: String, path_and_query: String) {
    let Some(guard) = RegenerationGuard::acquire(state, &key) else {
        tracing::debug!(key = %key, "regeneration already in flight");
        return;
    };

    let state = Arc::clone(state);
    tokio::spawn(async move {
        let _guard = guard;
        match regenerate(&state, &key, &host, &path_and_query).await {
            Ok(stored) => tracing::info!(key = %key, stored, "page regenerated"),
            Err(e) => tracing::warn!(key = %key, error = %e, "regeneration failed, keeping stale copy"),
        }
    });
}

async fn store_page(state: &AppState, key: &str, page: &RenderedPage) -> bool {
    let options = {
        let settings = state.settings.load();
        cache_decision(page, &settings)
    };
    let Some(options) = options else {
        return false;
    };
    let Ok(html) = std::str::from_utf8(&page.body) else {
        tracing::debug!(key, "rendered body is not UTF-8, not caching");
        return false;
    };

    match state.cache.add(key, html, options).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to store rendered page");
            false
        }
    }
}

fn request_host(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    match headers.get(HOST) {
        Some(value) => parse_host(value.to_str().ok()?),
        None => uri.authority().and_then(|a| parse_host(a.as_str())),
    }
}

/// Accept a `Host` value only as a bare `host[:port]` authority; anything
/// with a path, query, fragment or userinfo would forge another cache key.
pub(crate) fn parse_host(raw: &str) -> Option<String> {
    let authority: Authority = raw.parse().ok()?;
    if authority.as_str().contains('@') || authority.host().is_empty() {
        return None;
    }
    Some(authority.as_str().to_string())
}

fn cached_response(entry: &CacheEntry, status: CacheStatus, backend: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(entry.content.clone()));
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    add_cache_headers(headers, status, backend);
    response
}

fn rendered_response(page: RenderedPage, status: CacheStatus, backend: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(page.body));
    *response.status_mut() = page.status;

    let headers = response.headers_mut();
    for (key, value) in page.headers.iter() {
        if is_hop_by_hop(key) {
            continue;
        }
        headers.append(key, value.clone());
    }
    add_cache_headers(headers, status, backend);
    response
}

fn add_cache_headers(headers: &mut HeaderMap, status: CacheStatus, backend: &'static str) {
    headers.insert("x-cache", HeaderValue::from_static(status.as_str()));
    headers.insert("x-cache-backend", HeaderValue::from_static(backend));
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}
