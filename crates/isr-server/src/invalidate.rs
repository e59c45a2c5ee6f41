use crate::pipeline::{parse_host, regenerate, AppState};
use crate::render::RenderError;
use crate::telemetry;
use axum::extract::{Query, State};
use axum::http::header::HOST;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use isr_cache::{resolve_domain, CacheError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use url::{Position, Url};

#[derive(Debug, Deserialize)]
pub struct InvalidateQuery {
    pub secret: Option<String>,
    /// Absolute URL, or a path resolved against the request `Host`.
    pub url: Option<String>,
    #[serde(default)]
    pub regenerate: bool,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateDomainQuery {
    pub secret: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub url: String,
    pub invalidated: bool,
    pub regenerated: bool,
}

#[derive(Debug, Serialize)]
pub struct InvalidateDomainResponse {
    pub domain: String,
    pub invalidated: usize,
}

#[derive(Debug, Error)]
pub enum InvalidateError {
    #[error("invalidation is disabled: no secret token configured")]
    Disabled,
    #[error("invalid secret token")]
    Unauthorized,
    #[error("missing query parameter {0:?}")]
    MissingParam(&'static str),
    #[error("a relative url needs a valid Host header")]
    MissingHost,
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("regeneration failed: {0}")]
    Render(#[from] RenderError),
}

impl InvalidateError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            InvalidateError::Disabled => (StatusCode::FORBIDDEN, "disabled"),
            InvalidateError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            InvalidateError::MissingParam(_) | InvalidateError::MissingHost => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            InvalidateError::Cache(CacheError::MalformedUrl { .. }) => {
                (StatusCode::BAD_REQUEST, "malformed_url")
            }
            InvalidateError::Cache(CacheError::UnknownDomain { .. }) => {
                (StatusCode::NOT_FOUND, "unknown_domain")
            }
            InvalidateError::Cache(CacheError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            InvalidateError::Render(_) => (StatusCode::BAD_GATEWAY, "render_error"),
        }
    }
}

impl IntoResponse for InvalidateError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "invalidation failed");
        } else {
            tracing::debug!(error = %self, "invalidation rejected");
        }
        let body = serde_json::json!({
            "error": { "code": code, "message": self.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

/// GET /api/invalidate?secret=..&url=..[&regenerate=true]
pub async fn invalidate_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<InvalidateQuery>,
) -> Result<Json<InvalidateResponse>, InvalidateError> {
    authorize(&state, query.secret.as_deref())?;

    let raw = query
        .url
        .filter(|u| !u.is_empty())
        .ok_or(InvalidateError::MissingParam("url"))?;
    let target = resolve_target(&state, &headers, &raw)?;

    let invalidated = state.cache.delete(&target.key).await?;
    if invalidated {
        telemetry::record_invalidations(&resolve_domain(&target.key)?, 1);
    }

    let regenerated = if query.regenerate {
        regenerate(&state, &target.key, &target.host, &target.path_and_query).await?
    } else {
        false
    };

    tracing::info!(url = %target.key, invalidated, regenerated, "invalidation request served");

    Ok(Json(InvalidateResponse {
        url: target.key,
        invalidated,
        regenerated,
    }))
}

/// GET /api/invalidate-domain?secret=..&domain=..
pub async fn invalidate_domain_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InvalidateDomainQuery>,
) -> Result<Json<InvalidateDomainResponse>, InvalidateError> {
    authorize(&state, query.secret.as_deref())?;

    let domain = query
        .domain
        .filter(|d| !d.is_empty())
        .ok_or(InvalidateError::MissingParam("domain"))?;
    let invalidated = state.cache.invalidate_domain(&domain).await?;
    telemetry::record_invalidations(&domain, invalidated as u64);

    Ok(Json(InvalidateDomainResponse {
        domain,
        invalidated,
    }))
}

fn authorize(state: &AppState, presented: Option<&str>) -> Result<(), InvalidateError> {
    let settings = state.settings.load();
    let Some(expected) = settings.secret_token.as_deref() else {
        return Err(InvalidateError::Disabled);
    };
    let presented = presented.unwrap_or_default();
    if bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
        Ok(())
    } else {
        Err(InvalidateError::Unauthorized)
    }
}

struct Target {
    key: String,
    host: String,
    path_and_query: String,
}

/// Turn the `url` parameter into the exact cache key plus what a re-render
/// needs. Absolute URLs are used verbatim as the key.
fn resolve_target(state: &AppState, headers: &HeaderMap, raw: &str) -> Result<Target, InvalidateError> {
    if raw.starts_with('/') {
        let host = headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_host)
            .ok_or(InvalidateError::MissingHost)?;
        return Ok(Target {
            key: state.cache_key(&host, raw),
            host,
            path_and_query: raw.to_string(),
        });
    }

    let parsed = Url::parse(raw).map_err(|_| CacheError::MalformedUrl {
        url: raw.to_string(),
    })?;
    let host = parsed[Position::BeforeHost..Position::AfterPort].to_string();
    if host.is_empty() {
        return Err(CacheError::MalformedUrl {
            url: raw.to_string(),
        }
        .into());
    }
    Ok(Target {
        key: raw.to_string(),
        host,
        path_and_query: parsed[Position::BeforePath..Position::AfterQuery].to_string(),
    })
}
