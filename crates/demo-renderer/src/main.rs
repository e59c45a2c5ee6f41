use axum::extract::Path;
use axum::http::header::{CACHE_CONTROL, HOST};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use rand::Rng;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn site(headers: &HeaderMap) -> String {
    headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn page(site: &str, title: &str) -> String {
    format!(
        "<!doctype html><html><head><title>{title} · {site}</title></head>\
         <body><h1>{title}</h1><p>Rendered for {site} at {}</p></body></html>",
        chrono::Utc::now().to_rfc3339()
    )
}

/// Simulate an expensive server-side render (20-80ms).
async fn render_delay() {
    let delay = rand::thread_rng().gen_range(20..=80);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

async fn home(headers: HeaderMap) -> impl IntoResponse {
    render_delay().await;
    ([(CACHE_CONTROL, "public, s-maxage=60")], Html(page(&site(&headers), "Home")))
}

async fn article(Path(slug): Path<String>, headers: HeaderMap) -> impl IntoResponse {
    render_delay().await;
    ([(CACHE_CONTROL, "public, s-maxage=10")], Html(page(&site(&headers), &slug)))
}

/// No Cache-Control: the server's default revalidate applies.
async fn about(headers: HeaderMap) -> Html<String> {
    render_delay().await;
    Html(page(&site(&headers), "About"))
}

async fn account(headers: HeaderMap) -> impl IntoResponse {
    ([(CACHE_CONTROL, "private, no-store")], Html(page(&site(&headers), "Account")))
}

async fn not_found(headers: HeaderMap) -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Html(page(&site(&headers), "Not found")))
}

async fn health() -> &'static str {
    "ok"
}

fn app() -> Router {
    Router::new()
        .route("/", get(home))
        .route("/about", get(about))
        .route("/account", get(account))
        .route("/articles/{slug}", get(article))
        .route("/health", get(health))
        .fallback(not_found)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("RENDERER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    tracing::info!(addr = %addr, "demo renderer starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app()).await.unwrap();
}
