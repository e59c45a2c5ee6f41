mod admin;
mod config;
mod invalidate;
mod pipeline;
mod render;
mod telemetry;

use admin::{admin_router, AdminState};
use clap::Parser;
use config::{Config, RuntimeSettings};
use isr_cache::{CacheHandler, InMemoryCacheHandler};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use pipeline::{page_router, AppState};
use render::UpstreamRenderer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Multi-domain ISR server in front of an SSR renderer.
#[derive(Parser)]
#[command(name = "isr-server")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, env = "ISR_CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();

    // Load config
    let config = if args.config.exists() {
        match Config::load(&args.config) {
            Ok(c) => {
                tracing::info!(path = %args.config.display(), "loaded config");
                c
            }
            Err(e) => {
                tracing::error!(error = %e, path = %args.config.display(), "failed to load config");
                std::process::exit(1);
            }
        }
    } else {
        tracing::info!(path = %args.config.display(), "no config file found, using defaults");
        Config::default_config()
    };

    // Install Prometheus metrics recorder
    let prometheus = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to install prometheus recorder");
            std::process::exit(1);
        }
    };
    telemetry::describe();

    // The domain set is read once here and never changes afterwards
    let cache: Arc<dyn CacheHandler> = match InMemoryCacheHandler::new(&config.cache.domains) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            tracing::error!(error = %e, "failed to build cache partitions");
            std::process::exit(1);
        }
    };

    let renderer = Arc::new(UpstreamRenderer::new(
        &config.upstream.url,
        Duration::from_millis(config.upstream.timeout_ms),
    ));

    let state = Arc::new(AppState::new(
        cache,
        renderer,
        RuntimeSettings::from_config(&config),
        &config.server.public_scheme,
    ));

    if state.settings.load().secret_token.is_none() {
        tracing::warn!("no invalidation secret configured, /api/invalidate is disabled");
    }

    // Shutdown token for graceful shutdown
    let shutdown = CancellationToken::new();

    let page_router = page_router(Arc::clone(&state));
    let admin_router = admin_router(AdminState {
        app: Arc::clone(&state),
        prometheus,
        start_time: std::time::Instant::now(),
    });

    let listen_addr = config.server.listen_addr.clone();
    let admin_addr = config.server.admin_addr.clone();

    tracing::info!(
        listen = %listen_addr,
        admin = %admin_addr,
        upstream = %config.upstream.url,
        scheme = %config.server.public_scheme,
        domains = ?config.cache.domains,
        default_revalidate = ?config.cache.default_revalidate_seconds,
        "isr server starting"
    );

    let page_listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %listen_addr, "failed to bind page listener");
            std::process::exit(1);
        }
    };
    let admin_listener = match tokio::net::TcpListener::bind(&admin_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %admin_addr, "failed to bind admin listener");
            std::process::exit(1);
        }
    };

    // Spawn config file watcher
    spawn_config_watcher(args.config.clone(), config, Arc::clone(&state));

    // Spawn shutdown signal handler
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(shutdown_clone).await;
    });

    let page_future = axum::serve(page_listener, page_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let admin_future = axum::serve(admin_listener, admin_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    tokio::select! {
        result = page_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "page server error");
            }
        }
        result = admin_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "admin server error");
            }
        }
    }

    tracing::info!("isr server shut down");
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections...");
    token.cancel();
}

/// Watch the config file and apply safe changes at runtime.
fn spawn_config_watcher(config_path: PathBuf, initial_config: Config, state: Arc<AppState>) {
    let current_config = Arc::new(Mutex::new(initial_config));

    let config_path_clone = config_path.clone();
    let mut watcher = match notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                match Config::load(&config_path_clone) {
                    Ok(new_config) => {
                        let mut old = current_config.lock();
                        config::diff_and_apply(&old, &new_config, &state.settings);
                        *old = new_config;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to reload config, keeping previous");
                    }
                }
            }
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "failed to start config watcher");
            return;
        }
    };

    if let Err(e) = watcher.watch(&config_path, RecursiveMode::NonRecursive) {
        tracing::warn!(error = %e, path = %config_path.display(), "failed to watch config file");
        return;
    }

    // Leak the watcher so it lives for the process lifetime
    std::mem::forget(watcher);
    tracing::info!("config file watcher started");
}
