use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use palisade::cache::Cache;
use palisade::{config, net, proxy, telemetry};

/// The main entry point for the Palisade caching proxy.
/// We use a standard synchronous `main` function here instead of
/// `#[tokio::main]` because we need to parse the configuration file *before*
/// building the async runtime to determine how many worker threads the
/// runtime should use.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize Telemetry (Logging)
    telemetry::init_telemetry();

    // 2. Load Configuration (Synchronous)
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "palisade.conf".to_string());
    let cfg = config::load_config(&config_path)?;

    tracing::info!(
        "Starting caching proxy with {} worker threads... (Config: {})",
        cfg.worker_threads,
        config_path
    );

    // 3. Build Tokio Runtime
    // The number of OS threads is the proxy's worker pool.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.worker_threads)
        .enable_all()
        .build()?;

    // 4. Start the Async Application Block
    rt.block_on(async {
        // --- Graceful Shutdown ---
        // A CancellationToken propagates the shutdown signal to the acceptor.
        let shutdown_token = CancellationToken::new();

        let shutdown_token_signal = shutdown_token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received — initiating graceful shutdown...");
            shutdown_token_signal.cancel();
        });

        // Event Log: one serialized line per request event.
        let events = telemetry::event_log::EventLog::new(&cfg.event_log_path);
        events.server("NOTE Proxy server started");
        events.server(format!(
            "NOTE Thread pool created with {} threads",
            cfg.worker_threads
        ));

        // Response Cache: shared by every connection task.
        let cache = Arc::new(Cache::new(cfg.cache_capacity));

        let listener = net::bind_listener(cfg.listen_port, cfg.backlog)?;
        tracing::info!("Proxy listening on 0.0.0.0:{}", cfg.listen_port);

        proxy::start_proxy(
            listener,
            cache,
            events,
            Arc::new(net::TcpDialer),
            shutdown_token,
        )
        .await;

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}

/// Resolves when either Ctrl+C or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
