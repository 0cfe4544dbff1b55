pub mod parser;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the proxy.
///
/// Loaded from a small directive file before the Tokio runtime is built so
/// the worker-thread count can be applied to the runtime itself.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProxyConfig {
    /// TCP port the proxy listens on.
    pub listen_port: u16,
    /// Length of the pending-connection queue on the listening socket.
    pub backlog: u32,
    /// Maximum number of responses held by the in-memory cache.
    pub cache_capacity: usize,
    /// Number of OS threads for the Tokio runtime (the worker pool).
    pub worker_threads: usize,
    /// Path of the per-request event log file.
    pub event_log_path: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_port: 12345,
            backlog: 10,
            cache_capacity: 1000,
            worker_threads: default_worker_threads(),
            event_log_path: "logs/proxy.log".to_string(),
        }
    }
}

/// Default worker-pool size: `max(8, 2 × available_parallelism)`.
pub fn default_worker_threads() -> usize {
    let hw = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    std::cmp::max(8, 2 * hw)
}

/// Reads and parses the configuration file at `path`.
///
/// A missing file is not an error: the defaults are used and a warning is
/// emitted. A file that exists but does not parse is rejected with a message
/// naming the offending directive.
pub fn load_config(path: &str) -> Result<ProxyConfig, String> {
    match std::fs::read_to_string(path) {
        Ok(text) => parser::parse_config(&text),
        Err(e) => {
            tracing::warn!(
                "Config file {} not readable ({}); using built-in defaults",
                path,
                e
            );
            Ok(ProxyConfig::default())
        }
    }
}
