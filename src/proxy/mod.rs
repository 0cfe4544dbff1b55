use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

pub mod handler;
pub mod tunnel;

use crate::cache::Cache;
use crate::net::Dial;
use crate::telemetry::event_log::EventLog;

/// Linger after half-closing the client socket, letting queued bytes drain
/// before the stream drops and the fd closes.
const CLOSE_LINGER: Duration = Duration::from_millis(300);

/// Runs the accept loop until `shutdown` fires.
///
/// Every accepted connection gets a fresh UUID and its own task running the
/// full per-connection state machine. An accept error is logged and the
/// loop keeps going; one bad accept never brings down the acceptor.
pub async fn start_proxy<D: Dial>(
    listener: TcpListener,
    cache: Arc<Cache>,
    events: EventLog,
    dialer: Arc<D>,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(s) => s,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        events.server("ERROR Failed to accept connection");
                        continue;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("Proxy shutting down gracefully — no new connections accepted.");
                break;
            }
        };

        debug!("Accepted connection from {}", peer);
        let id = Uuid::new_v4().to_string();
        let cache = Arc::clone(&cache);
        let events = events.clone();
        let dialer = Arc::clone(&dialer);

        tokio::spawn(async move {
            run_connection(stream, peer, id, cache, events, dialer).await;
        });
    }
}

/// One connection, top to bottom: the state machine, then half-close and a
/// short linger. A panic out of the handler is caught here so a single
/// connection cannot take down its worker; the client gets a best-effort
/// 500 before teardown.
async fn run_connection<D: Dial>(
    mut client: TcpStream,
    peer: SocketAddr,
    id: String,
    cache: Arc<Cache>,
    events: EventLog,
    dialer: Arc<D>,
) {
    let outcome = std::panic::AssertUnwindSafe(handler::handle_connection(
        &mut client,
        peer,
        &id,
        &cache,
        &events,
        dialer.as_ref(),
    ))
    .catch_unwind()
    .await;

    if let Err(panic) = outcome {
        events.log(
            &id,
            format!("ERROR Exception: {}", panic_message(panic.as_ref())),
        );
        handler::send_error_response(&mut client, 500, "Internal Server Error", &id, &events).await;
    }

    let _ = client.shutdown().await;
    tokio::time::sleep(CLOSE_LINGER).await;
    debug!("closed connection {}", id);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
