use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::debug;

/// Creates the listening socket: IPv4, all interfaces, `SO_REUSEADDR` set.
pub fn bind_listener(port: u16, backlog: u32) -> io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from(([0, 0, 0, 0], port)))?;
    socket.listen(backlog)
}

/// Capability for opening upstream connections.
///
/// Every call site goes through this seam instead of dialing directly, so
/// tests can substitute a dialer that routes to a local mock origin or
/// fails on demand.
pub trait Dial: Send + Sync + 'static {
    /// Connects to `host:port`, resolving the hostname as part of the dial.
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: &'a str,
    ) -> Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send + 'a>>;
}

/// Production dialer over the OS resolver and a plain TCP connect.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dial for TcpDialer {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: &'a str,
    ) -> Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send + 'a>> {
        Box::pin(async move {
            let stream = TcpStream::connect(format!("{host}:{port}")).await?;
            debug!("connected upstream to {}:{}", host, port);
            Ok(stream)
        })
    }
}
