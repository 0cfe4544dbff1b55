use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::http::BUFFER_SIZE;
use crate::telemetry::event_log::EventLog;

/// How long one poll cycle waits for traffic before looping again. A quiet
/// tunnel is not torn down; only peer close or an error ends the relay.
pub const IDLE_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Full-duplex byte relay between a client and an origin, used for CONNECT.
///
/// Reads from whichever side is ready and writes the whole chunk to the
/// other (short writes are completed before reading again). A read of zero
/// marks that side closed; a failed write marks the destination side
/// closed; a read error counts as termination by the peer. Returns the byte
/// totals relayed client→server and server→client.
pub async fn relay<C, S>(client: &mut C, server: &mut S, id: &str, events: &EventLog) -> (u64, u64)
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut client_buf = vec![0u8; BUFFER_SIZE];
    let mut server_buf = vec![0u8; BUFFER_SIZE];
    let mut client_closed = false;
    let mut server_closed = false;
    let (mut from_client, mut from_server) = (0u64, 0u64);

    while !client_closed && !server_closed {
        enum Event {
            Client(std::io::Result<usize>),
            Server(std::io::Result<usize>),
            Idle,
        }

        let event = tokio::select! {
            res = client.read(&mut client_buf) => Event::Client(res),
            res = server.read(&mut server_buf) => Event::Server(res),
            _ = tokio::time::sleep(IDLE_POLL_TIMEOUT) => Event::Idle,
        };

        match event {
            Event::Client(Ok(0)) => client_closed = true,
            Event::Client(Ok(n)) => {
                if server.write_all(&client_buf[..n]).await.is_err() {
                    server_closed = true;
                } else {
                    from_client += n as u64;
                }
            }
            Event::Client(Err(e)) => {
                debug!("tunnel read from client failed: {}", e);
                events.log(id, "NOTE Tunnel connection terminated by peer");
                break;
            }
            Event::Server(Ok(0)) => server_closed = true,
            Event::Server(Ok(n)) => {
                if client.write_all(&server_buf[..n]).await.is_err() {
                    client_closed = true;
                } else {
                    from_server += n as u64;
                }
            }
            Event::Server(Err(e)) => {
                debug!("tunnel read from server failed: {}", e);
                events.log(id, "NOTE Tunnel connection terminated by peer");
                break;
            }
            Event::Idle => continue,
        }
    }

    (from_client, from_server)
}
