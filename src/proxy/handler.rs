use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use chrono::{TimeZone, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::cache::{Cache, CacheEntry};
use crate::error::ProxyError;
use crate::http::{header_end, Request, Response, BUFFER_SIZE, CRLF};
use crate::net::Dial;
use crate::telemetry::event_log::EventLog;

use super::tunnel;

/// Headers copied into a cache entry when present on the response.
const CACHED_HEADERS: [&str; 7] = [
    "Content-Type",
    "Content-Length",
    "ETag",
    "Last-Modified",
    "Expires",
    "Cache-Control",
    "Date",
];

/// Pause after serving a cache hit so the kernel drains the body before the
/// connection is torn down.
const CACHE_SERVE_DRAIN: Duration = Duration::from_millis(50);

/// The per-connection state machine.
///
/// Reads the request once, parses it, dispatches on the method, and leaves
/// teardown (half-close plus linger) to the caller. Expected failures are
/// turned into synthesized status responses here; only a panic escapes.
pub async fn handle_connection<D: Dial>(
    client: &mut TcpStream,
    peer: SocketAddr,
    id: &str,
    cache: &Cache,
    events: &EventLog,
    dialer: &D,
) {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let n = match client.read(&mut buf).await {
        Ok(0) => {
            events.log(id, "Client closed connection");
            return;
        }
        Ok(n) => n,
        Err(e) => {
            debug!("read from client failed: {}", e);
            events.log(id, "ERROR Failed to read from client");
            return;
        }
    };

    let request = match Request::parse(&buf[..n]) {
        Ok(r) => r,
        Err(_) => {
            events.log(id, "ERROR Invalid request format");
            send_error_response(client, 400, "Bad Request", id, events).await;
            return;
        }
    };

    events.log(
        id,
        format!(
            "\"{}\" from {} @ {}",
            request.line,
            peer.ip(),
            current_time_str()
        ),
    );

    let outcome = match request.method.as_str() {
        "GET" => process_get(client, &request, id, cache, events, dialer).await,
        "POST" => {
            events.log(id, "NOTE Processing POST request");
            forward(client, &request, id, cache, events, dialer).await
        }
        "CONNECT" => process_connect(client, &request, id, events, dialer).await,
        other => Err(ProxyError::UnsupportedMethod(other.to_string())),
    };

    if let Err(err) = outcome {
        respond_with_error(client, &err, id, events).await;
        events.log(id, "ERROR Request handling failed");
    }
}

/// GET path: serve from cache when the entry is still fresh, otherwise
/// fall through to a forwarded fetch.
async fn process_get<D: Dial>(
    client: &mut TcpStream,
    request: &Request,
    id: &str,
    cache: &Cache,
    events: &EventLog,
    dialer: &D,
) -> Result<(), ProxyError> {
    let key = request.cache_key();

    let Some(entry) = cache.get(&key) else {
        events.log(id, "not in cache");
        return forward(client, request, id, cache, events, dialer).await;
    };

    if entry.is_expired() {
        events.log(
            id,
            format!(
                "in cache, but expired at {}",
                gmt_time_str(entry.expires_time.unwrap_or(0))
            ),
        );
        // Revalidation candidates are noted but still refetched
        // unconditionally; no If-None-Match/If-Modified-Since is sent.
        if entry.etag.is_some() || entry.last_modified.is_some() {
            events.log(id, "in cache, requires validation");
        }
        return forward(client, request, id, cache, events, dialer).await;
    }

    events.log(id, "in cache, valid");
    events.log(id, format!("Responding \"{}\"", entry.response_line));

    let mut head = String::new();
    head.push_str(&entry.response_line);
    head.push_str(CRLF);
    for (name, value) in &entry.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str(CRLF);
    }
    head.push_str(CRLF);

    client
        .write_all(head.as_bytes())
        .await
        .map_err(|e| client_err("Failed to send cache response headers", e))?;

    if !entry.body.is_empty() {
        client
            .write_all(&entry.body)
            .await
            .map_err(|e| client_err("Failed to send cache response body", e))?;
        tokio::time::sleep(CACHE_SERVE_DRAIN).await;
    }

    debug!("served {} cached bytes for {}", entry.body.len(), key);
    Ok(())
}

/// Forwards the raw request to the origin and streams the response back,
/// accumulating a copy for the cache when the response qualifies.
async fn forward<D: Dial>(
    client: &mut TcpStream,
    request: &Request,
    id: &str,
    cache: &Cache,
    events: &EventLog,
    dialer: &D,
) -> Result<(), ProxyError> {
    let (host, port) = (request.host.as_str(), request.port.as_str());
    if host.is_empty() {
        return Err(ProxyError::EmptyHost);
    }

    events.log(id, format!("Requesting \"{}\" from {}", request.line, host));

    let mut origin = dialer
        .connect(host, port)
        .await
        .map_err(|e| ProxyError::Connect {
            host: host.to_string(),
            port: port.to_string(),
            source: e,
        })?;

    origin
        .write_all(&request.raw)
        .await
        .map_err(ProxyError::UpstreamSend)?;

    events.log(id, "NOTE Beginning to receive response from origin server");

    // Accumulate until the header terminator shows up or the origin stops.
    let mut acc = BytesMut::with_capacity(BUFFER_SIZE);
    let mut chunk = vec![0u8; BUFFER_SIZE];
    loop {
        match origin.read(&mut chunk).await {
            Ok(0) => {
                events.log(id, "NOTE Origin server closed connection during header read");
                break;
            }
            Ok(n) => {
                acc.extend_from_slice(&chunk[..n]);
                if header_end(&acc).is_some() {
                    break;
                }
            }
            Err(e) => {
                events.log(id, format!("ERROR Failed to read from origin server: {e}"));
                break;
            }
        }
    }

    if acc.is_empty() {
        return Err(ProxyError::EmptyUpstreamResponse);
    }

    let head_str = String::from_utf8_lossy(&acc).to_string();
    let response_line = head_str
        .split(CRLF)
        .next()
        .unwrap_or_default()
        .to_string();
    events.log(id, format!("Received \"{response_line}\" from {host}"));

    // A 200 OK answer to a GET is the only thing the cache will take.
    let is_cacheable = request.method == "GET" && head_str.starts_with("HTTP/1.1 200");

    client
        .write_all(&acc)
        .await
        .map_err(|e| client_err("Failed to forward response to client", e))?;

    // Framing facts, scraped from the accumulated header bytes.
    let content_length = scrape_content_length(&head_str);
    let is_chunked = head_str.contains("Transfer-Encoding: chunked");

    let head_len = header_end(&acc);
    let mut body_received = head_len.map_or(0, |pos| acc.len() - (pos + 4));
    let mut cache_body: Vec<u8> = match head_len {
        Some(pos) if is_cacheable => acc[pos + 4..].to_vec(),
        _ => Vec::new(),
    };

    // Rolling tail across reads so a chunked terminator split between two
    // reads is still recognized.
    let mut tail = TailWindow::default();
    tail.push(&acc);

    loop {
        if content_length > 0 && !is_chunked && body_received >= content_length {
            break;
        }
        if is_chunked && tail.is_chunk_terminator() {
            break;
        }
        match origin.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                client
                    .write_all(&chunk[..n])
                    .await
                    .map_err(|e| client_err("Failed to forward response body to client", e))?;
                if is_cacheable {
                    cache_body.extend_from_slice(&chunk[..n]);
                }
                body_received += n;
                tail.push(&chunk[..n]);
            }
        }
    }

    if is_cacheable {
        match Response::parse(&head_str) {
            Err(e) => {
                events.log(id, format!("WARNING Failed to process response for caching: {e}"));
            }
            Ok(response) => {
                if response.is_no_store {
                    events.log(id, "not cacheable because Cache-Control: no-store");
                } else {
                    let headers = CACHED_HEADERS
                        .iter()
                        .filter_map(|&name| {
                            response
                                .header(name)
                                .map(|v| (name.to_string(), v.to_string()))
                        })
                        .collect();
                    let entry = CacheEntry {
                        response_line: response_line.clone(),
                        headers,
                        body: cache_body,
                        creation_time: Utc::now().timestamp(),
                        expires_time: (response.expire_time > 0).then_some(response.expire_time),
                        requires_validation: response.needs_validation,
                        etag: response.etag.clone(),
                        last_modified: response.last_modified.clone(),
                    };
                    cache.put(request.cache_key(), entry);

                    if response.needs_validation {
                        events.log(id, "cached, but requires re-validation");
                    } else if response.expire_time > 0 {
                        events.log(
                            id,
                            format!("cached, expires at {}", gmt_time_str(response.expire_time)),
                        );
                    }
                }
            }
        }
    }

    events.log(id, format!("Responding \"{response_line}\""));
    Ok(())
}

/// CONNECT path: dial the target, acknowledge with 200, then hand both
/// sockets to the relay until either side closes.
async fn process_connect<D: Dial>(
    client: &mut TcpStream,
    request: &Request,
    id: &str,
    events: &EventLog,
    dialer: &D,
) -> Result<(), ProxyError> {
    let (host, port) = (request.host.as_str(), request.port.as_str());
    events.log(id, format!("NOTE Processing CONNECT to {host}:{port}"));
    events.log(id, format!("Requesting \"{}\" from {}", request.line, host));

    let mut origin = dialer
        .connect(host, port)
        .await
        .map_err(|e| ProxyError::Connect {
            host: host.to_string(),
            port: port.to_string(),
            source: e,
        })?;

    events.log(id, "Responding \"HTTP/1.1 200 Connection Established\"");
    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await
        .map_err(|e| client_err("Failed to send 200 OK for CONNECT", e))?;

    events.log(id, "NOTE Tunnel established, beginning data transfer");
    // Small packets should pass through promptly.
    if let Err(e) = client.set_nodelay(true) {
        debug!("set_nodelay on client failed: {}", e);
    }

    let (from_client, from_server) = tunnel::relay(client, &mut origin, id, events).await;
    debug!(
        "tunnel relayed {} bytes from client, {} bytes from origin",
        from_client, from_server
    );
    events.log(id, "Tunnel closed");
    Ok(())
}

/// Maps an expected failure to its log line and synthesized status.
async fn respond_with_error(
    client: &mut TcpStream,
    err: &ProxyError,
    id: &str,
    events: &EventLog,
) {
    match err {
        ProxyError::UnsupportedMethod(m) => {
            events.log(id, format!("WARNING Unsupported method: {m}"));
            send_error_response(client, 501, "Not Implemented", id, events).await;
        }
        ProxyError::EmptyHost => {
            events.log(id, "ERROR Empty hostname in request");
            send_error_response(client, 400, "Bad Request", id, events).await;
        }
        ProxyError::Connect { host, port, .. } => {
            events.log(id, format!("ERROR Failed to connect to {host}:{port}"));
            send_error_response(client, 502, "Bad Gateway", id, events).await;
        }
        ProxyError::UpstreamSend(_) => {
            events.log(id, "ERROR Failed to send request to origin server");
            send_error_response(client, 502, "Bad Gateway", id, events).await;
        }
        ProxyError::EmptyUpstreamResponse => {
            events.log(id, "ERROR No response from origin server");
            send_error_response(client, 502, "Bad Gateway", id, events).await;
        }
        ProxyError::Client { context, .. } => {
            // The client socket is gone; nothing can be sent.
            events.log(id, format!("ERROR {context}"));
        }
        other => {
            events.log(id, format!("ERROR Exception: {other}"));
            send_error_response(client, 500, "Internal Server Error", id, events).await;
        }
    }
}

/// Synthesizes a one-line error response and logs the status line.
pub(crate) async fn send_error_response(
    client: &mut TcpStream,
    status_code: u16,
    message: &str,
    id: &str,
    events: &EventLog,
) {
    let status_line = format!("HTTP/1.1 {status_code} {message}");
    events.log(id, format!("Responding \"{status_line}\""));
    let response = format!(
        "{status_line}\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nError: {message}"
    );
    if let Err(e) = client.write_all(response.as_bytes()).await {
        debug!("failed to send {} response: {}", status_code, e);
    }
}

fn client_err(context: &'static str, source: std::io::Error) -> ProxyError {
    ProxyError::Client { context, source }
}

/// Pulls `Content-Length: N` out of the raw header text; 0 when absent or
/// unparseable.
fn scrape_content_length(head: &str) -> usize {
    let Some(pos) = head.find("Content-Length: ") else {
        return 0;
    };
    let rest = &head[pos + "Content-Length: ".len()..];
    let end = rest.find(CRLF).unwrap_or(rest.len());
    rest[..end].trim().parse().unwrap_or(0)
}

/// Current UTC time in asctime form, e.g. `Sun Jun 20 23:21:05 1993`.
fn current_time_str() -> String {
    Utc::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

/// The same form for an absolute epoch instant, used by the cache log lines.
fn gmt_time_str(epoch: i64) -> String {
    match Utc.timestamp_opt(epoch, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%a %b %e %H:%M:%S %Y").to_string(),
        _ => epoch.to_string(),
    }
}

/// Rolling window over the last five bytes of the origin byte stream, used
/// to spot the `0\r\n\r\n` chunked terminator.
#[derive(Default)]
struct TailWindow {
    buf: [u8; 5],
    len: usize,
}

impl TailWindow {
    fn push(&mut self, data: &[u8]) {
        if data.len() >= 5 {
            self.buf.copy_from_slice(&data[data.len() - 5..]);
            self.len = 5;
            return;
        }
        for &b in data {
            if self.len < 5 {
                self.buf[self.len] = b;
                self.len += 1;
            } else {
                self.buf.rotate_left(1);
                self.buf[4] = b;
            }
        }
    }

    fn is_chunk_terminator(&self) -> bool {
        self.len == 5 && &self.buf == b"0\r\n\r\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_window_single_read() {
        let mut tail = TailWindow::default();
        tail.push(b"4\r\nbody\r\n0\r\n\r\n");
        assert!(tail.is_chunk_terminator());
    }

    #[test]
    fn test_tail_window_terminator_split_across_reads() {
        let mut tail = TailWindow::default();
        tail.push(b"4\r\nbody\r\n0\r");
        assert!(!tail.is_chunk_terminator());
        tail.push(b"\n\r\n");
        assert!(tail.is_chunk_terminator());
    }

    #[test]
    fn test_tail_window_byte_at_a_time() {
        let mut tail = TailWindow::default();
        for &b in b"0\r\n\r\n" {
            tail.push(&[b]);
        }
        assert!(tail.is_chunk_terminator());
    }

    #[test]
    fn test_tail_window_short_stream_is_not_terminator() {
        let mut tail = TailWindow::default();
        tail.push(b"0\r\n");
        assert!(!tail.is_chunk_terminator());
    }

    #[test]
    fn test_scrape_content_length() {
        let head = "HTTP/1.1 200 OK\r\nContent-Length: 42\r\n\r\n";
        assert_eq!(scrape_content_length(head), 42);
        assert_eq!(scrape_content_length("HTTP/1.1 200 OK\r\n\r\n"), 0);
        assert_eq!(
            scrape_content_length("HTTP/1.1 200 OK\r\nContent-Length: zap\r\n\r\n"),
            0
        );
    }
}
