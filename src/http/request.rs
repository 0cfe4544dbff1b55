use std::collections::HashMap;

use crate::error::ProxyError;
use crate::http::header_end;

/// A parsed client request.
///
/// The original bytes are kept untouched: forwarding sends them to the
/// origin verbatim, so the parse only has to pull out what the handler needs
/// for routing and cache keying.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// The raw bytes exactly as received from the client.
    pub raw: Vec<u8>,
    /// Reconstructed first line, e.g. `GET /index.html HTTP/1.1`.
    pub line: String,
    /// HTTP method as received.
    pub method: String,
    /// Request-target as received.
    pub uri: String,
    /// Hostname from the `Host` header (port stripped). For CONNECT, from
    /// the request-target.
    pub host: String,
    /// Port from the `Host` header suffix, defaulting to `80`. For CONNECT,
    /// from the request-target `host:port`.
    pub port: String,
    /// Header map, names case-sensitive as received. A repeated header
    /// keeps the later value.
    pub headers: HashMap<String, String>,
    /// Bytes after the `\r\n\r\n` terminator; may be empty.
    pub body: Vec<u8>,
}

impl Request {
    /// Parses a raw request buffer containing at least the request head.
    pub fn parse(raw: &[u8]) -> Result<Request, ProxyError> {
        let (head_bytes, body) = match header_end(raw) {
            Some(pos) => (&raw[..pos], raw[pos + 4..].to_vec()),
            None => (raw, Vec::new()),
        };
        let head = std::str::from_utf8(head_bytes).map_err(|_| ProxyError::InvalidRequest)?;

        let mut lines = head.split("\r\n");
        let first = lines.next().ok_or(ProxyError::InvalidRequest)?;

        // The request line is exactly three space-separated parts.
        let mut parts = first.split(' ');
        let method = parts.next().filter(|s| !s.is_empty());
        let uri = parts.next().filter(|s| !s.is_empty());
        let version = parts.next().filter(|s| s.starts_with("HTTP/"));
        let (Some(method), Some(uri), Some(version), None) =
            (method, uri, version, parts.next())
        else {
            return Err(ProxyError::InvalidRequest);
        };

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(": ") {
                headers.insert(name.to_string(), value.to_string());
            }
        }

        // Host is mandatory for GET/POST; the port rides on its suffix.
        let mut host = String::new();
        let mut port = "80".to_string();
        match headers.get("Host") {
            Some(value) => match value.split_once(':') {
                Some((h, p)) => {
                    host = h.to_string();
                    port = p.to_string();
                }
                None => host = value.clone(),
            },
            None if method == "GET" || method == "POST" => {
                return Err(ProxyError::InvalidRequest);
            }
            None => {}
        }

        // CONNECT carries its destination in the request-target.
        if method == "CONNECT" {
            if let Some((h, p)) = uri.split_once(':') {
                host = h.to_string();
                port = p.to_string();
            }
        }

        Ok(Request {
            raw: raw.to_vec(),
            line: format!("{method} {uri} {version}"),
            method: method.to_string(),
            uri: uri.to_string(),
            host,
            port,
            headers,
            body,
        })
    }

    /// Header lookup by exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Cache key: raw `host + uri`, byte-exact, no normalization.
    pub fn cache_key(&self) -> String {
        format!("{}{}", self.host, self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_round_trip() {
        let raw = b"GET /a/b?q=1 HTTP/1.1\r\nHost: example.com:8080\r\nAccept: */*\r\n\r\n";
        let req = Request::parse(raw).expect("should parse");
        assert_eq!(req.method, "GET");
        assert_eq!(req.uri, "/a/b?q=1");
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, "8080");
        assert_eq!(req.line, "GET /a/b?q=1 HTTP/1.1");
        assert_eq!(req.header("Accept"), Some("*/*"));
        assert!(req.body.is_empty());
        assert_eq!(req.raw, raw);
    }

    #[test]
    fn test_port_defaults_to_80() {
        let req = Request::parse(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
        assert_eq!(req.port, "80");
    }

    #[test]
    fn test_post_body_preserved() {
        let raw = b"POST /submit HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn test_connect_target_overrides_host_header() {
        let raw = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.method, "CONNECT");
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, "443");
    }

    #[test]
    fn test_repeated_header_keeps_later_value() {
        let raw = b"GET / HTTP/1.1\r\nHost: h\r\nX-Tag: one\r\nX-Tag: two\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.header("X-Tag"), Some("two"));
    }

    #[test]
    fn test_malformed_request_line_fails() {
        assert!(Request::parse(b"HELLO WORLD\r\n\r\n").is_err());
        assert!(Request::parse(b"\r\n\r\n").is_err());
        assert!(Request::parse(b"GET / HTTP/1.1 extra\r\nHost: h\r\n\r\n").is_err());
    }

    #[test]
    fn test_missing_host_fails_for_get() {
        assert!(Request::parse(b"GET / HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn test_cache_key_is_host_plus_uri() {
        let req = Request::parse(b"GET /x HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
        assert_eq!(req.cache_key(), "example.com/x");
    }
}
