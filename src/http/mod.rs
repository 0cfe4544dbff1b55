pub mod request;
pub mod response;

pub use request::Request;
pub use response::Response;

/// Size of every socket read buffer in the proxy.
pub const BUFFER_SIZE: usize = 8192;

pub(crate) const CRLF: &str = "\r\n";
pub(crate) const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Position of the `\r\n\r\n` header terminator in `buf`, if present.
pub(crate) fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Parses an RFC 1123 HTTP date (`Tue, 15 Nov 1994 08:12:31 GMT`) into epoch
/// seconds. Unparseable dates are treated as 0, the epoch itself.
pub(crate) fn parse_http_date(value: &str) -> i64 {
    chrono::DateTime::parse_from_rfc2822(value)
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}
