use std::collections::HashMap;

use chrono::Utc;

use crate::error::ProxyError;
use crate::http::parse_http_date;

/// A parsed origin response together with its cache-policy evaluation.
///
/// The struct is transient: the handler builds one from the bytes it has
/// already relayed to the client, reads the verdict (`is_no_store`,
/// `needs_validation`, `expire_time`), copies what it wants into a
/// `CacheEntry`, and drops it.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub raw: String,
    pub version: String,
    pub status_code: String,
    pub status_phrase: String,
    pub body: String,
    /// Header map, names case-sensitive as received; later values replace
    /// earlier ones.
    pub headers: HashMap<String, String>,

    /// `Content-Length` value, or -1 when absent or unparseable.
    pub content_length: i64,
    /// `Transfer-Encoding: chunked` present.
    pub is_chunked: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// `Date` header as epoch seconds; 0 when absent or unparseable.
    pub date: i64,
    /// Absolute expiry as epoch seconds; 0 means never set.
    pub expire_time: i64,
    /// `max-age` directive seconds, -1 when absent.
    pub max_age: i64,
    /// `s-maxage` directive seconds, -1 when absent.
    pub s_max_age: i64,

    pub is_private: bool,
    pub is_no_store: bool,
    pub is_no_cache: bool,
    pub is_must_revalidate: bool,
    pub is_fresh: bool,
    pub needs_validation: bool,
}

impl Response {
    /// Parses a raw response and evaluates freshness against the current
    /// wall clock.
    pub fn parse(raw: &str) -> Result<Response, ProxyError> {
        Self::parse_at(raw, Utc::now().timestamp())
    }

    /// Parses a raw response, evaluating freshness as of `now` (epoch
    /// seconds). The response must contain the `\r\n\r\n` header terminator.
    pub fn parse_at(raw: &str, now: i64) -> Result<Response, ProxyError> {
        let body_pos = raw.find("\r\n\r\n").ok_or(ProxyError::InvalidResponse)?;
        let head = &raw[..body_pos];

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');

        let mut resp = Response {
            raw: raw.to_string(),
            version: parts.next().unwrap_or_default().to_string(),
            status_code: parts.next().unwrap_or_default().to_string(),
            status_phrase: parts.next().unwrap_or_default().to_string(),
            body: raw[body_pos + 4..].to_string(),
            content_length: -1,
            max_age: -1,
            s_max_age: -1,
            is_fresh: true,
            needs_validation: true,
            ..Response::default()
        };

        for line in lines {
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(": ") else {
                continue;
            };
            resp.headers.insert(name.to_string(), value.to_string());

            match name {
                "Content-Length" => {
                    resp.content_length = value.trim().parse().unwrap_or(-1);
                }
                "ETag" => resp.etag = Some(value.to_string()),
                "Cache-Control" => resp.process_cache_control(value),
                "Transfer-Encoding" if value == "chunked" => resp.is_chunked = true,
                "Date" => resp.date = parse_http_date(value),
                "Last-Modified" => {
                    resp.last_modified = Some(value.to_string());
                    // Initial hint; the freshness pass below recomputes it.
                    resp.needs_validation = true;
                }
                "Expires" => resp.expire_time = parse_http_date(value),
                _ => {}
            }
        }

        resp.manage_cache_time(now);
        resp.validate_freshness();
        Ok(resp)
    }

    /// Sets the directive flags and ages from a `Cache-Control` value.
    /// Directives are recognized by substring, numeric values by the longest
    /// digit run after the `=`.
    fn process_cache_control(&mut self, cache_control: &str) {
        self.is_private = cache_control.contains("private");
        self.is_no_store = cache_control.contains("no-store");
        self.is_no_cache = cache_control.contains("no-cache");
        self.is_must_revalidate = cache_control.contains("must-revalidate");

        if let Some(pos) = cache_control.find("s-maxage=") {
            self.s_max_age = parse_leading_int(&cache_control[pos + "s-maxage=".len()..]);
        }
        if let Some(pos) = cache_control.find("max-age=") {
            self.max_age = parse_leading_int(&cache_control[pos + "max-age=".len()..]);
        }
    }

    /// Computes the expiry instant and freshness.
    ///
    /// Precedence: `s-maxage`, then `max-age`, then `Expires`. A directive
    /// that is present with value 0 means already stale. With none of the
    /// three, the response counts as fresh and the expiry stays unset.
    fn manage_cache_time(&mut self, now: i64) {
        let age = now - self.date;
        if self.s_max_age >= 0 {
            self.expire_time = self.date + self.s_max_age;
            self.is_fresh = self.s_max_age > age;
        } else if self.max_age >= 0 {
            self.expire_time = self.date + self.max_age;
            self.is_fresh = self.max_age > age;
        } else if self.expire_time > 0 {
            self.is_fresh = self.expire_time > now;
        } else {
            self.is_fresh = true;
        }
    }

    /// A stale response needs validation; a fresh one still does when the
    /// origin said `must-revalidate` or `no-cache`.
    fn validate_freshness(&mut self) {
        self.needs_validation = !self.is_fresh;
        if !self.needs_validation {
            if let Some(cc) = self.headers.get("Cache-Control") {
                if cc.contains("must-revalidate") || cc.contains("no-cache") {
                    self.needs_validation = true;
                }
            }
        }
    }

    /// Header lookup by exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Parses the leading decimal digits of `s`, -1 if there are none.
fn parse_leading_int(s: &str) -> i64 {
    let digits: &str = &s[..s.bytes().take_while(|b| b.is_ascii_digit()).count()];
    digits.parse().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_date(epoch: i64) -> String {
        chrono::DateTime::from_timestamp(epoch, 0)
            .expect("valid epoch")
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }

    fn raw_with(now: i64, extra_headers: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nDate: {}\r\n{}Content-Length: 2\r\n\r\nhi",
            http_date(now),
            extra_headers
        )
    }

    #[test]
    fn test_status_line_and_body_split() {
        let now = 1_700_000_000;
        let resp = Response::parse_at(&raw_with(now, ""), now).unwrap();
        assert_eq!(resp.version, "HTTP/1.1");
        assert_eq!(resp.status_code, "200");
        assert_eq!(resp.status_phrase, "OK");
        assert_eq!(resp.body, "hi");
        assert_eq!(resp.content_length, 2);
        assert_eq!(resp.date, now);
    }

    #[test]
    fn test_missing_terminator_is_invalid() {
        assert!(Response::parse_at("HTTP/1.1 200 OK\r\nDate: x\r\n", 0).is_err());
    }

    #[test]
    fn test_max_age_makes_fresh_until_expiry() {
        let now = 1_700_000_000;
        let raw = raw_with(now, "Cache-Control: max-age=60\r\n");
        let resp = Response::parse_at(&raw, now).unwrap();
        assert!(resp.is_fresh);
        assert!(!resp.needs_validation);
        assert_eq!(resp.expire_time, now + 60);

        let later = Response::parse_at(&raw, now + 61).unwrap();
        assert!(!later.is_fresh);
        assert!(later.needs_validation);
    }

    #[test]
    fn test_max_age_zero_is_stale() {
        let now = 1_700_000_000;
        let resp =
            Response::parse_at(&raw_with(now, "Cache-Control: max-age=0\r\n"), now).unwrap();
        assert!(!resp.is_fresh);
        assert!(resp.needs_validation);
    }

    #[test]
    fn test_s_maxage_overrides_max_age() {
        let now = 1_700_000_000;
        let raw = raw_with(now, "Cache-Control: max-age=10, s-maxage=100\r\n");
        let resp = Response::parse_at(&raw, now + 50).unwrap();
        // With only max-age=10 this would be stale; s-maxage=100 wins.
        assert!(resp.is_fresh);
        assert_eq!(resp.expire_time, now + 100);
    }

    #[test]
    fn test_no_cache_forces_validation_even_when_fresh() {
        let now = 1_700_000_000;
        let resp = Response::parse_at(
            &raw_with(now, "Cache-Control: max-age=60, no-cache\r\n"),
            now,
        )
        .unwrap();
        assert!(resp.is_fresh);
        assert!(resp.needs_validation);
        assert!(resp.is_no_cache);
    }

    #[test]
    fn test_must_revalidate_forces_validation_even_when_fresh() {
        let now = 1_700_000_000;
        let resp = Response::parse_at(
            &raw_with(now, "Cache-Control: max-age=60, must-revalidate\r\n"),
            now,
        )
        .unwrap();
        assert!(resp.is_fresh);
        assert!(resp.needs_validation);
        assert!(resp.is_must_revalidate);
    }

    #[test]
    fn test_expires_header_fallback() {
        let now = 1_700_000_000;
        let raw = format!(
            "HTTP/1.1 200 OK\r\nDate: {}\r\nExpires: {}\r\n\r\nhi",
            http_date(now),
            http_date(now + 30)
        );
        let resp = Response::parse_at(&raw, now).unwrap();
        assert!(resp.is_fresh);
        assert_eq!(resp.expire_time, now + 30);

        let later = Response::parse_at(&raw, now + 31).unwrap();
        assert!(!later.is_fresh);
    }

    #[test]
    fn test_no_directives_defaults_to_fresh() {
        let now = 1_700_000_000;
        let resp = Response::parse_at(&raw_with(now, ""), now).unwrap();
        assert!(resp.is_fresh);
        assert!(!resp.needs_validation);
        assert_eq!(resp.expire_time, 0);
    }

    #[test]
    fn test_no_store_flag() {
        let now = 1_700_000_000;
        let resp =
            Response::parse_at(&raw_with(now, "Cache-Control: no-store\r\n"), now).unwrap();
        assert!(resp.is_no_store);
    }

    #[test]
    fn test_unparseable_date_is_epoch() {
        let resp =
            Response::parse_at("HTTP/1.1 200 OK\r\nDate: not a date\r\n\r\n", 100).unwrap();
        assert_eq!(resp.date, 0);
    }

    #[test]
    fn test_chunked_flag() {
        let resp = Response::parse_at(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
            100,
        )
        .unwrap();
        assert!(resp.is_chunked);
        assert_eq!(resp.content_length, -1);
    }

    #[test]
    fn test_etag_and_last_modified_captured() {
        let now = 1_700_000_000;
        let raw = raw_with(
            now,
            "ETag: \"abc123\"\r\nLast-Modified: Tue, 15 Nov 1994 08:12:31 GMT\r\n",
        );
        let resp = Response::parse_at(&raw, now).unwrap();
        assert_eq!(resp.etag.as_deref(), Some("\"abc123\""));
        assert_eq!(
            resp.last_modified.as_deref(),
            Some("Tue, 15 Nov 1994 08:12:31 GMT")
        );
        // Fresh-by-default wins over the Last-Modified hint.
        assert!(!resp.needs_validation);
    }
}
