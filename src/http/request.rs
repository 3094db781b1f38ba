//! Outgoing request: the context of one attempt of a logical fetch.

use bytes::{BufMut, BytesMut};
use url::Url;

use super::Headers;
use super::headers::{CONNECTION, HOST, USER_AGENT};
use crate::cancel::CancelToken;

const DEFAULT_USER_AGENT: &str = concat!("refetch/", env!("CARGO_PKG_VERSION"));

/// A single `GET` attempt handed to a [`Transport`](crate::transport::Transport).
///
/// Besides the target and headers it carries the 1-based attempt number and
/// the merged cancellation token the transport must observe.
///
/// # Examples
///
/// ```
/// use refetch::cancel::CancelToken;
/// use refetch::http::Request;
///
/// let url = "http://localhost:3000/movies?_page=2".parse().unwrap();
/// let request = Request::new(url, 1, CancelToken::new())
///     .header("If-None-Match", "\"v1\"");
///
/// let head = request.to_bytes();
/// let text = std::str::from_utf8(&head).unwrap();
/// assert!(text.starts_with("GET /movies?_page=2 HTTP/1.1\r\n"));
/// assert!(text.contains("Host: localhost:3000\r\n"));
/// assert!(text.ends_with("\r\n\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    url: Url,
    headers: Headers,
    attempt: u32,
    cancel: CancelToken,
}

impl Request {
    /// Creates an attempt for `url` with no headers of its own.
    pub fn new(url: Url, attempt: u32, cancel: CancelToken) -> Self {
        Self {
            url,
            headers: Headers::new(),
            attempt,
            cancel,
        }
    }

    /// Sets a request header, replacing earlier values of the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Copies every header from `headers`, replacing same-named ones.
    #[must_use]
    pub fn headers_from(mut self, headers: &Headers) -> Self {
        for (name, value) in headers.iter() {
            self.headers.set(name, value);
        }
        self
    }

    /// Returns the absolute URL of this attempt.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the caller-supplied headers, without the ones added on the wire.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// 1-based attempt number within the logical request.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Token that fires on caller cancellation, supersession, or attempt timeout.
    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// Returns the origin-form request target: path plus query string.
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_owned(),
        }
    }

    /// Returns the `Host` header value, including the port when it is not the scheme default.
    pub fn host(&self) -> Option<String> {
        let host = self.url.host_str()?;
        Some(match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        })
    }

    /// Serializes the request head in HTTP/1.1 wire format.
    ///
    /// Automatically adds `Host`, a `User-Agent` when none was set, and
    /// `Connection: close`; each attempt uses its own connection.
    ///
    /// Headers whose name is not a valid token are skipped, and CR/LF are
    /// stripped from values, so no caller input can start a new header line.
    pub fn to_bytes(&self) -> BytesMut {
        let mut headers = Headers::with_capacity(self.headers.len() + 3);
        if let Some(host) = self.host() {
            headers.insert(HOST, host);
        }
        if !self.headers.contains(USER_AGENT) {
            headers.insert(USER_AGENT, DEFAULT_USER_AGENT);
        }
        for (name, value) in self.headers.iter() {
            let reserved = name.eq_ignore_ascii_case(HOST) || name.eq_ignore_ascii_case(CONNECTION);
            if reserved || !is_token(name) {
                continue;
            }
            if value.contains(['\r', '\n']) {
                headers.insert(name, value.replace(['\r', '\n'], ""));
            } else {
                headers.insert(name, value);
            }
        }
        headers.insert(CONNECTION, "close");

        let head = format!("GET {} HTTP/1.1\r\n{headers}\r\n", self.target());
        let mut buf = BytesMut::with_capacity(head.len());
        buf.put(head.as_bytes());
        buf
    }
}

/// RFC 9110 `token`: the only characters allowed in a header name.
fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> Request {
        Request::new(url.parse().unwrap(), 1, CancelToken::new())
    }

    fn head(request: &Request) -> String {
        String::from_utf8(request.to_bytes().to_vec()).unwrap()
    }

    #[test]
    fn default_port_omitted_from_host() {
        let r = request("http://api.tvmaze.com/search/shows?q=girls");
        assert_eq!(r.host().as_deref(), Some("api.tvmaze.com"));
        assert_eq!(r.target(), "/search/shows?q=girls");
    }

    #[test]
    fn conditional_header_written() {
        let r = request("http://localhost:3000/movies").header("If-None-Match", "W/\"1a\"");
        let s = head(&r);
        assert!(s.contains("If-None-Match: W/\"1a\"\r\n"));
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn caller_cannot_override_connection() {
        let r = request("http://localhost/").header("Connection", "keep-alive");
        let s = head(&r);
        assert!(!s.contains("keep-alive"));
        assert_eq!(s.matches("Connection:").count(), 1);
    }

    #[test]
    fn custom_user_agent_kept() {
        let r = request("http://localhost/").header("User-Agent", "movies-ui");
        let s = head(&r);
        assert!(s.contains("User-Agent: movies-ui\r\n"));
        assert!(!s.contains("refetch/"));
    }

    #[test]
    fn line_breaks_cannot_inject_headers() {
        let r = request("http://localhost/")
            .header("X-Query", "heat\r\nX-Injected: 1")
            .header("X-Bad\r\nX-Injected", "1")
            .header("Accept", "application/json");
        let s = head(&r);
        assert!(s.contains("X-Query: heatX-Injected: 1\r\n"));
        assert!(!s.contains("\r\nX-Injected"));
        assert!(!s.contains("X-Bad"));
        assert!(s.contains("Accept: application/json\r\n"));
        assert!(s.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn token_names() {
        assert!(is_token("If-None-Match"));
        assert!(is_token("X_Total.Count"));
        assert!(!is_token(""));
        assert!(!is_token("Bad Name"));
        assert!(!is_token("Bad:Name"));
    }
}
