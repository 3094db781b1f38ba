//! Incoming HTTP/1.1 response, parsed with the [`httparse`] crate.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::headers::{CONTENT_LENGTH, ETAG, TRANSFER_ENCODING, X_TOTAL_COUNT};
use super::{Headers, StatusCode};

/// Errors that can occur while parsing an HTTP/1.1 response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("malformed chunked body")]
    InvalidChunk,

    #[error("response body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },
}

/// A response received from an origin.
///
/// The body is kept as raw bytes and decoded only when asked, via
/// [`json`](Self::json).
///
/// # Examples
///
/// ```
/// use refetch::http::{Response, StatusCode};
///
/// let raw = b"HTTP/1.1 200 OK\r\nETag: \"v1\"\r\nX-Total-Count: 42\r\nContent-Length: 2\r\n\r\n[]";
/// let (response, offset) = Response::parse_head(raw).unwrap();
/// let response = response.with_body(&raw[offset..]);
///
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.etag(), Some("\"v1\""));
/// assert_eq!(response.total_count(), Some(42));
/// assert_eq!(response.json::<Vec<u32>>().unwrap(), Vec::<u32>::new());
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Maximum number of headers we accept per response.
    const MAX_HEADERS: usize = 64;

    /// Creates a response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Appends a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Convenience for a body holding the given string, e.g. a JSON document.
    #[must_use]
    pub fn body(self, body: impl Into<String>) -> Self {
        self.with_body(body.into())
    }

    /// Parses the status line and headers from the start of `buf`.
    ///
    /// Returns the response (with an empty body) and the byte offset at which
    /// the body begins.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`]: more data is needed to complete the head.
    /// - [`ResponseError::Parse`]: the data is malformed.
    /// - [`ResponseError::MissingField`] / [`ResponseError::InvalidStatus`]: no usable
    ///   status code.
    pub fn parse_head(buf: &[u8]) -> Result<(Self, usize), ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Response::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let code = raw.code.ok_or(ResponseError::MissingField { field: "status" })?;
        let status = StatusCode::from_u16(code).ok_or(ResponseError::InvalidStatus(code))?;

        Ok((
            Self {
                status,
                headers: Headers::from_parsed(raw.headers),
                body: Bytes::new(),
            },
            body_offset,
        ))
    }

    /// Returns the response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw body bytes.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Consumes the response, returning its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Returns the `ETag` validator, if the origin sent one.
    pub fn etag(&self) -> Option<&str> {
        self.headers.get(ETAG).filter(|tag| !tag.is_empty())
    }

    /// Returns `X-Total-Count` parsed as an integer, if present and well-formed.
    pub fn total_count(&self) -> Option<u64> {
        self.headers.get(X_TOTAL_COUNT)?.trim().parse().ok()
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get(CONTENT_LENGTH)?.trim().parse().ok()
    }

    /// Returns `true` if the body uses chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all(TRANSFER_ENCODING)
            .flat_map(|value| value.split(','))
            .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Decodes a complete chunked body from `buf`.
///
/// Returns `Ok(None)` while the terminating zero-size chunk has not arrived.
/// Trailer fields are ignored.
pub(crate) fn decode_chunked(
    mut buf: &[u8],
    max_bytes: usize,
) -> Result<Option<Bytes>, ResponseError> {
    let mut body = BytesMut::new();

    loop {
        let (offset, size) = match httparse::parse_chunk_size(buf) {
            Ok(httparse::Status::Complete(pair)) => pair,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(_) => return Err(ResponseError::InvalidChunk),
        };
        let size = usize::try_from(size).map_err(|_| ResponseError::BodyTooLarge { max_bytes })?;

        if size == 0 {
            return Ok(Some(body.freeze()));
        }
        if body.len().saturating_add(size) > max_bytes {
            return Err(ResponseError::BodyTooLarge { max_bytes });
        }

        let chunk_end = offset + size;
        if buf.len() < chunk_end + 2 {
            return Ok(None);
        }
        if &buf[chunk_end..chunk_end + 2] != b"\r\n" {
            return Err(ResponseError::InvalidChunk);
        }

        body.put(&buf[offset..chunk_end]);
        buf = &buf[chunk_end + 2..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_not_modified() {
        let raw = b"HTTP/1.1 304 Not Modified\r\nETag: \"v1\"\r\n\r\n";
        let (resp, offset) = Response::parse_head(raw).unwrap();
        assert!(resp.status().is_not_modified());
        assert_eq!(resp.etag(), Some("\"v1\""));
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn incomplete_head() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Le";
        assert!(matches!(Response::parse_head(raw), Err(ResponseError::Incomplete)));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let raw = b"SSH-2.0-OpenSSH_9.6\r\n\r\n";
        assert!(matches!(Response::parse_head(raw), Err(ResponseError::Parse(_))));
    }

    #[test]
    fn malformed_total_count_ignored() {
        let resp = Response::new(StatusCode::OK).header("X-Total-Count", "many");
        assert_eq!(resp.total_count(), None);
    }

    #[test]
    fn chunked_detection() {
        let resp = Response::new(StatusCode::OK).header("Transfer-Encoding", "gzip, chunked");
        assert!(resp.is_chunked());
        assert!(!Response::new(StatusCode::OK).is_chunked());
    }

    #[test]
    fn chunked_body() {
        let raw = b"4\r\n[1,2\r\n2\r\n,3\r\n1\r\n]\r\n0\r\n\r\n";
        let body = decode_chunked(raw, 1024).unwrap().unwrap();
        assert_eq!(&body[..], b"[1,2,3]");
    }

    #[test]
    fn chunked_body_partial() {
        let raw = b"4\r\n[1,2\r\n2\r\n,3";
        assert!(decode_chunked(raw, 1024).unwrap().is_none());
    }

    #[test]
    fn chunked_body_too_large() {
        let raw = b"8\r\n01234567\r\n0\r\n\r\n";
        assert!(matches!(
            decode_chunked(raw, 4),
            Err(ResponseError::BodyTooLarge { max_bytes: 4 })
        ));
    }

    #[test]
    fn json_body() {
        let resp = Response::new(StatusCode::OK).body(r#"{"title":"Heat"}"#);
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["title"], "Heat");
    }
}
