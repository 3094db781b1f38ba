//! HTTP/1.1 client-side types.
//!
//! This module provides the primitives the fetch client and its transports
//! exchange: [`StatusCode`], [`Headers`], the outgoing [`Request`] and the
//! incoming [`Response`].

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;

/// An HTTP response status code.
///
/// Unlike a closed enum, any three-digit code an origin sends is representable;
/// the well-known ones are available as associated constants.
///
/// # Examples
///
/// ```
/// use refetch::http::StatusCode;
///
/// let status = StatusCode::OK;
/// assert_eq!(status.as_u16(), 200);
/// assert_eq!(status.canonical_reason(), Some("OK"));
/// assert!(status.is_success());
/// assert!(StatusCode::from_u16(599).is_some_and(|s| s.is_server_error()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: Self = Self(200);
    pub const CREATED: Self = Self(201);
    pub const NO_CONTENT: Self = Self(204);
    pub const NOT_MODIFIED: Self = Self(304);
    pub const BAD_REQUEST: Self = Self(400);
    pub const UNAUTHORIZED: Self = Self(401);
    pub const FORBIDDEN: Self = Self(403);
    pub const NOT_FOUND: Self = Self(404);
    pub const TOO_MANY_REQUESTS: Self = Self(429);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    pub const BAD_GATEWAY: Self = Self(502);
    pub const SERVICE_UNAVAILABLE: Self = Self(503);
    pub const GATEWAY_TIMEOUT: Self = Self(504);

    /// Builds a status code from its numeric value.
    ///
    /// Returns `None` outside the `100..=999` range httparse accepts.
    pub fn from_u16(code: u16) -> Option<Self> {
        (100..=999).contains(&code).then_some(Self(code))
    }

    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// `2xx`.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }

    /// `304 Not Modified`, the answer to a successful conditional request.
    pub fn is_not_modified(self) -> bool {
        self == Self::NOT_MODIFIED
    }

    /// `4xx`. Client errors are not transient and are never retried.
    pub fn is_client_error(self) -> bool {
        (400..500).contains(&self.0)
    }

    /// `5xx`.
    pub fn is_server_error(self) -> bool {
        (500..600).contains(&self.0)
    }

    /// Returns the canonical reason phrase for well-known codes.
    pub fn canonical_reason(self) -> Option<&'static str> {
        Some(match self.0 {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => return None,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_reason() {
            Some(reason) => write!(f, "{} {}", self.0, reason),
            None => write!(f, "{}", self.0),
        }
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert!(StatusCode::OK.is_success());
        assert!(StatusCode::NOT_MODIFIED.is_not_modified());
        assert!(!StatusCode::NOT_MODIFIED.is_success());
        assert!(StatusCode::NOT_FOUND.is_client_error());
        assert!(StatusCode::BAD_GATEWAY.is_server_error());
        assert!(!StatusCode::NOT_FOUND.is_server_error());
    }

    #[test]
    fn out_of_range() {
        assert_eq!(StatusCode::from_u16(42), None);
        assert_eq!(StatusCode::from_u16(1000), None);
    }

    #[test]
    fn display_unknown_code() {
        assert_eq!(StatusCode::OK.to_string(), "200 OK");
        assert_eq!(StatusCode::from_u16(418).map(|s| s.to_string()), Some("418".to_owned()));
    }
}
