//! Error taxonomy of a logical fetch.
//!
//! [`FetchError`] separates failures the retry engine may retry
//! ([`Network`](FetchError::Network), [`Timeout`](FetchError::Timeout),
//! [`HttpServer`](FetchError::HttpServer)) from terminal ones
//! ([`HttpClient`](FetchError::HttpClient), [`Cancelled`](FetchError::Cancelled)).
//! Once retries run out the last retryable error is wrapped in
//! [`ExhaustedRetries`](FetchError::ExhaustedRetries).

use std::time::Duration;

use thiserror::Error;

use crate::cancel::CancelReason;
use crate::config::ConfigError;
use crate::http::StatusCode;
use crate::transport::TransportError;

/// Errors produced by a fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] TransportError),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("client error: HTTP {status}")]
    HttpClient { status: StatusCode },

    #[error("server error: HTTP {status}")]
    HttpServer { status: StatusCode },

    #[error("unexpected response: HTTP {status}")]
    UnexpectedStatus { status: StatusCode },

    #[error("request {0}")]
    Cancelled(CancelReason),

    #[error("origin answered 304 Not Modified but no cached entry exists")]
    NotModifiedWithoutEntry,

    #[error("giving up after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    #[error("invalid request options: {0}")]
    InvalidOptions(#[from] ConfigError),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Maps a non-successful status to its error. `2xx` and `304` map to `None`.
    pub(crate) fn from_status(status: StatusCode) -> Option<Self> {
        if status.is_success() || status.is_not_modified() {
            None
        } else if status.is_client_error() {
            Some(Self::HttpClient { status })
        } else if status.is_server_error() {
            Some(Self::HttpServer { status })
        } else {
            Some(Self::UnexpectedStatus { status })
        }
    }

    /// Returns `true` if another attempt may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Timeout(_)
                | Self::HttpServer { .. }
                | Self::NotModifiedWithoutEntry
        )
    }

    /// Returns `true` for a caller or supersession cancellation.
    ///
    /// Consumers render nothing for these: newer state is already on its way.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the HTTP status behind this error, looking through
    /// [`ExhaustedRetries`](Self::ExhaustedRetries).
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpClient { status }
            | Self::HttpServer { status }
            | Self::UnexpectedStatus { status } => Some(*status),
            Self::ExhaustedRetries { last, .. } => last.status(),
            _ => None,
        }
    }
}
