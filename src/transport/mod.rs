//! Transports: the collaborator that actually moves bytes.
//!
//! The fetch client is generic over [`Transport`], so any fetch-style function
//! can sit underneath it. [`HttpTransport`] is the bundled implementation: one
//! HTTP/1.1 `GET` per attempt over a fresh Tokio TCP connection.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use url::Host;

use crate::cancel::CancelReason;
use crate::http::response::{ResponseError, decode_chunked};
use crate::http::{Request, Response};

/// Errors produced by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid response: {0}")]
    Response(#[from] ResponseError),

    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("connection closed before the response was complete")]
    UnexpectedEof,

    #[error("aborted: {0}")]
    Aborted(CancelReason),
}

/// Boxed future returned by [`Transport::issue`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send + 'a>>;

/// A fetch-style function: issue one request, yield one response.
///
/// # Contract
///
/// - Any status code is a successful exchange; classifying `4xx`/`5xx` is the
///   caller's job.
/// - Implementations **should** observe [`Request::cancel`] and stop promptly
///   when it fires. The retry engine also drops the returned future when the
///   token fires, so a transport that ignores the token is still cut off at its
///   next await point.
pub trait Transport: Send + Sync {
    fn issue<'a>(&'a self, request: &'a Request) -> TransportFuture<'a>;
}

impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    fn issue<'a>(&'a self, request: &'a Request) -> TransportFuture<'a> {
        (**self).issue(request)
    }
}

/// Default cap on a buffered response, head plus body (8 MiB).
const MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Plain-text HTTP/1.1 transport over Tokio TCP streams.
///
/// Each attempt opens its own connection and sends `Connection: close`.
/// Bodies delimited by `Content-Length`, chunked transfer coding, or
/// connection close are supported. Only `http://` URLs are accepted.
///
/// # Examples
///
/// ```rust,no_run
/// use refetch::client::{FetchClient, RequestOptions};
/// use refetch::config::ClientConfig;
/// use refetch::transport::HttpTransport;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = FetchClient::new(HttpTransport::new(), ClientConfig::default())?;
///     let page = client
///         .request("http://localhost:3000/movies?_page=1", RequestOptions::new())
///         .await?;
///     println!("{} movies in total", page.total_count().unwrap_or(0));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    max_response_size: usize,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            max_response_size: MAX_RESPONSE_SIZE,
        }
    }

    /// Caps how many bytes of a single response are buffered.
    #[must_use]
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    async fn exchange(&self, request: &Request) -> Result<Response, TransportError> {
        let url = request.url();
        if url.scheme() != "http" {
            return Err(TransportError::UnsupportedScheme(url.scheme().to_owned()));
        }
        let host = url.host().ok_or(TransportError::MissingHost)?;
        let port = url.port_or_known_default().unwrap_or(80);

        // IP literals connect directly; `host_str` keeps the brackets of an
        // IPv6 literal, which would be looked up as a name.
        let connected = match &host {
            Host::Domain(domain) => TcpStream::connect((*domain, port)).await,
            Host::Ipv4(ip) => TcpStream::connect(SocketAddr::from((*ip, port))).await,
            Host::Ipv6(ip) => TcpStream::connect(SocketAddr::from((*ip, port))).await,
        };
        let mut stream = connected.map_err(|source| TransportError::Connect {
            addr: format!("{host}:{port}"),
            source,
        })?;

        stream.write_all(&request.to_bytes()).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

        loop {
            let bytes_read = stream.read_buf(&mut buf).await?;
            let eof = bytes_read == 0;

            if buf.len() > self.max_response_size {
                return Err(ResponseError::BodyTooLarge {
                    max_bytes: self.max_response_size,
                }
                .into());
            }

            let (head, body_offset) = match Response::parse_head(&buf) {
                Ok(pair) => pair,
                Err(ResponseError::Incomplete) if !eof => continue,
                Err(ResponseError::Incomplete) => return Err(TransportError::UnexpectedEof),
                Err(e) => return Err(e.into()),
            };

            if let Some(response) = self.complete(head, &buf[body_offset..], eof)? {
                debug!(
                    status = %response.status(),
                    bytes = response.body_bytes().len(),
                    "response received"
                );
                return Ok(response);
            }

            if eof {
                return Err(TransportError::UnexpectedEof);
            }
        }
    }

    /// Attaches the body once all of it is buffered; `None` means keep reading.
    fn complete(
        &self,
        head: Response,
        rest: &[u8],
        eof: bool,
    ) -> Result<Option<Response>, TransportError> {
        let status = head.status();
        if status.as_u16() < 200 || status.as_u16() == 204 || status.is_not_modified() {
            return Ok(Some(head));
        }

        if head.is_chunked() {
            let body = decode_chunked(rest, self.max_response_size)?;
            return Ok(body.map(|body| head.with_body(body)));
        }

        match head.content_length() {
            Some(length) if rest.len() >= length => {
                Ok(Some(head.with_body(Bytes::copy_from_slice(&rest[..length]))))
            }
            Some(_) => Ok(None),
            None if eof => Ok(Some(head.with_body(Bytes::copy_from_slice(rest)))),
            None => Ok(None),
        }
    }
}

impl Transport for HttpTransport {
    fn issue<'a>(&'a self, request: &'a Request) -> TransportFuture<'a> {
        Box::pin(async move {
            debug!(url = %request.url(), attempt = request.attempt(), "issuing request");
            tokio::select! {
                reason = request.cancel().cancelled() => Err(TransportError::Aborted(reason)),
                result = self.exchange(request) => result,
            }
        })
    }
}
