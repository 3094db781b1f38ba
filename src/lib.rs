//! # refetch
//!
//! An async fetch client for read-mostly JSON APIs: bounded retries with
//! exponential backoff and jitter, a TTL cache with ETag revalidation, and
//! automatic cancellation of superseded requests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use refetch::{ClientConfig, FetchClient, HttpTransport, RequestOptions};
//!
//! #[derive(serde::Deserialize)]
//! struct Movie {
//!     title: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FetchClient::new(HttpTransport::new(), ClientConfig::default())?;
//!     let movies: Vec<Movie> = client
//!         .request_json("http://localhost:3000/movies?q=heat", RequestOptions::new())
//!         .await?;
//!     for movie in movies {
//!         println!("{}", movie.title);
//!     }
//!     Ok(())
//! }
//! ```

// ── Building blocks ───────────────────────────────────────────────────────────
pub mod cache;
pub mod cancel;
pub mod http;
pub mod retry;
pub mod transport;

// ── Client surface ────────────────────────────────────────────────────────────
pub mod client;
pub mod config;
pub mod error;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cancel::{CancelReason, CancelToken};
pub use client::{FetchClient, Outcome, Payload, RequestOptions, StatsSnapshot};
pub use config::{ClientConfig, ConfigError};
pub use error::FetchError;
pub use transport::{HttpTransport, Transport, TransportError};
