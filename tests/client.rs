//! End-to-end tests: `FetchClient` over `HttpTransport` against a local origin.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use refetch::cache::cache_key;
use refetch::{ClientConfig, FetchClient, FetchError, HttpTransport, RequestOptions};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Deserialize, PartialEq)]
struct Movie {
    id: u32,
    title: String,
}

const MOVIES: &str = r#"[{"id":1,"title":"Heat"},{"id":2,"title":"Ronin"}]"#;

/// A tiny origin: `/movies` supports `If-None-Match`, `/flaky` fails its first
/// request, `/missing` is always 404. Returns the base URL and a request counter.
async fn spawn_origin() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let n = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                while !buf.ends_with(b"\r\n\r\n") {
                    if stream.read_buf(&mut buf).await.unwrap() == 0 {
                        return;
                    }
                }
                let head = String::from_utf8_lossy(&buf).into_owned();
                let reply = respond(&head, n);
                stream.write_all(reply.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            });
        }
    });

    (base, hits)
}

fn respond(head: &str, n: usize) -> String {
    let path = head.split_whitespace().nth(1).unwrap_or("/");
    if path.starts_with("/movies") {
        if head.contains("If-None-Match: \"v1\"") {
            return "HTTP/1.1 304 Not Modified\r\nETag: \"v1\"\r\n\r\n".to_owned();
        }
        return format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/json\r\n\
             ETag: \"v1\"\r\n\
             X-Total-Count: 2\r\n\
             Content-Length: {}\r\n\r\n{MOVIES}",
            MOVIES.len()
        );
    }
    if path.starts_with("/flaky") && n == 0 {
        return "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n".to_owned();
    }
    if path.starts_with("/flaky") {
        let body = "2\r\nok\r\n0\r\n\r\n";
        return format!("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n{body}");
    }
    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_owned()
}

fn fast_config() -> ClientConfig {
    ClientConfig {
        ttl_ms: 100,
        base_backoff_ms: 10,
        max_jitter_ms: 5,
        timeout_ms: 2000,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn caches_then_revalidates_with_etag() {
    let (base, hits) = spawn_origin().await;
    let client = FetchClient::new(HttpTransport::new(), fast_config()).unwrap();
    let url = cache_key(&format!("{base}/movies"), &[("q", "heat"), ("_page", "1")]);

    let page = client.request(&url, RequestOptions::new()).await.unwrap();
    assert_eq!(page.total_count(), Some(2));
    let movies: Vec<Movie> = page.json().unwrap();
    assert_eq!(movies[0], Movie { id: 1, title: "Heat".to_owned() });

    // Within the TTL: no network.
    let again = client.request(&url, RequestOptions::new()).await.unwrap();
    assert_eq!(again, page);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // After it: a conditional request answered with 304.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let revalidated = client.request(&url, RequestOptions::new()).await.unwrap();
    assert_eq!(revalidated, page);
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    let stats = client.stats();
    assert_eq!(stats.served_from_cache, 1);
    assert_eq!(stats.revalidated, 1);
}

#[tokio::test]
async fn retries_a_server_error() {
    let (base, hits) = spawn_origin().await;
    let client = FetchClient::new(HttpTransport::new(), fast_config()).unwrap();

    let payload = client.request(&format!("{base}/flaky"), RequestOptions::new()).await.unwrap();
    assert_eq!(&payload.body()[..], b"ok");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(client.stats().retries, 1);
}

#[tokio::test]
async fn client_error_fails_fast() {
    let (base, hits) = spawn_origin().await;
    let client = FetchClient::new(HttpTransport::new(), fast_config()).unwrap();

    let err = client
        .request(&format!("{base}/missing"), RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::HttpClient { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refused_connection_exhausts_retries() {
    // Bind then drop to get a port nothing listens on.
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let client = FetchClient::new(HttpTransport::new(), fast_config()).unwrap();

    let err = client
        .request(&format!("http://{addr}/movies"), RequestOptions::new())
        .await
        .unwrap_err();
    match err {
        FetchError::ExhaustedRetries { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, FetchError::Network(_)));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
}

#[tokio::test]
async fn ipv6_origin() {
    let Ok(listener) = TcpListener::bind("[::1]:0").await else {
        return;
    };
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = BytesMut::new();
        while !buf.ends_with(b"\r\n\r\n") {
            if stream.read_buf(&mut buf).await.unwrap() == 0 {
                return;
            }
        }
        let head = String::from_utf8_lossy(&buf).into_owned();
        stream.write_all(respond(&head, 0).as_bytes()).await.unwrap();
        stream.shutdown().await.ok();
    });

    let client = FetchClient::new(HttpTransport::new(), fast_config()).unwrap();
    let page = client
        .request(&format!("http://{addr}/movies"), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(page.total_count(), Some(2));
}
