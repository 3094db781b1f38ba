//! Type-ahead search against a json-server style API.
//!
//! Fires a search per "keystroke" without waiting; each new one supersedes the
//! last, so only the final query's results are printed. Then repeats it to show
//! the cache answering.
//!
//! ```text
//! npx json-server db.json --port 3000
//! RUST_LOG=refetch=debug cargo run --example movie_search -- http://localhost:3000/movies heat
//! ```

use std::sync::Arc;

use refetch::cache::cache_key;
use refetch::{ClientConfig, FetchClient, HttpTransport, Outcome, Payload, RequestOptions};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Movie {
    title: String,
    #[serde(default)]
    year: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("refetch=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let endpoint = args.next().unwrap_or_else(|| "http://localhost:3000/movies".to_owned());
    let query = args.next().unwrap_or_else(|| "heat".to_owned());

    let client = Arc::new(FetchClient::new(HttpTransport::new(), ClientConfig::default())?);

    let mut searches = Vec::new();
    let mut prefix = String::new();
    for ch in query.chars() {
        prefix.push(ch);
        let prefix = prefix.clone();
        let url = cache_key(&endpoint, &[("q", prefix.as_str()), ("_page", "1"), ("_limit", "10")]);
        let client = Arc::clone(&client);
        searches.push(tokio::spawn(async move {
            let outcome: Outcome<Payload> =
                client.request(&url, RequestOptions::new()).await.into();
            (prefix, outcome)
        }));
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    }

    for search in searches {
        let (prefix, outcome) = search.await?;
        match outcome {
            Outcome::Value(page) => {
                let movies: Vec<Movie> = page.json()?;
                println!("\"{prefix}\": {} of {:?} results", movies.len(), page.total_count());
                for movie in movies {
                    match movie.year {
                        Some(year) => println!("  {} ({year})", movie.title),
                        None => println!("  {}", movie.title),
                    }
                }
            }
            Outcome::Cancelled => println!("\"{prefix}\": superseded"),
            Outcome::Failed(e) => println!("\"{prefix}\": failed: {e}"),
        }
    }

    let url = cache_key(&endpoint, &[("q", query.as_str()), ("_page", "1"), ("_limit", "10")]);
    client.request(&url, RequestOptions::new()).await?;
    println!("stats: {}", serde_json::to_string(&client.stats())?);
    Ok(())
}
