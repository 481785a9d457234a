mod common;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::*;
use glean::search::{
    DuckDuckGoBackend, GoogleCseBackend, SearchAggregator, SearchBackend, SerpApiBackend,
    TavilyBackend, WikipediaBackend,
};
use reqwest::Client;
use serde_json::{Value, json};

mod aggregator {
    use super::*;

    fn urls(response: &glean::data_models::SearchResponse) -> HashSet<String> {
        response.results.iter().map(|r| r.url.clone()).collect()
    }

    #[tokio::test]
    async fn test_merges_and_dedups_by_url() -> Result<()> {
        let a: Arc<dyn SearchBackend> = Arc::new(StaticBackend::new("one", &["https://a", "https://b"]));
        let b: Arc<dyn SearchBackend> = Arc::new(StaticBackend::new("two", &["https://b", "https://c"]));
        let aggregator = SearchAggregator::new(vec![a, b], 3)?;

        let response = aggregator.search("rust", 10).await;

        assert!(response.success);
        assert_eq!(response.results.len(), 3);
        assert_eq!(
            urls(&response),
            ["https://a", "https://b", "https://c"]
                .map(String::from)
                .into_iter()
                .collect::<HashSet<_>>()
        );
        let sources: HashSet<&str> = response.source.split('+').collect();
        assert_eq!(sources, HashSet::from(["one", "two"]));
        assert!(response.error_message.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_backend_does_not_sink_the_search() -> Result<()> {
        let good: Arc<dyn SearchBackend> = Arc::new(StaticBackend::new("good", &["https://a"]));
        let bad: Arc<dyn SearchBackend> = Arc::new(FailingBackend::new("bad"));
        let aggregator = SearchAggregator::new(vec![bad, good], 3)?;

        let response = aggregator.search("rust", 5).await;

        assert!(response.success);
        assert_eq!(response.source, "good");
        assert_eq!(response.results.len(), 1);
        assert!(response.error_message.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_panicking_backend_is_contained() -> Result<()> {
        let good: Arc<dyn SearchBackend> = Arc::new(StaticBackend::new("good", &["https://a"]));
        let panicky: Arc<dyn SearchBackend> = Arc::new(PanickingBackend);
        let aggregator = SearchAggregator::new(vec![panicky, good], 2)?;

        let response = aggregator.search("rust", 5).await;

        assert!(response.success);
        assert_eq!(response.source, "good");
        Ok(())
    }

    #[tokio::test]
    async fn test_all_failures_are_reported() -> Result<()> {
        let backends: Vec<Arc<dyn SearchBackend>> = vec![
            Arc::new(FailingBackend::new("first")),
            Arc::new(PanickingBackend),
        ];
        let aggregator = SearchAggregator::new(backends, 2)?;

        let response = aggregator.search("rust", 5).await;

        assert!(!response.success);
        assert!(response.results.is_empty());
        assert_eq!(response.total_results, 0);
        let message = response.error_message.unwrap_or_default();
        assert!(message.contains("first: HTTP 503"));
        assert!(message.contains("panicky: panic: backend exploded"));
        Ok(())
    }

    #[tokio::test]
    async fn test_truncates_but_counts_every_unique_result() -> Result<()> {
        let many: Vec<String> = (0..6).map(|i| format!("https://site{i}.test")).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        let backend: Arc<dyn SearchBackend> = Arc::new(StaticBackend::new("one", &refs));
        let aggregator = SearchAggregator::new(vec![backend], 3)?;

        // One backend is asked for 4 / 1 + 2 = 6 results.
        let response = aggregator.search("rust", 4).await;

        assert_eq!(response.results.len(), 4);
        assert_eq!(response.total_results, 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_per_backend_request_size() -> Result<()> {
        let backends: Vec<Arc<dyn SearchBackend>> = (0..3)
            .map(|i| Arc::new(StaticBackend::new(&format!("b{i}"), &[])) as Arc<dyn SearchBackend>)
            .collect();
        let aggregator = SearchAggregator::new(backends, 3)?;
        assert_eq!(aggregator.per_backend_results(8), 4);
        assert_eq!(aggregator.per_backend_results(1), 2);
        assert_eq!(aggregator.per_backend_results(usize::MAX), usize::MAX / 3 + 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_ranks_longer_snippets_first() -> Result<()> {
        let web = StaticBackend::with_results(
            "web",
            vec![
                result("https://short", "tiny", "web"),
                result("https://long", "a rather long and detailed snippet", "web"),
            ],
        );
        let wiki = StaticBackend::with_results(
            "wikipedia",
            vec![result("https://wiki", "same", "wikipedia")],
        );
        let backends: Vec<Arc<dyn SearchBackend>> = vec![Arc::new(web), Arc::new(wiki)];
        let aggregator = SearchAggregator::new(backends, 2)?;

        let response = aggregator.search("rust", 10).await;

        let order: Vec<&str> = response.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(order, vec!["https://long", "https://wiki", "https://short"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrency_is_capped() -> Result<()> {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let backends: Vec<Arc<dyn SearchBackend>> = (0..4)
            .map(|i| {
                Arc::new(ProbeBackend {
                    name: format!("counted{i}"),
                    in_flight: in_flight.clone(),
                    peak: peak.clone(),
                }) as Arc<dyn SearchBackend>
            })
            .collect();
        let aggregator = SearchAggregator::new(backends, 2)?;

        let response = aggregator.search("rust", 10).await;

        assert_eq!(response.results.len(), 4);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        Ok(())
    }
}

mod backends {
    use super::*;

    const DDG_PAGE: &str = r#"
        <html><body>
          <div class="result">
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&rut=abc">Rust Programming Language</a>
            <a class="result__snippet">A language empowering everyone.</a>
          </div>
          <div class="result">
            <a class="result__a" href="https://doc.rust-lang.org/book/">The Book</a>
            <div class="result__snippet">Learn Rust.</div>
          </div>
          <div class="result">
            <a class="result__a" href="/relative/ad">Sponsored</a>
          </div>
        </body></html>"#;

    #[tokio::test]
    async fn test_duckduckgo_parses_results_page() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let router = Router::new()
            .route(
                "/html/",
                get(
                    |State(seen): State<Arc<Mutex<Vec<String>>>>,
                     Query(params): Query<HashMap<String, String>>| async move {
                        if let Some(q) = params.get("q") {
                            seen.lock().unwrap().push(q.clone());
                        }
                        axum::response::Html(DDG_PAGE)
                    },
                ),
            )
            .with_state(seen.clone());
        let base = serve(router).await?;
        let backend = DuckDuckGoBackend::new(Client::new())
            .with_endpoint(format!("{base}/html/"))
            .with_min_delay(Duration::ZERO);

        let response = backend.search("rust lang", 5).await;

        assert!(response.success);
        assert_eq!(response.source, "duckduckgo");
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].url, "https://www.rust-lang.org/");
        assert_eq!(response.results[0].title, "Rust Programming Language");
        assert_eq!(response.results[0].snippet, "A language empowering everyone.");
        assert_eq!(response.results[1].url, "https://doc.rust-lang.org/book/");
        assert_eq!(seen.lock().unwrap().as_slice(), ["rust lang".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_duckduckgo_server_error_is_a_failed_response() -> Result<()> {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/html/",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::INTERNAL_SERVER_ERROR
                }),
            )
            .with_state(hits.clone());
        let base = serve(router).await?;
        let backend = DuckDuckGoBackend::new(Client::new())
            .with_endpoint(format!("{base}/html/"))
            .with_min_delay(Duration::ZERO);

        let response = backend.search("rust", 5).await;

        assert!(!response.success);
        assert!(response.results.is_empty());
        assert_eq!(
            response.error_message.as_deref(),
            Some("HTTP 500 Internal Server Error")
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_wikipedia_builds_article_links() -> Result<()> {
        let limits = Arc::new(Mutex::new(Vec::<String>::new()));
        let router = Router::new()
            .route(
                "/w/api.php",
                get(
                    |State(limits): State<Arc<Mutex<Vec<String>>>>,
                     Query(params): Query<HashMap<String, String>>| async move {
                        if let Some(limit) = params.get("srlimit") {
                            limits.lock().unwrap().push(limit.clone());
                        }
                        Json(json!({
                            "query": {
                                "search": [
                                    {
                                        "title": "Rust (programming language)",
                                        "snippet": "<span class=\"searchmatch\">Rust</span> is a language",
                                        "size": 1234
                                    },
                                    { "title": "", "snippet": "dropped" }
                                ]
                            }
                        }))
                    },
                ),
            )
            .with_state(limits.clone());
        let base = serve(router).await?;
        let backend = WikipediaBackend::new(Client::new())
            .with_endpoint(format!("{base}/w/api.php"))
            .with_min_delay(Duration::ZERO);

        let response = backend.search("rust", 25).await;

        assert!(response.success);
        assert_eq!(response.results.len(), 1);
        let hit = &response.results[0];
        assert_eq!(
            hit.url,
            "https://en.wikipedia.org/wiki/Rust_(programming_language)"
        );
        assert_eq!(hit.snippet, "Rust is a language");
        assert!(hit.is_wikipedia());
        assert_eq!(hit.metadata.get("size"), Some(&json!(1234)));
        assert_eq!(limits.lock().unwrap().as_slice(), ["10".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_serpapi_malformed_body_yields_no_results() -> Result<()> {
        let router = Router::new().route("/search.json", get(|| async { "this is not json" }));
        let base = serve(router).await?;
        let backend = SerpApiBackend::new(Client::new(), Some("key".into()))?
            .with_endpoint(format!("{base}/search.json"))
            .with_min_delay(Duration::ZERO);

        let response = backend.search("rust", 5).await;

        assert!(response.success);
        assert!(response.results.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_serpapi_organic_results() -> Result<()> {
        let router = Router::new().route(
            "/search.json",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let keyed = params.get("api_key").map(String::as_str) == Some("secret")
                    && params.get("engine").map(String::as_str) == Some("google");
                if !keyed {
                    return Json(json!({ "error": "bad request" }));
                }
                Json(json!({
                    "organic_results": [
                        { "title": "Rust", "link": "https://rust-lang.org", "snippet": "fast", "position": 1 },
                        { "title": "", "link": "https://untitled.test", "snippet": "x", "position": 2 }
                    ]
                }))
            }),
        );
        let base = serve(router).await?;
        let backend = SerpApiBackend::new(Client::new(), Some("secret".into()))?
            .with_endpoint(format!("{base}/search.json"))
            .with_min_delay(Duration::ZERO);

        let response = backend.search("rust", 5).await;

        assert!(response.success);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].metadata.get("position"), Some(&json!(1)));
        Ok(())
    }

    #[tokio::test]
    async fn test_tavily_posts_with_bearer_token() -> Result<()> {
        let router = Router::new().route(
            "/search",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer tvly-key");
                if !authorized {
                    return (StatusCode::UNAUTHORIZED, Json(json!({})));
                }
                let query = body["query"].as_str().unwrap_or_default().to_string();
                (
                    StatusCode::OK,
                    Json(json!({
                        "results": [
                            { "title": query, "url": "https://tavily.test/a", "content": "body", "score": 0.9 }
                        ]
                    })),
                )
            }),
        );
        let base = serve(router).await?;
        let backend = TavilyBackend::new(Client::new(), Some("tvly-key".into()))?
            .with_endpoint(format!("{base}/search"))
            .with_min_delay(Duration::ZERO);

        let response = backend.search("ownership", 3).await;

        assert!(response.success);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].title, "ownership");
        assert_eq!(response.results[0].snippet, "body");
        assert_eq!(response.results[0].metadata.get("score"), Some(&json!(0.9)));
        Ok(())
    }

    #[tokio::test]
    async fn test_google_cse_retries_transient_failures() -> Result<()> {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/customsearch/v1",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "items": [
                                { "title": "Rust", "link": "https://rust-lang.org", "snippet": "s", "displayLink": "rust-lang.org" }
                            ]
                        })),
                    )
                }),
            )
            .with_state(hits.clone());
        let base = serve(router).await?;
        let backend = GoogleCseBackend::new(Client::new(), Some("key".into()), Some("cx".into()))?
            .with_endpoint(format!("{base}/customsearch/v1"))
            .with_min_delay(Duration::ZERO)
            .with_retry(fast_retry());

        let response = backend.search("rust", 5).await;

        assert!(response.success);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(response.results[0].metadata.get("rank"), Some(&json!(1)));
        assert_eq!(
            response.results[0].metadata.get("display_link"),
            Some(&json!("rust-lang.org"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_google_cse_does_not_retry_client_errors() -> Result<()> {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/customsearch/v1",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::FORBIDDEN
                }),
            )
            .with_state(hits.clone());
        let base = serve(router).await?;
        let backend = GoogleCseBackend::new(Client::new(), Some("key".into()), Some("cx".into()))?
            .with_endpoint(format!("{base}/customsearch/v1"))
            .with_min_delay(Duration::ZERO)
            .with_retry(fast_retry());

        let response = backend.search("rust", 5).await;

        assert!(!response.success);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
