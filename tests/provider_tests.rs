use axum::{
    extract::Query,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::net::TcpListener;
use uuid::Uuid;

use crypto_portfolio_manager::{
    cli::{
        fetch::{fetch_news, FetchNewsArgs},
        Context,
    },
    config::Config,
    services::{
        news::{NewsApiProvider, NewsProvider},
        sentiment::{GeminiSentimentAnalyzer, SentimentAnalyzer},
    },
    PortfolioError,
};

const NEWS_KEY: &str = "news-key-123";
const GEMINI_KEY: &str = "gemini-key-456";

async fn serve_stub(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// NewsAPI `/everything`: rejects unknown keys, finds nothing for `nothing`.
async fn everything(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
    if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some(NEWS_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "status": "error",
                "code": "apiKeyInvalid",
                "message": "Your API key is invalid or incorrect."
            })),
        );
    }
    if params.get("q").map(String::as_str) == Some("nothing") {
        return (StatusCode::OK, Json(json!({"status": "ok", "totalResults": 0, "articles": []})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "totalResults": 1,
            "articles": [{
                "source": {"id": null, "name": "Wire"},
                "title": "Bitcoin climbs",
                "description": "Inflows continue",
                "url": "https://news.test/1",
                "publishedAt": "2024-03-02T10:00:00Z"
            }]
        })),
    )
}

/// Gemini `generateContent`, answering only when the key is in the header.
async fn generate_content(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
    let header_key = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok());
    if header_key != Some(GEMINI_KEY) || params.contains_key("key") {
        return (StatusCode::FORBIDDEN, Json(json!({"error": {"code": 403, "message": "bad key"}})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "candidates": [{
                "content": {
                    "parts": [{"text": "```json\n{\"sentiment_score\": 0.4, \"reasoning\": \"Steady inflows.\"}\n```"}],
                    "role": "model"
                },
                "finishReason": "STOP"
            }]
        })),
    )
}

fn stub_router() -> Router {
    Router::new()
        .route("/everything", get(everything))
        .route("/models/:model", post(generate_content))
}

fn march() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
    )
}

fn online_context(root: &PathBuf, base_url: &str) -> Context {
    let mut config = Config::default();
    config.data.raw_dir = root.join("raw");
    config.news.base_url = base_url.to_string();
    config.news.api_key = Some(NEWS_KEY.to_string());
    Context { config, offline: false }
}

#[tokio::test]
async fn test_newsapi_returns_articles() {
    let base_url = serve_stub(stub_router()).await;
    let (from, to) = march();

    let batch = NewsApiProvider::new(base_url.as_str(), NEWS_KEY)
        .fetch_articles("Bitcoin", from, to)
        .await
        .unwrap();
    assert_eq!(batch.articles.len(), 1);
    assert_eq!(batch.articles[0].title.as_deref(), Some("Bitcoin climbs"));
}

#[tokio::test]
async fn test_newsapi_error_body_is_news_error() {
    let base_url = serve_stub(stub_router()).await;
    let (from, to) = march();

    let err = NewsApiProvider::new(base_url.as_str(), "wrong-key")
        .fetch_articles("Bitcoin", from, to)
        .await
        .unwrap_err();
    match err {
        PortfolioError::News(message) => {
            assert!(message.contains("apiKeyInvalid"));
            assert!(message.contains("invalid or incorrect"));
        }
        other => panic!("expected a news error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_news_skips_writing_empty_batch() {
    let base_url = serve_stub(stub_router()).await;
    let root = std::env::temp_dir().join(format!("cpm-news-{}", Uuid::new_v4()));
    let ctx = online_context(&root, &base_url);

    let args = FetchNewsArgs {
        query: "nothing".to_string(),
        from: Some("2024-03-01".to_string()),
        to: Some("2024-03-06".to_string()),
        out_dir: None,
    };
    assert!(fetch_news(&ctx, &args).await.unwrap().is_none());
    assert!(!ctx.config.data.raw_dir.exists());

    let args = FetchNewsArgs {
        query: "Bitcoin".to_string(),
        ..args
    };
    let path = fetch_news(&ctx, &args).await.unwrap().unwrap();
    assert_eq!(path, ctx.config.data.raw_dir.join("news_bitcoin_2024-03-01_to_2024-03-06.json"));
    assert!(path.exists());

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_gemini_reads_candidate_text_with_header_key() {
    let base_url = serve_stub(stub_router()).await;
    let analyzer = GeminiSentimentAnalyzer::new(GEMINI_KEY.into(), "gemini-2.5-flash".into(), base_url);

    let score = analyzer.analyze("Bitcoin climbs", "Inflows continue").await.unwrap();
    assert!((score.score - 0.4).abs() < 1e-12);
    assert_eq!(score.reasoning, "Steady inflows.");
}

#[tokio::test]
async fn test_gemini_rejected_key_is_configuration_error() {
    let base_url = serve_stub(stub_router()).await;
    let analyzer = GeminiSentimentAnalyzer::new("wrong-key".into(), "gemini-2.5-flash".into(), base_url);

    let err = analyzer.analyze("Bitcoin climbs", "Inflows continue").await.unwrap_err();
    assert!(matches!(err, PortfolioError::Configuration(_)));
    assert!(!err.to_string().contains("wrong-key"));
}
