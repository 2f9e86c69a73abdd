use crate::config::SentimentConfig;
use crate::models::{NewsBatch, SentimentRecord};
use crate::storage;
use crate::{PortfolioError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

pub mod gemini;
pub use gemini::*;

pub mod keyword;
pub use keyword::*;

pub const SENTIMENT_FILE_NAME: &str = "news_sentiment.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    /// -1.0 (very bearish) to +1.0 (very bullish).
    pub score: f64,
    pub reasoning: String,
}

pub trait SentimentAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Score one article's expected impact on the BTC price.
    fn analyze<'a>(
        &'a self,
        title: &'a str,
        description: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SentimentScore>> + Send + 'a>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentimentAnalyzerKind {
    Keyword,
    Gemini,
}

pub fn make_sentiment_analyzer(
    kind: SentimentAnalyzerKind,
    config: &SentimentConfig,
) -> Result<Arc<dyn SentimentAnalyzer>> {
    match kind {
        SentimentAnalyzerKind::Keyword => Ok(Arc::new(keyword::KeywordSentimentAnalyzer::default())),
        SentimentAnalyzerKind::Gemini => {
            let key = config.api_key.clone().ok_or_else(|| {
                PortfolioError::Configuration(
                    "GOOGLE_API_KEY not found. Add GOOGLE_API_KEY=<key> to the .env file".to_string(),
                )
            })?;
            Ok(Arc::new(gemini::GeminiSentimentAnalyzer::new(
                key,
                config.model.clone(),
                config.base_url.clone(),
            )))
        }
    }
}

/// Parse an LLM reply of the form `{"sentiment_score": x, "reasoning": "..."}`.
///
/// Markdown code fences around the JSON are tolerated, and so is prose
/// before or after the object. Scores outside [-1, 1] are clamped.
pub fn parse_sentiment_response(text: &str) -> Result<SentimentScore> {
    let cleaned = text.trim().replace("```json", "").replace("```", "");
    let body = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned.trim(),
    };

    let value: Value = serde_json::from_str(body)
        .map_err(|e| PortfolioError::Sentiment(format!("Model did not return valid JSON ({e}): {}", preview(text))))?;

    let score = match value.get("sentiment_score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| PortfolioError::Sentiment(format!("Missing or invalid sentiment_score: {}", preview(text))))?;

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(SentimentScore {
        score: score.clamp(-1.0, 1.0),
        reasoning,
    })
}

fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}

#[derive(Debug, Clone)]
pub struct SentimentOptions {
    /// Only the first `max_articles` of the batch are considered.
    pub max_articles: usize,
    /// Pause after each successful call, for free-tier rate limits.
    pub pace: Duration,
    /// Longer pause after an API failure.
    pub error_pause: Duration,
}

impl Default for SentimentOptions {
    fn default() -> Self {
        Self {
            max_articles: 50,
            pace: Duration::from_secs(2),
            error_pause: Duration::from_secs(5),
        }
    }
}

fn has_usable_text(title: &str, description: &str) -> bool {
    !title.trim().is_empty() && !description.trim().is_empty() && description.trim() != "[Removed]"
}

/// Score each usable article of the batch; failures are logged and skipped.
pub async fn analyze_news_sentiment(
    analyzer: &dyn SentimentAnalyzer,
    batch: &NewsBatch,
    options: &SentimentOptions,
) -> Result<Vec<SentimentRecord>> {
    info!(
        "Scoring up to {} of {} articles with {}",
        options.max_articles,
        batch.articles.len(),
        analyzer.name()
    );

    let mut records = Vec::new();
    for article in batch.articles.iter().take(options.max_articles) {
        let title = article.title.as_deref().unwrap_or_default();
        let description = article.description.as_deref().unwrap_or_default();
        if !has_usable_text(title, description) {
            continue;
        }

        match analyzer.analyze(title, description).await {
            Ok(score) => {
                let short: String = title.chars().take(50).collect();
                info!("  > Score {:.2}: {}...", score.score, short);
                records.push(SentimentRecord {
                    timestamp: article.published_at,
                    sentiment_score: score.score,
                    reasoning: score.reasoning,
                    title: title.to_string(),
                });
                if !options.pace.is_zero() {
                    sleep(options.pace).await;
                }
            }
            Err(e @ PortfolioError::Sentiment(_)) => {
                warn!("  > Unparseable model reply: {}", e);
            }
            Err(e) => {
                warn!("  > Sentiment API error: {}", e);
                if !options.error_pause.is_zero() {
                    sleep(options.error_pause).await;
                }
            }
        }
    }

    if records.is_empty() {
        return Err(PortfolioError::Sentiment("No article sentiment could be scored".to_string()));
    }

    records.sort_by_key(|r| r.timestamp);
    info!("Scored {} articles", records.len());
    Ok(records)
}

pub fn write_sentiment_csv(path: &Path, records: &[SentimentRecord]) -> Result<()> {
    storage::write_csv(path, records)?;
    info!("Saved {} sentiment records to {}", records.len(), path.display());
    Ok(())
}

pub fn read_sentiment_csv(path: &Path) -> Result<Vec<SentimentRecord>> {
    let mut records: Vec<SentimentRecord> = storage::read_csv(path)?;
    records.sort_by_key(|r| r.timestamp);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let reply = "```json\n{\"sentiment_score\": 0.65, \"reasoning\": \"ETF inflows\"}\n```";
        let score = parse_sentiment_response(reply).unwrap();
        assert!((score.score - 0.65).abs() < 1e-12);
        assert_eq!(score.reasoning, "ETF inflows");
    }

    #[test]
    fn accepts_string_scores_and_clamps() {
        let score = parse_sentiment_response(r#"{"sentiment_score": "-1.7", "reasoning": "hack"}"#).unwrap();
        assert_eq!(score.score, -1.0);
    }

    #[test]
    fn tolerates_surrounding_prose() {
        let reply = "Here is the analysis: {\"sentiment_score\": 0.1, \"reasoning\": \"flat\"} Thanks!";
        assert!((parse_sentiment_response(reply).unwrap().score - 0.1).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_sentiment_response("0.5"),
            Err(PortfolioError::Sentiment(_))
        ));
        assert!(parse_sentiment_response(r#"{"reasoning": "no score"}"#).is_err());
    }

    #[test]
    fn removed_articles_are_not_usable() {
        assert!(!has_usable_text("Title", "[Removed]"));
        assert!(!has_usable_text("", "Body"));
        assert!(has_usable_text("Title", "Body"));
    }
}
