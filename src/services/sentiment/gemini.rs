//! Google Gemini sentiment scoring.
//!
//! Each article is sent as a single `generateContent` request; the model is
//! asked to answer with a JSON object only, which `parse_sentiment_response`
//! then reads.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::{parse_sentiment_response, SentimentAnalyzer, SentimentScore};
use crate::{PortfolioError, Result};

#[derive(Debug, Clone)]
pub struct GeminiSentimentAnalyzer {
    api_key: String,
    model_name: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiResponse {
    /// Text of the first part of the first candidate.
    fn into_text(self) -> Result<String> {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| PortfolioError::Sentiment("Empty response from Gemini API".to_string()))
    }
}

pub fn build_sentiment_prompt(title: &str, description: &str) -> String {
    format!(
        r#"You are a quantitative financial analyst specialised in cryptocurrencies.
Analyse the sentiment of the news article below, specifically its potential
impact on the price of Bitcoin (BTC). Consider the title and the description.

Return your analysis ONLY in the following JSON format:
{{
  "sentiment_score": <a float from -1.0 (extremely negative/bearish) to +1.0 (extremely positive/bullish)>,
  "reasoning": "<a one-sentence justification>"
}}

Article:
---
Title: {title}
Description: {description}
---
"#
    )
}

impl GeminiSentimentAnalyzer {
    pub fn new(api_key: String, model_name: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            model_name,
            base_url,
            client,
        }
    }

    /// The key travels in the `x-goog-api-key` header, never in the URL.
    fn api_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model_name
        )
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.api_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PortfolioError::Network(e.without_url()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(PortfolioError::RateLimited(format!("Gemini HTTP {status}")));
        }
        // Remaining failures are bad keys or unknown models
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PortfolioError::Configuration(format!(
                "Gemini API error ({status}): {error_text}"
            )));
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| PortfolioError::Network(e.without_url()))?;
        body.into_text()
    }

    async fn do_analyze(&self, title: &str, description: &str) -> Result<SentimentScore> {
        let text = self.generate(build_sentiment_prompt(title, description)).await?;
        parse_sentiment_response(&text)
    }
}

impl SentimentAnalyzer for GeminiSentimentAnalyzer {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn analyze<'a>(
        &'a self,
        title: &'a str,
        description: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SentimentScore>> + Send + 'a>> {
        Box::pin(self.do_analyze(title, description))
    }
}
