use std::future::Future;
use std::pin::Pin;

use chrono::NaiveDate;
use reqwest::Client;
use tracing::info;

use super::NewsProvider;
use crate::models::NewsBatch;
use crate::{PortfolioError, Result};

/// NewsAPI's maximum page size.
pub const NEWSAPI_PAGE_SIZE: u32 = 100;

pub struct NewsApiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl NewsApiProvider {
    pub fn new<S: Into<String>>(base_url: S, api_key: S) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn do_fetch_articles(&self, query: &str, from: NaiveDate, to: NaiveDate) -> Result<NewsBatch> {
        info!("Fetching news for '{}' from {} to {}", query, from, to);

        let url = format!("{}/everything", self.base_url.trim_end_matches('/'));
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        let page_size = NEWSAPI_PAGE_SIZE.to_string();
        let params = [
            ("q", query),
            ("language", "en"),
            ("from", from.as_str()),
            ("to", to.as_str()),
            ("sortBy", "publishedAt"),
            ("pageSize", page_size.as_str()),
        ];

        let resp = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(&params)
            .send()
            .await
            .map_err(PortfolioError::Network)?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PortfolioError::RateLimited(format!("NewsAPI HTTP {status}")));
        }

        // Error bodies carry `status: "error"` with a code and message
        let batch: NewsBatch = resp.json().await.map_err(PortfolioError::Network)?;
        if batch.status != "ok" || !status.is_success() {
            return Err(PortfolioError::News(format!(
                "NewsAPI HTTP {}: {} ({})",
                status,
                batch.message.as_deref().unwrap_or("unknown error"),
                batch.code.as_deref().unwrap_or("no code"),
            )));
        }

        info!("NewsAPI reports {} matching articles", batch.total_results);
        Ok(batch)
    }
}

impl NewsProvider for NewsApiProvider {
    fn name(&self) -> &str {
        "newsapi"
    }

    fn fetch_articles<'a>(
        &'a self,
        query: &'a str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Pin<Box<dyn Future<Output = Result<NewsBatch>> + Send + 'a>> {
        Box::pin(self.do_fetch_articles(query, from, to))
    }
}
