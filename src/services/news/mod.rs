use crate::config::NewsConfig;
use crate::models::NewsBatch;
use crate::storage;
use crate::{PortfolioError, Result};
use chrono::NaiveDate;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

pub mod mock;
pub use mock::*;

pub mod newsapi;
pub use newsapi::*;

pub trait NewsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// English articles matching `query` published between `from` and `to`
    /// (inclusive, `YYYY-MM-DD`), newest first.
    fn fetch_articles<'a>(
        &'a self,
        query: &'a str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Pin<Box<dyn Future<Output = Result<NewsBatch>> + Send + 'a>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsProviderKind {
    Mock,
    NewsApi,
}

pub fn make_news_provider(kind: NewsProviderKind, config: &NewsConfig) -> Result<Arc<dyn NewsProvider>> {
    match kind {
        NewsProviderKind::Mock => Ok(Arc::new(mock::MockNewsProvider::new())),
        NewsProviderKind::NewsApi => {
            let key = config.api_key.clone().ok_or_else(|| {
                PortfolioError::Configuration(
                    "NEWS_API_KEY not found. Add NEWS_API_KEY=<key> to the .env file".to_string(),
                )
            })?;
            Ok(Arc::new(newsapi::NewsApiProvider::new(config.base_url.clone(), key)))
        }
    }
}

pub fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| PortfolioError::Configuration(format!("Invalid date '{input}': {e}")))
}

/// `Bitcoin ETF`, 2024-01-01..2024-01-31 -> `news_bitcoin_etf_2024-01-01_to_2024-01-31.json`
pub fn news_file_name(query: &str, from: NaiveDate, to: NaiveDate) -> String {
    let query = query.trim().replace(' ', "_").to_lowercase();
    format!("news_{}_{}_to_{}.json", query, from.format("%Y-%m-%d"), to.format("%Y-%m-%d"))
}

pub fn write_news_json(path: &Path, batch: &NewsBatch) -> Result<()> {
    storage::write_json(path, batch)?;
    info!("Saved {} articles to {}", batch.articles.len(), path.display());
    Ok(())
}

pub fn read_news_json(path: &Path) -> Result<NewsBatch> {
    storage::read_json(path)
}
