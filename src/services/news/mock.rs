use std::future::Future;
use std::pin::Pin;

use chrono::{NaiveDate, Utc};

use super::NewsProvider;
use crate::models::{NewsArticle, NewsBatch, NewsSource};
use crate::Result;

const HEADLINES: &[(&str, &str)] = &[
    (
        "Bitcoin surges as ETF inflows hit record",
        "Spot bitcoin funds saw record inflows, pushing BTC to a new monthly high amid bullish sentiment.",
    ),
    (
        "Crypto exchange hit by hack, tokens plunge",
        "A major exchange halted withdrawals after a security breach; bitcoin fell sharply on the news.",
    ),
    (
        "Regulators weigh new rules for digital assets",
        "Lawmakers discussed a framework for stablecoins. Market reaction was muted.",
    ),
    (
        "Institutional adoption of Bitcoin grows",
        "Several banks announced custody services, a sign of growing adoption and rally potential.",
    ),
    (
        "Miners sell holdings as fees drop",
        "Miner selling pressure and weak demand weigh on bitcoin, analysts warn of further decline.",
    ),
    ("Removed story", "[Removed]"),
];

/// Canned articles, one per day across the requested range.
pub struct MockNewsProvider {
    pub per_day: usize,
}

impl MockNewsProvider {
    pub fn new() -> Self {
        Self { per_day: 1 }
    }

    fn batch(&self, query: &str, from: NaiveDate, to: NaiveDate) -> NewsBatch {
        let mut articles = Vec::new();
        let mut day = from;
        let mut i = 0usize;
        while day <= to {
            for slot in 0..self.per_day {
                let (title, description) = HEADLINES[i % HEADLINES.len()];
                let published_at = day
                    .and_hms_opt(9 + (slot as u32 % 12), 0, 0)
                    .map(|dt| dt.and_utc())
                    .unwrap_or_else(Utc::now);
                articles.push(NewsArticle {
                    source: Some(NewsSource { id: None, name: Some("Mock Wire".to_string()) }),
                    author: None,
                    title: Some(format!("{title} ({query})")),
                    description: Some(description.to_string()),
                    url: None,
                    published_at,
                    content: None,
                });
                i += 1;
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        // NewsAPI sorts newest first
        articles.reverse();
        NewsBatch {
            status: "ok".to_string(),
            total_results: articles.len() as u64,
            articles,
            code: None,
            message: None,
        }
    }
}

impl Default for MockNewsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NewsProvider for MockNewsProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn fetch_articles<'a>(
        &'a self,
        query: &'a str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Pin<Box<dyn Future<Output = Result<NewsBatch>> + Send + 'a>> {
        let result = self.batch(query, from, to);
        Box::pin(async move { Ok(result) })
    }
}
