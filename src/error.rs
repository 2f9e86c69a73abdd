use thiserror::Error;

pub type Result<T> = std::result::Result<T, PortfolioError>;

#[derive(Error, Debug)]
pub enum PortfolioError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("News error: {0}")]
    News(String),

    #[error("Sentiment error: {0}")]
    Sentiment(String),

    #[error("Indicator error: {0}")]
    Indicator(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Backtest error: {0}")]
    Backtest(String),

    #[error("Risk calculation error: {0}")]
    RiskCalculation(String),

    #[error("Portfolio error: {0}")]
    Portfolio(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date/time error: {0}")]
    DateTime(#[from] chrono::ParseError),
}

impl PortfolioError {
    /// Transient failures worth retrying after a pause.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortfolioError::Network(_) | PortfolioError::RateLimited(_))
    }
}
