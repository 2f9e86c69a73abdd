use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{PortfolioError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub social: SocialConfig,
    pub news: NewsConfig,
    pub sentiment: SentimentConfig,
    pub dashboard: DashboardConfig,
    pub data: DataConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
    pub rest_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialConfig {
    #[serde(skip_serializing)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub models_dir: PathBuf,
    /// Holdings shown by the dashboard. Optional on disk.
    pub portfolio_file: PathBuf,
}

impl ExchangeConfig {
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }
}

impl DashboardConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig {
                api_key: None,
                api_secret: None,
                rest_url: "https://api.binance.com".into(),
            },
            social: SocialConfig { bearer_token: None },
            news: NewsConfig {
                api_key: None,
                base_url: "https://newsapi.org/v2".into(),
            },
            sentiment: SentimentConfig {
                api_key: None,
                model: "gemini-2.5-flash".into(),
                base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            },
            dashboard: DashboardConfig {
                host: "localhost".into(),
                port: 8501,
            },
            data: DataConfig {
                raw_dir: PathBuf::from("data/raw"),
                processed_dir: PathBuf::from("data/processed"),
                models_dir: PathBuf::from("models"),
                portfolio_file: PathBuf::from("portfolio.json"),
            },
            log_level: "info".into(),
        }
    }
}

/// Values shipped in `.env.example` that mean "not configured".
fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || (v.starts_with("your_") && v.ends_with("_here"))
}

impl Config {
    /// Load configuration from environment variables (.env file) with defaults.
    ///
    /// Credentials are optional here: public market data needs none, and each
    /// pipeline stage that needs a key asks for it via the `require_*` helpers.
    pub fn load_or_default() -> Self {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |key: &str| lookup(key).filter(|v| !is_placeholder(v));
        let mut config = Self::default();

        config.exchange.api_key = secret("EXCHANGE_API_KEY");
        config.exchange.api_secret = secret("EXCHANGE_API_SECRET");
        if let Some(url) = secret("EXCHANGE_REST_URL") {
            config.exchange.rest_url = url;
        }

        config.social.bearer_token = secret("TWITTER_BEARER_TOKEN");

        config.news.api_key = secret("NEWS_API_KEY");
        if let Some(url) = secret("NEWS_API_URL") {
            config.news.base_url = url;
        }

        config.sentiment.api_key = secret("GOOGLE_API_KEY");
        if let Some(model) = secret("GEMINI_MODEL") {
            config.sentiment.model = model;
        }
        if let Some(url) = secret("GEMINI_BASE_URL") {
            config.sentiment.base_url = url;
        }

        if let Some(host) = secret("DASHBOARD_HOST") {
            config.dashboard.host = host;
        }
        if let Some(port) = secret("DASHBOARD_PORT") {
            match port.parse() {
                Ok(p) => config.dashboard.port = p,
                Err(_) => tracing::warn!("Ignoring invalid DASHBOARD_PORT={port}"),
            }
        }

        if let Some(dir) = secret("DATA_RAW_DIR") {
            config.data.raw_dir = PathBuf::from(dir);
        }
        if let Some(dir) = secret("DATA_PROCESSED_DIR") {
            config.data.processed_dir = PathBuf::from(dir);
        }
        if let Some(dir) = secret("MODELS_DIR") {
            config.data.models_dir = PathBuf::from(dir);
        }
        if let Some(file) = secret("PORTFOLIO_FILE") {
            config.data.portfolio_file = PathBuf::from(file);
        }

        if let Some(level) = secret("RUST_LOG") {
            config.log_level = level;
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.dashboard.port == 0 {
            return Err(PortfolioError::Configuration(
                "DASHBOARD_PORT must be non-zero".to_string(),
            ));
        }
        if self.dashboard.host.trim().is_empty() {
            return Err(PortfolioError::Configuration(
                "DASHBOARD_HOST must not be empty".to_string(),
            ));
        }
        for (name, dir) in [
            ("DATA_RAW_DIR", &self.data.raw_dir),
            ("DATA_PROCESSED_DIR", &self.data.processed_dir),
            ("MODELS_DIR", &self.data.models_dir),
        ] {
            if dir.as_os_str().is_empty() {
                return Err(PortfolioError::Configuration(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn require_news_key(&self) -> Result<&str> {
        self.news.api_key.as_deref().ok_or_else(|| {
            PortfolioError::Configuration(
                "NEWS_API_KEY not found. Add NEWS_API_KEY=<key> to the .env file".to_string(),
            )
        })
    }

    pub fn require_sentiment_key(&self) -> Result<&str> {
        self.sentiment.api_key.as_deref().ok_or_else(|| {
            PortfolioError::Configuration(
                "GOOGLE_API_KEY not found. Add GOOGLE_API_KEY=<key> to the .env file".to_string(),
            )
        })
    }
}
