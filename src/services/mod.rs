pub mod market_data;
pub mod news;
pub mod portfolio;
pub mod risk;
pub mod sentiment;

pub use market_data::{
    fetch_historical_ohlcv, make_ohlcv_provider, ohlcv_file_name, read_candles_csv, write_candles_csv,
    BackfillOptions, BinanceOhlcvProvider, MockOhlcvProvider, OhlcvProvider, OhlcvProviderKind,
};
pub use news::{make_news_provider, news_file_name, MockNewsProvider, NewsApiProvider, NewsProvider, NewsProviderKind};
pub use portfolio::*;
pub use risk::*;
pub use sentiment::*;
