pub mod cli;
pub mod config;
pub mod core;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod storage;

pub use config::Config;
pub use error::{PortfolioError, Result};
pub use models::*;
