pub mod backtest;
pub mod classifier;
pub mod dataset;
pub mod evaluation;
pub mod indicators;
pub mod trainer;

pub use backtest::*;
pub use classifier::*;
pub use dataset::*;
pub use evaluation::*;
pub use indicators::*;
pub use trainer::*;
