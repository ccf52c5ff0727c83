pub mod classifier;
pub mod whale;

pub use classifier::{classify_price, TradeClassifier};
pub use whale::{TradeWindow, WhaleAlert, WhaleConfig, WhaleDetector};
