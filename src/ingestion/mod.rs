pub mod feed;
pub mod orderbook;
pub mod ticker_poller;
pub mod ws_listener;

pub use feed::FeedHandler;
pub use orderbook::{OrderBookTracker, QuoteSource};
