pub mod notifier;
pub mod whale_scanner;

pub use notifier::{AlertSink, BroadcastSink, FanoutSink, Notifier};
