pub mod flair;
pub mod rate_limiter;

pub use flair::{ChangeOutcome, FlairLedger, FlairStatus, Standing};
pub use rate_limiter::{ConstantRateLimiter, ExponentialParams, ExponentialRateLimiter, RateLimiter};
