use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::Duration;
use rust_decimal::Decimal;

use crate::commands::ResponderConfig;
use crate::execution::ExponentialParams;
use crate::ingestion::ws_listener::DEFAULT_WS_URL;
use crate::intelligence::WhaleConfig;

const DEFAULT_DATABASE_URL: &str = "sqlite://flair.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,

    // Market feed
    pub feed_ws_url: String,
    pub feed_pair: String,
    pub ticker_url: Option<String>,
    pub ticker_poll_secs: u64,
    pub quote_freshness_secs: i64,

    // Whale alerts
    pub whale_trigger_volume: Decimal,
    pub whale_window_ms: i64,
    pub whale_scan_interval_secs: u64,
    pub whale_dominance: Decimal,
    pub alert_label: String,

    // Flair game
    pub flair_change_delay_secs: i64,
    pub flair_top_size: usize,

    // Chat surface
    pub command_prefix: String,
    pub reply_max_delay_secs: i64,
    pub reply_base_factor: u32,
    pub reply_reset_after_secs: i64,
    pub privileged_users: Vec<String>,
    pub banned_users: Vec<String>,
    pub terminal_user: String,
    pub donation_address: Option<String>,

    // Telegram alert relay (optional, both must be set)
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    pub metrics_addr: Option<SocketAddr>,
    pub shutdown_grace_secs: u64,
}

/// Parse `key` if set, otherwise fall back to `default`.
fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw:?} is invalid: {e}")),
        Err(_) => Ok(default),
    }
}

fn list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into()),

            feed_ws_url: env::var("FEED_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.into()),
            feed_pair: env::var("FEED_PAIR").unwrap_or_else(|_| "btcusd".into()),
            ticker_url: env::var("TICKER_URL").ok().filter(|s| !s.is_empty()),
            ticker_poll_secs: parsed("TICKER_POLL_SECS", 5)?,
            quote_freshness_secs: parsed("QUOTE_FRESHNESS_SECS", 60)?,

            whale_trigger_volume: parsed("WHALE_TRIGGER_VOLUME", Decimal::from(100))?,
            whale_window_ms: parsed("WHALE_WINDOW_MS", 15_000)?,
            whale_scan_interval_secs: parsed("WHALE_SCAN_INTERVAL_SECS", 10)?,
            whale_dominance: parsed("WHALE_DOMINANCE", Decimal::new(8, 1))?,
            alert_label: env::var("ALERT_LABEL").unwrap_or_else(|_| "Alert".into()),

            flair_change_delay_secs: parsed("FLAIR_CHANGE_DELAY_SECS", 60)?,
            flair_top_size: parsed("FLAIR_TOP_SIZE", 5)?,

            command_prefix: env::var("COMMAND_PREFIX").unwrap_or_else(|_| "!".into()),
            reply_max_delay_secs: parsed("REPLY_MAX_DELAY_SECS", 600)?,
            reply_base_factor: parsed("REPLY_BASE_FACTOR", 2)?,
            reply_reset_after_secs: parsed("REPLY_RESET_AFTER_SECS", 1_800)?,
            privileged_users: list("PRIVILEGED_USERS"),
            banned_users: list("BANNED_USERS"),
            terminal_user: env::var("TERMINAL_USER").unwrap_or_else(|_| "local".into()),
            donation_address: env::var("DONATION_ADDRESS").ok().filter(|s| !s.is_empty()),

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),

            metrics_addr: env::var("METRICS_ADDR")
                .ok()
                .map(|s| s.parse())
                .transpose()?,
            shutdown_grace_secs: parsed("SHUTDOWN_GRACE_SECS", 5)?,
        })
    }

    /// Bot token and chat id, if the Telegram relay is fully configured.
    pub fn telegram(&self) -> Option<(String, String)> {
        self.telegram_bot_token.clone().zip(self.telegram_chat_id.clone())
    }

    pub fn quote_freshness(&self) -> Duration {
        Duration::seconds(self.quote_freshness_secs)
    }

    pub fn flair_change_delay(&self) -> Duration {
        Duration::seconds(self.flair_change_delay_secs)
    }

    pub fn whale_config(&self) -> WhaleConfig {
        WhaleConfig {
            trigger_volume: self.whale_trigger_volume,
            time_limit: Duration::milliseconds(self.whale_window_ms),
            dominance: self.whale_dominance,
            label: self.alert_label.clone(),
        }
    }

    pub fn reply_limits(&self) -> ExponentialParams {
        ExponentialParams {
            max_delay: Duration::seconds(self.reply_max_delay_secs),
            base_factor: self.reply_base_factor,
            reset_after: Duration::seconds(self.reply_reset_after_secs),
        }
    }

    pub fn responder_config(&self) -> ResponderConfig {
        ResponderConfig {
            prefix: self.command_prefix.clone(),
            top_size: self.flair_top_size,
            privileged_users: self.privileged_users.clone(),
            banned_users: self.banned_users.clone(),
            donation_address: self.donation_address.clone(),
        }
    }
}
