use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::ingestion::feed::FeedHandler;

pub const DEFAULT_WS_URL: &str = "wss://ws.bitstamp.net";

const PING_INTERVAL: Duration = Duration::from_secs(25);
const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct Subscribe<'a> {
    event: &'static str,
    data: SubscribeData<'a>,
}

#[derive(Debug, Serialize)]
struct SubscribeData<'a> {
    channel: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    data: Value,
}

/// What a single websocket frame turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Orderbook,
    Trade,
    Reconnect,
    Ignored,
}

pub fn orderbook_channel(pair: &str) -> String {
    format!("order_book_{pair}")
}

pub fn trades_channel(pair: &str) -> String {
    format!("live_trades_{pair}")
}

fn build_subscribe_messages(pair: &str) -> Vec<String> {
    [orderbook_channel(pair), trades_channel(pair)]
        .iter()
        .filter_map(|channel| {
            serde_json::to_string(&Subscribe {
                event: "bts:subscribe",
                data: SubscribeData { channel },
            })
            .ok()
        })
        .collect()
}

/// Run the websocket listener until `shutdown` flips to true.
///
/// Subscribes to the pair's orderbook and live trades, routes every frame into
/// `handler`, and reconnects with capped exponential backoff whenever the
/// connection drops or the exchange asks for a reconnect.
pub async fn run_ws_listener(
    ws_url: String,
    pair: String,
    handler: Arc<FeedHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        tracing::info!(url = %ws_url, pair = %pair, "Connecting to market feed...");

        match connect_async(&ws_url).await {
            Ok((ws_stream, _response)) => {
                tracing::info!("Market feed connected");
                attempt = 0;

                let (mut write, mut read) = ws_stream.split();

                for msg in build_subscribe_messages(&pair) {
                    if let Err(e) = write.send(Message::Text(msg.into())).await {
                        tracing::error!(error = %e, "Failed to send subscribe message");
                        break;
                    }
                }

                let mut ping_timer = interval(PING_INTERVAL);
                ping_timer.tick().await;

                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if handle_text_message(text.as_ref(), &handler) == Routed::Reconnect {
                                        tracing::info!("Exchange requested reconnect");
                                        break;
                                    }
                                }
                                Some(Ok(Message::Ping(data))) => {
                                    if let Err(e) = write.send(Message::Pong(data)).await {
                                        tracing::warn!(error = %e, "Failed to send pong");
                                        break;
                                    }
                                }
                                Some(Ok(Message::Close(_))) => {
                                    tracing::warn!("Market feed sent close frame");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::error!(error = %e, "Market feed read error");
                                    break;
                                }
                                None => {
                                    tracing::warn!("Market feed stream ended");
                                    break;
                                }
                            }
                        }
                        _ = ping_timer.tick() => {
                            if let Err(e) = write.send(Message::Ping(vec![].into())).await {
                                tracing::warn!(error = %e, "Failed to send ping");
                                break;
                            }
                        }
                        _ = shutdown.changed() => {
                            tracing::info!("Market feed shutting down");
                            let _ = write.send(Message::Close(None)).await;
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Market feed connection failed");
            }
        }

        let delay = BASE_RECONNECT_DELAY * 2u32.saturating_pow(attempt);
        let delay = delay.min(MAX_RECONNECT_DELAY);
        attempt = attempt.saturating_add(1);
        tracing::info!(delay_secs = delay.as_secs(), attempt, "Reconnecting...");

        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
}

/// Route one text frame to the handler.
pub fn handle_text_message(text: &str, handler: &FeedHandler) -> Routed {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, raw = %text, "Unparseable feed frame");
            return Routed::Ignored;
        }
    };

    match envelope.event.as_str() {
        "data" if envelope.channel.starts_with("order_book_") => {
            handler.on_orderbook(&envelope.data);
            Routed::Orderbook
        }
        "trade" if envelope.channel.starts_with("live_trades_") => {
            handler.on_trade(&envelope.data);
            Routed::Trade
        }
        "bts:request_reconnect" => Routed::Reconnect,
        "bts:subscription_succeeded" => {
            tracing::info!(channel = %envelope.channel, "Subscribed");
            Routed::Ignored
        }
        _ => {
            tracing::trace!(raw = %text, "Non-market frame received");
            Routed::Ignored
        }
    }
}
