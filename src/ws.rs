// Venue transport and JSON framing, kept separate from the quoting core
// as the boundary that turns inbound frames into `PriceFeedState::update`
// calls. Subscribes to the single "bbo" channel for the traded pair.
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use crate::feed::{FirstBboFlag, PriceFeedState};

const WS_URL: &str = "wss://api.hyperliquid.xyz/ws";

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Connects, subscribes to the pair's `bbo` channel, and dispatches every
/// inbound update into `feed` until the socket drops, then reconnects with
/// exponential backoff (1s doubling to a 32s cap).
/// Never returns except via an unrecoverable URL parse error at startup.
pub async fn connect_and_listen(
    coin: String,
    feed: Arc<Mutex<PriceFeedState>>,
    first_bbo: FirstBboFlag,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut retry_delay_secs: u64 = 1;
    let max_delay_secs: u64 = 32;

    loop {
        info!("[FEED] connecting to {}", WS_URL);
        match connect_async(Url::parse(WS_URL)?).await {
            Ok((ws_stream, _)) => {
                info!("[FEED] connected");
                retry_delay_secs = 1;

                let (mut write, mut read) = ws_stream.split();

                let sub = serde_json::json!({
                    "method": "subscribe",
                    "subscription": { "type": "bbo", "coin": coin }
                });
                if let Err(e) = write.send(Message::Text(sub.to_string())).await {
                    error!("[FEED] failed to subscribe to bbo for {}: {}", coin, e);
                }

                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            handle_text_frame(&text, &feed, &first_bbo);
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Ok(Message::Close(_)) => {
                            warn!("[FEED] connection closed by server, reconnecting");
                            break;
                        }
                        Err(e) => {
                            error!("[FEED] ws error: {}, reconnecting", e);
                            break;
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => {
                error!("[FEED] connect failed: {}, retrying in {}s", e, retry_delay_secs);
            }
        }

        tokio::time::sleep(tokio::time::Duration::from_secs(retry_delay_secs)).await;
        retry_delay_secs = std::cmp::min(retry_delay_secs * 2, max_delay_secs);
    }
}

fn handle_text_frame(text: &str, feed: &Arc<Mutex<PriceFeedState>>, first_bbo: &FirstBboFlag) {
    let parsed: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            // Malformed frame: log and drop, the feed just stays stale.
            error!("[FEED] malformed bbo message: {}", e);
            return;
        }
    };

    let channel = parsed["channel"].as_str().unwrap_or("");
    if channel != "bbo" {
        return;
    }

    let Some(bbo) = parsed["data"]["bbo"].as_array() else {
        return;
    };
    let best_bid = bbo.first().and_then(|b| b["px"].as_str()).and_then(|s| s.parse::<f64>().ok());
    let best_ask = bbo.get(1).and_then(|a| a["px"].as_str()).and_then(|s| s.parse::<f64>().ok());

    if best_bid.is_none() && best_ask.is_none() {
        return;
    }

    let now = now_ms();
    let became_ready = {
        let mut state = feed.lock().unwrap();
        state.update(best_bid, best_ask, now)
    };
    if became_ready {
        first_bbo.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::new_first_bbo_flag;

    #[test]
    fn ignores_non_bbo_channel() {
        let feed = Arc::new(Mutex::new(PriceFeedState::new(60_000)));
        let flag = new_first_bbo_flag();
        handle_text_frame(r#"{"channel":"trades","data":{}}"#, &feed, &flag);
        assert!(!feed.lock().unwrap().bbo.is_ready());
    }

    #[test]
    fn parses_bbo_frame_and_fires_first_bbo() {
        let feed = Arc::new(Mutex::new(PriceFeedState::new(60_000)));
        let flag = new_first_bbo_flag();
        let frame = r#"{"channel":"bbo","data":{"bbo":[{"px":"100000"},{"px":"100002"}]}}"#;
        handle_text_frame(frame, &feed, &flag);
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(feed.lock().unwrap().bbo.mid(), Some(100001.0));
    }

    #[test]
    fn malformed_frame_is_dropped_not_fatal() {
        let feed = Arc::new(Mutex::new(PriceFeedState::new(60_000)));
        let flag = new_first_bbo_flag();
        handle_text_frame("not json", &feed, &flag);
        assert!(!feed.lock().unwrap().bbo.is_ready());
    }
}
