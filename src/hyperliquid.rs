// Live Hyperliquid spot implementation of `ExchangeGateway`: REST call
// shape, a 2s response cache (respecting the venue's 20req/s global
// limit), and `float_to_wire` wire formatting, covering the five
// single-pair spot operations the Gateway trait exposes.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::gateway::{
    CancelRequest, ExchangeGateway, FillInfo, GatewayError, OpenOrderInfo, PlaceResult, Side, Tif,
};
use crate::market::{TradingPair, VenueAssetMeta};
use crate::signing::{self, ActionWire, LimitOrderWire, OrderRequest, OrderTypeWire};

const CACHE_DURATION: Duration = Duration::from_secs(2);

/// Rounds to 8 decimals then strips trailing zeros, matching the Python
/// SDK's `float_to_wire` (and the venue's own wire-format expectations).
pub fn float_to_wire(x: f64) -> String {
    let rounded = format!("{:.8}", x);
    if rounded.contains('.') {
        let trimmed = rounded.trim_end_matches('0');
        trimmed.trim_end_matches('.').to_string()
    } else {
        rounded
    }
}

pub struct HyperliquidGateway {
    base_url: String,
    account_address: String,
    private_key: String,
    client: reqwest::Client,
    pair: TradingPair,
    cached_open_orders: Mutex<Option<(Vec<OpenOrderInfo>, Instant)>>,
}

impl HyperliquidGateway {
    pub fn new(base_url: String, account_address: String, private_key: String, pair: TradingPair) -> Self {
        Self {
            base_url,
            account_address,
            private_key,
            client: reqwest::Client::new(),
            pair,
            cached_open_orders: Mutex::new(None),
        }
    }

    /// Fetches the venue's spot asset universe, used by `market::resolve`
    /// before the Gateway itself can be constructed with a resolved pair.
    pub async fn fetch_spot_universe(
        base_url: &str,
    ) -> Result<HashMap<String, VenueAssetMeta>, GatewayError> {
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base_url}/info"))
            .json(&serde_json::json!({ "type": "spotMeta" }))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let mut universe = HashMap::new();
        if let Some(tokens) = data["tokens"].as_array() {
            for (i, tok) in tokens.iter().enumerate() {
                if let Some(name) = tok["name"].as_str() {
                    let sz_decimals = tok["szDecimals"].as_u64().unwrap_or(4) as u32;
                    universe.insert(
                        name.to_string(),
                        VenueAssetMeta {
                            asset_id: 10_000 + i as u32, // spot asset indices are offset per HL convention
                            size_decimals: sz_decimals,
                            price_tick: 1.0,
                        },
                    );
                }
            }
        }
        Ok(universe)
    }

    async fn post_info(&self, payload: serde_json::Value) -> Result<serde_json::Value, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/info", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(GatewayError::Transport("rate limited".to_string()));
        }

        resp.json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn post_exchange(
        &self,
        action: serde_json::Value,
        nonce: u64,
        signature: signing::Signature,
    ) -> Result<serde_json::Value, GatewayError> {
        let payload = serde_json::json!({
            "action": action,
            "nonce": nonce,
            "signature": signature,
            "vaultAddress": serde_json::Value::Null,
        });

        let resp = self
            .client
            .post(format!("{}/exchange", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(GatewayError::Transport("rate limited".to_string()));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        serde_json::from_str(&text).map_err(|e| GatewayError::Transport(e.to_string()))
    }

    fn nonce() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }
}

#[async_trait]
impl ExchangeGateway for HyperliquidGateway {
    async fn place(
        &self,
        _pair: &str,
        side: Side,
        price: f64,
        size: f64,
        tif: Tif,
        reduce_only: bool,
    ) -> Result<PlaceResult, GatewayError> {
        let limit_px = float_to_wire(price);
        let sz = float_to_wire(size);
        let nonce = Self::nonce();

        let action = ActionWire {
            r#type: "order".to_string(),
            orders: vec![OrderRequest {
                asset: self.pair.asset_id,
                is_buy: side.is_buy(),
                limit_px,
                sz,
                reduce_only,
                order_type: OrderTypeWire::Limit(LimitOrderWire {
                    tif: tif.as_wire().to_string(),
                }),
            }],
            grouping: "na".to_string(),
        };

        let (sig, action_json) = signing::sign_order_action(&self.private_key, action, nonce).await?;
        let result = self.post_exchange(action_json, nonce, sig).await?;

        if result["status"].as_str() == Some("err") {
            return Err(GatewayError::Rejected(result["response"].to_string()));
        }

        let status = result["response"]["data"]["statuses"]
            .as_array()
            .and_then(|s| s.first())
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        if let Some(oid) = status["resting"]["oid"].as_u64() {
            return Ok(PlaceResult::Resting { oid });
        }
        if let Some(filled) = status.get("filled") {
            let qty = filled["totalSz"].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(size);
            let avg_px = filled["avgPx"].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(price);
            return Ok(PlaceResult::Filled { qty, avg_px });
        }
        if let Some(reason) = status["error"].as_str() {
            return Err(GatewayError::Rejected(reason.to_string()));
        }
        if let Some(reason) = status["rejected"]["reason"].as_str() {
            return Err(GatewayError::Rejected(reason.to_string()));
        }

        // Unrecognized shape — never silent.
        Err(GatewayError::Transport(format!("unrecognized place response: {status}")))
    }

    async fn cancel(&self, _coin: &str, oid: u64) -> Result<(), GatewayError> {
        let nonce = Self::nonce();
        let (sig, action_json) =
            signing::sign_cancel_action(&self.private_key, &[(self.pair.asset_id, oid)], nonce).await?;
        let result = self.post_exchange(action_json, nonce, sig).await?;
        if result["status"].as_str() == Some("err") {
            let msg = result["response"].to_string();
            if msg.contains("Unknown") || msg.contains("never placed") {
                return Err(GatewayError::Unknown);
            }
            return Err(GatewayError::Rejected(msg));
        }
        Ok(())
    }

    async fn bulk_cancel(
        &self,
        cancels: &[CancelRequest],
    ) -> Result<Vec<(u64, Result<(), GatewayError>)>, GatewayError> {
        if cancels.is_empty() {
            return Ok(Vec::new());
        }
        let nonce = Self::nonce();
        let pairs: Vec<(u32, u64)> = cancels.iter().map(|c| (self.pair.asset_id, c.oid)).collect();
        let (sig, action_json) = signing::sign_cancel_action(&self.private_key, &pairs, nonce).await?;
        let result = self.post_exchange(action_json, nonce, sig).await?;

        if result["status"].as_str() == Some("err") {
            return Err(GatewayError::Transport(result["response"].to_string()));
        }

        let statuses = result["response"]["data"]["statuses"].as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(cancels.len());
        for (i, c) in cancels.iter().enumerate() {
            let per_id = match statuses.get(i) {
                Some(s) if s.as_str() == Some("success") => Ok(()),
                Some(s) if s["error"].as_str().is_some() => Err(GatewayError::Unknown),
                other => Err(GatewayError::Transport(format!("unrecognized cancel status: {:?}", other))),
            };
            out.push((c.oid, per_id));
        }
        Ok(out)
    }

    async fn open_orders(&self, address: &str) -> Result<Vec<OpenOrderInfo>, GatewayError> {
        {
            let cache = self.cached_open_orders.lock().unwrap();
            if let Some((orders, ts)) = cache.as_ref() {
                if ts.elapsed() < CACHE_DURATION {
                    return Ok(orders.clone());
                }
            }
        }

        let data = self
            .post_info(serde_json::json!({ "type": "openOrders", "user": address }))
            .await?;

        let mut orders = Vec::new();
        if let Some(arr) = data.as_array() {
            for o in arr {
                let coin = o["coin"].as_str().unwrap_or("").to_string();
                if coin != self.pair.base_coin {
                    continue;
                }
                let Some(oid) = o["oid"].as_u64() else { continue };
                let side = if o["side"].as_str() == Some("B") { Side::Buy } else { Side::Sell };
                let price = o["limitPx"].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
                let remaining_size = o["sz"].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
                let opened_at = o["timestamp"].as_u64().unwrap_or(0);
                orders.push(OpenOrderInfo { oid, coin, side, price, remaining_size, opened_at });
            }
        }

        *self.cached_open_orders.lock().unwrap() = Some((orders.clone(), Instant::now()));
        Ok(orders)
    }

    async fn user_fills(&self, address: &str) -> Result<Vec<FillInfo>, GatewayError> {
        let data = self
            .post_info(serde_json::json!({ "type": "userFills", "user": address }))
            .await?;

        let mut fills = Vec::new();
        if let Some(arr) = data.as_array() {
            for f in arr {
                let coin = f["coin"].as_str().unwrap_or("").to_string();
                if coin != self.pair.base_coin {
                    continue;
                }
                let Some(hash) = f["hash"].as_str() else { continue };
                let side = if f["side"].as_str() == Some("B") { Side::Buy } else { Side::Sell };
                let size = f["sz"].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
                let price = f["px"].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
                let fee = f["fee"].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
                let ts = f["time"].as_u64().unwrap_or(0);
                fills.push(FillInfo { hash: hash.to_string(), coin, side, size, price, fee, ts });
            }
        }
        Ok(fills)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_to_wire_strips_trailing_zeros() {
        assert_eq!(float_to_wire(100.0), "100");
        assert_eq!(float_to_wire(0.0006), "0.0006");
        assert_eq!(float_to_wire(99961.0), "99961");
    }
}
