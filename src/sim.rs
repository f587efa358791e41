// In-memory venue for shadow/paper runs and as a test double for the
// Reconciler/Quoter. Orders rest until explicitly filled (as spot market-
// making requires) and a test-only `fill_order` hook lets a reconcile test
// drive a fill directly.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::gateway::{
    CancelRequest, ExchangeGateway, FillInfo, GatewayError, OpenOrderInfo, PlaceResult, Side, Tif,
};

struct RestingOrder {
    coin: String,
    side: Side,
    price: f64,
    original_size: f64,
    remaining_size: f64,
    opened_at: u64,
}

pub struct SimGateway {
    next_oid: AtomicU64,
    orders: Mutex<HashMap<u64, RestingOrder>>,
    fills: Mutex<Vec<FillInfo>>,
    clock_ms: AtomicU64,
}

impl SimGateway {
    pub fn new() -> Self {
        Self {
            next_oid: AtomicU64::new(1),
            orders: Mutex::new(HashMap::new()),
            fills: Mutex::new(Vec::new()),
            clock_ms: AtomicU64::new(0),
        }
    }

    pub fn advance_clock(&self, now_ms: u64) {
        self.clock_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Test/shadow-mode hook: fills `qty` of `oid` at its resting price,
    /// shrinking or removing the order and recording a fill the next
    /// `user_fills` call will surface.
    pub fn fill_order(&self, oid: u64, qty: f64) {
        let mut orders = self.orders.lock().unwrap();
        let Some(order) = orders.get_mut(&oid) else {
            return;
        };
        let filled = qty.min(order.remaining_size);
        order.remaining_size -= filled;

        self.fills.lock().unwrap().push(FillInfo {
            hash: format!("sim-{}-{}", oid, self.clock_ms.load(Ordering::SeqCst)),
            coin: order.coin.clone(),
            side: order.side,
            size: filled,
            price: order.price,
            fee: 0.0,
            ts: self.clock_ms.load(Ordering::SeqCst),
        });

        if order.remaining_size <= 0.0 {
            orders.remove(&oid);
        }
    }
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeGateway for SimGateway {
    async fn place(
        &self,
        pair: &str,
        side: Side,
        price: f64,
        size: f64,
        _tif: Tif,
        _reduce_only: bool,
    ) -> Result<PlaceResult, GatewayError> {
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let now = self.clock_ms.load(Ordering::SeqCst);
        self.orders.lock().unwrap().insert(
            oid,
            RestingOrder {
                coin: pair.to_string(),
                side,
                price,
                original_size: size,
                remaining_size: size,
                opened_at: now,
            },
        );
        Ok(PlaceResult::Resting { oid })
    }

    async fn cancel(&self, _coin: &str, oid: u64) -> Result<(), GatewayError> {
        let mut orders = self.orders.lock().unwrap();
        if orders.remove(&oid).is_some() {
            Ok(())
        } else {
            Err(GatewayError::Unknown)
        }
    }

    async fn bulk_cancel(
        &self,
        cancels: &[CancelRequest],
    ) -> Result<Vec<(u64, Result<(), GatewayError>)>, GatewayError> {
        let mut orders = self.orders.lock().unwrap();
        let mut out = Vec::with_capacity(cancels.len());
        for c in cancels {
            let result = if orders.remove(&c.oid).is_some() {
                Ok(())
            } else {
                Err(GatewayError::Unknown)
            };
            out.push((c.oid, result));
        }
        Ok(out)
    }

    async fn open_orders(&self, _address: &str) -> Result<Vec<OpenOrderInfo>, GatewayError> {
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .iter()
            .map(|(&oid, o)| OpenOrderInfo {
                oid,
                coin: o.coin.clone(),
                side: o.side,
                price: o.price,
                remaining_size: o.remaining_size,
                opened_at: o.opened_at,
            })
            .collect())
    }

    async fn user_fills(&self, _address: &str) -> Result<Vec<FillInfo>, GatewayError> {
        Ok(self.fills.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn place_then_cancel() {
        let sim = SimGateway::new();
        let PlaceResult::Resting { oid } = sim
            .place("UBTC/USDC", Side::Buy, 99961.0, 0.001, Tif::Gtc, false)
            .await
            .unwrap()
        else {
            panic!("expected resting");
        };
        assert_eq!(sim.open_orders("addr").await.unwrap().len(), 1);
        sim.cancel("UBTC", oid).await.unwrap();
        assert!(sim.open_orders("addr").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_unknown_is_unknown_error() {
        let sim = SimGateway::new();
        let err = sim.cancel("UBTC", 999).await.unwrap_err();
        matches!(err, GatewayError::Unknown);
    }

    #[tokio::test]
    async fn partial_fill_shrinks_remaining_and_emits_fill() {
        let sim = SimGateway::new();
        let PlaceResult::Resting { oid } = sim
            .place("UBTC/USDC", Side::Buy, 99961.0, 0.001, Tif::Gtc, false)
            .await
            .unwrap()
        else {
            panic!("expected resting");
        };
        sim.fill_order(oid, 0.0006);
        let open = sim.open_orders("addr").await.unwrap();
        assert_eq!(open.len(), 1);
        assert!((open[0].remaining_size - 0.0004).abs() < 1e-12);

        let fills = sim.user_fills("addr").await.unwrap();
        assert_eq!(fills.len(), 1);
        assert!((fills[0].size - 0.0006).abs() < 1e-12);
    }

    #[tokio::test]
    async fn full_fill_removes_order() {
        let sim = SimGateway::new();
        let PlaceResult::Resting { oid } = sim
            .place("UBTC/USDC", Side::Sell, 100041.0, 0.001, Tif::Gtc, false)
            .await
            .unwrap()
        else {
            panic!("expected resting");
        };
        sim.fill_order(oid, 0.001);
        assert!(sim.open_orders("addr").await.unwrap().is_empty());
    }
}
