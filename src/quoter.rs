// Decides which orders to cancel, reprice, or place: inventory-skew shaped
// spreads around mid, a cancel-expired -> reprice -> ensure tick sequence,
// a startup seed order, and an optional single-side sell ladder.
use log::{info, warn};

use crate::book::LocalOrderBook;
use crate::gateway::{ExchangeGateway, GatewayError, PlaceResult, Side, Tif};
use crate::inventory::InventoryLedger;
use crate::market::TradingPair;

#[derive(Debug, Clone)]
pub struct QuoterConfig {
    pub usd_order_size: f64,
    pub spread: f64,
    pub max_order_age_ms: u64,
    pub price_expiry_threshold: f64,
    pub reprice_threshold: f64,
    pub max_base_position: f64,
    pub extra_sell_levels: u32,
}

/// Per-side quote state machine: `Absent -> Placed -> [Partial]* -> Terminal`.
/// The Quoter itself only needs `sell_ref_price` and which extra-sell
/// levels are currently placed; the rest of the state machine lives in
/// `LocalOrderBook` + `Reconciler`.
#[derive(Debug, Default)]
pub struct Quoter {
    pub startup_seeded: bool,
    sell_ref_price: Option<f64>,
    extra_sells_placed: Vec<(u32, u64)>, // (level, oid)
}

impl Quoter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places the one-shot startup seed order the first time a ready BBO is
    /// observed: a single buy at `mid * (1 - eps)`.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_startup_seed(
        &mut self,
        gateway: &dyn ExchangeGateway,
        pair: &TradingPair,
        mid: f64,
        startup_size: f64,
        local: &mut LocalOrderBook,
        ledger: &mut InventoryLedger,
        now_ms: u64,
    ) {
        if self.startup_seeded {
            return;
        }
        self.startup_seeded = true;

        // Restart recovery may have already seeded a resting buy from the
        // venue's own snapshot before the first BBO ever went ready; the
        // seed order is only for a genuinely cold start, not on top of an
        // already-open side.
        if local.has_side(Side::Buy) {
            return;
        }

        const EPS: f64 = 0.0001;
        let price = pair.round_price(mid * (1.0 - EPS));
        let size = pair.round_size(startup_size);

        match gateway.place(&pair.symbol, Side::Buy, price, size, Tif::Gtc, false).await {
            Ok(PlaceResult::Resting { oid }) => {
                info!("[QUOTER] startup seed buy oid={} price={} size={}", oid, price, size);
                local.record_new_place(crate::book::LocalOrder {
                    order_id: oid,
                    side: Side::Buy,
                    price,
                    size,
                    opened_at: now_ms,
                    venue_coin: pair.base_coin.clone(),
                });
            }
            Ok(PlaceResult::Filled { qty, avg_px }) => {
                info!("[QUOTER] startup seed buy filled instantly {} @ {}", qty, avg_px);
                ledger.record_fill(Side::Buy, qty, avg_px);
            }
            Err(e) => warn!("[QUOTER] startup seed buy failed: {}", e),
        }
    }

    /// Step 1: cancel any local order old enough *and* drifted enough from
    /// mid (both conditions required).
    pub async fn cancel_expired(
        &mut self,
        gateway: &dyn ExchangeGateway,
        pair: &TradingPair,
        mid: f64,
        local: &mut LocalOrderBook,
        config: &QuoterConfig,
        now_ms: u64,
    ) {
        let stale: Vec<u64> = local
            .iter()
            .filter(|o| {
                let age = now_ms.saturating_sub(o.opened_at);
                age as u64 >= config.max_order_age_ms
                    && (mid - o.price).abs() >= config.price_expiry_threshold
            })
            .map(|o| o.order_id)
            .collect();

        for oid in stale {
            match gateway.cancel(&pair.base_coin, oid).await {
                Ok(()) | Err(GatewayError::Unknown) => {
                    local.remove(oid);
                }
                Err(e) => warn!("[QUOTER] cancel-expired failed for oid={}: {}", oid, e),
            }
        }
    }

    /// Step 2: cancel orders whose relative drift from mid exceeds
    /// `reprice_threshold`. Replacement happens in `ensure`.
    pub async fn reprice(
        &mut self,
        gateway: &dyn ExchangeGateway,
        pair: &TradingPair,
        mid: f64,
        local: &mut LocalOrderBook,
        config: &QuoterConfig,
    ) {
        let drifted: Vec<u64> = local
            .iter()
            .filter(|o| {
                let denom = if o.price != 0.0 { o.price } else { 1.0 };
                ((mid - o.price) / denom).abs() > config.reprice_threshold
            })
            .map(|o| o.order_id)
            .collect();

        for oid in drifted {
            match gateway.cancel(&pair.base_coin, oid).await {
                Ok(()) | Err(GatewayError::Unknown) => {
                    local.remove(oid);
                }
                Err(e) => warn!("[QUOTER] reprice cancel failed for oid={}: {}", oid, e),
            }
        }
    }

    /// Step 3: compute skew-adjusted spreads and place any missing side.
    /// Also drives the optional extra-sell ladder.
    #[allow(clippy::too_many_arguments)]
    pub async fn ensure(
        &mut self,
        gateway: &dyn ExchangeGateway,
        pair: &TradingPair,
        mid: f64,
        skew: f64,
        local: &mut LocalOrderBook,
        ledger: &mut InventoryLedger,
        config: &QuoterConfig,
        now_ms: u64,
    ) {
        let buy_spread = config.spread * (1.0 + skew);
        let sell_spread = config.spread * (1.0 - skew);

        if !local.has_side(Side::Buy) {
            let price = pair.round_price(mid * (1.0 - buy_spread));
            let size = pair.round_size(config.usd_order_size / price);
            self.place_side(gateway, pair, Side::Buy, price, size, local, ledger, now_ms).await;
        }

        if !local.has_side(Side::Sell) {
            let price = pair.round_price(mid * (1.0 + sell_spread));
            let size = pair.round_size(config.usd_order_size / price);
            self.sell_ref_price = Some(price);
            self.place_side(gateway, pair, Side::Sell, price, size, local, ledger, now_ms).await;
        } else if self.sell_ref_price.is_none() {
            // Baseline sell predates this process (e.g. restart recovery);
            // seed the reference price from whichever local sell exists.
            self.sell_ref_price = local.iter().find(|o| o.side == Side::Sell).map(|o| o.price);
        }

        self.maintain_extra_sell_ladder(gateway, pair, mid, local, ledger, config, now_ms).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn place_side(
        &mut self,
        gateway: &dyn ExchangeGateway,
        pair: &TradingPair,
        side: Side,
        price: f64,
        size: f64,
        local: &mut LocalOrderBook,
        ledger: &mut InventoryLedger,
        now_ms: u64,
    ) {
        // Sizes below the pair's minimum-notional are skipped, not zeroed.
        if size <= 0.0 {
            return;
        }

        match gateway.place(&pair.symbol, side, price, size, Tif::Gtc, false).await {
            Ok(PlaceResult::Resting { oid }) => {
                local.record_new_place(crate::book::LocalOrder {
                    order_id: oid,
                    side,
                    price,
                    size,
                    opened_at: now_ms,
                    venue_coin: pair.base_coin.clone(),
                });
            }
            Ok(PlaceResult::Filled { qty, avg_px }) => {
                info!("[QUOTER] {} filled instantly {} @ {}", side, qty, avg_px);
                ledger.record_fill(side, qty, avg_px);
            }
            Err(GatewayError::Rejected(reason)) => {
                warn!("[QUOTER] {} rejected: {}", side, reason);
            }
            Err(e) => warn!("[QUOTER] {} place failed: {}", side, e),
        }
    }

    /// If `sell_ref_price` has dropped away from `mid` by enough, places the
    /// next unplaced extra-sell level; clears tracking once the baseline
    /// sell disappears.
    #[allow(clippy::too_many_arguments)]
    async fn maintain_extra_sell_ladder(
        &mut self,
        gateway: &dyn ExchangeGateway,
        pair: &TradingPair,
        mid: f64,
        local: &mut LocalOrderBook,
        ledger: &mut InventoryLedger,
        config: &QuoterConfig,
        now_ms: u64,
    ) {
        if config.extra_sell_levels == 0 {
            return;
        }

        let Some(sell_ref) = self.sell_ref_price else {
            self.extra_sells_placed.clear();
            return;
        };

        if !local.has_side(Side::Sell) {
            self.sell_ref_price = None;
            self.extra_sells_placed.clear();
            return;
        }

        for level in 1..=config.extra_sell_levels {
            if self.extra_sells_placed.iter().any(|&(l, _)| l == level) {
                continue;
            }
            let threshold = (level as f64 + 1.0) * 2.0 * config.spread * mid;
            if sell_ref - mid < threshold {
                break; // levels are ordered; a farther one can't be due yet
            }
            let price = pair.round_price(sell_ref + (level as f64 + 1.0) * 2.0 * config.spread * mid);
            let size = pair.round_size(config.usd_order_size / price);
            if size <= 0.0 {
                continue;
            }
            match gateway.place(&pair.symbol, Side::Sell, price, size, Tif::Gtc, false).await {
                Ok(PlaceResult::Resting { oid }) => {
                    local.record_new_place(crate::book::LocalOrder {
                        order_id: oid,
                        side: Side::Sell,
                        price,
                        size,
                        opened_at: now_ms,
                        venue_coin: pair.base_coin.clone(),
                    });
                    self.extra_sells_placed.push((level, oid));
                }
                Ok(PlaceResult::Filled { qty, avg_px }) => {
                    info!("[QUOTER] extra sell L{} filled instantly {} @ {}", level, qty, avg_px);
                    ledger.record_fill(Side::Sell, qty, avg_px);
                }
                Err(e) => warn!("[QUOTER] extra sell L{} place failed: {}", level, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimGateway;
    use std::collections::HashMap;

    fn pair() -> TradingPair {
        let mut universe = HashMap::new();
        universe.insert(
            "UBTC".to_string(),
            crate::market::VenueAssetMeta { asset_id: 1, size_decimals: 5, price_tick: 1.0 },
        );
        TradingPair::resolve(&universe, "UBTC/USDC", None).unwrap()
    }

    fn config() -> QuoterConfig {
        QuoterConfig {
            usd_order_size: 100.0,
            spread: 0.0004,
            max_order_age_ms: 60_000,
            price_expiry_threshold: 50.0,
            reprice_threshold: 0.005,
            max_base_position: 0.1,
            extra_sell_levels: 0,
        }
    }

    #[tokio::test]
    async fn symmetric_quoting_at_steady_mid_matches_worked_example() {
        let gateway = SimGateway::new();
        let pair = pair();
        let mut quoter = Quoter::new();
        let mut book = LocalOrderBook::new();
        let mut ledger = InventoryLedger::new();
        let mid = 100001.0;

        quoter.ensure(&gateway, &pair, mid, 0.0, &mut book, &mut ledger, &config(), 0).await;

        let buy = book.iter().find(|o| o.side == Side::Buy).unwrap();
        let sell = book.iter().find(|o| o.side == Side::Sell).unwrap();
        assert_eq!(buy.price, 99961.0);
        assert_eq!(sell.price, 100041.0);
    }

    #[tokio::test]
    async fn ensure_is_idempotent_when_both_sides_present() {
        let gateway = SimGateway::new();
        let pair = pair();
        let mut quoter = Quoter::new();
        let mut book = LocalOrderBook::new();
        let mut ledger = InventoryLedger::new();
        let mid = 100001.0;

        quoter.ensure(&gateway, &pair, mid, 0.0, &mut book, &mut ledger, &config(), 0).await;
        let count_before = book.len();
        quoter.ensure(&gateway, &pair, mid, 0.0, &mut book, &mut ledger, &config(), 1).await;
        assert_eq!(book.len(), count_before);
    }

    #[tokio::test]
    async fn skew_widens_buy_and_tightens_sell_when_long() {
        let gateway = SimGateway::new();
        let pair = pair();
        let mut quoter = Quoter::new();
        let mut book = LocalOrderBook::new();
        let mut ledger = InventoryLedger::new();
        let mid = 100000.0;
        let cfg = config();

        quoter.ensure(&gateway, &pair, mid, 0.5, &mut book, &mut ledger, &cfg, 0).await;

        let buy = book.iter().find(|o| o.side == Side::Buy).unwrap();
        let sell = book.iter().find(|o| o.side == Side::Sell).unwrap();
        let buy_spread = (mid - buy.price) / mid;
        let sell_spread = (sell.price - mid) / mid;
        assert!(buy_spread > cfg.spread);
        assert!(sell_spread < cfg.spread);
    }

    #[tokio::test]
    async fn reprice_drift_scenario_cancels_stale_order() {
        let gateway = SimGateway::new();
        let pair = pair();
        let mut quoter = Quoter::new();
        let mut book = LocalOrderBook::new();
        let mut ledger = InventoryLedger::new();

        quoter.ensure(&gateway, &pair, 100001.0, 0.0, &mut book, &mut ledger, &config(), 0).await;
        let buy_oid = book.iter().find(|o| o.side == Side::Buy).unwrap().order_id;

        quoter.reprice(&gateway, &pair, 101200.0, &mut book, &config()).await;
        assert!(!book.contains(buy_oid));
    }

    #[tokio::test]
    async fn startup_seed_places_once() {
        let gateway = SimGateway::new();
        let pair = pair();
        let mut quoter = Quoter::new();
        let mut book = LocalOrderBook::new();
        let mut ledger = InventoryLedger::new();

        quoter.place_startup_seed(&gateway, &pair, 100001.0, 100.0, &mut book, &mut ledger, 0).await;
        assert_eq!(book.len(), 1);
        quoter.place_startup_seed(&gateway, &pair, 100001.0, 100.0, &mut book, &mut ledger, 1).await;
        assert_eq!(book.len(), 1);
    }

    #[tokio::test]
    async fn startup_seed_skips_when_restart_recovery_already_has_a_buy() {
        let gateway = SimGateway::new();
        let pair = pair();
        let mut quoter = Quoter::new();
        let mut book = LocalOrderBook::new();
        let mut ledger = InventoryLedger::new();
        book.upsert_on_place(crate::book::LocalOrder {
            order_id: 99,
            side: Side::Buy,
            price: 99961.0,
            size: 0.001,
            opened_at: 0,
            venue_coin: pair.base_coin.clone(),
        });

        quoter.place_startup_seed(&gateway, &pair, 100001.0, 100.0, &mut book, &mut ledger, 5).await;
        assert_eq!(book.len(), 1);
        assert!(book.contains(99));
    }
}
