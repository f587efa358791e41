// Periodically compares the Local Order Book against the venue's reported
// open orders and records fills, deduplicating by fill hash.
use std::collections::HashSet;

use crate::book::LocalOrderBook;
use crate::gateway::{FillInfo, GatewayError, OpenOrderInfo, Side};
use crate::inventory::InventoryLedger;

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Partial { oid: u64, filled_qty: f64, side: Side, price: f64 },
    Done { oid: u64, side: Side, price: f64, size: f64 },
}

/// Diffs `local` against the venue snapshot `remote`, mutating `local` in
/// place and returning one outcome per order that changed state. Treats
/// `remote` as authoritative for existence/remaining size and `local` as
/// authoritative for original size.
pub fn reconcile(local: &mut LocalOrderBook, remote: &[OpenOrderInfo]) -> Vec<ReconcileOutcome> {
    let remote_by_oid: std::collections::HashMap<u64, &OpenOrderInfo> =
        remote.iter().map(|o| (o.oid, o)).collect();

    let mut outcomes = Vec::new();

    for oid in local.order_ids() {
        let Some(local_order) = local.get(oid) else { continue };

        match remote_by_oid.get(&oid) {
            Some(remote_order) if remote_order.remaining_size < local_order.size => {
                let filled_qty = local_order.size - remote_order.remaining_size;
                let side = local_order.side;
                let price = local_order.price;
                local.shrink_on_partial(oid, remote_order.remaining_size);
                outcomes.push(ReconcileOutcome::Partial { oid, filled_qty, side, price });
            }
            Some(_) => {
                // unchanged
            }
            None => {
                let side = local_order.side;
                let price = local_order.price;
                let size = local_order.size;
                local.remove(oid);
                outcomes.push(ReconcileOutcome::Done { oid, side, price, size });
            }
        }
    }

    let venue_ids: HashSet<u64> = remote.iter().map(|o| o.oid).collect();
    local.retain_known(&venue_ids);

    outcomes
}

/// Process-lifetime fill-hash dedup set, scoped to the pair's base coin.
#[derive(Debug, Default)]
pub struct FillRecorder {
    seen_hashes: HashSet<String>,
}

impl FillRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters `fills` to `base_coin`, drops already-seen hashes, applies
    /// the rest to `ledger`, and returns the newly-applied fills for
    /// logging.
    pub fn record_fills(
        &mut self,
        fills: &[FillInfo],
        base_coin: &str,
        ledger: &mut InventoryLedger,
    ) -> Vec<FillInfo> {
        let mut applied = Vec::new();
        for fill in fills {
            if fill.coin != base_coin {
                continue;
            }
            if !self.seen_hashes.insert(fill.hash.clone()) {
                continue;
            }
            ledger.record_fill(fill.side, fill.size, fill.price);
            applied.push(fill.clone());
        }
        applied
    }
}

/// Seeds an empty Local Order Book directly from the venue's open-orders
/// snapshot on restart. Unlike `reconcile`, which
/// only ever diffs ids it already knows about, this populates entries for a
/// process that has no memory of its own resting orders yet. A no-op if
/// `local` is already non-empty — recovery only ever runs once, at startup.
pub async fn seed_from_snapshot(
    gateway: &dyn crate::gateway::ExchangeGateway,
    address: &str,
    local: &mut LocalOrderBook,
) -> Result<usize, GatewayError> {
    if !local.is_empty() {
        return Ok(0);
    }
    let remote = gateway.open_orders(address).await?;
    for o in &remote {
        local.upsert_on_place(crate::book::LocalOrder {
            order_id: o.oid,
            side: o.side,
            price: o.price,
            size: o.remaining_size,
            opened_at: o.opened_at,
            venue_coin: o.coin.clone(),
        });
    }
    Ok(remote.len())
}

/// Runs a full reconcile cycle: diff against `open_orders`, then record new
/// fills from `user_fills`, applying them to `ledger`. A `Transport` error
/// from either query aborts the cycle with no mutation — "absent" must
/// never be read as "gone".
pub async fn run_cycle(
    gateway: &dyn crate::gateway::ExchangeGateway,
    address: &str,
    base_coin: &str,
    local: &mut LocalOrderBook,
    ledger: &mut InventoryLedger,
    fill_recorder: &mut FillRecorder,
) -> Result<(Vec<ReconcileOutcome>, Vec<FillInfo>), GatewayError> {
    let remote = gateway.open_orders(address).await?;
    let outcomes = reconcile(local, &remote);

    let fills = gateway.user_fills(address).await?;
    let applied = fill_recorder.record_fills(&fills, base_coin, ledger);

    Ok((outcomes, applied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::LocalOrder;

    fn local_order(id: u64, side: Side, price: f64, size: f64) -> LocalOrder {
        LocalOrder { order_id: id, side, price, size, opened_at: 0, venue_coin: "UBTC".to_string() }
    }

    fn remote_order(oid: u64, coin: &str, side: Side, price: f64, remaining: f64) -> OpenOrderInfo {
        OpenOrderInfo { oid, coin: coin.to_string(), side, price, remaining_size: remaining, opened_at: 0 }
    }

    #[test]
    fn partial_fill_shrinks_and_reports() {
        let mut book = LocalOrderBook::new();
        book.upsert_on_place(local_order(1, Side::Buy, 99961.0, 0.001));
        let remote = vec![remote_order(1, "UBTC", Side::Buy, 99961.0, 0.0004)];

        let outcomes = reconcile(&mut book, &remote);
        assert_eq!(book.get(1).unwrap().size, 0.0004);
        match &outcomes[0] {
            ReconcileOutcome::Partial { filled_qty, .. } => assert!((filled_qty - 0.0006).abs() < 1e-12),
            _ => panic!("expected partial"),
        }
    }

    #[test]
    fn missing_order_is_done_and_removed() {
        let mut book = LocalOrderBook::new();
        book.upsert_on_place(local_order(1, Side::Sell, 100041.0, 0.001));
        let outcomes = reconcile(&mut book, &[]);
        assert!(!book.contains(1));
        match &outcomes[0] {
            ReconcileOutcome::Done { oid, .. } => assert_eq!(*oid, 1),
            _ => panic!("expected done"),
        }
    }

    #[test]
    fn unchanged_order_produces_no_outcome() {
        let mut book = LocalOrderBook::new();
        book.upsert_on_place(local_order(1, Side::Buy, 99961.0, 0.001));
        let remote = vec![remote_order(1, "UBTC", Side::Buy, 99961.0, 0.001)];
        let outcomes = reconcile(&mut book, &remote);
        assert!(outcomes.is_empty());
        assert!(book.contains(1));
    }

    #[tokio::test]
    async fn restart_recovery_populates_from_venue_snapshot() {
        use crate::gateway::{ExchangeGateway, Tif};
        use crate::sim::SimGateway;

        let gateway = SimGateway::new();
        gateway.place("UBTC/USDC", Side::Buy, 99961.0, 0.002, Tif::Gtc, false).await.unwrap();
        gateway.place("UBTC/USDC", Side::Sell, 100041.0, 0.002, Tif::Gtc, false).await.unwrap();

        let mut book = LocalOrderBook::new();
        let seeded = seed_from_snapshot(&gateway, "0xaddr", &mut book).await.unwrap();
        assert_eq!(seeded, 2);
        assert_eq!(book.len(), 2);

        // A second seed on an already-populated book is a no-op (recovery
        // only ever runs once, at startup).
        let seeded_again = seed_from_snapshot(&gateway, "0xaddr", &mut book).await.unwrap();
        assert_eq!(seeded_again, 0);

        let outcomes = reconcile(&mut book, &gateway.open_orders("0xaddr").await.unwrap());
        assert!(outcomes.is_empty());
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn fill_recorder_dedups_by_hash_and_filters_by_coin() {
        let mut recorder = FillRecorder::new();
        let mut ledger = InventoryLedger::new();
        let fills = vec![
            FillInfo { hash: "h1".to_string(), coin: "UBTC".to_string(), side: Side::Buy, size: 0.001, price: 100000.0, fee: 0.01, ts: 1 },
            FillInfo { hash: "h1".to_string(), coin: "UBTC".to_string(), side: Side::Buy, size: 0.001, price: 100000.0, fee: 0.01, ts: 1 },
            FillInfo { hash: "h2".to_string(), coin: "OTHER".to_string(), side: Side::Buy, size: 1.0, price: 1.0, fee: 0.0, ts: 2 },
        ];
        let applied = recorder.record_fills(&fills, "UBTC", &mut ledger);
        assert_eq!(applied.len(), 1);
        assert!((ledger.base_balance - 0.001).abs() < 1e-12);
    }
}
