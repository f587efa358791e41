// Running signed base/quote balances updated from observed fills, plus the
// inventory-skew calculation used to shape quote spreads.
use crate::gateway::Side;

#[derive(Debug, Default, Clone, Copy)]
pub struct InventoryLedger {
    pub base_balance: f64,
    pub quote_balance: f64,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an observed fill. Only the Reconciler (or an immediate-fill
    /// place acknowledgement) may call this.
    pub fn record_fill(&mut self, side: Side, qty: f64, price: f64) {
        match side {
            Side::Buy => {
                self.base_balance += qty;
                self.quote_balance -= qty * price;
            }
            Side::Sell => {
                self.base_balance -= qty;
                self.quote_balance += qty * price;
            }
        }
    }

    /// `clamp(base / max_base_position, -1, 1)`. Positive skew means the
    /// agent is long and should widen its buy spread / tighten its sell.
    pub fn skew(&self, max_base_position: f64) -> f64 {
        if max_base_position <= 0.0 {
            return 0.0;
        }
        (self.base_balance / max_base_position).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_fill_increases_base_decreases_quote() {
        let mut ledger = InventoryLedger::new();
        ledger.record_fill(Side::Buy, 0.0006, 99961.0);
        assert!((ledger.base_balance - 0.0006).abs() < 1e-12);
        assert!((ledger.quote_balance - (-0.0006 * 99961.0)).abs() < 1e-6);
    }

    #[test]
    fn sell_fill_decreases_base_increases_quote() {
        let mut ledger = InventoryLedger::new();
        ledger.record_fill(Side::Sell, 0.001, 100041.0);
        assert!((ledger.base_balance + 0.001).abs() < 1e-12);
        assert!((ledger.quote_balance - 0.001 * 100041.0).abs() < 1e-6);
    }

    #[test]
    fn skew_saturates_at_bounds() {
        let mut ledger = InventoryLedger::new();
        ledger.base_balance = 1.0;
        assert_eq!(ledger.skew(0.1), 1.0);
        ledger.base_balance = -1.0;
        assert_eq!(ledger.skew(0.1), -1.0);
        ledger.base_balance = 0.0;
        assert_eq!(ledger.skew(0.1), 0.0);
    }

    #[test]
    fn skew_scales_within_bounds() {
        let mut ledger = InventoryLedger::new();
        ledger.base_balance = 0.05;
        assert_eq!(ledger.skew(0.1), 0.5);
    }
}
