// Resolves the traded pair's venue symbol and precisions once at startup,
// failing fast with a typed error rather than `.expect()`-panicking — an
// unknown pair must be a fatal, logged startup error, not a bare panic.
use std::collections::HashMap;
use std::fmt;

/// One entry from the venue's spot-universe reference data.
#[derive(Debug, Clone)]
pub struct VenueAssetMeta {
    pub asset_id: u32,
    pub size_decimals: u32,
    pub price_tick: f64,
}

#[derive(Debug)]
pub enum MarketError {
    UnknownPair(String),
}

impl fmt::Display for MarketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketError::UnknownPair(m) => write!(f, "unknown trading pair: {m}"),
        }
    }
}

impl std::error::Error for MarketError {}

/// Immutable once constructed. `round_price`/`round_size` are the only
/// sanctioned way to quantize a value before it reaches the Gateway.
#[derive(Debug, Clone)]
pub struct TradingPair {
    pub symbol: String,
    pub base_coin: String,
    pub asset_id: u32,
    pub size_decimals: u32,
    pub price_tick: f64,
}

impl TradingPair {
    /// `market` is `BASE/QUOTE`. Looks `BASE` up in the venue universe.
    pub fn resolve(
        universe: &HashMap<String, VenueAssetMeta>,
        market: &str,
        override_price_tick: Option<f64>,
    ) -> Result<Self, MarketError> {
        let base_coin = market
            .split('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MarketError::UnknownPair(market.to_string()))?
            .to_string();

        let meta = universe
            .get(&base_coin)
            .ok_or_else(|| MarketError::UnknownPair(market.to_string()))?;

        Ok(Self {
            symbol: market.to_string(),
            base_coin,
            asset_id: meta.asset_id,
            size_decimals: meta.size_decimals,
            price_tick: override_price_tick.unwrap_or(meta.price_tick),
        })
    }

    pub fn symbol_code(&self) -> &str {
        &self.symbol
    }

    /// Nearest-tick rounding; ties round up (toward positive infinity).
    /// Prices in this domain are always positive, so the tie-break is
    /// stable run to run.
    pub fn round_price(&self, raw: f64) -> f64 {
        if self.price_tick <= 0.0 {
            return raw;
        }
        let units = raw / self.price_tick;
        let floor = units.floor();
        let frac = units - floor;
        let rounded_units = if frac < 0.5 { floor } else { floor + 1.0 };
        rounded_units * self.price_tick
    }

    /// Truncation (not rounding) to `size_decimals` fractional digits.
    pub fn round_size(&self, raw: f64) -> f64 {
        let factor = 10f64.powi(self.size_decimals as i32);
        (raw * factor).floor() / factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe() -> HashMap<String, VenueAssetMeta> {
        let mut m = HashMap::new();
        m.insert(
            "UBTC".to_string(),
            VenueAssetMeta {
                asset_id: 3,
                size_decimals: 5,
                price_tick: 1.0,
            },
        );
        m
    }

    #[test]
    fn resolves_known_pair() {
        let pair = TradingPair::resolve(&universe(), "UBTC/USDC", None).unwrap();
        assert_eq!(pair.base_coin, "UBTC");
        assert_eq!(pair.asset_id, 3);
        assert_eq!(pair.size_decimals, 5);
    }

    #[test]
    fn unknown_pair_is_fatal() {
        let err = TradingPair::resolve(&universe(), "XYZ/USDC", None).unwrap_err();
        matches!(err, MarketError::UnknownPair(_));
    }

    #[test]
    fn round_price_ties_round_up() {
        let pair = TradingPair::resolve(&universe(), "UBTC/USDC", None).unwrap();
        assert_eq!(pair.round_price(99960.9996), 99961.0);
        assert_eq!(pair.round_price(100.5), 101.0);
        assert_eq!(pair.round_price(100.4999), 100.0);
    }

    #[test]
    fn round_size_truncates() {
        let pair = TradingPair::resolve(&universe(), "UBTC/USDC", None).unwrap();
        assert_eq!(pair.round_size(0.00100049), 0.00100);
    }
}
