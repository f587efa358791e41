// Environment-driven configuration covering every option a single-pair
// market-making agent needs at startup. Returns a typed error instead of
// `.expect()`-panicking so main() can log a stable prefix before exiting.
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required config: {key}"),
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub market: String,
    pub usd_order_size: f64,
    pub spread: f64,
    pub check_interval: Duration,
    pub reprice_threshold: f64,
    pub max_order_age: Duration,
    pub price_expiry_threshold: f64,
    pub max_base_position: f64,
    pub crash_threshold: f64,
    pub crash_window: Duration,
    pub cooldown_after_crash: Duration,
    pub price_tick_override: Option<f64>,
    pub extra_sell_levels: u32,
    pub shadow_mode: bool,
    pub base_url: String,
    pub account_address: String,
    pub private_key: String,
}

fn env_or(key: &'static str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_f64(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw.to_string() })
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw.to_string() })
}

impl BotConfig {
    /// Reads every tunable from the environment, falling back to sane
    /// defaults where the value is operator-tunable rather than a fixed
    /// constant (`check_interval`, `crash_window`, etc.).
    pub fn from_env() -> Result<Self, ConfigError> {
        let market = std::env::var("MM_MARKET").map_err(|_| ConfigError::Missing("MM_MARKET"))?;

        let usd_order_size = parse_f64("MM_USD_ORDER_SIZE", &env_or("MM_USD_ORDER_SIZE", "100"))?;
        let spread = parse_f64("MM_SPREAD", &env_or("MM_SPREAD", "0.0004"))?;
        let check_interval_s = parse_u64("MM_CHECK_INTERVAL_SECS", &env_or("MM_CHECK_INTERVAL_SECS", "5"))?;
        let reprice_threshold = parse_f64("MM_REPRICE_THRESHOLD", &env_or("MM_REPRICE_THRESHOLD", "0.005"))?;
        let max_order_age_s = parse_u64("MM_MAX_ORDER_AGE_SECS", &env_or("MM_MAX_ORDER_AGE_SECS", "60"))?;
        let price_expiry_threshold =
            parse_f64("MM_PRICE_EXPIRY_THRESHOLD", &env_or("MM_PRICE_EXPIRY_THRESHOLD", "50"))?;
        let max_base_position = parse_f64("MM_MAX_BASE_POSITION", &env_or("MM_MAX_BASE_POSITION", "0.1"))?;
        let crash_threshold = parse_f64("MM_CRASH_THRESHOLD", &env_or("MM_CRASH_THRESHOLD", "0.01"))?;
        let crash_window_s = parse_u64("MM_CRASH_WINDOW_SECS", &env_or("MM_CRASH_WINDOW_SECS", "60"))?;
        let cooldown_s = parse_u64("MM_COOLDOWN_AFTER_CRASH_SECS", &env_or("MM_COOLDOWN_AFTER_CRASH_SECS", "180"))?;
        let extra_sell_levels =
            parse_u64("MM_EXTRA_SELL_LEVELS", &env_or("MM_EXTRA_SELL_LEVELS", "0"))? as u32;

        let price_tick_override = match std::env::var("MM_PRICE_TICK") {
            Ok(raw) => Some(parse_f64("MM_PRICE_TICK", &raw)?),
            Err(_) => None,
        };

        let shadow_mode = env_or("MM_SHADOW_MODE", "true") != "false";

        let base_url = env_or("HL_API_URL", "https://api.hyperliquid.xyz");
        let account_address = std::env::var("HL_ADDRESS").unwrap_or_default();
        let private_key = std::env::var("HL_PRIVATE_KEY").unwrap_or_default();

        if !shadow_mode && (account_address.is_empty() || private_key.is_empty()) {
            return Err(ConfigError::Missing("HL_ADDRESS/HL_PRIVATE_KEY (required outside shadow mode)"));
        }

        Ok(Self {
            market,
            usd_order_size,
            spread,
            check_interval: Duration::from_secs(check_interval_s),
            reprice_threshold,
            max_order_age: Duration::from_secs(max_order_age_s),
            price_expiry_threshold,
            max_base_position,
            crash_threshold,
            crash_window: Duration::from_secs(crash_window_s),
            cooldown_after_crash: Duration::from_secs(cooldown_s),
            price_tick_override,
            extra_sell_levels,
            shadow_mode,
            base_url,
            account_address,
            private_key,
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            market: "UBTC/USDC".to_string(),
            usd_order_size: 100.0,
            spread: 0.0004,
            check_interval: Duration::from_secs(5),
            reprice_threshold: 0.005,
            max_order_age: Duration::from_secs(60),
            price_expiry_threshold: 50.0,
            max_base_position: 0.1,
            crash_threshold: 0.01,
            crash_window: Duration::from_secs(60),
            cooldown_after_crash: Duration::from_secs(180),
            price_tick_override: None,
            extra_sell_levels: 0,
            shadow_mode: true,
            base_url: "https://api.hyperliquid.xyz".to_string(),
            account_address: "0xaddr".to_string(),
            private_key: "0x0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // cargo test's default runner is multi-threaded; these two tests both
    // mutate process-wide env vars (MM_MARKET, MM_SPREAD), so without this
    // guard they can race and observe each other's half-set/half-removed
    // state. Every test touching env vars in this module must lock it
    // first.
    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_market_is_an_error() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::remove_var("MM_MARKET");
        let err = BotConfig::from_env().unwrap_err();
        matches!(err, ConfigError::Missing("MM_MARKET"));
    }

    #[test]
    fn invalid_numeric_value_is_reported() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::set_var("MM_MARKET", "UBTC/USDC");
        std::env::set_var("MM_SPREAD", "not-a-number");
        let err = BotConfig::from_env().unwrap_err();
        match err {
            ConfigError::Invalid { key, .. } => assert_eq!(key, "MM_SPREAD"),
            _ => panic!("expected invalid"),
        }
        std::env::remove_var("MM_SPREAD");
        std::env::remove_var("MM_MARKET");
    }
}
