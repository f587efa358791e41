// spotmm-engine: single-pair spot market-making agent.
mod book;
mod bot;
mod config;
mod feed;
mod gateway;
mod hyperliquid;
mod inventory;
mod market;
mod quoter;
mod reconcile;
mod safety;
mod signing;
mod sim;
mod ws;

use std::sync::{Arc, Mutex};

use gateway::ExchangeGateway;

fn fatal(component: &str, msg: impl std::fmt::Display) -> ! {
    log::error!("[{component}] {msg}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("spotmm-engine starting");

    let cfg = match config::BotConfig::from_env() {
        Ok(c) => c,
        Err(e) => fatal("CONFIG", e),
    };

    log::info!(
        "  market={} shadow_mode={} check_interval={:?}",
        cfg.market,
        cfg.shadow_mode,
        cfg.check_interval
    );

    let universe = if cfg.shadow_mode {
        // Shadow mode never talks to the venue for placement, but the pair
        // still needs resolved precisions; a single-entry universe with the
        // configured (or default) price_tick stands in for the real one.
        let mut u = std::collections::HashMap::new();
        u.insert(
            cfg.market.split('/').next().unwrap_or("").to_string(),
            market::VenueAssetMeta {
                asset_id: 0,
                size_decimals: 5,
                price_tick: cfg.price_tick_override.unwrap_or(1.0),
            },
        );
        u
    } else {
        match hyperliquid::HyperliquidGateway::fetch_spot_universe(&cfg.base_url).await {
            Ok(u) => u,
            Err(e) => fatal("MARKET", format!("failed to fetch spot universe: {e}")),
        }
    };

    let pair = match market::TradingPair::resolve(&universe, &cfg.market, cfg.price_tick_override) {
        Ok(p) => p,
        Err(e) => fatal("MARKET", e),
    };
    log::info!("  resolved pair: {} (asset_id={})", pair.symbol_code(), pair.asset_id);

    let gateway: Arc<dyn ExchangeGateway> = if cfg.shadow_mode {
        Arc::new(sim::SimGateway::new())
    } else {
        Arc::new(hyperliquid::HyperliquidGateway::new(
            cfg.base_url.clone(),
            cfg.account_address.clone(),
            cfg.private_key.clone(),
            pair.clone(),
        ))
    };

    let feed = Arc::new(Mutex::new(feed::PriceFeedState::new(cfg.crash_window.as_millis() as u64)));
    let first_bbo = feed::new_first_bbo_flag();

    {
        let coin = pair.base_coin.clone();
        let feed = feed.clone();
        let first_bbo = first_bbo.clone();
        tokio::spawn(async move {
            if let Err(e) = ws::connect_and_listen(coin, feed, first_bbo).await {
                log::error!("[FEED] ingestor task exited: {}", e);
            }
        });
    }

    let address = cfg.account_address.clone();
    let bot = Arc::new(bot::Bot::new(gateway, pair, address, cfg, feed, first_bbo));

    log::info!("entering control loop");
    bot::spawn(bot).await.ok();
}
