use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use orderflow_engine::config::Config;
use orderflow_engine::feed::ReplayFeed;
use orderflow_engine::models::{Candle, Direction};
use orderflow_engine::plans::{EntryLevel, PlanSpec, PlanStore};
use orderflow_engine::scheduler::MonitoringScheduler;
use orderflow_engine::trading::PaperExecution;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let symbol = cfg.symbol.clone();
    let feed = Arc::new(demo_feed(&cfg));
    let execution = Box::new(PaperExecution::new(
        cfg.fee_rate,
        cfg.slippage_rate,
        cfg.min_stop_distance,
    ));
    let store = PlanStore::new().shared();

    // Seed one standing plan against the replayed data
    store.write().await.create_plan(PlanSpec {
        symbol: symbol.clone(),
        direction: Direction::Long,
        entry_levels: vec![EntryLevel {
            price: 50000.0,
            weight: None,
            stop_offset: 300.0,
            target_offset: 600.0,
        }],
        volume: 0.5,
        tolerance: 200.0,
        conditions: Default::default(),
        expires_at: Some(Utc::now() + Duration::hours(24)),
    })?;

    let shared_config = cfg.shared();
    let mut scheduler =
        MonitoringScheduler::new(shared_config, feed, execution, store).await;
    scheduler.run().await?;

    Ok(())
}

/// An in-memory feed with a gently oscillating series around the demo
/// plan's entry, so a run shows the full trigger/exit lifecycle.
fn demo_feed(cfg: &Config) -> ReplayFeed {
    let feed = ReplayFeed::new();
    let base = Utc::now() - Duration::minutes(120);

    let candles: Vec<Candle> = (0..120)
        .map(|i| {
            let phase = i as f64 / 15.0;
            let close = 50000.0 + 400.0 * phase.sin();
            Candle {
                timestamp: base + Duration::minutes(i),
                open: close - 10.0,
                high: close + 40.0,
                low: close - 40.0,
                close,
                volume: 500.0,
            }
        })
        .collect();

    let trades = (0..600)
        .map(|i| orderflow_engine::models::AggTrade {
            symbol: cfg.symbol.clone(),
            side: if i % 3 == 0 {
                orderflow_engine::models::TradeSide::Sell
            } else {
                orderflow_engine::models::TradeSide::Buy
            },
            quantity: 0.4 + (i % 7) as f64 * 0.1,
            price: 50000.0,
            timestamp: base + Duration::seconds(i * 12),
        })
        .collect();

    feed.load_bars(&cfg.symbol, cfg.bars_timeframe, candles);
    feed.load_trades(&cfg.symbol, trades);
    feed.set_imbalance(&cfg.symbol, 0.15);
    feed
}
