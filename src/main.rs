use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use updownbot::api::{CoinbasePriceClient, PriceSource, TelegramNotifier};
use updownbot::config::Settings;
use updownbot::engine::{Collaborators, Engine, TickSummary};
use updownbot::execution::PaperBackend;
use updownbot::persistence::RedisPersistence;
use updownbot::session::WindowSessionSource;
use updownbot::telemetry::{
    AuditSink, CompositeAuditSink, CsvAuditSink, LogNotifier, Notifier, TracingAuditSink,
};

const REDIS_NAMESPACE: &str = "updownbot";

#[derive(Parser, Debug)]
#[command(name = "updownbot", about = "Paper-trades 15 minute up/down windows")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,

    /// Resume ledger and rotation state from the Redis checkpoint
    #[arg(long)]
    restore: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;

    tracing::info!("🚀 UpDownBot starting");
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Window: {} min", settings.window.width_minutes);
    tracing::info!(
        "  Settlement Delay: {} min",
        settings.window.settlement_delay_minutes
    );
    tracing::info!("  Initial Balance: ${}", settings.account.initial_balance);
    tracing::info!("  Feed: {} {}", settings.feed.base_url, settings.feed.product);

    let prices: Arc<dyn PriceSource> = Arc::new(CoinbasePriceClient::new(
        settings.feed.base_url.clone(),
        settings.feed.product.clone(),
        settings.feed.requests_per_minute,
    )?);

    let notifier = build_notifier(&settings)?;
    let collaborators = Collaborators {
        prices: prices.clone(),
        sessions: Arc::new(WindowSessionSource::new(
            settings.window.session_prefix.clone(),
            prices,
        )),
        backend: Arc::new(PaperBackend::new()),
        audit: build_audit_sink(&settings)?,
        notifier: notifier.clone(),
    };

    let mut engine = Engine::new(&settings, collaborators)?;
    let mut persistence = connect_to_redis(settings.redis_url.as_deref()).await;

    if args.restore {
        match persistence.as_mut() {
            Some(redis) => restore_checkpoint(&mut engine, redis).await?,
            None => tracing::warn!("--restore given but Redis is not configured, starting fresh"),
        }
    }

    notifier
        .send(&format!(
            "🤖 UpDownBot started | balance {}",
            engine.summary()?.cash_balance
        ))
        .await;

    if args.once {
        let summary = engine.tick(Utc::now()).await?;
        persist(&engine, persistence.as_mut(), &summary).await;
        log_tick(&summary);
        return Ok(());
    }

    let mut ticker = interval(settings.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("✅ Trading loop running every {:?}", settings.tick_interval());
    tracing::info!("\nPress Ctrl+C to stop...\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = ticker.tick() => {
                match engine.tick(Utc::now()).await {
                    Ok(summary) => {
                        persist(&engine, persistence.as_mut(), &summary).await;
                        log_tick(&summary);
                    }
                    Err(e) => {
                        // Already logged and notified by the engine
                        persist_checkpoint(&engine, persistence.as_mut()).await;
                        return Err(e).context("trading loop halted");
                    }
                }
            }
        }
    }

    persist_checkpoint(&engine, persistence.as_mut()).await;
    let summary = engine.summary()?;
    tracing::info!(
        "👋 UpDownBot stopped | cash {} | realized P&L {} | {}W/{}L/{}T",
        summary.cash_balance,
        summary.realized_pnl,
        summary.wins,
        summary.losses,
        summary.ties
    );
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("updownbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_audit_sink(settings: &Settings) -> anyhow::Result<Arc<dyn AuditSink>> {
    let mut sink = CompositeAuditSink::new().with(Box::new(TracingAuditSink));
    if let Some(path) = &settings.audit.csv_path {
        sink = sink.with(Box::new(CsvAuditSink::open(path)?));
        tracing::info!("📝 Audit trail: {}", path.display());
    }
    Ok(Arc::new(sink))
}

fn build_notifier(settings: &Settings) -> anyhow::Result<Arc<dyn Notifier>> {
    match settings.telegram.credentials() {
        Some((token, chat_id)) => {
            tracing::info!("📨 Telegram notifications enabled");
            Ok(Arc::new(TelegramNotifier::new(token, chat_id)?))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

async fn connect_to_redis(url: Option<&str>) -> Option<RedisPersistence> {
    let url = url?;
    match RedisPersistence::new(url, REDIS_NAMESPACE).await {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::warn!("Redis unavailable at {}, running without persistence: {}", url, e);
            None
        }
    }
}

async fn restore_checkpoint(
    engine: &mut Engine,
    redis: &mut RedisPersistence,
) -> anyhow::Result<()> {
    let checkpoint = redis
        .load_checkpoint()
        .await
        .map_err(|e| anyhow::anyhow!("failed to load checkpoint: {}", e))?;

    match checkpoint {
        Some(checkpoint) => {
            engine.restore(&checkpoint)?;
            tracing::info!(
                "♻️  Restored checkpoint from {} (cash {}, {} open, last slot {:?})",
                checkpoint.saved_at,
                checkpoint.ledger.cash_balance,
                checkpoint.ledger.open_positions.len(),
                checkpoint.last_claimed_slot
            );
        }
        None => tracing::info!("No checkpoint found, starting fresh"),
    }
    Ok(())
}

async fn persist(engine: &Engine, redis: Option<&mut RedisPersistence>, summary: &TickSummary) {
    if !summary.ledger_changed() {
        return;
    }
    let Some(redis) = redis else {
        return;
    };
    if !summary.rotation.settled.is_empty() {
        if let Err(e) = redis.save_settlements(&summary.rotation.settled).await {
            tracing::warn!("Failed to save settlements: {}", e);
        }
    }
    persist_checkpoint(engine, Some(redis)).await;
}

async fn persist_checkpoint(engine: &Engine, redis: Option<&mut RedisPersistence>) {
    let Some(redis) = redis else {
        return;
    };
    match engine.checkpoint(Utc::now()) {
        Ok(checkpoint) => {
            if let Err(e) = redis.save_checkpoint(&checkpoint).await {
                tracing::warn!("Failed to save checkpoint: {}", e);
            }
        }
        Err(e) => tracing::warn!("Cannot checkpoint: {}", e),
    }
}

fn log_tick(summary: &TickSummary) {
    let Some(report) = &summary.strategy else {
        tracing::debug!(state = ?summary.state, "Tick without trading");
        return;
    };
    let filled = report.filled();
    if filled > 0 || report.strategy_errors > 0 {
        tracing::info!(
            "💹 {} fill(s), {} rate limited, {} strategy error(s)",
            filled,
            report.rate_limited(),
            report.strategy_errors
        );
    }
}
