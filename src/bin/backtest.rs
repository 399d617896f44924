use chrono::{Duration, DurationRound, Utc};
use clap::Parser;
use std::path::PathBuf;
use updownbot::backtest::{BacktestMetrics, BacktestRunner, MarketScenario, SyntheticPriceGenerator};
use updownbot::config::Settings;

#[derive(Parser, Debug)]
#[command(name = "backtest", about = "Replay synthetic price paths through the trading engine")]
struct Args {
    /// Scenario to run (uptrend, downtrend, sideways, volatile); all when omitted
    #[arg(short, long)]
    scenario: Option<MarketScenario>,

    /// RNG seed for the synthetic path
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of windows to simulate
    #[arg(short, long, default_value_t = 96)]
    windows: usize,

    /// Seconds between simulated ticks
    #[arg(long, default_value_t = 10)]
    tick_secs: i64,

    /// Optional TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("updownbot=warn")
        .init();

    let args = Args::parse();
    if args.tick_secs <= 0 {
        anyhow::bail!("--tick-secs must be positive");
    }
    let settings = Settings::load(args.config.as_deref())?;

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║            UPDOWNBOT BACKTESTING SUITE                ║");
    println!("╚═══════════════════════════════════════════════════════╝");

    let width = settings.window.width_minutes;
    let start = Utc::now().duration_trunc(Duration::minutes(width))?
        - Duration::minutes(width * args.windows as i64);
    // One extra settlement delay so the last window can settle
    let span_secs = (width * args.windows as i64 + settings.window.settlement_delay_minutes) * 60;
    let num_ticks = (span_secs / args.tick_secs) as usize + 1;

    let scenarios = match args.scenario {
        Some(s) => vec![s],
        None => vec![
            MarketScenario::Uptrend,
            MarketScenario::Downtrend,
            MarketScenario::Sideways,
            MarketScenario::Volatile,
        ],
    };

    let runner = BacktestRunner::new(settings);
    let mut all_metrics = Vec::new();

    for scenario in scenarios {
        let ticks = SyntheticPriceGenerator::new(args.seed).generate(
            scenario,
            start,
            num_ticks,
            args.tick_secs,
        );
        let name = format!("{:?}", scenario);
        println!("\n▶ {} ({} ticks)", name, ticks.len());

        match runner.run(ticks).await {
            Ok(metrics) => {
                metrics.print_report();
                all_metrics.push((name, metrics));
            }
            Err(e) => eprintln!("❌ Backtest failed for {}: {}", name, e),
        }
    }

    print_summary_comparison(&all_metrics);
    Ok(())
}

fn print_summary_comparison(results: &[(String, BacktestMetrics)]) {
    if results.len() < 2 {
        return;
    }
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║              SCENARIO COMPARISON                      ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<14} {:>10} {:>10} {:>10} {:>8}",
        "Scenario", "P&L", "Return%", "Positions", "Win%"
    );
    println!("{}", "─".repeat(56));

    for (name, metrics) in results {
        println!(
            "{:<14} {:>10.2} {:>10.2} {:>10} {:>8.1}",
            name,
            metrics.total_pnl,
            metrics.total_return_pct,
            metrics.total_positions,
            metrics.win_rate
        );
    }
    println!();
}
