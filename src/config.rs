use anyhow::{Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::api::coinbase::COINBASE_API_BASE;
use crate::execution::ExecutorConfig;
use crate::risk::RiskGate;
use crate::session::source::DEFAULT_SESSION_PREFIX;
use crate::session::SlotClock;
use crate::strategy::MarketMakingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "updownbot.toml";
pub const ENV_PREFIX: &str = "UPDOWN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub width_minutes: i64,
    /// Grace period after a window opens before its outcome is claimed
    pub settlement_delay_minutes: i64,
    pub tick_interval_ms: u64,
    pub session_prefix: String,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width_minutes: 15,
            settlement_delay_minutes: 16,
            tick_interval_ms: 2000,
            session_prefix: DEFAULT_SESSION_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    pub initial_balance: Decimal,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            initial_balance: dec!(1000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub min_order_interval_ms: i64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            min_order_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub order_lifetime_secs: i64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 500,
            order_lifetime_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub base_url: String,
    pub product: String,
    pub requests_per_minute: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            base_url: COINBASE_API_BASE.to_string(),
            product: "BTC-USD".to_string(),
            requests_per_minute: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub token: Option<String>,
    pub chat_id: Option<String>,
}

impl TelegramSettings {
    /// Token and chat id, when both are set and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.token.as_deref(), self.chat_id.as_deref()) {
            (Some(t), Some(c)) if !t.is_empty() && !c.is_empty() => Some((t, c)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub csv_path: Option<PathBuf>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            csv_path: Some(PathBuf::from("data/trades_audit.csv")),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub window: WindowSettings,
    pub account: AccountSettings,
    pub risk: RiskSettings,
    pub execution: ExecutionSettings,
    pub strategy: MarketMakingConfig,
    pub feed: FeedSettings,
    pub telegram: TelegramSettings,
    pub audit: AuditSettings,
    pub redis_url: Option<String>,
}

impl Settings {
    /// Defaults, then the optional config file, then `UPDOWN__*` env vars
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let settings: Settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Settings::default())?)
            .add_source(::config::File::from(file.as_path()).required(path.is_some()))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("failed to load configuration from {}", file.display()))?
            .try_deserialize()
            .context("invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window.width_minutes <= 0 {
            anyhow::bail!("window.width_minutes must be positive");
        }
        if self.window.settlement_delay_minutes < self.window.width_minutes {
            anyhow::bail!(
                "window.settlement_delay_minutes ({}) must be at least the window width ({})",
                self.window.settlement_delay_minutes,
                self.window.width_minutes
            );
        }
        // Past two widths the previous window's claim would never come due
        if self.window.settlement_delay_minutes >= self.window.width_minutes * 2 {
            anyhow::bail!(
                "window.settlement_delay_minutes ({}) must be less than twice the window width ({})",
                self.window.settlement_delay_minutes,
                self.window.width_minutes * 2
            );
        }
        if self.window.tick_interval_ms == 0 {
            anyhow::bail!("window.tick_interval_ms must be positive");
        }
        if self.account.initial_balance < Decimal::ZERO {
            anyhow::bail!("account.initial_balance must not be negative");
        }
        if self.risk.min_order_interval_ms < 0 {
            anyhow::bail!("risk.min_order_interval_ms must not be negative");
        }
        if self.execution.order_lifetime_secs <= 0 {
            anyhow::bail!("execution.order_lifetime_secs must be positive");
        }
        if self.feed.requests_per_minute == 0 {
            anyhow::bail!("feed.requests_per_minute must be positive");
        }

        let ratio = self.strategy.trade_ratio;
        if ratio <= Decimal::ZERO || ratio > Decimal::ONE {
            anyhow::bail!("strategy.trade_ratio must be in (0, 1], got {}", ratio);
        }
        let edges: Vec<Decimal> = self.strategy.sizing.iter().map(|b| b.min_edge).collect();
        if edges.windows(2).any(|w| w[0] >= w[1]) {
            anyhow::bail!("strategy.sizing buckets must be strictly ascending by min_edge");
        }

        Ok(())
    }

    pub fn slot_clock(&self) -> Result<SlotClock> {
        Ok(SlotClock::from_minutes(self.window.width_minutes)?)
    }

    pub fn settlement_delay(&self) -> Duration {
        Duration::minutes(self.window.settlement_delay_minutes)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.window.tick_interval_ms)
    }

    pub fn risk_gate(&self) -> RiskGate {
        RiskGate::from_millis(self.risk.min_order_interval_ms)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_retries: self.execution.max_retries,
            retry_backoff: std::time::Duration::from_millis(self.execution.retry_backoff_ms),
            order_lifetime: Duration::seconds(self.execution.order_lifetime_secs),
        }
    }
}
