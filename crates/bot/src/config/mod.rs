pub mod types;
pub mod validate;

pub use types::*;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Load and merge all config JSON files into a single [`BotConfig`],
/// then apply environment variable overrides and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   exchange.json
///   signals.json
///   positions.json
///   portfolio.json
///   telegram.json
/// ```
///
/// # Environment variable overrides
///
/// | Env Var                  | Config Field                  |
/// |--------------------------|-------------------------------|
/// | `PAPER_TRADING`          | `app.paper_trading`           |
/// | `DATABASE_PATH`          | `app.database_path`           |
/// | `EXCHANGE_BASE_URL`      | `exchange.base_url`           |
/// | `INITIAL_BALANCE`        | `portfolio.initial_balance`   |
/// | `TELEGRAM_OWNER_CHAT_ID` | `telegram.owner_chat_id`      |
pub fn load_config(config_dir: &Path) -> Result<BotConfig> {
    let read = |name: &str| -> Result<String> {
        let path = config_dir.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))
    };

    let app: AppConfig =
        serde_json::from_str(&read("app.json")?).context("parsing app.json")?;

    let exchange: ExchangeConfig =
        serde_json::from_str(&read("exchange.json")?).context("parsing exchange.json")?;

    let signals: SignalConfig =
        serde_json::from_str(&read("signals.json")?).context("parsing signals.json")?;

    let positions: PositionConfig =
        serde_json::from_str(&read("positions.json")?).context("parsing positions.json")?;

    let portfolio: PortfolioConfig =
        serde_json::from_str(&read("portfolio.json")?).context("parsing portfolio.json")?;

    let telegram: TelegramConfig =
        serde_json::from_str(&read("telegram.json")?).context("parsing telegram.json")?;

    let mut config = BotConfig {
        app,
        exchange,
        signals,
        positions,
        portfolio,
        telegram,
    };

    apply_env_overrides(&mut config);
    validate::validate_config(&config)?;

    Ok(config)
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides to the loaded config.
///
/// Only non-empty env vars take effect. Parse failures are logged and
/// skipped (the JSON default remains).
fn apply_env_overrides(config: &mut BotConfig) {
    if let Some(val) = env_bool("PAPER_TRADING") {
        info!(paper_trading = val, "env override: PAPER_TRADING");
        config.app.paper_trading = val;
    }

    if let Some(val) = env_string("DATABASE_PATH") {
        info!("env override: DATABASE_PATH");
        config.app.database_path = val;
    }

    if let Some(val) = env_string("EXCHANGE_BASE_URL") {
        info!("env override: EXCHANGE_BASE_URL");
        config.exchange.base_url = val;
    }

    if let Some(val) = env_decimal("INITIAL_BALANCE") {
        info!(%val, "env override: INITIAL_BALANCE");
        config.portfolio.initial_balance = val;
    }

    if let Some(val) = env_parse::<i64>("TELEGRAM_OWNER_CHAT_ID") {
        info!(val, "env override: TELEGRAM_OWNER_CHAT_ID");
        config.telegram.owner_chat_id = val;
    }
}

/// Read a non-empty env var as a `String`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var as a bool (`true`, `1`, `yes` → true).
fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Read a non-empty env var and parse it as `T`.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Read a non-empty env var and parse it as `Decimal`.
fn env_decimal(key: &str) -> Option<Decimal> {
    env_string(key).and_then(|v| Decimal::from_str(&v).ok())
}
