use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hybrid_bot::config::{self, BotConfig};
use hybrid_bot::core::position_manager::PositionManager;
use hybrid_bot::core::scheduler::Scheduler;
use hybrid_bot::exchange::{BinanceClient, BinanceOrderGateway, ExecutionMode};
use hybrid_bot::ledger::Ledger;
use hybrid_bot::logging;
use hybrid_bot::telegram::{self, CommandHandler, TelegramClient};
use hybrid_bot::types::Notification;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    // Determine config directory — default to `./config`.
    let config_dir = std::env::var("BOT_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    // Load and validate configuration; refuses to run on bad inputs.
    let config = config::load_config(&config_dir)?;

    // Initialize tracing — hold the guard for the process lifetime.
    let _guard = logging::init_tracing(&config.app.logging)?;

    log_startup_banner(&config);

    // -----------------------------------------------------------------------
    // Ledger
    // -----------------------------------------------------------------------

    if let Some(parent) = PathBuf::from(&config.app.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("failed to create data directory")?;
        }
    }
    let ledger = Arc::new(
        Ledger::new(&config.app.database_path)
            .await
            .context("failed to initialize ledger")?,
    );
    ledger
        .init_portfolio(config.portfolio.initial_balance)
        .await
        .context("failed to seed portfolio state")?;

    // Seed initial symbols (idempotent).
    let now = now_unix();
    for symbol in &config.exchange.initial_symbols {
        ledger
            .add_symbol(symbol, now)
            .await
            .with_context(|| format!("failed to seed symbol {symbol}"))?;
    }

    // -----------------------------------------------------------------------
    // Execution mode
    // -----------------------------------------------------------------------

    let execution = if config.app.paper_trading {
        info!("paper trading mode: fills simulated at candle close");
        ExecutionMode::Paper
    } else {
        info!("live trading mode: orders routed to the exchange");
        ExecutionMode::Live(BinanceOrderGateway::from_env(&config.exchange.base_url)?)
    };

    // -----------------------------------------------------------------------
    // Component construction (dependency injection order)
    // -----------------------------------------------------------------------

    let (notify_tx, notify_rx) = mpsc::channel::<Notification>(64);
    let shutdown = CancellationToken::new();

    // 1. Exchange candle feed
    let client = Arc::new(BinanceClient::new(&config.exchange));

    // 2. Position manager (regime selector + signal generator inside)
    let manager = Arc::new(PositionManager::new(
        ledger.clone(),
        config.signals.clone(),
        config.positions.clone(),
        execution,
        notify_tx.clone(),
    ));

    // 3. Symbol scheduler
    let scheduler = Arc::new(Scheduler::new(
        ledger.clone(),
        client.clone(),
        manager.clone(),
        config.exchange.clone(),
        config.signals.indicators.clone(),
        notify_tx.clone(),
        shutdown.clone(),
    )?);

    // 4. Telegram surface (optional)
    let telegram_client = if config.telegram.enabled {
        match std::env::var(&config.telegram.token_env) {
            Ok(token) if !token.is_empty() => Some(Arc::new(TelegramClient::new(
                &token,
                config.telegram.poll_timeout_seconds,
            ))),
            _ => {
                anyhow::bail!(
                    "telegram is enabled but {} is not set",
                    config.telegram.token_env
                );
            }
        }
    } else {
        info!("telegram disabled; notifications go to the log only");
        None
    };

    // -----------------------------------------------------------------------
    // Task spawn
    // -----------------------------------------------------------------------

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(telegram::run_notifier(
        notify_rx,
        telegram_client.clone(),
        config.telegram.owner_chat_id,
        shutdown.clone(),
    )));

    if let Some(tg) = telegram_client {
        let timeframe = config
            .exchange
            .timeframe()
            .expect("interval validated at config load");
        let handler = CommandHandler::new(
            ledger.clone(),
            manager.clone(),
            client.clone(),
            timeframe,
            config.portfolio.initial_balance,
        );
        tasks.push(tokio::spawn(telegram::run_command_loop(
            tg,
            handler,
            config.telegram.owner_chat_id,
            config.telegram.poll_timeout_seconds,
            shutdown.clone(),
        )));
    }

    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                warn!(error = %e, "scheduler exited with error");
            }
        })
    };
    tasks.push(scheduler_task);

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown signal received, finishing in-flight ticks");
    shutdown.cancel();

    for task in tasks {
        let _ = task.await;
    }

    info!("engine stopped");
    Ok(())
}

fn log_startup_banner(config: &BotConfig) {
    info!("════════════════════════════════════════════════════");
    info!("  Hybrid spot trading engine");
    info!(
        mode = if config.app.paper_trading { "paper" } else { "live" },
        interval = %config.exchange.interval,
        symbols = config.exchange.initial_symbols.len(),
        max_positions = config.positions.max_positions,
        initial_balance = %config.portfolio.initial_balance,
        "  configuration"
    );
    info!(
        adx_low = %config.signals.regime.adx_low,
        adx_high = %config.signals.regime.adx_high,
        dwell_minutes = config.signals.regime.min_dwell_minutes,
        buy_votes = config.signals.min_votes_for_buy,
        "  regime & votes"
    );
    info!("════════════════════════════════════════════════════");
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
