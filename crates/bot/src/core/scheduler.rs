//! Symbol scheduler — polls the exchange per tracked symbol and drives the
//! signal path with bounded concurrency.
//!
//! One cooperative pool shared across symbols: each poll round lists the
//! active symbols, fetches their candles under a semaphore cap, debounces
//! to the latest closed candle and hands the tick to the position manager.
//! Failures in one symbol never block the others; chat commands run on a
//! separate control path serialized through the ledger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ExchangeConfig, IndicatorParams};
use crate::core::indicators;
use crate::core::position_manager::{PositionManager, TickResult};
use crate::errors::BotError;
use crate::exchange::BinanceClient;
use crate::ledger::Ledger;
use crate::types::{Candle, Notification, Timeframe};

/// Ledger settings key used as the force-buy mailbox.
pub const FORCE_BUY_KEY: &str = "force_buy";

pub struct Scheduler {
    ledger: Arc<Ledger>,
    client: Arc<BinanceClient>,
    manager: Arc<PositionManager>,
    config: ExchangeConfig,
    indicator_params: IndicatorParams,
    timeframe: Timeframe,
    notifier: mpsc::Sender<Notification>,
    shutdown: CancellationToken,
    semaphore: Arc<Semaphore>,
    /// In-memory candle debounce; the ledger's replay key covers restarts.
    last_seen: Mutex<HashMap<String, i64>>,
}

impl Scheduler {
    pub fn new(
        ledger: Arc<Ledger>,
        client: Arc<BinanceClient>,
        manager: Arc<PositionManager>,
        config: ExchangeConfig,
        indicator_params: IndicatorParams,
        notifier: mpsc::Sender<Notification>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let timeframe = config
            .timeframe()
            .ok_or_else(|| BotError::Config(format!("unsupported interval '{}'", config.interval)))?;
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_fetches));

        Ok(Self {
            ledger,
            client,
            manager,
            config,
            indicator_params,
            timeframe,
            notifier,
            shutdown,
            semaphore,
            last_seen: Mutex::new(HashMap::new()),
        })
    }

    /// Run the poll loop until shutdown. In-flight ticks finish their
    /// ledger commit before the loop exits.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_granularity_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval = %self.timeframe,
            poll_seconds = self.config.poll_granularity_seconds,
            max_in_flight = self.config.max_concurrent_fetches,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("scheduler: shutdown signal received");
                    break;
                }
                _ = interval.tick() => {
                    self.clone().poll_round().await;
                }
            }
        }

        Ok(())
    }

    /// One poll round over all active symbols.
    async fn poll_round(self: Arc<Self>) {
        let portfolio = match self.ledger.get_portfolio_state().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "failed to read portfolio state");
                return;
            }
        };
        if !portfolio.trading_enabled {
            debug!("trading paused, skipping poll round");
            return;
        }

        // Force-buy mailbox: one shot, consumed through the ledger.
        let force_target = match self.ledger.take_setting(FORCE_BUY_KEY).await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to read force-buy mailbox");
                None
            }
        };

        let symbols = match self.ledger.get_tracked_symbols().await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to list tracked symbols");
                return;
            }
        };

        let mut handles = Vec::new();
        for tracked in symbols.into_iter().filter(|s| s.active) {
            let this = self.clone();
            let force = force_target.as_deref() == Some(tracked.symbol.as_str());
            let permit = self.semaphore.clone().acquire_owned();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = permit.await else { return };
                this.tick_symbol(&tracked.symbol, force).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "symbol tick task panicked");
            }
        }
    }

    /// Fetch, debounce and process one symbol. All failures are local.
    async fn tick_symbol(&self, symbol: &str, force_buy: bool) {
        let now = now_unix();

        let candles = match self
            .client
            .fetch_closed_candles(symbol, self.timeframe, self.config.history_candles, now)
            .await
        {
            Ok(c) => c,
            Err(BotError::UnknownSymbol { .. }) => {
                warn!(symbol, "symbol unknown or delisted, deactivating");
                if let Err(e) = self.ledger.deactivate_symbol(symbol).await {
                    error!(symbol, error = %e, "failed to deactivate symbol");
                }
                let _ = self.notifier.try_send(Notification::SymbolDeactivated {
                    symbol: symbol.to_string(),
                    reason: "unknown or delisted on the exchange".into(),
                });
                return;
            }
            Err(e) => {
                warn!(symbol, error = %e, "candle fetch failed, skipping tick");
                return;
            }
        };

        let Some(latest) = candles.last() else {
            debug!(symbol, "no closed candles returned");
            return;
        };

        if !force_buy && !self.mark_candle(symbol, latest) {
            return;
        }

        let day_window = self.timeframe.candles_per_day();
        let Some(snapshot) = indicators::compute_all(&candles, &self.indicator_params, day_window)
        else {
            debug!(symbol, candles = candles.len(), "insufficient history for indicators");
            return;
        };

        match self.manager.process_tick(symbol, &snapshot, now, force_buy).await {
            Ok(TickResult::Processed { trades }) => {
                debug!(symbol, candle = latest.open_time, trades, "tick committed");
            }
            Ok(TickResult::Replayed) => {
                debug!(symbol, candle = latest.open_time, "tick replayed, no-op");
            }
            Err(e) => {
                error!(symbol, error = %e, "tick failed");
            }
        }
    }

    /// Record the candle as seen; returns false when it was already
    /// processed this session.
    fn mark_candle(&self, symbol: &str, candle: &Candle) -> bool {
        let mut seen = self.last_seen.lock().expect("last_seen lock poisoned");
        match seen.get(symbol) {
            Some(&t) if t >= candle.open_time => false,
            _ => {
                seen.insert(symbol.to_string(), candle.open_time);
                true
            }
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
