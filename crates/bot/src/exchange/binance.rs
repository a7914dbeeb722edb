//! Binance spot adapters.
//!
//! [`BinanceClient`] fetches klines with bounded retry/backoff and maps the
//! exchange's error taxonomy onto [`BotError`]. [`BinanceOrderGateway`]
//! submits HMAC-SHA256-signed market orders and condenses the fill list
//! into one [`OrderResult`].

use std::time::Duration;

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::ExchangeConfig;
use crate::errors::BotError;
use crate::exchange::{OrderResult, OrderSide};
use crate::types::{Candle, Timeframe};

type HmacSha256 = Hmac<Sha256>;

/// Binance error code for an unknown trading pair.
const CODE_INVALID_SYMBOL: i64 = -1121;

// ═══════════════════════════════════════════════════════════════════════════
// Candle feed
// ═══════════════════════════════════════════════════════════════════════════

/// Read-only klines client with retry/backoff.
pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
    retries: u32,
    retry_base_delay: Duration,
}

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .build()
            .expect("reqwest client should build");

        Self {
            client,
            base_url: config.base_url.clone(),
            retries: config.fetch_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Fetch up to `limit` candles ending at the latest fully closed one.
    ///
    /// Transient failures retry with linear backoff up to the configured
    /// attempt count; a permanent failure (unknown symbol) is surfaced
    /// immediately so the scheduler can deactivate the symbol.
    pub async fn fetch_closed_candles(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: u32,
        now: i64,
    ) -> Result<Vec<Candle>, BotError> {
        let mut last_err: Option<BotError> = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_base_delay * attempt).await;
            }

            match self.fetch_once(symbol, interval, limit).await {
                Ok(mut candles) => {
                    candles.retain(|c| c.is_closed(interval, now));
                    return Ok(candles);
                }
                Err(e @ BotError::UnknownSymbol { .. }) => return Err(e),
                Err(e) => {
                    warn!(symbol, attempt, error = %e, "kline fetch failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(BotError::DataUnavailable {
            name: format!("klines:{symbol}"),
        }))
    }

    async fn fetch_once(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, BotError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let limit_str = limit.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", interval.as_exchange_interval()),
                ("limit", &limit_str),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<Value>(&body) {
                if err.get("code").and_then(Value::as_i64) == Some(CODE_INVALID_SYMBOL) {
                    return Err(BotError::UnknownSymbol {
                        symbol: symbol.to_string(),
                    });
                }
            }
            warn!(symbol, %status, body, "klines request rejected");
            return Err(BotError::DataUnavailable {
                name: format!("klines:{symbol} ({status})"),
            });
        }

        let payload: Value = resp.json().await?;
        parse_klines(&payload)
    }
}

/// Parse the Binance klines payload: `[[open_time_ms, O, H, L, C, V, …], …]`
/// with prices as decimal strings.
pub fn parse_klines(payload: &Value) -> Result<Vec<Candle>, BotError> {
    let arr = payload.as_array().ok_or_else(|| BotError::DataUnavailable {
        name: "klines response not an array".into(),
    })?;

    let mut candles = Vec::with_capacity(arr.len());
    for k in arr {
        let items = match k.as_array() {
            Some(a) if a.len() >= 6 => a,
            _ => {
                debug!("skipping malformed kline entry");
                continue;
            }
        };

        let open_time_ms = match items[0].as_i64() {
            Some(t) => t,
            None => continue,
        };

        let field = |i: usize| -> Option<Decimal> {
            items.get(i)?.as_str()?.parse().ok()
        };

        let (Some(open), Some(high), Some(low), Some(close), Some(volume)) =
            (field(1), field(2), field(3), field(4), field(5))
        else {
            debug!("skipping kline with unparsable prices");
            continue;
        };

        candles.push(Candle {
            open_time: open_time_ms / 1000,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

// ═══════════════════════════════════════════════════════════════════════════
// Order gateway (live mode)
// ═══════════════════════════════════════════════════════════════════════════

/// Signed market-order client for live execution.
pub struct BinanceOrderGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BinanceOrderGateway {
    pub fn new(base_url: &str, api_key: String, api_secret: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client should build");

        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            api_secret,
        }
    }

    /// Build credentials from `BINANCE_API_KEY` / `BINANCE_API_SECRET`.
    pub fn from_env(base_url: &str) -> Result<Self, BotError> {
        let api_key = std::env::var("BINANCE_API_KEY")
            .map_err(|_| BotError::Config("BINANCE_API_KEY is required in live mode".into()))?;
        let api_secret = std::env::var("BINANCE_API_SECRET")
            .map_err(|_| BotError::Config("BINANCE_API_SECRET is required in live mode".into()))?;
        Ok(Self::new(base_url, api_key, api_secret))
    }

    /// Submit a market order and condense its fills.
    ///
    /// Fills are treated as atomic and authoritative; the caller reconciles
    /// its position from the returned [`OrderResult`].
    pub async fn execute_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        timestamp_ms: i64,
    ) -> Result<OrderResult, BotError> {
        let query = format!(
            "symbol={symbol}&side={}&type=MARKET&quantity={quantity}&timestamp={timestamp_ms}",
            side.as_str()
        );
        let signature = sign_query(&query, &self.api_secret);
        let url = format!("{}/api/v3/order?{query}&signature={signature}", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        let status = resp.status();
        let body: Value = resp.json().await?;

        if !status.is_success() {
            let msg = body
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown exchange error");
            return Err(BotError::OrderRejected {
                reason: format!("{symbol} {side:?} {quantity}: {msg}"),
            });
        }

        parse_order_response(&body)
    }
}

/// HMAC-SHA256 signature over the request query string, hex-encoded.
pub fn sign_query(query: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Condense an order response's fill list into one [`OrderResult`] with a
/// volume-weighted average price.
pub fn parse_order_response(body: &Value) -> Result<OrderResult, BotError> {
    let fills = body
        .get("fills")
        .and_then(Value::as_array)
        .ok_or_else(|| BotError::OrderRejected {
            reason: "order response carries no fills".into(),
        })?;

    let mut total_qty = Decimal::ZERO;
    let mut total_notional = Decimal::ZERO;
    let mut total_commission = Decimal::ZERO;

    for fill in fills {
        let dec = |key: &str| -> Option<Decimal> {
            fill.get(key)?.as_str()?.parse().ok()
        };
        let (Some(price), Some(qty)) = (dec("price"), dec("qty")) else {
            continue;
        };
        total_qty += qty;
        total_notional += price * qty;
        total_commission += dec("commission").unwrap_or(Decimal::ZERO);
    }

    if total_qty <= Decimal::ZERO {
        return Err(BotError::OrderRejected {
            reason: "order filled zero quantity".into(),
        });
    }

    Ok(OrderResult {
        price: total_notional / total_qty,
        quantity: total_qty,
        commission: total_commission,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_sign_query_shape() {
        let sig = sign_query("symbol=BTCUSDT&timestamp=1234567890", "test_secret");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        // Deterministic for the same inputs.
        assert_eq!(sig, sign_query("symbol=BTCUSDT&timestamp=1234567890", "test_secret"));
        assert_ne!(sig, sign_query("symbol=BTCUSDT&timestamp=1234567890", "other"));
    }

    #[test]
    fn test_parse_klines() {
        let payload = json!([
            [1700000000000i64, "100.0", "101.5", "99.5", "100.5", "12.3", 0, "0", 0, "0", "0", "0"],
            [1700003600000i64, "100.5", "102.0", "100.0", "101.0", "8.8", 0, "0", 0, "0", "0", "0"]
        ]);
        let candles = parse_klines(&payload).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1_700_000_000);
        assert_eq!(candles[0].high, dec!(101.5));
        assert_eq!(candles[1].close, dec!(101.0));
        assert!(candles[0].open_time < candles[1].open_time);
    }

    #[test]
    fn test_parse_klines_skips_malformed() {
        let payload = json!([
            [1700000000000i64, "100.0", "101.5", "99.5", "100.5", "12.3"],
            ["garbage"],
            [1700003600000i64, "not_a_number", "102.0", "100.0", "101.0", "8.8"]
        ]);
        let candles = parse_klines(&payload).unwrap();
        assert_eq!(candles.len(), 1);
    }

    #[test]
    fn test_parse_klines_rejects_non_array() {
        let payload = json!({"code": -1121, "msg": "Invalid symbol."});
        assert!(parse_klines(&payload).is_err());
    }

    #[test]
    fn test_parse_order_response_weights_fills() {
        let body = json!({
            "fills": [
                {"price": "100.00", "qty": "1.0", "commission": "0.09"},
                {"price": "101.00", "qty": "3.0", "commission": "0.27"}
            ]
        });
        let result = parse_order_response(&body).unwrap();
        assert_eq!(result.quantity, dec!(4.0));
        assert_eq!(result.price, dec!(100.75));
        assert_eq!(result.commission, dec!(0.36));
    }

    #[test]
    fn test_parse_order_response_zero_fill_is_error() {
        let body = json!({"fills": []});
        assert!(parse_order_response(&body).is_err());
    }
}
