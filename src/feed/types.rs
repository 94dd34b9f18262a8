use crate::error::AppError;
use crate::models::{CopyTradeSettings, WalletUpdate};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_CANDLE_INTERVAL_SECS: i64 = 60;
pub const DEFAULT_MAX_BARS: usize = 100;
pub const DEFAULT_MAX_CHANGE_FRACTION: f64 = 0.05;
pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.2;

/// Ticks whose timestamp is further than this from the local clock are
/// treated as malformed and dropped before aggregation.
pub const MAX_TICK_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Reconnection policy for one stream subscription.
///
/// The delay is constant rather than exponential, matching the backend's
/// expectations for these feeds; failures are counted consecutively and the
/// counter resets on every successful connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PriceTickWire {
    pub price_sol: f64,
    #[serde(default)]
    pub price_usd: Option<f64>,
    pub market_cap: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub liquidity: Option<f64>,
    #[serde(default)]
    pub liquidity_usd: Option<f64>,
}

/// One validated price observation from the feed. Ephemeral: consumed by the
/// pipeline and never stored beyond the current bar series.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    pub price_sol: f64,
    pub price_usd: Option<f64>,
    pub market_cap: f64,
    pub timestamp: i64,
    pub liquidity: Option<f64>,
    pub liquidity_usd: Option<f64>,
}

impl TryFrom<PriceTickWire> for PriceTick {
    type Error = AppError;

    fn try_from(value: PriceTickWire) -> Result<Self, Self::Error> {
        if !value.price_sol.is_finite() || value.price_sol <= 0.0 {
            return Err(AppError::InvalidArgument(
                "tick price_sol must be finite and positive".to_string(),
            ));
        }

        Ok(Self {
            price_sol: value.price_sol,
            price_usd: value.price_usd,
            market_cap: value.market_cap,
            timestamp: value.timestamp,
            liquidity: value.liquidity,
            liquidity_usd: value.liquidity_usd,
        })
    }
}

/// Decodes and validates one inbound feed frame. `now_secs` is the local
/// clock used for the skew check.
pub fn parse_price_tick(payload: &mut [u8], now_secs: i64) -> Result<PriceTick, AppError> {
    let wire: PriceTickWire = simd_json::serde::from_slice(payload)?;
    let tick: PriceTick = wire.try_into()?;

    if (tick.timestamp - now_secs).abs() > MAX_TICK_SKEW_SECS {
        return Err(AppError::InvalidArgument(format!(
            "tick timestamp {} is more than {MAX_TICK_SKEW_SECS}s from local clock {now_secs}",
            tick.timestamp
        )));
    }

    Ok(tick)
}

/// One OHLC bar over a half-open interval `[period_start, period_start + interval)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub period_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn from_tick(price: f64, period_start: i64) -> Self {
        Self {
            period_start,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    pub fn apply(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

/// Outbound command over the wallet tracker socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandMessage {
    Start,
    UpdateSettings { settings: CopyTradeSettings },
    RefreshState,
    ManualSell {
        token_address: String,
        amount: f64,
        slippage: f64,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TradeExecution {
    pub transaction_type: String,
    pub amount_token: f64,
    pub token_symbol: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrackerErrorData {
    pub message: String,
}

/// Inbound event over the wallet tracker socket.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    WalletUpdate { data: WalletUpdate },
    CopyTradeExecution { data: TradeExecution },
    TrackedWalletTrade { data: TradeExecution },
    TransactionLogged { data: TradeExecution },
    Error { data: TrackerErrorData },
}

pub fn parse_tracker_event(payload: &mut [u8]) -> Result<TrackerEvent, AppError> {
    let event: TrackerEvent = simd_json::serde::from_slice(payload)?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_price_tick() {
        let mut payload =
            br#"{"price_sol":0.0042,"price_usd":0.63,"market_cap":420000.0,"timestamp":1700000030,"liquidity":12.5}"#
                .to_vec();
        let tick = parse_price_tick(&mut payload, 1_700_000_000).expect("tick should parse");

        assert_eq!(tick.price_sol, 0.0042);
        assert_eq!(tick.price_usd, Some(0.63));
        assert_eq!(tick.timestamp, 1_700_000_030);
        assert_eq!(tick.liquidity_usd, None);
    }

    #[test]
    fn rejects_non_positive_price() {
        let mut payload =
            br#"{"price_sol":0.0,"market_cap":420000.0,"timestamp":1700000000}"#.to_vec();
        assert!(parse_price_tick(&mut payload, 1_700_000_000).is_err());

        let mut payload =
            br#"{"price_sol":-1.0,"market_cap":420000.0,"timestamp":1700000000}"#.to_vec();
        assert!(parse_price_tick(&mut payload, 1_700_000_000).is_err());
    }

    #[test]
    fn rejects_non_numeric_price() {
        let mut payload =
            br#"{"price_sol":"broken","market_cap":420000.0,"timestamp":1700000000}"#.to_vec();
        assert!(parse_price_tick(&mut payload, 1_700_000_000).is_err());
    }

    #[test]
    fn rejects_tick_far_from_local_clock() {
        let mut payload =
            br#"{"price_sol":1.0,"market_cap":1.0,"timestamp":1700000061}"#.to_vec();
        assert!(parse_price_tick(&mut payload, 1_700_000_000).is_err());

        let mut payload =
            br#"{"price_sol":1.0,"market_cap":1.0,"timestamp":1700000060}"#.to_vec();
        assert!(parse_price_tick(&mut payload, 1_700_000_000).is_ok());
    }

    #[test]
    fn serializes_manual_sell_command_wire_shape() {
        let command = CommandMessage::ManualSell {
            token_address: "So11111111111111111111111111111111111111112".to_string(),
            amount: 1.5,
            slippage: 0.5,
        };

        let text = serde_json::to_string(&command).expect("command should encode");
        assert!(text.contains(r#""type":"manual_sell""#));
        assert!(text.contains(r#""amount":1.5"#));
        assert!(text.contains(r#""slippage":0.5"#));
    }

    #[test]
    fn serializes_start_command_wire_shape() {
        let text = serde_json::to_string(&CommandMessage::Start).expect("command should encode");
        assert_eq!(text, r#"{"type":"start"}"#);
    }

    #[test]
    fn parses_wallet_update_event() {
        let mut payload = br#"{"type":"wallet_update","data":{"address":"wallet1","balance":12.5,"tokens":[{"mint":"mint1","symbol":"TKN","name":"Token","raw_balance":"1000","decimals":6,"market_cap":5000.0,"price":0.001}]}}"#.to_vec();
        let event = parse_tracker_event(&mut payload).expect("event should parse");

        match event {
            TrackerEvent::WalletUpdate { data } => {
                assert_eq!(data.address, "wallet1");
                assert_eq!(data.tokens.len(), 1);
                assert_eq!(data.tokens[0].price, Some(0.001));
            }
            other => panic!("expected wallet_update, got {other:?}"),
        }
    }

    #[test]
    fn parses_trade_notification_event() {
        let mut payload = br#"{"type":"copy_trade_execution","data":{"transaction_type":"buy","amount_token":1234.0,"token_symbol":"TKN"}}"#.to_vec();
        let event = parse_tracker_event(&mut payload).expect("event should parse");

        assert_eq!(
            event,
            TrackerEvent::CopyTradeExecution {
                data: TradeExecution {
                    transaction_type: "buy".to_string(),
                    amount_token: 1234.0,
                    token_symbol: "TKN".to_string(),
                }
            }
        );
    }

    #[test]
    fn rejects_unknown_tracker_event_type() {
        let mut payload = br#"{"type":"mystery","data":{}}"#.to_vec();
        assert!(parse_tracker_event(&mut payload).is_err());
    }
}
