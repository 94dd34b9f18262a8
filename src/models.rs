use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

pub fn now_unix_secs() -> i64 {
    now_unix_ms() / 1_000
}

/// One token held by the managed ("server") wallet, as reported by the
/// wallet tracker stream and the wallet info endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletTokenInfo {
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub raw_balance: String,
    #[serde(default)]
    pub uri: Option<String>,
    pub decimals: u8,
    pub market_cap: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletUpdate {
    pub address: String,
    pub balance: f64,
    pub tokens: Vec<WalletTokenInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CopyTradeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub tracked_wallet_id: String,
    pub is_enabled: bool,
    pub trade_amount_sol: f64,
    pub max_slippage: f64,
    pub max_open_positions: u32,
    pub allowed_tokens: Vec<String>,
    pub use_allowed_tokens_list: bool,
    pub allow_additional_buys: bool,
    pub match_sell_percentage: bool,
    pub min_sol_balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedWallet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub wallet_address: String,
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// DEX the trading backend routes an order through. Selects the path prefix
/// of the buy/sell endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DexKind {
    PumpFun,
    Raydium,
}

impl DexKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PumpFun => "pump_fun",
            Self::Raydium => "raydium",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Info,
    Warning,
}

/// Ephemeral user-facing notice. Transport and validation failures never
/// cross the observer boundary as errors; they surface here instead.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub timestamp_ms: i64,
}

impl DashboardNotification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            timestamp_ms: now_unix_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Watchlist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchlistToken {
    pub address: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub market_cap: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenMetadata {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub market_cap: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuyRequest {
    pub token_address: String,
    pub sol_quantity: f64,
    pub slippage_tolerance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuyResult {
    pub token_quantity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SellRequest {
    pub token_address: String,
    pub token_quantity: f64,
    pub slippage_tolerance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SellResult {
    pub sol_received: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeItem {
    pub id: String,
    pub pair: String,
    pub side: TradeSide,
    pub amount: f64,
    pub price: f64,
    pub timestamp: i64,
}
