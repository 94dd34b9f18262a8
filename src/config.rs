use crate::error::AppError;
use std::path::PathBuf;

const DEFAULT_DB_FILENAME: &str = "soldesk.db";

/// External configuration for the dashboard core, read once at session start.
///
/// The backend endpoints are never hard-coded: the REST base URL, the price
/// feed base URL, and the wallet tracker stream URL all come from the
/// environment.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub api_base_url: String,
    pub feed_base_url: String,
    pub tracker_ws_url: String,
    pub db_path: PathBuf,
}

impl DashboardConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            api_base_url: require_env("API_BASE_URL")?,
            feed_base_url: require_env("PRICE_FEED_URL")?,
            tracker_ws_url: require_env("WALLET_TRACKER_WS_URL")?,
            db_path: resolve_db_path(),
        })
    }
}

fn require_env(name: &'static str) -> Result<String, AppError> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(AppError::MissingEnv(name))
}

fn resolve_db_path() -> PathBuf {
    std::env::var("APP_DB_FILENAME")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILENAME))
}
