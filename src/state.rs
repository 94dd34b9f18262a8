use crate::api::ApiClient;
use crate::config::DashboardConfig;
use crate::db;
use crate::error::AppError;
use crate::feed::types::StreamConfig;
use crate::feed::{PriceFeed, PriceFeedConfig};
use crate::models::now_unix_ms;
use crate::stores::{WalletTrackerStore, WatchlistStore};
use crate::tracker::WalletTracker;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Everything one dashboard session owns: the cache database, the REST
/// client, both live streams, and the shared stores observers read from.
pub struct Session {
    pub started_at_ms: i64,
    pub db_pool: SqlitePool,
    pub api: ApiClient,
    pub price_feed: PriceFeed,
    pub tracker: WalletTracker,
    pub wallet_store: Arc<WalletTrackerStore>,
    pub watchlists: WatchlistStore,
}

impl Session {
    /// Builds the session and hydrates the watchlist snapshot from the local
    /// cache. No network traffic happens until `bootstrap`.
    pub async fn start(config: DashboardConfig) -> Result<Self, AppError> {
        let db_pool = db::initialize_pool(&config.db_path).await?;
        let api = ApiClient::new(config.api_base_url.clone())?;
        let wallet_store = Arc::new(WalletTrackerStore::new());

        let price_feed = PriceFeed::new(PriceFeedConfig::new(config.feed_base_url.clone()));
        let tracker = WalletTracker::new(
            config.tracker_ws_url.clone(),
            StreamConfig::default(),
            Arc::clone(&wallet_store),
        );
        let watchlists = WatchlistStore::new(api.clone(), db_pool.clone());
        watchlists.hydrate_from_cache().await?;

        Ok(Self {
            started_at_ms: now_unix_ms(),
            db_pool,
            api,
            price_feed,
            tracker,
            wallet_store,
            watchlists,
        })
    }

    /// Pulls the initial REST state and opens the tracker stream. The price
    /// feed stays closed until a token is selected.
    pub async fn bootstrap(&self) -> Result<(), AppError> {
        let wallet = self.api.wallet_info().await?;
        self.wallet_store.set_server_wallet(wallet);

        let settings = self.api.copy_trade_settings().await?;
        self.wallet_store.set_copy_trade_settings(settings);

        self.tracker.open().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.price_feed.close().await;
        self.tracker.close().await;
        self.db_pool.close().await;
    }
}
