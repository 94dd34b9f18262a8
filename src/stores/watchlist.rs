use crate::api::ApiClient;
use crate::db::watchlists as cache;
use crate::error::AppError;
use crate::models::{TokenMetadata, Watchlist, WatchlistToken};
use parking_lot::RwLock;
use sqlx::SqlitePool;

#[derive(Default)]
struct WatchlistState {
    watchlists: Vec<Watchlist>,
    tokens: Vec<WatchlistToken>,
    active_watchlist_id: Option<String>,
}

/// Watchlists live on the backend; this store keeps an in-memory snapshot for
/// the UI and mirrors it into the local cache so the last known lists render
/// before the first refresh completes.
pub struct WatchlistStore {
    api: ApiClient,
    pool: SqlitePool,
    state: RwLock<WatchlistState>,
}

impl WatchlistStore {
    pub fn new(api: ApiClient, pool: SqlitePool) -> Self {
        Self {
            api,
            pool,
            state: RwLock::new(WatchlistState::default()),
        }
    }

    pub fn watchlists(&self) -> Vec<Watchlist> {
        self.state.read().watchlists.clone()
    }

    pub fn active_watchlist_id(&self) -> Option<String> {
        self.state.read().active_watchlist_id.clone()
    }

    pub fn active_tokens(&self) -> Vec<WatchlistToken> {
        self.state.read().tokens.clone()
    }

    /// Loads the cached snapshot without touching the network.
    pub async fn hydrate_from_cache(&self) -> Result<(), AppError> {
        let watchlists = cache::load_watchlists(&self.pool).await?;
        let active = cache::load_active_watchlist(&self.pool).await?;
        let active = active.filter(|id| watchlists.iter().any(|watchlist| &watchlist.id == id));
        let tokens = match &active {
            Some(id) => cache::load_token_metadata(&self.pool, id).await?,
            None => Vec::new(),
        };

        let mut state = self.state.write();
        state.watchlists = watchlists;
        state.active_watchlist_id = active;
        state.tokens = tokens;
        Ok(())
    }

    /// Re-fetches the lists from the backend and refreshes the cache. An
    /// active list that no longer exists is deselected.
    pub async fn refresh(&self) -> Result<Vec<Watchlist>, AppError> {
        let watchlists = self.api.list_watchlists().await?;
        cache::save_watchlists(&self.pool, &watchlists).await?;

        let cleared_active = {
            let mut state = self.state.write();
            state.watchlists = watchlists.clone();
            let still_present = state
                .active_watchlist_id
                .as_ref()
                .is_some_and(|id| watchlists.iter().any(|watchlist| &watchlist.id == id));
            if !still_present && state.active_watchlist_id.is_some() {
                state.active_watchlist_id = None;
                state.tokens.clear();
                true
            } else {
                false
            }
        };
        if cleared_active {
            cache::save_active_watchlist(&self.pool, None).await?;
        }

        Ok(watchlists)
    }

    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Watchlist, AppError> {
        let created = self.api.create_watchlist(name, description).await?;
        {
            let mut state = self.state.write();
            state.watchlists.push(created.clone());
        }
        self.persist_lists().await?;
        Ok(created)
    }

    pub async fn update(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Watchlist, AppError> {
        let updated = self.api.update_watchlist(id, name, description).await?;
        {
            let mut state = self.state.write();
            if let Some(entry) = state.watchlists.iter_mut().find(|entry| entry.id == id) {
                *entry = updated.clone();
            }
        }
        self.persist_lists().await?;
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        self.api.delete_watchlist(id).await?;
        let cleared_active = {
            let mut state = self.state.write();
            state.watchlists.retain(|entry| entry.id != id);
            if state.active_watchlist_id.as_deref() == Some(id) {
                state.active_watchlist_id = None;
                state.tokens.clear();
                true
            } else {
                false
            }
        };
        self.persist_lists().await?;
        if cleared_active {
            cache::save_active_watchlist(&self.pool, None).await?;
        }
        Ok(())
    }

    /// Selects a list and loads its token metadata.
    pub async fn set_active(&self, id: Option<&str>) -> Result<(), AppError> {
        if let Some(id) = id {
            let known = self
                .state
                .read()
                .watchlists
                .iter()
                .any(|entry| entry.id == id);
            if !known {
                return Err(AppError::InvalidArgument(format!(
                    "unknown watchlist id: {id}"
                )));
            }
        }

        cache::save_active_watchlist(&self.pool, id).await?;
        {
            let mut state = self.state.write();
            state.active_watchlist_id = id.map(str::to_string);
            state.tokens.clear();
        }
        if id.is_some() {
            self.fetch_active_tokens().await?;
        }
        Ok(())
    }

    pub async fn add_token(&self, watchlist_id: &str, token_address: &str) -> Result<(), AppError> {
        self.api.add_watchlist_token(watchlist_id, token_address).await?;
        {
            let mut state = self.state.write();
            if let Some(entry) = state
                .watchlists
                .iter_mut()
                .find(|entry| entry.id == watchlist_id)
            {
                if !entry.tokens.iter().any(|address| address == token_address) {
                    entry.tokens.push(token_address.to_string());
                }
            }
        }
        self.persist_lists().await?;
        if self.active_watchlist_id().as_deref() == Some(watchlist_id) {
            self.fetch_active_tokens().await?;
        }
        Ok(())
    }

    pub async fn remove_token(
        &self,
        watchlist_id: &str,
        token_address: &str,
    ) -> Result<(), AppError> {
        self.api
            .remove_watchlist_token(watchlist_id, token_address)
            .await?;
        {
            let mut state = self.state.write();
            if let Some(entry) = state
                .watchlists
                .iter_mut()
                .find(|entry| entry.id == watchlist_id)
            {
                entry.tokens.retain(|address| address != token_address);
            }
            if state.active_watchlist_id.as_deref() == Some(watchlist_id) {
                state.tokens.retain(|token| token.address != token_address);
            }
        }
        self.persist_lists().await?;
        Ok(())
    }

    /// Resolves metadata for every member of the active list. Tokens the
    /// backend knows nothing about still render, with placeholder fields.
    pub async fn fetch_active_tokens(&self) -> Result<Vec<WatchlistToken>, AppError> {
        let (active_id, addresses) = {
            let state = self.state.read();
            let Some(id) = state.active_watchlist_id.clone() else {
                return Ok(Vec::new());
            };
            let addresses = state
                .watchlists
                .iter()
                .find(|entry| entry.id == id)
                .map(|entry| entry.tokens.clone())
                .unwrap_or_default();
            (id, addresses)
        };

        let mut tokens = Vec::with_capacity(addresses.len());
        for address in addresses {
            let metadata = match self.api.token_metadata(&address).await {
                Ok(metadata) => metadata,
                Err(error) => {
                    tracing::warn!(%address, %error, "token metadata lookup failed");
                    TokenMetadata {
                        symbol: None,
                        name: None,
                        market_cap: None,
                    }
                }
            };
            let token = WatchlistToken {
                address: address.clone(),
                symbol: metadata.symbol.unwrap_or_else(|| "UNKNOWN".to_string()),
                name: metadata.name.unwrap_or_else(|| "Unknown Token".to_string()),
                market_cap: metadata.market_cap,
            };
            cache::save_token_metadata(&self.pool, &active_id, &token).await?;
            tokens.push(token);
        }

        self.state.write().tokens = tokens.clone();
        Ok(tokens)
    }

    async fn persist_lists(&self) -> Result<(), AppError> {
        let watchlists = self.watchlists();
        cache::save_watchlists(&self.pool, &watchlists).await
    }
}
