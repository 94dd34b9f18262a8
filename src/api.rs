use crate::error::AppError;
use crate::models::{
    BuyRequest, BuyResult, CopyTradeSettings, DexKind, SellRequest, SellResult, TokenMetadata,
    TradeItem, WalletUpdate, Watchlist,
};
use serde_json::json;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin typed client over the trading backend's REST surface.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub async fn wallet_info(&self) -> Result<WalletUpdate, AppError> {
        let response = self
            .http
            .get(self.endpoint("wallet/info"))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// The backend returns an array of settings rows; the dashboard only ever
    /// uses the first.
    pub async fn copy_trade_settings(&self) -> Result<Option<CopyTradeSettings>, AppError> {
        let response = self
            .http
            .get(self.endpoint("copy_trade_settings"))
            .send()
            .await?
            .error_for_status()?;
        let mut rows: Vec<CopyTradeSettings> = response.json().await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    pub async fn buy(&self, dex: DexKind, request: &BuyRequest) -> Result<BuyResult, AppError> {
        let response = self
            .http
            .post(self.endpoint(&format!("{}/buy", dex.as_str())))
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn sell(&self, dex: DexKind, request: &SellRequest) -> Result<SellResult, AppError> {
        let response = self
            .http
            .post(self.endpoint(&format!("{}/sell", dex.as_str())))
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn token_metadata(&self, token_address: &str) -> Result<TokenMetadata, AppError> {
        let response = self
            .http
            .get(self.endpoint(&format!("token_metadata/{token_address}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn trades(&self, page: u32) -> Result<Vec<TradeItem>, AppError> {
        let response = self
            .http
            .get(self.endpoint(&format!("trades?page={page}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn list_watchlists(&self) -> Result<Vec<Watchlist>, AppError> {
        let response = self
            .http
            .get(self.endpoint("watchlists"))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn get_watchlist(&self, id: &str) -> Result<Watchlist, AppError> {
        let response = self
            .http
            .get(self.endpoint(&format!("watchlists/{id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn create_watchlist(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Watchlist, AppError> {
        let response = self
            .http
            .post(self.endpoint("watchlists"))
            .json(&json!({ "name": name, "description": description }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn update_watchlist(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Watchlist, AppError> {
        let response = self
            .http
            .put(self.endpoint(&format!("watchlists/{id}")))
            .json(&json!({ "name": name, "description": description }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn delete_watchlist(&self, id: &str) -> Result<(), AppError> {
        self.http
            .delete(self.endpoint(&format!("watchlists/{id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn add_watchlist_token(
        &self,
        watchlist_id: &str,
        token_address: &str,
    ) -> Result<(), AppError> {
        self.http
            .post(self.endpoint("watchlists/tokens"))
            .json(&json!({
                "watchlist_id": watchlist_id,
                "token_address": token_address,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn remove_watchlist_token(
        &self,
        watchlist_id: &str,
        token_address: &str,
    ) -> Result<(), AppError> {
        self.http
            .delete(self.endpoint(&format!(
                "watchlists/{watchlist_id}/tokens/{token_address}"
            )))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
