use crate::feed::pipeline::StablePriceBook;
use crate::feed::types::{ConnectionState, TradeExecution, TrackerEvent};
use crate::models::{
    CopyTradeSettings, DashboardNotification, NotificationKind, TrackedWallet, WalletUpdate,
};
use parking_lot::RwLock;
use std::collections::VecDeque;

/// Oldest notifications fall off once this many are retained.
pub const MAX_NOTIFICATIONS: usize = 50;

#[derive(Default)]
struct TrackerState {
    server_wallet: Option<WalletUpdate>,
    copy_trade_settings: Option<CopyTradeSettings>,
    tracked_wallets: Vec<TrackedWallet>,
    connection_status: Option<ConnectionState>,
    notifications: VecDeque<DashboardNotification>,
    price_book: StablePriceBook,
}

/// Shared snapshot of everything the wallet tracker stream reports: the
/// managed wallet, copy-trade settings, connection status, and a bounded
/// notification log. Token prices on wallet updates pass through the price
/// book so one bad tick cannot make a balance jump on screen.
#[derive(Default)]
pub struct WalletTrackerStore {
    state: RwLock<TrackerState>,
}

impl WalletTrackerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connection_status(&self, status: ConnectionState) {
        self.state.write().connection_status = Some(status);
    }

    pub fn connection_status(&self) -> Option<ConnectionState> {
        self.state.read().connection_status
    }

    pub fn set_copy_trade_settings(&self, settings: Option<CopyTradeSettings>) {
        self.state.write().copy_trade_settings = settings;
    }

    pub fn copy_trade_settings(&self) -> Option<CopyTradeSettings> {
        self.state.read().copy_trade_settings.clone()
    }

    pub fn set_tracked_wallets(&self, wallets: Vec<TrackedWallet>) {
        self.state.write().tracked_wallets = wallets;
    }

    pub fn tracked_wallets(&self) -> Vec<TrackedWallet> {
        self.state.read().tracked_wallets.clone()
    }

    pub fn server_wallet(&self) -> Option<WalletUpdate> {
        self.state.read().server_wallet.clone()
    }

    pub fn set_server_wallet(&self, mut update: WalletUpdate) {
        let mut state = self.state.write();
        state
            .price_book
            .retain(|mint| update.tokens.iter().any(|token| token.mint == mint));
        for token in &mut update.tokens {
            if let Some(raw) = token.price {
                token.price = Some(state.price_book.stable_price(&token.mint, raw));
            }
        }
        state.server_wallet = Some(update);
    }

    pub fn push_notification(&self, notification: DashboardNotification) {
        let mut state = self.state.write();
        state.notifications.push_front(notification);
        state.notifications.truncate(MAX_NOTIFICATIONS);
    }

    /// Newest first.
    pub fn notifications(&self) -> Vec<DashboardNotification> {
        self.state.read().notifications.iter().cloned().collect()
    }

    pub fn clear_notifications(&self) {
        self.state.write().notifications.clear();
    }

    pub fn apply_tracker_event(&self, event: TrackerEvent) {
        match event {
            TrackerEvent::WalletUpdate { data } => self.set_server_wallet(data),
            TrackerEvent::CopyTradeExecution { data } => {
                self.push_trade_notification(NotificationKind::Success, "COPY TRADE EXECUTION", &data);
            }
            TrackerEvent::TrackedWalletTrade { data } => {
                self.push_trade_notification(NotificationKind::Info, "TRACKED WALLET TRADE", &data);
            }
            TrackerEvent::TransactionLogged { data } => {
                self.push_trade_notification(NotificationKind::Info, "TRANSACTION LOGGED", &data);
            }
            TrackerEvent::Error { data } => {
                self.push_notification(DashboardNotification::new(
                    NotificationKind::Error,
                    "TRACKER ERROR",
                    data.message,
                ));
            }
        }
    }

    fn push_trade_notification(&self, kind: NotificationKind, title: &str, trade: &TradeExecution) {
        self.push_notification(DashboardNotification::new(
            kind,
            title,
            format!(
                "{}: {} {}",
                trade.transaction_type, trade.amount_token, trade.token_symbol
            ),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::TrackerErrorData;
    use crate::models::WalletTokenInfo;

    fn token(mint: &str, price: Option<f64>) -> WalletTokenInfo {
        WalletTokenInfo {
            mint: mint.to_string(),
            symbol: "TKN".to_string(),
            name: "Token".to_string(),
            raw_balance: "1000".to_string(),
            uri: None,
            decimals: 6,
            market_cap: 1_000.0,
            price,
            logo: None,
        }
    }

    fn wallet_update(tokens: Vec<WalletTokenInfo>) -> WalletUpdate {
        WalletUpdate {
            address: "wallet1".to_string(),
            balance: 10.0,
            tokens,
        }
    }

    #[test]
    fn caps_notifications_at_fifty_newest_first() {
        let store = WalletTrackerStore::new();
        for step in 0..60 {
            store.push_notification(DashboardNotification::new(
                NotificationKind::Info,
                format!("note {step}"),
                "",
            ));
        }

        let notifications = store.notifications();
        assert_eq!(notifications.len(), MAX_NOTIFICATIONS);
        assert_eq!(notifications[0].title, "note 59");
        assert_eq!(notifications[49].title, "note 10");
    }

    #[test]
    fn trade_event_becomes_notification() {
        let store = WalletTrackerStore::new();
        store.apply_tracker_event(TrackerEvent::CopyTradeExecution {
            data: TradeExecution {
                transaction_type: "buy".to_string(),
                amount_token: 1234.0,
                token_symbol: "TKN".to_string(),
            },
        });

        let notifications = store.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::Success);
        assert_eq!(notifications[0].title, "COPY TRADE EXECUTION");
        assert_eq!(notifications[0].message, "buy: 1234 TKN");
    }

    #[test]
    fn tracker_error_becomes_error_notification() {
        let store = WalletTrackerStore::new();
        store.apply_tracker_event(TrackerEvent::Error {
            data: TrackerErrorData {
                message: "stream hiccup".to_string(),
            },
        });

        let notifications = store.notifications();
        assert_eq!(notifications[0].kind, NotificationKind::Error);
        assert_eq!(notifications[0].message, "stream hiccup");
    }

    #[test]
    fn wallet_update_prices_are_stabilized() {
        let store = WalletTrackerStore::new();
        store.apply_tracker_event(TrackerEvent::WalletUpdate {
            data: wallet_update(vec![token("mint1", Some(100.0))]),
        });

        // 6% jump rejected: the displayed price holds at the last accepted
        // value.
        store.apply_tracker_event(TrackerEvent::WalletUpdate {
            data: wallet_update(vec![token("mint1", Some(106.0))]),
        });
        let wallet = store.server_wallet().expect("wallet set");
        assert_eq!(wallet.tokens[0].price, Some(100.0));

        // 2% move accepted and smoothed partway.
        store.apply_tracker_event(TrackerEvent::WalletUpdate {
            data: wallet_update(vec![token("mint1", Some(102.0))]),
        });
        let wallet = store.server_wallet().expect("wallet set");
        let price = wallet.tokens[0].price.expect("price present");
        assert!((price - 100.4).abs() < 1e-12);
    }

    #[test]
    fn price_book_forgets_mints_that_leave_the_wallet() {
        let store = WalletTrackerStore::new();
        store.set_server_wallet(wallet_update(vec![token("mint1", Some(100.0))]));

        // mint1 drops out of the wallet, its previous price goes with it.
        store.set_server_wallet(wallet_update(vec![token("mint2", Some(1.0))]));

        // When mint1 returns, a 3x price is a first tick again, not a
        // rejected outlier against the stale 100.0.
        store.set_server_wallet(wallet_update(vec![token("mint1", Some(300.0))]));
        let wallet = store.server_wallet().expect("wallet set");
        assert_eq!(wallet.tokens[0].price, Some(300.0));
    }

    #[test]
    fn connection_status_round_trips() {
        let store = WalletTrackerStore::new();
        assert_eq!(store.connection_status(), None);
        store.set_connection_status(ConnectionState::Connected);
        assert_eq!(store.connection_status(), Some(ConnectionState::Connected));
    }
}
