//! Wallet tracker stream: a long-lived WebSocket to the copy-trading backend
//! that pushes wallet snapshots and trade events, and accepts commands.

use crate::error::AppError;
use crate::feed::client::{StreamClient, TransportEvent};
use crate::feed::types::{parse_tracker_event, CommandMessage, ConnectionState, StreamConfig};
use crate::models::{CopyTradeSettings, DashboardNotification, NotificationKind};
use crate::stores::WalletTrackerStore;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

struct ConsumerHandle {
    cancel_token: CancellationToken,
    join_handle: tokio::task::JoinHandle<()>,
}

/// Drives the tracker socket and folds everything it reports into the shared
/// store. The backend expects a `start` command on every (re)connection
/// before it begins streaming; the consumer sends it on each transition to
/// connected, so reconnects resubscribe transparently.
pub struct WalletTracker {
    url: String,
    client: Arc<StreamClient>,
    store: Arc<WalletTrackerStore>,
    consumer: Mutex<Option<ConsumerHandle>>,
}

impl WalletTracker {
    pub fn new(url: impl Into<String>, config: StreamConfig, store: Arc<WalletTrackerStore>) -> Self {
        Self {
            url: url.into(),
            client: Arc::new(StreamClient::new(config)),
            store,
            consumer: Mutex::new(None),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.client.state().await
    }

    pub async fn open(&self) {
        let mut slot = self.consumer.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.join_handle.is_finished() {
                drop(slot);
                self.client.open(&self.url).await;
                return;
            }
        }
        if let Some(handle) = slot.take() {
            handle.cancel_token.cancel();
            let _ = handle.join_handle.await;
        }

        let transport = self.client.subscribe();
        let cancel_token = CancellationToken::new();
        let join_handle = tokio::spawn(consume_transport(
            transport,
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            cancel_token.clone(),
        ));
        *slot = Some(ConsumerHandle {
            cancel_token,
            join_handle,
        });
        drop(slot);

        self.client.open(&self.url).await;
    }

    pub async fn close(&self) {
        self.client.close().await;
        let handle = { self.consumer.lock().await.take() };
        if let Some(handle) = handle {
            handle.cancel_token.cancel();
            let _ = handle.join_handle.await;
        }
        self.store
            .set_connection_status(ConnectionState::Disconnected);
    }

    pub async fn update_settings(&self, settings: CopyTradeSettings) -> Result<(), AppError> {
        self.client
            .send(&CommandMessage::UpdateSettings { settings })
            .await
    }

    pub async fn refresh_state(&self) -> Result<(), AppError> {
        self.client.send(&CommandMessage::RefreshState).await
    }

    pub async fn manual_sell(
        &self,
        token_address: &str,
        amount: f64,
        slippage: f64,
    ) -> Result<(), AppError> {
        self.client
            .send(&CommandMessage::ManualSell {
                token_address: token_address.to_string(),
                amount,
                slippage,
            })
            .await
    }
}

async fn consume_transport(
    mut transport: broadcast::Receiver<TransportEvent>,
    client: Arc<StreamClient>,
    store: Arc<WalletTrackerStore>,
    cancel_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel_token.cancelled() => return,
            event = transport.recv() => event,
        };

        match event {
            Ok(TransportEvent::State(state)) => {
                store.set_connection_status(state);
                if state == ConnectionState::Connected {
                    if let Err(error) = client.send(&CommandMessage::Start).await {
                        tracing::warn!(%error, "failed to send start command after connect");
                    }
                }
            }
            Ok(TransportEvent::Payload(mut payload)) => match parse_tracker_event(&mut payload) {
                Ok(event) => store.apply_tracker_event(event),
                Err(error) => {
                    tracing::warn!(%error, "dropping malformed tracker frame");
                }
            },
            Ok(TransportEvent::ReconnectsExhausted { failures }) => {
                store.set_connection_status(ConnectionState::Disconnected);
                store.push_notification(DashboardNotification::new(
                    NotificationKind::Error,
                    "TRACKER DISCONNECTED",
                    format!("connection lost after {failures} failed attempts"),
                ));
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "tracker consumer lagged behind transport");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commands_fail_while_closed() {
        let store = Arc::new(WalletTrackerStore::new());
        let tracker = WalletTracker::new("ws://localhost:0", StreamConfig::default(), store);

        assert!(matches!(
            tracker.refresh_state().await,
            Err(AppError::NotConnected)
        ));
        assert!(matches!(
            tracker.manual_sell("mint1", 1.0, 0.5).await,
            Err(AppError::NotConnected)
        ));
    }
}
