use crate::error::AppError;
use crate::feed::types::{CommandMessage, ConnectionState, StreamConfig};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TRANSPORT_EVENT_CAPACITY: usize = 256;

/// What a subscription broadcasts to its observers: state transitions, raw
/// inbound payloads, and a terminal notice once reconnection gives up.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    State(ConnectionState),
    Payload(Vec<u8>),
    ReconnectsExhausted { failures: u32 },
}

struct SubscriptionHandle {
    target: String,
    cancellation_token: CancellationToken,
    join_handle: tokio::task::JoinHandle<()>,
    commands: mpsc::UnboundedSender<CommandMessage>,
}

/// Owns one logical stream subscription bound to exactly one WebSocket
/// connection at a time, with automatic constant-delay reconnection up to a
/// bounded number of consecutive failures.
pub struct StreamClient {
    config: StreamConfig,
    events: broadcast::Sender<TransportEvent>,
    state: Arc<RwLock<ConnectionState>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl StreamClient {
    pub fn new(config: StreamConfig) -> Self {
        let (events, _) = broadcast::channel(TRANSPORT_EVENT_CAPACITY);
        Self {
            config,
            events,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            subscription: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Target of the live subscription, if its task is still running.
    pub async fn current_target(&self) -> Option<String> {
        let slot = self.subscription.lock().await;
        slot.as_ref()
            .filter(|handle| !handle.join_handle.is_finished())
            .map(|handle| handle.target.clone())
    }

    /// Opens a subscription to `target` (a full ws/wss URL). No-op when the
    /// running subscription already covers the same target; otherwise the old
    /// connection is torn down and awaited before the new one starts, so a
    /// stale transport can never deliver into the new subscription.
    pub async fn open(&self, target: &str) {
        let mut slot = self.subscription.lock().await;
        if let Some(handle) = slot.as_ref() {
            if handle.target == target && !handle.join_handle.is_finished() {
                return;
            }
        }
        if let Some(handle) = slot.take() {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
        }

        let cancellation_token = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let runtime = SubscriptionRuntime {
            target: target.to_string(),
            config: self.config.clone(),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
            cancel_token: cancellation_token.clone(),
        };
        let join_handle = tokio::spawn(run_subscription(runtime, command_rx));

        *slot = Some(SubscriptionHandle {
            target: target.to_string(),
            cancellation_token,
            join_handle,
            commands: command_tx,
        });
    }

    /// Idempotent: releases the transport and cancels any pending reconnect
    /// timer.
    pub async fn close(&self) {
        let handle = { self.subscription.lock().await.take() };
        if let Some(handle) = handle {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
        }

        let mut writable = self.state.write().await;
        *writable = ConnectionState::Disconnected;
    }

    /// Delivers a command to the remote endpoint. Commands are never queued:
    /// sending while not connected fails immediately.
    pub async fn send(&self, command: &CommandMessage) -> Result<(), AppError> {
        let slot = self.subscription.lock().await;
        let Some(handle) = slot.as_ref() else {
            tracing::warn!("dropping outbound command: stream is not open");
            return Err(AppError::NotConnected);
        };
        if *self.state.read().await != ConnectionState::Connected {
            tracing::warn!(target_url = %handle.target, "dropping outbound command: stream is not connected");
            return Err(AppError::NotConnected);
        }
        handle
            .commands
            .send(command.clone())
            .map_err(|_| AppError::NotConnected)
    }
}

struct SubscriptionRuntime {
    target: String,
    config: StreamConfig,
    events: broadcast::Sender<TransportEvent>,
    state: Arc<RwLock<ConnectionState>>,
    cancel_token: CancellationToken,
}

impl SubscriptionRuntime {
    async fn set_state(&self, next: ConnectionState) {
        {
            let mut writable = self.state.write().await;
            if *writable == next {
                return;
            }
            *writable = next;
        }
        tracing::debug!(state = next.as_str(), target_url = %self.target, "stream state changed");
        let _ = self.events.send(TransportEvent::State(next));
    }
}

async fn connect(target: &str) -> Result<WsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(4 << 20),
        max_frame_size: Some(1 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(target, Some(ws_config), true).await?;
    Ok(stream)
}

async fn run_subscription(
    runtime: SubscriptionRuntime,
    mut command_rx: mpsc::UnboundedReceiver<CommandMessage>,
) {
    let mut failures: u32 = 0;

    while !runtime.cancel_token.is_cancelled() {
        runtime.set_state(ConnectionState::Connecting).await;

        match connect(&runtime.target).await {
            Ok(stream) => {
                failures = 0;
                runtime.set_state(ConnectionState::Connected).await;

                let clean_close = drive_connection(&runtime, stream, &mut command_rx).await;
                if runtime.cancel_token.is_cancelled() || clean_close {
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(target_url = %runtime.target, %error, "websocket connect failed");
            }
        }

        runtime.set_state(ConnectionState::Disconnected).await;
        if runtime.cancel_token.is_cancelled() {
            break;
        }

        failures = failures.saturating_add(1);
        if failures >= runtime.config.max_reconnect_attempts {
            tracing::warn!(
                target_url = %runtime.target,
                failures,
                "reconnect attempts exhausted; stream stays down until reopened"
            );
            let _ = runtime
                .events
                .send(TransportEvent::ReconnectsExhausted { failures });
            return;
        }

        tokio::select! {
            _ = runtime.cancel_token.cancelled() => break,
            _ = tokio::time::sleep(runtime.config.reconnect_delay) => {}
        }
    }

    runtime.set_state(ConnectionState::Disconnected).await;
}

/// Pumps one live connection. Returns true when the connection ended with a
/// clean close (no reconnect), false when it dropped and the reconnect path
/// should run.
async fn drive_connection(
    runtime: &SubscriptionRuntime,
    stream: WsStream,
    command_rx: &mut mpsc::UnboundedReceiver<CommandMessage>,
) -> bool {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            _ = runtime.cancel_token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return true;
            }
            command = command_rx.recv() => {
                let Some(command) = command else {
                    // Handle dropped out from under the task; nothing left to serve.
                    return true;
                };
                match serde_json::to_string(&command) {
                    Ok(text) => {
                        if let Err(error) = sink.send(Message::Text(text)).await {
                            tracing::warn!(target_url = %runtime.target, %error, "failed to send command frame");
                            return false;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "failed to encode outbound command");
                    }
                }
            }
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let _ = runtime.events.send(TransportEvent::Payload(text.into_bytes()));
                    }
                    Some(Ok(Message::Binary(payload))) => {
                        let _ = runtime.events.send(TransportEvent::Payload(payload));
                    }
                    Some(Ok(Message::Close(_))) => return true,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::warn!(target_url = %runtime.target, %error, "websocket frame error");
                        return false;
                    }
                    None => return false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_open_is_rejected() {
        let client = StreamClient::new(StreamConfig::default());
        let result = client.send(&CommandMessage::Start).await;
        assert!(matches!(result, Err(AppError::NotConnected)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let client = StreamClient::new(StreamConfig::default());
        client.close().await;
        client.close().await;
        assert_eq!(client.state().await, ConnectionState::Disconnected);
        assert_eq!(client.current_target().await, None);
    }
}
