//! Token price feed: a reconnecting WebSocket subscription whose frames are
//! validated, smoothed, and folded into a bounded candle series.

pub mod client;
pub mod pipeline;
pub mod types;

pub use client::{StreamClient, TransportEvent};
pub use pipeline::{
    CandleAggregator, PriceDecision, PricePipeline, PriceStabilizer, StablePriceBook, TickOutcome,
};
pub use types::{
    parse_price_tick, parse_tracker_event, Candle, CommandMessage, ConnectionState, PriceTick,
    StreamConfig, TrackerEvent,
};

use crate::models::now_unix_secs;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

const FEED_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct PriceFeedConfig {
    pub base_url: String,
    pub stream: StreamConfig,
    pub stabilizer: PriceStabilizer,
    pub candle_interval_secs: i64,
    pub max_bars: usize,
}

impl PriceFeedConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            stream: StreamConfig::default(),
            stabilizer: PriceStabilizer::default(),
            candle_interval_secs: types::DEFAULT_CANDLE_INTERVAL_SECS,
            max_bars: types::DEFAULT_MAX_BARS,
        }
    }
}

/// What the feed publishes to observers after validation and aggregation.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    State(ConnectionState),
    Price {
        tick: PriceTick,
        stable_price: f64,
        candles: Vec<Candle>,
    },
    ReconnectsExhausted {
        failures: u32,
    },
}

struct ConsumerHandle {
    cancel_token: CancellationToken,
    join_handle: tokio::task::JoinHandle<()>,
}

/// One-token-at-a-time price subscription. Switching tokens tears down the
/// previous pipeline entirely, so bars never mix across tokens.
pub struct PriceFeed {
    config: PriceFeedConfig,
    client: StreamClient,
    events: broadcast::Sender<FeedEvent>,
    consumer: Mutex<Option<ConsumerHandle>>,
}

impl PriceFeed {
    pub fn new(config: PriceFeedConfig) -> Self {
        let client = StreamClient::new(config.stream.clone());
        let (events, _) = broadcast::channel(FEED_EVENT_CAPACITY);
        Self {
            config,
            client,
            events,
            consumer: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.client.state().await
    }

    /// Subscribes to `token_address`. No-op when that token's subscription is
    /// already live; any other live subscription is replaced.
    pub async fn open(&self, token_address: &str) {
        let target = feed_ws_url(&self.config.base_url, token_address);
        if self.client.current_target().await.as_deref() == Some(target.as_str()) {
            return;
        }

        let mut slot = self.consumer.lock().await;
        if let Some(handle) = slot.take() {
            handle.cancel_token.cancel();
            let _ = handle.join_handle.await;
        }

        // The old transport must be fully torn down before the new consumer
        // subscribes; otherwise a frame from the previous target could seed
        // the fresh pipeline and get its real first price rejected as an
        // outlier.
        self.client.close().await;

        // Subscribe before opening so no frame from the new connection can be
        // missed.
        let transport = self.client.subscribe();
        let cancel_token = CancellationToken::new();
        let pipeline = PricePipeline::new(
            self.config.stabilizer,
            self.config.candle_interval_secs,
            self.config.max_bars,
        );
        let join_handle = tokio::spawn(consume_transport(
            transport,
            pipeline,
            self.events.clone(),
            cancel_token.clone(),
        ));
        *slot = Some(ConsumerHandle {
            cancel_token,
            join_handle,
        });
        drop(slot);

        self.client.open(&target).await;
    }

    pub async fn close(&self) {
        self.client.close().await;
        let handle = { self.consumer.lock().await.take() };
        if let Some(handle) = handle {
            handle.cancel_token.cancel();
            let _ = handle.join_handle.await;
        }
    }
}

async fn consume_transport(
    mut transport: broadcast::Receiver<TransportEvent>,
    mut pipeline: PricePipeline,
    events: broadcast::Sender<FeedEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel_token.cancelled() => return,
            event = transport.recv() => event,
        };

        match event {
            Ok(TransportEvent::State(state)) => {
                let _ = events.send(FeedEvent::State(state));
            }
            Ok(TransportEvent::Payload(mut payload)) => {
                let tick = match parse_price_tick(&mut payload, now_unix_secs()) {
                    Ok(tick) => tick,
                    Err(error) => {
                        tracing::warn!(%error, "dropping malformed price frame");
                        continue;
                    }
                };
                match pipeline.apply_tick(&tick) {
                    TickOutcome::Applied { stable_price } => {
                        let _ = events.send(FeedEvent::Price {
                            tick,
                            stable_price,
                            candles: pipeline.candles(),
                        });
                    }
                    TickOutcome::RejectedOutlier { previous } => {
                        tracing::warn!(
                            raw_price = tick.price_sol,
                            previous,
                            "dropping implausible price change"
                        );
                    }
                    TickOutcome::StaleTimestamp => {
                        tracing::warn!(timestamp = tick.timestamp, "dropping out-of-order tick");
                    }
                }
            }
            Ok(TransportEvent::ReconnectsExhausted { failures }) => {
                let _ = events.send(FeedEvent::ReconnectsExhausted { failures });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "price feed consumer lagged behind transport");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Builds the per-token stream URL from the configured feed base. Plain HTTP
/// bases are rewritten to their WebSocket scheme.
pub fn feed_ws_url(base_url: &str, token_address: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws?token={token_address}")
}
