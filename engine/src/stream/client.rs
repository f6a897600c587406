//! Resilient websocket client.
//!
//! Connection lifecycle: `Disconnected → Connecting → Connected`, then
//! `Reconnecting` on any failure with exponential backoff, until an explicit
//! `stop()` makes `Disconnected` terminal. The reconnect attempt counter
//! resets on every successful inbound message.

use crate::stream::{Tick, TickQueue};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

/// Tuning for one venue connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub initial_backoff_secs: f64,
    pub max_backoff_secs: f64,
    pub backoff_multiplier: f64,
    /// No inbound message for this long is treated as a dropped connection.
    pub liveness_window: Duration,
    pub queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            initial_backoff_secs: 1.0,
            max_backoff_secs: 60.0,
            backoff_multiplier: 2.0,
            liveness_window: Duration::from_secs(90),
            queue_capacity: 1000,
        }
    }
}

/// Reconnect delay for the given attempt number (0-based), capped at the
/// configured maximum.
pub fn backoff_delay(config: &StreamConfig, attempt: u32) -> Duration {
    let raw = config.initial_backoff_secs * config.backoff_multiplier.powi(attempt as i32);
    Duration::from_secs_f64(raw.min(config.max_backoff_secs).max(0.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Point-in-time view of the connection, for status endpoints.
#[derive(Debug, Clone)]
pub struct StreamStatus {
    pub is_connected: bool,
    pub is_running: bool,
    pub connection_count: u64,
    pub error_count: u64,
    pub last_message_time: Option<DateTime<Utc>>,
}

/// Turns venue text frames into normalized ticks. Venue wire formats are out
/// of the engine's scope; implementations stay thin.
pub trait VenueCodec: Send + Sync {
    /// Parse a text frame into zero or more ticks.
    fn parse(&self, text: &str) -> Vec<Tick>;

    /// If the frame is an application-level ping, return the pong to send.
    fn pong_for(&self, text: &str) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct WireTick {
    symbol: String,
    price: f64,
    #[serde(default)]
    qty: f64,
    #[serde(default)]
    ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WirePing {
    ping: i64,
}

/// Default codec: JSON tick objects (single or batched) and `{"ping": n}`
/// heartbeats answered by `{"pong": n}`.
pub struct JsonTickCodec;

impl JsonTickCodec {
    fn to_tick(wire: WireTick) -> Tick {
        let timestamp = wire
            .ts
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);
        Tick::new(wire.symbol, wire.price, wire.qty, timestamp)
    }
}

impl VenueCodec for JsonTickCodec {
    fn parse(&self, text: &str) -> Vec<Tick> {
        if let Ok(batch) = serde_json::from_str::<Vec<WireTick>>(text) {
            return batch.into_iter().map(Self::to_tick).collect();
        }
        if let Ok(single) = serde_json::from_str::<WireTick>(text) {
            return vec![Self::to_tick(single)];
        }
        Vec::new()
    }

    fn pong_for(&self, text: &str) -> Option<String> {
        serde_json::from_str::<WirePing>(text)
            .ok()
            .map(|p| format!("{{\"pong\":{}}}", p.ping))
    }
}

struct Shared {
    config: StreamConfig,
    codec: Box<dyn VenueCodec>,
    queue: Arc<TickQueue>,
    state: Mutex<ConnectionState>,
    is_running: AtomicBool,
    connection_count: AtomicU64,
    error_count: AtomicU64,
    last_message: Mutex<Option<DateTime<Utc>>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }
}

/// One resilient connection to a market-data venue.
pub struct StreamClient {
    shared: Arc<Shared>,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StreamClient {
    pub fn new(config: StreamConfig, codec: Box<dyn VenueCodec>) -> Self {
        let queue = Arc::new(TickQueue::new(config.queue_capacity));
        let (stop_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                codec,
                queue,
                state: Mutex::new(ConnectionState::Disconnected),
                is_running: AtomicBool::new(false),
                connection_count: AtomicU64::new(0),
                error_count: AtomicU64::new(0),
                last_message: Mutex::new(None),
            }),
            stop_tx,
            handle: Mutex::new(None),
        }
    }

    /// The intake queue this client feeds. Bot subscriptions consume from it.
    pub fn queue(&self) -> Arc<TickQueue> {
        self.shared.queue.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            is_connected: self.state() == ConnectionState::Connected,
            is_running: self.shared.is_running.load(Ordering::SeqCst),
            connection_count: self.shared.connection_count.load(Ordering::SeqCst),
            error_count: self.shared.error_count.load(Ordering::SeqCst),
            last_message_time: *self.shared.last_message.lock().unwrap(),
        }
    }

    /// Spawn the connection task. A second call while running is a no-op.
    pub fn start(&self) {
        if self.shared.is_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        let stop_rx = self.stop_tx.subscribe();
        let task = tokio::spawn(run_loop(shared, stop_rx));
        *self.handle.lock().unwrap() = Some(task);
    }

    /// Terminal transition: cancels any pending reconnect and waits for the
    /// connection task to finish. Idempotent.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let task = self.handle.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.shared.is_running.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

async fn run_loop(shared: Arc<Shared>, mut stop_rx: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;

    'session: loop {
        if *stop_rx.borrow() {
            break;
        }

        shared.set_state(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        match connect_async(shared.config.url.as_str()).await {
            Ok((stream, _)) => {
                shared.set_state(ConnectionState::Connected);
                shared.connection_count.fetch_add(1, Ordering::SeqCst);
                info!(url = %shared.config.url, "market stream connected");

                let (mut write, mut read) = stream.split();

                loop {
                    tokio::select! {
                        _ = stop_rx.changed() => {
                            let _ = write.send(Message::Close(None)).await;
                            break 'session;
                        }
                        frame = timeout(shared.config.liveness_window, read.next()) => {
                            match frame {
                                Err(_) => {
                                    warn!("no message within liveness window, treating as drop");
                                    shared.error_count.fetch_add(1, Ordering::SeqCst);
                                    break;
                                }
                                Ok(None) => {
                                    warn!("market stream closed by peer");
                                    shared.error_count.fetch_add(1, Ordering::SeqCst);
                                    break;
                                }
                                Ok(Some(Err(e))) => {
                                    error!("market stream error: {e}");
                                    shared.error_count.fetch_add(1, Ordering::SeqCst);
                                    break;
                                }
                                Ok(Some(Ok(message))) => {
                                    // any successful receipt resets the backoff ladder
                                    attempt = 0;
                                    *shared.last_message.lock().unwrap() = Some(Utc::now());
                                    match message {
                                        Message::Ping(payload) => {
                                            if write.send(Message::Pong(payload)).await.is_err() {
                                                break;
                                            }
                                        }
                                        Message::Text(text) => {
                                            if let Some(pong) = shared.codec.pong_for(&text) {
                                                if write.send(Message::Text(pong)).await.is_err() {
                                                    break;
                                                }
                                            } else {
                                                for tick in shared.codec.parse(&text) {
                                                    if shared.queue.push(tick).is_some() {
                                                        debug!("intake queue full, dropped oldest tick");
                                                    }
                                                }
                                            }
                                        }
                                        Message::Close(_) => break,
                                        _ => {}
                                    }
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                shared.error_count.fetch_add(1, Ordering::SeqCst);
                error!(url = %shared.config.url, "market stream connect failed: {e}");
            }
        }

        if *stop_rx.borrow() {
            break;
        }

        shared.set_state(ConnectionState::Reconnecting);
        let delay = backoff_delay(&shared.config, attempt);
        attempt = attempt.saturating_add(1);
        warn!(attempt, delay_secs = delay.as_secs_f64(), "scheduling reconnect");

        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = sleep(delay) => {}
        }
    }

    shared.set_state(ConnectionState::Disconnected);
    shared.is_running.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial: f64, max: f64, multiplier: f64) -> StreamConfig {
        StreamConfig {
            initial_backoff_secs: initial,
            max_backoff_secs: max,
            backoff_multiplier: multiplier,
            ..StreamConfig::default()
        }
    }

    #[test]
    fn test_backoff_sequence_doubles_then_caps() {
        let config = config(1.0, 10.0, 2.0);
        let delays: Vec<f64> =
            (0..6).map(|a| backoff_delay(&config, a).as_secs_f64()).collect();
        assert_eq!(&delays[..3], &[1.0, 2.0, 4.0]);
        assert_eq!(delays[4], 10.0);
        assert_eq!(delays[5], 10.0);
        // non-decreasing across consecutive failures
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_codec_parses_single_and_batch() {
        let codec = JsonTickCodec;
        let single = codec.parse(r#"{"symbol":"ETH/USDT","price":2000.5,"qty":0.3,"ts":1700000000000}"#);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].price, 2000.5);

        let batch = codec.parse(
            r#"[{"symbol":"ETH/USDT","price":1.0},{"symbol":"ETH/USDT","price":2.0}]"#,
        );
        assert_eq!(batch.len(), 2);

        assert!(codec.parse("not json").is_empty());
    }

    #[test]
    fn test_codec_answers_ping() {
        let codec = JsonTickCodec;
        assert_eq!(codec.pong_for(r#"{"ping":42}"#), Some("{\"pong\":42}".to_string()));
        assert!(codec.pong_for(r#"{"symbol":"x","price":1.0}"#).is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_without_start() {
        let client = StreamClient::new(config(0.01, 0.02, 2.0), Box::new(JsonTickCodec));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        client.stop().await;
        client.stop().await;
        let status = client.status();
        assert!(!status.is_running);
        assert!(!status.is_connected);
        assert_eq!(status.connection_count, 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_reconnect_cycle() {
        // unroutable URL: the client will fail to connect and sit in backoff
        let mut cfg = config(5.0, 10.0, 2.0);
        cfg.url = "ws://127.0.0.1:1/never".to_string();
        let client = StreamClient::new(cfg, Box::new(JsonTickCodec));
        client.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // stop() must return promptly even though a 5s backoff sleep is pending
        timeout(Duration::from_secs(1), client.stop()).await.expect("stop within grace");
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.status().error_count >= 1);
    }
}
