//! Client: drives one channel, owns the ping timer and RTT tracking, and
//! exposes the public connect/disconnect/send surface (spec §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::channel::{CommunicationChannel, CommunicationState};
use crate::endpoint::Endpoint;
use crate::error::{CommError, Result};
use crate::events::EventEmitter;
use crate::message::Message;
use crate::rtt::RttWindow;
use crate::socket_options::SocketOptions;

/// Default ping period (spec §4.4).
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;
/// Default connect timeout (spec §4.4).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;
/// The channel is considered quiescent enough to need a ping only after
/// this many milliseconds of silence in both directions (spec §4.4, §9
/// "Open question — quiescence threshold").
const QUIESCENCE_THRESHOLD_MS: i64 = 60_000;

/// Per-client configuration (spec §4.4, §6).
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            ping_interval: Duration::from_millis(DEFAULT_PING_INTERVAL_MS),
        }
    }
}

struct PendingPing {
    sent_at: Instant,
}

/// Drives one [`CommunicationChannel`] to a configured endpoint. Public
/// surface per spec §6: `connect`, `disconnect`, `send_message`, plus the
/// `Connected`/`Disconnected`/`MessageReceived`/`MessageSent`/
/// `PingCompleted` events and the `PingInterval`/`LastPingRtt`/
/// `AveragePingRtt` properties.
pub struct Client {
    endpoint: Endpoint,
    socket_options: SocketOptions,
    connect_timeout: Duration,
    ping_interval_ms: AtomicU64,

    channel: AsyncMutex<Option<Arc<CommunicationChannel>>>,
    ping_task: AsyncMutex<Option<JoinHandle<()>>>,
    pending_pings: Arc<AsyncMutex<HashMap<String, PendingPing>>>,
    rtt: Arc<std::sync::Mutex<RttWindow>>,

    pub on_connected: EventEmitter<()>,
    pub on_disconnected: EventEmitter<()>,
    pub on_message_received: EventEmitter<Arc<Message>>,
    pub on_message_sent: EventEmitter<Arc<Message>>,
    pub on_ping_completed: EventEmitter<u64>,
}

impl Client {
    pub fn new(endpoint: Endpoint, socket_options: SocketOptions, config: ClientConfig) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            socket_options,
            connect_timeout: config.connect_timeout,
            ping_interval_ms: AtomicU64::new(config.ping_interval.as_millis() as u64),
            channel: AsyncMutex::new(None),
            ping_task: AsyncMutex::new(None),
            pending_pings: Arc::new(AsyncMutex::new(HashMap::new())),
            rtt: Arc::new(std::sync::Mutex::new(RttWindow::new())),
            on_connected: EventEmitter::new(),
            on_disconnected: EventEmitter::new(),
            on_message_received: EventEmitter::new(),
            on_message_sent: EventEmitter::new(),
            on_ping_completed: EventEmitter::new(),
        })
    }

    pub async fn state(&self) -> CommunicationState {
        match self.channel.lock().await.as_ref() {
            Some(channel) => channel.state(),
            None => CommunicationState::Disconnected,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.load(Ordering::Relaxed))
    }

    /// Mutable at any time, including while connected (spec §4.4); observed
    /// on the timer's next tick.
    pub fn set_ping_interval(&self, interval: Duration) {
        self.ping_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn last_ping_rtt_ms(&self) -> Option<u64> {
        self.rtt.lock().unwrap().last()
    }

    pub fn average_ping_rtt_ms(&self) -> Option<f64> {
        self.rtt.lock().unwrap().average()
    }

    /// Only valid when Disconnected. Establishes a fresh channel and starts
    /// the ping timer (spec §4.4, invariant 3).
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        {
            let guard = self.channel.lock().await;
            if let Some(existing) = guard.as_ref() {
                if existing.state() == CommunicationState::Connected {
                    return Err(CommError::State("client is already connected".into()));
                }
            }
        }

        let addr = self.endpoint.socket_addr_string();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| CommError::ConnectTimeout {
                endpoint: self.endpoint.to_string(),
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })?
            .map_err(CommError::Transport)?;

        let channel = CommunicationChannel::start(stream, &self.socket_options)?;
        self.wire_channel_events(Arc::clone(&channel));

        *self.channel.lock().await = Some(channel);
        self.pending_pings.lock().await.clear();

        self.start_ping_timer().await;
        self.on_connected.emit(());
        debug!("connected to {}", self.endpoint);
        Ok(())
    }

    /// No-op if not connected; otherwise disconnects the underlying
    /// channel, whose `Disconnected` event in turn stops the ping timer,
    /// clears pending pings, and re-emits the client's own `Disconnected`.
    pub async fn disconnect(&self) {
        let channel = self.channel.lock().await.clone();
        if let Some(channel) = channel {
            channel.disconnect().await;
        }
    }

    /// Fails with a state error if not connected; otherwise delegates to
    /// the channel. Fresh pings (no `replied_message_id`) are recorded in
    /// the pending-ping map before the send completes, so a reply that
    /// races with this call is never missed (spec §4.4 "Sent-message
    /// handling").
    pub async fn send_message(&self, message: Message) -> Result<()> {
        let channel = self
            .channel
            .lock()
            .await
            .clone()
            .ok_or_else(|| CommError::State("client is not connected".into()))?;

        if channel.state() != CommunicationState::Connected {
            return Err(CommError::State("client is not connected".into()));
        }

        let is_fresh_ping = message.is_ping() && message.replied_message_id().is_none();
        if is_fresh_ping {
            self.pending_pings.lock().await.insert(
                message.message_id().to_string(),
                PendingPing {
                    sent_at: Instant::now(),
                },
            );
        }

        channel.send_message(&message).await?;
        self.on_message_sent.emit(Arc::new(message));
        Ok(())
    }

    fn wire_channel_events(self: &Arc<Self>, channel: Arc<CommunicationChannel>) {
        let received_client = Arc::clone(self);
        channel.on_message_received.subscribe(move |message: Arc<Message>| {
            received_client.handle_received(message);
        });

        let disconnected_client = Arc::clone(self);
        channel.on_disconnected.subscribe(move |_| {
            let client = Arc::clone(&disconnected_client);
            tokio::spawn(async move {
                client.handle_channel_disconnected().await;
            });
        });
    }

    fn handle_received(self: &Arc<Self>, message: Arc<Message>) {
        if !message.is_ping() {
            self.on_message_received.emit(message);
            return;
        }

        // Ping messages are never raised to the application (spec §4.4).
        let Some(reply_id) = message.replied_message_id().map(|s| s.to_string()) else {
            return;
        };

        let client = Arc::clone(self);
        tokio::spawn(async move {
            let sent_at = {
                let mut pending = client.pending_pings.lock().await;
                pending.remove(&reply_id).map(|p| p.sent_at)
            };

            if let Some(sent_at) = sent_at {
                let rtt_ms = sent_at.elapsed().as_millis() as u64;
                client.rtt.lock().unwrap().push(rtt_ms);
                client.on_ping_completed.emit(rtt_ms);
            }
            // A reply id not present in the pending map updates nothing
            // (e.g. the server's auto-reply to a ping we no longer track).
        });
    }

    async fn handle_channel_disconnected(&self) {
        self.stop_ping_timer().await;
        self.pending_pings.lock().await.clear();
        *self.channel.lock().await = None;
        self.on_disconnected.emit(());
    }

    async fn start_ping_timer(self: &Arc<Self>) {
        self.stop_ping_timer().await;
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            client.ping_timer_loop().await;
        });
        *self.ping_task.lock().await = Some(handle);
    }

    async fn stop_ping_timer(&self) {
        if let Some(handle) = self.ping_task.lock().await.take() {
            handle.abort();
        }
    }

    async fn ping_timer_loop(self: Arc<Self>) {
        loop {
            let interval_ms = self.ping_interval_ms.load(Ordering::Relaxed);
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;

            let channel = self.channel.lock().await.clone();
            let Some(channel) = channel else { break };
            if channel.state() != CommunicationState::Connected {
                break;
            }

            if self.is_quiescent(&channel) {
                if let Err(e) = self.send_message(Message::ping()).await {
                    // Ping failures are non-fatal: trace and suppress
                    // (spec §4.4, §7).
                    warn!("ping send failed: {e}");
                }
            } else {
                trace!("skipping ping, channel has recent traffic");
            }
        }
    }

    fn is_quiescent(&self, channel: &CommunicationChannel) -> bool {
        let now = now_ms();
        let received_quiet = now - channel.last_received_message_time_ms() >= QUIESCENCE_THRESHOLD_MS;
        let sent_quiet = now - channel.last_sent_message_time_ms() >= QUIESCENCE_THRESHOLD_MS;
        received_quiet && sent_quiet
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
