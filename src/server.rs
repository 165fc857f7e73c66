//! Server: owns a listener and tracks connected server-clients (spec §4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::channel::CommunicationChannel;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::events::EventEmitter;
use crate::listener::ConnectionListener;
use crate::message::Message;
use crate::socket_options::SocketOptions;

/// Opaque, monotonically increasing identifier for a connected server-client
/// (spec §3 "Server" bullet), allocated the same way the teacher allocates
/// `ConnectionId`s in `src/ipc/tcp_socket.rs` (`next_connection_id`).
pub type ClientId = u64;

/// The server-side peer object wrapping one connected channel (spec §4.5,
/// §6). Handles the one server-side responsibility this spec assigns it:
/// auto-replying to pings without a `replied_message_id`, which is the sole
/// mechanism the client's RTT subsystem relies on.
pub struct ServerClient {
    id: ClientId,
    channel: Arc<CommunicationChannel>,
    pub on_message_received: EventEmitter<Arc<Message>>,
}

impl ServerClient {
    fn new(id: ClientId, channel: Arc<CommunicationChannel>) -> Arc<Self> {
        let server_client = Arc::new(Self {
            id,
            channel: Arc::clone(&channel),
            on_message_received: EventEmitter::new(),
        });

        let wiring_target = Arc::clone(&server_client);
        channel.on_message_received.subscribe(move |message: Arc<Message>| {
            wiring_target.handle_received(message);
        });

        server_client
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub async fn send_message(&self, message: &Message) -> Result<()> {
        self.channel.send_message(message).await
    }

    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
    }

    fn handle_received(self: &Arc<Self>, message: Arc<Message>) {
        if message.is_ping() && message.replied_message_id().is_none() {
            let pong = Message::pong_for(message.message_id().to_string());
            let channel = Arc::clone(&self.channel);
            tokio::spawn(async move {
                if let Err(e) = channel.send_message(&pong).await {
                    tracing::debug!("failed to auto-reply to ping: {e}");
                }
            });
            // Pings are never raised to the application (mirrors the
            // client-side rule in spec §4.4, applied symmetrically here).
            return;
        }
        self.on_message_received.emit(message);
    }
}

/// Owns a [`ConnectionListener`] and a thread-safe map of connected
/// server-clients (spec §4.5, §6).
pub struct Server {
    endpoint: Endpoint,
    socket_options: SocketOptions,
    listener: AsyncMutex<Option<Arc<ConnectionListener>>>,
    clients: Arc<AsyncMutex<HashMap<ClientId, Arc<ServerClient>>>>,
    next_client_id: Arc<AtomicU64>,

    pub on_client_connected: Arc<EventEmitter<Arc<ServerClient>>>,
    pub on_client_disconnected: Arc<EventEmitter<Arc<ServerClient>>>,
}

impl Server {
    pub fn new(endpoint: Endpoint, socket_options: SocketOptions) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            socket_options,
            listener: AsyncMutex::new(None),
            clients: Arc::new(AsyncMutex::new(HashMap::new())),
            next_client_id: Arc::new(AtomicU64::new(1)),
            on_client_connected: Arc::new(EventEmitter::new()),
            on_client_disconnected: Arc::new(EventEmitter::new()),
        })
    }

    /// Creates and starts the listener.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let listener = ConnectionListener::bind(self.endpoint.clone(), self.socket_options).await?;

        let server = Arc::clone(self);
        listener.on_channel_connected.subscribe(move |channel: Arc<CommunicationChannel>| {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server.adopt_channel(channel).await;
            });
        });

        *self.listener.lock().await = Some(listener);
        debug!("server started on {}", self.endpoint);
        Ok(())
    }

    /// Stops the listener and disconnects every tracked server-client.
    /// Iteration tolerates concurrent removal from disconnect callbacks
    /// (spec §5) because we snapshot the map before disconnecting.
    pub async fn stop(&self) {
        if let Some(listener) = self.listener.lock().await.take() {
            listener.shutdown().await;
        }

        let snapshot: Vec<Arc<ServerClient>> = self.clients.lock().await.values().cloned().collect();
        for client in snapshot {
            client.disconnect().await;
        }
    }

    /// A snapshot enumeration of currently connected clients (spec §6).
    pub async fn clients(&self) -> Vec<Arc<ServerClient>> {
        self.clients.lock().await.values().cloned().collect()
    }

    async fn adopt_channel(self: Arc<Self>, channel: Arc<CommunicationChannel>) {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let server_client = ServerClient::new(id, Arc::clone(&channel));

        self.clients.lock().await.insert(id, Arc::clone(&server_client));
        self.on_client_connected.emit(Arc::clone(&server_client));

        let clients = Arc::clone(&self.clients);
        let disconnected_event = Arc::clone(&self.on_client_disconnected);
        let removed_client = Arc::clone(&server_client);
        channel.on_disconnected.subscribe(move |_| {
            let clients = Arc::clone(&clients);
            let disconnected_event = Arc::clone(&disconnected_event);
            let removed_client = Arc::clone(&removed_client);
            tokio::spawn(async move {
                clients.lock().await.remove(&id);
                disconnected_event.emit(removed_client);
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientConfig};
    use std::time::Duration;

    #[tokio::test]
    async fn echo_server_observes_client_text_message() {
        let endpoint = Endpoint::new("127.0.0.1", 20920);
        let server = Server::new(endpoint.clone(), SocketOptions::default());
        server.start().await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        server.on_client_connected.subscribe(move |server_client: Arc<ServerClient>| {
            let tx = tx.lock().unwrap().take();
            let (inner_tx, inner_rx) = tokio::sync::oneshot::channel();
            server_client.on_message_received.subscribe(move |m: Arc<Message>| {
                let _ = inner_tx.send((*m).clone());
            });
            if let Some(tx) = tx {
                let _ = tx.send(inner_rx);
            }
        });

        let client = Client::new(endpoint, SocketOptions::default(), ClientConfig::default());
        client.connect().await.unwrap();
        client.send_message(Message::text("hello")).await.unwrap();

        let inner_rx = tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), inner_rx).await.unwrap().unwrap();

        match received {
            Message::Text { text, .. } => assert_eq!(text.as_deref(), Some("hello")),
            other => panic!("unexpected message: {other:?}"),
        }

        server.stop().await;
    }

    #[tokio::test]
    async fn client_count_tracks_connect_and_disconnect_events() {
        let endpoint = Endpoint::new("127.0.0.1", 20921);
        let server = Server::new(endpoint.clone(), SocketOptions::default());
        server.start().await.unwrap();

        let mut clients = Vec::new();
        for _ in 0..3 {
            let client = Client::new(endpoint.clone(), SocketOptions::default(), ClientConfig::default());
            client.connect().await.unwrap();
            clients.push(client);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.clients().await.len(), 3);

        for client in &clients {
            client.disconnect().await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.clients().await.len(), 0);

        server.stop().await;
    }

    #[tokio::test]
    async fn server_auto_replies_to_fresh_pings() {
        let endpoint = Endpoint::new("127.0.0.1", 20922);
        let server = Server::new(endpoint.clone(), SocketOptions::default());
        server.start().await.unwrap();

        let client = Client::new(endpoint, SocketOptions::default(), ClientConfig::default());
        client.connect().await.unwrap();

        let completed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let completed1 = Arc::clone(&completed);
        client.on_ping_completed.subscribe(move |_rtt| {
            completed1.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        client.send_message(Message::ping()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(completed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(client.last_ping_rtt_ms().is_some());

        server.stop().await;
    }
}
