//! Per-connection communication channel.
//!
//! Wraps one connected TCP stream plus an exclusively-owned [`WireProtocol`].
//! Spins up a receive pump on `start()` and serializes sends behind a
//! per-channel lock, turning a raw full-duplex socket into an
//! event-raising channel.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error};

use crate::error::{CommError, Result};
use crate::events::EventEmitter;
use crate::message::Message;
use crate::socket_options::SocketOptions;
use crate::wire::WireProtocol;

/// Default receive buffer size: a fixed constant that callers building on
/// this crate may grow for higher-throughput workloads.
pub const DEFAULT_RECEIVE_BUFFER: usize = 4 * 1024;

/// Communication state. The transient "connecting" state inside `connect`
/// is not modeled as an observable variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationState {
    Disconnected,
    Connected,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A per-connection channel: owns the socket, the wire protocol
/// accumulator, the send lock, and last-activity timestamps.
pub struct CommunicationChannel {
    write_half: AsyncMutex<Option<tokio::net::tcp::OwnedWriteHalf>>,
    wire: AsyncMutex<WireProtocol>,
    state: AtomicBool, // true == Connected
    running: AtomicBool,
    last_received_ms: AtomicI64,
    last_sent_ms: AtomicI64,

    pub on_message_received: EventEmitter<Arc<Message>>,
    pub on_disconnected: EventEmitter<()>,
}

impl CommunicationChannel {
    /// Wrap an already-connected `TcpStream`, apply `options`, and spin up
    /// the receive pump. Transitions the channel to `Connected`.
    pub fn start(stream: TcpStream, options: &SocketOptions) -> Result<Arc<Self>> {
        options.apply(&socket2::SockRef::from(&stream));

        let (read_half, write_half) = stream.into_split();

        let channel = Arc::new(Self {
            write_half: AsyncMutex::new(Some(write_half)),
            wire: AsyncMutex::new(WireProtocol::new()),
            state: AtomicBool::new(true),
            running: AtomicBool::new(true),
            last_received_ms: AtomicI64::new(now_ms()),
            last_sent_ms: AtomicI64::new(now_ms()),
            on_message_received: EventEmitter::new(),
            on_disconnected: EventEmitter::new(),
        });

        let pump_channel = Arc::clone(&channel);
        tokio::spawn(async move {
            pump_channel.receive_pump(read_half).await;
        });

        Ok(channel)
    }

    pub fn state(&self) -> CommunicationState {
        if self.state.load(Ordering::SeqCst) {
            CommunicationState::Connected
        } else {
            CommunicationState::Disconnected
        }
    }

    pub fn last_received_message_time_ms(&self) -> i64 {
        self.last_received_ms.load(Ordering::Relaxed)
    }

    pub fn last_sent_message_time_ms(&self) -> i64 {
        self.last_sent_ms.load(Ordering::Relaxed)
    }

    /// Serialize `message` and write it out, draining the write buffer
    /// completely. Serialized under the per-channel send lock so sends from
    /// multiple callers are never interleaved on the wire.
    pub async fn send_message(&self, message: &Message) -> Result<()> {
        if self.state() != CommunicationState::Connected {
            return Err(CommError::State("channel is not connected".into()));
        }

        let bytes = {
            let wire = self.wire.lock().await;
            wire.get_bytes(message)?
        };

        let mut guard = self.write_half.lock().await;
        let Some(write_half) = guard.as_mut() else {
            return Err(CommError::State("channel is not connected".into()));
        };

        match write_half.write_all(&bytes).await {
            Ok(()) => {
                self.last_sent_ms.store(now_ms(), Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                drop(guard);
                self.fail_and_disconnect().await;
                Err(CommError::Transport(e))
            }
        }
    }

    /// Idempotent disconnect: the first call closes the socket and emits
    /// `Disconnected` exactly once; subsequent calls are no-ops.
    pub async fn disconnect(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.state.store(false, Ordering::SeqCst);
        *self.write_half.lock().await = None;
        self.on_disconnected.emit(());
    }

    async fn fail_and_disconnect(&self) {
        self.disconnect().await;
    }

    async fn receive_pump(self: Arc<Self>, mut read_half: tokio::net::tcp::OwnedReadHalf) {
        let mut buf = vec![0u8; DEFAULT_RECEIVE_BUFFER];

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let n = match read_half.read(&mut buf).await {
                Ok(0) => {
                    debug!("peer closed the connection");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    error!("read failed, failing channel: {e}");
                    break;
                }
            };

            self.last_received_ms.store(now_ms(), Ordering::Relaxed);

            let messages = {
                let mut wire = self.wire.lock().await;
                wire.create_messages(&buf[..n])
            };

            match messages {
                Ok(messages) => {
                    for message in messages {
                        self.on_message_received.emit(Arc::new(message));
                    }
                }
                Err(e) => {
                    error!("framing error, failing channel: {e}");
                    break;
                }
            }
        }

        self.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (Arc<CommunicationChannel>, Arc<CommunicationChannel>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_fut = listener.accept();
        let connect_fut = TcpStream::connect(addr);
        let ((server_stream, _), client_stream) = tokio::join!(accept_fut, connect_fut);

        let server = CommunicationChannel::start(server_stream.unwrap(), &SocketOptions::default())
            .unwrap();
        let client = CommunicationChannel::start(client_stream.unwrap(), &SocketOptions::default())
            .unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn send_is_observed_as_message_received_on_the_peer() {
        let (server, client) = connected_pair().await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        server.on_message_received.subscribe(move |m: Arc<Message>| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send((*m).clone());
            }
        });

        client.send_message(&Message::text("hello")).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        match received {
            Message::Text { text, .. } => assert_eq!(text.as_deref(), Some("hello")),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_emits_once() {
        let (_server, client) = connected_pair().await;

        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count1 = Arc::clone(&count);
        client
            .on_disconnected
            .subscribe(move |_| {
                count1.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });

        client.disconnect().await;
        client.disconnect().await;

        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(client.state(), CommunicationState::Disconnected);
    }

    #[tokio::test]
    async fn send_after_disconnect_fails_with_state_error() {
        let (_server, client) = connected_pair().await;
        client.disconnect().await;

        let err = client.send_message(&Message::text("x")).await.unwrap_err();
        assert!(matches!(err, CommError::State(_)));
    }
}
