//! Connection listener: binds a port and accepts connections (spec §4.3).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener as TokioTcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::channel::CommunicationChannel;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::events::EventEmitter;
use crate::socket_options::SocketOptions;

/// Binds to `endpoint`'s port on all local interfaces and runs an accept
/// loop on a dedicated task, mirroring the accept-loop shape of the
/// teacher's `start_multi_server` in `src/ipc/tcp_socket.rs` — generalized
/// here to emit a channel-connected event per accepted socket instead of
/// routing raw messages through an mpsc channel.
pub struct ConnectionListener {
    shutdown: Arc<AtomicBool>,
    accept_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    pub on_channel_connected: EventEmitter<Arc<CommunicationChannel>>,
}

impl ConnectionListener {
    /// Bind and start accepting. The returned listener is already running.
    pub async fn bind(endpoint: Endpoint, options: SocketOptions) -> Result<Arc<Self>> {
        let tokio_listener = TokioTcpListener::bind(endpoint.socket_addr_string()).await?;
        debug!("listening on {endpoint}");

        let listener = Arc::new(Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_task: tokio::sync::Mutex::new(None),
            on_channel_connected: EventEmitter::new(),
        });

        let accept_listener = Arc::clone(&listener);
        let handle = tokio::spawn(async move {
            accept_listener.accept_loop(tokio_listener, options).await;
        });
        *listener.accept_task.lock().await = Some(handle);

        Ok(listener)
    }

    async fn accept_loop(self: Arc<Self>, tokio_listener: TokioTcpListener, options: SocketOptions) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match tokio_listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {peer}");
                    match CommunicationChannel::start(stream, &options) {
                        Ok(channel) => self.on_channel_connected.emit(channel),
                        Err(e) => error!("failed to start channel for {peer}: {e}"),
                    }
                }
                Err(e) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    error!("accept failed: {e}, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        debug!("accept loop exiting");
    }

    /// Stop accepting new connections. Already-accepted channels are
    /// unaffected; the caller (typically `Server`) is responsible for
    /// disconnecting them.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_task.lock().await.take() {
            handle.abort();
        }
    }
}
