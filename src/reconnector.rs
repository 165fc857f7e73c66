//! Auxiliary timer-driven reconnector (spec §4.6).
//!
//! Owned by the application, not by `Client` itself — it holds a reference
//! to a client and periodically checks its state, attempting `connect()`
//! while disconnected and swallowing any failure. Has an independent
//! lifecycle (start/stop/dispose) that never touches the client directly
//! beyond calling `connect()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::channel::CommunicationState;
use crate::client::Client;

/// Default check period (spec §4.6: "short, e.g. 20s").
pub const DEFAULT_CHECK_PERIOD_MS: u64 = 20_000;

/// Periodically re-establishes a client's channel once it has dropped.
pub struct Reconnector {
    client: Arc<Client>,
    check_period_ms: AtomicU64,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Reconnector {
    pub fn new(client: Arc<Client>) -> Arc<Self> {
        Arc::new(Self {
            client,
            check_period_ms: AtomicU64::new(DEFAULT_CHECK_PERIOD_MS),
            task: AsyncMutex::new(None),
        })
    }

    pub fn check_period(&self) -> Duration {
        Duration::from_millis(self.check_period_ms.load(Ordering::Relaxed))
    }

    pub fn set_check_period(&self, period: Duration) {
        self.check_period_ms
            .store(period.as_millis() as u64, Ordering::Relaxed);
    }

    /// Start the background check loop. Calling `start` while already
    /// running restarts the loop with the current check period.
    pub async fn start(self: &Arc<Self>) {
        self.stop().await;
        let reconnector = Arc::clone(self);
        let handle = tokio::spawn(async move {
            reconnector.check_loop().await;
        });
        *self.task.lock().await = Some(handle);
    }

    /// Stop the timer without touching the client's connection state.
    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }

    /// Alias for `stop`, matching the spec's `Dispose()` naming (spec §6).
    pub async fn dispose(&self) {
        self.stop().await;
    }

    async fn check_loop(self: Arc<Self>) {
        loop {
            let period = self.check_period();
            tokio::time::sleep(period).await;

            if self.client.state().await == CommunicationState::Disconnected {
                trace!("reconnector: client disconnected, attempting reconnect");
                if let Err(e) = self.client.connect().await {
                    debug!("reconnector: connect attempt failed, will retry: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CommunicationState;
    use crate::client::ClientConfig;
    use crate::endpoint::Endpoint;
    use crate::server::Server;
    use crate::socket_options::SocketOptions;

    #[tokio::test]
    async fn reconnector_brings_client_back_after_server_restart() {
        let endpoint = Endpoint::new("127.0.0.1", 20930);

        let server = Server::new(endpoint.clone(), SocketOptions::default());
        server.start().await.unwrap();

        let client = Client::new(endpoint.clone(), SocketOptions::default(), ClientConfig::default());
        client.connect().await.unwrap();
        assert_eq!(client.state().await, CommunicationState::Connected);

        server.stop().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let reconnector = Reconnector::new(Arc::clone(&client));
        reconnector.set_check_period(Duration::from_millis(500));
        reconnector.start().await;

        // Restart the server on the same port.
        let server2 = Server::new(endpoint, SocketOptions::default());
        server2.start().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if client.state().await == CommunicationState::Connected {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("client did not reconnect within 5s");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        reconnector.dispose().await;
        server2.stop().await;
    }

    #[tokio::test]
    async fn dispose_stops_the_timer_without_touching_the_client() {
        let client = Client::new(
            Endpoint::new("127.0.0.1", 1),
            SocketOptions::default(),
            ClientConfig::default(),
        );
        let reconnector = Reconnector::new(Arc::clone(&client));
        reconnector.set_check_period(Duration::from_millis(50));
        reconnector.start().await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        reconnector.dispose().await;

        // Client remains disconnected (connect attempts to a closed port
        // fail and are swallowed); disposing must not panic or hang.
        assert_eq!(client.state().await, CommunicationState::Disconnected);
    }
}
