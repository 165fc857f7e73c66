//! Configurable transport tuning applied to every socket.

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tracing::debug;

/// Socket-level tuning knobs applied to every socket, whether client-
/// originating or server-accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SocketOptions {
    /// Disable Nagle batching.
    pub no_delay: bool,
    /// Enable OS-level TCP keep-alive probes.
    pub keep_alive_enabled: bool,
    /// Idle time before the first probe; `None` lets the OS decide.
    pub keep_alive_time: Option<Duration>,
    /// Interval between probes; `None` lets the OS decide.
    pub keep_alive_interval: Option<Duration>,
    /// Send timeout; `None`/zero means infinite.
    pub send_timeout: Option<Duration>,
    /// Receive timeout; `None`/zero means infinite.
    pub receive_timeout: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            no_delay: true,
            keep_alive_enabled: false,
            keep_alive_time: None,
            keep_alive_interval: None,
            send_timeout: Some(Duration::from_millis(5000)),
            receive_timeout: None,
        }
    }
}

impl SocketOptions {
    /// Apply these options to a live socket via a zero-copy `SockRef` view,
    /// reaching option setters Tokio doesn't expose directly without
    /// taking ownership of the underlying file descriptor away from it.
    /// Where the host OS does not expose a knob, the option is silently
    /// ignored after a trace.
    pub fn apply(&self, socket: &SockRef<'_>) {
        if let Err(e) = socket.set_nodelay(self.no_delay) {
            debug!("failed to set TCP_NODELAY: {e}");
        }

        if self.keep_alive_enabled {
            let mut keepalive = TcpKeepalive::new();
            if let Some(time) = self.keep_alive_time {
                keepalive = keepalive.with_time(time);
            }
            #[cfg(not(any(target_os = "windows", target_os = "openbsd")))]
            if let Some(interval) = self.keep_alive_interval {
                keepalive = keepalive.with_interval(interval);
            }
            if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
                debug!("failed to configure TCP keepalive: {e}");
            }
        }

        if let Err(e) = socket.set_write_timeout(non_zero(self.send_timeout)) {
            debug!("failed to set send timeout: {e}");
        }
        if let Err(e) = socket.set_read_timeout(non_zero(self.receive_timeout)) {
            debug!("failed to set receive timeout: {e}");
        }
    }
}

/// `0`/`None` both mean "infinite"; `socket2` expresses "infinite" as
/// `None`.
fn non_zero(d: Option<Duration>) -> Option<Duration> {
    d.filter(|d| !d.is_zero())
}
