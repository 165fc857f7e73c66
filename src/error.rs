//! Error taxonomy for the messaging runtime.
//!
//! Public operations return [`CommError`], a closed enum so callers can
//! match on failure class instead of string-matching error chains.

use thiserror::Error;

/// A faithfully propagated remote exception carried by a
/// `RemoteInvokeReturn` message.
///
/// The method-dispatch machinery that raises these lives in the RMI layer,
/// which is out of scope here; this crate only needs to carry the record
/// across the wire and re-raise it client-side.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RemoteException {
    /// The exception's message string.
    pub message: String,
    /// A version string identifying the service that raised the exception,
    /// carried so the client can tell a stale stub apart from a genuine
    /// application error.
    pub service_version: String,
}

impl std::fmt::Display for RemoteException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (service version {})", self.message, self.service_version)
    }
}

/// Errors surfaced by the messaging runtime's public API.
#[derive(Debug, Error)]
pub enum CommError {
    /// A socket read, write, or connect failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A connect attempt did not complete within `ConnectTimeout`.
    #[error("connect to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },

    /// A frame's declared length exceeded the maximum payload size.
    #[error("frame length {len} exceeds the maximum payload size of {max} bytes")]
    FrameTooLarge { len: u32, max: u32 },

    /// A frame's version byte did not match the protocol version this
    /// implementation understands.
    #[error("unsupported wire protocol version {found:#04x}, expected {expected:#04x}")]
    UnsupportedVersion { found: u8, expected: u8 },

    /// The payload could not be decoded as a message.
    #[error("malformed message payload: {0}")]
    Malformed(String),

    /// An operation was attempted while the channel/client was not in a
    /// state that permits it (e.g. `send_message` while disconnected).
    #[error("invalid state: {0}")]
    State(String),

    /// A faithfully propagated remote exception raised by a service method
    /// on the server side (RMI layer; see [`RemoteException`]).
    #[error("remote exception: {0}")]
    Remote(RemoteException),
}

pub type Result<T> = std::result::Result<T, CommError>;
