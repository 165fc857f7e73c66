//! # Messaging Runtime
//!
//! A bidirectional, message-oriented communication runtime between a server
//! process and many simultaneous client processes over a reliable
//! byte-stream transport (TCP is the concrete transport; the framing and
//! codec types are written against `AsyncRead + AsyncWrite` so the design
//! itself is not TCP-specific).
//!
//! ## Layers
//!
//! - [`wire`]: length-prefixed framing and message (de)serialization,
//!   restartable across reconnects.
//! - [`channel`]: the per-connection send/receive loop, state, and
//!   timestamps.
//! - [`listener`]: binds a port and hands each accepted socket to a new
//!   channel.
//! - [`client`]: drives one channel; owns the ping timer and RTT tracking.
//! - [`server`] / [`ServerClient`]: owns a listener and the connected-peer
//!   map.
//! - [`reconnector`]: periodically re-establishes a dropped client channel.
//!
//! The RMI layer that rides on top of this core (encoding remote method
//! calls as `RemoteInvoke`/`RemoteInvokeReturn` messages and dispatching
//! them to named service objects) is an external collaborator: its wire
//! messages are part of the [`Message`] set modeled here, but the
//! dispatcher itself is out of scope for this crate.

pub mod channel;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod listener;
pub mod message;
pub mod reconnector;
pub mod rtt;
pub mod server;
pub mod socket_options;
pub mod wire;

pub use channel::{CommunicationChannel, CommunicationState};
pub use client::{Client, ClientConfig};
pub use endpoint::Endpoint;
pub use error::{CommError, RemoteException, Result};
pub use listener::ConnectionListener;
pub use message::{Message, ParamValue};
pub use reconnector::Reconnector;
pub use server::{ClientId, Server, ServerClient};
pub use socket_options::SocketOptions;
pub use wire::WireProtocol;

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values (spec §4.4, §4.6, §4.7).
pub mod defaults {
    /// Default ping period, milliseconds (spec §4.4).
    pub const PING_INTERVAL_MS: u64 = crate::client::DEFAULT_PING_INTERVAL_MS;
    /// Default connect timeout, milliseconds (spec §4.4).
    pub const CONNECT_TIMEOUT_MS: u64 = crate::client::DEFAULT_CONNECT_TIMEOUT_MS;
    /// Default reconnect check period, milliseconds (spec §4.6).
    pub const RECONNECT_CHECK_PERIOD_MS: u64 = crate::reconnector::DEFAULT_CHECK_PERIOD_MS;
    /// Default receive buffer size, bytes (spec §4.2).
    pub const RECEIVE_BUFFER_SIZE: usize = crate::channel::DEFAULT_RECEIVE_BUFFER;
}
