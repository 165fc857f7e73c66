//! The closed message variant set.
//!
//! Modeled as a sealed sum type rather than inheritance with runtime
//! polymorphism. Every variant carries `message_id` and
//! `replied_message_id`; [`WireProtocol`] (see `crate::wire`) dispatches
//! serialization on the discriminant via `serde`/`bincode`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RemoteException;

/// The primitive value union carried by RMI parameters and return values.
/// Deliberately closed — a richer object graph is not supported by the
/// wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Null,
    I32(i32),
    I64(i64),
    Double(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
}

/// The closed set of framed messages.
///
/// `message_id` is assigned once at construction and is stable for the
/// value's lifetime. `replied_message_id` is `None` unless this message is
/// a reply to an earlier one (e.g. a pong, or an RMI return).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Base {
        message_id: String,
        replied_message_id: Option<String>,
    },
    Text {
        message_id: String,
        replied_message_id: Option<String>,
        text: Option<String>,
    },
    RawData {
        message_id: String,
        replied_message_id: Option<String>,
        data: Option<Vec<u8>>,
    },
    Ping {
        message_id: String,
        replied_message_id: Option<String>,
    },
    RemoteInvoke {
        message_id: String,
        replied_message_id: Option<String>,
        service_name: String,
        method_name: String,
        parameters: Vec<ParamValue>,
    },
    RemoteInvokeReturn {
        message_id: String,
        replied_message_id: Option<String>,
        return_value: Option<ParamValue>,
        exception: Option<RemoteException>,
    },
}

impl Message {
    /// Generate a fresh, globally-unique-with-high-probability message id.
    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn message_id(&self) -> &str {
        match self {
            Message::Base { message_id, .. }
            | Message::Text { message_id, .. }
            | Message::RawData { message_id, .. }
            | Message::Ping { message_id, .. }
            | Message::RemoteInvoke { message_id, .. }
            | Message::RemoteInvokeReturn { message_id, .. } => message_id,
        }
    }

    pub fn replied_message_id(&self) -> Option<&str> {
        match self {
            Message::Base {
                replied_message_id, ..
            }
            | Message::Text {
                replied_message_id, ..
            }
            | Message::RawData {
                replied_message_id, ..
            }
            | Message::Ping {
                replied_message_id, ..
            }
            | Message::RemoteInvoke {
                replied_message_id, ..
            }
            | Message::RemoteInvokeReturn {
                replied_message_id, ..
            } => replied_message_id.as_deref(),
        }
    }

    pub fn is_ping(&self) -> bool {
        matches!(self, Message::Ping { .. })
    }

    pub fn base() -> Self {
        Message::Base {
            message_id: Self::new_id(),
            replied_message_id: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Message::Text {
            message_id: Self::new_id(),
            replied_message_id: None,
            text: Some(text.into()),
        }
    }

    pub fn raw_data(data: Vec<u8>) -> Self {
        Message::RawData {
            message_id: Self::new_id(),
            replied_message_id: None,
            data: Some(data),
        }
    }

    /// A fresh ping, not yet a reply to anything.
    pub fn ping() -> Self {
        Message::Ping {
            message_id: Self::new_id(),
            replied_message_id: None,
        }
    }

    /// A pong: a ping that replies to `original_ping_id`.
    pub fn pong_for(original_ping_id: impl Into<String>) -> Self {
        Message::Ping {
            message_id: Self::new_id(),
            replied_message_id: Some(original_ping_id.into()),
        }
    }

    pub fn remote_invoke(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        parameters: Vec<ParamValue>,
    ) -> Self {
        Message::RemoteInvoke {
            message_id: Self::new_id(),
            replied_message_id: None,
            service_name: service_name.into(),
            method_name: method_name.into(),
            parameters,
        }
    }

    pub fn remote_invoke_return(
        replied_message_id: impl Into<String>,
        return_value: Option<ParamValue>,
        exception: Option<RemoteException>,
    ) -> Self {
        Message::RemoteInvokeReturn {
            message_id: Self::new_id(),
            replied_message_id: Some(replied_message_id.into()),
            return_value,
            exception,
        }
    }
}
