//! Wire frames delivered by the streaming transport.
//!
//! Every inbound text frame is a JSON object with up to three sections:
//!
//! - `notify`: heartbeats and other admin notifications.
//! - `response`: replies to commands; `SUBS`/`ADD` replies acknowledge subscriptions.
//! - `data`: quote updates, one group per contract key with `{fieldId: value}` entries.
//!
//! ```json
//! {"data":[{"service":"LEVELONE_OPTIONS","timestamp":1718900000000,
//!   "content":[{"key":"AAPL  240621C00190000","2":1.25,"3":1.3}]}]}
//! ```
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::result::Result;

/// Service name of the options level-one quote stream.
pub const OPTIONS_SERVICE: &str = "LEVELONE_OPTIONS";
/// Command that replaces the subscription set.
pub const SUBS_COMMAND: &str = "SUBS";
/// Command that adds keys to the subscription set.
pub const ADD_COMMAND: &str = "ADD";
/// Login reply; an admin message as far as the stream is concerned.
pub const LOGIN_COMMAND: &str = "LOGIN";

/// One decoded inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    /// Heartbeats and admin notifications.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<Notify>,
    /// Command replies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response: Vec<Response>,
    /// Quote updates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataBlock>,
}

/// Heartbeat or admin notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notify {
    /// Server time in epoch milliseconds, present on heartbeats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// Reply to a command sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[allow(missing_docs)]
    #[serde(default)]
    pub service: String,
    /// Command being answered (`SUBS`, `ADD`, `LOGIN`, ...).
    pub command: String,
    #[allow(missing_docs)]
    #[serde(default)]
    pub content: ResponseContent,
}

/// Result code and message of a command reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseContent {
    /// `0` on success.
    pub code: i64,
    #[allow(missing_docs)]
    #[serde(default)]
    pub msg: String,
}

impl Response {
    /// `true` for replies to subscription commands.
    pub fn is_subscription(&self) -> bool {
        self.command.eq_ignore_ascii_case(SUBS_COMMAND) || self.command.eq_ignore_ascii_case(ADD_COMMAND)
    }

    /// `true` when the command succeeded.
    pub fn is_success(&self) -> bool {
        self.content.code == 0
    }
}

/// Quote updates for one service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataBlock {
    #[allow(missing_docs)]
    #[serde(default)]
    pub service: String,
    /// Server time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// One group per contract.
    #[serde(default)]
    pub content: Vec<DataGroup>,
}

/// Field updates for one contract key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGroup {
    /// Contract key in whatever shape the feed used.
    pub key: String,
    /// `{fieldId: value}`; ids are numeric strings or letter codes.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DataGroup {
    /// Build a group from `(field id, value)` pairs.
    pub fn new<I, K>(key: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            key: key.to_string(),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl StreamFrame {
    /// Decode a raw text frame.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Encode to the JSON text the transport delivers.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// `true` when no section carries anything.
    pub fn is_empty(&self) -> bool {
        self.notify.is_empty() && self.response.is_empty() && self.data.is_empty()
    }

    /// Heartbeat notification stamped with `timestamp_ms`.
    pub fn heartbeat(timestamp_ms: i64) -> Self {
        Self {
            notify: vec![Notify {
                heartbeat: Some(timestamp_ms.to_string()),
                ..Notify::default()
            }],
            ..Self::default()
        }
    }

    /// Reply to `command` with the given result code.
    pub fn command_reply(command: &str, code: i64, msg: &str) -> Self {
        Self {
            response: vec![Response {
                service: OPTIONS_SERVICE.to_string(),
                command: command.to_string(),
                content: ResponseContent {
                    code,
                    msg: msg.to_string(),
                },
            }],
            ..Self::default()
        }
    }

    /// Quote updates for the options service.
    pub fn data(timestamp_ms: i64, groups: Vec<DataGroup>) -> Self {
        Self {
            data: vec![DataBlock {
                service: OPTIONS_SERVICE.to_string(),
                timestamp: Some(timestamp_ms),
                content: groups,
            }],
            ..Self::default()
        }
    }
}
