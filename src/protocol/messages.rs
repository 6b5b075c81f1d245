use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::subscription::SubscriptionKey;

/// Raw frame as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Self::Binary(b) => b.len(),
            Self::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encoding used for outbound frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    #[serde(alias = "msgpack")]
    MessagePack,
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Connected { client_id: Option<String> },
    Subscribed { symbol: String, selector: String },
    Unsubscribed,
    Pong,
    Error { message: String },
    /// Live market data, forwarded to the consumer untouched.
    Data(Value),
}

impl Envelope {
    /// Control envelopes are consumed by the session and never reach the consumer.
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Data(_))
    }
}

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { sid: String, exp_sid: String },
    Unsubscribe,
    Ping,
}

impl ClientMessage {
    pub fn subscribe(key: &SubscriptionKey) -> Self {
        Self::Subscribe {
            sid: key.symbol.clone(),
            exp_sid: key.selector.clone(),
        }
    }
}

/// Server control messages, discriminated by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum ControlMessage {
    Connected {
        #[serde(default)]
        client_id: Option<String>,
    },
    Subscribed {
        #[serde(alias = "sid")]
        symbol: String,
        #[serde(alias = "interval", alias = "exp_sid", deserialize_with = "selector_string")]
        expiry: String,
    },
    Unsubscribed {},
    Pong {},
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

pub(crate) const CONTROL_TYPES: &[&str] = &["connected", "subscribed", "unsubscribed", "pong", "error"];

impl From<ControlMessage> for Envelope {
    fn from(msg: ControlMessage) -> Self {
        match msg {
            ControlMessage::Connected { client_id } => Envelope::Connected { client_id },
            ControlMessage::Subscribed { symbol, expiry } => Envelope::Subscribed {
                symbol,
                selector: expiry,
            },
            ControlMessage::Unsubscribed {} => Envelope::Unsubscribed,
            ControlMessage::Pong {} => Envelope::Pong,
            ControlMessage::Error { message } => Envelope::Error {
                message: message.unwrap_or_else(|| "Unknown error".to_string()),
            },
        }
    }
}

/// Expiries come back as epoch numbers from some servers and strings from others.
fn selector_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Text(s) => s,
        Repr::Number(n) => n.to_string(),
    })
}
