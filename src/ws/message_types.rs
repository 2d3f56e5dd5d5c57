use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{prelude::*, serde_utils::deserialize_opt_timestamp_ms};

/// Opaque key/value parameters sent to the backend with a subscribe request.
pub type Filters = serde_json::Map<String, serde_json::Value>;

/// Discriminator of an inbound envelope.
///
/// Unrecognised type strings are kept verbatim in [`MessageType::Other`] so
/// they still reach channel callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Pong,
    Authenticated,
    AuthenticationFailed,
    Subscribed,
    Unsubscribed,
    Error,
    MevOpportunity,
    OpportunityUpdate,
    OpportunityExpired,
    ValidatorPerformance,
    MarketUpdate,
    UserNotification,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Pong => "pong",
            MessageType::Authenticated => "authenticated",
            MessageType::AuthenticationFailed => "authentication_failed",
            MessageType::Subscribed => "subscribed",
            MessageType::Unsubscribed => "unsubscribed",
            MessageType::Error => "error",
            MessageType::MevOpportunity => "mev_opportunity",
            MessageType::OpportunityUpdate => "opportunity_update",
            MessageType::OpportunityExpired => "opportunity_expired",
            MessageType::ValidatorPerformance => "validator_performance",
            MessageType::MarketUpdate => "market_update",
            MessageType::UserNotification => "user_notification",
            MessageType::Other(s) => s,
        }
    }

    /// Control types are consumed by the client itself and never reach
    /// domain consumers.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            MessageType::Pong
                | MessageType::Authenticated
                | MessageType::AuthenticationFailed
                | MessageType::Subscribed
                | MessageType::Unsubscribed
                | MessageType::Error
        )
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pong" => MessageType::Pong,
            "authenticated" => MessageType::Authenticated,
            "authentication_failed" => MessageType::AuthenticationFailed,
            "subscribed" => MessageType::Subscribed,
            "unsubscribed" => MessageType::Unsubscribed,
            "error" => MessageType::Error,
            "mev_opportunity" => MessageType::MevOpportunity,
            "opportunity_update" => MessageType::OpportunityUpdate,
            "opportunity_expired" => MessageType::OpportunityExpired,
            "validator_performance" => MessageType::ValidatorPerformance,
            "market_update" => MessageType::MarketUpdate,
            "user_notification" => MessageType::UserNotification,
            _ => MessageType::Other(s),
        }
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The wire unit received from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(
        default,
        deserialize_with = "deserialize_opt_timestamp_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
}

impl Envelope {
    pub fn new(kind: MessageType, channel: Option<&str>, data: serde_json::Value) -> Self {
        Self {
            kind,
            channel: channel.map(str::to_string),
            data,
            timestamp: None,
        }
    }

    /// Parse a text frame. Non-object payloads are rejected.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Channel used for routing: the explicit channel, or the type name for
    /// envelopes that carry none.
    pub fn routing_channel(&self) -> &str {
        self.channel.as_deref().unwrap_or_else(|| self.kind.as_str())
    }

    /// Best-effort extraction of a string field from `data`.
    pub(crate) fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Outbound control messages (client → backend).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    Subscribe {
        channel: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filters: Option<Filters>,
    },
    Unsubscribe {
        channel: String,
    },
    Authenticate {
        token: String,
    },
    Ping,
}

impl ControlMessage {
    pub fn subscribe(channel: &str, filters: &Filters) -> Self {
        ControlMessage::Subscribe {
            channel: channel.to_string(),
            filters: if filters.is_empty() {
                None
            } else {
                Some(filters.clone())
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
