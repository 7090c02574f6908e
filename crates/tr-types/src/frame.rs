//! Wire frames for the Trade Republic WebSocket API
//!
//! The protocol is line oriented text, one message per WebSocket frame:
//!
//! ```text
//! client: connect 31 {"locale":"fr",...}
//! server: connected
//! client: sub 1 {"type":"timelineTransactions","token":"..."}
//! server: 1 A {"items":[...],"cursors":{"after":"..."}}
//! client: unsub 1
//! server: 1 C
//! ```

use crate::error::TrError;
use serde::Serialize;
use std::fmt;

/// Protocol version sent with the `connect` frame
pub const PROTOCOL_VERSION: u32 = 31;

// ============================================================================
// Outbound
// ============================================================================

/// Client description sent with the `connect` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectConfig {
    /// Locale used for server-rendered labels
    pub locale: String,
    /// Platform identifier
    pub platform_id: String,
    /// Platform version string
    pub platform_version: String,
    /// Client identifier
    pub client_id: String,
    /// Client version string
    pub client_version: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            locale: "fr".to_string(),
            platform_id: "webtrading".to_string(),
            platform_version: "safari - 18.3.0".to_string(),
            client_id: "app.traderepublic.com".to_string(),
            client_version: "3.151.3".to_string(),
        }
    }
}

impl ConnectConfig {
    /// Set the locale
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}

/// Subscription topic, serialized as the JSON body of a `sub` frame
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Topic {
    /// One page of the transaction timeline
    TimelineTransactions {
        token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        after: Option<String>,
    },
    /// Detail view of a single transaction
    #[serde(rename = "timelineDetailV2")]
    TimelineDetail { id: String, token: String },
    /// Cash balances
    AvailableCash { token: String },
}

impl Topic {
    /// Wire name of this topic
    pub fn name(&self) -> &'static str {
        match self {
            Self::TimelineTransactions { .. } => "timelineTransactions",
            Self::TimelineDetail { .. } => "timelineDetailV2",
            Self::AvailableCash { .. } => "availableCash",
        }
    }
}

// Tokens stay out of logs
impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimelineTransactions { after, .. } => f
                .debug_struct("TimelineTransactions")
                .field("after", after)
                .finish_non_exhaustive(),
            Self::TimelineDetail { id, .. } => f
                .debug_struct("TimelineDetail")
                .field("id", id)
                .finish_non_exhaustive(),
            Self::AvailableCash { .. } => f.debug_struct("AvailableCash").finish_non_exhaustive(),
        }
    }
}

/// Frame sent by the client
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// Session handshake
    Connect(ConnectConfig),
    /// Open a subscription
    Subscribe { id: u64, topic: Topic },
    /// Close a subscription
    Unsubscribe { id: u64 },
}

impl OutboundFrame {
    /// Encode to wire text
    pub fn encode(&self) -> Result<String, TrError> {
        let text = match self {
            Self::Connect(config) => {
                let body = serde_json::to_string(config)
                    .map_err(|e| TrError::protocol(e.to_string()))?;
                format!("connect {} {}", PROTOCOL_VERSION, body)
            }
            Self::Subscribe { id, topic } => {
                let body =
                    serde_json::to_string(topic).map_err(|e| TrError::protocol(e.to_string()))?;
                format!("sub {} {}", id, body)
            }
            Self::Unsubscribe { id } => format!("unsub {}", id),
        };
        Ok(text)
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Frame received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Handshake acknowledged
    Connected,
    /// Full answer for a subscription (`A`)
    Answer { id: u64, payload: String },
    /// Delta against the previous answer (`D`)
    Delta { id: u64, delta: String },
    /// Subscription finished, no further frames (`C`)
    Complete { id: u64 },
    /// Error object for a subscription (`E`)
    Error { id: u64, payload: String },
    /// Keepalive echo
    Echo,
    /// Anything not understood
    Unknown(String),
}

impl InboundFrame {
    /// Parse a text frame
    ///
    /// Frames that carry no request id and are not part of the protocol map
    /// to [`InboundFrame::Unknown`]. A numeric id followed by a missing code
    /// is a protocol error.
    pub fn parse(text: &str) -> Result<Self, TrError> {
        let text = text.trim();
        match text {
            "connected" => return Ok(Self::Connected),
            "echo" => return Ok(Self::Echo),
            _ => {}
        }

        let mut parts = text.splitn(3, ' ');
        let id = match parts.next().and_then(|head| head.parse::<u64>().ok()) {
            Some(id) => id,
            None => return Ok(Self::Unknown(text.to_string())),
        };

        let code = parts
            .next()
            .ok_or_else(|| TrError::protocol(format!("frame without code: {}", text)))?;
        let body = parts.next().unwrap_or("").to_string();

        let frame = match code {
            "A" => Self::Answer { id, payload: body },
            "D" => Self::Delta { id, delta: body },
            "C" => Self::Complete { id },
            "E" => Self::Error { id, payload: body },
            _ => Self::Unknown(text.to_string()),
        };
        Ok(frame)
    }

    /// Request id carried by this frame, if any
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Self::Answer { id, .. }
            | Self::Delta { id, .. }
            | Self::Complete { id }
            | Self::Error { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Returns true for the end-of-stream marker
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}
