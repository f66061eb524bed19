//! The websockets session protocol.
//!
//! Carried between the bridge and its consumer for the life of one client
//! session: CONNECT opens it, SEND/RECEIVE move frames, DISCONNECT and
//! DISCONNECT_ACK close it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::ProtocolId;
use crate::message::{Content, ContentSchema, Message, Performative};

/// A websockets protocol message.
pub type WebsocketsMessage = Message<WebsocketsContent>;

/// Performatives of the websockets protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebsocketsPerformative {
    /// A client session was opened.
    Connect,
    /// The session was accepted (or refused).
    ConnectionAck,
    /// Data flows towards the client (or towards the consumer, for client frames).
    Send,
    /// Data was received.
    Receive,
    /// The session is closing.
    Disconnect,
    /// The close was acknowledged.
    DisconnectAck,
    /// Something went wrong.
    Error,
}

/// How a websockets dialogue ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WebsocketsEndState {
    /// Closed with an acknowledged disconnect.
    DisconnectAck,
    /// Closed by a disconnect nobody acknowledged (yet).
    Disconnect,
}

impl Performative for WebsocketsPerformative {
    type EndState = WebsocketsEndState;

    const ALL: &'static [Self] = &[
        Self::Connect,
        Self::ConnectionAck,
        Self::Send,
        Self::Receive,
        Self::Disconnect,
        Self::DisconnectAck,
        Self::Error,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::ConnectionAck => "connection_ack",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Disconnect => "disconnect",
            Self::DisconnectAck => "disconnect_ack",
            Self::Error => "error",
        }
    }

    fn is_initial(self) -> bool {
        matches!(self, Self::Connect | Self::Send)
    }

    fn valid_replies(self) -> &'static [Self] {
        const FLOW: &[WebsocketsPerformative] = &[
            WebsocketsPerformative::Send,
            WebsocketsPerformative::Receive,
            WebsocketsPerformative::Error,
            WebsocketsPerformative::Disconnect,
        ];
        match self {
            Self::Connect => &[Self::ConnectionAck, Self::Error],
            Self::ConnectionAck | Self::Send | Self::Receive => FLOW,
            Self::Disconnect => &[Self::DisconnectAck, Self::Error],
            Self::DisconnectAck => &[],
            Self::Error => &[Self::Send],
        }
    }

    fn end_state(self) -> Option<WebsocketsEndState> {
        match self {
            Self::DisconnectAck => Some(WebsocketsEndState::DisconnectAck),
            Self::Disconnect => Some(WebsocketsEndState::Disconnect),
            _ => None,
        }
    }

    fn schema(self) -> ContentSchema {
        let (required, optional): (&'static [&'static str], &'static [&'static str]) = match self {
            Self::Connect => (&["url"], &[]),
            Self::ConnectionAck | Self::DisconnectAck => (&["success"], &[]),
            Self::Send | Self::Receive => (&["data"], &[]),
            Self::Disconnect => (&[], &["reason"]),
            Self::Error => (&["code", "message"], &[]),
        };
        ContentSchema { required, optional }
    }
}

impl fmt::Display for WebsocketsPerformative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes carried by [`WebsocketsContent::Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The peer does not speak this protocol.
    UnsupportedProtocol,
    /// A frame could not be decoded.
    DecodingError,
    /// A message was structurally invalid.
    InvalidMessage,
    /// The addressed skill does not exist.
    UnsupportedSkill,
    /// The message does not fit its dialogue.
    InvalidDialogue,
}

/// Content of a websockets message, one variant per performative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "performative", rename_all = "snake_case")]
pub enum WebsocketsContent {
    /// A client session was opened at `url`.
    Connect {
        /// Request URL of the upgraded connection.
        url: String,
    },
    /// Session acceptance.
    ConnectionAck {
        /// Whether the session was accepted.
        success: bool,
    },
    /// Outbound data.
    Send {
        /// Text payload.
        data: String,
    },
    /// Inbound data.
    Receive {
        /// Text payload.
        data: String,
    },
    /// Session close.
    Disconnect {
        /// Why the session closed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Close acknowledgement.
    DisconnectAck {
        /// Whether the close succeeded.
        success: bool,
    },
    /// Protocol-level error.
    Error {
        /// Error category.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

impl WebsocketsContent {
    /// A DISCONNECT carrying `reason`.
    pub fn disconnect(reason: impl Into<String>) -> Self {
        Self::Disconnect {
            reason: Some(reason.into()),
        }
    }

    /// Text payload of a SEND or RECEIVE.
    pub fn data(&self) -> Option<&str> {
        match self {
            Self::Send { data } | Self::Receive { data } => Some(data),
            _ => None,
        }
    }
}

impl Content for WebsocketsContent {
    type Performative = WebsocketsPerformative;

    const PROTOCOL_ID: ProtocolId = ProtocolId::WEBSOCKETS;

    fn performative(&self) -> WebsocketsPerformative {
        match self {
            Self::Connect { .. } => WebsocketsPerformative::Connect,
            Self::ConnectionAck { .. } => WebsocketsPerformative::ConnectionAck,
            Self::Send { .. } => WebsocketsPerformative::Send,
            Self::Receive { .. } => WebsocketsPerformative::Receive,
            Self::Disconnect { .. } => WebsocketsPerformative::Disconnect,
            Self::DisconnectAck { .. } => WebsocketsPerformative::DisconnectAck,
            Self::Error { .. } => WebsocketsPerformative::Error,
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::Connect { url } if url.is_empty() => Err("connect url is empty".into()),
            _ => Ok(()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn only_connect_and_send_open_dialogues() {
        let initial: Vec<_> = WebsocketsPerformative::ALL
            .iter()
            .filter(|p| p.is_initial())
            .collect();
        assert_eq!(
            initial,
            [&WebsocketsPerformative::Connect, &WebsocketsPerformative::Send]
        );
    }

    #[test]
    fn only_disconnect_ack_is_terminal() {
        for p in WebsocketsPerformative::ALL {
            assert_eq!(p.is_terminal(), *p == WebsocketsPerformative::DisconnectAck, "{p}");
        }
    }

    #[test]
    fn connect_admits_ack_or_error_only() {
        let p = WebsocketsPerformative::Connect;
        assert!(p.accepts_reply(WebsocketsPerformative::ConnectionAck));
        assert!(p.accepts_reply(WebsocketsPerformative::Error));
        assert!(!p.accepts_reply(WebsocketsPerformative::Send));
        assert!(!p.accepts_reply(WebsocketsPerformative::Receive));
    }

    #[test]
    fn error_admits_send_only() {
        assert_eq!(
            WebsocketsPerformative::Error.valid_replies(),
            &[WebsocketsPerformative::Send]
        );
    }

    #[test]
    fn end_states() {
        assert_eq!(
            WebsocketsPerformative::DisconnectAck.end_state(),
            Some(WebsocketsEndState::DisconnectAck)
        );
        assert_eq!(
            WebsocketsPerformative::Disconnect.end_state(),
            Some(WebsocketsEndState::Disconnect)
        );
        assert_eq!(WebsocketsPerformative::Send.end_state(), None);
    }

    #[test]
    fn content_serializes_with_discriminant() {
        let v = serde_json::to_value(WebsocketsContent::Send { data: "pong".into() }).unwrap();
        assert_eq!(v, json!({"performative": "send", "data": "pong"}));

        let v = serde_json::to_value(WebsocketsContent::Disconnect { reason: None }).unwrap();
        assert_eq!(v, json!({"performative": "disconnect"}));

        let v = serde_json::to_value(WebsocketsContent::Error {
            code: ErrorCode::UnsupportedProtocol,
            message: "nope".into(),
        })
        .unwrap();
        assert_eq!(v["code"], "unsupported_protocol");
    }

    #[test]
    fn schema_matches_serialized_fields() {
        let samples = [
            WebsocketsContent::Connect { url: "/events".into() },
            WebsocketsContent::ConnectionAck { success: true },
            WebsocketsContent::Send { data: "a".into() },
            WebsocketsContent::Receive { data: "b".into() },
            WebsocketsContent::disconnect("bye"),
            WebsocketsContent::DisconnectAck { success: true },
            WebsocketsContent::Error {
                code: ErrorCode::DecodingError,
                message: "bad".into(),
            },
        ];
        for content in samples {
            let schema = content.performative().schema();
            let v = serde_json::to_value(&content).unwrap();
            for key in v.as_object().unwrap().keys().filter(|k| *k != "performative") {
                assert!(schema.defines(key), "{key} not in schema of {}", content.performative());
            }
            for key in schema.required {
                assert!(v.get(key).is_some(), "{key} missing from {}", content.performative());
            }
        }
    }

    #[test]
    fn empty_connect_url_is_invalid() {
        assert!(WebsocketsContent::Connect { url: String::new() }.validate().is_err());
        assert!(WebsocketsContent::Connect { url: "/".into() }.validate().is_ok());
    }

    #[test]
    fn data_accessor() {
        assert_eq!(WebsocketsContent::Receive { data: "x".into() }.data(), Some("x"));
        assert_eq!(WebsocketsContent::ConnectionAck { success: true }.data(), None);
    }

    fn any_performative() -> impl Strategy<Value = WebsocketsPerformative> {
        prop::sample::select(WebsocketsPerformative::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn replies_never_reopen_with_connect(p in any_performative()) {
            prop_assert!(!p.accepts_reply(WebsocketsPerformative::Connect));
        }

        #[test]
        fn terminal_iff_no_replies(p in any_performative(), q in any_performative()) {
            if p.is_terminal() {
                prop_assert!(!p.accepts_reply(q));
            }
        }
    }
}
