//! The HTTP request/response protocol.
//!
//! Used for the initial leg of a session: the upgrade request is forwarded
//! to the consumer as a REQUEST, and a RESPONSE closes that dialogue.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::ProtocolId;
use crate::message::{Content, ContentSchema, Message, Performative};

/// An HTTP protocol message.
pub type HttpMessage = Message<HttpContent>;

/// Performatives of the HTTP protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpPerformative {
    /// An inbound request.
    Request,
    /// The answer to a request.
    Response,
}

/// How an HTTP dialogue ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpEndState {
    /// A response was produced.
    Successful,
}

impl Performative for HttpPerformative {
    type EndState = HttpEndState;

    const ALL: &'static [Self] = &[Self::Request, Self::Response];

    fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }

    fn is_initial(self) -> bool {
        self == Self::Request
    }

    fn valid_replies(self) -> &'static [Self] {
        match self {
            Self::Request => &[Self::Response],
            Self::Response => &[],
        }
    }

    fn end_state(self) -> Option<HttpEndState> {
        match self {
            Self::Request => None,
            Self::Response => Some(HttpEndState::Successful),
        }
    }

    fn schema(self) -> ContentSchema {
        match self {
            Self::Request => ContentSchema {
                required: &["method", "url", "version", "headers", "body"],
                optional: &[],
            },
            Self::Response => ContentSchema {
                required: &["version", "status_code", "status_text", "headers", "body"],
                optional: &[],
            },
        }
    }
}

impl fmt::Display for HttpPerformative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of an HTTP message.
///
/// Bodies are raw bytes; on the JSON wire they travel base64-encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "performative", rename_all = "snake_case")]
pub enum HttpContent {
    /// An inbound request.
    Request {
        /// Request method (`GET`, ...).
        method: String,
        /// Request target including the query string.
        url: String,
        /// Protocol version (`HTTP/1.1`).
        version: String,
        /// Request headers, lower-cased names.
        headers: BTreeMap<String, String>,
        /// Request body.
        #[serde(with = "base64_body")]
        body: Vec<u8>,
    },
    /// The answer to a request.
    Response {
        /// Protocol version.
        version: String,
        /// Status code (100..=599).
        status_code: u16,
        /// Reason phrase.
        status_text: String,
        /// Response headers.
        headers: BTreeMap<String, String>,
        /// Response body.
        #[serde(with = "base64_body")]
        body: Vec<u8>,
    },
}

impl HttpContent {
    /// A bodiless response with `status_code` and `status_text`.
    pub fn response(status_code: u16, status_text: impl Into<String>) -> Self {
        Self::Response {
            version: "HTTP/1.1".into(),
            status_code,
            status_text: status_text.into(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }
}

impl Content for HttpContent {
    type Performative = HttpPerformative;

    const PROTOCOL_ID: ProtocolId = ProtocolId::HTTP;

    fn performative(&self) -> HttpPerformative {
        match self {
            Self::Request { .. } => HttpPerformative::Request,
            Self::Response { .. } => HttpPerformative::Response,
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::Request { method, .. } if method.is_empty() => Err("request method is empty".into()),
            Self::Response { status_code, .. } if !(100..=599).contains(status_code) => {
                Err(format!("status code {status_code} out of range"))
            }
            _ => Ok(()),
        }
    }
}

mod base64_body {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
