use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Events sent to the remote peer.
///
/// `start` must be the first event on every connection; `media` may follow
/// at any frequency while streaming; `stop` is sent once on deliberate
/// session end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ClientEvent {
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartPayload,
    },
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// Events received from the remote peer.
///
/// Unknown event tags deserialize to `Unknown` and are logged and ignored,
/// never fatal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ServerEvent {
    /// Connection acknowledgement, informational only
    Connected,
    /// Server-confirmed stream id; may override the client-chosen one
    Start {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
    },
    Media { media: MediaPayload },
    /// Server-initiated termination
    Stop,
    /// Non-fatal notification; does not close the connection
    Error { message: String },
    #[serde(other)]
    Unknown,
}

/// Identifying metadata sent once at stream start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartPayload {
    #[serde(rename = "accountSid")]
    pub account_sid: String,
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    pub from: String,
    pub to: String,
    /// Base64-encoded JSON blob of free-form correlation metadata
    #[serde(rename = "extraData")]
    pub extra_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaPayload {
    pub payload: String,
}

/// Encode free-form correlation metadata for the `extraData` field.
pub fn encode_extra_data(extra: &serde_json::Value) -> Result<String> {
    let json = serde_json::to_vec(extra).context("Failed to serialize extra data")?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

/// Termination message for a linked telephony call.
///
/// Sent to a distinct termination endpoint, not the media stream socket; the
/// core only builds and sends this when explicitly asked to end a linked
/// call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallTermination {
    pub event: String,
    pub stop: CallTerminationPayload,
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallTerminationPayload {
    #[serde(rename = "accountSid")]
    pub account_sid: String,
    #[serde(rename = "callSid")]
    pub call_sid: String,
}

impl CallTermination {
    pub fn new(account_sid: String, call_sid: String, stream_sid: String) -> Self {
        Self {
            event: "stop".to_string(),
            stop: CallTerminationPayload {
                account_sid,
                call_sid,
            },
            stream_sid,
        }
    }
}
