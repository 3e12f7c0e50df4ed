use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum AuthMode {
    ApiKey,
    Bearer,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::ApiKey => "apiKey",
            AuthMode::Bearer => "bearer",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInitPayload {
    pub auth_mode: AuthMode,
    pub credential: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartPayload {
    pub query: String,
    #[serde(default)]
    pub variables: Value,
}

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    ConnectionInit { payload: ConnectionInitPayload },
    Start { id: String, payload: StartPayload },
    Stop { id: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    #[serde(default)]
    pub connection_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_code: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ServerError {
    pub fn is_unauthorized(&self) -> bool {
        if matches!(self.error_code, Some(401) | Some(403)) {
            return true;
        }
        let error_type = self.error_type.as_deref().unwrap_or_default();
        if error_type.contains("Unauthorized") || error_type.contains("Forbidden") {
            return true;
        }
        self.message
            .as_deref()
            .map(|message| message.to_lowercase().contains("invalid credentials"))
            .unwrap_or(false)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.error_type.as_deref().unwrap_or("error");
        match (&self.message, self.error_code) {
            (Some(message), Some(code)) => write!(f, "{kind} ({code}): {message}"),
            (Some(message), None) => write!(f, "{kind}: {message}"),
            (None, Some(code)) => write!(f, "{kind} ({code})"),
            (None, None) => f.write_str(kind),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    #[serde(default)]
    pub errors: Vec<ServerError>,
}

impl ErrorPayload {
    pub fn is_unauthorized(&self) -> bool {
        self.errors.iter().any(ServerError::is_unauthorized)
    }

    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            return "unspecified server error".to_string();
        }
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ConnectionAck {
        #[serde(default)]
        payload: AckPayload,
    },
    ConnectionError {
        #[serde(default)]
        payload: ErrorPayload,
    },
    Ka,
    StartAck {
        id: String,
    },
    Data {
        id: String,
        #[serde(default)]
        payload: Value,
    },
    Error {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        payload: Value,
    },
    Complete {
        id: String,
    },
}

impl ServerFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::ConnectionAck { .. } => "connection_ack",
            ServerFrame::ConnectionError { .. } => "connection_error",
            ServerFrame::Ka => "ka",
            ServerFrame::StartAck { .. } => "start_ack",
            ServerFrame::Data { .. } => "data",
            ServerFrame::Error { .. } => "error",
            ServerFrame::Complete { .. } => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(text: &str, max_frame_bytes: usize) -> Result<T, FrameError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}
