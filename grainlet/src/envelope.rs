//! Command, response, and log envelopes.
//!
//! The orchestrator exchanges envelopes as base64-encoded JSON documents
//! with PascalCase field names. A command's `Content` is itself base64
//! inside the JSON: two independent encoding layers, so arbitrary payload
//! bytes can ride inside a JSON string. Both layers must survive a
//! round-trip exactly.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::logger::LogLevel;

/// Failure decoding an inbound command envelope.
///
/// Fatal in oneshot mode; in server mode it is reported back to the
/// orchestrator and the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 in command envelope: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid command envelope JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("command payload is not valid UTF-8: {0}")]
    PayloadEncoding(#[from] std::string::FromUtf8Error),
}

/// A decoded command: which flow it belongs to, which execution it is,
/// and the payload text the handler receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrainCommand {
    pub flow_uid: String,
    pub execution_id: String,
    pub content: String,
}

/// On-the-wire shape of a command; `content` still carries its base64 layer.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CommandWire {
    flow_uid: String,
    execution_id: String,
    content: String,
}

/// Decode `base64(JSON{FlowUid, ExecutionId, Content: base64(payload)})`.
///
/// Missing keys surface as a JSON parse failure.
pub fn decode_command(encoded: &str) -> Result<GrainCommand, DecodeError> {
    let document = BASE64.decode(encoded.trim())?;
    let wire: CommandWire = serde_json::from_slice(&document)?;
    let content = String::from_utf8(BASE64.decode(wire.content.as_bytes())?)?;

    Ok(GrainCommand {
        flow_uid: wire.flow_uid,
        execution_id: wire.execution_id,
        content,
    })
}

/// Exact inverse of [`decode_command`]; used by the dry-run helper and tests.
pub fn encode_command(command: &GrainCommand) -> Result<String, serde_json::Error> {
    let wire = CommandWire {
        flow_uid: command.flow_uid.clone(),
        execution_id: command.execution_id.clone(),
        content: BASE64.encode(command.content.as_bytes()),
    };
    Ok(BASE64.encode(serde_json::to_vec(&wire)?))
}

/// Result of one command execution, sent back as a frame body (server
/// mode) or printed on stdout (oneshot mode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GrainResponse {
    pub execution_id: String,
    pub success: bool,
    /// Fault text; empty on success.
    pub message: String,
    /// `"0"` on success, `"-1"` on internal failure, otherwise a
    /// handler-defined non-negative code.
    pub error_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl GrainResponse {
    pub fn done(execution_id: impl Into<String>, content: Option<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            success: true,
            message: String::new(),
            error_code: "0".to_string(),
            content,
        }
    }

    pub fn failed(
        execution_id: impl Into<String>,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            success: false,
            message: message.into(),
            error_code: error_code.into(),
            content: None,
        }
    }
}

/// Serialize a response to its transport form, `base64(JSON)`.
///
/// Serializer faults here are unexpected and unrecoverable; callers
/// propagate them as process errors.
pub fn encode_response(response: &GrainResponse) -> Result<String, serde_json::Error> {
    Ok(BASE64.encode(serde_json::to_vec(response)?))
}

/// Log notification payload, shipped as the body of a SYSTEM frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogEnvelope {
    #[serde(rename = "Type")]
    pub kind: String,
    pub level: u8,
    pub execution_id: String,
    /// base64 of the log text.
    pub message: String,
}

impl LogEnvelope {
    pub fn new(level: LogLevel, execution_id: impl Into<String>, message: &str) -> Self {
        Self {
            kind: "Log".to_string(),
            level: level as u8,
            execution_id: execution_id.into(),
            message: BASE64.encode(message.as_bytes()),
        }
    }
}

/// Encode a handler result for the response `Content` field.
///
/// Scalars render via their textual form, structured values via compact
/// JSON; either way the output is valid base64. `Null` and the empty
/// string count as "no result" and produce `None`.
pub fn encode_value_b64(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) if s.is_empty() => return None,
        serde_json::Value::String(s) => s.clone(),
        scalar @ (serde_json::Value::Bool(_) | serde_json::Value::Number(_)) => scalar.to_string(),
        structured => structured.to_string(),
    };
    Some(BASE64.encode(text.as_bytes()))
}
