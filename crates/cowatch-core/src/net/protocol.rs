use super::messages::{ClientEvent, ServerEvent};

/// Default cap on a single client frame, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty message")]
    EmptyMessage,
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("serialize error: {0}")]
    SerializeError(String),
    #[error("deserialize error: {0}")]
    DeserializeError(String),
}

/// Encode a `ServerEvent` as a JSON text frame.
///
/// No size cap: server events embed client payloads that already passed
/// the inbound check, plus room metadata on top.
pub fn encode_server_event(event: &ServerEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

/// Encode a `ClientEvent` as a JSON text frame.
pub fn encode_client_event(event: &ClientEvent) -> Result<String, ProtocolError> {
    let text =
        serde_json::to_string(event).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(text)
}

/// Decode a client text frame, rejecting frames over `max_size` bytes.
pub fn decode_client_event(text: &str, max_size: usize) -> Result<ClientEvent, ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if text.len() > max_size {
        return Err(ProtocolError::PayloadTooLarge {
            size: text.len(),
            max: max_size,
        });
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode a server text frame.
pub fn decode_server_event(text: &str) -> Result<ServerEvent, ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}
