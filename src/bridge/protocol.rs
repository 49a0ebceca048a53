//! JSON-RPC 2.0 framing for the bridge channel
//!
//! Every frame is one JSON object on its own line. Requests carry numeric
//! ids; notifications carry none. Cancellation uses the LSP convention of a
//! `$/cancelRequest` notification with `{ "id": <n> }` params.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_SEARCH_CODE: &str = "searchCode";
pub const METHOD_WARM_UP: &str = "warmUp";
pub const METHOD_CANCEL_REQUEST: &str = "$/cancelRequest";

pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const REQUEST_CANCELLED: i64 = -32800;
}

/// Error object carried by a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn internal(error: &anyhow::Error) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, format!("{:#}", error))
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}

/// Any frame on the channel: request, notification or response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Message {
    fn empty(id: Option<u64>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    pub fn request(id: u64, method: &str, params: Value) -> Self {
        Self {
            method: Some(method.to_string()),
            params: Some(params),
            ..Self::empty(Some(id))
        }
    }

    pub fn notification(method: &str, params: Value) -> Self {
        Self {
            method: Some(method.to_string()),
            params: Some(params),
            ..Self::empty(None)
        }
    }

    /// Success or error response for request `id`
    ///
    /// A `null` result is written as `"result": null`.
    pub fn response(id: Option<u64>, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => Self {
                result: Some(result),
                ..Self::empty(id)
            },
            Err(error) => Self {
                error: Some(error),
                ..Self::empty(id)
            },
        }
    }

    pub fn cancel(id: u64) -> Self {
        Self::notification(METHOD_CANCEL_REQUEST, serde_json::json!({ "id": id }))
    }

    pub fn is_response(&self) -> bool {
        self.method.is_none()
    }

    /// Turn a response frame into its outcome
    ///
    /// `"result": null` deserializes as a missing result, so a response
    /// without an error is always a success.
    pub fn into_outcome(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    /// Id named by a `$/cancelRequest` notification
    pub fn cancelled_id(&self) -> Option<u64> {
        self.params.as_ref()?.get("id")?.as_u64()
    }
}

/// Queue of encoded frames waiting for the writer task
pub type FrameSender = mpsc::UnboundedSender<String>;

/// Encode `message` and queue it; fails only once the writer has stopped
pub fn send_frame(outgoing: &FrameSender, message: &Message) -> anyhow::Result<()> {
    let frame = serde_json::to_string(message)?;
    outgoing
        .send(frame)
        .map_err(|_| anyhow::anyhow!("Bridge channel writer has stopped"))
}

/// Drain `frames` into `writer`, one line per frame
///
/// Runs until every sender is dropped or a write fails. `on_failure` runs
/// after a failed write.
pub async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<String>,
    on_failure: Option<Arc<dyn Fn() + Send + Sync>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        log::trace!("Bridge output: {}", frame);
        if let Err(e) = write_line(&mut writer, &frame).await {
            log::error!("Failed to write to bridge channel: {}", e);
            if let Some(on_failure) = &on_failure {
                on_failure();
            }
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, frame: &str) -> std::io::Result<()> {
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame_shape() {
        let frame = serde_json::to_value(Message::request(7, METHOD_SEARCH_CODE, json!([]))).unwrap();
        assert_eq!(frame, json!({ "jsonrpc": "2.0", "id": 7, "method": "searchCode", "params": [] }));
    }

    #[test]
    fn test_null_result_is_success() {
        let response = Message::response(Some(3), Ok(Value::Null));
        let line = serde_json::to_string(&response).unwrap();
        assert!(line.contains("\"result\":null"));

        let decoded: Message = serde_json::from_str(&line).unwrap();
        assert!(decoded.is_response());
        assert_eq!(decoded.into_outcome(), Ok(Value::Null));
    }

    #[test]
    fn test_error_response() {
        let response = Message::response(Some(1), Err(RpcError::new(error_codes::METHOD_NOT_FOUND, "Unknown method: x")));
        let decoded: Message = serde_json::from_str(&serde_json::to_string(&response).unwrap()).unwrap();
        assert_eq!(decoded.into_outcome().unwrap_err().code, -32601);
    }

    #[test]
    fn test_cancel_notification() {
        let cancel = Message::cancel(42);
        assert_eq!(cancel.id, None);
        assert_eq!(cancel.method.as_deref(), Some("$/cancelRequest"));
        assert_eq!(cancel.cancelled_id(), Some(42));
    }
}
