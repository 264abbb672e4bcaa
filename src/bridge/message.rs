//! Bridge wire types
//!
//! Requests arrive as a method name plus positional JSON arguments;
//! results leave as response records on the single callback-delivery
//! channel. Argument extraction helpers live here so every dispatch path
//! reports malformed arguments the same way, before any backend call.

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// One call from the web layer
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeRequest {
    /// Caller-assigned request id; responses echo it
    pub id: String,
    /// Method name, e.g. "signInAnonymously" or "on"
    pub method: String,
    /// Positional JSON arguments
    #[serde(default)]
    pub args: Vec<Value>,
}

impl BridgeRequest {
    /// Build a request
    pub fn new(id: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            args,
        }
    }

    /// Build a request with a generated id
    ///
    /// For shells that do not assign their own callback ids.
    pub fn with_generated_id(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), method, args)
    }
}

/// Delivery status of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    /// Success payload
    Ok,
    /// Normalized error record payload
    Error,
}

/// One result delivered to the web layer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
    /// Id of the request this response answers
    pub request_id: String,
    /// Whether the payload is a result or an error record
    pub status: BridgeStatus,
    /// JSON payload
    pub payload: Value,
    /// True when the channel stays open for further deliveries
    pub keep_callback: bool,
}

/// Sending half of the callback-delivery channel
pub type ResponseSender = mpsc::UnboundedSender<BridgeResponse>;

/// Receiving half of the callback-delivery channel
pub type ResponseReceiver = mpsc::UnboundedReceiver<BridgeResponse>;

/// Create the callback-delivery channel
pub fn response_channel() -> (ResponseSender, ResponseReceiver) {
    mpsc::unbounded_channel()
}

/// Adapt the delivery channel into a `Stream` of responses
pub fn response_stream(
    rx: ResponseReceiver,
) -> tokio_stream::wrappers::UnboundedReceiverStream<BridgeResponse> {
    tokio_stream::wrappers::UnboundedReceiverStream::new(rx)
}

/// Per-request handle delivering results for one bridge call
///
/// Backend tasks never touch caller code directly; everything funnels
/// through the channel this responder wraps.
#[derive(Clone)]
pub struct Responder {
    tx: ResponseSender,
    request_id: String,
}

impl Responder {
    /// Bind a responder to a request id
    pub fn new(tx: ResponseSender, request_id: impl Into<String>) -> Self {
        Self {
            tx,
            request_id: request_id.into(),
        }
    }

    /// Deliver a one-shot success
    pub fn ok(&self, payload: Value) {
        self.send(BridgeStatus::Ok, payload, false);
    }

    /// Deliver a success on a channel that stays open
    pub fn ok_streamed(&self, payload: Value) {
        self.send(BridgeStatus::Ok, payload, true);
    }

    /// Deliver a normalized error record
    pub fn error(&self, error: &BridgeError) {
        self.send(BridgeStatus::Error, error.to_error_value(), false);
    }

    /// Deliver an error on a channel that stays open
    pub fn error_streamed(&self, error: &BridgeError) {
        self.send(BridgeStatus::Error, error.to_error_value(), true);
    }

    fn send(&self, status: BridgeStatus, payload: Value, keep_callback: bool) {
        // A dropped receiver means the shell is gone; nothing to deliver to
        let _ = self.tx.send(BridgeResponse {
            request_id: self.request_id.clone(),
            status,
            payload,
            keep_callback,
        });
    }
}

/// Extract a required string argument
pub(crate) fn str_arg(args: &[Value], index: usize, name: &str) -> Result<String, BridgeError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(BridgeError::invalid_arguments(format!(
            "{name} must be a string"
        ))),
    }
}

/// Extract an optional string argument; null and missing count as absent
pub(crate) fn opt_str_arg(args: &[Value], index: usize) -> Option<String> {
    match args.get(index) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Extract a required boolean argument
pub(crate) fn bool_arg(args: &[Value], index: usize, name: &str) -> Result<bool, BridgeError> {
    match args.get(index) {
        Some(Value::Bool(b)) => Ok(*b),
        _ => Err(BridgeError::invalid_arguments(format!(
            "{name} must be a boolean"
        ))),
    }
}

/// Extract a required non-negative integer argument
pub(crate) fn u64_arg(args: &[Value], index: usize, name: &str) -> Result<u64, BridgeError> {
    match args.get(index).and_then(Value::as_u64) {
        Some(n) => Ok(n),
        None => Err(BridgeError::invalid_arguments(format!(
            "{name} must be a non-negative number"
        ))),
    }
}

/// Extract any argument; missing counts as null
pub(crate) fn value_arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Null)
}

/// Extract an optional argument; null and missing count as absent
pub(crate) fn opt_value_arg(args: &[Value], index: usize) -> Option<Value> {
    args.get(index).cloned().filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_responder_delivers_ok() {
        let (tx, mut rx) = response_channel();
        let responder = Responder::new(tx, "req-1");

        responder.ok(json!({"uid": "u1"}));

        let response = rx.recv().await.unwrap();
        assert_eq!(response.request_id, "req-1");
        assert_eq!(response.status, BridgeStatus::Ok);
        assert_eq!(response.payload, json!({"uid": "u1"}));
        assert!(!response.keep_callback);
    }

    #[tokio::test]
    async fn test_responder_delivers_error_record() {
        let (tx, mut rx) = response_channel();
        let responder = Responder::new(tx, "req-2");

        responder.error(&BridgeError::UnknownMethod("nope".to_string()));

        let response = rx.recv().await.unwrap();
        assert_eq!(response.status, BridgeStatus::Error);
        assert_eq!(response.payload["message"], "Unknown method: nope");
        assert_eq!(response.payload["code"], "UNKNOWN_METHOD");
    }

    #[tokio::test]
    async fn test_streamed_responses_keep_the_callback() {
        let (tx, mut rx) = response_channel();
        let responder = Responder::new(tx, "req-3");

        responder.ok_streamed(json!(false));
        assert!(rx.recv().await.unwrap().keep_callback);
    }

    #[test]
    fn test_responder_survives_dropped_receiver() {
        let (tx, rx) = response_channel();
        drop(rx);
        Responder::new(tx, "req-4").ok(json!(1));
    }

    #[test]
    fn test_arg_extraction() {
        let args = vec![json!("hello"), json!(true), Value::Null, json!(5000)];

        assert_eq!(str_arg(&args, 0, "greeting").unwrap(), "hello");
        assert!(str_arg(&args, 1, "greeting").is_err());
        assert!(bool_arg(&args, 1, "flag").unwrap());
        assert_eq!(opt_str_arg(&args, 2), None);
        assert_eq!(opt_str_arg(&args, 9), None);
        assert_eq!(u64_arg(&args, 3, "timeout").unwrap(), 5000);
        assert_eq!(value_arg(&args, 2), Value::Null);
        assert_eq!(value_arg(&args, 9), Value::Null);
        assert_eq!(opt_value_arg(&args, 2), None);
        assert_eq!(opt_value_arg(&args, 0), Some(json!("hello")));
    }

    #[tokio::test]
    async fn test_response_stream_adapter() {
        use futures::StreamExt;

        let (tx, rx) = response_channel();
        let mut stream = response_stream(rx);

        Responder::new(tx, "req-5").ok(json!(1));
        let response = stream.next().await.unwrap();
        assert_eq!(response.request_id, "req-5");
    }

    #[test]
    fn test_generated_request_ids_are_unique() {
        let a = BridgeRequest::with_generated_id("currentUser", vec![]);
        let b = BridgeRequest::with_generated_id("currentUser", vec![]);
        assert_ne!(a.id, b.id);
        assert!(!a.id.is_empty());
    }

    #[test]
    fn test_request_deserialization() {
        let request: BridgeRequest = serde_json::from_value(json!({
            "id": "r1",
            "method": "signInAnonymously",
            "args": []
        }))
        .unwrap();
        assert_eq!(request.method, "signInAnonymously");
        assert!(request.args.is_empty());
    }

    #[test]
    fn test_response_serialization_shape() {
        let response = BridgeResponse {
            request_id: "r1".to_string(),
            status: BridgeStatus::Ok,
            payload: json!(false),
            keep_callback: true,
        };
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["requestId"], "r1");
        assert_eq!(encoded["status"], "ok");
        assert_eq!(encoded["keepCallback"], true);
    }
}
