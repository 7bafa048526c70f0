//! JSON-RPC 2.0 envelope types used on the Kodi WebSocket.
//!
//! Outgoing calls always carry a numeric id. Inbound frames are parsed
//! loosely: every field is optional, and routing is decided by which fields
//! are present rather than by a strict message schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Parameterless introspection call issued once per connection.
pub const INTROSPECT_METHOD: &str = "JSONRPC.Introspect";

/// Separator between namespace and bare method name (`Player.PlayPause`).
pub const METHOD_SEPARATOR: char = '.';

/// Lifecycle pseudo-events delivered through the subscriber registry.
pub const EVENT_OPEN: &str = "open";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_CLOSE: &str = "close";

/// Call identifier, unique for the lifetime of one connection.
pub type CallId = u64;

/// Outgoing call envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: CallId,
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    #[must_use]
    pub fn new(id: CallId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Serialize this request to a single text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the params cannot be serialized.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound envelope with every recognized field optional.
///
/// A JSON `null` is indistinguishable from an absent field here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inbound {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Inbound {
    /// Parse one text frame. Returns `None` for anything that is not a JSON object.
    #[must_use]
    pub fn parse(frame: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(frame).ok()? {
            value @ Value::Object(_) => serde_json::from_value(value).ok(),
            _ => None,
        }
    }

    /// Numeric call id, if the frame carries one.
    #[must_use]
    pub fn call_id(&self) -> Option<CallId> {
        self.id.as_ref().and_then(Value::as_u64)
    }
}

/// Remote error value delivered to a call's failure path.
///
/// Kodi sends the JSON-RPC `{code, message, data}` shape, but the value is
/// kept as-is so nothing the server sent is lost.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError(pub Value);

impl RemoteError {
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        self.0.get("code").and_then(Value::as_i64)
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.0.get("message").and_then(Value::as_str)
    }

    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.0.get("data")
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code(), self.message()) {
            (Some(code), Some(message)) => write!(f, "{code}: {message}"),
            (None, Some(message)) => write!(f, "{message}"),
            _ => write!(f, "{}", self.0),
        }
    }
}

impl std::error::Error for RemoteError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = Request::new(1, "Player.PlayPause", Some(json!({"playerid": 1})));
        let json = req.to_frame().unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"Player.PlayPause\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"playerid\":1"));
    }

    #[test]
    fn test_request_without_params() {
        let req = Request::new(7, INTROSPECT_METHOD, None);
        let json = req.to_frame().unwrap();
        assert!(
            !json.contains("\"params\""),
            "params should be omitted when None"
        );
    }

    #[test]
    fn test_inbound_response_fields() {
        let inbound = Inbound::parse(r#"{"id":3,"jsonrpc":"2.0","result":"OK"}"#).unwrap();
        assert_eq!(inbound.call_id(), Some(3));
        assert_eq!(inbound.result, Some(json!("OK")));
        assert!(inbound.error.is_none());
        assert!(inbound.method.is_none());
    }

    #[test]
    fn test_inbound_notification_fields() {
        let inbound = Inbound::parse(
            r#"{"jsonrpc":"2.0","method":"Player.OnPlay","params":{"data":{"item":"x"}}}"#,
        )
        .unwrap();
        assert!(inbound.id.is_none());
        assert_eq!(inbound.method.as_deref(), Some("Player.OnPlay"));
        assert_eq!(inbound.params.unwrap()["data"]["item"], "x");
    }

    #[test]
    fn test_inbound_null_result_is_absent() {
        let inbound = Inbound::parse(r#"{"id":1,"result":null}"#).unwrap();
        assert!(inbound.result.is_none());
    }

    #[test]
    fn test_inbound_string_id_has_no_call_id() {
        let inbound = Inbound::parse(r#"{"id":"abc","result":1}"#).unwrap();
        assert!(inbound.id.is_some());
        assert_eq!(inbound.call_id(), None);
    }

    #[test]
    fn test_inbound_rejects_non_objects() {
        assert!(Inbound::parse("not json").is_none());
        assert!(Inbound::parse("").is_none());
        assert!(Inbound::parse("null").is_none());
        assert!(Inbound::parse("[1,2,3]").is_none());
    }

    #[test]
    fn test_inbound_ignores_unknown_fields() {
        let inbound = Inbound::parse(r#"{"id":1,"result":true,"extra":"field"}"#).unwrap();
        assert_eq!(inbound.result, Some(json!(true)));
    }

    #[test]
    fn test_remote_error_accessors() {
        let err = RemoteError(json!({
            "code": -32601,
            "message": "Method not found.",
            "data": {"method": "Foo.Bar"}
        }));
        assert_eq!(err.code(), Some(-32601));
        assert_eq!(err.message(), Some("Method not found."));
        assert_eq!(err.data().unwrap()["method"], "Foo.Bar");
        assert_eq!(err.to_string(), "-32601: Method not found.");
    }

    #[test]
    fn test_remote_error_display_arbitrary_value() {
        let err = RemoteError(json!("boom"));
        assert_eq!(err.code(), None);
        assert_eq!(err.to_string(), "\"boom\"");
        assert_eq!(err.into_value(), json!("boom"));
    }
}
