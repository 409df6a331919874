use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 request/response id. Preserved in whichever form the peer sent it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    String(String),
}

impl MessageId {
    pub fn as_number(&self) -> Option<i64> {
        match self {
            MessageId::Number(n) => Some(*n),
            MessageId::String(s) => s.parse().ok(),
        }
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{n}"),
            MessageId::String(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A decoded JSON-RPC 2.0 message, one frame body per value.
#[derive(Clone, Debug)]
pub enum Message {
    Request {
        id: MessageId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: MessageId,
        result: Option<Value>,
        error: Option<RpcError>,
    },
}

impl Message {
    pub fn request(id: MessageId, method: impl Into<String>, params: Value) -> Self {
        Message::Request {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Message::Notification {
            method: method.into(),
            params,
        }
    }

    pub fn success(id: MessageId, result: Value) -> Self {
        Message::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: MessageId, error: RpcError) -> Self {
        Message::Response {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Serializes to the JSON-RPC wire shape (`{"jsonrpc":"2.0",...}`).
    pub fn to_value(&self) -> Value {
        match self {
            Message::Request { id, method, params } => serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }),
            Message::Notification { method, params } => serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
            }),
            Message::Response { id, result, error } => {
                let mut obj = serde_json::json!({ "jsonrpc": "2.0", "id": id });
                let map = obj.as_object_mut().expect("object literal");
                if let Some(error) = error {
                    map.insert("error".into(), serde_json::to_value(error).unwrap_or(Value::Null));
                } else {
                    map.insert("result".into(), result.clone().unwrap_or(Value::Null));
                }
                obj
            }
        }
    }

    /// Decodes one JSON-RPC value into a `Message`, following the same
    /// presence-based discrimination the wire protocol specifies: a
    /// `method` with no `id` is a notification, an `id` with `method` is a
    /// request, anything else bearing `id` is a response.
    pub fn from_value(value: Value) -> Option<Message> {
        let has_id = value.get("id").is_some();
        let has_method = value.get("method").is_some();

        if has_method {
            let method = value.get("method")?.as_str()?.to_string();
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            return if has_id {
                let id: MessageId = serde_json::from_value(value.get("id")?.clone()).ok()?;
                Some(Message::Request { id, method, params })
            } else {
                Some(Message::Notification { method, params })
            };
        }

        if has_id {
            let id: MessageId = serde_json::from_value(value.get("id")?.clone()).ok()?;
            let result = value.get("result").cloned();
            let error = value
                .get("error")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok());
            return Some(Message::Response { id, result, error });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_request() {
        let v = serde_json::json!({"jsonrpc":"2.0","id":7,"method":"textDocument/hover","params":{}});
        match Message::from_value(v).unwrap() {
            Message::Request { id, method, .. } => {
                assert_eq!(id, MessageId::Number(7));
                assert_eq!(method, "textDocument/hover");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn decodes_notification() {
        let v = serde_json::json!({"method":"textDocument/didSave","params":{}});
        assert!(matches!(Message::from_value(v).unwrap(), Message::Notification { .. }));
    }

    #[test]
    fn decodes_response_with_string_id() {
        let v = serde_json::json!({"jsonrpc":"2.0","id":"0","result":{"ok":true}});
        match Message::from_value(v).unwrap() {
            Message::Response { id, result, error } => {
                assert_eq!(id, MessageId::String("0".into()));
                assert!(error.is_none());
                assert_eq!(result.unwrap()["ok"], true);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn roundtrips_through_to_value() {
        let msg = Message::request(MessageId::Number(1), "foo", serde_json::json!({"a":1}));
        let v = msg.to_value();
        let back = Message::from_value(v).unwrap();
        assert!(matches!(back, Message::Request { .. }));
    }
}
