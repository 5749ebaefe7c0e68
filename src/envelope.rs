//! Correlation envelopes and the frames that carry them over the page channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel topics exchanged between the dev server and the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Page finished wiring its dispatcher. Carries no envelope.
    BridgeReady,
    /// Server asks the page to run a tool.
    ToolCall,
    /// Page answers a tool call.
    ToolResult,
    /// Page asks the server to run a tool's server method.
    ToolServerCall,
    /// Server answers a server-method call.
    ToolServerResult,
}

impl Topic {
    /// All topics, in wire order.
    pub const ALL: [Topic; 5] = [
        Topic::BridgeReady,
        Topic::ToolCall,
        Topic::ToolResult,
        Topic::ToolServerCall,
        Topic::ToolServerResult,
    ];

    /// The event name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::BridgeReady => "mcp:bridge-ready",
            Topic::ToolCall => "mcp:tool-call",
            Topic::ToolResult => "mcp:tool-result",
            Topic::ToolServerCall => "mcp:tool-server-call",
            Topic::ToolServerResult => "mcp:tool-server-result",
        }
    }

    /// Look up a topic by its wire name.
    pub fn from_event(event: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|topic| topic.as_str() == event)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit correlated by `id` across the channel.
///
/// Requests carry `name`/`params`; responses carry exactly one of
/// `result`/`error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation key.
    pub id: String,
    /// Tool name, or `tool:method` for server calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Call parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Successful outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(id: impl Into<String>, name: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            params,
            ..Self::default()
        }
    }

    /// Build a response envelope from an outcome.
    ///
    /// A success with no value leaves `result` absent, matching
    /// `{id, result?}` on the wire.
    pub fn response(id: impl Into<String>, outcome: Result<Value, String>) -> Self {
        let (result, error) = match outcome {
            Ok(Value::Null) => (None, None),
            Ok(value) => (Some(value), None),
            Err(message) => (None, Some(message)),
        };
        Self {
            id: id.into(),
            result,
            error,
            ..Self::default()
        }
    }

    /// Read the outcome a response envelope carries.
    pub fn outcome(&self) -> Result<Value, String> {
        match &self.error {
            Some(message) => Err(message.clone()),
            None => Ok(self.result.clone().unwrap_or(Value::Null)),
        }
    }
}

/// One event on the channel, shaped like a dev-server custom event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Always `"custom"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Topic wire name.
    pub event: String,
    /// Envelope, absent for `mcp:bridge-ready`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Envelope>,
}

impl Frame {
    /// Frame an envelope under a topic.
    pub fn new(topic: Topic, data: Option<Envelope>) -> Self {
        Self {
            kind: "custom".into(),
            event: topic.as_str().into(),
            data,
        }
    }

    /// The frame's topic, if it is one the bridge knows.
    pub fn topic(&self) -> Option<Topic> {
        Topic::from_event(&self.event)
    }

    /// Encode as a websocket text message.
    pub fn to_text(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a websocket text message.
    pub fn from_text(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_names_match_wire_contract() {
        assert_eq!(Topic::ToolCall.as_str(), "mcp:tool-call");
        assert_eq!(Topic::from_event("mcp:tool-server-result"), Some(Topic::ToolServerResult));
        assert_eq!(Topic::from_event("vite:beforeUpdate"), None);
    }

    #[test]
    fn error_response_has_no_result_field() {
        let envelope = Envelope::response("1", Err("Tool not found: nonexistent".into()));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value, json!({"id": "1", "error": "Tool not found: nonexistent"}));
    }

    #[test]
    fn request_frame_layout() {
        let frame = Frame::new(
            Topic::ToolCall,
            Some(Envelope::request("abc", "read-console", Some(json!({"tail": 2})))),
        );
        let value: Value = serde_json::from_str(&frame.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "custom",
                "event": "mcp:tool-call",
                "data": {"id": "abc", "name": "read-console", "params": {"tail": 2}}
            })
        );
    }

    #[test]
    fn bridge_ready_frame_has_no_data() {
        let frame = Frame::from_text(r#"{"type":"custom","event":"mcp:bridge-ready"}"#).unwrap();
        assert_eq!(frame.topic(), Some(Topic::BridgeReady));
        assert!(frame.data.is_none());
    }

    #[test]
    fn missing_result_reads_as_null() {
        let envelope: Envelope = serde_json::from_value(json!({"id": "7"})).unwrap();
        assert_eq!(envelope.outcome(), Ok(Value::Null));
    }
}
