use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::tool::ToolResult;

/// Lifecycle event kinds produced during one tool invocation.
///
/// `Started`, `Completed`, `Denied`, `DoomLoop`, `PermissionAsked` and
/// `Aborted` come from the pipeline itself; `Metadata` and `Legacy` are
/// side-effect events emitted by the tool through its context and re-played
/// by the pipeline before the terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Completed,
    Denied,
    DoomLoop,
    PermissionAsked,
    Aborted,
    Metadata,
    Legacy,
}

/// A single pipeline event.
///
/// Constructed only through the named factories below; the one sanctioned
/// post-construction mutation is appending `duration_ms` to a `Completed`
/// event via [`ToolEvent::with_duration_ms`]. Every instance owns a fresh
/// `data` map; factories never share a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub tool_name: String,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ToolEvent {
    fn new(kind: EventKind, tool_name: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind,
            tool_name: tool_name.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Execution is about to start, with the effective (post-hook) args.
    pub fn started(tool_name: impl Into<String>, args: &Value) -> Self {
        let mut data = Map::new();
        data.insert("args".into(), args.clone());
        Self::new(EventKind::Started, tool_name, data)
    }

    /// Terminal: the invocation produced a result (success or tool error).
    pub fn completed(tool_name: impl Into<String>, result: &ToolResult) -> Self {
        let mut data = Map::new();
        data.insert("output".into(), Value::String(result.output.clone()));
        data.insert("is_error".into(), Value::Bool(result.is_error));
        data.insert("was_truncated".into(), Value::Bool(result.was_truncated));
        if let Some(title) = &result.title {
            data.insert("title".into(), Value::String(title.clone()));
        }
        if !result.metadata.is_empty() {
            data.insert("metadata".into(), Value::Object(result.metadata.clone()));
        }
        if !result.attachments.is_empty() {
            data.insert("attachments".into(), json!(result.attachments));
        }
        Self::new(EventKind::Completed, tool_name, data)
    }

    /// Terminal: a hook or the permission manager refused execution.
    pub fn denied(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("reason".into(), Value::String(reason.into()));
        Self::new(EventKind::Denied, tool_name, data)
    }

    /// Terminal: the repetition guard intervened.
    pub fn doom_loop(tool_name: impl Into<String>) -> Self {
        Self::new(EventKind::DoomLoop, tool_name, Map::new())
    }

    /// An interactive escalation was raised for this invocation.
    pub fn permission_asked(tool_name: impl Into<String>, permission: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("permission".into(), Value::String(permission.into()));
        Self::new(EventKind::PermissionAsked, tool_name, data)
    }

    /// Terminal: the caller cancelled the invocation mid-flight.
    pub fn aborted(tool_name: impl Into<String>) -> Self {
        Self::new(EventKind::Aborted, tool_name, Map::new())
    }

    /// Side-effect metadata emitted by a tool through its context. The tool
    /// name is left empty here; the consuming pipeline fills it on drain.
    pub fn metadata(data: Map<String, Value>) -> Self {
        Self::new(EventKind::Metadata, "", data)
    }

    /// Arbitrary legacy-format payload emitted through the context.
    pub fn legacy(data: Map<String, Value>) -> Self {
        Self::new(EventKind::Legacy, "", data)
    }

    /// Append wall-clock duration to a `Completed` event.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.data
            .insert("duration_ms".into(), Value::from(duration_ms));
        self
    }

    /// `true` for the four terminal kinds.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Completed | EventKind::Denied | EventKind::DoomLoop | EventKind::Aborted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_carries_args() {
        let event = ToolEvent::started("read_file", &json!({"path": "/tmp/f"}));
        assert_eq!(event.kind, EventKind::Started);
        assert_eq!(event.tool_name, "read_file");
        assert_eq!(event.data["args"], json!({"path": "/tmp/f"}));
    }

    #[test]
    fn completed_carries_result_fields() {
        let result = ToolResult::success("all good")
            .with_title("Read")
            .with_metadata("lines", json!(40));
        let event = ToolEvent::completed("read_file", &result);
        assert_eq!(event.kind, EventKind::Completed);
        assert_eq!(event.data["output"], json!("all good"));
        assert_eq!(event.data["is_error"], json!(false));
        assert_eq!(event.data["title"], json!("Read"));
        assert_eq!(event.data["metadata"]["lines"], json!(40));
    }

    #[test]
    fn completed_omits_empty_metadata() {
        let event = ToolEvent::completed("t", &ToolResult::success("ok"));
        assert!(!event.data.contains_key("metadata"));
        assert!(!event.data.contains_key("title"));
    }

    #[test]
    fn with_duration_appends_field() {
        let event = ToolEvent::completed("t", &ToolResult::success("ok")).with_duration_ms(125);
        assert_eq!(event.data["duration_ms"], json!(125));
    }

    #[test]
    fn denied_carries_reason() {
        let event = ToolEvent::denied("bash", "blocked by policy");
        assert_eq!(event.kind, EventKind::Denied);
        assert_eq!(event.data["reason"], json!("blocked by policy"));
    }

    #[test]
    fn metadata_event_has_empty_tool_name() {
        let mut data = Map::new();
        data.insert("bytes_read".into(), json!(512));
        let event = ToolEvent::metadata(data);
        assert_eq!(event.kind, EventKind::Metadata);
        assert!(event.tool_name.is_empty());
    }

    #[test]
    fn terminal_classification() {
        let result = ToolResult::success("ok");
        assert!(ToolEvent::completed("t", &result).is_terminal());
        assert!(ToolEvent::denied("t", "r").is_terminal());
        assert!(ToolEvent::doom_loop("t").is_terminal());
        assert!(ToolEvent::aborted("t").is_terminal());
        assert!(!ToolEvent::started("t", &json!({})).is_terminal());
        assert!(!ToolEvent::permission_asked("t", "p").is_terminal());
        assert!(!ToolEvent::metadata(Map::new()).is_terminal());
    }

    #[test]
    fn event_serializes_with_snake_case_type_tag() {
        let event = ToolEvent::doom_loop("search");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"doom_loop""#), "json: {json}");
        assert!(json.contains(r#""tool_name":"search""#), "json: {json}");
        assert!(json.contains("timestamp"), "json: {json}");
    }

    #[test]
    fn event_roundtrips_through_json() {
        let event = ToolEvent::permission_asked("bash", "execute");
        let json = serde_json::to_string(&event).unwrap();
        let back: ToolEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, EventKind::PermissionAsked);
        assert_eq!(back.tool_name, "bash");
        assert_eq!(back.data["permission"], json!("execute"));
    }

    #[test]
    fn factories_allocate_fresh_data_maps() {
        let mut first = ToolEvent::doom_loop("a");
        first.data.insert("marker".into(), json!(true));
        let second = ToolEvent::doom_loop("b");
        assert!(!second.data.contains_key("marker"));
    }
}
