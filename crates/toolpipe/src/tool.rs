use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::ToolContext;
use crate::error::Error;

/// A file-like artifact attached to a tool result, exclusively owned by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
    pub mime_type: String,
}

/// Output of a tool execution after normalization.
///
/// Immutable by convention: pipeline stages that change a result build a new
/// instance (the builder-style methods consume `self`). Each instance owns
/// its own metadata map and attachment list; there are no shared defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text destined for model consumption.
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub was_truncated: bool,
    /// Byte length of the pre-truncation output, set only when truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_bytes: Option<usize>,
    /// Location of the full output if persisted elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_output_path: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            title: None,
            metadata: Map::new(),
            attachments: Vec::new(),
            is_error: false,
            was_truncated: false,
            original_bytes: None,
            full_output_path: None,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::success(output)
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_full_output_path(mut self, path: impl Into<String>) -> Self {
        self.full_output_path = Some(path.into());
        self
    }

    /// Bound the output to `max_bytes`, preserving UTF-8 validity and all
    /// caller-set metadata, attachments and title.
    ///
    /// When truncated, appends a `[truncated: N bytes omitted]` suffix (not
    /// counted toward `max_bytes`, so the result may slightly exceed the
    /// limit) and records the original byte length. Skipped entirely for
    /// error results, empty output, already-truncated results, and
    /// `max_bytes` of 0, which makes the operation idempotent.
    pub fn truncated(mut self, max_bytes: usize) -> Self {
        if self.is_error || self.was_truncated || self.output.is_empty() || max_bytes == 0 {
            return self;
        }
        if self.output.len() > max_bytes {
            let original = self.output.len();
            let cut = floor_char_boundary(&self.output, max_bytes);
            let omitted = original - cut;
            self.output.truncate(cut);
            self.output
                .push_str(&format!("\n\n[truncated: {omitted} bytes omitted]"));
            self.was_truncated = true;
            self.original_bytes = Some(original);
        }
        self
    }
}

/// Find the largest byte index that is a char boundary at or below `target`.
pub(crate) fn floor_char_boundary(text: &str, target: usize) -> usize {
    let mut pos = target.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Raw return value of a tool, before normalization into a [`ToolResult`].
///
/// A closed set of shapes: already-shaped results pass through, JSON
/// objects carrying an `output` key are unpacked, and anything else becomes
/// plain text.
#[derive(Debug, Clone)]
pub enum ToolReturn {
    Result(ToolResult),
    Json(Value),
    Text(String),
}

impl ToolReturn {
    /// Convert into a [`ToolResult`].
    ///
    /// JSON objects with an `output` key have it extracted (string values
    /// used verbatim, others serialized) and the remaining keys folded into
    /// metadata; other JSON values are serialized wholesale as the output.
    pub fn normalize(self) -> ToolResult {
        match self {
            ToolReturn::Result(result) => result,
            ToolReturn::Text(text) => ToolResult::success(text),
            ToolReturn::Json(Value::Object(mut map)) if map.contains_key("output") => {
                let output = match map.remove("output") {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let mut result = ToolResult::success(output);
                result.metadata = map;
                result
            }
            ToolReturn::Json(Value::String(s)) => ToolResult::success(s),
            ToolReturn::Json(other) => ToolResult::success(other.to_string()),
        }
    }
}

/// A named, permission-tagged unit of side-effecting work.
///
/// Uses `Pin<Box<dyn Future>>` return type for dyn-compatibility, allowing
/// tools to be stored as `Arc<dyn Tool>`. The context gives the tool its
/// cancellation token, `race` helper, and side-effect event queue.
pub trait Tool: Send + Sync {
    /// Fully-qualified tool name (the string hooks pattern-match against).
    fn name(&self) -> &str;

    /// Permission tag evaluated by the permission manager. `None` skips the
    /// permission stage entirely.
    fn permission(&self) -> Option<&str> {
        None
    }

    fn execute<'a>(
        &'a self,
        args: Value,
        ctx: &'a ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<ToolReturn, Error>> + Send + 'a>>;
}

/// Validate tool input against the tool's declared JSON Schema.
///
/// Returns `Ok(())` if valid, `Err(error_message)` if the input does not
/// conform. The message is suitable for sending back to the LLM so it can
/// self-correct.
pub fn validate_tool_input(schema: &Value, input: &Value) -> Result<(), String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => {
            // An invalid schema must not block every call. Warn the operator
            // and skip validation.
            tracing::warn!(error = %e, "invalid tool schema, skipping validation");
            return Ok(());
        }
    };

    let errors: Vec<String> = validator.iter_errors(input).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("Input validation failed: {}", errors.join("; ")))
    }
}
