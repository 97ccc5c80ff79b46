pub mod config;
pub mod context;
pub mod detector;
pub mod error;
pub mod event;
pub mod hooks;
pub mod mcp;
pub mod permission;
pub mod pipeline;
pub mod task;
pub mod tool;

pub use config::PipelineConfig;
pub use context::{OnAsk, ToolContext};
pub use detector::{LoopDetector, NoopDetector, RepeatCallDetector};
pub use error::Error;
pub use event::{EventKind, ToolEvent};
pub use hooks::{AfterHook, BeforeHook, HookDecision, HookRegistry, HookResult};
pub use mcp::{HttpTransport, McpAdapter, McpCallResult, McpClient, McpErrorType, McpTransport, RemoteTool};
pub use permission::{
    AskOutcome, PermissionAction, PermissionManager, PermissionRule, RulesetPermissionManager,
};
pub use pipeline::{ToolEventStream, ToolPipeline};
pub use task::{gather_or_abort, gather_settled, race_with_timeout};
pub use tool::{validate_tool_input, Attachment, Tool, ToolResult, ToolReturn};
