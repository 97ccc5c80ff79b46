use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::PipelineConfig;
use crate::context::ToolContext;
use crate::detector::{LoopDetector, RepeatCallDetector};
use crate::error::Error;
use crate::event::ToolEvent;
use crate::hooks::{HookDecision, HookRegistry};
use crate::permission::{AskOutcome, PermissionAction, PermissionManager};
use crate::tool::{Tool, ToolResult};

/// Ordered stream of events for one tool invocation.
///
/// The stream ends after exactly one terminal event (completed, denied,
/// doom_loop or aborted). Dropping the stream does not stop the invocation;
/// cancel through the context's token for that.
pub struct ToolEventStream {
    rx: mpsc::UnboundedReceiver<ToolEvent>,
}

impl ToolEventStream {
    /// Next event, or None once the invocation has finished.
    pub async fn next(&mut self) -> Option<ToolEvent> {
        self.rx.recv().await
    }

    /// Drain the stream to completion.
    pub async fn collect(mut self) -> Vec<ToolEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

/// The tool execution pipeline: policy hooks, loop avoidance, permission
/// gating, execution with timeout and cancellation, output normalization
/// and truncation, and side-effect collection, in that order.
pub struct ToolPipeline {
    hooks: Arc<HookRegistry>,
    permissions: Option<Arc<dyn PermissionManager>>,
    detector: Arc<dyn LoopDetector>,
    config: PipelineConfig,
}

impl Default for ToolPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl ToolPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            hooks: Arc::new(HookRegistry::new()),
            permissions: None,
            detector: Arc::new(RepeatCallDetector::new(config.doom_loop_threshold)),
            config,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionManager>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn LoopDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one tool invocation, returning its event stream immediately.
    /// The invocation itself runs on a spawned task and keeps going even if
    /// the returned stream is dropped.
    pub fn execute(
        &self,
        tool: Arc<dyn Tool>,
        args: Value,
        ctx: ToolContext,
    ) -> ToolEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let hooks = Arc::clone(&self.hooks);
        let permissions = self.permissions.clone();
        let detector = Arc::clone(&self.detector);
        let config = self.config.clone();
        tokio::spawn(async move {
            drive(tool, args, ctx, hooks, permissions, detector, config, tx).await;
        });
        ToolEventStream { rx }
    }
}

/// Forward the context's pending side-effect events, stamping the tool name
/// on events the tool left unattributed. Runs before every terminal event.
fn drain_side_effects(
    tx: &mpsc::UnboundedSender<ToolEvent>,
    ctx: &ToolContext,
    tool_name: &str,
) {
    for mut event in ctx.consume_pending_events() {
        if event.tool_name.is_empty() {
            event.tool_name = tool_name.to_string();
        }
        let _ = tx.send(event);
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    tool: Arc<dyn Tool>,
    args: Value,
    ctx: ToolContext,
    hooks: Arc<HookRegistry>,
    permissions: Option<Arc<dyn PermissionManager>>,
    detector: Arc<dyn LoopDetector>,
    config: PipelineConfig,
    tx: mpsc::UnboundedSender<ToolEvent>,
) {
    let tool_name = tool.name().to_string();

    // Policy hooks may rewrite the arguments or stop the call.
    let (args, verdict) = hooks.run_before(&tool_name, args, &ctx).await;
    match verdict.decision {
        HookDecision::Continue => {}
        HookDecision::Deny => {
            let reason = verdict.reason.unwrap_or_else(|| "denied by hook".to_string());
            tracing::info!(tool = %tool_name, reason = %reason, "tool call denied by hook");
            drain_side_effects(&tx, &ctx, &tool_name);
            let _ = tx.send(ToolEvent::denied(&tool_name, reason));
            return;
        }
        HookDecision::Ask => {
            let permission = tool.permission().unwrap_or("");
            let _ = tx.send(ToolEvent::permission_asked(&tool_name, permission));
            if !ctx.ask(permission, &tool_name).await {
                let reason = verdict
                    .reason
                    .unwrap_or_else(|| "rejected by user".to_string());
                drain_side_effects(&tx, &ctx, &tool_name);
                let _ = tx.send(ToolEvent::denied(&tool_name, reason));
                return;
            }
        }
    }

    // Loop avoidance. A blocked call is not recorded, so the streak stands.
    if detector.should_intervene(&tool_name, &args) {
        tracing::warn!(tool = %tool_name, "repeated identical call blocked");
        drain_side_effects(&tx, &ctx, &tool_name);
        let _ = tx.send(ToolEvent::doom_loop(&tool_name));
        return;
    }
    detector.record(&tool_name, &args);

    // Permission gate, only for tools that declare a permission.
    if let (Some(permission), Some(manager)) = (tool.permission(), permissions.as_ref()) {
        match manager.evaluate(permission, &tool_name) {
            PermissionAction::Allow => {}
            PermissionAction::Deny => {
                tracing::info!(tool = %tool_name, permission = %permission, "tool call denied by ruleset");
                drain_side_effects(&tx, &ctx, &tool_name);
                let _ = tx.send(ToolEvent::denied(
                    &tool_name,
                    format!("permission '{permission}' denied"),
                ));
                return;
            }
            PermissionAction::Ask => {
                let _ = tx.send(ToolEvent::permission_asked(&tool_name, permission));
                let metadata = args.as_object().cloned().unwrap_or_default();
                let outcome = manager
                    .ask(permission, &tool_name, ctx.session_id(), &metadata)
                    .await;
                if outcome == AskOutcome::Reject {
                    drain_side_effects(&tx, &ctx, &tool_name);
                    let _ = tx.send(ToolEvent::denied(
                        &tool_name,
                        format!("permission '{permission}' rejected"),
                    ));
                    return;
                }
            }
        }
    }

    let _ = tx.send(ToolEvent::started(&tool_name, &args));
    let start = Instant::now();

    let result = match ctx.race(tool.execute(args, &ctx), config.tool_timeout()).await {
        Ok(ret) => ret.normalize(),
        Err(Error::Aborted) => {
            tracing::info!(tool = %tool_name, "tool call aborted");
            drain_side_effects(&tx, &ctx, &tool_name);
            let _ = tx.send(ToolEvent::aborted(&tool_name));
            return;
        }
        // A timeout or tool failure is an error result, not a pipeline
        // failure.
        Err(e) => {
            tracing::warn!(tool = %tool_name, error = %e, "tool execution failed");
            ToolResult::error(e.to_string())
        }
    };

    let result = result.truncated(config.max_output_bytes);
    let result = hooks.run_after(&tool_name, result, &ctx).await;

    drain_side_effects(&tx, &ctx, &tool_name);
    let duration_ms = start.elapsed().as_millis() as u64;
    let _ = tx.send(ToolEvent::completed(&tool_name, &result).with_duration_ms(duration_ms));
}
