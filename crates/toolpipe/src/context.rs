use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::event::ToolEvent;
use crate::task;

/// Callback for in-line human confirmation: `(permission, description) ->
/// granted`. Deployments wire this to a real prompt; the default grants.
pub type OnAsk =
    dyn Fn(&str, &str) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync;

/// Per-invocation execution context.
///
/// Exactly one context exists per invocation, exclusively owned by the
/// pipeline call that consumes it. The cancellation token is created fresh
/// for each context and never reused; callers keep a clone (via
/// [`cancellation_token`](Self::cancellation_token)) to request
/// cancellation. The pending event queue is drained exactly once per
/// invocation by the pipeline.
pub struct ToolContext {
    session_id: String,
    message_id: String,
    call_id: String,
    conversation_id: String,
    agent_id: Option<String>,
    project_id: Option<String>,
    user_id: Option<String>,
    token: CancellationToken,
    /// Read-only snapshot of prior conversation messages.
    messages: Vec<Value>,
    /// Side-effect events emitted by the tool during execution. Lock is
    /// never held across an await.
    pending: Mutex<Vec<ToolEvent>>,
    on_ask: Option<Arc<OnAsk>>,
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        call_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            call_id: call_id.into(),
            conversation_id: conversation_id.into(),
            agent_id: None,
            project_id: None,
            user_id: None,
            token: CancellationToken::new(),
            messages: Vec::new(),
            pending: Mutex::new(Vec::new()),
            on_ask: None,
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach the conversation snapshot visible to the tool.
    pub fn with_messages(mut self, messages: Vec<Value>) -> Self {
        self.messages = messages;
        self
    }

    /// Wire the human-in-the-loop confirmation callback.
    pub fn with_on_ask(mut self, on_ask: Arc<OnAsk>) -> Self {
        self.on_ask = Some(on_ask);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn messages(&self) -> &[Value] {
        &self.messages
    }

    /// Clone of this invocation's cancellation token. Cancelling it aborts
    /// the invocation at its next suspension point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Append a side-effect event to the pending queue. Never blocks,
    /// never fails.
    pub fn emit(&self, event: ToolEvent) {
        self.pending
            .lock()
            .expect("pending events lock poisoned")
            .push(event);
    }

    /// Convenience: emit a metadata-kind event carrying `data`. The
    /// consuming pipeline fills in the tool name.
    pub fn metadata(&self, data: Map<String, Value>) {
        self.emit(ToolEvent::metadata(data));
    }

    /// Ask the human for confirmation. Without a wired callback this always
    /// grants.
    pub async fn ask(&self, permission: &str, description: &str) -> bool {
        match &self.on_ask {
            Some(callback) => callback(permission, description).await,
            None => true,
        }
    }

    /// Run one awaitable against this context's cancellation token and an
    /// optional deadline. Fails with [`Error::Aborted`] if the token fires,
    /// [`Error::Timeout`] if the deadline elapses, or the awaitable's own
    /// error otherwise.
    pub async fn race<T>(
        &self,
        fut: impl Future<Output = Result<T, Error>>,
        timeout: Option<Duration>,
    ) -> Result<T, Error> {
        task::race_with_timeout(&self.token, fut, timeout).await
    }

    /// Atomically return and clear the pending event queue. The pipeline
    /// calls this once per invocation to harvest side effects.
    pub fn consume_pending_events(&self) -> Vec<ToolEvent> {
        std::mem::take(&mut *self.pending.lock().expect("pending events lock poisoned"))
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("message_id", &self.message_id)
            .field("call_id", &self.call_id)
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}
