use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::context::ToolContext;
use crate::error::Error;
use crate::tool::ToolResult;

/// Verdict returned by a before-hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    /// Proceed to the next hook (or the next pipeline stage).
    Continue,
    /// Stop the invocation with a denial.
    Deny,
    /// Escalate to human confirmation before proceeding.
    Ask,
}

/// Outcome of a before-hook: the verdict plus optional rewritten arguments
/// and a human-readable reason for Deny/Ask.
#[derive(Debug, Clone)]
pub struct HookResult {
    pub decision: HookDecision,
    pub args: Option<Value>,
    pub reason: Option<String>,
}

impl HookResult {
    pub fn cont() -> Self {
        Self { decision: HookDecision::Continue, args: None, reason: None }
    }

    /// Continue, replacing the arguments seen by later hooks and the tool.
    pub fn continue_with(args: Value) -> Self {
        Self { decision: HookDecision::Continue, args: Some(args), reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { decision: HookDecision::Deny, args: None, reason: Some(reason.into()) }
    }

    pub fn ask(reason: impl Into<String>) -> Self {
        Self { decision: HookDecision::Ask, args: None, reason: Some(reason.into()) }
    }
}

impl Default for HookResult {
    fn default() -> Self {
        Self::cont()
    }
}

/// Policy hook that runs before a tool executes. May rewrite arguments,
/// deny the call, or escalate to a human.
pub trait BeforeHook: Send + Sync {
    fn call<'a>(
        &'a self,
        tool_name: &'a str,
        args: &'a Value,
        ctx: &'a ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<HookResult, Error>> + Send + 'a>>;
}

/// Hook that runs after a tool executes, observing or transforming the
/// result before it reaches the caller.
pub trait AfterHook: Send + Sync {
    fn call<'a>(
        &'a self,
        tool_name: &'a str,
        result: ToolResult,
        ctx: &'a ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<ToolResult, Error>> + Send + 'a>>;
}

struct BeforeEntry {
    pattern: String,
    priority: i32,
    hook: Arc<dyn BeforeHook>,
}

struct AfterEntry {
    pattern: String,
    priority: i32,
    hook: Arc<dyn AfterHook>,
}

/// Ordered collection of before/after hooks, matched to tools by glob
/// pattern and run in ascending priority order. Registration order breaks
/// priority ties.
#[derive(Default)]
pub struct HookRegistry {
    before: RwLock<Vec<BeforeEntry>>,
    after: RwLock<Vec<AfterEntry>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a before-hook for tools matching `pattern`. Lower priority
    /// runs first.
    pub fn register_before(
        &self,
        pattern: impl Into<String>,
        priority: i32,
        hook: Arc<dyn BeforeHook>,
    ) {
        let mut entries = self.before.write().expect("before hooks lock poisoned");
        entries.push(BeforeEntry { pattern: pattern.into(), priority, hook });
        // sort_by_key is stable, so equal priorities keep insertion order.
        entries.sort_by_key(|e| e.priority);
    }

    /// Register an after-hook for tools matching `pattern`.
    pub fn register_after(
        &self,
        pattern: impl Into<String>,
        priority: i32,
        hook: Arc<dyn AfterHook>,
    ) {
        let mut entries = self.after.write().expect("after hooks lock poisoned");
        entries.push(AfterEntry { pattern: pattern.into(), priority, hook });
        entries.sort_by_key(|e| e.priority);
    }

    pub fn before_count(&self) -> usize {
        self.before.read().expect("before hooks lock poisoned").len()
    }

    pub fn after_count(&self) -> usize {
        self.after.read().expect("after hooks lock poisoned").len()
    }

    pub fn clear(&self) {
        self.before.write().expect("before hooks lock poisoned").clear();
        self.after.write().expect("after hooks lock poisoned").clear();
    }

    /// Run the matching before-hooks in order, threading rewritten
    /// arguments through. Stops at the first Deny or Ask verdict. A hook
    /// that fails is logged and treated as Continue with unchanged
    /// arguments.
    pub async fn run_before(
        &self,
        tool_name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> (Value, HookResult) {
        let matching: Vec<Arc<dyn BeforeHook>> = {
            let entries = self.before.read().expect("before hooks lock poisoned");
            entries
                .iter()
                .filter(|e| glob_match(&e.pattern, tool_name))
                .map(|e| Arc::clone(&e.hook))
                .collect()
        };

        let mut current = args;
        for hook in matching {
            match hook.call(tool_name, &current, ctx).await {
                Ok(result) => match result.decision {
                    HookDecision::Continue => {
                        if let Some(rewritten) = result.args {
                            current = rewritten;
                        }
                    }
                    HookDecision::Deny | HookDecision::Ask => {
                        return (current, result);
                    }
                },
                Err(e) => {
                    tracing::warn!(tool = %tool_name, error = %e, "before hook failed, continuing");
                }
            }
        }
        (current, HookResult::cont())
    }

    /// Run the matching after-hooks in order, mapping the result through
    /// each. A hook that fails is logged and skipped.
    pub async fn run_after(
        &self,
        tool_name: &str,
        result: ToolResult,
        ctx: &ToolContext,
    ) -> ToolResult {
        let matching: Vec<Arc<dyn AfterHook>> = {
            let entries = self.after.read().expect("after hooks lock poisoned");
            entries
                .iter()
                .filter(|e| glob_match(&e.pattern, tool_name))
                .map(|e| Arc::clone(&e.hook))
                .collect()
        };

        let mut current = result;
        for hook in matching {
            match hook.call(tool_name, current.clone(), ctx).await {
                Ok(transformed) => current = transformed,
                Err(e) => {
                    tracing::warn!(tool = %tool_name, error = %e, "after hook failed, skipping");
                }
            }
        }
        current
    }
}

/// Glob matcher supporting `*` (any run) and `?` (any single char).
/// Iterative backtracking, linear in practice.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_ti = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use serde_json::json;

    fn ctx() -> ToolContext {
        ToolContext::new("s", "m", "c", "v")
    }

    struct RecordingHook {
        label: &'static str,
        log: Arc<std::sync::Mutex<Vec<&'static str>>>,
        result: fn() -> HookResult,
    }

    impl BeforeHook for RecordingHook {
        fn call<'a>(
            &'a self,
            _tool_name: &'a str,
            _args: &'a Value,
            _ctx: &'a ToolContext,
        ) -> Pin<Box<dyn Future<Output = Result<HookResult, Error>> + Send + 'a>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(self.label);
                Ok((self.result)())
            })
        }
    }

    struct FailingHook;

    impl BeforeHook for FailingHook {
        fn call<'a>(
            &'a self,
            _tool_name: &'a str,
            _args: &'a Value,
            _ctx: &'a ToolContext,
        ) -> Pin<Box<dyn Future<Output = Result<HookResult, Error>> + Send + 'a>> {
            Box::pin(async { Err(Error::Hook("boom".into())) })
        }
    }

    struct RewriteHook;

    impl BeforeHook for RewriteHook {
        fn call<'a>(
            &'a self,
            _tool_name: &'a str,
            args: &'a Value,
            _ctx: &'a ToolContext,
        ) -> Pin<Box<dyn Future<Output = Result<HookResult, Error>> + Send + 'a>> {
            let mut rewritten = args.clone();
            rewritten["redacted"] = json!(true);
            Box::pin(async move { Ok(HookResult::continue_with(rewritten)) })
        }
    }

    struct CountingBefore {
        calls: Arc<AtomicU32>,
    }

    impl BeforeHook for CountingBefore {
        fn call<'a>(
            &'a self,
            _tool_name: &'a str,
            _args: &'a Value,
            _ctx: &'a ToolContext,
        ) -> Pin<Box<dyn Future<Output = Result<HookResult, Error>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(HookResult::cont()) })
        }
    }

    struct TitleAfter;

    impl AfterHook for TitleAfter {
        fn call<'a>(
            &'a self,
            _tool_name: &'a str,
            result: ToolResult,
            _ctx: &'a ToolContext,
        ) -> Pin<Box<dyn Future<Output = Result<ToolResult, Error>> + Send + 'a>> {
            Box::pin(async move { Ok(result.with_title("reviewed")) })
        }
    }

    // --- glob matching ---

    #[test]
    fn glob_matches() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("bash", "bash"));
        assert!(!glob_match("bash", "read_file"));
        assert!(glob_match("mcp__*", "mcp__fs__read"));
        assert!(!glob_match("mcp__*", "bash"));
        assert!(glob_match("read_?ile", "read_file"));
        assert!(glob_match("*file*", "read_file_fast"));
        assert!(!glob_match("", "x"));
        assert!(glob_match("", ""));
        assert!(glob_match("**", "nested"));
    }

    // --- before hooks ---

    #[tokio::test]
    async fn before_hooks_run_in_priority_order() {
        let registry = HookRegistry::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        registry.register_before(
            "*",
            10,
            Arc::new(RecordingHook { label: "second", log: log.clone(), result: HookResult::cont }),
        );
        registry.register_before(
            "*",
            0,
            Arc::new(RecordingHook { label: "first", log: log.clone(), result: HookResult::cont }),
        );

        let (_, verdict) = registry.run_before("bash", json!({}), &ctx()).await;
        assert_eq!(verdict.decision, HookDecision::Continue);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn equal_priority_keeps_registration_order() {
        let registry = HookRegistry::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for label in ["a", "b", "c"] {
            registry.register_before(
                "*",
                5,
                Arc::new(RecordingHook { label, log: log.clone(), result: HookResult::cont }),
            );
        }
        registry.run_before("bash", json!({}), &ctx()).await;
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn deny_stops_later_hooks() {
        let registry = HookRegistry::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        registry.register_before(
            "*",
            0,
            Arc::new(RecordingHook {
                label: "denier",
                log: log.clone(),
                result: || HookResult::deny("not allowed"),
            }),
        );
        let later = Arc::new(AtomicU32::new(0));
        registry.register_before("*", 1, Arc::new(CountingBefore { calls: later.clone() }));

        let (_, verdict) = registry.run_before("bash", json!({}), &ctx()).await;
        assert_eq!(verdict.decision, HookDecision::Deny);
        assert_eq!(verdict.reason.as_deref(), Some("not allowed"));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_hook_continues_with_unchanged_args() {
        let registry = HookRegistry::new();
        registry.register_before("*", 0, Arc::new(FailingHook));
        registry.register_before("*", 1, Arc::new(RewriteHook));

        let (args, verdict) = registry.run_before("bash", json!({"cmd": "ls"}), &ctx()).await;
        assert_eq!(verdict.decision, HookDecision::Continue);
        assert_eq!(args["cmd"], json!("ls"));
        assert_eq!(args["redacted"], json!(true));
    }

    #[tokio::test]
    async fn rewritten_args_thread_through() {
        let registry = HookRegistry::new();
        registry.register_before("*", 0, Arc::new(RewriteHook));
        let (args, _) = registry.run_before("bash", json!({"cmd": "ls"}), &ctx()).await;
        assert_eq!(args, json!({"cmd": "ls", "redacted": true}));
    }

    #[tokio::test]
    async fn pattern_filters_by_tool_name() {
        let registry = HookRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        registry.register_before("mcp__*", 0, Arc::new(CountingBefore { calls: calls.clone() }));

        registry.run_before("bash", json!({}), &ctx()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        registry.run_before("mcp__fs__read", json!({}), &ctx()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // --- after hooks ---

    #[tokio::test]
    async fn after_hook_transforms_result() {
        let registry = HookRegistry::new();
        registry.register_after("*", 0, Arc::new(TitleAfter));
        let out = registry.run_after("bash", ToolResult::success("done"), &ctx()).await;
        assert_eq!(out.title.as_deref(), Some("reviewed"));
        assert_eq!(out.output, "done");
    }

    #[tokio::test]
    async fn clear_removes_all_hooks() {
        let registry = HookRegistry::new();
        registry.register_before("*", 0, Arc::new(RewriteHook));
        registry.register_after("*", 0, Arc::new(TitleAfter));
        assert_eq!(registry.before_count(), 1);
        assert_eq!(registry.after_count(), 1);
        registry.clear();
        assert_eq!(registry.before_count(), 0);
        assert_eq!(registry.after_count(), 0);
    }
}
