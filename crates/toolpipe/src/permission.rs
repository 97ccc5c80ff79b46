use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hooks::glob_match;

/// Verdict for a permission lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Allow,
    Deny,
    Ask,
}

/// Resolution of an interactive permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskOutcome {
    Approve,
    Reject,
}

/// Decides whether a tool may exercise a named permission.
///
/// `evaluate` is a synchronous lookup so implementations keep their rules in
/// memory. `ask` runs when evaluation lands on [`PermissionAction::Ask`] and
/// may block on a human.
pub trait PermissionManager: Send + Sync {
    fn evaluate(&self, permission: &str, tool_name: &str) -> PermissionAction;

    fn ask<'a>(
        &'a self,
        permission: &'a str,
        tool_name: &'a str,
        session_id: &'a str,
        metadata: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = AskOutcome> + Send + 'a>> {
        let _ = (permission, tool_name, session_id, metadata);
        Box::pin(async { AskOutcome::Approve })
    }
}

/// One rule in a ruleset: glob patterns for the permission and the tool,
/// plus the action to take when both match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    pub permission: String,
    #[serde(default = "default_tool_pattern")]
    pub tool: String,
    pub action: PermissionAction,
}

fn default_tool_pattern() -> String {
    "*".to_string()
}

impl PermissionRule {
    pub fn new(
        permission: impl Into<String>,
        tool: impl Into<String>,
        action: PermissionAction,
    ) -> Self {
        Self { permission: permission.into(), tool: tool.into(), action }
    }

    fn matches(&self, permission: &str, tool_name: &str) -> bool {
        glob_match(&self.permission, permission) && glob_match(&self.tool, tool_name)
    }
}

/// Rule-list permission manager. Rules are checked in order and the first
/// match wins; a permission no rule covers escalates to Ask.
#[derive(Debug, Clone, Default)]
pub struct RulesetPermissionManager {
    rules: Vec<PermissionRule>,
}

impl RulesetPermissionManager {
    pub fn new(rules: Vec<PermissionRule>) -> Self {
        Self { rules }
    }

    /// Manager whose single rule allows every permission for every tool.
    pub fn allow_all() -> Self {
        Self::new(vec![PermissionRule::new("*", "*", PermissionAction::Allow)])
    }

    pub fn push(&mut self, rule: PermissionRule) {
        self.rules.push(rule);
    }
}

impl PermissionManager for RulesetPermissionManager {
    fn evaluate(&self, permission: &str, tool_name: &str) -> PermissionAction {
        for rule in &self.rules {
            if rule.matches(permission, tool_name) {
                return rule.action;
            }
        }
        PermissionAction::Ask
    }
}
