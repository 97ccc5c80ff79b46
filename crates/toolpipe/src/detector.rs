use std::sync::Mutex;

use serde_json::Value;

/// Watches the call history of a session and intervenes when the model is
/// stuck repeating itself.
pub trait LoopDetector: Send + Sync {
    /// True if this call should be blocked as a loop.
    fn should_intervene(&self, tool_name: &str, args: &Value) -> bool;

    /// Record a call that was allowed to proceed.
    fn record(&self, tool_name: &str, args: &Value);
}

/// Detector that never intervenes.
#[derive(Debug, Default)]
pub struct NoopDetector;

impl LoopDetector for NoopDetector {
    fn should_intervene(&self, _tool_name: &str, _args: &Value) -> bool {
        false
    }

    fn record(&self, _tool_name: &str, _args: &Value) {}
}

#[derive(Debug, Default)]
struct RepeatState {
    last_fingerprint: Option<u64>,
    consecutive: u32,
}

/// Flags a call once the same tool has been invoked with identical
/// arguments `threshold` times in a row. A call with a different
/// fingerprint resets the streak.
#[derive(Debug)]
pub struct RepeatCallDetector {
    threshold: u32,
    state: Mutex<RepeatState>,
}

impl Default for RepeatCallDetector {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RepeatCallDetector {
    pub fn new(threshold: u32) -> Self {
        Self { threshold, state: Mutex::new(RepeatState::default()) }
    }

    fn fingerprint(tool_name: &str, args: &Value) -> u64 {
        // FNV-1a over the name and the serialized arguments.
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in tool_name.bytes().chain(args.to_string().bytes()) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

impl LoopDetector for RepeatCallDetector {
    fn should_intervene(&self, tool_name: &str, args: &Value) -> bool {
        let fingerprint = Self::fingerprint(tool_name, args);
        let state = self.state.lock().expect("detector state lock poisoned");
        state.last_fingerprint == Some(fingerprint) && state.consecutive >= self.threshold
    }

    fn record(&self, tool_name: &str, args: &Value) {
        let fingerprint = Self::fingerprint(tool_name, args);
        let mut state = self.state.lock().expect("detector state lock poisoned");
        if state.last_fingerprint == Some(fingerprint) {
            state.consecutive += 1;
        } else {
            state.last_fingerprint = Some(fingerprint);
            state.consecutive = 1;
        }
    }
}
