//! Per-chat state, keyed by external chat id.
//!
//! Selection state (project, session, engine, model) lives in memory;
//! anything that must survive a restart (unsafe deadline, chat→project
//! binding) is also persisted through the store and re-hydrated on access.

use std::collections::HashMap;

use parking_lot::Mutex;

use tether_store::Provider;

/// In-memory state for one chat.
#[derive(Clone, Debug)]
pub struct ChatState {
    pub project_id: Option<String>,
    pub session_id: Option<String>,
    pub default_engine: Provider,
    pub model: Option<String>,
    pub opencode_agent: Option<String>,
    pub unsafe_until: Option<i64>,
    pub last_run_id: Option<String>,
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            project_id: None,
            session_id: None,
            default_engine: Provider::Claude,
            model: None,
            opencode_agent: None,
            unsafe_until: None,
            last_run_id: None,
        }
    }
}

/// Guarded map of chat states.
#[derive(Default)]
pub struct ChatStateMap {
    states: Mutex<HashMap<i64, ChatState>>,
}

impl ChatStateMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one chat's state (default if unseen).
    #[must_use]
    pub fn get(&self, chat_id: i64) -> ChatState {
        self.states.lock().get(&chat_id).cloned().unwrap_or_default()
    }

    /// Mutate one chat's state in place.
    pub fn update<R>(&self, chat_id: i64, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut states = self.states.lock();
        let state = states.entry(chat_id).or_default();
        f(state)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
