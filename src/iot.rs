//! IoT thing registry seam.
//!
//! The registry of controllable properties and methods lives outside the
//! core; the orchestrator only pushes descriptors/state snapshots to the
//! server and forwards inbound commands.

use serde_json::Value;
use std::sync::Mutex;

pub trait ThingManager: Send + Sync {
    /// JSON description of every registered thing, sent once per channel.
    fn descriptors_json(&self) -> Value;

    /// Serialized current state of all things. Compared as a string so the
    /// orchestrator can skip sends when nothing changed.
    fn states_json(&self) -> String;

    /// Executes one server-issued command.
    fn invoke(&self, command: &Value);
}

/// Test double: fixed descriptors, mutable states, recorded invocations.
pub struct MockThingManager {
    descriptors: Value,
    states: Mutex<String>,
    invocations: Mutex<Vec<Value>>,
}

impl MockThingManager {
    pub fn new() -> Self {
        Self {
            descriptors: serde_json::json!([{ "name": "speaker", "methods": ["set_volume"] }]),
            states: Mutex::new("[]".to_string()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn set_states(&self, states: &str) {
        *self.states.lock().unwrap_or_else(|e| e.into_inner()) = states.to_string();
    }

    pub fn invocations(&self) -> Vec<Value> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MockThingManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ThingManager for MockThingManager {
    fn descriptors_json(&self) -> Value {
        self.descriptors.clone()
    }

    fn states_json(&self) -> String {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn invoke(&self, command: &Value) {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command.clone());
    }
}
