//! Lifecycle state tags and the engine-owned part of every status.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;

/// Coarse lifecycle tag driving handler dispatch.
///
/// `Deleted` is terminal: once recorded the finalizer is removed and the
/// object store is free to complete the physical delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub enum LifecycleState {
    #[default]
    Initial,
    Created,
    Updated,
    Deleted,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Deleted
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Initial => "Initial",
            LifecycleState::Created => "Created",
            LifecycleState::Updated => "Updated",
            LifecycleState::Deleted => "Deleted",
        };
        f.write_str(s)
    }
}

/// Status fields written by the reconciliation engine. Kind-specific status
/// types embed this with `#[serde(flatten)]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StateStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<LifecycleState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_msg: Option<String>,
}

impl StateStatus {
    /// Current lifecycle state; objects that never recorded one are `Initial`.
    pub fn current_state(status: Option<&StateStatus>) -> LifecycleState {
        status.and_then(|s| s.state).unwrap_or_default()
    }
}
