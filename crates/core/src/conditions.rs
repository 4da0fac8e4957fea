//! Typed, timestamped status conditions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Concern a condition reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    Ready,
    ResourceVersionStatus,
    ProjectReady,
    IpAccessListReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Machine-readable reason attached to a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Reason {
    Settled,
    ReconcileError,
    Deleting,
    ResourceVersionValid,
    InvalidResourceVersion,
    UnsupportedDeploymentMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(type_: ConditionType, status: ConditionStatus, reason: Reason, message: impl Into<String>) -> Self {
        Self { type_, status, reason, message: message.into(), last_transition_time: Utc::now() }
    }

    pub fn truthy(type_: ConditionType, reason: Reason) -> Self {
        Self::new(type_, ConditionStatus::True, reason, "")
    }

    pub fn falsy(type_: ConditionType, reason: Reason, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::False, reason, message)
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Replace `existing` wholesale with `desired`, keeping the previous
/// `last_transition_time` for every (type, status) pair that did not change.
pub fn merge(existing: &[Condition], desired: Vec<Condition>) -> Vec<Condition> {
    desired
        .into_iter()
        .map(|mut c| {
            if let Some(prev) = existing.iter().find(|p| p.type_ == c.type_ && p.status == c.status) {
                c.last_transition_time = prev.last_transition_time;
            }
            c
        })
        .collect()
}

pub fn find(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}
