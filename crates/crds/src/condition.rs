//! Status conditions.
//!
//! Conditions are keyed by type. Two conditions are equal when type, status,
//! reason and message all match; writers compare before persisting so that an
//! unchanged condition never produces a write.
//!
//! Conditions are shared with other controllers, so fields this crate does not
//! model (`lastTransitionTime`, `severity`, ...) and status strings outside the
//! usual three are carried through a decode and re-encode unchanged.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Condition status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "String", into = "String")]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
    /// Any other value written by another controller
    Other(String),
}

impl From<String> for ConditionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "True" => Self::True,
            "False" => Self::False,
            "Unknown" => Self::Unknown,
            _ => Self::Other(value),
        }
    }
}

impl From<ConditionStatus> for String {
    fn from(status: ConditionStatus) -> Self {
        match status {
            ConditionStatus::True => "True".to_string(),
            ConditionStatus::False => "False".to_string(),
            ConditionStatus::Unknown => "Unknown".to_string(),
            ConditionStatus::Other(value) => value,
        }
    }
}

/// A single named condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, unique within a resource
    #[serde(rename = "type")]
    pub type_: String,

    /// Condition status
    #[schemars(with = "String")]
    pub status: ConditionStatus,

    /// Machine readable reason, empty when the condition holds
    #[serde(default)]
    pub reason: String,

    /// Human readable message, empty when the condition holds
    #[serde(default)]
    pub message: String,

    /// Fields owned by other writers
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

impl Eq for Condition {}

impl Condition {
    /// Creates a condition from its four fields
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            extra: Map::new(),
        }
    }

    /// Condition reporting success: status True, empty reason and message
    pub fn ok(type_: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::True, "", "")
    }

    /// Condition reporting a failure: status False, reason `Error`
    pub fn error(type_: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::False, "Error", message)
    }

    /// True when status is `False`
    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }
}

/// Finds the first condition of the given type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Replaces every condition of the same type in place, or appends when none
/// exists. Conditions of other types are left untouched.
pub fn upsert_condition(conditions: &mut Vec<Condition>, desired: Condition) {
    let mut found = false;
    for existing in conditions.iter_mut().filter(|c| c.type_ == desired.type_) {
        *existing = desired.clone();
        found = true;
    }
    if !found {
        conditions.push(desired);
    }
}
