//! Quick action requests, records and roles

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Named operation against the spaced-repetition subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    /// Start a focused review session for a student
    StartSession,
    /// Nudge a student to practice
    SendReminder,
    /// Change a student's new-card load
    AdjustLoad,
    /// Raise an alert to the student's teacher
    CreateAlert,
}

impl ActionType {
    pub const ALL: [ActionType; 4] = [
        Self::StartSession,
        Self::SendReminder,
        Self::AdjustLoad,
        Self::CreateAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartSession => "startSession",
            Self::SendReminder => "sendReminder",
            Self::AdjustLoad => "adjustLoad",
            Self::CreateAlert => "createAlert",
        }
    }

    /// Whether success changes the target's learning data
    pub fn changes_metrics(&self) -> bool {
        matches!(self, Self::StartSession | Self::AdjustLoad)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::InvalidConfiguration(format!("unknown action type: {s}")))
    }
}

/// Role of an authenticated principal
///
/// Ordered by privilege: `Student < Teacher < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "teacher" => Ok(Self::Teacher),
            "admin" => Ok(Self::Admin),
            _ => Err(CoreError::InvalidConfiguration(format!("unknown role: {s}"))),
        }
    }
}

/// Lifecycle state of a quick action record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Succeeded,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to run a quick action exactly once per idempotency key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickActionRequest {
    pub idempotency_key: String,
    pub action_type: ActionType,
    pub actor_role: Role,
    pub actor_id: String,
    pub target_entity_id: String,
    #[serde(default)]
    pub payload: Value,
}

impl QuickActionRequest {
    pub fn new(
        idempotency_key: impl Into<String>,
        action_type: ActionType,
        actor_role: Role,
        actor_id: impl Into<String>,
        target_entity_id: impl Into<String>,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            action_type,
            actor_role,
            actor_id: actor_id.into(),
            target_entity_id: target_entity_id.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Durable outcome of a quick action, keyed by idempotency key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickActionRecord {
    pub idempotency_key: String,
    pub action_type: ActionType,
    pub target_entity_id: String,
    pub actor_id: String,
    pub actor_role: Role,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl QuickActionRecord {
    /// Fresh PENDING record for a request
    pub fn pending(request: &QuickActionRequest, now: DateTime<Utc>) -> Self {
        Self {
            idempotency_key: request.idempotency_key.clone(),
            action_type: request.action_type,
            target_entity_id: request.target_entity_id.clone(),
            actor_id: request.actor_id.clone(),
            actor_role: request.actor_role,
            status: ActionStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            executed_at: None,
        }
    }

    pub fn succeed(mut self, result: Value, now: DateTime<Utc>) -> Self {
        self.status = ActionStatus::Succeeded;
        self.result = Some(result);
        self.error = None;
        self.executed_at = Some(now);
        self
    }

    pub fn fail(mut self, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        self.status = ActionStatus::Failed;
        self.result = None;
        self.error = Some(error.into());
        self.executed_at = Some(now);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `request` asks for the same thing this record was created for
    pub fn matches(&self, request: &QuickActionRequest) -> bool {
        self.action_type == request.action_type
            && self.target_entity_id == request.target_entity_id
    }

    /// Short description used in reuse errors
    pub fn describe(&self) -> String {
        format!("{} on {}", self.action_type, self.target_entity_id)
    }
}
