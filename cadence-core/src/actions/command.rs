//! Typed quick action commands parsed from request payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ActionType, QuickActionRequest};
use crate::error::{CoreError, Result};

pub const DEFAULT_CARD_LIMIT: u32 = 25;
pub const DEFAULT_SESSION_MINUTES: u32 = 15;
pub const DEFAULT_LOAD_DAYS: u32 = 7;
pub const DEFAULT_REMINDER_MESSAGE: &str = "Time for your daily flashcard practice!";
pub const DEFAULT_REMINDER_URL: &str = "/student/flashcards";
pub const DEFAULT_ALERT_MESSAGE: &str = "Some students in your class need SRS intervention";

const MAX_CARD_LIMIT: u32 = 200;
const MAX_SESSION_MINUTES: u32 = 120;
const MAX_LOAD_DAYS: u32 = 90;

/// Urgency attached to sessions, reminders and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Which cards a review session draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardFilter {
    Overdue,
    #[default]
    Due,
    New,
    Learning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    #[default]
    Overload,
    Inactive,
    CriticalBacklog,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSession {
    pub student_id: String,
    pub card_limit: u32,
    pub target_filter: CardFilter,
    pub session_minutes: u32,
    pub priority: Priority,
}

/// Reminder for exactly one student
///
/// There is no class or school fan-out; a class-wide reminder is one request
/// per student, each under its own idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReminder {
    pub student_id: String,
    pub message: String,
    pub priority: Priority,
    pub action_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustLoad {
    pub student_id: String,
    /// Percentage change of the daily new-card allowance, e.g. -50
    pub delta: i32,
    pub duration_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlert {
    pub student_id: String,
    pub alert_kind: AlertKind,
    pub message: String,
    pub priority: Priority,
}

/// Validated body of a quick action
#[derive(Debug, Clone, PartialEq)]
pub enum ActionCommand {
    StartSession(StartSession),
    SendReminder(SendReminder),
    AdjustLoad(AdjustLoad),
    CreateAlert(CreateAlert),
}

// Wire shapes of the payloads. Every field is optional except `delta`.

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct StartSessionPayload {
    card_limit: Option<u32>,
    target_filter: Option<CardFilter>,
    session_duration: Option<u32>,
    priority: Option<Priority>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct SendReminderPayload {
    reminder_message: Option<String>,
    priority: Option<Priority>,
    action_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct AdjustLoadPayload {
    delta: Option<i32>,
    duration_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct CreateAlertPayload {
    alert_type: Option<AlertKind>,
    message: Option<String>,
    priority: Option<Priority>,
}

fn invalid(action: ActionType, message: impl std::fmt::Display) -> CoreError {
    CoreError::InvalidConfiguration(format!("invalid {action} payload: {message}"))
}

fn decode<T>(action: ActionType, payload: &Value) -> Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match payload {
        Value::Null => Ok(T::default()),
        Value::Object(_) => {
            serde_json::from_value(payload.clone()).map_err(|e| invalid(action, e))
        }
        other => Err(invalid(action, format!("expected an object, got {other}"))),
    }
}

fn in_range(action: ActionType, name: &str, value: u32, max: u32) -> Result<u32> {
    if value == 0 || value > max {
        return Err(invalid(
            action,
            format!("{name} must be between 1 and {max}, got {value}"),
        ));
    }
    Ok(value)
}

fn non_empty(action: ActionType, name: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(invalid(action, format!("{name} must not be empty")));
    }
    Ok(value)
}

impl ActionCommand {
    /// Validate a request's payload, filling in defaults
    pub fn parse(request: &QuickActionRequest) -> Result<Self> {
        let action = request.action_type;
        let student_id = request.target_entity_id.trim();
        if student_id.is_empty() {
            return Err(invalid(action, "target entity id must not be empty"));
        }
        let student_id = student_id.to_string();

        match action {
            ActionType::StartSession => {
                let p: StartSessionPayload = decode(action, &request.payload)?;
                Ok(Self::StartSession(StartSession {
                    student_id,
                    card_limit: in_range(
                        action,
                        "cardLimit",
                        p.card_limit.unwrap_or(DEFAULT_CARD_LIMIT),
                        MAX_CARD_LIMIT,
                    )?,
                    target_filter: p.target_filter.unwrap_or_default(),
                    session_minutes: in_range(
                        action,
                        "sessionDuration",
                        p.session_duration.unwrap_or(DEFAULT_SESSION_MINUTES),
                        MAX_SESSION_MINUTES,
                    )?,
                    priority: p.priority.unwrap_or_default(),
                }))
            }
            ActionType::SendReminder => {
                let p: SendReminderPayload = decode(action, &request.payload)?;
                Ok(Self::SendReminder(SendReminder {
                    student_id,
                    message: non_empty(
                        action,
                        "reminderMessage",
                        p.reminder_message
                            .unwrap_or_else(|| DEFAULT_REMINDER_MESSAGE.to_string()),
                    )?,
                    priority: p.priority.unwrap_or_default(),
                    action_url: p
                        .action_url
                        .unwrap_or_else(|| DEFAULT_REMINDER_URL.to_string()),
                }))
            }
            ActionType::AdjustLoad => {
                let p: AdjustLoadPayload = decode(action, &request.payload)?;
                let delta = p.delta.ok_or_else(|| invalid(action, "delta is required"))?;
                if delta == 0 || !(-100..=100).contains(&delta) {
                    return Err(invalid(
                        action,
                        format!("delta must be a non-zero percentage in [-100, 100], got {delta}"),
                    ));
                }
                Ok(Self::AdjustLoad(AdjustLoad {
                    student_id,
                    delta,
                    duration_days: in_range(
                        action,
                        "durationDays",
                        p.duration_days.unwrap_or(DEFAULT_LOAD_DAYS),
                        MAX_LOAD_DAYS,
                    )?,
                }))
            }
            ActionType::CreateAlert => {
                let p: CreateAlertPayload = decode(action, &request.payload)?;
                Ok(Self::CreateAlert(CreateAlert {
                    student_id,
                    alert_kind: p.alert_type.unwrap_or_default(),
                    message: non_empty(
                        action,
                        "message",
                        p.message
                            .unwrap_or_else(|| DEFAULT_ALERT_MESSAGE.to_string()),
                    )?,
                    priority: p.priority.unwrap_or_default(),
                }))
            }
        }
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            Self::StartSession(_) => ActionType::StartSession,
            Self::SendReminder(_) => ActionType::SendReminder,
            Self::AdjustLoad(_) => ActionType::AdjustLoad,
            Self::CreateAlert(_) => ActionType::CreateAlert,
        }
    }
}
