//! Quick actions: authorized, idempotent operations against the
//! spaced-repetition subsystem

mod collaborators;
mod command;
mod dispatcher;
mod rbac;
mod records;
mod types;

pub use collaborators::{
    AlertCreated, Collaborators, LoadAdjusted, MemoryCollaborators, ReminderSent, Reminders,
    ReviewLoad, ReviewSessions, SessionStarted, TeacherAlerts,
};
pub use command::{
    ActionCommand, AdjustLoad, AlertKind, CardFilter, CreateAlert, DEFAULT_CARD_LIMIT,
    DEFAULT_REMINDER_MESSAGE, DEFAULT_SESSION_MINUTES, Priority, SendReminder, StartSession,
};
pub use dispatcher::{Dispatcher, INTERRUPTED_ERROR, PANICKED_ERROR, WaitMode};
pub use rbac::AccessPolicy;
pub use records::{JsonlRecordLog, MemoryRecordLog, RecordLog, latest_per_key};
pub use types::{ActionStatus, ActionType, QuickActionRecord, QuickActionRequest, Role};
