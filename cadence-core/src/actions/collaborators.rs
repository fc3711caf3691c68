//! External systems that quick actions act upon
//!
//! The dispatcher only sees these traits. [`MemoryCollaborators`] implements
//! all four in memory for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::command::{AdjustLoad, CreateAlert, SendReminder, StartSession};
use super::types::ActionType;
use crate::error::CollaboratorError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    pub session_id: String,
    pub cards: u32,
    pub session_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSent {
    pub reminder_id: String,
    pub users_notified: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadAdjusted {
    pub delta: i32,
    pub duration_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCreated {
    pub alert_id: String,
}

#[async_trait]
pub trait ReviewSessions: Send + Sync {
    async fn start_session(&self, command: &StartSession)
    -> Result<SessionStarted, CollaboratorError>;
}

#[async_trait]
pub trait Reminders: Send + Sync {
    async fn send_reminder(&self, command: &SendReminder)
    -> Result<ReminderSent, CollaboratorError>;
}

#[async_trait]
pub trait ReviewLoad: Send + Sync {
    async fn adjust_load(&self, command: &AdjustLoad) -> Result<LoadAdjusted, CollaboratorError>;
}

#[async_trait]
pub trait TeacherAlerts: Send + Sync {
    async fn create_alert(&self, command: &CreateAlert)
    -> Result<AlertCreated, CollaboratorError>;
}

/// The set of collaborators a dispatcher executes against
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn ReviewSessions>,
    pub reminders: Arc<dyn Reminders>,
    pub load: Arc<dyn ReviewLoad>,
    pub alerts: Arc<dyn TeacherAlerts>,
}

impl Collaborators {
    /// Use one value for all four roles
    pub fn shared<T>(all: Arc<T>) -> Self
    where
        T: ReviewSessions + Reminders + ReviewLoad + TeacherAlerts + 'static,
    {
        Self {
            sessions: all.clone(),
            reminders: all.clone(),
            load: all.clone(),
            alerts: all,
        }
    }
}

/// In-memory collaborators with call counters and fault injection
#[derive(Default)]
pub struct MemoryCollaborators {
    calls: Mutex<HashMap<ActionType, usize>>,
    failures: Mutex<HashMap<ActionType, CollaboratorError>>,
    delay_ms: AtomicU64,
    sessions_started: AtomicUsize,
}

impl MemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `action` reached this collaborator
    pub fn calls(&self, action: ActionType) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&action).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    /// Make every call for `action` fail with `error`
    pub fn fail(&self, action: ActionType, error: CollaboratorError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(action, error);
        }
    }

    /// Delay every call before answering
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn sessions_started(&self) -> usize {
        self.sessions_started.load(Ordering::SeqCst)
    }

    async fn record_call(&self, action: ActionType) -> Result<(), CollaboratorError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(action).or_insert(0) += 1;
        }
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let failure = self
            .failures
            .lock()
            .ok()
            .and_then(|failures| failures.get(&action).cloned());
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReviewSessions for MemoryCollaborators {
    async fn start_session(
        &self,
        command: &StartSession,
    ) -> Result<SessionStarted, CollaboratorError> {
        self.record_call(ActionType::StartSession).await?;
        self.sessions_started.fetch_add(1, Ordering::SeqCst);
        let session_id = Uuid::new_v4().to_string();
        Ok(SessionStarted {
            session_url: format!("/student/flashcards/review?session={session_id}"),
            session_id,
            cards: command.card_limit,
        })
    }
}

#[async_trait]
impl Reminders for MemoryCollaborators {
    async fn send_reminder(
        &self,
        _command: &SendReminder,
    ) -> Result<ReminderSent, CollaboratorError> {
        self.record_call(ActionType::SendReminder).await?;
        Ok(ReminderSent {
            reminder_id: Uuid::new_v4().to_string(),
            users_notified: 1,
        })
    }
}

#[async_trait]
impl ReviewLoad for MemoryCollaborators {
    async fn adjust_load(&self, command: &AdjustLoad) -> Result<LoadAdjusted, CollaboratorError> {
        self.record_call(ActionType::AdjustLoad).await?;
        Ok(LoadAdjusted {
            delta: command.delta,
            duration_days: command.duration_days,
        })
    }
}

#[async_trait]
impl TeacherAlerts for MemoryCollaborators {
    async fn create_alert(
        &self,
        _command: &CreateAlert,
    ) -> Result<AlertCreated, CollaboratorError> {
        self.record_call(ActionType::CreateAlert).await?;
        Ok(AlertCreated {
            alert_id: Uuid::new_v4().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::command::{CardFilter, Priority};

    fn session() -> StartSession {
        StartSession {
            student_id: "s1".to_string(),
            card_limit: 25,
            target_filter: CardFilter::Due,
            session_minutes: 15,
            priority: Priority::Medium,
        }
    }

    #[tokio::test]
    async fn counts_calls_per_action() {
        let collaborators = MemoryCollaborators::new();
        let started = collaborators.start_session(&session()).await.unwrap();
        assert_eq!(started.cards, 25);
        assert!(started.session_url.contains(&started.session_id));

        assert_eq!(collaborators.calls(ActionType::StartSession), 1);
        assert_eq!(collaborators.calls(ActionType::SendReminder), 0);
        assert_eq!(collaborators.sessions_started(), 1);
    }

    #[tokio::test]
    async fn injected_failure_is_returned() {
        let collaborators = MemoryCollaborators::new();
        collaborators.fail(
            ActionType::StartSession,
            CollaboratorError::Unavailable("srs down".to_string()),
        );

        let result = collaborators.start_session(&session()).await;
        assert_eq!(
            result,
            Err(CollaboratorError::Unavailable("srs down".to_string()))
        );
        assert_eq!(collaborators.total_calls(), 1);
        assert_eq!(collaborators.sessions_started(), 0);
    }

    #[tokio::test]
    async fn shared_bundle_routes_to_one_value() {
        let memory = Arc::new(MemoryCollaborators::new());
        let bundle = Collaborators::shared(memory.clone());
        bundle.sessions.start_session(&session()).await.unwrap();
        assert_eq!(memory.calls(ActionType::StartSession), 1);
    }
}
