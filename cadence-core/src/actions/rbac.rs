//! Role-based access control for quick actions
//!
//! One declarative table maps each action to the least privileged role that
//! may run it. It is consulted once, before any record is touched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{ActionType, QuickActionRequest, Role};
use crate::error::{CoreError, Result};

/// Minimum role required per action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    minimum: BTreeMap<ActionType, Role>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            minimum: BTreeMap::from([
                (ActionType::StartSession, Role::Student),
                (ActionType::SendReminder, Role::Teacher),
                (ActionType::AdjustLoad, Role::Teacher),
                (ActionType::CreateAlert, Role::Teacher),
            ]),
        }
    }
}

impl AccessPolicy {
    /// Defaults with per-action overrides applied
    pub fn with_overrides(overrides: &BTreeMap<ActionType, Role>) -> Self {
        let mut policy = Self::default();
        policy
            .minimum
            .extend(overrides.iter().map(|(action, role)| (*action, *role)));
        policy
    }

    /// Least privileged role allowed to run `action`
    pub fn minimum_role(&self, action: ActionType) -> Role {
        // Actions missing from the table are admin-only
        self.minimum.get(&action).copied().unwrap_or(Role::Admin)
    }

    pub fn allows(&self, role: Role, action: ActionType) -> bool {
        role >= self.minimum_role(action)
    }

    /// Check a request against the table and the self-targeting rule
    pub fn authorize(&self, request: &QuickActionRequest) -> Result<()> {
        let action = request.action_type;
        let actor = request.actor_role;
        let required = self.minimum_role(action);
        if actor < required {
            return Err(CoreError::AuthorizationDenied {
                actor,
                action,
                reason: format!("requires {required} or above"),
            });
        }
        if actor == Role::Student && request.target_entity_id != request.actor_id {
            return Err(CoreError::AuthorizationDenied {
                actor,
                action,
                reason: "students may only act on themselves".to_string(),
            });
        }
        Ok(())
    }

    /// Rows of the table in action order
    pub fn entries(&self) -> impl Iterator<Item = (ActionType, Role)> + '_ {
        ActionType::ALL
            .into_iter()
            .map(|action| (action, self.minimum_role(action)))
    }
}
