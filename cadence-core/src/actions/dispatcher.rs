//! Idempotent quick action dispatcher
//!
//! A request goes through the access policy, then payload validation, then
//! claims its idempotency key. The first claimant hands the key to a spawned
//! task before its first await; that task persists the PENDING record and
//! runs the body, so the caller going away cannot strand the key. Everyone
//! else waits on the same outcome. Once a record is terminal it is returned
//! verbatim forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::collaborators::Collaborators;
use super::command::ActionCommand;
use super::rbac::AccessPolicy;
use super::records::{RecordLog, latest_per_key};
use super::types::{ActionStatus, QuickActionRecord, QuickActionRequest};
use crate::cache::{KeyPrefix, MetricCache};
use crate::clock::Clock;
use crate::config::ActionConfig;
use crate::error::{CollaboratorError, CoreError, Result};
use crate::types::EntityRef;

/// Error recorded for actions a restart cut short
pub const INTERRUPTED_ERROR: &str = "interrupted before completion";

/// Error recorded for action bodies that panicked
pub const PANICKED_ERROR: &str = "action panicked";

/// How long a caller waits for a PENDING record to settle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Wait up to `timeout`, then return the record as it stands
    Block { timeout: Duration },
    /// Return immediately, PENDING or not
    ReturnPending,
}

enum Slot {
    Pending {
        record: QuickActionRecord,
        progress: watch::Receiver<Progress>,
    },
    Done(QuickActionRecord),
}

impl Slot {
    fn record(&self) -> &QuickActionRecord {
        match self {
            Self::Pending { record, .. } => record,
            Self::Done(record) => record,
        }
    }
}

/// What waiters on a claimed key observe
#[derive(Debug, Clone)]
enum Progress {
    Running(QuickActionRecord),
    Settled(QuickActionRecord),
    /// The key was given up before the action ran
    Released(String),
}

impl Progress {
    fn is_final(&self) -> bool {
        !matches!(self, Self::Running(_))
    }

    fn into_result(self) -> Result<QuickActionRecord> {
        match self {
            Self::Running(record) | Self::Settled(record) => Ok(record),
            Self::Released(reason) => Err(CoreError::RecordStore(reason)),
        }
    }
}

enum Claim {
    Done(QuickActionRecord),
    Waiting(watch::Receiver<Progress>),
    Winner {
        settle: Settle,
        rx: watch::Receiver<Progress>,
    },
}

/// Exclusive right to finish a claimed key
///
/// Whatever ends the owning task, the key leaves PENDING: an unpersisted
/// claim is released, a persisted one is failed as interrupted, matching
/// what a restart would make of the PENDING line.
struct Settle {
    inner: Arc<Inner>,
    pending: QuickActionRecord,
    tx: watch::Sender<Progress>,
    persisted: bool,
    finished: bool,
}

impl Settle {
    fn key(&self) -> &str {
        &self.pending.idempotency_key
    }

    fn complete(mut self, record: QuickActionRecord) {
        self.finished = true;
        self.inner
            .lock_table()
            .insert(record.idempotency_key.clone(), Slot::Done(record.clone()));
        self.tx.send_replace(Progress::Settled(record));
    }

    fn release(mut self, reason: String) {
        self.finished = true;
        self.inner.lock_table().remove(self.key());
        self.tx.send_replace(Progress::Released(reason));
    }
}

impl Drop for Settle {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let key = self.pending.idempotency_key.clone();
        if self.persisted {
            warn!(%key, "Quick action task ended without an outcome");
            let failed = self
                .pending
                .clone()
                .fail(INTERRUPTED_ERROR, self.inner.clock.now());
            self.inner
                .lock_table()
                .insert(key, Slot::Done(failed.clone()));
            self.tx.send_replace(Progress::Settled(failed));
        } else {
            warn!(%key, "Quick action dropped before it was recorded");
            self.inner.lock_table().remove(&key);
            self.tx.send_replace(Progress::Released(format!(
                "quick action '{key}' was released before it ran"
            )));
        }
    }
}

struct Inner {
    policy: AccessPolicy,
    collaborators: Collaborators,
    log: Arc<dyn RecordLog>,
    table: Mutex<HashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
    cache: Option<Arc<MetricCache>>,
    action_timeout: Duration,
    wait_timeout: Duration,
}

/// Runs quick actions at most once per idempotency key
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Load persisted records and resolve interrupted ones
    ///
    /// Any record still PENDING in the log belonged to a process that died
    /// mid-action. It becomes FAILED and is never re-run.
    pub async fn open(
        config: &ActionConfig,
        collaborators: Collaborators,
        log: Arc<dyn RecordLog>,
        clock: Arc<dyn Clock>,
        cache: Option<Arc<MetricCache>>,
    ) -> Result<Self> {
        let records = latest_per_key(log.load().await?);
        let now = clock.now();
        let mut table = HashMap::with_capacity(records.len());
        let mut interrupted = 0usize;

        for record in records {
            let record = if record.is_terminal() {
                record
            } else {
                warn!(
                    key = %record.idempotency_key,
                    action = %record.action_type,
                    "Resolving interrupted quick action as failed"
                );
                let failed = record.fail(INTERRUPTED_ERROR, now);
                log.append(&failed).await?;
                interrupted += 1;
                failed
            };
            table.insert(record.idempotency_key.clone(), Slot::Done(record));
        }
        info!(records = table.len(), interrupted, "Quick action records loaded");

        Ok(Self {
            inner: Arc::new(Inner {
                policy: AccessPolicy::with_overrides(&config.policy),
                collaborators,
                log,
                table: Mutex::new(table),
                clock,
                cache,
                action_timeout: config.action_timeout(),
                wait_timeout: config.wait_timeout(),
            }),
        })
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.inner.policy
    }

    /// Dispatch and block up to the configured wait timeout
    pub async fn dispatch(&self, request: QuickActionRequest) -> Result<QuickActionRecord> {
        let timeout = self.inner.wait_timeout;
        self.dispatch_with(request, WaitMode::Block { timeout }).await
    }

    pub async fn dispatch_with(
        &self,
        request: QuickActionRequest,
        mode: WaitMode,
    ) -> Result<QuickActionRecord> {
        if let Err(denied) = self.inner.policy.authorize(&request) {
            info!(
                key = %request.idempotency_key,
                actor = %request.actor_id,
                role = %request.actor_role,
                action = %request.action_type,
                "Quick action denied"
            );
            return Err(denied);
        }
        let command = ActionCommand::parse(&request)?;
        let key = request.idempotency_key.clone();

        match self.claim(&request)? {
            Claim::Done(record) => {
                debug!(%key, status = %record.status, "Returning stored quick action record");
                Ok(record)
            }
            Claim::Waiting(rx) => self.wait(&key, rx, mode).await,
            Claim::Winner { settle, rx } => {
                // No await between claim and spawn
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.execute(command, settle).await });
                self.wait(&key, rx, mode).await
            }
        }
    }

    fn claim(&self, request: &QuickActionRequest) -> Result<Claim> {
        let mut table = self.inner.lock_table();
        if let Some(slot) = table.get(&request.idempotency_key) {
            let existing = slot.record();
            if !existing.matches(request) {
                return Err(CoreError::IdempotencyKeyReused {
                    key: request.idempotency_key.clone(),
                    existing: existing.describe(),
                });
            }
            return Ok(match slot {
                Slot::Done(record) => Claim::Done(record.clone()),
                Slot::Pending { progress, .. } => Claim::Waiting(progress.clone()),
            });
        }

        let record = QuickActionRecord::pending(request, self.inner.clock.now());
        let (tx, rx) = watch::channel(Progress::Running(record.clone()));
        table.insert(
            request.idempotency_key.clone(),
            Slot::Pending {
                record: record.clone(),
                progress: rx.clone(),
            },
        );
        let settle = Settle {
            inner: self.inner.clone(),
            pending: record,
            tx,
            persisted: false,
            finished: false,
        };
        Ok(Claim::Winner { settle, rx })
    }

    async fn wait(
        &self,
        key: &str,
        mut rx: watch::Receiver<Progress>,
        mode: WaitMode,
    ) -> Result<QuickActionRecord> {
        if let WaitMode::Block { timeout } = mode {
            match tokio::time::timeout(timeout, rx.wait_for(Progress::is_final)).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => {
                    return Err(CoreError::RecordStore(format!(
                        "quick action '{key}' lost its owner before settling"
                    )));
                }
                Err(_) => debug!(%key, "Wait timed out, returning pending record"),
            }
        }
        let progress = rx.borrow().clone();
        progress.into_result()
    }

    /// Current record for a key, if any
    pub fn record(&self, key: &str) -> Option<QuickActionRecord> {
        self.inner
            .lock_table()
            .get(key)
            .map(|slot| slot.record().clone())
    }

    /// Every known record, oldest first
    pub fn records(&self) -> Vec<QuickActionRecord> {
        let mut records: Vec<_> = self
            .inner
            .lock_table()
            .values()
            .map(|slot| slot.record().clone())
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.idempotency_key.cmp(&b.idempotency_key))
        });
        records
    }

    /// Number of actions still running
    pub fn in_flight(&self) -> usize {
        self.inner
            .lock_table()
            .values()
            .filter(|slot| matches!(slot, Slot::Pending { .. }))
            .count()
    }

    pub async fn flush(&self) -> Result<()> {
        self.inner.log.flush().await
    }
}

impl Inner {
    fn lock_table(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn execute(self: Arc<Self>, command: ActionCommand, mut settle: Settle) {
        let pending = settle.pending.clone();
        let key = pending.idempotency_key.clone();

        if let Err(e) = self.log.append(&pending).await {
            error!(%key, error = %e, "Failed to persist pending quick action");
            settle.release(format!("quick action '{key}' was not recorded: {e}"));
            return;
        }
        settle.persisted = true;
        info!(
            %key,
            action = %pending.action_type,
            target = %pending.target_entity_id,
            "Quick action pending"
        );

        // The body runs as its own task so a panic surfaces as a JoinError
        let started = Instant::now();
        let mut body = {
            let inner = self.clone();
            tokio::spawn(async move { inner.run(&command).await })
        };
        let outcome = tokio::time::timeout(self.action_timeout, &mut body).await;
        let now = self.clock.now();
        let record = match outcome {
            Ok(Ok(Ok(result))) => pending.succeed(result, now),
            Ok(Ok(Err(e))) => pending.fail(e.to_string(), now),
            Ok(Err(join_error)) => {
                error!(%key, error = %join_error, "Quick action body did not complete");
                let reason = if join_error.is_panic() {
                    PANICKED_ERROR.to_string()
                } else {
                    join_error.to_string()
                };
                pending.fail(reason, now)
            }
            Err(_) => {
                body.abort();
                pending.fail(
                    format!("timed out after {}ms", self.action_timeout.as_millis()),
                    now,
                )
            }
        };

        if let Err(e) = self.log.append(&record).await {
            // The log keeps the PENDING line, which resolves to FAILED on the
            // next start. This process still serves the real outcome.
            error!(%key, error = %e, "Failed to persist quick action outcome");
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match record.status {
            ActionStatus::Succeeded => info!(
                %key,
                action = %record.action_type,
                elapsed_ms,
                "Quick action succeeded"
            ),
            _ => warn!(
                %key,
                action = %record.action_type,
                elapsed_ms,
                error = record.error.as_deref().unwrap_or_default(),
                "Quick action failed"
            ),
        }

        if record.status == ActionStatus::Succeeded
            && record.action_type.changes_metrics()
            && let Some(cache) = &self.cache
        {
            let prefix = KeyPrefix::entity(&EntityRef::student(&record.target_entity_id));
            cache.invalidate(&prefix);
        }

        settle.complete(record);
    }

    async fn run(&self, command: &ActionCommand) -> std::result::Result<Value, CollaboratorError> {
        let collaborators = &self.collaborators;
        match command {
            ActionCommand::StartSession(c) => to_json(collaborators.sessions.start_session(c).await?),
            ActionCommand::SendReminder(c) => to_json(collaborators.reminders.send_reminder(c).await?),
            ActionCommand::AdjustLoad(c) => to_json(collaborators.load.adjust_load(c).await?),
            ActionCommand::CreateAlert(c) => to_json(collaborators.alerts.create_alert(c).await?),
        }
    }
}

fn to_json<T: serde::Serialize>(value: T) -> std::result::Result<Value, CollaboratorError> {
    serde_json::to_value(value)
        .map_err(|e| CollaboratorError::Rejected(format!("unserializable result: {e}")))
}
