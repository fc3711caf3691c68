//! Durable quick action record log
//!
//! Records are appended as one JSON object per line. A key's latest line
//! wins on load, so a PENDING line followed by a SUCCEEDED line for the same
//! key loads as SUCCEEDED.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::error;

use super::types::QuickActionRecord;
use crate::error::{CoreError, Result};

/// Append-only storage for quick action records
#[async_trait]
pub trait RecordLog: Send + Sync {
    /// Every record ever appended, in append order
    async fn load(&self) -> Result<Vec<QuickActionRecord>>;

    async fn append(&self, record: &QuickActionRecord) -> Result<()>;

    async fn flush(&self) -> Result<()>;
}

/// Collapse appended records to the latest one per key, keeping first-seen order
pub fn latest_per_key(records: Vec<QuickActionRecord>) -> Vec<QuickActionRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, QuickActionRecord> = HashMap::new();
    for record in records {
        if !latest.contains_key(&record.idempotency_key) {
            order.push(record.idempotency_key.clone());
        }
        latest.insert(record.idempotency_key.clone(), record);
    }
    order
        .into_iter()
        .filter_map(|key| latest.remove(&key))
        .collect()
}

/// JSONL file-backed record log
pub struct JsonlRecordLog {
    path: PathBuf,
}

impl JsonlRecordLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CoreError::RecordStore(format!("failed to create record dir: {}", e))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordLog for JsonlRecordLog {
    async fn load(&self) -> Result<Vec<QuickActionRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .map_err(|e| CoreError::RecordStore(format!("failed to open record log: {}", e)))?;
        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        let mut line_no = 0usize;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| CoreError::RecordStore(format!("failed to read record log: {}", e)))?
        {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| {
                error!(path = %self.path.display(), line = line_no, "Corrupt record log line");
                CoreError::IntegrityViolation(format!(
                    "{}:{}: unparseable record: {}",
                    self.path.display(),
                    line_no,
                    e
                ))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    async fn append(&self, record: &QuickActionRecord) -> Result<()> {
        self.ensure_parent_dir().await?;

        let mut line = serde_json::to_string(record)
            .map_err(|e| CoreError::RecordStore(format!("failed to serialize record: {}", e)))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| CoreError::RecordStore(format!("failed to open record log: {}", e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| CoreError::RecordStore(format!("failed to write record: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| CoreError::RecordStore(format!("failed to flush record log: {}", e)))?;
        file.sync_data()
            .await
            .map_err(|e| CoreError::RecordStore(format!("failed to sync record log: {}", e)))?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        // Every append is synced before it returns
        Ok(())
    }
}

/// In-memory record log with write fault injection
#[derive(Default)]
pub struct MemoryRecordLog {
    records: Mutex<Vec<QuickActionRecord>>,
    fail_appends: AtomicBool,
}

impl MemoryRecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log pre-populated with records, as if written by an earlier process
    pub fn with_records(records: Vec<QuickActionRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            fail_appends: AtomicBool::new(false),
        }
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Vec<QuickActionRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordLog for MemoryRecordLog {
    async fn load(&self) -> Result<Vec<QuickActionRecord>> {
        Ok(self.snapshot())
    }

    async fn append(&self, record: &QuickActionRecord) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(CoreError::RecordStore(
                "memory record log rejecting writes".to_string(),
            ));
        }
        self.records
            .lock()
            .map_err(|_| CoreError::RecordStore("record log lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
