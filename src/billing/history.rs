//! # Prediction History
//!
//! Append-only log of prediction attempts, queryable per user with
//! newest-first pagination. Records are never mutated once written; the saga
//! appends exactly one record per settled attempt.

use crate::billing::ledger::Credits;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Terminal (or, transiently, pending) state of one prediction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Pending,
    Success,
    Failed,
}

/// What was uploaded, without the payload itself.
#[derive(Debug, Clone, Serialize)]
pub struct InputMetadata {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: usize,
}

/// One prediction attempt as recorded for the user.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub model_name: String,
    pub input_metadata: InputMetadata,
    pub output_text: Option<String>,
    pub status: PredictionStatus,
    pub cost_charged: Credits,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// In-memory append-only store, one chronological vector per user.
pub struct PredictionHistoryStore {
    records: RwLock<HashMap<Uuid, Vec<PredictionRecord>>>,
}

impl PredictionHistoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Append one record. There is no update or delete.
    pub fn append(&self, record: PredictionRecord) -> Result<(), HistoryError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        records.entry(record.user_id).or_default().push(record);
        Ok(())
    }

    /// The user's records, newest first.
    pub fn list_by_user(&self, user_id: Uuid, limit: usize, offset: usize) -> Vec<PredictionRecord> {
        let records = self.records.read().unwrap();
        match records.get(&user_id) {
            Some(user_records) => user_records
                .iter()
                .rev()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Total number of records for a user.
    pub fn count_for_user(&self, user_id: Uuid) -> usize {
        self.records
            .read()
            .unwrap()
            .get(&user_id)
            .map_or(0, Vec::len)
    }
}

impl Default for PredictionHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}
