use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::{AttemptState, AttemptStatus, ResponseRecord};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SyncKind {
    Response,
    AttemptUpdate,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Response => "response",
            SyncKind::AttemptUpdate => "attempt-update",
        }
    }
}

/// Partial attempt state pushed to the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptUpdate {
    pub attempt_id: String,
    pub lesson_id: String,
    pub student_id: String,
    pub attempt_number: u32,
    pub status: AttemptStatus,
    pub current_level: usize,
    pub questions_attempted: u32,
    pub questions_correct: u32,
    pub levels_completed: u32,
    pub updated_at: DateTime<Utc>,
}

impl AttemptUpdate {
    pub fn from_state(state: &AttemptState) -> Self {
        Self {
            attempt_id: state.id.clone(),
            lesson_id: state.lesson_id.clone(),
            student_id: state.student_id.clone(),
            attempt_number: state.attempt_number,
            status: state.status,
            current_level: state.current_level,
            questions_attempted: state.questions_attempted,
            questions_correct: state.questions_correct,
            levels_completed: state.levels_completed,
            updated_at: Utc::now(),
        }
    }
}

/// A mutation waiting to be enqueued.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPayload {
    Response(ResponseRecord),
    AttemptUpdate(AttemptUpdate),
}

impl SyncPayload {
    pub fn kind(&self) -> SyncKind {
        match self {
            SyncPayload::Response(_) => SyncKind::Response,
            SyncPayload::AttemptUpdate(_) => SyncKind::AttemptUpdate,
        }
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            SyncPayload::Response(record) => serde_json::to_value(record),
            SyncPayload::AttemptUpdate(update) => serde_json::to_value(update),
        }
    }
}

/// Outbox entry; owned by the sync queue until the remote side acknowledges it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedSyncItem {
    pub id: String,
    pub kind: SyncKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
