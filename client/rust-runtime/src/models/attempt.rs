use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::content::QuestionType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }
}

/// One question/answer interaction. Never mutated after it is logged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseRecord {
    pub attempt_id: String,
    pub question_id: String,
    pub question_type: QuestionType,
    pub level_index: usize,
    pub answer: Option<String>,
    pub is_correct: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Resumable state of one learner's run through a lesson.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptState {
    pub id: String,
    pub lesson_id: String,
    pub student_id: String,
    /// 1-based; drives rotation set selection.
    pub attempt_number: u32,
    pub status: AttemptStatus,
    pub current_level: usize,
    pub question_index: usize,
    /// Served order of question ids for the current level.
    #[serde(default)]
    pub question_order: Vec<String>,
    pub mistake_count: u32,
    pub questions_attempted: u32,
    pub questions_correct: u32,
    pub levels_completed: u32,
    #[serde(default)]
    pub responses: Vec<ResponseRecord>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttemptState {
    pub fn new(id: String, lesson_id: String, student_id: String, attempt_number: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            lesson_id,
            student_id,
            attempt_number: attempt_number.max(1),
            status: AttemptStatus::InProgress,
            current_level: 0,
            question_index: 0,
            question_order: Vec::new(),
            mistake_count: 0,
            questions_attempted: 0,
            questions_correct: 0,
            levels_completed: 0,
            responses: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.questions_attempted == 0 {
            0.0
        } else {
            self.questions_correct as f64 / self.questions_attempted as f64
        }
    }
}
