//! Lesson progression state machine.
//!
//! State is `(level, question_index, mistake_count)` plus the cumulative
//! counters and response log kept in [`AttemptState`]. All transitions are
//! synchronous; the engine is owned by exactly one session.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ContentError;
use crate::models::{AttemptState, LessonContent, Level, Question, ResponseRecord};

/// Mistakes within one level that force-stop it.
pub const MISTAKE_LIMIT: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    pub should_stop_level: bool,
    pub is_level_complete: bool,
    pub is_lesson_complete: bool,
    /// `None` when there was no question to answer.
    pub record: Option<ResponseRecord>,
}

/// Engine position taken before a mutation whose persistence may fail.
pub(crate) struct EngineCheckpoint {
    attempt: AttemptState,
    active: Vec<Question>,
}

pub struct LessonSessionEngine<R: Rng = StdRng> {
    content: Arc<LessonContent>,
    attempt: AttemptState,
    active: Vec<Question>,
    rng: R,
}

impl<R: Rng> LessonSessionEngine<R> {
    /// Starts serving `attempt` from its current level with a fresh shuffle.
    pub fn start(
        content: Arc<LessonContent>,
        attempt: AttemptState,
        rng: R,
    ) -> Result<Self, ContentError> {
        content.validate()?;
        let level_index = attempt.current_level;
        let mut engine = Self {
            content,
            attempt,
            active: Vec::new(),
            rng,
        };
        engine.initialize(level_index)?;

        tracing::info!(
            "Started attempt {} for lesson {} (attempt #{}, {} levels)",
            engine.attempt.id,
            engine.attempt.lesson_id,
            engine.attempt.attempt_number,
            engine.content.level_count()
        );
        Ok(engine)
    }

    /// Rebuilds an engine from persisted attempt state, re-serving the
    /// question at the stored `question_index` in the stored order.
    pub fn resume(
        content: Arc<LessonContent>,
        attempt: AttemptState,
        rng: R,
    ) -> Result<Self, ContentError> {
        content.validate()?;
        let level = content
            .levels
            .get(attempt.current_level)
            .ok_or(ContentError::LevelOutOfRange {
                level_index: attempt.current_level,
                level_count: content.level_count(),
            })?;

        let restored = restore_order(
            level.question_set(attempt.attempt_number),
            &attempt.question_order,
        )
        .filter(|order| attempt.question_index <= order.len());

        let level_index = attempt.current_level;
        let mut engine = Self {
            content,
            attempt,
            active: Vec::new(),
            rng,
        };

        match restored {
            Some(active) => {
                engine.active = active;
                tracing::info!(
                    "Resumed attempt {} at level {} question {}",
                    engine.attempt.id,
                    level_index,
                    engine.attempt.question_index
                );
            }
            None => {
                tracing::warn!(
                    "Stored question order for attempt {} no longer matches level {}, restarting level",
                    engine.attempt.id,
                    level_index
                );
                engine.initialize(level_index)?;
            }
        }

        Ok(engine)
    }

    /// Selects the level's question set by rotation, shuffles it, and resets
    /// the per-level position and mistake count.
    pub fn initialize(&mut self, level_index: usize) -> Result<(), ContentError> {
        let level = self
            .content
            .levels
            .get(level_index)
            .ok_or(ContentError::LevelOutOfRange {
                level_index,
                level_count: self.content.level_count(),
            })?;

        let set = level.question_set(self.attempt.attempt_number);
        if set.is_empty() {
            return Err(ContentError::EmptyQuestionSet { level_index });
        }

        self.active = set.to_vec();
        self.active.shuffle(&mut self.rng);

        self.attempt.current_level = level_index;
        self.attempt.question_index = 0;
        self.attempt.mistake_count = 0;
        self.attempt.question_order = self.active.iter().map(|q| q.id.clone()).collect();
        self.attempt.updated_at = Utc::now();

        tracing::debug!(
            "Initialized level {} with {} questions",
            level_index,
            self.active.len()
        );
        Ok(())
    }

    /// The question to render next; `None` once the level is exhausted or
    /// stopped by mistakes. Option lists are reshuffled on every call.
    pub fn current_question(&mut self) -> Option<Question> {
        if self.is_level_stopped() {
            return None;
        }
        let mut question = self.active.get(self.attempt.question_index)?.clone();
        if question.question_type.presents_options() {
            question.options.shuffle(&mut self.rng);
        }
        Some(question)
    }

    pub fn submit_answer(&mut self, answer: Option<&str>) -> AnswerOutcome {
        let level_index = self.attempt.current_level;
        let is_last_level = self.content.is_last_level(level_index);

        let current = if self.is_level_stopped() {
            None
        } else {
            self.active.get(self.attempt.question_index)
        };
        let Some(question) = current else {
            tracing::debug!("Answer submitted with no current question, ignoring");
            return AnswerOutcome {
                is_correct: false,
                should_stop_level: self.attempt.mistake_count >= MISTAKE_LIMIT,
                is_level_complete: true,
                is_lesson_complete: is_last_level,
                record: None,
            };
        };

        let is_correct = answer.is_some_and(|a| question.is_correct(a));
        let record = ResponseRecord {
            attempt_id: self.attempt.id.clone(),
            question_id: question.id.clone(),
            question_type: question.question_type,
            level_index,
            answer: answer.map(str::to_string),
            is_correct,
            submitted_at: Utc::now(),
        };

        self.attempt.responses.push(record.clone());
        self.attempt.questions_attempted += 1;
        if is_correct {
            self.attempt.questions_correct += 1;
        } else {
            self.attempt.mistake_count += 1;
        }
        self.attempt.question_index += 1;
        self.attempt.updated_at = record.submitted_at;

        let should_stop_level = self.attempt.mistake_count >= MISTAKE_LIMIT;
        let is_level_complete = self.is_level_exhausted() || should_stop_level;

        tracing::debug!(
            "Question {} answered (correct={}, mistakes={}, level_complete={})",
            record.question_id,
            is_correct,
            self.attempt.mistake_count,
            is_level_complete
        );

        AnswerOutcome {
            is_correct,
            should_stop_level,
            is_level_complete,
            is_lesson_complete: is_level_complete && is_last_level,
            record: Some(record),
        }
    }

    /// Advances to the next level. Returns `false` (state untouched) on the last level.
    pub fn move_to_next_level(&mut self) -> bool {
        let next = self.attempt.current_level + 1;
        if next >= self.content.level_count() {
            return false;
        }

        // Content was validated up front, so every level below the count is servable.
        if let Err(e) = self.initialize(next) {
            tracing::error!("Failed to initialize level {}: {}", next, e);
            return false;
        }
        self.attempt.levels_completed += 1;

        tracing::info!(
            "Attempt {} advanced to level {}",
            self.attempt.id,
            next
        );
        true
    }

    pub fn attempt(&self) -> &AttemptState {
        &self.attempt
    }

    pub(crate) fn checkpoint(&self) -> EngineCheckpoint {
        EngineCheckpoint {
            attempt: self.attempt.clone(),
            active: self.active.clone(),
        }
    }

    /// Puts the engine back where [`Self::checkpoint`] found it.
    pub(crate) fn rollback(&mut self, checkpoint: EngineCheckpoint) {
        self.attempt = checkpoint.attempt;
        self.active = checkpoint.active;
    }

    pub(crate) fn attempt_mut(&mut self) -> &mut AttemptState {
        &mut self.attempt
    }

    pub fn into_attempt(self) -> AttemptState {
        self.attempt
    }

    pub fn content(&self) -> &LessonContent {
        &self.content
    }

    pub fn current_level(&self) -> &Level {
        &self.content.levels[self.attempt.current_level]
    }

    pub fn is_level_exhausted(&self) -> bool {
        self.attempt.question_index >= self.active.len()
    }

    pub fn is_level_stopped(&self) -> bool {
        self.attempt.mistake_count >= MISTAKE_LIMIT
    }

    pub fn is_on_last_level(&self) -> bool {
        self.content.is_last_level(self.attempt.current_level)
    }

    pub fn questions_in_level(&self) -> usize {
        self.active.len()
    }
}

/// Reorders `set` by the stored ids; `None` if they are not the same id set.
fn restore_order(set: &[Question], order: &[String]) -> Option<Vec<Question>> {
    if order.len() != set.len() {
        return None;
    }
    let by_id = set
        .iter()
        .map(|q| (q.id.as_str(), q))
        .collect::<HashMap<_, _>>();
    order
        .iter()
        .map(|id| by_id.get(id.as_str()).map(|q| (*q).clone()))
        .collect()
}
