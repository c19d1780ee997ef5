//! Session host: starts or resumes attempts and routes every engine mutation
//! through durable persistence, the sync outbox and the audio queue.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::attempt_store::AttemptStore;
use super::audio_queue::{priority, AudioQueue, PlaybackTicket};
use super::content_service::ContentService;
use super::remote::{AttemptCounter, SyncSink};
use super::session_engine::{AnswerOutcome, LessonSessionEngine};
use super::sync_queue::{FlushReport, SyncQueue};
use crate::config::Config;
use crate::error::SessionError;
use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, LEVELS_FINISHED_TOTAL, SESSIONS_TOTAL};
use crate::models::{
    AttemptState, AttemptStatus, AttemptUpdate, Introduction, LessonContent, Question, SyncPayload,
};

/// Handles shared by every session on this device.
#[derive(Clone)]
pub struct SessionDeps {
    pub content: Arc<ContentService>,
    pub attempts: Arc<AttemptStore>,
    pub sync_queue: Arc<SyncQueue>,
    pub sync_sink: Arc<dyn SyncSink>,
    pub audio: Arc<AudioQueue>,
    pub attempt_counter: Arc<dyn AttemptCounter>,
}

/// Clip locators played after an answer.
#[derive(Debug, Clone, Default)]
pub struct FeedbackSounds {
    pub correct: Option<String>,
    pub incorrect: Option<String>,
}

pub struct SessionService {
    deps: SessionDeps,
    feedback_sounds: FeedbackSounds,
    feedback_delay: Duration,
    rng_seed: Option<u64>,
}

impl SessionService {
    pub fn new(deps: SessionDeps, config: &Config) -> Self {
        Self {
            deps,
            feedback_sounds: FeedbackSounds::default(),
            feedback_delay: config.feedback_delay(),
            rng_seed: None,
        }
    }

    pub fn with_feedback_sounds(mut self, sounds: FeedbackSounds) -> Self {
        self.feedback_sounds = sounds;
        self
    }

    /// Makes question and option shuffles reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    fn session_rng(&self) -> StdRng {
        match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// Resumes the stored in-progress attempt for this student and lesson, or
    /// starts a new one.
    pub async fn start(
        &self,
        student_id: &str,
        lesson_id: &str,
    ) -> Result<LessonSession, SessionError> {
        let content = self.deps.content.load(lesson_id).await?;

        if let Some(saved) = self.deps.attempts.load(lesson_id)? {
            if saved.student_id == student_id && !saved.status.is_terminal() {
                return self.resume_with(content, saved);
            }
            tracing::info!(
                "Discarding stored attempt {} for lesson {}",
                saved.id,
                lesson_id
            );
            self.deps.attempts.delete(lesson_id)?;
        }

        let prior_attempts = match self
            .deps
            .attempt_counter
            .prior_attempts(student_id, lesson_id)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Attempt count unavailable, assuming first attempt");
                0
            }
        };

        let attempt = AttemptState::new(
            Uuid::new_v4().to_string(),
            lesson_id.to_string(),
            student_id.to_string(),
            prior_attempts + 1,
        );
        let engine = LessonSessionEngine::start(content, attempt, self.session_rng())?;

        self.deps.attempts.save(engine.attempt())?;
        self.deps
            .sync_queue
            .enqueue(SyncPayload::AttemptUpdate(AttemptUpdate::from_state(
                engine.attempt(),
            )))?;

        SESSIONS_TOTAL.with_label_values(&["started"]).inc();
        tracing::info!(
            "Session started: attempt {} lesson {} student {}",
            engine.attempt().id,
            lesson_id,
            student_id
        );

        Ok(self.session_for(engine))
    }

    /// Resumes the stored attempt for `lesson_id` without starting a new one.
    pub async fn resume(&self, lesson_id: &str) -> Result<LessonSession, SessionError> {
        let saved = self
            .deps
            .attempts
            .load(lesson_id)?
            .filter(|attempt| !attempt.status.is_terminal())
            .ok_or(SessionError::NoActiveSession)?;
        let content = self.deps.content.load(lesson_id).await?;
        self.resume_with(content, saved)
    }

    fn resume_with(
        &self,
        content: Arc<LessonContent>,
        saved: AttemptState,
    ) -> Result<LessonSession, SessionError> {
        let engine = LessonSessionEngine::resume(content, saved, self.session_rng())?;
        self.deps.attempts.save(engine.attempt())?;
        SESSIONS_TOTAL.with_label_values(&["resumed"]).inc();
        Ok(self.session_for(engine))
    }

    fn session_for(&self, engine: LessonSessionEngine) -> LessonSession {
        LessonSession {
            engine: Mutex::new(engine),
            deps: self.deps.clone(),
            feedback_sounds: self.feedback_sounds.clone(),
            feedback_delay: self.feedback_delay,
            submitting: AtomicBool::new(false),
        }
    }

    /// Opportunistic outbox flush, e.g. after reconnecting.
    pub async fn flush(&self) -> FlushReport {
        self.deps.sync_queue.flush(self.deps.sync_sink.as_ref()).await
    }
}

/// Marks a submission in flight; released on drop.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SessionError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SessionError::SubmissionInFlight)?;
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One learner's active run through a lesson.
pub struct LessonSession {
    engine: Mutex<LessonSessionEngine>,
    deps: SessionDeps,
    feedback_sounds: FeedbackSounds,
    feedback_delay: Duration,
    submitting: AtomicBool,
}

impl LessonSession {
    fn engine(&self) -> Result<MutexGuard<'_, LessonSessionEngine>, SessionError> {
        self.engine.lock().map_err(|_| SessionError::StatePoisoned)
    }

    pub fn current_question(&self) -> Result<Option<Question>, SessionError> {
        Ok(self.engine()?.current_question())
    }

    pub fn introduction(&self) -> Result<Option<Introduction>, SessionError> {
        Ok(self.engine()?.current_level().introduction.clone())
    }

    pub fn attempt(&self) -> Result<AttemptState, SessionError> {
        Ok(self.engine()?.attempt().clone())
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::Acquire)
    }

    /// Queues narration for the current question, if it has audio.
    pub fn narrate_current(&self) -> Result<Option<PlaybackTicket>, SessionError> {
        let audio_url = self
            .engine()?
            .current_question()
            .and_then(|question| question.audio_url);
        Ok(audio_url.map(|url| self.deps.audio.play(url, priority::NARRATION)))
    }

    /// Records an answer, makes it durable, plays feedback and waits out the
    /// feedback delay. A second call while one is in flight is rejected.
    ///
    /// If the response cannot be queued the answer is undone. If it was
    /// queued but the attempt write fails, the answer stands in memory and
    /// the error is returned; the next successful save catches up.
    pub async fn submit_answer(&self, answer: Option<&str>) -> Result<AnswerOutcome, SessionError> {
        let _in_flight = InFlight::acquire(&self.submitting)?;

        let outcome = {
            let mut engine = self.engine()?;
            let checkpoint = engine.checkpoint();
            let outcome = engine.submit_answer(answer);
            let Some(record) = outcome.record.clone() else {
                return Ok(outcome);
            };

            // Outbox first: a crash before the attempt write replays this
            // question rather than losing the response.
            if let Err(e) = self.deps.sync_queue.enqueue(SyncPayload::Response(record)) {
                tracing::warn!(error = %e, "Failed to queue response, undoing answer");
                engine.rollback(checkpoint);
                return Err(e.into());
            }
            self.deps.attempts.save(engine.attempt())?;
            outcome
        };

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if outcome.is_correct { "true" } else { "false" }])
            .inc();
        if outcome.is_level_complete {
            let label = if outcome.should_stop_level {
                "stopped"
            } else {
                "exhausted"
            };
            LEVELS_FINISHED_TOTAL.with_label_values(&[label]).inc();
        }

        let sound = if outcome.is_correct {
            self.feedback_sounds.correct.clone()
        } else {
            self.feedback_sounds.incorrect.clone()
        };
        if let Some(sound) = sound {
            let result = self.deps.audio.play(sound, priority::FEEDBACK).await;
            tracing::debug!("Feedback playback ended: {:?}", result);
        }
        if !self.feedback_delay.is_zero() {
            tokio::time::sleep(self.feedback_delay).await;
        }

        Ok(outcome)
    }

    /// Advances to the next level and persists the new position. `false`
    /// means the lesson has no further level.
    pub fn move_to_next_level(&self) -> Result<bool, SessionError> {
        let _in_flight = InFlight::acquire(&self.submitting)?;

        let mut engine = self.engine()?;
        let checkpoint = engine.checkpoint();
        if !engine.move_to_next_level() {
            return Ok(false);
        }

        let update = AttemptUpdate::from_state(engine.attempt());
        if let Err(e) = self
            .deps
            .sync_queue
            .enqueue(SyncPayload::AttemptUpdate(update))
        {
            tracing::warn!(error = %e, "Failed to queue level change, staying on level");
            engine.rollback(checkpoint);
            return Err(e.into());
        }
        self.deps.attempts.save(engine.attempt())?;
        Ok(true)
    }

    /// Marks the attempt completed, queues the terminal update and drops the
    /// local copy.
    pub fn complete(self) -> Result<AttemptState, SessionError> {
        let final_state = {
            let mut engine = self.engine()?;
            let finished_last_level = engine.is_on_last_level()
                && (engine.is_level_exhausted() || engine.is_level_stopped());
            let attempt = engine.attempt_mut();
            if finished_last_level {
                attempt.levels_completed += 1;
            }
            attempt.status = AttemptStatus::Completed;
            attempt.updated_at = chrono::Utc::now();
            attempt.clone()
        };
        self.finish(final_state, "completed")
    }

    /// Stops any audio, queues an abandonment update and drops the local copy.
    pub fn abandon(self) -> Result<AttemptState, SessionError> {
        self.deps.audio.stop_all();
        let final_state = {
            let mut engine = self.engine()?;
            let attempt = engine.attempt_mut();
            attempt.status = AttemptStatus::Abandoned;
            attempt.updated_at = chrono::Utc::now();
            attempt.clone()
        };
        self.finish(final_state, "abandoned")
    }

    fn finish(self, final_state: AttemptState, label: &str) -> Result<AttemptState, SessionError> {
        // The terminal update must be durable before the local state goes away.
        self.deps
            .sync_queue
            .enqueue(SyncPayload::AttemptUpdate(AttemptUpdate::from_state(
                &final_state,
            )))?;
        if let Err(e) = self.deps.attempts.delete(&final_state.lesson_id) {
            // A terminal attempt left on disk is discarded by the next start.
            tracing::warn!(error = %e, "Failed to drop local attempt, marking it {}", label);
            if let Err(save_err) = self.deps.attempts.save(&final_state) {
                tracing::error!(error = %save_err, "Failed to store terminal attempt");
            }
            return Err(e.into());
        }

        SESSIONS_TOTAL.with_label_values(&[label]).inc();
        tracing::info!(
            "Session {}: attempt {} ({}/{} correct, {} levels)",
            label,
            final_state.id,
            final_state.questions_correct,
            final_state.questions_attempted,
            final_state.levels_completed
        );
        Ok(final_state)
    }
}
