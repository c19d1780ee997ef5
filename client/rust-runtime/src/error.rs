use thiserror::Error;

/// Lesson content that cannot be served. Fatal to session start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("lesson {lesson_id} has no levels")]
    NoLevels { lesson_id: String },

    #[error("level {level_index} has an empty question set")]
    EmptyQuestionSet { level_index: usize },

    #[error(
        "level {level_index} rotation set {rotation} has {found} questions, expected {expected}"
    )]
    RotationSizeMismatch {
        level_index: usize,
        rotation: usize,
        expected: usize,
        found: usize,
    },

    #[error("level {level_index} lists question {question_id} twice in one set")]
    DuplicateQuestion {
        level_index: usize,
        question_id: String,
    },

    #[error("question {question_id} requires options but has none")]
    MissingOptions { question_id: String },

    #[error("question {question_id} has no correct answer")]
    MissingAnswer { question_id: String },

    #[error("level index {level_index} out of range (lesson has {level_count} levels)")]
    LevelOutOfRange {
        level_index: usize,
        level_count: usize,
    },

    #[error("requested lesson {requested} but the source returned lesson {found}")]
    IdMismatch { requested: String, found: String },

    #[error("lesson {lesson_id} is unavailable: {reason}")]
    Unavailable { lesson_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("storage directory {} is in use by another process", path.display())]
    Locked { path: std::path::PathBuf },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote sync transport failed: {0}")]
    Transport(String),

    #[error("remote sync rejected item {item_id} with status {status}")]
    Rejected { item_id: String, status: u16 },
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("audio source {0} could not be loaded")]
    Load(String),

    #[error("audio playback failed: {0}")]
    Playback(String),
}

/// Errors surfaced by the session host.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot start lesson: {0}")]
    Content(#[from] ContentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("an answer submission is already in flight")]
    SubmissionInFlight,

    #[error("no active session")]
    NoActiveSession,

    #[error("session state lock poisoned")]
    StatePoisoned,
}
