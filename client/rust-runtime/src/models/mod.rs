pub mod attempt;
pub mod content;
pub mod sync;

pub use attempt::{AttemptState, AttemptStatus, ResponseRecord};
pub use content::{Introduction, LessonContent, Level, Question, QuestionType};
pub use sync::{AttemptUpdate, QueuedSyncItem, SyncKind, SyncPayload};
