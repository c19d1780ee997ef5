use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ContentError;

/// Rotation index cycles through default, rotation set 1, rotation set 2.
pub const ROTATION_CYCLE: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    PictureChoice,
    ListenAndChoose,
    TrueFalse,
    FillInBlank,
    Spelling,
    #[serde(other)]
    Other,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::PictureChoice => "picture_choice",
            QuestionType::ListenAndChoose => "listen_and_choose",
            QuestionType::TrueFalse => "true_false",
            QuestionType::FillInBlank => "fill_in_blank",
            QuestionType::Spelling => "spelling",
            QuestionType::Other => "other",
        }
    }

    /// Whether the renderer shows a list of options to pick from.
    pub fn presents_options(&self) -> bool {
        matches!(
            self,
            QuestionType::MultipleChoice
                | QuestionType::PictureChoice
                | QuestionType::ListenAndChoose
                | QuestionType::TrueFalse
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_answer: String,
    /// Extra responses a renderer may accept; the engine checks `correct_answer` only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptable_answers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Question {
    /// Case- and surrounding-whitespace-insensitive comparison against the canonical answer.
    pub fn is_correct(&self, answer: &str) -> bool {
        normalize_answer(answer) == normalize_answer(&self.correct_answer)
    }

    fn validate(&self) -> Result<(), ContentError> {
        if normalize_answer(&self.correct_answer).is_empty() {
            return Err(ContentError::MissingAnswer {
                question_id: self.id.clone(),
            });
        }
        if self.question_type.presents_options() && self.options.is_empty() {
            return Err(ContentError::MissingOptions {
                question_id: self.id.clone(),
            });
        }
        Ok(())
    }
}

pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Introduction {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Level {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub introduction: Option<Introduction>,
    pub questions: Vec<Question>,
    /// Alternate sets served on retakes; entry 0 is rotation set 1.
    #[serde(default)]
    pub rotation_sets: Vec<Vec<Question>>,
}

impl Level {
    /// Picks the question set for a 1-based attempt number.
    /// Index 0 is the default set; 1 and 2 fall back to default when absent.
    pub fn question_set(&self, attempt_number: u32) -> &[Question] {
        match rotation_index(attempt_number) {
            0 => &self.questions,
            index => self
                .rotation_sets
                .get(index as usize - 1)
                .map(Vec::as_slice)
                .unwrap_or(&self.questions),
        }
    }

    fn validate(&self, level_index: usize) -> Result<(), ContentError> {
        if self.questions.is_empty() {
            return Err(ContentError::EmptyQuestionSet { level_index });
        }

        let expected = self.questions.len();
        for (offset, set) in self.rotation_sets.iter().enumerate() {
            if set.len() != expected {
                return Err(ContentError::RotationSizeMismatch {
                    level_index,
                    rotation: offset + 1,
                    expected,
                    found: set.len(),
                });
            }
        }

        for set in std::iter::once(&self.questions).chain(self.rotation_sets.iter()) {
            let mut seen = HashSet::new();
            for question in set {
                if !seen.insert(question.id.as_str()) {
                    return Err(ContentError::DuplicateQuestion {
                        level_index,
                        question_id: question.id.clone(),
                    });
                }
                question.validate()?;
            }
        }

        Ok(())
    }
}

/// Immutable lesson content as served by the content source or the local cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LessonContent {
    pub id: String,
    pub title: String,
    pub levels: Vec<Level>,
}

impl LessonContent {
    /// Structural integrity check run before any session starts on this content.
    pub fn validate(&self) -> Result<(), ContentError> {
        if self.levels.is_empty() {
            return Err(ContentError::NoLevels {
                lesson_id: self.id.clone(),
            });
        }
        self.levels
            .iter()
            .enumerate()
            .try_for_each(|(index, level)| level.validate(index))
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_last_level(&self, level_index: usize) -> bool {
        level_index + 1 == self.levels.len()
    }
}

/// `(n - 1) mod 3` for a 1-based attempt number; attempt 0 is treated as the first attempt.
pub fn rotation_index(attempt_number: u32) -> u32 {
    attempt_number.saturating_sub(1) % ROTATION_CYCLE
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn question(id: &str, answer: &str) -> Question {
        Question {
            id: id.to_string(),
            question_type: QuestionType::MultipleChoice,
            prompt: format!("Pick the word for {}", id),
            options: vec![
                answer.to_string(),
                "cat".to_string(),
                "sun".to_string(),
                "tree".to_string(),
            ],
            correct_answer: answer.to_string(),
            acceptable_answers: Vec::new(),
            audio_url: None,
            image_url: None,
        }
    }

    pub fn level(id: &str, size: usize) -> Level {
        Level {
            id: id.to_string(),
            title: format!("Level {}", id),
            introduction: None,
            questions: (0..size)
                .map(|i| question(&format!("{}-q{}", id, i), &format!("word{}", i)))
                .collect(),
            rotation_sets: Vec::new(),
        }
    }

    pub fn lesson(level_sizes: &[usize]) -> LessonContent {
        LessonContent {
            id: "lesson-animals".to_string(),
            title: "Animals".to_string(),
            levels: level_sizes
                .iter()
                .enumerate()
                .map(|(i, size)| level(&format!("l{}", i), *size))
                .collect(),
        }
    }
}
