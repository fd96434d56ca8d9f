use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Answer state of a banked question.
///
/// Moves from `Unanswered` to `Correct` or `Incorrect` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerState {
    Unanswered,
    Correct,
    Incorrect,
}

impl AnswerState {
    pub(crate) fn from_column(value: Option<bool>) -> Self {
        match value {
            None => AnswerState::Unanswered,
            Some(true) => AnswerState::Correct,
            Some(false) => AnswerState::Incorrect,
        }
    }

    pub fn is_answered(self) -> bool {
        self != AnswerState::Unanswered
    }
}

/// A question stored in the bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankedQuestion {
    /// Database-assigned, increases with insertion order.
    pub key: i64,
    pub question_id: String,
    pub skill_id: String,
    pub level_id: String,
    pub question_data: Value,
    pub answer: AnswerState,
}

/// Per-level bank totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelStats {
    pub level_id: String,
    pub total: usize,
    pub unanswered: usize,
}
