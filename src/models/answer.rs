// src/models/answer.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Represents the 'answers' table: one graded response per
/// (session, question) pair. Re-submission overwrites the row in place.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,
    pub session_id: i64,
    pub question_id: i64,
    pub selected_index: i32,
    pub correct: bool,
    pub time_taken_sec: i32,
    /// Band and item rating at the moment of answering, kept for stage
    /// routing and audit.
    pub band_at_answer: i32,
    pub rating_at_answer: i64,
    /// Expected time computed at submission; the pace denominator.
    pub expected_ms: i64,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for submitting one answer.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    pub question_id: i64,
    #[validate(range(min = 0, max = 3))]
    pub selected_index: i32,
    #[validate(range(min = 0, max = 86400))]
    pub time_taken_sec: i32,
}

/// Grading outcome returned after an accepted answer.
#[derive(Debug, Serialize)]
pub struct SubmitAnswerResponse {
    pub session_id: i64,
    pub question_id: i64,
    pub correct: bool,
    pub pace_ratio: f64,
    pub expected_ms: i64,
    pub answered_count: i64,
    pub band: i32,
    pub stage_index: i32,
    pub remaining_sec: Option<i64>,
    pub finished: bool,
}
