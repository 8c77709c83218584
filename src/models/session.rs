// src/models/session.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

use crate::engine::config::RoutingConfig;
use crate::models::question::PublicQuestion;

/// Represents the 'sessions' table: one exam attempt by one candidate.
///
/// OPEN while `finished_at` is NULL, FINISHED afterwards; there are no other
/// states. Remaining time is recomputed lazily from `last_event_at`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub candidate_id: i64,
    pub test_id: Option<i64>,
    pub topic: Option<String>,
    pub item_count: i32,
    /// Total budget in seconds; NULL means unlimited.
    pub time_budget_sec: Option<i32>,
    pub remaining_sec: Option<i32>,
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
    pub last_event_at: chrono::DateTime<chrono::Utc>,
    /// Current difficulty band the candidate is being served at.
    pub band: i32,
    /// Count of completed routing decisions.
    pub stage_index: i32,
    /// Snapshot of the routing rules in effect for this session.
    pub routing_config: Json<RoutingConfig>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub score: Option<i32>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Session {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Represents the 'tests' table: a recruiter-authored exam configuration.
/// Read-only from the engine's perspective.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TestConfig {
    pub id: i64,
    pub title: String,
    /// Per-topic selection quotas; empty when the test relies on a curated
    /// item list instead.
    pub topic_quotas: Json<Vec<TopicQuota>>,
    /// Restrict auto-selection to one band, if set.
    pub band_filter: Option<i32>,
    pub item_count: i32,
    pub time_budget_sec: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicQuota {
    pub topic: String,
    pub count: i32,
}

/// One row of the frozen question set, ordered by `position`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FrozenItem {
    pub question_id: i64,
    pub position: i32,
}

/// DTO for creating a session. Either `test_id` or `topic` must be present;
/// `item_count`/`time_budget_sec` override the test configuration when given
/// and are required for ad-hoc topic sessions.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    pub test_id: Option<i64>,
    #[validate(length(min = 1, max = 100))]
    pub topic: Option<String>,
    #[validate(range(min = 1, max = 200))]
    pub item_count: Option<i32>,
    #[validate(range(min = 1, max = 86400))]
    pub time_budget_sec: Option<i32>,
}

/// Session state as returned to the client.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: i64,
    pub item_count: i32,
    pub answered_count: i64,
    pub band: i32,
    pub stage_index: i32,
    pub remaining_sec: Option<i64>,
    pub finished: bool,
    pub score: Option<i32>,
}

/// Next item to serve, with the BATM time hint.
#[derive(Debug, Serialize)]
pub struct NextItemResponse {
    pub session_id: i64,
    pub position: i32,
    pub question: PublicQuestion,
    /// Advisory expected time for this item; pace is scored against the
    /// value recomputed at submission.
    pub expected_ms: i64,
    pub remaining_sec: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RemainingTimeResponse {
    pub session_id: i64,
    pub remaining_sec: Option<i64>,
    pub finished: bool,
}

/// Final result of a finished session.
#[derive(Debug, Serialize)]
pub struct ExamResultResponse {
    pub session_id: i64,
    pub score: i32,
    pub correct_count: i64,
    pub total_questions: i32,
    pub final_band: i32,
}
