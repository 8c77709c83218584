// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};

/// Number of answer options every bank item carries.
pub const OPTION_COUNT: usize = 4;

/// Represents the 'questions' table in the database.
///
/// Bank items are authored and moderated by the external question-bank
/// subsystem; the engine reads published rows and only ever writes the
/// `rating` column.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    pub topic: String,

    /// Difficulty band, 1 (easiest) to 5 (hardest).
    pub band: i32,

    /// The text content of the question.
    pub content: String,

    /// Exactly four options, stored as a JSON array in the database.
    pub options: Json<Vec<String>>,

    /// Zero-based index of the correct option.
    pub correct_index: i32,

    /// Item rating on the shared candidate/question scale.
    pub rating: i64,

    /// 'draft', 'published' or 'archived'. Only published items are
    /// eligible for sessions.
    pub status: String,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for serving a question to a candidate (excludes the correct index,
/// the rating and the status).
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub topic: String,
    pub band: i32,
    pub content: String,
    pub options: Json<Vec<String>>,
}

impl From<Question> for PublicQuestion {
    fn from(q: Question) -> Self {
        PublicQuestion {
            id: q.id,
            topic: q.topic,
            band: q.band,
            content: q.content,
            options: q.options,
        }
    }
}
