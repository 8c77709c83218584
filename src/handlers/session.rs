// src/handlers/session.rs

//! Session Lifecycle Manager.
//!
//! Owns session creation (with the frozen question set), resumption repair,
//! next-item selection, answer intake, time enforcement and finalization,
//! orchestrating the rating / time-budget / stage-routing components.
//!
//! Every mutating operation runs inside one transaction that starts by
//! locking the session row (`SELECT ... FOR UPDATE`), so concurrent requests
//! against the same session serialize: no double-counted time, no doubled
//! rating updates, no stage decision fired twice for one boundary.

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{TimeDelta, Utc};
use sqlx::{Postgres, QueryBuilder, Transaction, types::Json as SqlJson};
use validator::Validate;

use crate::{
    engine::{batm, clock, config as engine_config, rating, stage},
    error::AppError,
    models::{
        answer::{Answer, SubmitAnswerRequest, SubmitAnswerResponse},
        question::{OPTION_COUNT, PublicQuestion, Question},
        session::{
            CreateSessionRequest, ExamResultResponse, NextItemResponse, RemainingTimeResponse,
            Session, SessionResponse, TestConfig, TopicQuota,
        },
    },
    state::AppState,
    utils::jwt::Claims,
};

/// Creates a new session for the authenticated candidate.
///
/// Rejects with a conflict carrying the existing session id when the
/// candidate already has an open session for this test. Selection, the
/// frozen set and the session row are committed atomically: an
/// insufficient-inventory failure leaves nothing behind.
pub async fn create_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    let candidate_id = claims.candidate_id()?;

    let mut tx = state.pool.begin().await?;

    // Resolve the effective configuration: a recruiter-authored test, or an
    // ad-hoc single-topic request.
    let (test_id, topic, quotas, band_filter, item_count, budget_sec) = match payload.test_id {
        Some(test_id) => {
            let test = sqlx::query_as::<_, TestConfig>(
                "SELECT id, title, topic_quotas, band_filter, item_count, time_budget_sec
                 FROM tests WHERE id = $1",
            )
            .bind(test_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("Test not found".to_string()))?;

            let item_count = payload.item_count.unwrap_or(test.item_count);
            let budget = payload.time_budget_sec.or(test.time_budget_sec);
            (
                Some(test.id),
                None,
                test.topic_quotas.0.clone(),
                test.band_filter,
                item_count,
                budget,
            )
        }
        None => {
            let topic = payload
                .topic
                .clone()
                .ok_or_else(|| AppError::BadRequest("Either test_id or topic is required".to_string()))?;
            let item_count = payload.item_count.ok_or_else(|| {
                AppError::BadRequest("item_count is required for topic sessions".to_string())
            })?;
            let quotas = vec![TopicQuota {
                topic: topic.clone(),
                count: item_count,
            }];
            (None, Some(topic), quotas, None, item_count, payload.time_budget_sec)
        }
    };

    // At most one open session per candidate and test/topic configuration:
    // topic A and topic B are distinct configurations.
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM sessions
         WHERE candidate_id = $1
           AND COALESCE(test_id::text, topic, '') = COALESCE($2::text, $3::text, '')
           AND finished_at IS NULL",
    )
    .bind(candidate_id)
    .bind(test_id.map(|id| id.to_string()))
    .bind(&topic)
    .fetch_optional(&mut *tx)
    .await?;
    if let Some(session_id) = existing {
        return Err(AppError::DuplicateOpenSession { session_id });
    }

    let candidate_rating = fetch_candidate_rating(&mut tx, candidate_id).await?;
    let band = engine_config::starting_band(candidate_rating);

    let question_ids =
        select_question_ids(&mut tx, test_id, &quotas, band_filter, item_count as i64).await?;

    let now = Utc::now();
    let deadline = budget_sec.map(|b| now + TimeDelta::seconds(b as i64));

    let session = sqlx::query_as::<_, Session>(
        "INSERT INTO sessions
            (candidate_id, test_id, topic, item_count, time_budget_sec,
             remaining_sec, deadline, last_event_at, band, stage_index, routing_config)
         VALUES ($1, $2, $3, $4, $5, $5, $6, $7, $8, 0, $9)
         RETURNING *",
    )
    .bind(candidate_id)
    .bind(test_id)
    .bind(&topic)
    .bind(item_count)
    .bind(budget_sec)
    .bind(deadline)
    .bind(now)
    .bind(band)
    .bind(SqlJson(state.engine.routing.clone()))
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        // A concurrent create can slip past the SELECT; the partial unique
        // index still guarantees a single open session.
        if e.to_string().contains("idx_sessions_one_open") {
            AppError::Conflict("An open session already exists for this test".to_string())
        } else {
            tracing::error!("Failed to create session: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    freeze_question_set(&mut tx, session.id, &question_ids).await?;

    tx.commit().await?;

    tracing::info!(
        "Session {} created for candidate {} ({} items, band {})",
        session.id,
        candidate_id,
        item_count,
        band
    );

    Ok((
        StatusCode::CREATED,
        Json(session_response(&session, 0, session.remaining_sec.map(i64::from))),
    ))
}

/// Resumes a session after a reconnect.
///
/// If a crash hit between session insert and freeze commit, the frozen set
/// is rebuilt here with the same selection rule; the guard on existing
/// frozen rows makes the repair idempotent. Missing timer fields are
/// backfilled from the stored budget so the deadline is always derivable.
pub async fn resume_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let candidate_id = claims.candidate_id()?;
    let mut tx = state.pool.begin().await?;

    let mut session = load_session_for_update(&mut tx, session_id).await?;
    assert_owner(&session, candidate_id)?;

    if !session.is_finished() {
        ensure_frozen_set(&mut tx, &session).await?;

        if session.time_budget_sec.is_some()
            && (session.remaining_sec.is_none() || session.deadline.is_none())
        {
            let now = Utc::now();
            let remaining = session.remaining_sec.or(session.time_budget_sec);
            let deadline = session
                .deadline
                .or(remaining.map(|r| now + TimeDelta::seconds(r as i64)));
            sqlx::query(
                "UPDATE sessions SET remaining_sec = $1, deadline = $2, last_event_at = $3
                 WHERE id = $4",
            )
            .bind(remaining)
            .bind(deadline)
            .bind(now)
            .bind(session.id)
            .execute(&mut *tx)
            .await?;
            session.remaining_sec = remaining;
            session.deadline = deadline;
            session.last_event_at = now;
        }
    }

    let time = enforce_time(&mut tx, &mut session, Utc::now()).await?;
    let answered = answered_count(&mut tx, session.id).await?;
    tx.commit().await?;

    Ok(Json(session_response(&session, answered, time.remaining_sec)))
}

/// Serves the next item: the earliest unanswered frozen position at the
/// current band, falling back to the earliest unanswered at any band so the
/// candidate is never blocked. Includes the BATM time hint.
pub async fn next_item(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let candidate_id = claims.candidate_id()?;
    let mut tx = state.pool.begin().await?;

    let mut session = load_session_for_update(&mut tx, session_id).await?;
    assert_owner(&session, candidate_id)?;

    let was_finished = session.is_finished();
    let time = enforce_time(&mut tx, &mut session, Utc::now()).await?;
    if session.is_finished() {
        // Persist a finalization we just performed before rejecting.
        tx.commit().await?;
        return Err(terminal_state_error(was_finished));
    }

    // Prefer the current band; otherwise earliest unanswered at any band.
    let next = sqlx::query_as::<_, NextItemRow>(
        "SELECT sq.position, q.id, q.topic, q.band, q.content, q.options
         FROM session_questions sq
         JOIN questions q ON q.id = sq.question_id
         WHERE sq.session_id = $1
           AND NOT EXISTS (
               SELECT 1 FROM answers a
               WHERE a.session_id = sq.session_id AND a.question_id = sq.question_id)
         ORDER BY (q.band = $2) DESC, sq.position
         LIMIT 1",
    )
    .bind(session.id)
    .bind(session.band)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = next else {
        // Every frozen item is answered; close the session out.
        finalize_locked(&mut tx, &mut session, time.remaining_sec).await?;
        tx.commit().await?;
        return Err(AppError::Conflict("All items answered; session finalized".to_string()));
    };

    let answered = answered_count(&mut tx, session.id).await?;
    let unanswered = (session.item_count as i64 - answered).max(1);
    // Unlimited sessions get no meaningful hint; report zero instead of a
    // budget-derived number.
    let expected_ms = match time.remaining_sec {
        Some(remaining) => {
            batm::expected_ms(remaining, unanswered, session.band, &state.engine.time_weights)
        }
        None => 0,
    };

    tx.commit().await?;

    Ok(Json(NextItemResponse {
        session_id,
        position: row.position,
        question: PublicQuestion {
            id: row.id,
            topic: row.topic,
            band: row.band,
            content: row.content,
            options: row.options,
        },
        expected_ms,
        remaining_sec: time.remaining_sec,
    }))
}

/// Grades one answer: validates it against the frozen set, recomputes the
/// expected time at submission (authoritative for pace), updates both
/// ratings, upserts the answer on (session, question) and, at each full
/// stage, runs the router and persists the new band.
pub async fn submit_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    let candidate_id = claims.candidate_id()?;
    let mut tx = state.pool.begin().await?;

    let mut session = load_session_for_update(&mut tx, session_id).await?;
    assert_owner(&session, candidate_id)?;

    let was_finished = session.is_finished();
    let time = enforce_time(&mut tx, &mut session, Utc::now()).await?;
    if session.is_finished() {
        tx.commit().await?;
        return Err(terminal_state_error(was_finished));
    }

    // The question must belong to this session's frozen set.
    let in_set = sqlx::query_scalar::<_, i32>(
        "SELECT position FROM session_questions WHERE session_id = $1 AND question_id = $2",
    )
    .bind(session.id)
    .bind(payload.question_id)
    .fetch_optional(&mut *tx)
    .await?;
    if in_set.is_none() {
        return Err(AppError::BadRequest(
            "Question does not belong to this session".to_string(),
        ));
    }

    let question = sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = $1")
        .bind(payload.question_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Question not found".to_string()))?;
    if question.status != "published" {
        return Err(AppError::Conflict("Question is no longer published".to_string()));
    }
    if payload.selected_index < 0 || payload.selected_index as usize >= OPTION_COUNT {
        return Err(AppError::BadRequest("selected_index out of range".to_string()));
    }

    // Retried identical submission: return the stored grading, touch nothing.
    let existing = sqlx::query_as::<_, Answer>(
        "SELECT * FROM answers WHERE session_id = $1 AND question_id = $2",
    )
    .bind(session.id)
    .bind(payload.question_id)
    .fetch_optional(&mut *tx)
    .await?;
    if let Some(prev) = &existing {
        if prev.selected_index == payload.selected_index
            && prev.time_taken_sec == payload.time_taken_sec
        {
            let answered = answered_count(&mut tx, session.id).await?;
            tx.commit().await?;
            return Ok((
                StatusCode::OK,
                Json(SubmitAnswerResponse {
                    session_id,
                    question_id: prev.question_id,
                    correct: prev.correct,
                    pace_ratio: stored_pace(prev),
                    expected_ms: prev.expected_ms,
                    answered_count: answered,
                    band: session.band,
                    stage_index: session.stage_index,
                    remaining_sec: time.remaining_sec,
                    finished: false,
                }),
            ));
        }
    }

    let correct = payload.selected_index == question.correct_index;

    // Expected time recomputed at submission with the band and counts as
    // they stand now; this value is what pace scoring uses and what the
    // answer row keeps.
    let answered_others = answered_count_excluding(&mut tx, session.id, payload.question_id).await?;
    let unanswered = (session.item_count as i64 - answered_others).max(1);
    let expected_ms = if session.time_budget_sec.is_some() {
        batm::expected_ms(
            time.remaining_sec.unwrap_or(0),
            unanswered,
            session.band,
            &state.engine.time_weights,
        )
    } else {
        0
    };
    // No budget means no pace signal; score it as exactly on pace.
    let pace = if expected_ms > 0 {
        batm::pace_ratio(payload.time_taken_sec as i64 * 1000, expected_ms)
    } else {
        1.0
    };

    let candidate_rating = fetch_candidate_rating(&mut tx, candidate_id).await?;
    let update = rating::update_pair(candidate_rating, question.rating, correct, pace);

    sqlx::query(
        "INSERT INTO candidate_ratings (candidate_id, rating, updated_at)
         VALUES ($1, $2, now())
         ON CONFLICT (candidate_id) DO UPDATE SET rating = EXCLUDED.rating, updated_at = now()",
    )
    .bind(candidate_id)
    .bind(update.candidate_after)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE questions SET rating = $1 WHERE id = $2")
        .bind(update.item_after)
        .bind(question.id)
        .execute(&mut *tx)
        .await?;

    // Upsert on the unique (session, question) pair: a changed re-submission
    // overwrites, never duplicates.
    sqlx::query(
        "INSERT INTO answers
            (session_id, question_id, selected_index, correct, time_taken_sec,
             band_at_answer, rating_at_answer, expected_ms, submitted_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
         ON CONFLICT (session_id, question_id) DO UPDATE SET
            selected_index = EXCLUDED.selected_index,
            correct = EXCLUDED.correct,
            time_taken_sec = EXCLUDED.time_taken_sec,
            band_at_answer = EXCLUDED.band_at_answer,
            rating_at_answer = EXCLUDED.rating_at_answer,
            expected_ms = EXCLUDED.expected_ms,
            submitted_at = now()",
    )
    .bind(session.id)
    .bind(question.id)
    .bind(payload.selected_index)
    .bind(correct)
    .bind(payload.time_taken_sec)
    .bind(session.band)
    .bind(question.rating)
    .bind(expected_ms)
    .execute(&mut *tx)
    .await?;

    // Charge the reported time against the stored budget; the gap-based
    // recomputation in enforce_time is only the expiry backstop, so the two
    // never stack on one answer.
    let new_remaining = session
        .remaining_sec
        .map(|r| (r as i64 - payload.time_taken_sec as i64).max(0));
    let now = Utc::now();
    sqlx::query("UPDATE sessions SET remaining_sec = $1, last_event_at = $2 WHERE id = $3")
        .bind(new_remaining.map(|r| r as i32))
        .bind(now)
        .bind(session.id)
        .execute(&mut *tx)
        .await?;
    session.remaining_sec = new_remaining.map(|r| r as i32);
    session.last_event_at = now;

    let answered = answered_count(&mut tx, session.id).await?;

    // Stage boundary: route once per completed block of stage_size answers.
    // The stage_index guard keeps an overwrite landing exactly on a multiple
    // from firing the router a second time for the same boundary.
    let stage_size = session.routing_config.0.stage_size.max(1);
    if answered % stage_size == 0 && (session.stage_index as i64) < answered / stage_size {
        run_stage_router(&mut tx, &mut session).await?;
    }

    let mut finished = false;
    if answered >= session.item_count as i64 {
        finalize_locked(&mut tx, &mut session, new_remaining).await?;
        finished = true;
    }

    tx.commit().await?;

    Ok((
        StatusCode::OK,
        Json(SubmitAnswerResponse {
            session_id,
            question_id: question.id,
            correct,
            pace_ratio: pace,
            expected_ms,
            answered_count: answered,
            band: session.band,
            stage_index: session.stage_index,
            remaining_sec: new_remaining,
            finished,
        }),
    ))
}

/// Submit-whole-exam: finalizes the session and returns the result.
/// Idempotent; a finished session returns its stored score unchanged.
pub async fn submit_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let candidate_id = claims.candidate_id()?;
    let mut tx = state.pool.begin().await?;

    let mut session = load_session_for_update(&mut tx, session_id).await?;
    assert_owner(&session, candidate_id)?;

    if !session.is_finished() {
        let time = enforce_time(&mut tx, &mut session, Utc::now()).await?;
        if !session.is_finished() {
            finalize_locked(&mut tx, &mut session, time.remaining_sec).await?;
        }
    }

    let correct = correct_count(&mut tx, session.id).await?;
    tx.commit().await?;

    Ok(Json(ExamResultResponse {
        session_id,
        score: session.score.unwrap_or(0),
        correct_count: correct,
        total_questions: session.item_count,
        final_band: session.band,
    }))
}

/// Remaining time as of now; finalizes in passing if the budget ran out.
pub async fn remaining_time(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let candidate_id = claims.candidate_id()?;
    let mut tx = state.pool.begin().await?;

    let mut session = load_session_for_update(&mut tx, session_id).await?;
    assert_owner(&session, candidate_id)?;

    let time = enforce_time(&mut tx, &mut session, Utc::now()).await?;
    tx.commit().await?;

    let remaining_sec = if session.is_finished() {
        session.remaining_sec.map(i64::from)
    } else {
        time.remaining_sec
    };
    Ok(Json(RemainingTimeResponse {
        session_id,
        remaining_sec,
        finished: session.is_finished(),
    }))
}

/// Helper struct for the next-item join.
#[derive(sqlx::FromRow)]
struct NextItemRow {
    position: i32,
    id: i64,
    topic: String,
    band: i32,
    content: String,
    options: SqlJson<Vec<String>>,
}

fn session_response(session: &Session, answered: i64, remaining: Option<i64>) -> SessionResponse {
    SessionResponse {
        id: session.id,
        item_count: session.item_count,
        answered_count: answered,
        band: session.band,
        stage_index: session.stage_index,
        remaining_sec: remaining,
        finished: session.is_finished(),
        score: session.score,
    }
}

async fn load_session_for_update(
    tx: &mut Transaction<'_, Postgres>,
    session_id: i64,
) -> Result<Session, AppError> {
    sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1 FOR UPDATE")
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::NotFound("Session not found".to_string()))
}

/// Pace ratio reconstructed from a stored answer row. Rows written without
/// a time budget carry expected_ms = 0 and read as exactly on pace.
fn stored_pace(answer: &Answer) -> f64 {
    if answer.expected_ms > 0 {
        batm::pace_ratio(answer.time_taken_sec as i64 * 1000, answer.expected_ms)
    } else {
        1.0
    }
}

/// A session that just ran out of time reads as Expired; one that was
/// already FINISHED reads as a terminal-state conflict.
fn terminal_state_error(was_already_finished: bool) -> AppError {
    if was_already_finished {
        AppError::Conflict("Session is already finished".to_string())
    } else {
        AppError::Expired("Time is up for this session".to_string())
    }
}

fn assert_owner(session: &Session, candidate_id: i64) -> Result<(), AppError> {
    if session.candidate_id != candidate_id {
        return Err(AppError::Forbidden(
            "Session belongs to another candidate".to_string(),
        ));
    }
    Ok(())
}

async fn fetch_candidate_rating(
    tx: &mut Transaction<'_, Postgres>,
    candidate_id: i64,
) -> Result<i64, AppError> {
    let rating = sqlx::query_scalar::<_, i64>(
        "SELECT rating FROM candidate_ratings WHERE candidate_id = $1",
    )
    .bind(candidate_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(rating.unwrap_or(engine_config::DEFAULT_RATING))
}

async fn answered_count(
    tx: &mut Transaction<'_, Postgres>,
    session_id: i64,
) -> Result<i64, AppError> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT count(*) FROM answers WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&mut **tx)
            .await?;
    Ok(count)
}

async fn answered_count_excluding(
    tx: &mut Transaction<'_, Postgres>,
    session_id: i64,
    question_id: i64,
) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM answers WHERE session_id = $1 AND question_id <> $2",
    )
    .bind(session_id)
    .bind(question_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(count)
}

async fn correct_count(
    tx: &mut Transaction<'_, Postgres>,
    session_id: i64,
) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM answers WHERE session_id = $1 AND correct",
    )
    .bind(session_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(count)
}

/// Recomputes remaining time lazily; on exhaustion the session is finalized
/// inside the same transaction. Finishing an already-finished session is a
/// no-op.
async fn enforce_time(
    tx: &mut Transaction<'_, Postgres>,
    session: &mut Session,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<clock::TimeCheck, AppError> {
    if session.is_finished() {
        return Ok(clock::TimeCheck {
            remaining_sec: session.time_budget_sec.map(|_| 0),
            expired: true,
        });
    }
    let check = clock::check(
        session.remaining_sec.map(i64::from),
        session.last_event_at,
        session.deadline,
        now,
    );
    if check.expired {
        finalize_locked(tx, session, Some(0)).await?;
    }
    Ok(check)
}

/// Marks the session FINISHED and stores the final score,
/// `round(100 * correct / item_count)`.
async fn finalize_locked(
    tx: &mut Transaction<'_, Postgres>,
    session: &mut Session,
    remaining_sec: Option<i64>,
) -> Result<(), AppError> {
    let correct = correct_count(tx, session.id).await?;
    let score = (100.0 * correct as f64 / session.item_count.max(1) as f64).round() as i32;
    let now = Utc::now();
    let remaining = session.time_budget_sec.and(remaining_sec).map(|r| r as i32);

    sqlx::query(
        "UPDATE sessions
         SET finished_at = $1, score = $2, remaining_sec = $3, last_event_at = $1
         WHERE id = $4 AND finished_at IS NULL",
    )
    .bind(now)
    .bind(score)
    .bind(remaining)
    .bind(session.id)
    .execute(&mut **tx)
    .await?;

    session.finished_at = Some(now);
    session.score = Some(score);
    session.remaining_sec = remaining;
    session.last_event_at = now;

    tracing::info!("Session {} finished with score {}", session.id, score);
    Ok(())
}

/// Writes the frozen (question, position) pairs for a new session.
async fn freeze_question_set(
    tx: &mut Transaction<'_, Postgres>,
    session_id: i64,
    question_ids: &[i64],
) -> Result<(), AppError> {
    let mut query_builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO session_questions (session_id, question_id, position) ",
    );
    query_builder.push_values(question_ids.iter().enumerate(), |mut b, (pos, qid)| {
        b.push_bind(session_id).push_bind(*qid).push_bind(pos as i32);
    });
    query_builder.build().execute(&mut **tx).await?;
    Ok(())
}

/// Idempotent crash repair: if the frozen set is missing (failure between
/// session insert and freeze commit), rebuild it with the same selection
/// rule. Guarded by a count of existing frozen rows.
async fn ensure_frozen_set(
    tx: &mut Transaction<'_, Postgres>,
    session: &Session,
) -> Result<(), AppError> {
    let frozen = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM session_questions WHERE session_id = $1",
    )
    .bind(session.id)
    .fetch_one(&mut **tx)
    .await?;
    if frozen > 0 {
        return Ok(());
    }

    tracing::warn!("Session {} has no frozen question set; rebuilding", session.id);

    let (quotas, band_filter) = match session.test_id {
        Some(test_id) => {
            let test = sqlx::query_as::<_, TestConfig>(
                "SELECT id, title, topic_quotas, band_filter, item_count, time_budget_sec
                 FROM tests WHERE id = $1",
            )
            .bind(test_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(AppError::NotFound("Test not found".to_string()))?;
            (test.topic_quotas.0.clone(), test.band_filter)
        }
        None => {
            let topic = session
                .topic
                .clone()
                .ok_or_else(|| AppError::InternalServerError("Session has neither test nor topic".to_string()))?;
            (
                vec![TopicQuota {
                    topic,
                    count: session.item_count,
                }],
                None,
            )
        }
    };

    let question_ids = select_question_ids(
        tx,
        session.test_id,
        &quotas,
        band_filter,
        session.item_count as i64,
    )
    .await?;
    freeze_question_set(tx, session.id, &question_ids).await?;
    Ok(())
}

/// Selects the item pool for a session: the curated ordered list when the
/// test has one, otherwise per-topic quota sampling with a random fill pass
/// to reach exactly `item_count`.
async fn select_question_ids(
    tx: &mut Transaction<'_, Postgres>,
    test_id: Option<i64>,
    quotas: &[TopicQuota],
    band_filter: Option<i32>,
    item_count: i64,
) -> Result<Vec<i64>, AppError> {
    if let Some(test_id) = test_id {
        let curated = sqlx::query_scalar::<_, i64>(
            "SELECT tq.question_id
             FROM test_questions tq
             JOIN questions q ON q.id = tq.question_id
             WHERE tq.test_id = $1 AND q.status = 'published'
             ORDER BY tq.position
             LIMIT $2",
        )
        .bind(test_id)
        .bind(item_count)
        .fetch_all(&mut **tx)
        .await?;
        if !curated.is_empty() {
            if (curated.len() as i64) < item_count {
                return Err(AppError::InsufficientInventory(format!(
                    "Curated list has {} published questions, {} requested",
                    curated.len(),
                    item_count
                )));
            }
            return Ok(curated);
        }
    }

    let mut selected: Vec<i64> = Vec::new();
    for quota in quotas {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM questions
             WHERE topic = $1 AND status = 'published'
               AND ($2::int IS NULL OR band = $2)
               AND NOT (id = ANY($3))
             ORDER BY RANDOM()
             LIMIT $4",
        )
        .bind(&quota.topic)
        .bind(band_filter)
        .bind(&selected)
        .bind(quota.count as i64)
        .fetch_all(&mut **tx)
        .await?;
        selected.extend(ids);
    }

    // Fill pass: top up from any configured topic when quotas came short.
    if (selected.len() as i64) < item_count {
        let topics: Vec<String> = quotas.iter().map(|q| q.topic.clone()).collect();
        let fill = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM questions
             WHERE topic = ANY($1) AND status = 'published'
               AND ($2::int IS NULL OR band = $2)
               AND NOT (id = ANY($3))
             ORDER BY RANDOM()
             LIMIT $4",
        )
        .bind(&topics)
        .bind(band_filter)
        .bind(&selected)
        .bind(item_count - selected.len() as i64)
        .fetch_all(&mut **tx)
        .await?;
        selected.extend(fill);
    }

    if (selected.len() as i64) < item_count {
        return Err(AppError::InsufficientInventory(format!(
            "Only {} published questions available, {} requested",
            selected.len(),
            item_count
        )));
    }
    selected.truncate(item_count as usize);
    Ok(selected)
}

/// Pulls the trailing stage block, aggregates it, routes, and persists the
/// new band with an incremented stage index.
async fn run_stage_router(
    tx: &mut Transaction<'_, Postgres>,
    session: &mut Session,
) -> Result<(), AppError> {
    let config = &session.routing_config.0;
    let block = sqlx::query_as::<_, Answer>(
        "SELECT * FROM answers WHERE session_id = $1
         ORDER BY submitted_at DESC, id DESC
         LIMIT $2",
    )
    .bind(session.id)
    .bind(config.stage_size)
    .fetch_all(&mut **tx)
    .await?;

    let items: Vec<stage::StageItem> = block
        .iter()
        .map(|a| stage::StageItem {
            correct: a.correct,
            pace_ratio: stored_pace(a),
            band: a.band_at_answer,
        })
        .collect();

    let agg = stage::aggregate(&items, config);
    let decision = stage::route(&agg, config);
    let new_band = stage::next_band(session.band, decision);
    let new_stage_index = session.stage_index + 1;

    sqlx::query("UPDATE sessions SET band = $1, stage_index = $2 WHERE id = $3")
        .bind(new_band)
        .bind(new_stage_index)
        .bind(session.id)
        .execute(&mut **tx)
        .await?;

    tracing::info!(
        "Session {} stage {}: {:?} -> band {} (accuracy {:.2}, score {:.2})",
        session.id,
        new_stage_index,
        decision,
        new_band,
        agg.accuracy,
        agg.stage_score
    );

    session.band = new_band;
    session.stage_index = new_stage_index;
    Ok(())
}
