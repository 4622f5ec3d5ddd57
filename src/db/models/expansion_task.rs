use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Task status values for the expansion queue.
pub mod task_status {
    /// Waiting for the worker (or waiting out a retry backoff).
    pub const PENDING: &str = "pending";
    /// Claimed by a worker.
    pub const PROCESSING: &str = "processing";
    /// Occurrence inserted.
    pub const COMPLETED: &str = "completed";
    /// Target date was at capacity or the occurrence already existed; the
    /// week is dropped without error.
    pub const SKIPPED: &str = "skipped";
    /// Retries exhausted.
    pub const DEAD: &str = "dead";
}

/// A queued recurrence expansion task.
///
/// Each record corresponds to one future week of a recurring slot creation.
/// The entry carries a snapshot of the origin slot's times and weekday so the
/// worker can insert the occurrence without re-reading the origin row (which
/// may have been shadowed or deleted in the meantime). Tasks are independent
/// units of work: one week failing, skipping, or backing off never affects
/// the others.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExpansionTask {
    /// Primary key (UUID)
    pub id: String,

    /// Series the generated occurrence will belong to.
    pub series_id: String,

    /// Slot whose creation triggered the expansion.
    pub origin_slot_id: String,

    /// Week offset from the origin date, 1-based.
    pub week_index: i64,

    /// Date the occurrence will be created on (`YYYY-MM-DD`).
    pub target_date: String,

    pub start_time: String,
    pub end_time: String,

    /// The origin slot's weekday, carried verbatim onto the new occurrence.
    pub day_of_week: i64,

    /// Number of attempts already made.
    pub attempts: i64,

    /// Maximum attempts permitted before the task is parked as dead.
    pub max_attempts: i64,

    /// Timestamp when the task becomes eligible for the next attempt.
    pub next_attempt_at: NaiveDateTime,

    /// Last error message observed when an attempt failed (if any).
    pub last_error: Option<String>,

    /// One of the `task_status` values.
    pub status: String,

    /// Creation timestamp
    pub created_at: NaiveDateTime,

    /// Last update timestamp
    pub updated_at: NaiveDateTime,
}

/// Data required to enqueue a new expansion task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExpansionTask {
    pub series_id: String,
    pub origin_slot_id: String,
    pub week_index: i64,
    pub target_date: String,
    pub start_time: String,
    pub end_time: String,
    pub day_of_week: i64,

    /// Optional override for maximum attempts; the repository defaults this.
    pub max_attempts: Option<i64>,
}
