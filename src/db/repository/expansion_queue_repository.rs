use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{task_status, CreateExpansionTask, ExpansionTask};
use crate::error::{AppError, AppResult};

/// Repository for the persistent recurrence expansion queue.
///
/// Implementation notes:
/// - Claiming uses an atomic single-statement UPDATE with a subselect:
///   `UPDATE ... WHERE id = (SELECT id FROM ... LIMIT 1) RETURNING ...`
///   This avoids a long-lived transaction and reduces contention on SQLite.
/// - `(series_id, week_index)` is unique, so enqueueing the same series twice
///   cannot produce duplicate work.
pub struct ExpansionQueueRepository;

impl ExpansionQueueRepository {
    /// Enqueue a new expansion task, due immediately.
    pub async fn create(
        pool: &SqlitePool,
        task: CreateExpansionTask,
    ) -> AppResult<ExpansionTask> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let max_attempts = task.max_attempts.unwrap_or(5);

        let row = sqlx::query_as::<_, ExpansionTask>(
            r#"
            INSERT INTO expansion_queue (
                id,
                series_id,
                origin_slot_id,
                week_index,
                target_date,
                start_time,
                end_time,
                day_of_week,
                attempts,
                max_attempts,
                next_attempt_at,
                last_error,
                status,
                created_at,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, series_id, origin_slot_id, week_index, target_date, start_time, end_time, day_of_week, attempts, max_attempts, next_attempt_at, last_error, status, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(task.series_id)
        .bind(task.origin_slot_id)
        .bind(task.week_index)
        .bind(task.target_date)
        .bind(task.start_time)
        .bind(task.end_time)
        .bind(task.day_of_week)
        .bind(0i64) // attempts
        .bind(max_attempts)
        .bind(now)
        .bind::<Option<String>>(None) // last_error
        .bind(task_status::PENDING)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Claim up to `limit` due tasks and return them.
    ///
    /// Atomically claims a single task per statement by using an
    /// `UPDATE ... WHERE id = (SELECT id ... LIMIT 1) RETURNING ...` pattern
    /// in a loop, so other writers are never blocked behind a long
    /// transaction.
    pub async fn fetch_and_claim_due(
        pool: &SqlitePool,
        limit: i64,
    ) -> AppResult<Vec<ExpansionTask>> {
        let mut tasks: Vec<ExpansionTask> = Vec::new();
        if limit <= 0 {
            return Ok(tasks);
        }

        for _ in 0..(limit as usize) {
            let now = Utc::now().naive_utc();

            let opt = sqlx::query_as::<_, ExpansionTask>(
                r#"
                UPDATE expansion_queue
                SET status = ?, updated_at = ?
                WHERE id = (
                    SELECT id FROM expansion_queue
                    WHERE status = ? AND next_attempt_at <= ?
                    ORDER BY next_attempt_at
                    LIMIT 1
                )
                RETURNING id, series_id, origin_slot_id, week_index, target_date, start_time, end_time, day_of_week, attempts, max_attempts, next_attempt_at, last_error, status, created_at, updated_at
                "#,
            )
            .bind(task_status::PROCESSING)
            .bind(now)
            .bind(task_status::PENDING)
            .bind(now)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

            match opt {
                Some(task) => tasks.push(task),
                None => break,
            }
        }

        Ok(tasks)
    }

    /// Mark a claimed task as successfully completed.
    pub async fn mark_completed(pool: &SqlitePool, id: &str) -> AppResult<()> {
        Self::set_terminal_status(pool, id, task_status::COMPLETED, None).await
    }

    /// Mark a claimed task as skipped (capacity reached or occurrence already
    /// present). A skipped week is a normal outcome, not a failure.
    pub async fn mark_skipped(
        pool: &SqlitePool,
        id: &str,
        reason: Option<&str>,
    ) -> AppResult<()> {
        Self::set_terminal_status(pool, id, task_status::SKIPPED, reason).await
    }

    /// Park a claimed task as dead after retries were exhausted.
    pub async fn mark_dead(pool: &SqlitePool, id: &str, error: &str) -> AppResult<()> {
        Self::set_terminal_status(pool, id, task_status::DEAD, Some(error)).await
    }

    async fn set_terminal_status(
        pool: &SqlitePool,
        id: &str,
        status: &str,
        error: Option<&str>,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let error_owned = error.map(|e| e.to_string());

        sqlx::query(
            r#"
            UPDATE expansion_queue
            SET status = ?, last_error = COALESCE(?, last_error), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(error_owned)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Return a failed task to the pending state with a bumped attempt count
    /// and a later due time.
    pub async fn reschedule(
        pool: &SqlitePool,
        id: &str,
        attempts: i64,
        next_attempt_at: NaiveDateTime,
        error: &str,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            UPDATE expansion_queue
            SET status = ?,
                attempts = ?,
                next_attempt_at = ?,
                last_error = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(task_status::PENDING)
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Cancel every task of a series that has not reached a terminal state.
    /// Called on series-wide delete so the worker cannot re-materialize
    /// occurrences for a series that no longer exists. Returns the number of
    /// tasks cancelled.
    pub async fn cancel_pending_for_series(
        pool: &SqlitePool,
        series_id: &str,
    ) -> AppResult<u64> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE expansion_queue
            SET status = ?, last_error = 'series deleted', updated_at = ?
            WHERE series_id = ? AND status IN (?, ?)
            "#,
        )
        .bind(task_status::SKIPPED)
        .bind(now)
        .bind(series_id)
        .bind(task_status::PENDING)
        .bind(task_status::PROCESSING)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Per-status task counts for one series; the expansion observability
    /// hook.
    pub async fn counts_by_status_for_series(
        pool: &SqlitePool,
        series_id: &str,
    ) -> AppResult<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) as count
            FROM expansion_queue
            WHERE series_id = ?
            GROUP BY status
            "#,
        )
        .bind(series_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::memory_pool;

    fn task(series: &str, week: i64, date: &str) -> CreateExpansionTask {
        CreateExpansionTask {
            series_id: series.to_string(),
            origin_slot_id: "origin".to_string(),
            week_index: week,
            target_date: date.to_string(),
            start_time: "09:00".to_string(),
            end_time: "10:00".to_string(),
            day_of_week: 1,
            max_attempts: Some(3),
        }
    }

    #[tokio::test]
    async fn claim_moves_due_tasks_to_processing() {
        let pool = memory_pool().await;

        ExpansionQueueRepository::create(&pool, task("s1", 1, "2024-01-09"))
            .await
            .unwrap();
        ExpansionQueueRepository::create(&pool, task("s1", 2, "2024-01-16"))
            .await
            .unwrap();

        let claimed = ExpansionQueueRepository::fetch_and_claim_due(&pool, 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed.iter().all(|t| t.status == task_status::PROCESSING));

        // Nothing left to claim
        let rest = ExpansionQueueRepository::fetch_and_claim_due(&pool, 10)
            .await
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn reschedule_makes_a_task_due_again() {
        let pool = memory_pool().await;

        let created = ExpansionQueueRepository::create(&pool, task("s1", 1, "2024-01-09"))
            .await
            .unwrap();
        let claimed = ExpansionQueueRepository::fetch_and_claim_due(&pool, 1)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        let past_due = Utc::now().naive_utc() - chrono::Duration::seconds(1);
        ExpansionQueueRepository::reschedule(&pool, &created.id, 1, past_due, "insert failed")
            .await
            .unwrap();

        let reclaimed = ExpansionQueueRepository::fetch_and_claim_due(&pool, 1)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 1);
        assert_eq!(reclaimed[0].last_error.as_deref(), Some("insert failed"));
    }

    #[tokio::test]
    async fn terminal_states_are_not_reclaimed() {
        let pool = memory_pool().await;

        let a = ExpansionQueueRepository::create(&pool, task("s1", 1, "2024-01-09"))
            .await
            .unwrap();
        let b = ExpansionQueueRepository::create(&pool, task("s1", 2, "2024-01-16"))
            .await
            .unwrap();
        let c = ExpansionQueueRepository::create(&pool, task("s1", 3, "2024-01-23"))
            .await
            .unwrap();
        ExpansionQueueRepository::fetch_and_claim_due(&pool, 3)
            .await
            .unwrap();

        ExpansionQueueRepository::mark_completed(&pool, &a.id).await.unwrap();
        ExpansionQueueRepository::mark_skipped(&pool, &b.id, Some("date full"))
            .await
            .unwrap();
        ExpansionQueueRepository::mark_dead(&pool, &c.id, "gave up").await.unwrap();

        assert!(ExpansionQueueRepository::fetch_and_claim_due(&pool, 10)
            .await
            .unwrap()
            .is_empty());

        let counts = ExpansionQueueRepository::counts_by_status_for_series(&pool, "s1")
            .await
            .unwrap();
        assert_eq!(counts.get(task_status::COMPLETED), Some(&1));
        assert_eq!(counts.get(task_status::SKIPPED), Some(&1));
        assert_eq!(counts.get(task_status::DEAD), Some(&1));
    }

    #[tokio::test]
    async fn duplicate_week_for_a_series_is_rejected() {
        let pool = memory_pool().await;

        ExpansionQueueRepository::create(&pool, task("s1", 1, "2024-01-09"))
            .await
            .unwrap();
        let err = ExpansionQueueRepository::create(&pool, task("s1", 1, "2024-01-09"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }
}
