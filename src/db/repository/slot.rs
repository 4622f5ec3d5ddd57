use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateSlot, Slot, UpdateSlot};
use crate::error::{AppError, AppResult};

const SLOT_COLUMNS: &str = "id, start_time, end_time, day_of_week, date, is_recurring, series_id, exception_id, created_at, updated_at";

/// Repository for slot occurrences (`slots` table).
pub struct SlotRepository;

impl SlotRepository {
    /// Insert a new slot occurrence.
    ///
    /// A `(date, start_time, end_time)` uniqueness violation is surfaced as
    /// `AppError::DuplicateSlot`; capacity is NOT checked here (see
    /// `create_if_capacity`).
    pub async fn create(pool: &SqlitePool, create: CreateSlot) -> AppResult<Slot> {
        Self::insert(pool, create).await
    }

    /// Count the slot's date's active occurrences and insert in a single
    /// transaction. Returns `Ok(None)` without writing when the date already
    /// holds `max_active` active occurrences.
    ///
    /// This closes the check-then-act race between the capacity check and the
    /// insert; racing duplicate creations are additionally rejected by the
    /// uniqueness constraint.
    pub async fn create_if_capacity(
        pool: &SqlitePool,
        create: CreateSlot,
        max_active: i64,
    ) -> AppResult<Option<Slot>> {
        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        let active: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM slots
            WHERE date = ? AND (exception_id IS NULL OR exception_id = '')
            "#,
        )
        .bind(&create.date)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        if active >= max_active {
            tx.rollback().await.map_err(AppError::Database)?;
            return Ok(None);
        }

        let slot = Self::insert(&mut *tx, create).await?;
        tx.commit().await.map_err(AppError::Database)?;

        Ok(Some(slot))
    }

    async fn insert<'e, E>(executor: E, create: CreateSlot) -> AppResult<Slot>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, Slot>(
            r#"
            INSERT INTO slots (
                id,
                start_time,
                end_time,
                day_of_week,
                date,
                is_recurring,
                series_id,
                exception_id,
                created_at,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, start_time, end_time, day_of_week, date, is_recurring, series_id, exception_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(create.start_time)
        .bind(create.end_time)
        .bind(create.day_of_week)
        .bind(create.date)
        .bind(create.is_recurring)
        .bind(create.series_id)
        .bind::<Option<String>>(None) // exception_id
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db)
                if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                AppError::DuplicateSlot(
                    "A slot with the same time already exists for this date".to_string(),
                )
            }
            _ => AppError::Database(e),
        })?;

        Ok(row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Slot>> {
        let row = sqlx::query_as::<_, Slot>(&format!(
            "SELECT {SLOT_COLUMNS} FROM slots WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// All occurrences whose `date` falls in the inclusive range, ordered by
    /// `(date, start_time)`. Shadowed rows are included; callers filter.
    pub async fn find_by_date_range(
        pool: &SqlitePool,
        start_date: &str,
        end_date: &str,
    ) -> AppResult<Vec<Slot>> {
        let rows = sqlx::query_as::<_, Slot>(&format!(
            "SELECT {SLOT_COLUMNS} FROM slots WHERE date BETWEEN ? AND ? ORDER BY date, start_time"
        ))
        .bind(start_date)
        .bind(end_date)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Number of active (non-shadowed) occurrences on a date. The input to
    /// the 2-per-date capacity rule.
    pub async fn count_active_by_date(pool: &SqlitePool, date: &str) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM slots
            WHERE date = ? AND (exception_id IS NULL OR exception_id = '')
            "#,
        )
        .bind(date)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count)
    }

    /// Apply a partial update; `None` fields keep their stored value.
    pub async fn update(
        pool: &SqlitePool,
        id: &str,
        updates: UpdateSlot,
    ) -> AppResult<Option<Slot>> {
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, Slot>(
            r#"
            UPDATE slots SET
                start_time = COALESCE(?, start_time),
                end_time = COALESCE(?, end_time),
                is_recurring = COALESCE(?, is_recurring),
                exception_id = COALESCE(?, exception_id),
                updated_at = ?
            WHERE id = ?
            RETURNING id, start_time, end_time, day_of_week, date, is_recurring, series_id, exception_id, created_at, updated_at
            "#,
        )
        .bind(updates.start_time)
        .bind(updates.end_time)
        .bind(updates.is_recurring)
        .bind(updates.exception_id)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM slots WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// All members of a recurring series, past and future, shadowed or not.
    pub async fn find_by_series(pool: &SqlitePool, series_id: &str) -> AppResult<Vec<Slot>> {
        let rows = sqlx::query_as::<_, Slot>(&format!(
            "SELECT {SLOT_COLUMNS} FROM slots WHERE series_id = ? ORDER BY date"
        ))
        .bind(series_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Delete every occurrence of a series, ignoring exception state.
    /// Returns the number of rows removed.
    pub async fn delete_series(pool: &SqlitePool, series_id: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM slots WHERE series_id = ?")
            .bind(series_id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
