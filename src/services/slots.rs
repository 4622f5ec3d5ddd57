use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::db::{
    CreateSlot, ExpansionQueueRepository, Slot, SlotDisposition, SlotRepository, UpdateSlot,
};
use crate::error::{AppError, AppResult};
use crate::services::capacity::{CapacityPolicy, MAX_ACTIVE_SLOTS_PER_DATE};
use crate::services::expansion::ExpansionService;
use crate::AppState;

/// Outcome of a single-occurrence delete. Deleting a recurring,
/// non-shadowed occurrence does not remove the row; it stamps an exception
/// marker instead, and callers report that distinctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    MarkedAsException { exception_id: String },
}

pub struct SlotService;

impl SlotService {
    /// Validate a date input and return the normalized `YYYY-MM-DD` string
    /// with its parsed form. An ISO datetime is accepted and truncated at
    /// the `T`.
    pub fn parse_date(raw: &str) -> AppResult<(String, NaiveDate)> {
        let date_part = raw.split('T').next().unwrap_or(raw);

        if date_part.len() != 10 {
            return Err(AppError::Validation(
                "Date must be in YYYY-MM-DD format".to_string(),
            ));
        }
        let parsed = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| {
            AppError::Validation("Date must be in YYYY-MM-DD format".to_string())
        })?;

        Ok((date_part.to_string(), parsed))
    }

    /// Validate a `HH:MM` 24h time-of-day string. Zero padding is required
    /// so that lexical comparison orders times correctly.
    pub fn validate_time(value: &str, field: &str) -> AppResult<()> {
        let well_formed = value.len() == 5 && NaiveTime::parse_from_str(value, "%H:%M").is_ok();
        if !well_formed {
            return Err(AppError::Validation(format!(
                "{} must be in HH:MM format",
                field
            )));
        }
        Ok(())
    }

    /// Create a slot occurrence.
    ///
    /// Validation and the capacity pre-check reject the request before any
    /// write; the insert itself re-counts inside a transaction. A recurring
    /// creation mints a fresh series id and enqueues expansion tasks for the
    /// background worker — enqueue problems never fail the creation.
    pub async fn create_slot(
        state: &Arc<AppState>,
        start_time: &str,
        end_time: &str,
        day_of_week: i64,
        date: &str,
        is_recurring: bool,
    ) -> AppResult<Slot> {
        let (date, parsed_date) = Self::parse_date(date)?;
        Self::validate_time(start_time, "start_time")?;
        Self::validate_time(end_time, "end_time")?;

        if start_time >= end_time {
            return Err(AppError::Validation(
                "End time must be after start time".to_string(),
            ));
        }

        if !(0..=6).contains(&day_of_week) {
            return Err(AppError::Validation(
                "day_of_week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }
        let actual = i64::from(parsed_date.weekday().num_days_from_sunday());
        if day_of_week != actual {
            return Err(AppError::Validation(format!(
                "day_of_week {} does not match {} (expected {})",
                day_of_week, date, actual
            )));
        }

        if !CapacityPolicy::can_add(&state.db, &date).await? {
            return Err(AppError::CapacityExceeded(
                "Each date can have a maximum of 2 slots".to_string(),
            ));
        }

        let create = CreateSlot {
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
            day_of_week,
            date,
            is_recurring,
            series_id: is_recurring.then(|| Uuid::new_v4().to_string()),
        };

        let slot =
            SlotRepository::create_if_capacity(&state.db, create, MAX_ACTIVE_SLOTS_PER_DATE)
                .await?
                .ok_or_else(|| {
                    AppError::CapacityExceeded(
                        "Each date can have a maximum of 2 slots".to_string(),
                    )
                })?;

        if slot.is_recurring {
            let enqueued = ExpansionService::schedule(state, &slot).await;
            tracing::debug!(
                "Scheduled {} expansion weeks for slot {}",
                enqueued,
                slot.id
            );
        }

        Ok(slot)
    }

    /// Apply an edit, following the exception resolver state machine.
    ///
    /// Editing an untouched series instance shadows the original for that
    /// date and returns the plain replacement row carrying the edited
    /// fields; any other disposition is mutated in place.
    pub async fn update_slot(
        state: &Arc<AppState>,
        id: &str,
        updates: UpdateSlot,
    ) -> AppResult<Slot> {
        let existing = SlotRepository::find_by_id(&state.db, id)
            .await?
            .ok_or_else(|| AppError::NotFound("The specified slot does not exist".to_string()))?;

        if let Some(ref start) = updates.start_time {
            Self::validate_time(start, "start_time")?;
        }
        if let Some(ref end) = updates.end_time {
            Self::validate_time(end, "end_time")?;
        }

        let new_start = updates
            .start_time
            .clone()
            .unwrap_or_else(|| existing.start_time.clone());
        let new_end = updates
            .end_time
            .clone()
            .unwrap_or_else(|| existing.end_time.clone());
        if new_start >= new_end {
            return Err(AppError::Validation(
                "End time must be after start time".to_string(),
            ));
        }

        match existing.disposition() {
            SlotDisposition::OneOff | SlotDisposition::Excepted => {
                SlotRepository::update(&state.db, id, updates)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound("The specified slot does not exist".to_string())
                    })
            }
            SlotDisposition::SeriesInstance => {
                // Shadow the original for this date only; its stored fields
                // stay pristine since the row is invisible from here on.
                let exception_id = format!("exception_{}", Uuid::new_v4());
                SlotRepository::update(
                    &state.db,
                    id,
                    UpdateSlot {
                        exception_id: Some(exception_id),
                        ..Default::default()
                    },
                )
                .await?
                .ok_or_else(|| {
                    AppError::NotFound("The specified slot does not exist".to_string())
                })?;

                let replacement = CreateSlot {
                    start_time: new_start,
                    end_time: new_end,
                    day_of_week: existing.day_of_week,
                    date: existing.date.clone(),
                    is_recurring: false,
                    series_id: None,
                };

                SlotRepository::create(&state.db, replacement).await
            }
        }
    }

    /// Delete a single occurrence, following the exception resolver.
    pub async fn delete_slot(state: &Arc<AppState>, id: &str) -> AppResult<DeleteOutcome> {
        let existing = SlotRepository::find_by_id(&state.db, id)
            .await?
            .ok_or_else(|| AppError::NotFound("The specified slot does not exist".to_string()))?;

        match existing.disposition() {
            SlotDisposition::SeriesInstance => {
                // No replacement row: this date now shows no slot for the
                // series.
                let exception_id = format!("exception_{}", Uuid::new_v4());
                SlotRepository::update(
                    &state.db,
                    id,
                    UpdateSlot {
                        exception_id: Some(exception_id.clone()),
                        ..Default::default()
                    },
                )
                .await?
                .ok_or_else(|| {
                    AppError::NotFound("The specified slot does not exist".to_string())
                })?;

                Ok(DeleteOutcome::MarkedAsException { exception_id })
            }
            SlotDisposition::OneOff | SlotDisposition::Excepted => {
                let deleted = SlotRepository::delete(&state.db, id).await?;
                if !deleted {
                    return Err(AppError::NotFound(
                        "The specified slot does not exist".to_string(),
                    ));
                }
                Ok(DeleteOutcome::Deleted)
            }
        }
    }

    /// Delete every occurrence of the target slot's series, past and future,
    /// ignoring exception state. Returns the number of rows removed.
    pub async fn delete_series(state: &Arc<AppState>, id: &str) -> AppResult<u64> {
        let existing = SlotRepository::find_by_id(&state.db, id)
            .await?
            .ok_or_else(|| AppError::NotFound("The specified slot does not exist".to_string()))?;

        if !existing.is_recurring {
            return Err(AppError::InvalidOperation(
                "This slot is not part of a recurring series".to_string(),
            ));
        }
        let Some(series_id) = existing.series_id else {
            return Err(AppError::InvalidOperation(
                "This slot is not part of a recurring series".to_string(),
            ));
        };

        let deleted = SlotRepository::delete_series(&state.db, &series_id).await?;

        // Outstanding expansion tasks would re-materialize the series after
        // the delete; cancel them. Failure here is logged, not surfaced: the
        // rows the caller asked about are already gone.
        match ExpansionQueueRepository::cancel_pending_for_series(&state.db, &series_id).await {
            Ok(0) => {}
            Ok(cancelled) => tracing::debug!(
                "Cancelled {} pending expansion tasks for series {}",
                cancelled,
                series_id
            ),
            Err(e) => tracing::warn!(
                "Failed to cancel expansion tasks for series {}: {:?}",
                series_id,
                e
            ),
        }

        Ok(deleted)
    }

    /// Active occurrences in the inclusive date range, ordered by
    /// `(date, start_time)`. Shadowed originals are markers only and never
    /// reach the caller.
    pub async fn get_range(
        state: &Arc<AppState>,
        start_date: &str,
        end_date: &str,
    ) -> AppResult<Vec<Slot>> {
        let (start, _) = Self::parse_date(start_date)?;
        let (end, _) = Self::parse_date(end_date)?;

        let slots = SlotRepository::find_by_date_range(&state.db, &start, &end).await?;
        Ok(slots.into_iter().filter(|s| !s.is_excepted()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_state;

    async fn create(
        state: &Arc<AppState>,
        date: &str,
        start: &str,
        end: &str,
        day_of_week: i64,
        recurring: bool,
    ) -> AppResult<Slot> {
        SlotService::create_slot(state, start, end, day_of_week, date, recurring).await
    }

    #[tokio::test]
    async fn create_validates_inputs_before_writing() {
        let state = test_state().await;

        // 2024-01-01 is a Monday (day_of_week 1)
        let cases = [
            ("2024-13-01", "09:00", "10:00", 1i64),
            ("not-a-date", "09:00", "10:00", 1),
            ("2024-01-01", "9:00", "10:00", 1),
            ("2024-01-01", "09:00", "09:00", 1),
            ("2024-01-01", "10:00", "09:00", 1),
            ("2024-01-01", "09:00", "10:00", 7),
            ("2024-01-01", "09:00", "10:00", 2),
        ];
        for (date, start, end, dow) in cases {
            let err = create(&state, date, start, end, dow, false).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{date} {start} {end} {dow}");
        }

        assert!(SlotService::get_range(&state, "2024-01-01", "2024-12-31")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn create_accepts_iso_datetime_and_truncates() {
        let state = test_state().await;

        let slot = create(&state, "2024-01-01T00:00:00.000Z", "09:00", "10:00", 1, false)
            .await
            .unwrap();
        assert_eq!(slot.date, "2024-01-01");
    }

    #[tokio::test]
    async fn third_slot_on_a_date_is_rejected_with_capacity_error() {
        let state = test_state().await;

        create(&state, "2024-01-01", "09:00", "10:00", 1, false).await.unwrap();
        create(&state, "2024-01-01", "11:00", "12:00", 1, false).await.unwrap();

        let err = create(&state, "2024-01-01", "13:00", "14:00", 1, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CapacityExceeded(_)));

        // No row was written for the rejected attempt
        let slots = SlotService::get_range(&state, "2024-01-01", "2024-01-01")
            .await
            .unwrap();
        assert_eq!(slots.len(), 2);
    }

    #[tokio::test]
    async fn round_trip_create_read_delete() {
        let state = test_state().await;

        let slot = create(&state, "2024-01-01", "09:00", "10:00", 1, false)
            .await
            .unwrap();

        let visible = SlotService::get_range(&state, "2024-01-01", "2024-01-07")
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, slot.id);
        assert_eq!(visible[0].start_time, "09:00");

        let outcome = SlotService::delete_slot(&state, &slot.id).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);

        assert!(SlotService::get_range(&state, "2024-01-01", "2024-01-07")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn editing_a_one_off_mutates_in_place() {
        let state = test_state().await;

        let slot = create(&state, "2024-01-01", "09:00", "10:00", 1, false)
            .await
            .unwrap();
        let updated = SlotService::update_slot(
            &state,
            &slot.id,
            UpdateSlot {
                start_time: Some("09:30".to_string()),
                end_time: Some("10:30".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.id, slot.id);
        assert_eq!(updated.start_time, "09:30");

        let visible = SlotService::get_range(&state, "2024-01-01", "2024-01-01")
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
    }

    #[tokio::test]
    async fn editing_a_series_instance_shadows_and_replaces() {
        let state = test_state().await;

        let origin = create(&state, "2024-01-01", "09:00", "10:00", 1, true)
            .await
            .unwrap();

        let replacement = SlotService::update_slot(
            &state,
            &origin.id,
            UpdateSlot {
                start_time: Some("14:00".to_string()),
                end_time: Some("15:00".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_ne!(replacement.id, origin.id);
        assert!(!replacement.is_recurring);
        assert!(replacement.series_id.is_none());
        assert_eq!(replacement.date, "2024-01-01");
        assert_eq!(replacement.day_of_week, 1);
        assert_eq!(replacement.start_time, "14:00");

        // The shadowed original is excluded from reads but still stored,
        // with its fields untouched apart from the exception marker.
        let stored = crate::db::SlotRepository::find_by_id(&state.db, &origin.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_excepted());
        assert_eq!(stored.start_time, "09:00");

        let visible = SlotService::get_range(&state, "2024-01-01", "2024-01-01")
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, replacement.id);
    }

    #[tokio::test]
    async fn editing_an_excepted_row_is_treated_as_plain() {
        let state = test_state().await;

        let origin = create(&state, "2024-01-01", "09:00", "10:00", 1, true)
            .await
            .unwrap();
        SlotService::delete_slot(&state, &origin.id).await.unwrap();

        // The shadowed original can still be edited directly; no second
        // exception or replacement appears.
        let updated = SlotService::update_slot(
            &state,
            &origin.id,
            UpdateSlot {
                start_time: Some("08:00".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.id, origin.id);
        assert_eq!(updated.start_time, "08:00");
        assert!(updated.is_excepted());

        assert!(SlotService::get_range(&state, "2024-01-01", "2024-01-01")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn single_delete_of_a_series_instance_leaves_no_active_slot() {
        let state = test_state().await;

        let origin = create(&state, "2024-01-01", "09:00", "10:00", 1, true)
            .await
            .unwrap();

        let outcome = SlotService::delete_slot(&state, &origin.id).await.unwrap();
        let DeleteOutcome::MarkedAsException { exception_id } = outcome else {
            panic!("expected exception outcome");
        };
        assert!(exception_id.starts_with("exception_"));

        // No replacement: the date shows no slot, but the row survives as a
        // marker.
        assert!(SlotService::get_range(&state, "2024-01-01", "2024-01-01")
            .await
            .unwrap()
            .is_empty());
        assert!(crate::db::SlotRepository::find_by_id(&state.db, &origin.id)
            .await
            .unwrap()
            .is_some());

        // Deleting the marker itself removes the row for good.
        let outcome = SlotService::delete_slot(&state, &origin.id).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
    }

    #[tokio::test]
    async fn series_delete_removes_every_member() {
        let state = test_state().await;

        let origin = create(&state, "2024-01-01", "09:00", "10:00", 1, true)
            .await
            .unwrap();
        crate::services::expansion::ExpansionService::run_once(&state)
            .await
            .unwrap();

        // Shadow one member first; series delete ignores exception state.
        SlotService::delete_slot(&state, &origin.id).await.unwrap();

        let deleted = SlotService::delete_series(&state, &origin.id).await.unwrap();
        assert_eq!(deleted, 13);

        assert!(SlotService::get_range(&state, "2024-01-01", "2024-12-31")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn series_delete_cancels_unprocessed_expansion() {
        let state = test_state().await;

        let origin = create(&state, "2024-01-01", "09:00", "10:00", 1, true)
            .await
            .unwrap();
        let series_id = origin.series_id.clone().unwrap();

        // Delete before the worker has touched the queue.
        let deleted = SlotService::delete_series(&state, &origin.id).await.unwrap();
        assert_eq!(deleted, 1);

        // The worker finds nothing to do and nothing reappears.
        assert_eq!(
            crate::services::expansion::ExpansionService::run_once(&state)
                .await
                .unwrap(),
            0
        );
        assert!(SlotService::get_range(&state, "2024-01-01", "2024-12-31")
            .await
            .unwrap()
            .is_empty());

        let counts =
            ExpansionQueueRepository::counts_by_status_for_series(&state.db, &series_id)
                .await
                .unwrap();
        assert_eq!(counts.get(crate::db::task_status::SKIPPED), Some(&12));
    }

    #[tokio::test]
    async fn series_delete_on_a_one_off_is_invalid() {
        let state = test_state().await;

        let slot = create(&state, "2024-01-01", "09:00", "10:00", 1, false)
            .await
            .unwrap();
        let err = SlotService::delete_series(&state, &slot.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn unknown_ids_surface_not_found() {
        let state = test_state().await;

        let missing = "b2ab6a33-0000-0000-0000-000000000000";
        assert!(matches!(
            SlotService::update_slot(&state, missing, UpdateSlot::default())
                .await
                .unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            SlotService::delete_slot(&state, missing).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            SlotService::delete_series(&state, missing).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn range_read_requires_well_formed_dates() {
        let state = test_state().await;

        let err = SlotService::get_range(&state, "2024/01/01", "2024-01-07")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
