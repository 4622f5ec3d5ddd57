use std::sync::Arc;

use chrono::{Days, Duration, NaiveDate, Utc};

use crate::config::ExpansionConfig;
use crate::db::{
    CreateExpansionTask, CreateSlot, ExpansionQueueRepository, ExpansionTask, Slot,
    SlotRepository,
};
use crate::error::{AppError, AppResult};
use crate::services::capacity::MAX_ACTIVE_SLOTS_PER_DATE;
use crate::AppState;

/// Number of future weekly occurrences synthesized for a recurring slot.
pub const EXPANSION_HORIZON_WEEKS: u64 = 12;

/// The recurrence expander.
///
/// A recurring creation enqueues one durable task per future week; the
/// background worker claims due tasks and materializes the occurrences.
/// Every task is an independent unit of work: a skipped or failed week never
/// cancels, retries, or reorders the others, and nothing here ever
/// propagates back to the creation request.
pub struct ExpansionService;

impl ExpansionService {
    /// Enqueue the expansion tasks for a newly created recurring slot.
    /// Returns the number of weeks enqueued; failures are logged per week.
    pub async fn schedule(state: &Arc<AppState>, slot: &Slot) -> usize {
        let Some(series_id) = slot.series_id.clone() else {
            tracing::warn!("Recurring slot {} has no series id; skipping expansion", slot.id);
            return 0;
        };
        let origin = match NaiveDate::parse_from_str(&slot.date, "%Y-%m-%d") {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(
                    "Cannot expand slot {}: unparseable date {}: {}",
                    slot.id,
                    slot.date,
                    e
                );
                return 0;
            }
        };

        let mut enqueued = 0usize;
        for week in 1..=EXPANSION_HORIZON_WEEKS {
            // Each future instance lands one calendar day after the naive
            // same-weekday projection. The shift is a deliberate policy of
            // the product, applied uniformly; the weekday label stays the
            // origin's.
            let Some(target) = origin.checked_add_days(Days::new(week * 7 + 1)) else {
                tracing::warn!("Week {} of series {} overflows the calendar", week, series_id);
                continue;
            };

            let task = CreateExpansionTask {
                series_id: series_id.clone(),
                origin_slot_id: slot.id.clone(),
                week_index: week as i64,
                target_date: target.format("%Y-%m-%d").to_string(),
                start_time: slot.start_time.clone(),
                end_time: slot.end_time.clone(),
                day_of_week: slot.day_of_week,
                max_attempts: Some(i64::from(state.config.expansion.max_attempts)),
            };

            match ExpansionQueueRepository::create(&state.db, task).await {
                Ok(_) => enqueued += 1,
                Err(e) => tracing::warn!(
                    "Failed to enqueue expansion week {} for series {}: {:?}",
                    week,
                    series_id,
                    e
                ),
            }
        }

        tracing::debug!("Enqueued {} expansion tasks for series {}", enqueued, series_id);
        enqueued
    }

    /// Claim and process one batch of due tasks. Returns the number of tasks
    /// claimed.
    pub async fn run_once(state: &Arc<AppState>) -> AppResult<usize> {
        let batch = i64::from(state.config.expansion.claim_batch_size);
        let tasks = ExpansionQueueRepository::fetch_and_claim_due(&state.db, batch).await?;
        let claimed = tasks.len();

        for task in tasks {
            Self::process_task(state, task).await;
        }

        Ok(claimed)
    }

    /// Process a single claimed task. All failure handling stays local to
    /// the task: a full date or an already-present occurrence skips the
    /// week, a store failure reschedules with exponential backoff until the
    /// attempt budget runs out.
    async fn process_task(state: &Arc<AppState>, task: ExpansionTask) {
        let create = CreateSlot {
            start_time: task.start_time.clone(),
            end_time: task.end_time.clone(),
            day_of_week: task.day_of_week,
            date: task.target_date.clone(),
            is_recurring: true,
            series_id: Some(task.series_id.clone()),
        };

        let outcome =
            SlotRepository::create_if_capacity(&state.db, create, MAX_ACTIVE_SLOTS_PER_DATE)
                .await;

        let recorded = match outcome {
            Ok(Some(slot)) => {
                tracing::debug!(
                    "Expanded series {} week {} onto {}",
                    task.series_id,
                    task.week_index,
                    slot.date
                );
                ExpansionQueueRepository::mark_completed(&state.db, &task.id).await
            }
            Ok(None) => {
                tracing::info!("Skipping {}: already at capacity", task.target_date);
                ExpansionQueueRepository::mark_skipped(
                    &state.db,
                    &task.id,
                    Some("date already at capacity"),
                )
                .await
            }
            Err(AppError::DuplicateSlot(msg)) => {
                tracing::info!("Skipping {}: {}", task.target_date, msg);
                ExpansionQueueRepository::mark_skipped(&state.db, &task.id, Some(&msg)).await
            }
            Err(e) => Self::handle_failure(state, &task, &e).await,
        };

        if let Err(e) = recorded {
            tracing::warn!("Failed to record outcome for expansion task {}: {:?}", task.id, e);
        }
    }

    async fn handle_failure(
        state: &Arc<AppState>,
        task: &ExpansionTask,
        error: &AppError,
    ) -> AppResult<()> {
        let attempts = task.attempts + 1;
        let message = error.to_string();

        if attempts >= task.max_attempts {
            tracing::warn!(
                "Expansion task {} dead after {} attempts: {}",
                task.id,
                attempts,
                message
            );
            return ExpansionQueueRepository::mark_dead(&state.db, &task.id, &message).await;
        }

        let backoff = Self::backoff_seconds(&state.config.expansion, task.attempts);
        let next_attempt_at = Utc::now().naive_utc() + Duration::seconds(backoff as i64);
        tracing::warn!(
            "Expansion task {} failed (attempt {}), retrying in {}s: {}",
            task.id,
            attempts,
            backoff,
            message
        );
        ExpansionQueueRepository::reschedule(&state.db, &task.id, attempts, next_attempt_at, &message)
            .await
    }

    fn backoff_seconds(config: &ExpansionConfig, prior_attempts: i64) -> u64 {
        let exp = prior_attempts.clamp(0, 16) as u32;
        config
            .initial_backoff_seconds
            .saturating_mul(1u64 << exp)
            .min(config.max_backoff_seconds)
    }
}
