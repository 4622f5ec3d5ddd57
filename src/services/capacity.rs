use sqlx::SqlitePool;

use crate::db::SlotRepository;
use crate::error::AppResult;

/// Hard cap on active (non-shadowed) occurrences per calendar date.
pub const MAX_ACTIVE_SLOTS_PER_DATE: i64 = 2;

/// The per-date capacity rule.
///
/// `can_add` is a fast pre-check used to reject requests before any write;
/// the authoritative guard is `SlotRepository::create_if_capacity`, which
/// re-counts inside the insert transaction. The recurrence expander applies
/// the same rule independently for every future date it touches.
pub struct CapacityPolicy;

impl CapacityPolicy {
    pub async fn can_add(pool: &SqlitePool, date: &str) -> AppResult<bool> {
        let active = SlotRepository::count_active_by_date(pool, date).await?;
        Ok(active < MAX_ACTIVE_SLOTS_PER_DATE)
    }
}
