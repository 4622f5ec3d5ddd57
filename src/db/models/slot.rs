use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A single availability slot occurrence anchored to a calendar date.
///
/// Recurring slots are stored as one row per weekly occurrence; all members
/// of a series share the same `series_id`. Overriding a single occurrence
/// never mutates the rest of the series: the targeted row is stamped with an
/// `exception_id` (making it a shadow marker, invisible to active views) and,
/// for edits, a plain replacement row carries the user's intended state for
/// that date.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Slot {
    /// Primary key (UUID), minted at creation and never reused.
    pub id: String,

    /// Start of the slot, local time-of-day as a zero-padded `HH:MM` string.
    pub start_time: String,

    /// End of the slot, `HH:MM`. Always lexically greater than `start_time`.
    pub end_time: String,

    /// Weekday 0-6, Sunday = 0. Stored redundantly for query convenience and
    /// kept from the series origin on expanded occurrences, so it may differ
    /// from the weekday of `date` on drifted instances.
    pub day_of_week: i64,

    /// Calendar date `YYYY-MM-DD`, immutable once created.
    pub date: String,

    /// Whether this occurrence is (or originated from) a weekly template.
    pub is_recurring: bool,

    /// Series identifier shared by every occurrence of a recurring slot.
    /// `None` for one-off slots and for exception replacement rows.
    pub series_id: Option<String>,

    /// Shadow marker. Non-empty means this occurrence has been overridden
    /// for its date and is excluded from active views and capacity counts.
    pub exception_id: Option<String>,

    /// Creation timestamp
    pub created_at: NaiveDateTime,

    /// Last update timestamp
    pub updated_at: NaiveDateTime,
}

/// Data required to insert a new slot occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSlot {
    pub start_time: String,
    pub end_time: String,
    pub day_of_week: i64,
    pub date: String,
    pub is_recurring: bool,
    pub series_id: Option<String>,
}

/// Partial update applied to an existing slot. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSlot {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_recurring: Option<bool>,
    pub exception_id: Option<String>,
}

/// How the exception resolver treats a stored slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDisposition {
    /// Plain one-off occurrence; edits and deletes apply directly.
    OneOff,
    /// Untouched member of a recurring series (the origin row is itself the
    /// week-zero instance); edits and deletes shadow it instead.
    SeriesInstance,
    /// Already-shadowed row; treated like a plain occurrence.
    Excepted,
}

impl Slot {
    /// True when the row carries a non-empty exception marker.
    pub fn is_excepted(&self) -> bool {
        matches!(&self.exception_id, Some(e) if !e.is_empty())
    }

    pub fn disposition(&self) -> SlotDisposition {
        if self.is_excepted() {
            SlotDisposition::Excepted
        } else if self.is_recurring {
            SlotDisposition::SeriesInstance
        } else {
            SlotDisposition::OneOff
        }
    }
}
