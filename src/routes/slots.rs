use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{ExpansionQueueRepository, Slot, SlotRepository, UpdateSlot};
use crate::error::{AppError, AppResult};
use crate::services::slots::{DeleteOutcome, SlotService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_week_slots).post(create_slot))
        .route("/:id", put(update_slot).delete(delete_slot))
        .route("/:id/series", delete(delete_slot_series))
        .route("/:id/expansion", get(get_expansion_status))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    #[serde(rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSlotRequest {
    pub start_time: String,
    pub end_time: String,
    pub day_of_week: i64,
    pub date: String,
    #[serde(default)]
    pub is_recurring: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSlotRequest {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_recurring: Option<bool>,
    pub exception_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SlotResponse {
    pub id: String,
    pub start_time: String,
    pub end_time: String,
    pub day_of_week: i64,
    pub date: String,
    pub is_recurring: bool,
    pub series_id: Option<String>,
    pub exception_id: Option<String>,
}

impl From<Slot> for SlotResponse {
    fn from(slot: Slot) -> Self {
        SlotResponse {
            id: slot.id,
            start_time: slot.start_time,
            end_time: slot.end_time,
            day_of_week: slot.day_of_week,
            date: slot.date,
            is_recurring: slot.is_recurring,
            series_id: slot.series_id,
            exception_id: slot.exception_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WeekSlotsResponse {
    #[serde(rename = "startDate")]
    pub start_date: String,
    #[serde(rename = "endDate")]
    pub end_date: String,
    pub slots: Vec<SlotResponse>,
}

#[derive(Debug, Serialize)]
pub struct CreateSlotResponse {
    #[serde(flatten)]
    pub slot: SlotResponse,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteSlotResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteSeriesResponse {
    pub message: String,
    pub deleted_count: u64,
}

#[derive(Debug, Serialize)]
pub struct ExpansionStatusResponse {
    pub series_id: String,
    /// Occurrences currently stored for the series, the origin included.
    pub members: usize,
    pub counts: HashMap<String, i64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Active slots in an inclusive date range, sorted by date then start time.
async fn get_week_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> AppResult<Json<WeekSlotsResponse>> {
    let (Some(start_date), Some(end_date)) = (query.start_date, query.end_date) else {
        return Err(AppError::BadRequest(
            "startDate and endDate are required".to_string(),
        ));
    };

    let slots = SlotService::get_range(&state, &start_date, &end_date).await?;

    Ok(Json(WeekSlotsResponse {
        start_date,
        end_date,
        slots: slots.into_iter().map(Into::into).collect(),
    }))
}

/// Create a slot; a recurring one also gets its future weeks enqueued for
/// expansion.
async fn create_slot(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSlotRequest>,
) -> AppResult<(StatusCode, Json<CreateSlotResponse>)> {
    let slot = SlotService::create_slot(
        &state,
        &body.start_time,
        &body.end_time,
        body.day_of_week,
        &body.date,
        body.is_recurring,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSlotResponse {
            slot: slot.into(),
            message: "Slot created successfully".to_string(),
        }),
    ))
}

/// Edit a slot; editing an untouched recurring occurrence shadows it and
/// returns the replacement row.
async fn update_slot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSlotRequest>,
) -> AppResult<Json<SlotResponse>> {
    let updates = UpdateSlot {
        start_time: body.start_time,
        end_time: body.end_time,
        is_recurring: body.is_recurring,
        exception_id: body.exception_id,
    };

    let slot = SlotService::update_slot(&state, &id, updates).await?;
    Ok(Json(slot.into()))
}

/// Delete a single occurrence. A recurring, non-shadowed target is marked as
/// an exception instead of being removed, and the response says so.
async fn delete_slot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<DeleteSlotResponse>> {
    let response = match SlotService::delete_slot(&state, &id).await? {
        DeleteOutcome::MarkedAsException { exception_id } => DeleteSlotResponse {
            message: "Recurring slot marked as exception for this date".to_string(),
            exception_id: Some(exception_id),
        },
        DeleteOutcome::Deleted => DeleteSlotResponse {
            message: "Slot deleted successfully".to_string(),
            exception_id: None,
        },
    };

    Ok(Json(response))
}

/// Delete every occurrence of the target slot's recurring series.
async fn delete_slot_series(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<DeleteSeriesResponse>> {
    let deleted_count = SlotService::delete_series(&state, &id).await?;

    Ok(Json(DeleteSeriesResponse {
        message: format!("Deleted {} slots from recurring series", deleted_count),
        deleted_count,
    }))
}

/// Expansion progress for the target slot's series: task counts by status.
async fn get_expansion_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ExpansionStatusResponse>> {
    let slot = SlotRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("The specified slot does not exist".to_string()))?;

    let Some(series_id) = slot.series_id else {
        return Err(AppError::InvalidOperation(
            "This slot is not part of a recurring series".to_string(),
        ));
    };

    let members = SlotRepository::find_by_series(&state.db, &series_id).await?.len();
    let counts = ExpansionQueueRepository::counts_by_status_for_series(&state.db, &series_id)
        .await?;

    Ok(Json(ExpansionStatusResponse {
        series_id,
        members,
        counts,
    }))
}
