use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::NaiveDate;
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use queue_cell::models::QueueCategory;
use shared_models::{auth::User, error::AppError};
use shared_utils::extractor::require_staff;

use crate::models::{
    AdvanceRequest, BookAppointmentRequest, CancelRequest, CheckInRequest, RescheduleRequest,
    ShiftRequest, TriageRequest, UpdateAppointmentRequest, WalkInRequest,
};
use crate::router::SchedulingState;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub service_day: Option<NaiveDate>,
    pub category: Option<QueueCategory>,
}

// ==============================================================================
// DOCTOR CALENDAR HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_doctor_availability(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let date = query.date.unwrap_or_else(|| state.facade.today());
    let view = state.facade.get_availability(doctor_id, date).await?;

    Ok(Json(json!(view.summary())))
}

#[axum::debug_handler]
pub async fn set_doctor_shift(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<ShiftRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let shift = state.facade.set_doctor_shift(doctor_id, request).await?;

    Ok(Json(json!({
        "success": true,
        "shift": shift
    })))
}

#[axum::debug_handler]
pub async fn get_doctor_appointments(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let date = query.date.unwrap_or_else(|| state.facade.today());
    let appointments = state.facade.doctor_schedule(doctor_id, date).await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": date,
        "appointments": appointments,
        "total": appointments.len()
    })))
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Json(mut request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    if request.idempotency_key.is_none() {
        request.idempotency_key = headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    let appointment = state.facade.book_appointment(request, &user.id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment_id": appointment.id,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let appointments = state
        .facade
        .search_appointments(query.q.as_deref().unwrap_or_default())
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let appointment = state.facade.get_appointment(appointment_id).await?;

    Ok(Json(json!({ "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let appointment = state
        .facade
        .update_appointment(appointment_id, request, &user.id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let appointment = state
        .facade
        .reschedule_appointment(appointment_id, request, &user.id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let appointment = state
        .facade
        .cancel_appointment(appointment_id, &request.reason, &user.id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn check_in_appointment(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CheckInRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let outcome = state.facade.check_in(appointment_id, request, &user.id).await?;

    Ok(Json(json!({
        "success": true,
        "queue_number": outcome.queue_number,
        "visit": outcome.visit,
        "appointment": outcome.appointment
    })))
}

#[axum::debug_handler]
pub async fn mark_appointment_no_show(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let appointment = state.facade.mark_appointment_no_show(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

// ==============================================================================
// QUEUE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn register_walk_in(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Json(request): Json<WalkInRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let visit = state.facade.register_walk_in(request, &user.id).await?;

    Ok(Json(json!({
        "success": true,
        "queue_number": visit.queue_number,
        "visit": visit
    })))
}

#[axum::debug_handler]
pub async fn list_queue(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let snapshot = state.facade.list_queue(query.service_day, query.category).await?;

    Ok(Json(json!({
        "service_day": snapshot.service_day,
        "waiting": snapshot.waiting_count(),
        "visits": snapshot.visits
    })))
}

#[axum::debug_handler]
pub async fn call_next(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(category): Path<QueueCategory>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let visit = state.facade.call_next(category, &user.id).await?;

    Ok(Json(json!({
        "success": true,
        "queue_number": visit.queue_number,
        "visit": visit
    })))
}

#[axum::debug_handler]
pub async fn get_visit(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(visit_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let (visit, position) = state.facade.get_visit(visit_id).await?;

    Ok(Json(json!({
        "visit": visit,
        "position": position
    })))
}

#[axum::debug_handler]
pub async fn call_visit(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(visit_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let visit = state.facade.call_visit(visit_id, &user.id).await?;
    Ok(Json(json!({ "success": true, "visit": visit })))
}

#[axum::debug_handler]
pub async fn recall_visit(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(visit_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let visit = state.facade.recall_visit(visit_id).await?;
    Ok(Json(json!({ "success": true, "visit": visit })))
}

#[axum::debug_handler]
pub async fn complete_visit(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(visit_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let visit = state.facade.complete_visit(visit_id, &user.id).await?;
    Ok(Json(json!({ "success": true, "visit": visit })))
}

#[axum::debug_handler]
pub async fn cancel_visit(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(visit_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let visit = state.facade.cancel_visit(visit_id, &request.reason, &user.id).await?;
    Ok(Json(json!({ "success": true, "visit": visit })))
}

#[axum::debug_handler]
pub async fn mark_visit_no_show(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(visit_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let visit = state.facade.mark_visit_no_show(visit_id, &user.id).await?;
    Ok(Json(json!({ "success": true, "visit": visit })))
}

#[axum::debug_handler]
pub async fn update_visit_triage(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(visit_id): Path<Uuid>,
    Json(request): Json<TriageRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let visit = state.facade.update_triage(visit_id, request.priority).await?;
    Ok(Json(json!({ "success": true, "visit": visit })))
}

#[axum::debug_handler]
pub async fn advance_visit(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(visit_id): Path<Uuid>,
    Json(request): Json<AdvanceRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let visit = state.facade.advance_visit(visit_id, request.stage).await?;
    Ok(Json(json!({ "success": true, "visit": visit })))
}

/// Server-sent stream of queue events for display boards.
pub async fn queue_events(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    require_staff(&user)?;
    debug!("User {} subscribed to queue events", user.id);

    let receiver = state.facade.subscribe();
    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let sse = Event::default().event(event.kind.as_str()).json_data(&event);
                    return Some((sse, receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Queue event subscriber lagged, skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
