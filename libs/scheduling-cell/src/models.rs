use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::models::{Appointment, AppointmentStatus};
use doctor_cell::models::{hhmm, TimeSlot};
use queue_cell::models::{QueueCategory, QueueNumber, QueuedVisit, TriagePriority, Visit, VisitStatus};

// ==============================================================================
// APPOINTMENT REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub purpose: String,
    pub notes: Option<String>,
    /// Client-generated key; a replayed booking is answered with
    /// `duplicate_request` instead of a second appointment.
    pub idempotency_key: Option<String>,
}

impl BookAppointmentRequest {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.start_time, self.end_time)
    }
}

/// Partial update. Omitted fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub date: Option<NaiveDate>,
    #[serde(default, with = "hhmm::option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "hhmm::option")]
    pub end_time: Option<NaiveTime>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub purpose: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckInRequest {
    pub triage_priority: Option<TriagePriority>,
}

// ==============================================================================
// QUEUE REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkInRequest {
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub reason: String,
    pub priority: Option<TriagePriority>,
    pub category: Option<QueueCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageRequest {
    pub priority: TriagePriority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceRequest {
    pub stage: VisitStatus,
}

// ==============================================================================
// SHIFTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftRequest {
    #[serde(with = "hhmm")]
    pub shift_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub shift_end: NaiveTime,
    pub slot_length_minutes: Option<i64>,
}

// ==============================================================================
// RESPONSES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInOutcome {
    pub queue_number: QueueNumber,
    pub visit: Visit,
    pub appointment: Appointment,
}

/// The day's queue, grouped by sub-queue in display order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub service_day: NaiveDate,
    pub visits: Vec<QueuedVisit>,
}

impl QueueSnapshot {
    pub fn waiting_count(&self) -> usize {
        self.visits.iter().filter(|q| q.visit.is_waiting()).count()
    }
}
