use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate, NaiveTime};
use std::fmt;
use thiserror::Error;

use doctor_cell::models::{hhmm, BookedInterval, TimeSlot};
use shared_utils::locks::LockTimeout;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: Option<String>,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub purpose: String,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub created_by: String,
    pub queue_number: Option<String>,
    pub visit_id: Option<Uuid>,
    pub cancellation: Option<Cancellation>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn interval(&self) -> TimeSlot {
        TimeSlot::new(self.start_time, self.end_time)
    }

    pub fn booked_interval(&self) -> BookedInterval {
        BookedInterval {
            appointment_id: self.id,
            slot: self.interval(),
        }
    }

    pub fn doctor_day(&self) -> DoctorDay {
        DoctorDay::new(self.doctor_id, self.date)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    CheckedIn,
    InConsultation,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Active appointments hold their interval on the doctor's calendar.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled
                | AppointmentStatus::Confirmed
                | AppointmentStatus::CheckedIn
                | AppointmentStatus::InConsultation
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn allows_rescheduling(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::CheckedIn => write!(f, "checked-in"),
            AppointmentStatus::InConsultation => write!(f, "in-consultation"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no-show"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_by: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Lock and index key of the conflict invariant: one doctor on one clinic day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DoctorDay {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

impl DoctorDay {
    pub fn new(doctor_id: Uuid, date: NaiveDate) -> Self {
        Self { doctor_id, date }
    }
}

impl fmt::Display for DoctorDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.doctor_id, self.date)
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct BookAppointment {
    pub patient_id: Uuid,
    pub patient_name: Option<String>,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub purpose: String,
    pub notes: Option<String>,
    pub created_by: String,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentUpdate {
    pub date: Option<NaiveDate>,
    pub slot: Option<TimeSlot>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub purpose: Option<String>,
    pub notes: Option<String>,
}

impl AppointmentUpdate {
    pub fn status(status: AppointmentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn reschedule(date: NaiveDate, slot: TimeSlot) -> Self {
        Self {
            date: Some(date),
            slot: Some(slot),
            ..Self::default()
        }
    }

    /// Whether applying this update moves the appointment on the calendar.
    pub fn moves(&self, current: &Appointment) -> bool {
        self.date.is_some_and(|d| d != current.date)
            || self.slot.is_some_and(|s| s != current.interval())
            || self.doctor_id.is_some_and(|d| d != current.doctor_id)
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum AppointmentError {
    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    #[error("Requested interval {requested} overlaps {} existing booking(s)", .conflicting.len())]
    Conflict {
        requested: TimeSlot,
        conflicting: Vec<BookedInterval>,
    },

    #[error("Start time {} on {date} is in the past", .start.format("%H:%M"))]
    PastTime { date: NaiveDate, start: NaiveTime },

    #[error("Appointment cannot move from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment in status {0} can no longer be rescheduled")]
    NotReschedulable(AppointmentStatus),

    #[error("Appointment is booked for {date}; check-in is only possible on that day")]
    CheckInNotToday { date: NaiveDate },

    #[error("Appointment {0} cannot be marked no-show before its end time has passed")]
    NoShowNotEligible(Uuid),

    #[error("Appointment {0} changed after it was written; not restored")]
    Superseded(Uuid),

    #[error("Request already processed as appointment {appointment_id}")]
    DuplicateRequest { appointment_id: Uuid },

    #[error("Invalid appointment: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AppointmentError {
    /// Infrastructure faults, as opposed to business-rule rejections.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, AppointmentError::LockTimeout(_) | AppointmentError::Storage(_))
    }
}
