use axum::http::StatusCode;
use chrono::NaiveTime;
use thiserror::Error;
use uuid::Uuid;

use appointment_cell::models::{AppointmentError, AppointmentStatus};
use doctor_cell::models::AvailabilityError;
use queue_cell::error::QueueError;
use shared_models::error::AppError;

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error(transparent)]
    Appointment(#[from] AppointmentError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Patient {0} is not registered")]
    PatientNotFound(Uuid),

    #[error("Patient registry unavailable: {0}")]
    PatientDirectory(String),

    #[error(
        "Interval {}-{} is outside the doctor's working hours",
        .start.format("%H:%M"),
        .end.format("%H:%M")
    )]
    OutsideShift {
        doctor_id: Uuid,
        start: NaiveTime,
        end: NaiveTime,
    },

    #[error("Status {0} is driven by the patient queue, not by appointment updates")]
    QueueManagedStatus(AppointmentStatus),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl SchedulingError {
    /// Faults outside the caller's control. These abort a use case and trigger
    /// compensation; business rejections do not.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            SchedulingError::Appointment(e) => e.is_infrastructure(),
            SchedulingError::Queue(e) => e.is_infrastructure(),
            SchedulingError::PatientDirectory(_) => true,
            _ => false,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            SchedulingError::Availability(AvailabilityError::InvalidConfiguration(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_configuration")
            }
            SchedulingError::Appointment(e) => match e {
                AppointmentError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                AppointmentError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
                AppointmentError::PastTime { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "past_time"),
                AppointmentError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
                AppointmentError::NotReschedulable(_) => (StatusCode::CONFLICT, "not_reschedulable"),
                AppointmentError::CheckInNotToday { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "check_in_not_today")
                }
                AppointmentError::NoShowNotEligible(_) => (StatusCode::CONFLICT, "no_show_not_eligible"),
                AppointmentError::DuplicateRequest { .. } => (StatusCode::CONFLICT, "duplicate_request"),
                AppointmentError::Superseded(_) => (StatusCode::CONFLICT, "superseded"),
                AppointmentError::InvalidConfiguration(_) => (StatusCode::BAD_REQUEST, "invalid_configuration"),
                AppointmentError::LockTimeout(_) => (StatusCode::SERVICE_UNAVAILABLE, "lock_timeout"),
                AppointmentError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            },
            SchedulingError::Queue(e) => match e {
                QueueError::VisitNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                QueueError::AlreadyActive { .. } => (StatusCode::CONFLICT, "already_active"),
                QueueError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
                QueueError::EmptyQueue { .. } => (StatusCode::NOT_FOUND, "empty_queue"),
                QueueError::Superseded(_) => (StatusCode::CONFLICT, "superseded"),
                QueueError::LockTimeout(_) => (StatusCode::SERVICE_UNAVAILABLE, "lock_timeout"),
                QueueError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            },
            SchedulingError::PatientNotFound(_) => (StatusCode::NOT_FOUND, "patient_not_found"),
            SchedulingError::PatientDirectory(_) => (StatusCode::BAD_GATEWAY, "patient_directory"),
            SchedulingError::OutsideShift { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "outside_shift"),
            SchedulingError::QueueManagedStatus(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "queue_managed_status")
            }
            SchedulingError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
        }
    }
}

impl From<SchedulingError> for AppError {
    fn from(err: SchedulingError) -> Self {
        let (status, code) = err.status_and_code();
        AppError::Rejected {
            status,
            code,
            message: err.to_string(),
        }
    }
}
