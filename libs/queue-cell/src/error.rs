use thiserror::Error;
use uuid::Uuid;

use shared_utils::locks::LockTimeout;

use crate::models::{QueueCategory, QueueNumber, VisitStatus};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Visit not found: {0}")]
    VisitNotFound(Uuid),

    #[error("Patient {patient_id} is already in the queue as {queue_number}")]
    AlreadyActive {
        patient_id: Uuid,
        visit_id: Uuid,
        queue_number: QueueNumber,
    },

    #[error("Invalid visit status transition from {from} to {to}")]
    InvalidTransition { from: VisitStatus, to: VisitStatus },

    #[error("No patients waiting in the {category} queue")]
    EmptyQueue { category: QueueCategory },

    #[error("Visit {0} changed after it was written; not restored")]
    Superseded(Uuid),

    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl QueueError {
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, QueueError::LockTimeout(_) | QueueError::Storage(_))
    }
}
