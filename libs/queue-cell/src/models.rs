use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use crate::services::numbering::QueueNumber;

/// Sub-queues of the front desk; each has its own number sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueueCategory {
    Consultation,
    Pharmacy,
    Billing,
}

impl QueueCategory {
    pub const ALL: [QueueCategory; 3] = [
        QueueCategory::Consultation,
        QueueCategory::Pharmacy,
        QueueCategory::Billing,
    ];

    pub fn prefix(&self) -> char {
        match self {
            QueueCategory::Consultation => 'C',
            QueueCategory::Pharmacy => 'P',
            QueueCategory::Billing => 'B',
        }
    }

    pub fn from_prefix(prefix: char) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.prefix() == prefix)
    }
}

impl fmt::Display for QueueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueCategory::Consultation => write!(f, "consultation"),
            QueueCategory::Pharmacy => write!(f, "pharmacy"),
            QueueCategory::Billing => write!(f, "billing"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriagePriority {
    Critical,
    High,
    Medium,
    Low,
    /// Missing or unrecognised triage; sorts after `Low`.
    #[default]
    #[serde(other)]
    Unknown,
}

impl TriagePriority {
    pub fn rank(&self) -> u8 {
        match self {
            TriagePriority::Critical => 1,
            TriagePriority::High => 2,
            TriagePriority::Medium => 3,
            TriagePriority::Low => 4,
            TriagePriority::Unknown => 5,
        }
    }
}

impl fmt::Display for TriagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriagePriority::Critical => write!(f, "critical"),
            TriagePriority::High => write!(f, "high"),
            TriagePriority::Medium => write!(f, "medium"),
            TriagePriority::Low => write!(f, "low"),
            TriagePriority::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum QueueStatus {
    Waiting,
    InProgress,
    Completed,
    Cancelled,
}

impl QueueStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Waiting | QueueStatus::InProgress)
    }
}

/// The single source of truth for where a visit stands. The coarser
/// [`QueueStatus`] is derived from it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum VisitStatus {
    CheckedIn,
    InConsultation,
    WaitingPrescription,
    ToBeBilled,
    ReadyForCheckout,
    Completed,
    Cancelled,
    NoShow,
}

impl VisitStatus {
    pub fn queue_status(&self) -> QueueStatus {
        match self {
            VisitStatus::CheckedIn => QueueStatus::Waiting,
            VisitStatus::InConsultation
            | VisitStatus::WaitingPrescription
            | VisitStatus::ToBeBilled
            | VisitStatus::ReadyForCheckout => QueueStatus::InProgress,
            VisitStatus::Completed => QueueStatus::Completed,
            VisitStatus::Cancelled | VisitStatus::NoShow => QueueStatus::Cancelled,
        }
    }

    pub fn is_active(&self) -> bool {
        self.queue_status().is_active()
    }

    /// Post-consultation workflow stages reachable through `advance`.
    pub fn is_workflow_stage(&self) -> bool {
        matches!(
            self,
            VisitStatus::WaitingPrescription | VisitStatus::ToBeBilled | VisitStatus::ReadyForCheckout
        )
    }

    pub fn valid_transitions(&self) -> &'static [VisitStatus] {
        use VisitStatus::*;
        match self {
            CheckedIn => &[InConsultation, Cancelled, NoShow],
            // Back to CheckedIn is a recall.
            InConsultation => &[CheckedIn, WaitingPrescription, ToBeBilled, ReadyForCheckout, Completed, Cancelled],
            WaitingPrescription => &[ToBeBilled, ReadyForCheckout, Completed, Cancelled],
            ToBeBilled => &[ReadyForCheckout, Completed, Cancelled],
            ReadyForCheckout => &[Completed, Cancelled],
            Completed | Cancelled | NoShow => &[],
        }
    }

    pub fn can_transition_to(&self, next: VisitStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VisitStatus::CheckedIn => "checked-in",
            VisitStatus::InConsultation => "in-consultation",
            VisitStatus::WaitingPrescription => "waiting-prescription",
            VisitStatus::ToBeBilled => "to-be-billed",
            VisitStatus::ReadyForCheckout => "ready-for-checkout",
            VisitStatus::Completed => "completed",
            VisitStatus::Cancelled => "cancelled",
            VisitStatus::NoShow => "no-show",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Visit {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub service_day: NaiveDate,
    pub category: QueueCategory,
    pub queue_number: QueueNumber,
    /// Arrival order across all sub-queues of the day; the ordering tie-break.
    pub arrival_seq: u64,
    pub triage_priority: TriagePriority,
    pub queue_status: QueueStatus,
    pub visit_status: VisitStatus,
    pub reason: String,
    pub arrival_time: DateTime<Utc>,
    pub called_time: Option<DateTime<Utc>>,
    pub recall_count: u32,
    pub assigned_doctor_id: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub admitted_by: String,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Visit {
    /// Keeps `queue_status` in step with `visit_status`.
    pub fn set_status(&mut self, status: VisitStatus) {
        self.visit_status = status;
        self.queue_status = status.queue_status();
    }

    pub fn is_active(&self) -> bool {
        self.visit_status.is_active()
    }

    pub fn is_waiting(&self) -> bool {
        self.visit_status == VisitStatus::CheckedIn
    }
}

#[derive(Debug, Clone)]
pub struct AdmitVisit {
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub triage_priority: TriagePriority,
    pub doctor_id: Option<Uuid>,
    pub category: QueueCategory,
    pub reason: String,
    pub admitted_by: String,
}

/// An active visit with its derived 1-based position in its sub-queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedVisit {
    pub position: usize,
    #[serde(flatten)]
    pub visit: Visit,
}

/// Counter scope: per-category queue numbers or (`scope: None`) the
/// day-wide arrival sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    pub service_day: NaiveDate,
    pub scope: Option<QueueCategory>,
}
