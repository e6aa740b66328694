use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::SchedulingConfig;
use shared_utils::clock::ClinicClock;
use shared_utils::locks::KeyedLocks;

use crate::error::QueueError;
use crate::models::{
    AdmitVisit, QueueCategory, QueuedVisit, SequenceKey, TriagePriority, Visit, VisitStatus,
};
use crate::services::events::{QueueEventBus, QueueEventKind, QueueEventReceiver};
use crate::services::numbering::assign_queue_number;
use crate::services::ordering::{reorder, with_positions};
use crate::services::store::VisitStore;

/// Owns the live same-day queue. Every write to a service day happens under
/// that day's lock and is followed by a [`QueueEvent`](crate::QueueEvent).
pub struct QueueManager {
    store: Arc<dyn VisitStore>,
    locks: KeyedLocks<NaiveDate>,
    events: QueueEventBus,
    clock: ClinicClock,
}

impl QueueManager {
    pub fn new(store: Arc<dyn VisitStore>, clock: ClinicClock, config: &SchedulingConfig) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(Duration::from_millis(config.lock_timeout_ms)),
            events: QueueEventBus::default(),
            clock,
        }
    }

    pub fn subscribe(&self) -> QueueEventReceiver {
        self.events.subscribe()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Admits a patient to today's queue. A patient holds at most one active
    /// visit per service day.
    pub async fn admit(&self, request: AdmitVisit) -> Result<Visit, QueueError> {
        let service_day = self.clock.today();
        let _guard = self.locks.acquire(&service_day).await?;

        let day = self.store.list_by_day(service_day).await?;
        if let Some(active) = day.iter().find(|v| v.patient_id == request.patient_id && v.is_active()) {
            warn!(
                "Patient {} already active as {} ({})",
                request.patient_id, active.queue_number, active.visit_status
            );
            return Err(QueueError::AlreadyActive {
                patient_id: request.patient_id,
                visit_id: active.id,
                queue_number: active.queue_number,
            });
        }

        let queue_number = assign_queue_number(self.store.as_ref(), service_day, request.category).await?;
        let arrival_seq = self
            .store
            .next_sequence(SequenceKey { service_day, scope: None })
            .await?;

        let status = VisitStatus::CheckedIn;
        let visit = Visit {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            appointment_id: request.appointment_id,
            service_day,
            category: request.category,
            queue_number,
            arrival_seq,
            triage_priority: request.triage_priority,
            queue_status: status.queue_status(),
            visit_status: status,
            reason: request.reason,
            arrival_time: self.clock.now_utc(),
            called_time: None,
            recall_count: 0,
            assigned_doctor_id: request.doctor_id,
            cancellation_reason: None,
            admitted_by: request.admitted_by,
            completed_at: None,
        };

        let visit = self.store.insert(visit).await?;
        info!(
            "Admitted patient {} as {} ({} priority)",
            visit.patient_id, visit.queue_number, visit.triage_priority
        );
        self.events.publish(QueueEventKind::Admitted, &visit, visit.arrival_time);

        Ok(visit)
    }

    /// Returns `(prior, called)`.
    pub async fn call(&self, visit_id: Uuid) -> Result<(Visit, Visit), QueueError> {
        let now = self.clock.now_utc();
        self.mutate(visit_id, QueueEventKind::Called, |visit| {
            ensure_transition(visit, VisitStatus::InConsultation)?;
            visit.set_status(VisitStatus::InConsultation);
            visit.called_time = Some(now);
            Ok(())
        })
        .await
    }

    /// Calls the head of a sub-queue. Returns `(prior, called)`.
    pub async fn call_next(
        &self,
        service_day: NaiveDate,
        category: QueueCategory,
    ) -> Result<(Visit, Visit), QueueError> {
        let _guard = self.locks.acquire(&service_day).await?;

        let waiting: Vec<Visit> = self
            .store
            .list_by_day(service_day)
            .await?
            .into_iter()
            .filter(|v| v.category == category && v.is_waiting())
            .collect();

        let mut next = reorder(waiting)
            .into_iter()
            .next()
            .ok_or(QueueError::EmptyQueue { category })?;

        let prior = next.clone();
        next.set_status(VisitStatus::InConsultation);
        next.called_time = Some(self.clock.now_utc());
        let called = self.commit(next, QueueEventKind::Called).await?;
        Ok((prior, called))
    }

    /// Sends a called patient who did not show up back to the waiting line
    /// with their original number.
    pub async fn recall(&self, visit_id: Uuid) -> Result<Visit, QueueError> {
        self.mutate(visit_id, QueueEventKind::Recalled, |visit| {
            ensure_transition(visit, VisitStatus::CheckedIn)?;
            visit.set_status(VisitStatus::CheckedIn);
            visit.called_time = None;
            visit.recall_count += 1;
            Ok(())
        })
        .await
        .map(|(_, visit)| visit)
    }

    /// Moves a visit forward through the post-consultation workflow.
    pub async fn advance(&self, visit_id: Uuid, stage: VisitStatus) -> Result<Visit, QueueError> {
        self.mutate(visit_id, QueueEventKind::Advanced, |visit| {
            if !stage.is_workflow_stage() {
                return Err(QueueError::InvalidTransition {
                    from: visit.visit_status,
                    to: stage,
                });
            }
            ensure_transition(visit, stage)?;
            visit.set_status(stage);
            Ok(())
        })
        .await
        .map(|(_, visit)| visit)
    }

    pub async fn update_triage(&self, visit_id: Uuid, priority: TriagePriority) -> Result<Visit, QueueError> {
        self.mutate(visit_id, QueueEventKind::Retriaged, |visit| {
            if !visit.is_active() {
                return Err(QueueError::InvalidTransition {
                    from: visit.visit_status,
                    to: visit.visit_status,
                });
            }
            debug!("Re-triaging {} from {} to {}", visit.queue_number, visit.triage_priority, priority);
            visit.triage_priority = priority;
            Ok(())
        })
        .await
        .map(|(_, visit)| visit)
    }

    pub async fn complete(&self, visit_id: Uuid) -> Result<(Visit, Visit), QueueError> {
        let now = self.clock.now_utc();
        self.mutate(visit_id, QueueEventKind::Completed, |visit| {
            ensure_transition(visit, VisitStatus::Completed)?;
            visit.set_status(VisitStatus::Completed);
            visit.completed_at = Some(now);
            Ok(())
        })
        .await
    }

    pub async fn cancel(&self, visit_id: Uuid, reason: &str) -> Result<(Visit, Visit), QueueError> {
        self.mutate(visit_id, QueueEventKind::Cancelled, |visit| {
            ensure_transition(visit, VisitStatus::Cancelled)?;
            visit.set_status(VisitStatus::Cancelled);
            visit.cancellation_reason = Some(reason.to_string());
            Ok(())
        })
        .await
    }

    /// Only a waiting visit can be a no-show; once called the patient was here.
    pub async fn mark_no_show(&self, visit_id: Uuid) -> Result<(Visit, Visit), QueueError> {
        self.mutate(visit_id, QueueEventKind::NoShow, |visit| {
            ensure_transition(visit, VisitStatus::NoShow)?;
            visit.set_status(VisitStatus::NoShow);
            Ok(())
        })
        .await
    }

    /// Deletes a visit outright, provided it is still exactly `written`.
    /// Reserved for undoing a failed check-in; the queue number it held is
    /// not reissued.
    pub async fn remove(&self, written: &Visit) -> Result<Visit, QueueError> {
        let _guard = self.locks.acquire(&written.service_day).await?;

        let current = self.get(written.id).await?;
        if &current != written {
            warn!("Visit {} moved on to {}, not removing it", current.queue_number, current.visit_status);
            return Err(QueueError::Superseded(current.id));
        }

        let removed = self
            .store
            .remove(written.id)
            .await?
            .ok_or(QueueError::VisitNotFound(written.id))?;

        warn!("Removed visit {} ({}) from the queue", removed.id, removed.queue_number);
        self.events.publish(QueueEventKind::Removed, &removed, self.clock.now_utc());
        Ok(removed)
    }

    /// Compensating write: puts `prior` back while the stored visit is still
    /// exactly `written`. Never gives the patient a second active visit.
    pub async fn restore(&self, prior: Visit, written: &Visit) -> Result<Visit, QueueError> {
        let _guard = self.locks.acquire(&prior.service_day).await?;

        let current = self.get(prior.id).await?;
        if &current != written {
            warn!(
                "Visit {} changed to {} since it was written as {}, leaving it",
                current.queue_number, current.visit_status, written.visit_status
            );
            return Err(QueueError::Superseded(current.id));
        }

        if prior.is_active() {
            let day = self.store.list_by_day(prior.service_day).await?;
            if let Some(active) = day
                .iter()
                .find(|v| v.id != prior.id && v.patient_id == prior.patient_id && v.is_active())
            {
                return Err(QueueError::AlreadyActive {
                    patient_id: prior.patient_id,
                    visit_id: active.id,
                    queue_number: active.queue_number,
                });
            }
        }

        let restored = self.store.save(prior).await?;
        warn!("Restored visit {} to {}", restored.queue_number, restored.visit_status);
        self.events.publish(QueueEventKind::Restored, &restored, self.clock.now_utc());
        Ok(restored)
    }

    pub async fn get(&self, visit_id: Uuid) -> Result<Visit, QueueError> {
        self.store
            .get(visit_id)
            .await?
            .ok_or(QueueError::VisitNotFound(visit_id))
    }

    /// Active visits of a service day in queue order, with positions.
    pub async fn ordered_queue(
        &self,
        service_day: NaiveDate,
        category: Option<QueueCategory>,
    ) -> Result<Vec<QueuedVisit>, QueueError> {
        let visits = self.store.list_by_day(service_day).await?;
        Ok(with_positions(visits, category))
    }

    /// 1-based rank of an active visit in its sub-queue; `None` once it has
    /// left the queue.
    pub async fn queue_position(&self, visit_id: Uuid) -> Result<Option<usize>, QueueError> {
        let visit = self.get(visit_id).await?;
        let queued = self.ordered_queue(visit.service_day, Some(visit.category)).await?;
        Ok(queued.iter().find(|q| q.visit.id == visit_id).map(|q| q.position))
    }

    /// Applies an in-place change under the visit's day lock and returns
    /// `(prior, saved)`.
    async fn mutate<F>(&self, visit_id: Uuid, kind: QueueEventKind, apply: F) -> Result<(Visit, Visit), QueueError>
    where
        F: FnOnce(&mut Visit) -> Result<(), QueueError>,
    {
        // The service day of a visit never changes, so the pre-lock read is
        // only used to pick the lock.
        let service_day = self.get(visit_id).await?.service_day;
        let _guard = self.locks.acquire(&service_day).await?;

        let prior = self.get(visit_id).await?;
        let mut visit = prior.clone();
        apply(&mut visit)?;
        let saved = self.commit(visit, kind).await?;
        Ok((prior, saved))
    }

    async fn commit(&self, visit: Visit, kind: QueueEventKind) -> Result<Visit, QueueError> {
        let saved = self.store.save(visit).await?;
        info!("Visit {} {:?}: now {}", saved.queue_number, kind, saved.visit_status);
        self.events.publish(kind, &saved, self.clock.now_utc());
        Ok(saved)
    }
}

fn ensure_transition(visit: &Visit, next: VisitStatus) -> Result<(), QueueError> {
    if visit.visit_status.can_transition_to(next) {
        return Ok(());
    }
    warn!("Visit {} cannot move from {} to {}", visit.queue_number, visit.visit_status, next);
    Err(QueueError::InvalidTransition {
        from: visit.visit_status,
        to: next,
    })
}
