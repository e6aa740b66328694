use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use appointment_cell::models::{
    Appointment, AppointmentError, AppointmentStatus, AppointmentUpdate, BookAppointment,
};
use appointment_cell::services::{AppointmentLedger, AppointmentStore, InMemoryAppointmentStore};
use doctor_cell::models::{DoctorAvailabilityView, DoctorShift, TimeSlot};
use doctor_cell::services::{availability_view, ShiftDirectory};
use queue_cell::error::QueueError;
use queue_cell::models::{AdmitVisit, QueueCategory, TriagePriority, Visit, VisitStatus};
use queue_cell::services::{InMemoryVisitStore, QueueEventReceiver, QueueManager, VisitStore};
use shared_config::SchedulingConfig;
use shared_utils::clock::ClinicClock;

use crate::error::SchedulingError;
use crate::models::{
    BookAppointmentRequest, CheckInOutcome, CheckInRequest, QueueSnapshot, RescheduleRequest,
    ShiftRequest, UpdateAppointmentRequest, WalkInRequest,
};
use crate::services::patients::PatientDirectory;

const STATUS_UPDATE_REASON: &str = "status update";
const VISIT_NO_SHOW_REASON: &str = "visit marked no-show";

/// Front-desk use cases. Coordinates the calendar, the appointment ledger
/// and the live queue, and keeps appointments and visits in step.
///
/// The queue side of a check-in is compensated: when admission fails after
/// the ledger committed, the appointment is restored before the error is
/// returned. Follow-up writes on the linked record are best effort for
/// business rejections and compensated for infrastructure faults. A
/// compensation only lands while the record still holds our own write.
pub struct SchedulingFacade {
    shifts: ShiftDirectory,
    ledger: AppointmentLedger,
    queue: QueueManager,
    patients: Arc<dyn PatientDirectory>,
}

impl SchedulingFacade {
    pub fn new(
        config: &SchedulingConfig,
        clock: ClinicClock,
        appointments: Arc<dyn AppointmentStore>,
        visits: Arc<dyn VisitStore>,
        patients: Arc<dyn PatientDirectory>,
    ) -> Self {
        Self {
            shifts: ShiftDirectory::new(config),
            ledger: AppointmentLedger::new(appointments, clock.clone(), config),
            queue: QueueManager::new(visits, clock, config),
            patients,
        }
    }

    pub fn in_memory(config: &SchedulingConfig, clock: ClinicClock, patients: Arc<dyn PatientDirectory>) -> Self {
        Self::new(
            config,
            clock,
            Arc::new(InMemoryAppointmentStore::new()),
            Arc::new(InMemoryVisitStore::new()),
            patients,
        )
    }

    pub fn today(&self) -> NaiveDate {
        self.ledger.clock().today()
    }

    pub fn subscribe(&self) -> QueueEventReceiver {
        self.queue.subscribe()
    }

    // ==============================================================================
    // CALENDAR
    // ==============================================================================

    #[instrument(skip(self))]
    pub async fn get_availability(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<DoctorAvailabilityView, SchedulingError> {
        let shift = self.shifts.shift_for(doctor_id).await;
        let booked = self.ledger.booked_intervals(doctor_id, date).await?;

        let view = availability_view(&shift, date, &booked, |start| self.ledger.is_bookable(date, start))?;
        debug!("Doctor {} has {} free slot(s) on {}", doctor_id, view.free_count(), date);
        Ok(view)
    }

    #[instrument(skip(self, request))]
    pub async fn set_doctor_shift(
        &self,
        doctor_id: Uuid,
        request: ShiftRequest,
    ) -> Result<DoctorShift, SchedulingError> {
        Ok(self
            .shifts
            .set_shift(doctor_id, request.shift_start, request.shift_end, request.slot_length_minutes)
            .await?)
    }

    // ==============================================================================
    // APPOINTMENTS
    // ==============================================================================

    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id, patient_id = %request.patient_id))]
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        actor: &str,
    ) -> Result<Appointment, SchedulingError> {
        if request.purpose.trim().is_empty() {
            return Err(SchedulingError::Validation("purpose must not be empty".to_string()));
        }

        let slot = request.slot();
        self.ensure_within_shift(request.doctor_id, &slot).await?;

        let patient = self
            .patients
            .find_patient(request.patient_id)
            .await?
            .ok_or(SchedulingError::PatientNotFound(request.patient_id))?;

        let appointment = self
            .ledger
            .book(BookAppointment {
                patient_id: request.patient_id,
                patient_name: patient.full_name(),
                doctor_id: request.doctor_id,
                date: request.date,
                slot,
                purpose: request.purpose,
                notes: request.notes,
                created_by: actor.to_string(),
                idempotency_key: request.idempotency_key,
            })
            .await?;

        Ok(appointment)
    }

    #[instrument(skip(self, request))]
    pub async fn update_appointment(
        &self,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        actor: &str,
    ) -> Result<Appointment, SchedulingError> {
        let status = request.status;
        if let Some(managed) = status.filter(is_queue_managed) {
            return Err(SchedulingError::QueueManagedStatus(managed));
        }

        let current = self.ledger.get(appointment_id).await?;
        let slot = match (request.start_time, request.end_time) {
            (None, None) => None,
            (start, end) => Some(TimeSlot::new(
                start.unwrap_or(current.start_time),
                end.unwrap_or(current.end_time),
            )),
        };

        let mut changes = AppointmentUpdate {
            date: request.date,
            slot,
            doctor_id: request.doctor_id,
            status,
            purpose: request.purpose,
            notes: request.notes,
        };

        if changes.moves(&current) {
            let target = changes.slot.unwrap_or_else(|| current.interval());
            self.ensure_within_shift(changes.doctor_id.unwrap_or(current.doctor_id), &target)
                .await?;
        }

        // Cancellation also has to release the linked visit.
        if status == Some(AppointmentStatus::Cancelled) {
            changes.status = None;
            return self
                .cancel_and_release(appointment_id, changes, STATUS_UPDATE_REASON, actor)
                .await;
        }

        Ok(self.ledger.update(appointment_id, changes, actor).await?)
    }

    #[instrument(skip(self, request))]
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: RescheduleRequest,
        actor: &str,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.ledger.get(appointment_id).await?;
        let slot = TimeSlot::new(request.start_time, request.end_time);
        self.ensure_within_shift(current.doctor_id, &slot).await?;

        Ok(self
            .ledger
            .reschedule(appointment_id, request.date, slot, actor)
            .await?)
    }

    /// Cancels an appointment and, if the patient is already in the queue,
    /// the visit it produced.
    #[instrument(skip(self))]
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<Appointment, SchedulingError> {
        if reason.trim().is_empty() {
            return Err(SchedulingError::Validation("cancellation reason must not be empty".to_string()));
        }

        self.cancel_and_release(appointment_id, AppointmentUpdate::default(), reason, actor)
            .await
    }

    /// Marks the patient as arrived and admits them to today's consultation
    /// queue. A failed admission leaves the appointment as it was.
    #[instrument(skip(self, request))]
    pub async fn check_in(
        &self,
        appointment_id: Uuid,
        request: CheckInRequest,
        actor: &str,
    ) -> Result<CheckInOutcome, SchedulingError> {
        let (prior, checked_in) = self.ledger.check_in(appointment_id).await?;

        let admitted = self
            .queue
            .admit(AdmitVisit {
                patient_id: checked_in.patient_id,
                appointment_id: Some(checked_in.id),
                triage_priority: request.triage_priority.unwrap_or(TriagePriority::Low),
                doctor_id: Some(checked_in.doctor_id),
                category: QueueCategory::Consultation,
                reason: checked_in.purpose.clone(),
                admitted_by: actor.to_string(),
            })
            .await;

        let visit = match admitted {
            Ok(visit) => visit,
            Err(e) => {
                warn!("Queue admission for appointment {} failed: {}", appointment_id, e);
                self.restore_appointment(prior, &checked_in).await;
                return Err(e.into());
            }
        };

        let queue_number = visit.queue_number.to_string();
        let appointment = match self.ledger.attach_visit(appointment_id, visit.id, &queue_number).await {
            Ok(appointment) => appointment,
            Err(e) => {
                error!("Linking appointment {} to visit {} failed: {}", appointment_id, visit.id, e);
                if let Err(remove_err) = self.queue.remove(&visit).await {
                    error!("Could not withdraw visit {}: {}", visit.id, remove_err);
                }
                self.restore_appointment(prior, &checked_in).await;
                return Err(e.into());
            }
        };

        info!("Appointment {} checked in as {}", appointment_id, queue_number);
        Ok(CheckInOutcome {
            queue_number: visit.queue_number,
            visit,
            appointment,
        })
    }

    #[instrument(skip(self))]
    pub async fn mark_appointment_no_show(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        Ok(self.ledger.mark_no_show(appointment_id).await?)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        Ok(self.ledger.get(appointment_id).await?)
    }

    pub async fn search_appointments(&self, query: &str) -> Result<Vec<Appointment>, SchedulingError> {
        Ok(self.ledger.search(query).await?)
    }

    pub async fn doctor_schedule(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        Ok(self.ledger.list_by_doctor_and_date(doctor_id, date).await?)
    }

    // ==============================================================================
    // QUEUE
    // ==============================================================================

    #[instrument(skip(self, request), fields(patient_id = %request.patient_id))]
    pub async fn register_walk_in(&self, request: WalkInRequest, actor: &str) -> Result<Visit, SchedulingError> {
        if request.reason.trim().is_empty() {
            return Err(SchedulingError::Validation("visit reason must not be empty".to_string()));
        }

        self.patients
            .find_patient(request.patient_id)
            .await?
            .ok_or(SchedulingError::PatientNotFound(request.patient_id))?;

        let visit = self
            .queue
            .admit(AdmitVisit {
                patient_id: request.patient_id,
                appointment_id: None,
                triage_priority: request.priority.unwrap_or_default(),
                doctor_id: request.doctor_id,
                category: request.category.unwrap_or(QueueCategory::Consultation),
                reason: request.reason,
                admitted_by: actor.to_string(),
            })
            .await?;

        Ok(visit)
    }

    /// Cancels a visit and the checked-in appointment behind it.
    #[instrument(skip(self))]
    pub async fn cancel_visit(&self, visit_id: Uuid, reason: &str, actor: &str) -> Result<Visit, SchedulingError> {
        if reason.trim().is_empty() {
            return Err(SchedulingError::Validation("cancellation reason must not be empty".to_string()));
        }

        let (prior, cancelled) = self.queue.cancel(visit_id, reason).await?;

        if let Some(appointment_id) = cancelled.appointment_id {
            let outcome = self.ledger.cancel(appointment_id, reason, actor).await;
            self.settle_ledger_follow_up(prior, &cancelled, outcome).await?;
        }

        Ok(cancelled)
    }

    pub async fn list_queue(
        &self,
        service_day: Option<NaiveDate>,
        category: Option<QueueCategory>,
    ) -> Result<QueueSnapshot, SchedulingError> {
        let service_day = service_day.unwrap_or_else(|| self.today());
        let visits = self.queue.ordered_queue(service_day, category).await?;
        Ok(QueueSnapshot { service_day, visits })
    }

    pub async fn get_visit(&self, visit_id: Uuid) -> Result<(Visit, Option<usize>), SchedulingError> {
        let visit = self.queue.get(visit_id).await?;
        let position = self.queue.queue_position(visit_id).await?;
        Ok((visit, position))
    }

    /// Calls the head of today's `category` queue.
    #[instrument(skip(self))]
    pub async fn call_next(&self, category: QueueCategory, actor: &str) -> Result<Visit, SchedulingError> {
        let (prior, called) = self.queue.call_next(self.today(), category).await?;

        if let Some(appointment_id) = called.appointment_id {
            let outcome = self
                .ledger
                .transition(appointment_id, AppointmentStatus::InConsultation, actor)
                .await;
            self.settle_ledger_follow_up(prior, &called, outcome).await?;
        }

        Ok(called)
    }

    #[instrument(skip(self))]
    pub async fn call_visit(&self, visit_id: Uuid, actor: &str) -> Result<Visit, SchedulingError> {
        let (prior, called) = self.queue.call(visit_id).await?;

        if let Some(appointment_id) = called.appointment_id {
            let outcome = self
                .ledger
                .transition(appointment_id, AppointmentStatus::InConsultation, actor)
                .await;
            self.settle_ledger_follow_up(prior, &called, outcome).await?;
        }

        Ok(called)
    }

    pub async fn recall_visit(&self, visit_id: Uuid) -> Result<Visit, SchedulingError> {
        Ok(self.queue.recall(visit_id).await?)
    }

    #[instrument(skip(self))]
    pub async fn complete_visit(&self, visit_id: Uuid, actor: &str) -> Result<Visit, SchedulingError> {
        let (prior, completed) = self.queue.complete(visit_id).await?;

        if let Some(appointment_id) = completed.appointment_id {
            let outcome = self
                .ledger
                .transition(appointment_id, AppointmentStatus::Completed, actor)
                .await;
            self.settle_ledger_follow_up(prior, &completed, outcome).await?;
        }

        Ok(completed)
    }

    pub async fn advance_visit(&self, visit_id: Uuid, stage: VisitStatus) -> Result<Visit, SchedulingError> {
        Ok(self.queue.advance(visit_id, stage).await?)
    }

    pub async fn update_triage(&self, visit_id: Uuid, priority: TriagePriority) -> Result<Visit, SchedulingError> {
        Ok(self.queue.update_triage(visit_id, priority).await?)
    }

    /// A patient who never answered their call. The appointment behind the
    /// visit is cancelled, since it was already checked in.
    #[instrument(skip(self))]
    pub async fn mark_visit_no_show(&self, visit_id: Uuid, actor: &str) -> Result<Visit, SchedulingError> {
        let (prior, gone) = self.queue.mark_no_show(visit_id).await?;

        if let Some(appointment_id) = gone.appointment_id {
            let outcome = self.ledger.cancel(appointment_id, VISIT_NO_SHOW_REASON, actor).await;
            self.settle_ledger_follow_up(prior, &gone, outcome).await?;
        }

        Ok(gone)
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    async fn ensure_within_shift(&self, doctor_id: Uuid, slot: &TimeSlot) -> Result<(), SchedulingError> {
        let shift = self.shifts.shift_for(doctor_id).await;
        if shift.covers(slot) {
            return Ok(());
        }

        warn!("Interval {} is outside doctor {}'s shift", slot, doctor_id);
        Err(SchedulingError::OutsideShift {
            doctor_id,
            start: slot.start,
            end: slot.end,
        })
    }

    /// Cancels with any field edits in the same ledger write, then releases
    /// the visit linked to the cancelled record.
    async fn cancel_and_release(
        &self,
        appointment_id: Uuid,
        changes: AppointmentUpdate,
        reason: &str,
        actor: &str,
    ) -> Result<Appointment, SchedulingError> {
        let (prior, cancelled) = self
            .ledger
            .cancel_with(appointment_id, changes, reason, actor)
            .await?;

        if let Some(visit_id) = cancelled.visit_id {
            let outcome = self.queue.cancel(visit_id, reason).await.map(|(_, visit)| visit);
            self.settle_queue_follow_up(prior, &cancelled, outcome).await?;
        }

        Ok(cancelled)
    }

    /// Undoes our own write to an appointment. The ledger refuses when the
    /// record has changed since, and that refusal is only logged.
    async fn restore_appointment(&self, prior: Appointment, written: &Appointment) {
        let id = prior.id;
        if let Err(e) = self.ledger.restore(prior, written).await {
            error!("Could not restore appointment {}: {}", id, e);
        }
    }

    /// Resolves the ledger write that follows a committed queue change. On an
    /// infrastructure fault the visit is put back as it was.
    async fn settle_ledger_follow_up(
        &self,
        prior: Visit,
        written: &Visit,
        outcome: Result<Appointment, AppointmentError>,
    ) -> Result<(), SchedulingError> {
        match outcome {
            Ok(appointment) => {
                debug!("Appointment {} now {}", appointment.id, appointment.status);
                Ok(())
            }
            Err(e) if e.is_infrastructure() => {
                error!("Appointment follow-up for visit {} failed: {}", prior.id, e);
                let visit_id = prior.id;
                if let Err(restore_err) = self.queue.restore(prior, written).await {
                    error!("Could not restore visit {}: {}", visit_id, restore_err);
                }
                Err(e.into())
            }
            Err(e) => {
                warn!("Appointment linked to visit {} left unchanged: {}", prior.id, e);
                Ok(())
            }
        }
    }

    /// Mirror of [`Self::settle_ledger_follow_up`] for queue writes that
    /// follow a committed appointment change.
    async fn settle_queue_follow_up(
        &self,
        prior: Appointment,
        written: &Appointment,
        outcome: Result<Visit, QueueError>,
    ) -> Result<(), SchedulingError> {
        match outcome {
            Ok(visit) => {
                debug!("Visit {} now {}", visit.queue_number, visit.visit_status);
                Ok(())
            }
            Err(e) if e.is_infrastructure() => {
                error!("Visit follow-up for appointment {} failed: {}", prior.id, e);
                self.restore_appointment(prior, written).await;
                Err(e.into())
            }
            Err(e) => {
                warn!("Visit linked to appointment {} left unchanged: {}", prior.id, e);
                Ok(())
            }
        }
    }
}

/// Statuses only reachable through check-in and the queue.
fn is_queue_managed(status: &AppointmentStatus) -> bool {
    matches!(
        status,
        AppointmentStatus::CheckedIn | AppointmentStatus::InConsultation | AppointmentStatus::Completed
    )
}
