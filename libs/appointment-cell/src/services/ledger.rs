use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, NaiveTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use doctor_cell::models::{BookedInterval, TimeSlot};
use shared_config::SchedulingConfig;
use shared_utils::clock::ClinicClock;
use shared_utils::locks::{KeyGuard, KeyedLocks};

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, AppointmentUpdate, BookAppointment,
    Cancellation, DoctorDay,
};
use crate::services::conflict::{find_conflicts, is_bookable_start};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::store::AppointmentStore;

const MAX_LOCK_ATTEMPTS: usize = 3;

/// Owns appointment records and serializes every write per doctor and day.
pub struct AppointmentLedger {
    store: Arc<dyn AppointmentStore>,
    locks: KeyedLocks<DoctorDay>,
    lifecycle: AppointmentLifecycleService,
    clock: ClinicClock,
    past_grace: Duration,
}

impl AppointmentLedger {
    pub fn new(store: Arc<dyn AppointmentStore>, clock: ClinicClock, config: &SchedulingConfig) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(StdDuration::from_millis(config.lock_timeout_ms)),
            lifecycle: AppointmentLifecycleService::new(),
            clock,
            past_grace: Duration::minutes(config.past_grace_minutes),
        }
    }

    pub fn clock(&self) -> &ClinicClock {
        &self.clock
    }

    /// Books a new appointment. The idempotency check, conflict scan and
    /// insert run as one unit under the doctor-day lock.
    pub async fn book(&self, request: BookAppointment) -> Result<Appointment, AppointmentError> {
        validate_interval(&request.slot)?;
        self.ensure_bookable(request.date, request.slot.start)?;

        let key = DoctorDay::new(request.doctor_id, request.date);
        let _guard = self.locks.acquire(&key).await?;

        if let Some(idempotency_key) = &request.idempotency_key {
            if let Some(existing) = self.store.find_by_idempotency_key(idempotency_key).await? {
                warn!("Booking request {} was already processed as {}", idempotency_key, existing.id);
                return Err(AppointmentError::DuplicateRequest { appointment_id: existing.id });
            }
        }

        let existing = self.store.list_by_doctor_and_date(request.doctor_id, request.date).await?;
        ensure_free(&request.slot, None, &existing)?;

        let now = self.clock.now_utc();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            patient_name: request.patient_name,
            doctor_id: request.doctor_id,
            date: request.date,
            start_time: request.slot.start,
            end_time: request.slot.end,
            purpose: request.purpose,
            notes: request.notes,
            status: AppointmentStatus::Scheduled,
            created_by: request.created_by,
            queue_number: None,
            visit_id: None,
            cancellation: None,
            idempotency_key: request.idempotency_key,
            created_at: now,
            updated_at: now,
        };

        let appointment = self.store.insert(appointment).await?;
        info!(
            "Booked appointment {} for patient {} with doctor {} on {} at {}",
            appointment.id,
            appointment.patient_id,
            appointment.doctor_id,
            appointment.date,
            appointment.interval()
        );

        Ok(appointment)
    }

    pub async fn update(
        &self,
        id: Uuid,
        changes: AppointmentUpdate,
        actor: &str,
    ) -> Result<Appointment, AppointmentError> {
        if let Some(slot) = &changes.slot {
            validate_interval(slot)?;
        }

        let (_guard, current) = self.lock_appointment(id, &changes).await?;
        let updated = self.apply_changes(&current, &changes, actor).await?;

        let saved = self.store.save(updated).await?;
        info!(
            "Updated appointment {}: {} on {} at {}",
            saved.id,
            saved.status,
            saved.date,
            saved.interval()
        );

        Ok(saved)
    }

    pub async fn reschedule(
        &self,
        id: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        actor: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.update(id, AppointmentUpdate::reschedule(date, slot), actor).await
    }

    /// Moves an appointment along its state machine.
    pub async fn transition(
        &self,
        id: Uuid,
        status: AppointmentStatus,
        actor: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.update(id, AppointmentUpdate::status(status), actor).await
    }

    pub async fn cancel(
        &self,
        id: Uuid,
        reason: &str,
        cancelled_by: &str,
    ) -> Result<Appointment, AppointmentError> {
        let (_, cancelled) = self
            .cancel_with(id, AppointmentUpdate::default(), reason, cancelled_by)
            .await?;
        Ok(cancelled)
    }

    /// Applies `changes` and the cancellation as a single write, returning
    /// `(prior, cancelled)`. Nothing is saved if either part is rejected.
    pub async fn cancel_with(
        &self,
        id: Uuid,
        changes: AppointmentUpdate,
        reason: &str,
        cancelled_by: &str,
    ) -> Result<(Appointment, Appointment), AppointmentError> {
        if let Some(slot) = &changes.slot {
            validate_interval(slot)?;
        }

        let changes = AppointmentUpdate {
            status: Some(AppointmentStatus::Cancelled),
            ..changes
        };
        let (_guard, current) = self.lock_appointment(id, &changes).await?;
        let mut cancelled = self.apply_changes(&current, &changes, cancelled_by).await?;
        cancelled.cancellation = Some(Cancellation {
            reason: reason.to_string(),
            cancelled_by: cancelled_by.to_string(),
            cancelled_at: self.clock.now_utc(),
        });

        let saved = self.store.save(cancelled).await?;
        info!("Cancelled appointment {} ({})", id, reason);
        Ok((current, saved))
    }

    /// Marks the patient as arrived. An unconfirmed booking is confirmed on
    /// the spot. Returns the prior record alongside the new one so the
    /// caller can roll back.
    pub async fn check_in(&self, id: Uuid) -> Result<(Appointment, Appointment), AppointmentError> {
        let today = self.clock.today();
        let lifecycle = self.lifecycle;

        let (prior, checked_in) = self
            .mutate(id, |appointment| {
                if appointment.status == AppointmentStatus::Scheduled {
                    lifecycle.validate_status_transition(appointment.status, AppointmentStatus::Confirmed)?;
                    appointment.status = AppointmentStatus::Confirmed;
                }
                lifecycle.validate_status_transition(appointment.status, AppointmentStatus::CheckedIn)?;
                if appointment.date != today {
                    return Err(AppointmentError::CheckInNotToday { date: appointment.date });
                }
                appointment.status = AppointmentStatus::CheckedIn;
                Ok(())
            })
            .await?;

        info!("Checked in appointment {} (was {})", id, prior.status);
        Ok((prior, checked_in))
    }

    /// Links an appointment to its visit. Only appointments the queue drives
    /// (checked in or later, not cancelled) take a link, so one cancelled
    /// while admission ran is refused.
    pub async fn attach_visit(
        &self,
        id: Uuid,
        visit_id: Uuid,
        queue_number: &str,
    ) -> Result<Appointment, AppointmentError> {
        let (_, updated) = self
            .mutate(id, |appointment| {
                if !matches!(
                    appointment.status,
                    AppointmentStatus::CheckedIn | AppointmentStatus::InConsultation | AppointmentStatus::Completed
                ) {
                    return Err(AppointmentError::InvalidTransition {
                        from: appointment.status,
                        to: AppointmentStatus::CheckedIn,
                    });
                }
                appointment.visit_id = Some(visit_id);
                appointment.queue_number = Some(queue_number.to_string());
                Ok(())
            })
            .await?;

        debug!("Appointment {} linked to visit {} ({})", id, visit_id, queue_number);
        Ok(updated)
    }

    /// Compensating write: puts `prior` back, but only while the stored
    /// record is still exactly `written`. A restore that would reactivate
    /// `prior` on an interval someone else now holds is refused too.
    pub async fn restore(&self, prior: Appointment, written: &Appointment) -> Result<Appointment, AppointmentError> {
        let _guard = self
            .locks
            .acquire_many(&[prior.doctor_day(), written.doctor_day()])
            .await?;

        let current = self.get(prior.id).await?;
        if &current != written {
            warn!(
                "Appointment {} changed to {} since it was written as {}, leaving it",
                current.id, current.status, written.status
            );
            return Err(AppointmentError::Superseded(current.id));
        }

        if prior.status.is_active() {
            let existing = self.store.list_by_doctor_and_date(prior.doctor_id, prior.date).await?;
            ensure_free(&prior.interval(), Some(prior.id), &existing)?;
        }

        let restored = self.store.save(prior).await?;
        warn!("Restored appointment {} to status {}", restored.id, restored.status);
        Ok(restored)
    }

    pub async fn mark_no_show(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        let now = self.clock.now_local();
        let lifecycle = self.lifecycle;

        let (_, updated) = self
            .mutate(id, |appointment| {
                lifecycle.validate_status_transition(appointment.status, AppointmentStatus::NoShow)?;
                if !lifecycle.is_no_show_eligible(appointment.status, appointment.date, appointment.end_time, now) {
                    return Err(AppointmentError::NoShowNotEligible(appointment.id));
                }
                appointment.status = AppointmentStatus::NoShow;
                Ok(())
            })
            .await?;

        info!("Appointment {} marked no-show", id);
        Ok(updated)
    }

    pub fn is_no_show_eligible(&self, appointment: &Appointment) -> bool {
        self.lifecycle.is_no_show_eligible(
            appointment.status,
            appointment.date,
            appointment.end_time,
            self.clock.now_local(),
        )
    }

    pub async fn get(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store.get(id).await?.ok_or(AppointmentError::NotFound(id))
    }

    pub async fn list_by_doctor_and_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut appointments = self.store.list_by_doctor_and_date(doctor_id, date).await?;
        appointments.sort_by_key(|a| (a.start_time, a.created_at));
        Ok(appointments)
    }

    /// Intervals held by active appointments, for the availability view.
    pub async fn booked_intervals(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<BookedInterval>, AppointmentError> {
        Ok(self
            .list_by_doctor_and_date(doctor_id, date)
            .await?
            .iter()
            .filter(|a| a.status.is_active())
            .map(Appointment::booked_interval)
            .collect())
    }

    /// Case-insensitive substring match on patient name, appointment id and
    /// ISO date.
    pub async fn search(&self, query: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let needle = query.trim().to_lowercase();
        let mut matches: Vec<Appointment> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|a| {
                needle.is_empty()
                    || a.patient_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(&needle))
                    || a.id.to_string().contains(&needle)
                    || a.date.to_string().contains(&needle)
            })
            .collect();

        matches.sort_by_key(|a| (a.date, a.start_time, a.created_at));
        debug!("Search '{}' matched {} appointment(s)", query, matches.len());
        Ok(matches)
    }

    pub fn is_bookable(&self, date: NaiveDate, start: NaiveTime) -> bool {
        is_bookable_start(date.and_time(start), self.clock.now_local(), self.past_grace)
    }

    fn ensure_bookable(&self, date: NaiveDate, start: NaiveTime) -> Result<(), AppointmentError> {
        if self.is_bookable(date, start) {
            return Ok(());
        }
        warn!("Rejected start {} on {} as past", start.format("%H:%M"), date);
        Err(AppointmentError::PastTime { date, start })
    }

    /// Computes the record `changes` produce from `current`. Terminal
    /// appointments take no edits at all.
    async fn apply_changes(
        &self,
        current: &Appointment,
        changes: &AppointmentUpdate,
        actor: &str,
    ) -> Result<Appointment, AppointmentError> {
        if current.status.is_terminal() {
            warn!("Refusing to edit appointment {} in status {}", current.id, current.status);
            return Err(AppointmentError::InvalidTransition {
                from: current.status,
                to: changes.status.unwrap_or(current.status),
            });
        }

        let mut updated = current.clone();

        if changes.moves(current) {
            if !current.status.allows_rescheduling() {
                warn!("Refusing to move appointment {} in status {}", current.id, current.status);
                return Err(AppointmentError::NotReschedulable(current.status));
            }

            let date = changes.date.unwrap_or(current.date);
            let doctor_id = changes.doctor_id.unwrap_or(current.doctor_id);
            let slot = changes.slot.unwrap_or_else(|| current.interval());

            self.ensure_bookable(date, slot.start)?;
            let existing = self.store.list_by_doctor_and_date(doctor_id, date).await?;
            ensure_free(&slot, Some(current.id), &existing)?;

            updated.date = date;
            updated.doctor_id = doctor_id;
            updated.start_time = slot.start;
            updated.end_time = slot.end;
        }

        if let Some(status) = changes.status {
            if status != current.status {
                self.apply_status(&mut updated, status, actor)?;
            }
        }
        if let Some(purpose) = &changes.purpose {
            updated.purpose = purpose.clone();
        }
        if let Some(notes) = &changes.notes {
            updated.notes = Some(notes.clone());
        }
        updated.updated_at = self.clock.now_utc();

        Ok(updated)
    }

    fn apply_status(
        &self,
        appointment: &mut Appointment,
        status: AppointmentStatus,
        actor: &str,
    ) -> Result<(), AppointmentError> {
        self.lifecycle.validate_status_transition(appointment.status, status)?;

        match status {
            AppointmentStatus::NoShow if !self.is_no_show_eligible(appointment) => {
                return Err(AppointmentError::NoShowNotEligible(appointment.id));
            }
            AppointmentStatus::Cancelled => {
                appointment.cancellation = Some(Cancellation {
                    reason: "status update".to_string(),
                    cancelled_by: actor.to_string(),
                    cancelled_at: self.clock.now_utc(),
                });
            }
            _ => {}
        }

        appointment.status = status;
        Ok(())
    }

    /// Applies an in-place change under the appointment's doctor-day lock and
    /// returns `(prior, saved)`.
    async fn mutate<F>(&self, id: Uuid, apply: F) -> Result<(Appointment, Appointment), AppointmentError>
    where
        F: FnOnce(&mut Appointment) -> Result<(), AppointmentError>,
    {
        let (_guard, current) = self.lock_appointment(id, &AppointmentUpdate::default()).await?;
        let mut updated = current.clone();
        apply(&mut updated)?;
        updated.updated_at = self.clock.now_utc();

        let saved = self.store.save(updated).await?;
        Ok((current, saved))
    }

    /// Locks the appointment's current doctor-day and, for a move, the target
    /// doctor-day too. Retries if the record moved while we waited.
    async fn lock_appointment(
        &self,
        id: Uuid,
        changes: &AppointmentUpdate,
    ) -> Result<(KeyGuard, Appointment), AppointmentError> {
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let seen = self.get(id).await?;
            let target = DoctorDay::new(
                changes.doctor_id.unwrap_or(seen.doctor_id),
                changes.date.unwrap_or(seen.date),
            );

            let guard = self.locks.acquire_many(&[seen.doctor_day(), target]).await?;
            let current = self.get(id).await?;
            if current.doctor_day() == seen.doctor_day() {
                return Ok((guard, current));
            }
            debug!("Appointment {} moved while waiting for its lock, retrying", id);
        }

        Err(AppointmentError::Storage(format!(
            "appointment {} kept moving while waiting for its lock",
            id
        )))
    }
}

fn validate_interval(slot: &TimeSlot) -> Result<(), AppointmentError> {
    if slot.is_well_formed() {
        Ok(())
    } else {
        Err(AppointmentError::InvalidConfiguration(format!(
            "end time {} must be after start time {}",
            slot.end.format("%H:%M"),
            slot.start.format("%H:%M")
        )))
    }
}

fn ensure_free(
    candidate: &TimeSlot,
    exclude_id: Option<Uuid>,
    existing: &[Appointment],
) -> Result<(), AppointmentError> {
    let conflicting = find_conflicts(candidate, exclude_id, existing);
    if conflicting.is_empty() {
        return Ok(());
    }

    warn!(
        "Interval {} conflicts with {} booking(s): {:?}",
        candidate,
        conflicting.len(),
        conflicting.iter().map(|b| b.appointment_id).collect::<Vec<_>>()
    );
    Err(AppointmentError::Conflict {
        requested: *candidate,
        conflicting,
    })
}
