use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::{AppointmentError, AppointmentStatus, InMemoryAppointmentStore};
use queue_cell::{
    InMemoryVisitStore, QueueCategory, QueueError, SequenceKey, TriagePriority, Visit, VisitStatus,
    VisitStore,
};
use scheduling_cell::*;
use shared_config::SchedulingConfig;
use shared_utils::clock::{ClinicClock, FixedClock};
use tokio::sync::Notify;

const DESK: &str = "desk-1";

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

fn clock() -> ClinicClock {
    let fixed = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
    ClinicClock::new(fixed, 0)
}

async fn directory_with(patients: &[Uuid]) -> Arc<StaticPatientDirectory> {
    let directory = StaticPatientDirectory::new();
    for id in patients {
        directory
            .register(PatientRecord {
                id: *id,
                first_name: Some("Ana".to_string()),
                last_name: Some("Silva".to_string()),
            })
            .await;
    }
    Arc::new(directory)
}

async fn facade_with(patients: &[Uuid]) -> SchedulingFacade {
    SchedulingFacade::in_memory(&SchedulingConfig::default(), clock(), directory_with(patients).await)
}

fn booking(patient_id: Uuid, doctor_id: Uuid, start: NaiveTime, end: NaiveTime) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id,
        doctor_id,
        date: today(),
        start_time: start,
        end_time: end,
        purpose: "follow-up".to_string(),
        notes: None,
        idempotency_key: None,
    }
}

fn walk_in(patient_id: Uuid) -> WalkInRequest {
    WalkInRequest {
        patient_id,
        doctor_id: None,
        reason: "fever".to_string(),
        priority: Some(TriagePriority::Medium),
        category: None,
    }
}

#[tokio::test]
async fn booking_takes_the_slot_off_the_calendar() {
    let patient = Uuid::new_v4();
    let dr_a = Uuid::new_v4();
    let facade = facade_with(&[patient]).await;

    let before = facade.get_availability(dr_a, today()).await.unwrap().summary();
    assert_eq!(before.len(), 20);
    assert_eq!(before[0].slot, "08:00");
    // 08:30 started more than fifteen minutes before 09:00.
    assert!(!before[1].available);
    assert!(before[2].available);

    let appointment = facade
        .book_appointment(booking(patient, dr_a, t(10, 0), t(10, 30)), DESK)
        .await
        .unwrap();
    assert_eq!(appointment.patient_name.as_deref(), Some("Ana Silva"));
    assert_eq!(appointment.created_by, DESK);

    let after = facade.get_availability(dr_a, today()).await.unwrap();
    let ten = after.summary().into_iter().find(|s| s.slot == "10:00").unwrap();
    assert!(!ten.available);
    assert_eq!(after, facade.get_availability(dr_a, today()).await.unwrap());

    assert_matches!(
        facade.book_appointment(booking(patient, dr_a, t(10, 15), t(10, 45)), DESK).await,
        Err(SchedulingError::Appointment(AppointmentError::Conflict { .. }))
    );
}

#[tokio::test]
async fn booking_checks_shift_and_patient() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let facade = facade_with(&[patient]).await;

    assert_matches!(
        facade.book_appointment(booking(patient, doctor, t(17, 45), t(18, 15)), DESK).await,
        Err(SchedulingError::OutsideShift { .. })
    );

    let stranger = Uuid::new_v4();
    assert_matches!(
        facade.book_appointment(booking(stranger, doctor, t(11, 0), t(11, 30)), DESK).await,
        Err(SchedulingError::PatientNotFound(id)) if id == stranger
    );

    facade
        .set_doctor_shift(
            doctor,
            ShiftRequest {
                shift_start: t(12, 0),
                shift_end: t(16, 0),
                slot_length_minutes: Some(20),
            },
        )
        .await
        .unwrap();
    assert_eq!(facade.get_availability(doctor, today()).await.unwrap().slots.len(), 12);
    assert_matches!(
        facade.book_appointment(booking(patient, doctor, t(11, 0), t(11, 30)), DESK).await,
        Err(SchedulingError::OutsideShift { .. })
    );
}

#[tokio::test]
async fn appointment_follows_its_visit_through_the_day() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let facade = facade_with(&[patient]).await;

    let booked = facade
        .book_appointment(booking(patient, doctor, t(10, 0), t(10, 30)), DESK)
        .await
        .unwrap();

    let outcome = facade
        .check_in(booked.id, CheckInRequest { triage_priority: None }, DESK)
        .await
        .unwrap();
    assert_eq!(outcome.queue_number.to_string(), "C-001");
    assert_eq!(outcome.appointment.status, AppointmentStatus::CheckedIn);
    assert_eq!(outcome.appointment.visit_id, Some(outcome.visit.id));
    assert_eq!(outcome.appointment.queue_number.as_deref(), Some("C-001"));
    assert_eq!(outcome.visit.triage_priority, TriagePriority::Low);

    let called = facade.call_next(QueueCategory::Consultation, DESK).await.unwrap();
    assert_eq!(called.id, outcome.visit.id);
    assert_eq!(
        facade.get_appointment(booked.id).await.unwrap().status,
        AppointmentStatus::InConsultation
    );

    facade.advance_visit(called.id, VisitStatus::ToBeBilled).await.unwrap();
    facade.complete_visit(called.id, DESK).await.unwrap();
    assert_eq!(
        facade.get_appointment(booked.id).await.unwrap().status,
        AppointmentStatus::Completed
    );
}

#[tokio::test]
async fn failed_admission_restores_the_appointment() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let facade = facade_with(&[patient]).await;

    let booked = facade
        .book_appointment(booking(patient, doctor, t(10, 0), t(10, 30)), DESK)
        .await
        .unwrap();
    facade.register_walk_in(walk_in(patient), DESK).await.unwrap();

    assert_matches!(
        facade.check_in(booked.id, CheckInRequest::default(), DESK).await,
        Err(SchedulingError::Queue(QueueError::AlreadyActive { .. }))
    );

    let restored = facade.get_appointment(booked.id).await.unwrap();
    assert_eq!(restored.status, AppointmentStatus::Scheduled);
    assert_eq!(restored.visit_id, None);
}

/// Visit store whose inserts fail, as an unreachable database would.
struct BrokenInserts(InMemoryVisitStore);

#[async_trait]
impl VisitStore for BrokenInserts {
    async fn insert(&self, _visit: Visit) -> Result<Visit, QueueError> {
        Err(QueueError::Storage("connection reset".to_string()))
    }

    async fn save(&self, visit: Visit) -> Result<Visit, QueueError> {
        self.0.save(visit).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Visit>, QueueError> {
        self.0.get(id).await
    }

    async fn remove(&self, id: Uuid) -> Result<Option<Visit>, QueueError> {
        self.0.remove(id).await
    }

    async fn list_by_day(&self, service_day: NaiveDate) -> Result<Vec<Visit>, QueueError> {
        self.0.list_by_day(service_day).await
    }

    async fn next_sequence(&self, key: SequenceKey) -> Result<u64, QueueError> {
        self.0.next_sequence(key).await
    }
}

#[tokio::test]
async fn storage_failure_during_admission_rolls_back_check_in() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let facade = SchedulingFacade::new(
        &SchedulingConfig::default(),
        clock(),
        Arc::new(InMemoryAppointmentStore::new()),
        Arc::new(BrokenInserts(InMemoryVisitStore::new())),
        directory_with(&[patient]).await,
    );

    let booked = facade
        .book_appointment(booking(patient, doctor, t(10, 0), t(10, 30)), DESK)
        .await
        .unwrap();

    let err = facade
        .check_in(booked.id, CheckInRequest::default(), DESK)
        .await
        .unwrap_err();
    assert!(err.is_infrastructure());
    assert_eq!(
        facade.get_appointment(booked.id).await.unwrap().status,
        AppointmentStatus::Scheduled
    );
}

/// Visit store that, once armed, parks the next day listing (the first read
/// of a queue admission) until the test lets it go.
#[derive(Default)]
struct GatedVisits {
    inner: InMemoryVisitStore,
    armed: AtomicBool,
    reached: Notify,
    release: Notify,
}

impl GatedVisits {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl VisitStore for GatedVisits {
    async fn insert(&self, visit: Visit) -> Result<Visit, QueueError> {
        self.inner.insert(visit).await
    }

    async fn save(&self, visit: Visit) -> Result<Visit, QueueError> {
        self.inner.save(visit).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Visit>, QueueError> {
        self.inner.get(id).await
    }

    async fn remove(&self, id: Uuid) -> Result<Option<Visit>, QueueError> {
        self.inner.remove(id).await
    }

    async fn list_by_day(&self, service_day: NaiveDate) -> Result<Vec<Visit>, QueueError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.inner.list_by_day(service_day).await
    }

    async fn next_sequence(&self, key: SequenceKey) -> Result<u64, QueueError> {
        self.inner.next_sequence(key).await
    }
}

async fn gated_facade(patients: &[Uuid]) -> (Arc<GatedVisits>, SchedulingFacade) {
    let visits = Arc::new(GatedVisits::default());
    let facade = SchedulingFacade::new(
        &SchedulingConfig::default(),
        clock(),
        Arc::new(InMemoryAppointmentStore::new()),
        visits.clone(),
        directory_with(patients).await,
    );
    (visits, facade)
}

async fn active_at(facade: &SchedulingFacade, doctor: Uuid, start: NaiveTime) -> Vec<Uuid> {
    facade
        .doctor_schedule(doctor, today())
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.status.is_active() && a.start_time == start)
        .map(|a| a.id)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rollback_never_revives_an_appointment_cancelled_mid_check_in() {
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    let doctor = Uuid::new_v4();
    let (visits, facade) = gated_facade(&[x, y]).await;

    let booked = facade.book_appointment(booking(x, doctor, t(10, 0), t(10, 30)), DESK).await.unwrap();
    facade.register_walk_in(walk_in(x), DESK).await.unwrap();
    visits.arm();

    let (check_in, replacement) = tokio::join!(
        facade.check_in(booked.id, CheckInRequest::default(), DESK),
        async {
            visits.reached.notified().await;
            facade.cancel_appointment(booked.id, "left the waiting room", DESK).await.unwrap();
            let replacement = facade.book_appointment(booking(y, doctor, t(10, 0), t(10, 30)), DESK).await;
            visits.release.notify_one();
            replacement.unwrap()
        }
    );

    assert_matches!(check_in, Err(SchedulingError::Queue(QueueError::AlreadyActive { .. })));
    assert_eq!(
        facade.get_appointment(booked.id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );
    assert_eq!(active_at(&facade, doctor, t(10, 0)).await, vec![replacement.id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_during_admission_leaves_no_orphan_visit() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let (visits, facade) = gated_facade(&[patient]).await;

    let booked = facade.book_appointment(booking(patient, doctor, t(10, 0), t(10, 30)), DESK).await.unwrap();
    visits.arm();

    let (check_in, _) = tokio::join!(
        facade.check_in(booked.id, CheckInRequest::default(), DESK),
        async {
            visits.reached.notified().await;
            let cancelled = facade.cancel_appointment(booked.id, "called to cancel", DESK).await;
            visits.release.notify_one();
            cancelled.unwrap()
        }
    );

    assert_matches!(
        check_in,
        Err(SchedulingError::Appointment(AppointmentError::InvalidTransition {
            from: AppointmentStatus::Cancelled,
            ..
        }))
    );
    let appointment = facade.get_appointment(booked.id).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
    assert_eq!(appointment.visit_id, None);
    assert!(facade.list_queue(None, None).await.unwrap().visits.is_empty());

    // The patient can still be seen as a walk-in.
    facade.register_walk_in(walk_in(patient), DESK).await.unwrap();
}

#[tokio::test]
async fn cancelling_either_side_releases_the_other() {
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let facade = facade_with(&[first, second]).await;

    let a = facade.book_appointment(booking(first, doctor, t(10, 0), t(10, 30)), DESK).await.unwrap();
    let b = facade.book_appointment(booking(second, doctor, t(10, 30), t(11, 0)), DESK).await.unwrap();
    let a_visit = facade.check_in(a.id, CheckInRequest::default(), DESK).await.unwrap().visit;
    let b_visit = facade.check_in(b.id, CheckInRequest::default(), DESK).await.unwrap().visit;

    facade.cancel_appointment(a.id, "patient left", DESK).await.unwrap();
    let (visit, position) = facade.get_visit(a_visit.id).await.unwrap();
    assert_eq!(visit.visit_status, VisitStatus::Cancelled);
    assert_eq!(position, None);

    facade.cancel_visit(b_visit.id, "wrong clinic", DESK).await.unwrap();
    let cancelled = facade.get_appointment(b.id).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancellation.unwrap().reason, "wrong clinic");

    assert!(facade.list_queue(None, None).await.unwrap().visits.is_empty());
}

#[tokio::test]
async fn visit_no_show_cancels_the_checked_in_appointment() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let facade = facade_with(&[patient]).await;

    let booked = facade.book_appointment(booking(patient, doctor, t(10, 0), t(10, 30)), DESK).await.unwrap();
    let visit = facade.check_in(booked.id, CheckInRequest::default(), DESK).await.unwrap().visit;

    let gone = facade.mark_visit_no_show(visit.id, DESK).await.unwrap();
    assert_eq!(gone.visit_status, VisitStatus::NoShow);

    let appointment = facade.get_appointment(booked.id).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
    assert_eq!(appointment.cancellation.unwrap().reason, "visit marked no-show");
}

#[tokio::test]
async fn queue_statuses_cannot_be_set_by_update() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let facade = facade_with(&[patient]).await;
    let booked = facade.book_appointment(booking(patient, doctor, t(10, 0), t(10, 30)), DESK).await.unwrap();

    let checked_in = UpdateAppointmentRequest {
        status: Some(AppointmentStatus::CheckedIn),
        ..Default::default()
    };
    assert_matches!(
        facade.update_appointment(booked.id, checked_in, DESK).await,
        Err(SchedulingError::QueueManagedStatus(AppointmentStatus::CheckedIn))
    );

    let moved = UpdateAppointmentRequest {
        start_time: Some(t(11, 0)),
        end_time: Some(t(11, 30)),
        notes: Some("prefers mornings".to_string()),
        ..Default::default()
    };
    let updated = facade.update_appointment(booked.id, moved, DESK).await.unwrap();
    assert_eq!(updated.start_time, t(11, 0));
    assert_eq!(updated.notes.as_deref(), Some("prefers mornings"));

    let cancel = UpdateAppointmentRequest {
        status: Some(AppointmentStatus::Cancelled),
        ..Default::default()
    };
    let cancelled = facade.update_appointment(booked.id, cancel, DESK).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancellation.unwrap().reason, "status update");
}

#[tokio::test]
async fn rejected_update_writes_nothing() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let facade = facade_with(&[patient]).await;
    let booked = facade.book_appointment(booking(patient, doctor, t(10, 0), t(10, 30)), DESK).await.unwrap();
    facade.cancel_appointment(booked.id, "double entry", DESK).await.unwrap();

    let cancel_again = UpdateAppointmentRequest {
        status: Some(AppointmentStatus::Cancelled),
        purpose: Some("rewritten".to_string()),
        ..Default::default()
    };
    assert_matches!(
        facade.update_appointment(booked.id, cancel_again, DESK).await,
        Err(SchedulingError::Appointment(AppointmentError::InvalidTransition { .. }))
    );

    let late_note = UpdateAppointmentRequest {
        notes: Some("called back".to_string()),
        ..Default::default()
    };
    assert_matches!(
        facade.update_appointment(booked.id, late_note, DESK).await,
        Err(SchedulingError::Appointment(AppointmentError::InvalidTransition { .. }))
    );

    let stored = facade.get_appointment(booked.id).await.unwrap();
    assert_eq!(stored.purpose, "follow-up");
    assert_eq!(stored.notes, None);
    assert_eq!(stored.cancellation.unwrap().reason, "double entry");
}

#[tokio::test]
async fn cancelling_by_update_keeps_edits_and_releases_the_visit() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let facade = facade_with(&[patient]).await;
    let booked = facade.book_appointment(booking(patient, doctor, t(10, 0), t(10, 30)), DESK).await.unwrap();
    let visit = facade.check_in(booked.id, CheckInRequest::default(), DESK).await.unwrap().visit;

    let cancel = UpdateAppointmentRequest {
        status: Some(AppointmentStatus::Cancelled),
        notes: Some("felt better".to_string()),
        ..Default::default()
    };
    let cancelled = facade.update_appointment(booked.id, cancel, DESK).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.notes.as_deref(), Some("felt better"));

    let (visit, position) = facade.get_visit(visit.id).await.unwrap();
    assert_eq!(visit.visit_status, VisitStatus::Cancelled);
    assert_eq!(position, None);
}

#[tokio::test]
async fn walk_ins_queue_by_priority() {
    let low = Uuid::new_v4();
    let critical = Uuid::new_v4();
    let facade = facade_with(&[low, critical]).await;

    let mut first = walk_in(low);
    first.priority = Some(TriagePriority::Low);
    let mut second = walk_in(critical);
    second.priority = Some(TriagePriority::Critical);

    facade.register_walk_in(first, DESK).await.unwrap();
    let urgent = facade.register_walk_in(second, DESK).await.unwrap();

    let snapshot = facade.list_queue(None, Some(QueueCategory::Consultation)).await.unwrap();
    assert_eq!(snapshot.service_day, today());
    assert_eq!(snapshot.waiting_count(), 2);
    assert_eq!(snapshot.visits[0].visit.id, urgent.id);
    assert_eq!(snapshot.visits[0].position, 1);

    let mut blank = walk_in(Uuid::new_v4());
    blank.reason = "   ".to_string();
    assert_matches!(facade.register_walk_in(blank, DESK).await, Err(SchedulingError::Validation(_)));
}

#[tokio::test]
async fn dr_a_front_desk_morning() {
    let (x, y, z) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let dr_a = Uuid::new_v4();
    let facade = facade_with(&[x, y, z]).await;

    let x_booking = facade.book_appointment(booking(x, dr_a, t(9, 0), t(9, 30)), DESK).await.unwrap();
    assert_matches!(
        facade.book_appointment(booking(y, dr_a, t(9, 15), t(9, 45)), DESK).await,
        Err(SchedulingError::Appointment(AppointmentError::Conflict { .. }))
    );
    facade.book_appointment(booking(y, dr_a, t(9, 30), t(10, 0)), DESK).await.unwrap();

    let checked_in = facade.check_in(x_booking.id, CheckInRequest::default(), DESK).await.unwrap();
    assert_eq!(checked_in.appointment.status, AppointmentStatus::CheckedIn);

    let mut critical = walk_in(z);
    critical.priority = Some(TriagePriority::Critical);
    let z_visit = facade.register_walk_in(critical, DESK).await.unwrap();

    let order: Vec<Uuid> = facade
        .list_queue(Some(today()), None)
        .await
        .unwrap()
        .visits
        .iter()
        .map(|q| q.visit.id)
        .collect();
    assert_eq!(order, vec![z_visit.id, checked_in.visit.id]);
}
