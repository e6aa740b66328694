use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use doctor_cell::{
    availability_view, AvailabilityError, BookedInterval, ShiftDirectory, SlotStatus, TimeSlot,
};
use shared_config::SchedulingConfig;

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

#[tokio::test]
async fn unregistered_doctor_works_the_default_shift() {
    let directory = ShiftDirectory::new(&SchedulingConfig::default());
    let doctor_id = Uuid::new_v4();

    let shift = directory.shift_for(doctor_id).await;
    assert_eq!(shift.shift_start, t(8, 0));
    assert_eq!(shift.shift_end, t(18, 0));
    assert_eq!(shift.slot_length_minutes, 30);
}

#[tokio::test]
async fn registered_shift_replaces_the_default() {
    let directory = ShiftDirectory::new(&SchedulingConfig::default());
    let doctor_id = Uuid::new_v4();

    directory.set_shift(doctor_id, t(13, 0), t(17, 0), Some(20)).await.unwrap();

    let shift = directory.shift_for(doctor_id).await;
    assert_eq!(shift.slot_length_minutes, 20);
    assert!(shift.covers(&TimeSlot::new(t(16, 40), t(17, 0))));
    assert!(!shift.covers(&TimeSlot::new(t(12, 45), t(13, 15))));
}

#[tokio::test]
async fn shift_too_short_for_one_slot_is_rejected() {
    let directory = ShiftDirectory::new(&SchedulingConfig::default());

    let result = directory.set_shift(Uuid::new_v4(), t(9, 0), t(9, 10), Some(30)).await;
    assert_matches!(result, Err(AvailabilityError::InvalidConfiguration(_)));

    let result = directory.set_shift(Uuid::new_v4(), t(17, 0), t(9, 0), None).await;
    assert_matches!(result, Err(AvailabilityError::InvalidConfiguration(_)));
}

#[tokio::test]
async fn availability_view_is_stable_across_repeated_reads() {
    let directory = ShiftDirectory::new(&SchedulingConfig::default());
    let doctor_id = Uuid::new_v4();
    let shift = directory.shift_for(doctor_id).await;
    let booked = vec![BookedInterval {
        appointment_id: Uuid::new_v4(),
        slot: TimeSlot::new(t(9, 0), t(9, 30)),
    }];

    let first = availability_view(&shift, day(), &booked, |_| true).unwrap();
    let second = availability_view(&shift, day(), &booked, |_| true).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.slots.len(), 20);
    assert_eq!(first.free_count(), 19);
    assert_eq!(first.slots[2].status, SlotStatus::Booked);

    let summary = first.summary();
    assert_eq!(summary[2].slot, "09:00");
    assert!(!summary[2].available);
    assert!(summary[3].available);
}
