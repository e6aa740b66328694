use chrono::{Duration, NaiveDateTime};
use uuid::Uuid;

use doctor_cell::models::{BookedInterval, TimeSlot};

use crate::models::Appointment;

/// Half-open overlap: `[a.start, a.end)` and `[b.start, b.end)` share a minute.
pub fn overlaps(a: &TimeSlot, b: &TimeSlot) -> bool {
    a.start < b.end && b.start < a.end
}

/// Active appointments whose interval overlaps `candidate`, skipping the
/// appointment being moved so it never conflicts with itself.
pub fn find_conflicts(
    candidate: &TimeSlot,
    exclude_id: Option<Uuid>,
    existing: &[Appointment],
) -> Vec<BookedInterval> {
    existing
        .iter()
        .filter(|appointment| appointment.status.is_active())
        .filter(|appointment| Some(appointment.id) != exclude_id)
        .filter(|appointment| overlaps(candidate, &appointment.interval()))
        .map(Appointment::booked_interval)
        .collect()
}

/// Past-time policy for a candidate start in clinic-local time.
///
/// Earlier days are always past and later days always bookable; on the
/// current day a start is accepted back to `now - grace`.
pub fn is_bookable_start(candidate_start: NaiveDateTime, now: NaiveDateTime, grace: Duration) -> bool {
    let (candidate_day, today) = (candidate_start.date(), now.date());
    if candidate_day != today {
        return candidate_day > today;
    }
    candidate_start >= now - grace
}
