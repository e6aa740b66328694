use chrono::{Duration, NaiveDate, NaiveTime};
use tracing::debug;

use crate::models::{
    AnnotatedSlot, AvailabilityError, BookedInterval, DoctorAvailabilityView, DoctorShift,
    SlotStatus, TimeSlot,
};

/// Splits a shift into consecutive fixed-length slots aligned to `shift_start`.
///
/// A trailing slot that would run past `shift_end` is dropped rather than
/// shortened.
pub fn generate_slots(
    shift_start: NaiveTime,
    shift_end: NaiveTime,
    slot_length_minutes: i64,
) -> Result<Vec<TimeSlot>, AvailabilityError> {
    if shift_end <= shift_start {
        return Err(AvailabilityError::InvalidConfiguration(format!(
            "shift end {} must be after shift start {}",
            shift_end.format("%H:%M"),
            shift_start.format("%H:%M")
        )));
    }
    if slot_length_minutes <= 0 {
        return Err(AvailabilityError::InvalidConfiguration(format!(
            "slot length must be positive, got {} minutes",
            slot_length_minutes
        )));
    }

    let step = Duration::minutes(slot_length_minutes);
    let mut slots = Vec::new();
    let mut current = shift_start;

    loop {
        let (slot_end, wrapped) = current.overflowing_add_signed(step);
        if wrapped != 0 || slot_end > shift_end {
            break;
        }
        slots.push(TimeSlot::new(current, slot_end));
        current = slot_end;
    }

    debug!(
        "Generated {} slots of {} minutes between {} and {}",
        slots.len(),
        slot_length_minutes,
        shift_start.format("%H:%M"),
        shift_end.format("%H:%M")
    );

    Ok(slots)
}

/// Flags every slot that any booked interval overlaps.
pub fn annotate(slots: &[TimeSlot], booked: &[BookedInterval]) -> Vec<AnnotatedSlot> {
    slots
        .iter()
        .map(|slot| {
            let occupant = booked.iter().find(|b| b.slot.overlaps(slot)).copied();
            AnnotatedSlot {
                slot: *slot,
                status: if occupant.is_some() { SlotStatus::Booked } else { SlotStatus::Free },
                booked_by: occupant,
            }
        })
        .collect()
}

/// Downgrades free slots whose start fails the past-time policy to `past`.
/// Booked slots keep their occupant.
pub fn mark_past<F>(mut slots: Vec<AnnotatedSlot>, is_bookable_start: F) -> Vec<AnnotatedSlot>
where
    F: Fn(NaiveTime) -> bool,
{
    for annotated in slots.iter_mut() {
        if annotated.status == SlotStatus::Free && !is_bookable_start(annotated.slot.start) {
            annotated.status = SlotStatus::Past;
        }
    }
    slots
}

/// Builds the per-day availability view of one doctor.
pub fn availability_view<F>(
    shift: &DoctorShift,
    date: NaiveDate,
    booked: &[BookedInterval],
    is_bookable_start: F,
) -> Result<DoctorAvailabilityView, AvailabilityError>
where
    F: Fn(NaiveTime) -> bool,
{
    let slots = generate_slots(shift.shift_start, shift.shift_end, shift.slot_length_minutes)?;
    let slots = mark_past(annotate(&slots, booked), is_bookable_start);

    Ok(DoctorAvailabilityView {
        doctor_id: shift.doctor_id,
        date,
        slots,
    })
}
