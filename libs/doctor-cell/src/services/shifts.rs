use std::collections::HashMap;

use chrono::NaiveTime;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::SchedulingConfig;

use crate::models::{AvailabilityError, DoctorShift};
use crate::services::slots::generate_slots;

/// Working hours per doctor. Doctors without a registered shift work the
/// clinic default.
#[derive(Debug)]
pub struct ShiftDirectory {
    shifts: RwLock<HashMap<Uuid, DoctorShift>>,
    default_start: NaiveTime,
    default_end: NaiveTime,
    default_slot_minutes: i64,
}

impl ShiftDirectory {
    pub fn new(config: &SchedulingConfig) -> Self {
        Self {
            shifts: RwLock::new(HashMap::new()),
            default_start: config.default_shift_start,
            default_end: config.default_shift_end,
            default_slot_minutes: config.slot_length_minutes,
        }
    }

    pub async fn set_shift(
        &self,
        doctor_id: Uuid,
        shift_start: NaiveTime,
        shift_end: NaiveTime,
        slot_length_minutes: Option<i64>,
    ) -> Result<DoctorShift, AvailabilityError> {
        let slot_length_minutes = slot_length_minutes.unwrap_or(self.default_slot_minutes);
        let slots = generate_slots(shift_start, shift_end, slot_length_minutes)?;
        if slots.is_empty() {
            return Err(AvailabilityError::InvalidConfiguration(format!(
                "a {} minute slot does not fit between {} and {}",
                slot_length_minutes,
                shift_start.format("%H:%M"),
                shift_end.format("%H:%M")
            )));
        }

        let shift = DoctorShift {
            doctor_id,
            shift_start,
            shift_end,
            slot_length_minutes,
        };

        self.shifts.write().await.insert(doctor_id, shift.clone());
        info!(
            "Doctor {} now works {}-{} in {} minute slots",
            doctor_id,
            shift_start.format("%H:%M"),
            shift_end.format("%H:%M"),
            slot_length_minutes
        );

        Ok(shift)
    }

    pub async fn shift_for(&self, doctor_id: Uuid) -> DoctorShift {
        if let Some(shift) = self.shifts.read().await.get(&doctor_id) {
            return shift.clone();
        }

        debug!("No shift registered for doctor {}, using clinic default", doctor_id);
        DoctorShift {
            doctor_id,
            shift_start: self.default_start,
            shift_end: self.default_end,
            slot_length_minutes: self.default_slot_minutes,
        }
    }
}
