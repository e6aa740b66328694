use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AvailabilityError {
    #[error("Invalid shift configuration: {0}")]
    InvalidConfiguration(String),
}

/// A half-open `[start, end)` interval on a single clinic day, minute granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// The `HH:MM` start label shown on the front-desk calendar.
    pub fn label(&self) -> String {
        self.start.format("%H:%M").to_string()
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Free,
    Booked,
    Past,
}

/// An interval held by an active appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedInterval {
    pub appointment_id: Uuid,
    pub slot: TimeSlot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedSlot {
    #[serde(flatten)]
    pub slot: TimeSlot,
    pub status: SlotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booked_by: Option<BookedInterval>,
}

impl AnnotatedSlot {
    pub fn is_available(&self) -> bool {
        self.status == SlotStatus::Free
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorShift {
    pub doctor_id: Uuid,
    #[serde(with = "hhmm")]
    pub shift_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub shift_end: NaiveTime,
    pub slot_length_minutes: i64,
}

impl DoctorShift {
    /// Whether `slot` lies entirely within working hours.
    pub fn covers(&self, slot: &TimeSlot) -> bool {
        slot.start >= self.shift_start && slot.end <= self.shift_end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAvailability {
    pub slot: String,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorAvailabilityView {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub slots: Vec<AnnotatedSlot>,
}

impl DoctorAvailabilityView {
    pub fn summary(&self) -> Vec<SlotAvailability> {
        self.slots
            .iter()
            .map(|annotated| SlotAvailability {
                slot: annotated.slot.label(),
                available: annotated.is_available(),
            })
            .collect()
    }

    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_available()).count()
    }
}

/// Serde helpers for clinic wall-clock times written as `HH:MM`.
///
/// Parsing also accepts `HH:MM:SS`; seconds are truncated since bookings
/// have minute granularity.
pub mod hhmm {
    use chrono::{NaiveTime, Timelike};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid time '{}', expected HH:MM", raw)))
    }

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .ok()
            .and_then(|t| t.with_second(0))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => super::serialize(t, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveTime>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid time '{}', expected HH:MM", raw))),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let first = TimeSlot::new(t(9, 0), t(9, 30));
        let second = TimeSlot::new(t(9, 30), t(10, 0));
        let straddling = TimeSlot::new(t(9, 15), t(9, 45));

        assert!(!first.overlaps(&second));
        assert!(first.overlaps(&straddling));
        assert!(straddling.overlaps(&second));
    }

    #[test]
    fn slots_serialize_as_hour_minute_strings() {
        let slot = TimeSlot::new(t(8, 0), t(8, 30));
        let json = serde_json::to_value(slot).unwrap();
        assert_eq!(json, serde_json::json!({"start": "08:00", "end": "08:30"}));

        let parsed: TimeSlot = serde_json::from_str(r#"{"start":"13:30:00","end":"14:00"}"#).unwrap();
        assert_eq!(parsed, TimeSlot::new(t(13, 30), t(14, 0)));
    }
}
