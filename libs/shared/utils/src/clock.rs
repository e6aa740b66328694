use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use tracing::warn;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock for deterministic scheduling tests.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: RwLock::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wall-clock time as seen from the clinic's front desk.
///
/// Appointments and service days are expressed in clinic-local time; audit
/// timestamps stay in UTC.
#[derive(Clone)]
pub struct ClinicClock {
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl ClinicClock {
    pub fn new(clock: Arc<dyn Clock>, utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| {
            warn!("UTC offset of {} minutes is out of range, using UTC", utc_offset_minutes);
            Utc.fix()
        });
        Self { clock, offset }
    }

    pub fn system(utc_offset_minutes: i32) -> Self {
        Self::new(Arc::new(SystemClock), utc_offset_minutes)
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn now_local(&self) -> NaiveDateTime {
        self.clock.now().with_timezone(&self.offset).naive_local()
    }

    pub fn today(&self) -> NaiveDate {
        self.now_local().date()
    }
}

impl std::fmt::Debug for ClinicClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClinicClock")
            .field("now", &self.clock.now())
            .field("offset", &self.offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn local_time_applies_the_clinic_offset() {
        let fixed = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap()));
        let clinic = ClinicClock::new(fixed.clone(), 60);

        assert_eq!(clinic.today(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(clinic.now_local().format("%H:%M").to_string(), "00:30");

        fixed.advance(Duration::minutes(45));
        assert_eq!(clinic.now_local().format("%H:%M").to_string(), "01:15");
    }
}
