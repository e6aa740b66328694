use std::env;
use std::str::FromStr;

use chrono::NaiveTime;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub scheduling: SchedulingConfig,
}

/// Front-desk scheduling policy shared by the calendar, ledger and queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingConfig {
    pub slot_length_minutes: i64,
    /// Slots starting earlier than `now - past_grace_minutes` are unbookable.
    pub past_grace_minutes: i64,
    pub default_shift_start: NaiveTime,
    pub default_shift_end: NaiveTime,
    /// Upper bound on how long a booking or admission waits for its key lock.
    pub lock_timeout_ms: u64,
    pub clinic_utc_offset_minutes: i32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            slot_length_minutes: 30,
            past_grace_minutes: 15,
            default_shift_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            default_shift_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            lock_timeout_ms: 2_000,
            clinic_utc_offset_minutes: 0,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            scheduling: SchedulingConfig::from_env(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    /// The hosted patient registry is optional; without it the API falls back
    /// to a local directory.
    pub fn is_patient_registry_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

impl SchedulingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            slot_length_minutes: parse_env("SCHEDULING_SLOT_MINUTES", defaults.slot_length_minutes),
            past_grace_minutes: parse_env("SCHEDULING_PAST_GRACE_MINUTES", defaults.past_grace_minutes),
            default_shift_start: time_env("SCHEDULING_SHIFT_START", defaults.default_shift_start),
            default_shift_end: time_env("SCHEDULING_SHIFT_END", defaults.default_shift_end),
            lock_timeout_ms: parse_env("SCHEDULING_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
            clinic_utc_offset_minutes: parse_env("CLINIC_UTC_OFFSET_MINUTES", defaults.clinic_utc_offset_minutes),
        };

        if config.default_shift_end <= config.default_shift_start || config.slot_length_minutes <= 0 {
            warn!(
                "Default shift {}-{} with {} minute slots is malformed; slot generation will reject it",
                config.default_shift_start, config.default_shift_end, config.slot_length_minutes
            );
        }

        config
    }
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn time_env(key: &str, default: NaiveTime) -> NaiveTime {
    match env::var(key) {
        Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
            .unwrap_or_else(|_| {
                warn!("{} has invalid time '{}', using default {}", key, raw, default.format("%H:%M"));
                default
            }),
        Err(_) => default,
    }
}
