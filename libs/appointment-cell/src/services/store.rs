use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError};

/// Persistence seam of the ledger.
///
/// Conflict decisions are made by the ledger under its per-doctor-day lock;
/// implementations only need read-your-writes consistency plus an atomic
/// idempotency-key check on insert.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Fails with `DuplicateRequest` when the idempotency key is already taken.
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError>;

    /// Replaces an existing record.
    async fn save(&self, appointment: Appointment) -> Result<Appointment, AppointmentError>;

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Appointment>, AppointmentError>;

    async fn list_by_doctor_and_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    async fn list(&self) -> Result<Vec<Appointment>, AppointmentError>;
}

#[derive(Debug, Default)]
struct Tables {
    appointments: HashMap<Uuid, Appointment>,
    by_idempotency_key: HashMap<String, Uuid>,
}

#[derive(Debug, Default)]
pub struct InMemoryAppointmentStore {
    tables: RwLock<Tables>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let mut tables = self.tables.write().await;

        if let Some(key) = &appointment.idempotency_key {
            if let Some(existing) = tables.by_idempotency_key.get(key) {
                return Err(AppointmentError::DuplicateRequest { appointment_id: *existing });
            }
            tables.by_idempotency_key.insert(key.clone(), appointment.id);
        }

        tables.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn save(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let mut tables = self.tables.write().await;
        match tables.appointments.get_mut(&appointment.id) {
            Some(slot) => {
                *slot = appointment.clone();
                Ok(appointment)
            }
            None => Err(AppointmentError::NotFound(appointment.id)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.tables.read().await.appointments.get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Appointment>, AppointmentError> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_idempotency_key
            .get(key)
            .and_then(|id| tables.appointments.get(id))
            .cloned())
    }

    async fn list_by_doctor_and_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self
            .tables
            .read()
            .await
            .appointments
            .values()
            .filter(|a| a.doctor_id == doctor_id && a.date == date)
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self.tables.read().await.appointments.values().cloned().collect())
    }
}
