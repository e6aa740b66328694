use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::error::SchedulingError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl PatientRecord {
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Read-only view of the clinic's patient registry.
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<PatientRecord>, SchedulingError>;
}

/// Patient registry hosted behind PostgREST.
pub struct SupabasePatientDirectory {
    client: SupabaseClient,
}

impl SupabasePatientDirectory {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PatientDirectory for SupabasePatientDirectory {
    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<PatientRecord>, SchedulingError> {
        debug!("Looking up patient {} in the registry", patient_id);

        let query = format!("id=eq.{}&select=id,first_name,last_name", patient_id);
        let rows: Vec<PatientRecord> = self
            .client
            .select("patients", &query)
            .await
            .map_err(|e| {
                error!("Patient registry lookup for {} failed: {}", patient_id, e);
                SchedulingError::PatientDirectory(e.to_string())
            })?;

        Ok(rows.into_iter().next())
    }
}

/// In-process registry for deployments without a hosted one, and for tests.
#[derive(Default)]
pub struct StaticPatientDirectory {
    patients: RwLock<HashMap<Uuid, PatientRecord>>,
    permissive: bool,
}

impl StaticPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts any patient id; unknown patients come back without a name.
    pub fn permissive() -> Self {
        Self {
            patients: RwLock::new(HashMap::new()),
            permissive: true,
        }
    }

    pub async fn register(&self, record: PatientRecord) {
        self.patients.write().await.insert(record.id, record);
    }
}

#[async_trait]
impl PatientDirectory for StaticPatientDirectory {
    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<PatientRecord>, SchedulingError> {
        let known = self.patients.read().await.get(&patient_id).cloned();
        if known.is_some() || !self.permissive {
            return Ok(known);
        }

        Ok(Some(PatientRecord {
            id: patient_id,
            first_name: None,
            last_name: None,
        }))
    }
}
