use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::QueueError;
use crate::models::{SequenceKey, Visit};

/// Persistence seam of the queue manager. Writes for one service day are
/// serialized by the manager's day lock.
#[async_trait]
pub trait VisitStore: Send + Sync {
    async fn insert(&self, visit: Visit) -> Result<Visit, QueueError>;

    async fn save(&self, visit: Visit) -> Result<Visit, QueueError>;

    async fn get(&self, id: Uuid) -> Result<Option<Visit>, QueueError>;

    async fn remove(&self, id: Uuid) -> Result<Option<Visit>, QueueError>;

    async fn list_by_day(&self, service_day: NaiveDate) -> Result<Vec<Visit>, QueueError>;

    /// Atomically increments and returns the counter for `key`, starting at 1.
    async fn next_sequence(&self, key: SequenceKey) -> Result<u64, QueueError>;
}

#[derive(Debug, Default)]
struct Tables {
    visits: HashMap<Uuid, Visit>,
    sequences: HashMap<SequenceKey, u64>,
}

#[derive(Debug, Default)]
pub struct InMemoryVisitStore {
    tables: RwLock<Tables>,
}

impl InMemoryVisitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VisitStore for InMemoryVisitStore {
    async fn insert(&self, visit: Visit) -> Result<Visit, QueueError> {
        self.tables.write().await.visits.insert(visit.id, visit.clone());
        Ok(visit)
    }

    async fn save(&self, visit: Visit) -> Result<Visit, QueueError> {
        let mut tables = self.tables.write().await;
        match tables.visits.get_mut(&visit.id) {
            Some(existing) => {
                *existing = visit.clone();
                Ok(visit)
            }
            None => Err(QueueError::VisitNotFound(visit.id)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Visit>, QueueError> {
        Ok(self.tables.read().await.visits.get(&id).cloned())
    }

    async fn remove(&self, id: Uuid) -> Result<Option<Visit>, QueueError> {
        Ok(self.tables.write().await.visits.remove(&id))
    }

    async fn list_by_day(&self, service_day: NaiveDate) -> Result<Vec<Visit>, QueueError> {
        Ok(self
            .tables
            .read()
            .await
            .visits
            .values()
            .filter(|v| v.service_day == service_day)
            .cloned()
            .collect())
    }

    async fn next_sequence(&self, key: SequenceKey) -> Result<u64, QueueError> {
        let mut tables = self.tables.write().await;
        let counter = tables.sequences.entry(key).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
