use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::QueueError;
use crate::models::{QueueCategory, SequenceKey};
use crate::services::store::VisitStore;

/// Front-desk ticket such as `C-007`: category prefix plus the day's
/// sequence within that category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct QueueNumber {
    pub category: QueueCategory,
    pub sequence: u64,
}

impl QueueNumber {
    pub fn new(category: QueueCategory, sequence: u64) -> Self {
        Self { category, sequence }
    }
}

impl fmt::Display for QueueNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}", self.category.prefix(), self.sequence)
    }
}

impl FromStr for QueueNumber {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (prefix, sequence) = raw
            .split_once('-')
            .ok_or_else(|| format!("queue number '{}' has no prefix", raw))?;

        let mut chars = prefix.chars();
        let category = match (chars.next(), chars.next()) {
            (Some(c), None) => QueueCategory::from_prefix(c),
            _ => None,
        }
        .ok_or_else(|| format!("unknown queue prefix '{}'", prefix))?;

        let sequence = sequence
            .parse()
            .map_err(|_| format!("invalid queue sequence '{}'", sequence))?;

        Ok(Self { category, sequence })
    }
}

impl From<QueueNumber> for String {
    fn from(number: QueueNumber) -> Self {
        number.to_string()
    }
}

impl TryFrom<String> for QueueNumber {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

/// Hands out the next ticket for `category` on `service_day`.
///
/// Counters live in the store, so numbers are never reused even when a
/// visit is later removed.
pub async fn assign_queue_number(
    store: &dyn VisitStore,
    service_day: NaiveDate,
    category: QueueCategory,
) -> Result<QueueNumber, QueueError> {
    let sequence = store
        .next_sequence(SequenceKey {
            service_day,
            scope: Some(category),
        })
        .await?;

    let number = QueueNumber::new(category, sequence);
    debug!("Assigned queue number {} for {}", number, service_day);
    Ok(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::InMemoryVisitStore;

    #[test]
    fn tickets_are_zero_padded_and_parse_back() {
        let number = QueueNumber::new(QueueCategory::Pharmacy, 7);
        assert_eq!(number.to_string(), "P-007");
        assert_eq!("P-007".parse::<QueueNumber>(), Ok(number));
        assert!("X-001".parse::<QueueNumber>().is_err());
        assert!("C7".parse::<QueueNumber>().is_err());
    }

    #[tokio::test]
    async fn sequences_are_independent_per_category_and_day() {
        let store = InMemoryVisitStore::new();
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let tuesday = monday.succ_opt().unwrap();

        let c1 = assign_queue_number(&store, monday, QueueCategory::Consultation).await.unwrap();
        let c2 = assign_queue_number(&store, monday, QueueCategory::Consultation).await.unwrap();
        let p1 = assign_queue_number(&store, monday, QueueCategory::Pharmacy).await.unwrap();
        let next_day = assign_queue_number(&store, tuesday, QueueCategory::Consultation).await.unwrap();

        assert_eq!((c1.to_string(), c2.to_string()), ("C-001".to_string(), "C-002".to_string()));
        assert_eq!(p1.to_string(), "P-001");
        assert_eq!(next_day.to_string(), "C-001");
        assert!(c1 < c2);
    }
}
