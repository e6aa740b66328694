use crate::models::{QueueCategory, QueuedVisit, Visit};

/// The one ordering used everywhere: triage rank first, then arrival.
///
/// Inactive visits are dropped. The sort is stable and keyed on arrival, so
/// equal-priority visits keep their arrival order across any mutation.
pub fn reorder(visits: Vec<Visit>) -> Vec<Visit> {
    let mut active: Vec<Visit> = visits.into_iter().filter(Visit::is_active).collect();
    active.sort_by_key(|v| (v.triage_priority.rank(), v.arrival_seq));
    active
}

/// Orders each sub-queue and attaches 1-based positions within it.
pub fn with_positions(visits: Vec<Visit>, category: Option<QueueCategory>) -> Vec<QueuedVisit> {
    let ordered = reorder(visits);

    QueueCategory::ALL
        .into_iter()
        .filter(|c| category.map_or(true, |wanted| wanted == *c))
        .flat_map(|c| {
            ordered
                .iter()
                .filter(move |v| v.category == c)
                .cloned()
                .enumerate()
                .map(|(index, visit)| QueuedVisit { position: index + 1, visit })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    use crate::models::{QueueNumber, QueueStatus, TriagePriority, VisitStatus};

    fn visit(seq: u64, category: QueueCategory, priority: TriagePriority) -> Visit {
        Visit {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            appointment_id: None,
            service_day: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            category,
            queue_number: QueueNumber::new(category, seq),
            arrival_seq: seq,
            triage_priority: priority,
            queue_status: QueueStatus::Waiting,
            visit_status: VisitStatus::CheckedIn,
            reason: "walk-in".to_string(),
            arrival_time: Utc::now(),
            called_time: None,
            recall_count: 0,
            assigned_doctor_id: None,
            cancellation_reason: None,
            admitted_by: "desk".to_string(),
            completed_at: None,
        }
    }

    #[test]
    fn priority_beats_arrival_and_ties_keep_arrival_order() {
        let arrivals = vec![
            visit(1, QueueCategory::Consultation, TriagePriority::Low),
            visit(2, QueueCategory::Consultation, TriagePriority::Critical),
            visit(3, QueueCategory::Consultation, TriagePriority::High),
            visit(4, QueueCategory::Consultation, TriagePriority::Low),
        ];

        let order: Vec<u64> = reorder(arrivals).iter().map(|v| v.arrival_seq).collect();
        assert_eq!(order, vec![2, 3, 1, 4]);
    }

    #[test]
    fn ordering_ignores_input_order() {
        let mut arrivals = vec![
            visit(4, QueueCategory::Consultation, TriagePriority::Low),
            visit(1, QueueCategory::Consultation, TriagePriority::Low),
            visit(3, QueueCategory::Consultation, TriagePriority::Unknown),
            visit(2, QueueCategory::Consultation, TriagePriority::Medium),
        ];
        arrivals[0].set_status(VisitStatus::InConsultation);

        let order: Vec<u64> = reorder(arrivals).iter().map(|v| v.arrival_seq).collect();
        assert_eq!(order, vec![2, 1, 4, 3]);
    }

    #[test]
    fn finished_visits_leave_the_queue_and_positions_are_per_category() {
        let mut done = visit(1, QueueCategory::Consultation, TriagePriority::Critical);
        done.set_status(VisitStatus::Completed);
        let visits = vec![
            done,
            visit(2, QueueCategory::Pharmacy, TriagePriority::Low),
            visit(3, QueueCategory::Consultation, TriagePriority::Low),
            visit(4, QueueCategory::Pharmacy, TriagePriority::High),
        ];

        let queued = with_positions(visits.clone(), None);
        let summary: Vec<(String, usize)> = queued
            .iter()
            .map(|q| (q.visit.queue_number.to_string(), q.position))
            .collect();
        assert_eq!(
            summary,
            vec![("C-003".to_string(), 1), ("P-004".to_string(), 1), ("P-002".to_string(), 2)]
        );

        assert_eq!(with_positions(visits, Some(QueueCategory::Pharmacy)).len(), 2);
    }
}
