use super::naming::{Destination, NamingError, NamingPolicy};
use crate::aggregator_core::EventRecord;
use std::collections::HashMap;

/// Events of one destination, in receipt order
#[derive(Debug, Clone)]
pub struct DestinationGroup {
    pub destination: Destination,
    pub events: Vec<EventRecord>,
}

/// Events grouped by destination, destinations in first-seen order
#[derive(Debug, Default)]
pub struct EventBatch {
    groups: Vec<DestinationGroup>,
    index: HashMap<String, usize>,
    rejected: usize,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch, dropping events whose destination cannot be named
    pub fn from_events(events: impl IntoIterator<Item = EventRecord>, naming: &NamingPolicy) -> Self {
        let mut batch = Self::new();
        for event in events {
            if let Err(e) = batch.push(event, naming) {
                log::error!("Event dropped, no valid destination: {}", e);
            }
        }
        batch
    }

    pub fn push(&mut self, event: EventRecord, naming: &NamingPolicy) -> Result<(), NamingError> {
        let destination = match naming.destination(&event) {
            Ok(d) => d,
            Err(e) => {
                self.rejected += 1;
                return Err(e);
            }
        };

        let key = destination.key();
        match self.index.get(&key) {
            Some(&i) => self.groups[i].events.push(event),
            None => {
                self.index.insert(key, self.groups.len());
                self.groups.push(DestinationGroup {
                    destination,
                    events: vec![event],
                });
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn groups(&self) -> &[DestinationGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<DestinationGroup> {
        self.groups
    }

    pub fn event_count(&self) -> usize {
        self.groups.iter().map(|g| g.events.len()).sum()
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, ts: i64) -> EventRecord {
        EventRecord::new("city", "/parks", id, "Sensor", ts, vec![])
    }

    #[test]
    fn test_groups_keep_first_seen_order() {
        let naming = NamingPolicy::default();
        let batch = EventBatch::from_events(
            vec![event("B", 1), event("A", 2), event("B", 3), event("C", 4), event("A", 5)],
            &naming,
        );

        let tables: Vec<&str> = batch.groups().iter().map(|g| g.destination.table.as_str()).collect();
        assert_eq!(tables, vec!["parks_B_Sensor", "parks_A_Sensor", "parks_C_Sensor"]);

        let b_times: Vec<i64> = batch.groups()[0].events.iter().map(|e| e.received_at_millis).collect();
        assert_eq!(b_times, vec![1, 3]);
        assert_eq!(batch.event_count(), 5);
    }

    #[test]
    fn test_unnameable_events_are_rejected() {
        let naming = NamingPolicy {
            max_name_length: 10,
            ..NamingPolicy::default()
        };
        let batch = EventBatch::from_events(vec![event("A", 1), event("very-long-entity", 2)], &naming);

        assert_eq!(batch.event_count(), 1);
        assert_eq!(batch.rejected(), 1);
    }
}
