//! Process-wide, per-destination last-data state
//!
//! Trackers are created on the first event for a destination and kept for the
//! lifetime of the registry. Each tracker sits behind its own lock so separate
//! destinations can be aggregated in parallel.

use super::last_data::{LastDataOptions, LastDataTracker};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

pub type SharedTracker = Arc<Mutex<LastDataTracker>>;

#[derive(Debug, Default)]
pub struct LastDataRegistry {
    options: LastDataOptions,
    trackers: Mutex<HashMap<String, SharedTracker>>,
}

impl LastDataRegistry {
    pub fn new(options: LastDataOptions) -> Self {
        Self {
            options,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    /// Tracker for `destination`, created on first use
    pub fn tracker_for(&self, destination: &str) -> SharedTracker {
        let mut trackers = self.trackers.lock().unwrap_or_else(PoisonError::into_inner);
        trackers
            .entry(destination.to_string())
            .or_insert_with(|| {
                log::debug!("Created last-data tracker for destination {}", destination);
                Arc::new(Mutex::new(LastDataTracker::new(self.options.clone())))
            })
            .clone()
    }

    #[cfg(test)]
    pub fn get(&self, destination: &str) -> Option<SharedTracker> {
        let trackers = self.trackers.lock().unwrap_or_else(PoisonError::into_inner);
        trackers.get(destination).cloned()
    }

    pub fn destination_count(&self) -> usize {
        self.trackers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
