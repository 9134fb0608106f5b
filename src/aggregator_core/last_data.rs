//! Last-data projection: the most recent row per entity identity
//!
//! The tracker keeps two projections shaped like the destination schema:
//! `current` (latest live row per identity) and `deleted` (latest row of
//! identities whose newest event was a delete). An identity lives in at most
//! one of them, at most once. A new row only replaces the stored one when its
//! timestamp is strictly greater.

use super::aggregation::Aggregation;
use super::error::AggregationError;
use super::record::columns;
use serde_json::Value;

/// Which attributes identify an entity and order its updates
#[derive(Debug, Clone, PartialEq)]
pub struct LastDataOptions {
    /// One or more key names (reserved field or attribute)
    pub unique_key: Vec<String>,
    /// Attribute name, or `recvTime` for the receipt time
    pub timestamp_key: String,
}

impl LastDataOptions {
    /// Parse a comma-separated unique key list
    pub fn new(unique_key: &str, timestamp_key: &str) -> Self {
        Self {
            unique_key: unique_key
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect(),
            timestamp_key: timestamp_key.trim().to_string(),
        }
    }

    pub fn uses_receipt_time(&self) -> bool {
        self.timestamp_key.eq_ignore_ascii_case(columns::RECV_TIME)
    }
}

impl Default for LastDataOptions {
    fn default() -> Self {
        Self::new(columns::ENTITY_ID, columns::RECV_TIME)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastDataOutcome {
    /// Identity not seen before; row appended
    Inserted,
    /// Stored row was older; replaced
    Replaced,
    /// Stored row was as new or newer; nothing changed
    Discarded,
    /// Delete event moved the identity into `deleted`
    Tombstoned,
}

/// Projections handed to the persistence backend
#[derive(Debug, Clone, PartialEq)]
pub struct LastDataSnapshot {
    pub current: Aggregation,
    pub deleted: Aggregation,
    /// Resolved unique-key column names
    pub key_columns: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct Projection {
    rows: Aggregation,
    identities: Vec<String>,
    timestamps: Vec<i64>,
}

impl Projection {
    fn find(&self, identity: &str) -> Option<usize> {
        self.identities.iter().position(|id| id == identity)
    }

    fn remove(&mut self, i: usize) {
        self.rows.remove_row(i);
        self.identities.remove(i);
        self.timestamps.remove(i);
    }

    fn append(&mut self, row: &[(String, Value)], identity: String, timestamp: i64) {
        let existing = self.identities.len();
        for (column, value) in row {
            self.rows.push(column, existing, value.clone());
        }
        self.rows.pad_to(existing + 1);
        self.identities.push(identity);
        self.timestamps.push(timestamp);
    }
}

#[derive(Debug, Clone)]
pub struct LastDataTracker {
    options: LastDataOptions,
    /// Column bound to each configured unique key, fixed by first match
    key_bindings: Vec<Option<String>>,
    /// Attribute bound to the timestamp key, fixed by first match
    timestamp_binding: Option<String>,
    current: Projection,
    deleted: Projection,
    last_timestamp: Option<i64>,
}

impl LastDataTracker {
    pub fn new(options: LastDataOptions) -> Self {
        let key_bindings = options
            .unique_key
            .iter()
            .map(|key| columns::reserved(key).map(str::to_string))
            .collect();

        Self {
            options,
            key_bindings,
            timestamp_binding: None,
            current: Projection::default(),
            deleted: Projection::default(),
            last_timestamp: None,
        }
    }

    pub fn options(&self) -> &LastDataOptions {
        &self.options
    }

    /// Bind any still-unbound unique key matching `attr_name`
    pub fn observe_unique_key(&mut self, attr_name: &str) {
        for (key, binding) in self.options.unique_key.iter().zip(self.key_bindings.iter_mut()) {
            if binding.is_none() && key.eq_ignore_ascii_case(attr_name) {
                log::debug!("Last-data unique key '{}' bound to attribute '{}'", key, attr_name);
                *binding = Some(attr_name.to_string());
            }
        }
    }

    /// True if `attr_name` supplies the timestamp; binds on first match
    pub fn supplies_timestamp(&mut self, attr_name: &str) -> bool {
        if self.options.uses_receipt_time() {
            return false;
        }
        match &self.timestamp_binding {
            Some(bound) => bound == attr_name,
            None if self.options.timestamp_key.eq_ignore_ascii_case(attr_name) => {
                log::debug!(
                    "Last-data timestamp key '{}' bound to attribute '{}'",
                    self.options.timestamp_key,
                    attr_name
                );
                self.timestamp_binding = Some(attr_name.to_string());
                true
            }
            None => false,
        }
    }

    /// Resolve the entity identity from a just-aggregated row
    pub fn identity_of(&self, row: &[(String, Value)], entity_id: &str) -> Result<String, AggregationError> {
        let mut parts = Vec::with_capacity(self.key_bindings.len());

        for (key, binding) in self.options.unique_key.iter().zip(&self.key_bindings) {
            let missing = || AggregationError::MissingUniqueKey {
                key: key.clone(),
                entity_id: entity_id.to_string(),
            };
            let column = binding.as_deref().ok_or_else(missing)?;
            let value = row
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, value)| value)
                .ok_or_else(missing)?;

            match value {
                Value::Null => return Err(missing()),
                Value::String(s) => parts.push(s.clone()),
                other => parts.push(other.to_string()),
            }
        }

        Ok(parts.join(","))
    }

    /// Fold one row into the projections
    pub fn update(
        &mut self,
        row: &[(String, Value)],
        identity: String,
        timestamp: i64,
        delete: bool,
    ) -> LastDataOutcome {
        let in_current = self.current.find(&identity);
        let in_deleted = self.deleted.find(&identity);

        let stored = in_current
            .map(|i| self.current.timestamps[i])
            .or_else(|| in_deleted.map(|i| self.deleted.timestamps[i]));

        if let Some(stored) = stored {
            if timestamp <= stored {
                log::debug!(
                    "Last-data row for '{}' kept (stored={}, incoming={})",
                    identity,
                    stored,
                    timestamp
                );
                return LastDataOutcome::Discarded;
            }
        }

        if let Some(i) = in_current {
            self.current.remove(i);
        }
        if let Some(i) = in_deleted {
            self.deleted.remove(i);
        }

        self.last_timestamp = Some(timestamp);

        if delete {
            self.deleted.append(row, identity, timestamp);
            LastDataOutcome::Tombstoned
        } else {
            let outcome = if stored.is_some() {
                LastDataOutcome::Replaced
            } else {
                LastDataOutcome::Inserted
            };
            self.current.append(row, identity, timestamp);
            outcome
        }
    }

    pub fn current(&self) -> &Aggregation {
        &self.current.rows
    }

    pub fn deleted(&self) -> &Aggregation {
        &self.deleted.rows
    }

    /// Timestamp of the last accepted update
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    /// Stored timestamp for `identity` in `current`
    #[cfg(test)]
    pub fn current_timestamp_of(&self, identity: &str) -> Option<i64> {
        self.current.find(identity).map(|i| self.current.timestamps[i])
    }

    #[cfg(test)]
    pub fn is_tombstoned(&self, identity: &str) -> bool {
        self.deleted.find(identity).is_some()
    }

    pub fn key_columns(&self) -> Vec<String> {
        self.options
            .unique_key
            .iter()
            .zip(&self.key_bindings)
            .map(|(key, binding)| binding.clone().unwrap_or_else(|| key.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> LastDataSnapshot {
        LastDataSnapshot {
            current: self.current.rows.clone(),
            deleted: self.deleted.rows.clone(),
            key_columns: self.key_columns(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(entity: &str, temperature: i64) -> Vec<(String, Value)> {
        vec![
            (columns::ENTITY_ID.to_string(), json!(entity)),
            ("temperature".to_string(), json!(temperature)),
        ]
    }

    fn tracker() -> LastDataTracker {
        LastDataTracker::new(LastDataOptions::default())
    }

    #[test]
    fn test_older_timestamp_is_discarded() {
        let mut t = tracker();
        assert_eq!(t.update(&row("E1", 1), "E1".into(), 100, false), LastDataOutcome::Inserted);
        assert_eq!(t.update(&row("E1", 2), "E1".into(), 50, false), LastDataOutcome::Discarded);
        assert_eq!(t.update(&row("E1", 3), "E1".into(), 100, false), LastDataOutcome::Discarded);

        assert_eq!(t.current().get("temperature").unwrap(), &[json!(1)]);
        assert_eq!(t.current_timestamp_of("E1"), Some(100));
    }

    #[test]
    fn test_newer_timestamp_replaces() {
        let mut t = tracker();
        t.update(&row("E1", 1), "E1".into(), 100, false);
        t.update(&row("E2", 7), "E2".into(), 100, false);
        assert_eq!(t.update(&row("E1", 2), "E1".into(), 150, false), LastDataOutcome::Replaced);

        assert_eq!(t.current().row_count(), 2);
        assert_eq!(t.current().get(columns::ENTITY_ID).unwrap(), &[json!("E2"), json!("E1")]);
        assert_eq!(t.current().get("temperature").unwrap(), &[json!(7), json!(2)]);
        assert_eq!(t.last_timestamp(), Some(150));
    }

    #[test]
    fn test_delete_tombstones_then_newer_update_revives() {
        let mut t = tracker();
        t.update(&row("E1", 1), "E1".into(), 100, false);
        assert_eq!(t.update(&row("E1", 1), "E1".into(), 200, true), LastDataOutcome::Tombstoned);
        assert!(t.current().is_empty());
        assert!(t.is_tombstoned("E1"));

        // stale update after the delete is ignored
        assert_eq!(t.update(&row("E1", 5), "E1".into(), 150, false), LastDataOutcome::Discarded);
        assert!(t.is_tombstoned("E1"));

        assert_eq!(t.update(&row("E1", 9), "E1".into(), 300, false), LastDataOutcome::Replaced);
        assert!(!t.is_tombstoned("E1"));
        assert_eq!(t.current().get("temperature").unwrap(), &[json!(9)]);
        assert!(t.deleted().is_empty());
    }

    #[test]
    fn test_projection_backfills_late_columns() {
        let mut t = tracker();
        t.update(&row("E1", 1), "E1".into(), 100, false);
        let mut wider = row("E2", 2);
        wider.push(("humidity".to_string(), json!(40)));
        t.update(&wider, "E2".into(), 100, false);

        assert_eq!(t.current().get("humidity").unwrap(), &[Value::Null, json!(40)]);
        assert!(t.current().is_aligned());
    }

    #[test]
    fn test_composite_identity_and_bindings() {
        let mut t = LastDataTracker::new(LastDataOptions::new("entityId, RefCode", "observedAt"));
        t.observe_unique_key("refCode");
        assert!(t.supplies_timestamp("observedAt"));
        assert!(!t.supplies_timestamp("OBSERVEDAT"));

        let row = vec![
            (columns::ENTITY_ID.to_string(), json!("E1")),
            ("refCode".to_string(), json!(12)),
        ];
        assert_eq!(t.identity_of(&row, "E1").unwrap(), "E1,12");
        assert_eq!(t.key_columns(), vec!["entityId".to_string(), "refCode".to_string()]);
    }

    #[test]
    fn test_missing_unique_key_value() {
        let mut t = LastDataTracker::new(LastDataOptions::new("refCode", "recvTime"));
        t.observe_unique_key("refCode");
        let row = vec![("refCode".to_string(), Value::Null)];
        assert!(matches!(
            t.identity_of(&row, "E1"),
            Err(AggregationError::MissingUniqueKey { .. })
        ));
    }
}
