//! Column-ordered accumulator shared by both aggregation strategies
//!
//! An `Aggregation` maps column names to value sequences. Column order is the
//! order in which names were first declared and is part of the output
//! contract. Sequences never shrink except through `remove_row`, which drops
//! the same index from every column.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    names: Vec<String>,
    index: HashMap<String, usize>,
    values: Vec<Vec<Value>>,
}

impl Aggregation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an empty column. Returns false if the column already existed.
    pub fn declare(&mut self, column: &str) -> bool {
        self.declare_with(column, Vec::new())
    }

    /// Declare a column holding `backfill` nulls. No-op if the column exists.
    pub fn declare_backfilled(&mut self, column: &str, backfill: usize) -> bool {
        self.declare_with(column, vec![Value::Null; backfill])
    }

    fn declare_with(&mut self, column: &str, values: Vec<Value>) -> bool {
        if self.index.contains_key(column) {
            return false;
        }
        self.index.insert(column.to_string(), self.names.len());
        self.names.push(column.to_string());
        self.values.push(values);
        true
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    pub fn get(&self, column: &str) -> Option<&[Value]> {
        self.index.get(column).map(|&i| self.values[i].as_slice())
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut Vec<Value>> {
        self.index.get(column).map(|&i| &mut self.values[i])
    }

    /// Append a value, creating the column with `backfill` leading nulls if missing
    pub fn push(&mut self, column: &str, backfill: usize, value: Value) {
        self.declare_backfilled(column, backfill);
        if let Some(values) = self.get_mut(column) {
            values.push(value);
        }
    }

    /// Column names in declaration order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn column_count(&self) -> usize {
        self.names.len()
    }

    pub fn column_len(&self, column: &str) -> usize {
        self.get(column).map_or(0, <[Value]>::len)
    }

    /// Number of rows, i.e. the length of the longest column
    pub fn row_count(&self) -> usize {
        self.values.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Append nulls to every column shorter than `len`
    pub fn pad_to(&mut self, len: usize) {
        for values in &mut self.values {
            if values.len() < len {
                values.resize(len, Value::Null);
            }
        }
    }

    /// True when every column holds the same number of values
    pub fn is_aligned(&self) -> bool {
        let rows = self.row_count();
        self.values.iter().all(|v| v.len() == rows)
    }

    /// Row `i` as (column, value) pairs in column order; short columns yield null
    pub fn row(&self, i: usize) -> Vec<(String, Value)> {
        self.names
            .iter()
            .zip(&self.values)
            .map(|(name, values)| (name.clone(), values.get(i).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    /// Value at (`column`, `i`), if present
    pub fn value(&self, column: &str, i: usize) -> Option<&Value> {
        self.get(column).and_then(|values| values.get(i))
    }

    /// Remove row `i` from every column that has it
    pub fn remove_row(&mut self, i: usize) {
        for values in &mut self.values {
            if i < values.len() {
                values.remove(i);
            }
        }
    }

    /// Copy without the columns rejected by `keep`
    pub fn filtered<F>(&self, mut keep: F) -> Aggregation
    where
        F: FnMut(&str) -> bool,
    {
        let mut out = Aggregation::new();
        for (name, values) in self.names.iter().zip(&self.values) {
            if keep(name) {
                out.declare_with(name, values.clone());
            }
        }
        out
    }
}

impl Serialize for Aggregation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.names.len()))?;
        for (name, values) in self.names.iter().zip(&self.values) {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declaration_order_is_preserved() {
        let mut agg = Aggregation::new();
        agg.declare("b");
        agg.declare("a");
        agg.declare("c");
        assert!(!agg.declare("a"));

        let cols: Vec<&str> = agg.columns().collect();
        assert_eq!(cols, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_push_backfills_new_column() {
        let mut agg = Aggregation::new();
        agg.push("a", 0, json!(1));
        agg.push("a", 0, json!(2));
        agg.push("b", 1, json!("x"));

        assert_eq!(agg.get("b").unwrap(), &[Value::Null, json!("x")]);
        assert!(agg.is_aligned());
        assert_eq!(agg.row_count(), 2);
    }

    #[test]
    fn test_pad_and_remove_row() {
        let mut agg = Aggregation::new();
        agg.push("a", 0, json!(1));
        agg.push("a", 0, json!(2));
        agg.push("a", 0, json!(3));
        agg.declare("b");
        agg.pad_to(3);
        assert!(agg.is_aligned());

        agg.remove_row(1);
        assert_eq!(agg.get("a").unwrap(), &[json!(1), json!(3)]);
        assert_eq!(agg.column_len("b"), 2);
    }

    #[test]
    fn test_serializes_as_ordered_map() {
        let mut agg = Aggregation::new();
        agg.push("z", 0, json!(1));
        agg.push("a", 0, json!(null));

        let text = serde_json::to_string(&agg).unwrap();
        assert_eq!(text, r#"{"z":[1],"a":[null]}"#);
    }
}
