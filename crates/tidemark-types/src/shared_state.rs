//! The state bag threaded through the steps of one job run.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::table::Table;
use crate::value::Value;

/// Reserved key holding the lower effective-date bound of the current run.
pub const MIN_EFFECTIVE_DATE_KEY: &str = "__minEffectiveDate";

/// Reserved key holding the upper effective-date bound of the current run.
pub const MAX_EFFECTIVE_DATE_KEY: &str = "__maxEffectiveDate";

/// A shared-state entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StateValue {
    Table(Table),
    Scalar(Value),
}

/// Named tables and scalars produced and consumed by steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedState {
    entries: BTreeMap<String, StateValue>,
}

impl SharedState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State seeded with the reserved effective-date bounds.
    #[must_use]
    pub fn for_effective_range(min: NaiveDate, max: NaiveDate) -> Self {
        let mut state = Self::new();
        state.insert_scalar(MIN_EFFECTIVE_DATE_KEY, Value::Date(min));
        state.insert_scalar(MAX_EFFECTIVE_DATE_KEY, Value::Date(max));
        state
    }

    pub fn insert(&mut self, name: impl Into<String>, value: StateValue) {
        self.entries.insert(name.into(), value);
    }

    pub fn insert_table(&mut self, name: impl Into<String>, table: Table) {
        self.insert(name, StateValue::Table(table));
    }

    pub fn insert_scalar(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.insert(name, StateValue::Scalar(value.into()));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StateValue> {
        self.entries.get(name)
    }

    /// Table stored under `name`; `None` if absent or a scalar.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        match self.entries.get(name) {
            Some(StateValue::Table(t)) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn scalar(&self, name: &str) -> Option<&Value> {
        match self.entries.get(name) {
            Some(StateValue::Scalar(v)) => Some(v),
            _ => None,
        }
    }

    /// Date scalar under `name`; `None` if absent or not a date.
    #[must_use]
    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        self.scalar(name).and_then(|v| v.as_date().ok())
    }

    #[must_use]
    pub fn min_effective_date(&self) -> Option<NaiveDate> {
        self.date(MIN_EFFECTIVE_DATE_KEY)
    }

    #[must_use]
    pub fn max_effective_date(&self) -> Option<NaiveDate> {
        self.date(MAX_EFFECTIVE_DATE_KEY)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// All tables in key order.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.entries.iter().filter_map(|(k, v)| match v {
            StateValue::Table(t) => Some((k.as_str(), t)),
            StateValue::Scalar(_) => None,
        })
    }

    /// Sum of the row counts of every table.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.tables().map(|(_, t)| t.len() as u64).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn effective_range_seeds_reserved_keys() {
        let state = SharedState::for_effective_range(d("2024-01-01"), d("2024-01-31"));
        assert_eq!(state.min_effective_date(), Some(d("2024-01-01")));
        assert_eq!(state.max_effective_date(), Some(d("2024-01-31")));
        assert_eq!(state.total_rows(), 0);
    }

    #[test]
    fn table_lookup_ignores_scalars() {
        let mut state = SharedState::new();
        state.insert_scalar("x", 1);
        state.insert_table("t", Table::from_rows(["a"], vec![vec![1.into()]]).unwrap());
        assert!(state.table("x").is_none());
        assert_eq!(state.table("t").map(Table::len), Some(1));
        assert_eq!(state.total_rows(), 1);
    }

    #[test]
    fn serializes_for_process_boundaries() {
        let mut state = SharedState::for_effective_range(d("2024-01-01"), d("2024-01-01"));
        state.insert_table("t", Table::from_rows(["a"], vec![vec!["v".into()]]).unwrap());
        let json = serde_json::to_string(&state).unwrap();
        let back: SharedState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
