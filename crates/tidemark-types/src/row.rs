use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

static NULL: Value = Value::Null;

/// One table row: column name to value. Columns absent from the map read
/// as [`Value::Null`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    values: HashMap<String, Value>,
}

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `column`, or `Null` when the row does not carry it.
    #[must_use]
    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&NULL)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_column_reads_as_null() {
        let row: Row = [("a", 1)].into_iter().collect();
        assert_eq!(row.get("a"), &Value::Int32(1));
        assert!(row.get("b").is_null());
        assert!(!row.contains("b"));
    }

    #[test]
    fn set_overwrites() {
        let mut row = Row::new();
        row.set("a", "x");
        row.set("a", "y");
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("a"), &Value::from("y"));
    }
}
