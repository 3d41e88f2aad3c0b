//! In-memory table and its relational operators.
//!
//! Every operator returns a new [`Table`] and leaves the receiver untouched.
//! Column names stay unique across all operations.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::group::GroupedTable;
use crate::key::{row_key, KeyPart};
use crate::row::Row;
use crate::value::Value;

/// Widest cell rendered by [`Table::preview`].
const PREVIEW_CELL_WIDTH: usize = 24;

/// Join flavour for [`Table::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// Ordered column names plus ordered rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

fn unique_columns<I, S>(columns: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    columns
        .into_iter()
        .map(Into::into)
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

impl Table {
    /// Build a table; repeated column names keep their first position.
    pub fn new<I, S>(columns: I, rows: Vec<Row>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: unique_columns(columns),
            rows,
        }
    }

    /// Zero-row table with the given schema.
    pub fn empty<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(columns, Vec::new())
    }

    /// Build a table from positional rows.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::DuplicateColumn`] for repeated names and
    /// [`TableError::ArityMismatch`] for rows of the wrong width.
    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for column in columns {
            let column = column.into();
            if names.contains(&column) {
                return Err(TableError::DuplicateColumn(column));
            }
            names.push(column);
        }

        let mut built = Vec::with_capacity(rows.len());
        for (idx, values) in rows.into_iter().enumerate() {
            if values.len() != names.len() {
                return Err(TableError::ArityMismatch {
                    row: idx,
                    expected: names.len(),
                    found: values.len(),
                });
            }
            built.push(names.iter().cloned().zip(values).collect());
        }

        Ok(Self {
            columns: names,
            rows: built,
        })
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// All values of one column in row order (nulls included).
    pub fn column_values<'a, 'b>(&'a self, column: &'b str) -> impl Iterator<Item = &'a Value> + 'b
    where
        'a: 'b,
    {
        self.rows.iter().map(move |r| r.get(column))
    }

    /// First non-null value of `column`, used for type inference.
    #[must_use]
    pub fn sample(&self, column: &str) -> Option<&Value> {
        self.column_values(column).find(|v| !v.is_null())
    }

    // -----------------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------------

    /// Project onto `columns`. Unknown names produce all-null columns.
    #[must_use]
    pub fn select<S: AsRef<str>>(&self, columns: &[S]) -> Self {
        let names = unique_columns(columns.iter().map(|c| c.as_ref().to_string()));
        let rows = self
            .rows
            .iter()
            .map(|row| {
                names
                    .iter()
                    .filter(|c| row.contains(c))
                    .map(|c| (c.clone(), row.get(c).clone()))
                    .collect()
            })
            .collect();
        Self {
            columns: names,
            rows,
        }
    }

    #[must_use]
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Row) -> bool,
    {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    /// Add `name` (or overwrite it in place) with a value computed per row.
    #[must_use]
    pub fn with_column<F>(&self, name: &str, compute: F) -> Self
    where
        F: Fn(&Row) -> Value,
    {
        let mut columns = self.columns.clone();
        if !self.has_column(name) {
            columns.push(name.to_string());
        }
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut out = row.clone();
                out.set(name, compute(row));
                out
            })
            .collect();
        Self { columns, rows }
    }

    #[must_use]
    pub fn drop_column(&self, name: &str) -> Self {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut out = row.clone();
                out.remove(name);
                out
            })
            .collect();
        Self {
            columns: self.columns.iter().filter(|c| *c != name).cloned().collect(),
            rows,
        }
    }

    /// Stable sort on one column using [`Value::compare`].
    #[must_use]
    pub fn order_by(&self, column: &str, ascending: bool) -> Self {
        let mut rows = self.rows.clone();
        if ascending {
            rows.sort_by(|a, b| a.get(column).compare(b.get(column)));
        } else {
            rows.sort_by(|a, b| b.get(column).compare(a.get(column)));
        }
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }

    #[must_use]
    pub fn limit(&self, n: usize) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Equi-join on a single column present in both tables.
    ///
    /// Output columns are this table's columns followed by the other table's
    /// columns minus the key. Null keys never match. Every matching pair
    /// yields one row; for [`JoinKind::Left`] unmatched rows of this table
    /// are kept with the other table's columns null.
    #[must_use]
    pub fn join(&self, other: &Self, on: &str, kind: JoinKind) -> Self {
        let right_only: Vec<&String> = other
            .columns
            .iter()
            .filter(|c| *c != on && !self.has_column(c))
            .collect();
        let columns = unique_columns(
            self.columns
                .iter()
                .chain(other.columns.iter().filter(|c| *c != on))
                .cloned(),
        );

        let mut index: HashMap<KeyPart, Vec<&Row>> = HashMap::new();
        for row in &other.rows {
            let key = row.get(on);
            if !key.is_null() {
                index.entry(KeyPart::from(key)).or_default().push(row);
            }
        }

        let mut rows = Vec::new();
        for left in &self.rows {
            let key = left.get(on);
            let matches = if key.is_null() {
                None
            } else {
                index.get(&KeyPart::from(key))
            };
            match matches {
                Some(matched) => {
                    for right in matched {
                        let mut merged = left.clone();
                        for (column, value) in right.iter().filter(|(c, _)| *c != on) {
                            merged.set(column, value.clone());
                        }
                        rows.push(merged);
                    }
                }
                None if kind == JoinKind::Left => {
                    let mut merged = left.clone();
                    for column in &right_only {
                        merged.set(column.as_str(), Value::Null);
                    }
                    rows.push(merged);
                }
                None => {}
            }
        }

        Self { columns, rows }
    }

    /// Concatenate rows of two tables with identical ordered columns.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::SchemaMismatch`] when the column lists differ.
    pub fn union(&self, other: &Self) -> Result<Self, TableError> {
        if self.columns != other.columns {
            return Err(TableError::SchemaMismatch {
                left: self.columns.clone(),
                right: other.columns.clone(),
            });
        }
        let mut rows = self.rows.clone();
        rows.extend(other.rows.iter().cloned());
        Ok(Self {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Drop rows whose full composite key was already seen; first wins.
    #[must_use]
    pub fn distinct(&self) -> Self {
        let mut seen = HashSet::new();
        let rows = self
            .rows
            .iter()
            .filter(|row| seen.insert(row_key(row, &self.columns)))
            .cloned()
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Group rows by the composite key of `columns`.
    #[must_use]
    pub fn group_by<S: AsRef<str>>(&self, columns: &[S]) -> GroupedTable<'_> {
        GroupedTable::new(
            self,
            unique_columns(columns.iter().map(|c| c.as_ref().to_string())),
        )
    }

    /// Fixed-width text rendering of at most `max_rows` rows.
    #[must_use]
    pub fn preview(&self, max_rows: usize) -> String {
        let clip = |s: String| -> String {
            if s.chars().count() > PREVIEW_CELL_WIDTH {
                let mut cut: String = s.chars().take(PREVIEW_CELL_WIDTH - 1).collect();
                cut.push('~');
                cut
            } else {
                s
            }
        };

        let shown: Vec<Vec<String>> = self
            .rows
            .iter()
            .take(max_rows)
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| clip(row.get(c).to_string()))
                    .collect()
            })
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                shown
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(clip(c.clone()).chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        let header: Vec<String> = self.columns.iter().map(|c| clip(c.clone())).collect();
        for line in std::iter::once(&header).chain(shown.iter()) {
            let cells: Vec<String> = line
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{cell:<w$}"))
                .collect();
            let _ = writeln!(out, "| {} |", cells.join(" | "));
        }
        if self.rows.len() > max_rows {
            let _ = writeln!(out, "({} more row(s))", self.rows.len() - max_rows);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Table {
        Table::from_rows(
            ["id", "name", "dept"],
            vec![
                vec![1.into(), "ada".into(), 10.into()],
                vec![2.into(), "bob".into(), 20.into()],
                vec![3.into(), "cy".into(), Value::Null],
            ],
        )
        .unwrap()
    }

    fn depts() -> Table {
        Table::from_rows(
            ["dept", "dept_name"],
            vec![
                vec![10.into(), "eng".into()],
                vec![10.into(), "research".into()],
                vec![30.into(), "ops".into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn from_rows_rejects_bad_arity() {
        let err = Table::from_rows(["a", "b"], vec![vec![1.into()]]).unwrap_err();
        assert_eq!(
            err,
            TableError::ArityMismatch {
                row: 0,
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn select_projects_and_null_fills_unknown() {
        let t = people().select(&["name", "missing"]);
        assert_eq!(t.columns(), ["name", "missing"]);
        assert!(t.rows()[0].get("missing").is_null());
        assert!(t.rows()[0].get("id").is_null());
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn operators_leave_source_untouched() {
        let source = people();
        let before = source.clone();
        let _ = source.with_column("x", |_| Value::Int32(1));
        let _ = source.drop_column("name");
        let _ = source.order_by("id", false);
        assert_eq!(source, before);
    }

    #[test]
    fn with_column_overwrites_without_duplicating() {
        let t = people().with_column("name", |r| {
            Value::Text(r.get("name").as_str().unwrap().to_uppercase())
        });
        assert_eq!(t.columns(), ["id", "name", "dept"]);
        assert_eq!(t.rows()[1].get("name"), &Value::from("BOB"));
    }

    #[test]
    fn drop_column_removes_from_schema_and_rows() {
        let t = people().drop_column("dept");
        assert_eq!(t.columns(), ["id", "name"]);
        assert!(!t.rows()[0].contains("dept"));
    }

    #[test]
    fn order_by_is_stable_and_puts_nulls_first() {
        let t = people().order_by("dept", true);
        let ids: Vec<i64> = t.column_values("id").map(|v| v.as_i64().unwrap()).collect();
        assert_eq!(ids, vec![3, 1, 2]);

        let tied = Table::from_rows(
            ["k", "seq"],
            vec![
                vec![1.into(), 1.into()],
                vec![0.into(), 2.into()],
                vec![1.into(), 3.into()],
            ],
        )
        .unwrap()
        .order_by("k", false);
        let seqs: Vec<i64> = tied.column_values("seq").map(|v| v.as_i64().unwrap()).collect();
        assert_eq!(seqs, vec![1, 3, 2]);
    }

    #[test]
    fn limit_takes_prefix() {
        assert_eq!(people().limit(2).len(), 2);
        assert_eq!(people().limit(10).len(), 3);
    }

    #[test]
    fn inner_join_multiplies_matches_and_drops_unmatched() {
        let t = people().join(&depts(), "dept", JoinKind::Inner);
        assert_eq!(t.columns(), ["id", "name", "dept", "dept_name"]);
        assert_eq!(t.len(), 2);
        assert!(t.rows().iter().all(|r| r.get("id") == &Value::Int32(1)));
    }

    #[test]
    fn left_join_keeps_unmatched_with_nulls() {
        let t = people().join(&depts(), "dept", JoinKind::Left);
        assert_eq!(t.len(), 4);
        let bob = t
            .rows()
            .iter()
            .find(|r| r.get("name") == &Value::from("bob"))
            .unwrap();
        assert!(bob.get("dept_name").is_null());
        assert!(bob.contains("dept_name"));
        let cy = t
            .rows()
            .iter()
            .find(|r| r.get("name") == &Value::from("cy"))
            .unwrap();
        assert!(cy.get("dept_name").is_null());
    }

    #[test]
    fn null_keys_never_match() {
        let unassigned =
            Table::from_rows(["dept", "dept_name"], vec![vec![Value::Null, "unassigned".into()]])
                .unwrap();
        let depts = depts().union(&unassigned).unwrap();

        let inner = people().join(&depts, "dept", JoinKind::Inner);
        assert!(inner.rows().iter().all(|r| !r.get("dept").is_null()));
        assert!(!inner.column_values("dept_name").any(|v| v == &Value::from("unassigned")));

        let left = people().join(&depts, "dept", JoinKind::Left);
        let cy: Vec<&Row> = left
            .rows()
            .iter()
            .filter(|r| r.get("name") == &Value::from("cy"))
            .collect();
        assert_eq!(cy.len(), 1);
        assert!(cy[0].get("dept_name").is_null());
    }

    #[test]
    fn union_requires_identical_columns() {
        let t = people();
        assert_eq!(t.union(&t).unwrap().len(), 6);
        let err = t.union(&t.select(&["id", "name"])).unwrap_err();
        assert!(matches!(err, TableError::SchemaMismatch { .. }));
        let reordered = t.select(&["name", "id", "dept"]);
        assert!(t.union(&reordered).is_err());
    }

    #[test]
    fn distinct_keeps_first_occurrence() {
        let t = Table::from_rows(
            ["a", "b"],
            vec![
                vec!["x,y".into(), "z".into()],
                vec!["x".into(), "y,z".into()],
                vec!["x,y".into(), "z".into()],
            ],
        )
        .unwrap();
        assert_eq!(t.distinct().len(), 2);
    }

    #[test]
    fn preview_renders_header_and_overflow() {
        let text = people().preview(2);
        assert!(text.starts_with("| id | name | dept |"), "got: {text}");
        assert!(text.contains("(1 more row(s))"));
    }
}
