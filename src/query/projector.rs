//! Row projection.
//!
//! Rows arrive as ordered `{key, value}` lists. Projection turns them into
//! records keyed by column, against a column set discovered once from the
//! first row of the first page. Projection never fails: blank keys, NULLs and
//! unknown columns degrade to absent values.

use std::collections::HashMap;

use crate::backend::{Cell, RawRow};

/// A normalized result row: column key to value.
///
/// Absent keys mean NULL or "not delivered"; the two are not distinguished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    values: HashMap<String, String>,
}

impl Record {
    /// Returns the value of `column`, if present.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// Number of non-absent values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if every column is absent.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values laid out in `columns` order, for table rendering.
    pub fn values_in<'a>(&'a self, columns: &'a [String]) -> impl Iterator<Item = Option<&'a str>> + 'a {
        columns.iter().map(move |column| self.get(column))
    }
}

/// Derives the display column order from a row: distinct non-blank keys in
/// the order they first appear. A row with only blank keys yields no columns.
pub fn discover_columns(row: &[Cell]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::with_capacity(row.len());
    for cell in row {
        if cell.key.is_empty() || columns.iter().any(|c| *c == cell.key) {
            continue;
        }
        columns.push(cell.key.clone());
    }
    columns
}

/// Projects a raw row onto `columns`.
///
/// Keys outside `columns` are dropped, so a record never carries more columns
/// than the header. When a key repeats, the later cell wins.
pub fn project(row: &RawRow, columns: &[String]) -> Record {
    let mut values = HashMap::with_capacity(columns.len());
    for cell in row {
        if !columns.iter().any(|c| *c == cell.key) {
            continue;
        }
        match &cell.value {
            Some(value) => {
                values.insert(cell.key.clone(), value.clone());
            }
            None => {
                values.remove(&cell.key);
            }
        }
    }
    Record { values }
}
