//! Rows and row identities.

use crate::value::{Key, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A row: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Builds a [`Row`] from `column => value` pairs.
///
/// ```
/// use rowlive_store::{row, Value};
///
/// let player = row! { "name" => "Ann", "money" => 500 };
/// assert_eq!(player["money"], Value::Integer(500));
/// ```
#[macro_export]
macro_rules! row {
    () => {
        $crate::Row::new()
    };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::Row::new();
        $(
            row.insert(::std::string::String::from($column), $crate::Value::from($value));
        )+
        row
    }};
}

/// The identifier of one row: an ordered, non-empty list of
/// `(column, value)` pairs.
///
/// The first pair is the primary identifier used as the collection key.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    parts: Vec<(String, Value)>,
}

impl Identity {
    /// Creates an identity from ordered `(column, value)` pairs.
    ///
    /// Returns `None` when `parts` is empty.
    pub fn new(parts: Vec<(String, Value)>) -> Option<Self> {
        if parts.is_empty() {
            None
        } else {
            Some(Self { parts })
        }
    }

    /// Creates a single-column identity.
    pub fn single(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            parts: vec![(column.into(), value.into())],
        }
    }

    /// Extracts the identity for `columns` from `row`.
    ///
    /// Returns the first missing column on failure.
    pub fn from_row<'a>(columns: &'a [String], row: &Row) -> Result<Self, &'a str> {
        let mut parts = Vec::with_capacity(columns.len());
        for column in columns {
            match row.get(column) {
                Some(value) => parts.push((column.clone(), value.clone())),
                None => return Err(column.as_str()),
            }
        }
        Self::new(parts).ok_or("")
    }

    /// Returns the primary (first) identifier column.
    pub fn primary_column(&self) -> &str {
        &self.parts[0].0
    }

    /// Returns the primary (first) identifier value.
    pub fn primary_value(&self) -> &Value {
        &self.parts[0].1
    }

    /// Returns the collection key of this identity.
    pub fn key(&self) -> Key {
        Key::new(self.primary_value())
    }

    /// Returns the identifier columns in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(c, _)| c.as_str())
    }

    /// Returns true if `column` is part of this identity.
    pub fn contains(&self, column: &str) -> bool {
        self.parts.iter().any(|(c, _)| c == column)
    }

    /// Returns the `(column, value)` pairs.
    pub fn parts(&self) -> &[(String, Value)] {
        &self.parts
    }

    /// Returns true if `row` carries every identifier value of this identity.
    pub fn matches(&self, row: &Row) -> bool {
        self.parts
            .iter()
            .all(|(c, v)| row.get(c).is_some_and(|rv| rv.loose_eq(v)))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (column, value)) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            write!(f, "{column}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_macro_builds_values() {
        let row = row! { "id" => 2, "name" => "Ann", "rich" => true };
        assert_eq!(row.len(), 3);
        assert_eq!(row["id"], Value::Integer(2));
        assert_eq!(row["name"], Value::from("Ann"));
        assert!(row!().is_empty());
    }

    #[test]
    fn identity_from_row() {
        let row = row! { "publisher" => 100, "advertiser" => 200, "ip" => "127.0.0.1" };
        let columns = vec!["publisher".to_string(), "advertiser".to_string()];
        let identity = Identity::from_row(&columns, &row).unwrap();

        assert_eq!(identity.primary_column(), "publisher");
        assert_eq!(identity.key(), Key::from(100));
        assert!(identity.contains("advertiser"));
        assert!(!identity.contains("ip"));
        assert_eq!(identity.to_string(), "publisher=100 AND advertiser=200");
    }

    #[test]
    fn identity_reports_missing_column() {
        let row = row! { "name" => "Ann" };
        let columns = vec!["id".to_string()];
        assert_eq!(Identity::from_row(&columns, &row), Err("id"));
    }

    #[test]
    fn identity_matches_rows_loosely() {
        let identity = Identity::single("id", 2);
        assert!(identity.matches(&row! { "id" => "2", "name" => "Ann" }));
        assert!(!identity.matches(&row! { "id" => 3 }));
        assert!(Identity::new(Vec::new()).is_none());
    }
}
