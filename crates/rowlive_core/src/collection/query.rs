//! Collection queries.
//!
//! Every query that selects items returns a branch: a new collection over
//! the same shared items, independent of the collection it was taken from.

use super::{Collection, Item};
use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use rand::seq::SliceRandom;
use rand::Rng;
use rowlive_store::{Key, Row, Value};
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// A comparison used by [`Search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// The field is greater than the operand.
    Gt,
    /// The field loosely equals the operand.
    Eq,
    /// The field is less than the operand.
    Ls,
    /// The field does not loosely equal the operand.
    Nt,
    /// The field's text contains the operand's text.
    Ct,
}

impl Comparator {
    /// Applies the comparison to a field value.
    pub fn matches(self, actual: &Value, operand: &Value) -> bool {
        match self {
            Comparator::Gt => actual.compare(operand) == Some(Ordering::Greater),
            Comparator::Ls => actual.compare(operand) == Some(Ordering::Less),
            Comparator::Eq => actual.loose_eq(operand),
            Comparator::Nt => !actual.loose_eq(operand),
            Comparator::Ct => {
                !actual.is_null() && actual.to_string().contains(&operand.to_string())
            }
        }
    }
}

impl FromStr for Comparator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" => Ok(Comparator::Gt),
            "eq" => Ok(Comparator::Eq),
            "ls" => Ok(Comparator::Ls),
            "nt" => Ok(Comparator::Nt),
            "ct" => Ok(Comparator::Ct),
            other => Err(CoreError::configuration(format!(
                "unknown comparator {other}"
            ))),
        }
    }
}

/// A disjunctive search: an item matches if any term matches.
#[derive(Debug, Clone, Default)]
pub struct Search {
    terms: Vec<(String, Comparator, Value)>,
}

impl Search {
    /// Creates an empty search.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a term.
    #[must_use]
    pub fn term(
        mut self,
        field: impl Into<String>,
        comparator: Comparator,
        operand: impl Into<Value>,
    ) -> Self {
        self.terms.push((field.into(), comparator, operand.into()));
        self
    }

    /// Adds a term from a comparator tag (`gt`, `eq`, `ls`, `nt`, `ct`).
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown tag.
    pub fn parse_term(
        self,
        field: impl Into<String>,
        tag: &str,
        operand: impl Into<Value>,
    ) -> CoreResult<Self> {
        let comparator = tag.parse()?;
        Ok(self.term(field, comparator, operand))
    }

    /// Returns true if there are no terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Returns true if any term matches `record`.
    pub fn matches(&self, record: &Record) -> bool {
        self.terms.iter().any(|(field, comparator, operand)| {
            record
                .get(field)
                .is_some_and(|actual| comparator.matches(&actual, operand))
        })
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

fn matches_all(record: &Record, criteria: &Row) -> bool {
    criteria.iter().all(|(field, expected)| {
        record
            .get(field)
            .is_some_and(|actual| actual.loose_eq(expected))
    })
}

impl Collection {
    /// Returns a branch of the items matching every criterion.
    ///
    /// Values compare loosely, so `2` finds a row holding `"2"`. With no
    /// criteria every item is returned. A criterion on the primary
    /// identifier is looked up by key first; when that key is absent the
    /// items are scanned, so `"02"` still finds key `2`.
    pub fn find(&self, criteria: &Row) -> Collection {
        if criteria.is_empty() {
            warn!(table = %self.table(), "find without criteria returns every item");
            return self.branch_of(self.entries());
        }

        let primary = &self.root.identifiers[0];
        if let Some(value) = criteria.get(primary) {
            let key = Key::new(value);
            if let Some(item) = self.get(key.clone()) {
                let found = matches_all(item.record(), criteria).then_some((key, item));
                return self.branch_of(found);
            }
        }

        self.filter(|record| matches_all(record, criteria))
    }

    /// Returns a branch of the items whose record satisfies `predicate`.
    pub fn filter<F>(&self, predicate: F) -> Collection
    where
        F: Fn(&Record) -> bool,
    {
        self.branch_of(
            self.entries()
                .into_iter()
                .filter(|(_, item)| predicate(item.record())),
        )
    }

    /// Returns a branch of the items matching any term of `search`.
    pub fn search(&self, search: &Search) -> Collection {
        if search.is_empty() {
            warn!(table = %self.table(), "search without terms matches nothing");
        }
        self.filter(|record| search.matches(record))
    }

    /// Sums `field` over all items.
    ///
    /// Values that are not numeric are skipped.
    pub fn sum(&self, field: &str) -> f64 {
        let mut total = 0.0;
        for item in self.items() {
            match item.get(field) {
                Some(value) => match value.as_number() {
                    Some(n) => total += n,
                    None if value.is_null() => {}
                    None => {
                        warn!(table = %self.table(), key = %item.key(), field, %value, "not a number, skipped in sum");
                    }
                },
                None => {
                    warn!(table = %self.table(), key = %item.key(), field, "field missing, skipped in sum");
                }
            }
        }
        total
    }

    /// Counts the items matching every criterion.
    pub fn count(&self, criteria: &Row) -> usize {
        if criteria.is_empty() {
            return self.len();
        }
        self.items()
            .iter()
            .filter(|item| matches_all(item.record(), criteria))
            .count()
    }

    /// Returns true if any item matches every criterion.
    pub fn has(&self, criteria: &Row) -> bool {
        self.items()
            .iter()
            .any(|item| matches_all(item.record(), criteria))
    }

    /// Returns the keys ordered by the given fields.
    ///
    /// Earlier fields take precedence. Items tying on every field keep the
    /// order of their keys, and values without an order (nulls, mixed text
    /// and numbers) tie.
    pub fn sorted_keys(&self, order: &[(&str, Direction)]) -> Vec<Key> {
        let mut entries: Vec<(Key, Row)> = self
            .entries()
            .into_iter()
            .map(|(key, item)| (key, item.record().snapshot()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.sort_by(|(_, a), (_, b)| {
            for (field, direction) in order {
                let ordering = match (a.get(*field), b.get(*field)) {
                    (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                let ordering = match direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        entries.into_iter().map(|(key, _)| key).collect()
    }

    /// Returns the keys in random order.
    pub fn shuffled_keys(&self) -> Vec<Key> {
        self.shuffled_keys_with(&mut rand::thread_rng())
    }

    /// Returns the keys in an order drawn from `rng`.
    pub fn shuffled_keys_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Key> {
        let mut keys = self.keys();
        keys.sort();
        keys.shuffle(rng);
        keys
    }

    /// Returns a uniformly chosen item, or `None` if empty.
    pub fn random(&self) -> Option<Arc<Item>> {
        self.items().choose(&mut rand::thread_rng()).cloned()
    }

    /// Returns the only item.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if there is more than one.
    pub fn first(&self) -> CoreResult<Option<Arc<Item>>> {
        let items = self.items.read();
        if items.len() > 1 {
            return Err(CoreError::invalid_operation(format!(
                "first called on {} items of {}",
                items.len(),
                self.table()
            )));
        }
        Ok(items.values().next().cloned())
    }
}
