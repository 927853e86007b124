//! Property-based test generators using proptest.
//!
//! Provides strategies for generating values, events and write sequences
//! that stay within the fixtures' schemas.

use proptest::prelude::*;
use rowlive_store::{row, Row, Value};

/// Strategy for generating storable scalar values (never NaN).
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9..1.0e9f64).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::Text),
    ]
}

/// Strategy for generating valid table names.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for one click event over small publisher and advertiser ranges,
/// so generated batches repeat key values.
pub fn click_event_strategy() -> impl Strategy<Value = Row> {
    (1..5i64, 1..4i64).prop_map(|(publisher, advertiser)| {
        row! { "publisher" => publisher, "advertiser" => advertiser }
    })
}

/// Strategy for a batch of click events.
pub fn click_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Row>> {
    prop::collection::vec(click_event_strategy(), 0..max)
}

/// Strategy for a burst of assignments to the `money` field.
pub fn money_burst_strategy(max: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-1_000..1_000i64, 1..max)
}

/// Strategy for player names.
pub fn player_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,8}").expect("Invalid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn values_are_never_nan(value in value_strategy()) {
            prop_assert!(!value.is_nan());
        }

        #[test]
        fn click_events_carry_both_keys(event in click_event_strategy()) {
            prop_assert!(event.contains_key("publisher"));
            prop_assert!(event.contains_key("advertiser"));
        }

        #[test]
        fn table_names_are_valid(name in table_name_strategy()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.len() <= 16);
        }
    }
}
