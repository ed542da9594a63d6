//! Property-based test generators.

use proptest::prelude::*;
use riptide_core::{Cascade, Record};
use serde_json::Value;

/// Any of the eight cascade masks.
pub fn arb_cascade() -> impl Strategy<Value = Cascade> {
    (0u8..=7).prop_map(Cascade::from_bits)
}

/// A scalar JSON value suitable for a record field.
pub fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(|n| Value::from(n as i64)),
        "[a-z]{1,12}".prop_map(Value::from),
    ]
}

/// A small flat record with a guaranteed `id` field.
pub fn arb_record() -> impl Strategy<Value = Record> {
    (
        "[a-z0-9]{1,10}",
        proptest::collection::btree_map("[a-z_]{1,8}", arb_scalar(), 0..5),
    )
        .prop_map(|(id, fields)| {
            let mut record = Record::new();
            record.insert("id".to_string(), Value::from(id));
            for (name, value) in fields {
                if name != "id" {
                    record.insert(name, value);
                }
            }
            record
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn cascades_stay_in_range(cascade in arb_cascade()) {
            prop_assert!(cascade.bits() <= 7);
        }

        #[test]
        fn records_always_carry_an_id(record in arb_record()) {
            prop_assert!(record.get("id").is_some());
        }
    }
}
