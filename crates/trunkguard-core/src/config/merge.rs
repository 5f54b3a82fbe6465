//! Configuration merging logic
//!
//! Layers are merged as TOML tables before deserialization, so a later layer
//! only replaces the keys it actually names. Arrays are replaced, not appended.

use toml::{Table, Value};

/// Deep-merge `overlay` into `base`; `overlay` wins on every key it sets.
pub fn merge_tables(mut base: Table, overlay: Table) -> Table {
    for (key, value) in overlay {
        let merged = match (base.remove(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                Value::Table(merge_tables(existing, incoming))
            }
            (_, incoming) => incoming,
        };
        base.insert(key, merged);
    }
    base
}
