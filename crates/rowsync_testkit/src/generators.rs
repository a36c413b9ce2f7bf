//! Property-based test generators using proptest.

use crate::fixtures::{order_change, orders, orders_table};
use proptest::prelude::*;
use rowsync_codec::Value;
use rowsync_protocol::{ChangeRecord, RowState, TableName};

/// Strategy for scalar column values, NULL included.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
    ]
}

/// Strategy for row states.
pub fn row_state_strategy() -> impl Strategy<Value = RowState> {
    prop_oneof![Just(RowState::Upsert), Just(RowState::Tombstone)]
}

/// Strategy for a row of `table` with `arity` scalar values.
pub fn change_record_strategy(
    table: TableName,
    arity: usize,
) -> impl Strategy<Value = ChangeRecord> {
    (
        row_state_strategy(),
        prop::collection::vec(scalar_value_strategy(), arity),
    )
        .prop_map(move |(state, values)| ChangeRecord {
            table: table.clone(),
            state,
            values,
        })
}

/// Strategy for conflict classifier inputs: an incoming row and an
/// optional stored row of the same table.
pub fn conflict_input_strategy() -> impl Strategy<Value = (ChangeRecord, Option<ChangeRecord>)> {
    (
        change_record_strategy(orders(), 3),
        prop::option::of(row_state_strategy()),
    )
        .prop_map(|(remote, local_state)| {
            let local = local_state.map(|state| ChangeRecord {
                state,
                ..remote.clone()
            });
            (remote, local)
        })
}

/// Strategy for a list of order changes with distinct ids, all pointing at
/// customer 1.
pub fn order_changes_strategy(max: usize) -> impl Strategy<Value = Vec<ChangeRecord>> {
    prop::collection::btree_set(1i64..10_000, 0..max).prop_map(|ids| {
        ids.into_iter()
            .map(|id| order_change(id, 1, id as f64))
            .collect()
    })
}

/// Strategy for distinct order rows, some of them tombstones.
pub fn mixed_order_rows_strategy(max: usize) -> impl Strategy<Value = Vec<ChangeRecord>> {
    (order_changes_strategy(max), prop::collection::vec(any::<bool>(), max)).prop_map(
        |(rows, deleted)| {
            let table = orders_table();
            rows.into_iter()
                .zip(deleted)
                .map(|(row, delete)| {
                    if delete {
                        ChangeRecord::tombstone(&table, &row.values)
                    } else {
                        row
                    }
                })
                .collect()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn conflict_inputs_share_a_table((remote, local) in conflict_input_strategy()) {
            if let Some(local) = local {
                prop_assert_eq!(local.table, remote.table);
            }
        }

        #[test]
        fn order_changes_have_distinct_ids(rows in order_changes_strategy(20)) {
            let mut ids: Vec<_> = rows.iter().map(|r| r.values[0].clone()).collect();
            let before = ids.len();
            ids.dedup();
            prop_assert_eq!(ids.len(), before);
        }
    }
}
