//! In-place mutation semantics for array- and dict-valued properties, and
//! the free-function replicators that apply a received mutation event to a
//! local container.

use std::collections::BTreeMap;

use sluice_core::{Mutation, Record, Value};

use crate::{Event, RuntimeError};

/// Apply an in-place list mutation and build the event payload for it.
/// `Set` is handled by the caller (whole-value assignment).
pub(crate) fn apply_list_mutation(
    items: &mut Vec<Value>,
    mutation: Mutation,
    index: usize,
    value: Value,
    property: &str,
) -> Result<Record, RuntimeError> {
    let len = items.len();
    let out_of_range = |index: usize| RuntimeError::IndexOutOfRange {
        property: property.to_owned(),
        index,
        len,
    };
    let bad = |what: String| RuntimeError::BadArguments {
        name: property.to_owned(),
        what,
    };

    match mutation {
        Mutation::Set => Err(bad("set is not an in-place mutation".into())),
        Mutation::Insert => {
            let Value::List(new_items) = value else {
                return Err(bad(format!("insert expects a list, got {}", value.type_name())));
            };
            if index > len {
                return Err(out_of_range(index));
            }
            items.splice(index..index, new_items.iter().cloned());
            Ok(Record::new()
                .with("mutation", "insert")
                .with("index", index)
                .with("objects", Value::List(new_items)))
        }
        Mutation::Remove => {
            let count = value
                .as_int()
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| {
                    bad(format!(
                        "remove expects a non-negative count, got {}",
                        value.type_name()
                    ))
                })?;
            if index > len || index + count > len {
                return Err(out_of_range(index));
            }
            items.drain(index..index + count);
            Ok(Record::new()
                .with("mutation", "remove")
                .with("index", index)
                .with("objects", count))
        }
        Mutation::Replace => {
            let Value::List(new_items) = value else {
                return Err(bad(format!(
                    "replace expects a list, got {}",
                    value.type_name()
                )));
            };
            if index > len || index + new_items.len() > len {
                return Err(out_of_range(index));
            }
            for (offset, item) in new_items.iter().enumerate() {
                items[index + offset] = item.clone();
            }
            Ok(Record::new()
                .with("mutation", "replace")
                .with("index", index)
                .with("objects", Value::List(new_items)))
        }
    }
}

/// Apply a keyed in-place mutation to a dict and build the event payload.
pub(crate) fn apply_dict_mutation(
    map: &mut BTreeMap<String, Value>,
    mutation: Mutation,
    value: Value,
    property: &str,
) -> Result<Record, RuntimeError> {
    let bad = |what: String| RuntimeError::BadArguments {
        name: property.to_owned(),
        what,
    };

    match mutation {
        Mutation::Set => Err(bad("set is not an in-place mutation".into())),
        Mutation::Insert | Mutation::Replace => {
            let Value::Dict(entries) = value else {
                return Err(bad(format!(
                    "{mutation} expects a dict, got {}",
                    value.type_name()
                )));
            };
            map.extend(entries.clone());
            Ok(Record::new()
                .with("mutation", mutation.as_str())
                .with("objects", Value::Dict(entries)))
        }
        Mutation::Remove => {
            let Value::List(keys) = value else {
                return Err(bad(format!(
                    "remove expects a list of keys, got {}",
                    value.type_name()
                )));
            };
            for key in &keys {
                let Some(key) = key.as_str() else {
                    return Err(bad(format!("keys must be strings, got {}", key.type_name())));
                };
                map.remove(key);
            }
            Ok(Record::new()
                .with("mutation", "remove")
                .with("objects", Value::List(keys)))
        }
    }
}

fn event_mutation(event: &Event) -> Result<Mutation, RuntimeError> {
    event.mutation().ok_or_else(|| RuntimeError::BadArguments {
        name: event.event_type().to_owned(),
        what: "event carries no mutation kind".into(),
    })
}

fn event_index(event: &Event) -> Result<usize, RuntimeError> {
    event.index().ok_or_else(|| RuntimeError::BadArguments {
        name: event.event_type().to_owned(),
        what: "event carries no splice index".into(),
    })
}

/// Replicate a received list mutation event onto a local list, producing
/// the same result as the mutation had on the source property.
pub fn mutate_array(target: &mut Vec<Value>, event: &Event) -> Result<(), RuntimeError> {
    match event_mutation(event)? {
        Mutation::Set => {
            let objects = match event.get("objects") {
                Some(objects) => objects,
                None => event.new_value(),
            };
            let Value::List(items) = objects else {
                return Err(RuntimeError::BadArguments {
                    name: event.event_type().to_owned(),
                    what: format!("set expects a list payload, got {}", objects.type_name()),
                });
            };
            *target = items.clone();
            Ok(())
        }
        mutation => {
            let index = event_index(event)?;
            apply_list_mutation(
                target,
                mutation,
                index,
                event.objects().clone(),
                event.event_type(),
            )
            .map(|_| ())
        }
    }
}

/// Replicate a received dict mutation event onto a local map.
pub fn mutate_dict(target: &mut BTreeMap<String, Value>, event: &Event) -> Result<(), RuntimeError> {
    match event_mutation(event)? {
        Mutation::Set => {
            let objects = match event.get("objects") {
                Some(objects) => objects,
                None => event.new_value(),
            };
            let Value::Dict(entries) = objects else {
                return Err(RuntimeError::BadArguments {
                    name: event.event_type().to_owned(),
                    what: format!("set expects a dict payload, got {}", objects.type_name()),
                });
            };
            target.clear();
            target.extend(entries.clone());
            Ok(())
        }
        mutation => apply_dict_mutation(
            target,
            mutation,
            event.objects().clone(),
            event.event_type(),
        )
        .map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::ComponentKey;

    fn list_event(record: Record) -> Event {
        Event::new(ComponentKey::default(), "items", record)
    }

    #[test]
    fn test_insert_and_remove() {
        let mut items = vec![Value::Int(1), Value::Int(2)];
        let record =
            apply_list_mutation(&mut items, Mutation::Insert, 1, Value::list([9]), "items")
                .unwrap();
        assert_eq!(items, vec![Value::Int(1), Value::Int(9), Value::Int(2)]);
        assert_eq!(record["index"], Value::Int(1));

        apply_list_mutation(&mut items, Mutation::Remove, 0, Value::Int(2), "items").unwrap();
        assert_eq!(items, vec![Value::Int(2)]);
    }

    #[test]
    fn test_out_of_range() {
        let mut items = vec![Value::Int(1)];
        assert!(matches!(
            apply_list_mutation(&mut items, Mutation::Insert, 5, Value::list([9]), "items"),
            Err(RuntimeError::IndexOutOfRange { index: 5, len: 1, .. })
        ));
        assert!(matches!(
            apply_list_mutation(&mut items, Mutation::Remove, 0, Value::Int(2), "items"),
            Err(RuntimeError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            apply_list_mutation(&mut items, Mutation::Replace, 1, Value::list([9]), "items"),
            Err(RuntimeError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_mutate_array_replicates() {
        // Apply the same mutations to a source and, via events, a replica.
        let mut source = Vec::new();
        let mut replica = Vec::new();
        for (mutation, index, value) in [
            (Mutation::Insert, 0, Value::list(["a", "b", "c"])),
            (Mutation::Replace, 1, Value::list(["x"])),
            (Mutation::Remove, 0, Value::Int(2)),
        ] {
            let record =
                apply_list_mutation(&mut source, mutation, index, value, "items").unwrap();
            mutate_array(&mut replica, &list_event(record)).unwrap();
            assert_eq!(replica, source);
        }
        assert_eq!(source, vec![Value::Str("c".into())]);

        // Whole-value set replicates through old/new payloads.
        let set = list_event(
            Record::new()
                .with("mutation", "set")
                .with("old_value", Value::list(["c"]))
                .with("new_value", Value::list(["p", "q"]))
                .with("objects", Value::list(["p", "q"])),
        );
        mutate_array(&mut replica, &set).unwrap();
        assert_eq!(replica, vec![Value::Str("p".into()), Value::Str("q".into())]);
    }

    #[test]
    fn test_mutate_dict_replicates() {
        let mut source = BTreeMap::new();
        let mut replica = BTreeMap::new();

        let record = apply_dict_mutation(
            &mut source,
            Mutation::Insert,
            Value::Dict([("a".to_owned(), Value::Int(1))].into_iter().collect()),
            "config",
        )
        .unwrap();
        mutate_dict(
            &mut replica,
            &Event::new(ComponentKey::default(), "config", record),
        )
        .unwrap();
        assert_eq!(replica, source);

        let record = apply_dict_mutation(
            &mut source,
            Mutation::Remove,
            Value::list(["a"]),
            "config",
        )
        .unwrap();
        mutate_dict(
            &mut replica,
            &Event::new(ComponentKey::default(), "config", record),
        )
        .unwrap();
        assert!(source.is_empty());
        assert_eq!(replica, source);
    }
}
