use std::fmt;

use sluice_core::{ComponentKey, Mutation, Record, Value};

/// Something that has occurred at a certain moment: a property change, an
/// emitter firing, a disposal.
///
/// The fixed core shape is the `source` component and the `event_type`;
/// everything else is keyed payload in the [`Record`]. Property-change
/// events carry `old_value`/`new_value` for scalar mutations, or
/// `mutation`/`index`/`objects` for in-place array and dict mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    source: ComponentKey,
    event_type: String,
    data: Record,
}

impl Event {
    pub(crate) fn new(source: ComponentKey, event_type: impl Into<String>, data: Record) -> Self {
        Self {
            source,
            event_type: event_type.into(),
            data,
        }
    }

    /// The component that emitted this event.
    pub fn source(&self) -> ComponentKey {
        self.source
    }

    /// The event type: a property name, an emitter name, or `"dispose"`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The keyed payload.
    pub fn data(&self) -> &Record {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// The previous value of a changed property ([`Value::Null`] if absent).
    pub fn old_value(&self) -> &Value {
        &self.data["old_value"]
    }

    /// The new value of a changed property ([`Value::Null`] if absent).
    pub fn new_value(&self) -> &Value {
        &self.data["new_value"]
    }

    /// The mutation kind for property-change events.
    pub fn mutation(&self) -> Option<Mutation> {
        self.data.get("mutation")?.as_str()?.parse().ok()
    }

    /// The splice index for in-place array mutations.
    pub fn index(&self) -> Option<usize> {
        let index = self.data.get("index")?.as_int()?;
        usize::try_from(index).ok()
    }

    /// The mutation payload: the spliced items, or the removal count.
    pub fn objects(&self) -> &Value {
        &self.data["objects"]
    }
}

impl std::ops::Index<&str> for Event {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        &self.data[key]
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{:?}] {}", self.event_type, self.source, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let ev = Event::new(
            ComponentKey::default(),
            "items",
            Record::new()
                .with("mutation", "insert")
                .with("index", 2)
                .with("objects", Value::list(["a"])),
        );
        assert_eq!(ev.event_type(), "items");
        assert_eq!(ev.mutation(), Some(Mutation::Insert));
        assert_eq!(ev.index(), Some(2));
        assert_eq!(ev.objects(), &Value::list(["a"]));
        assert_eq!(ev.old_value(), &Value::Null);
        assert_eq!(ev["index"], Value::Int(2));
    }
}
