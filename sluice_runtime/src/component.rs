//! Per-component runtime state: property storage and the event dispatch
//! table mapping event types to connected reactions.

use std::collections::BTreeMap;
use std::rc::Rc;

use sluice_core::{ReactionKey, Value};

use crate::Class;

/// How a dispatch-table entry reacts to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DispatchLabel {
    /// Deliver the event, ordered by this label.
    Deliver(String),
    /// Structural connection: flag the reaction's spec at this index for
    /// reconnection; no user event is delivered.
    Reconnect(usize),
}

impl DispatchLabel {
    fn sort_key(&self) -> &str {
        match self {
            DispatchLabel::Deliver(label) => label,
            DispatchLabel::Reconnect(_) => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandlerEntry {
    pub label: DispatchLabel,
    pub seq: u64,
    pub reaction: ReactionKey,
}

pub(crate) struct ComponentInstance {
    pub class: Rc<Class>,
    /// Stable identity, `"<Class>#<n>"`.
    pub id: String,
    /// Property values, parallel to the class's declaration order.
    pub values: Vec<Value>,
    /// Event type -> connected reactions, each list sorted by (label, seq).
    pub handlers: BTreeMap<String, Vec<HandlerEntry>>,
    /// Reactions declared on (owned by) this component.
    pub owned: Vec<ReactionKey>,
    pub alive: bool,
    /// Construction frame: mutations are allowed without an action.
    pub initing: bool,
}

impl ComponentInstance {
    pub(crate) fn new(class: Rc<Class>, id: String, values: Vec<Value>) -> Self {
        Self {
            class,
            id,
            values,
            handlers: BTreeMap::new(),
            owned: Vec::new(),
            alive: true,
            initing: false,
        }
    }

    /// Connect a reaction to an event type. Idempotent: re-registering the
    /// same (reaction, label) pair is a no-op.
    pub(crate) fn register(&mut self, event_type: &str, entry: HandlerEntry) {
        let entries = self.handlers.entry(event_type.to_owned()).or_default();
        if entries
            .iter()
            .any(|e| e.reaction == entry.reaction && e.label == entry.label)
        {
            return;
        }
        let at = entries
            .partition_point(|e| (e.label.sort_key(), e.seq) <= (entry.label.sort_key(), entry.seq));
        entries.insert(at, entry);
    }

    /// Drop a (reaction, label) connection for an event type. Idempotent.
    pub(crate) fn unregister(
        &mut self,
        event_type: &str,
        reaction: ReactionKey,
        label: &DispatchLabel,
    ) {
        if let Some(entries) = self.handlers.get_mut(event_type) {
            entries.retain(|e| !(e.reaction == reaction && e.label == *label));
            if entries.is_empty() {
                self.handlers.remove(event_type);
            }
        }
    }

    pub(crate) fn entries(&self, event_type: &str) -> &[HandlerEntry] {
        self.handlers
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClassBuilder;
    use sluice_core::ReactionKey;

    fn dummy() -> ComponentInstance {
        let class = ClassBuilder::new("Dummy").build().unwrap();
        ComponentInstance::new(Rc::new(class), "Dummy#1".into(), Vec::new())
    }

    fn key(n: u64) -> ReactionKey {
        // Distinct test keys without an arena.
        slotmap::KeyData::from_ffi((n << 32) | n).into()
    }

    #[test]
    fn test_register_orders_by_label_then_seq() {
        let mut inst = dummy();
        inst.register(
            "foo",
            HandlerEntry {
                label: DispatchLabel::Deliver("greet".into()),
                seq: 1,
                reaction: key(1),
            },
        );
        inst.register(
            "foo",
            HandlerEntry {
                label: DispatchLabel::Deliver("aa".into()),
                seq: 2,
                reaction: key(2),
            },
        );
        let labels: Vec<_> = inst
            .entries("foo")
            .iter()
            .map(|e| e.label.sort_key().to_owned())
            .collect();
        assert_eq!(labels, vec!["aa", "greet"]);
    }

    #[test]
    fn test_register_idempotent() {
        let mut inst = dummy();
        let entry = HandlerEntry {
            label: DispatchLabel::Deliver("x".into()),
            seq: 1,
            reaction: key(1),
        };
        inst.register("foo", entry.clone());
        inst.register("foo", entry.clone());
        assert_eq!(inst.entries("foo").len(), 1);

        inst.unregister("foo", entry.reaction, &entry.label);
        inst.unregister("foo", entry.reaction, &entry.label);
        assert!(inst.entries("foo").is_empty());
    }
}
