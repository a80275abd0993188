//! Connection walking and (re)binding.
//!
//! An explicit reaction's connection set is a pure function of its parsed
//! specs and the current values of the properties along each path. Walking
//! is split from registration: the walk reads the component graph and
//! produces an endpoint list, then the diff against the previous bind is
//! applied to the dispatch tables. Implicit reactions rebind from the read
//! set recorded during their last run.

use std::collections::HashSet;

use sluice_core::{ComponentKey, ConnectionSpec, ReactionKey, Segment, Star, Value};

use crate::component::{DispatchLabel, HandlerEntry};
use crate::property::AttrValue;
use crate::reaction::Endpoint;
use crate::{RuntimeError, Stage};

/// Pure walk of one spec from its owner; collects endpoints in encounter
/// order, deduplicated.
struct Walker<'a> {
    stage: &'a Stage,
    spec: &'a ConnectionSpec,
    out: Vec<Endpoint>,
    seen: HashSet<(ComponentKey, String, bool)>,
}

impl<'a> Walker<'a> {
    fn error(&self, segment: &Segment, what: impl Into<String>) -> RuntimeError {
        RuntimeError::Connection {
            spec: self.spec.to_string(),
            segment: segment.to_string(),
            what: what.into(),
        }
    }

    /// Record an endpoint; returns false if it was already present.
    fn push(&mut self, comp: ComponentKey, event_type: &str, structural: bool) -> bool {
        if !self
            .seen
            .insert((comp, event_type.to_owned(), structural))
        {
            return false;
        }
        self.out.push(Endpoint {
            comp,
            event_type: event_type.to_owned(),
            structural,
        });
        true
    }

    /// Resolve segment `name` on `comp`: a property (structural endpoint +
    /// value) or an attribute (value only). `None` prunes a dead branch.
    fn resolve(
        &mut self,
        comp: ComponentKey,
        segment: &Segment,
    ) -> Result<Option<Value>, RuntimeError> {
        let stage = self.stage;
        let Some(inst) = stage.components.get(comp) else {
            return Ok(None);
        };
        if !inst.alive {
            return Ok(None);
        }
        if let Some(slot) = inst.class.property_index(&segment.name) {
            // The path depends on this property: reconnect when it changes.
            self.push(comp, &segment.name, true);
            return Ok(Some(inst.values[slot].clone()));
        }
        if let Some(attribute) = inst.class.attribute(&segment.name) {
            let value = match &attribute.value {
                AttrValue::Fixed(value) => value.clone(),
                AttrValue::Computed(f) => f(stage, comp),
            };
            return Ok(Some(value));
        }
        Err(self.error(
            segment,
            format!("{} has neither a property nor an attribute of that name", inst.id),
        ))
    }

    /// The component elements of a list value, skipping other items.
    fn elements(value: &Value) -> Vec<ComponentKey> {
        match value {
            Value::List(items) => items.iter().filter_map(Value::as_component).collect(),
            _ => Vec::new(),
        }
    }

    fn walk(&mut self, comp: ComponentKey, segments: &[Segment], i: usize) -> Result<(), RuntimeError> {
        match self.stage.components.get(comp) {
            Some(inst) if inst.alive => {}
            _ => return Ok(()),
        }
        let segment = &segments[i];
        let terminal = i + 1 == segments.len();

        if terminal {
            return self.walk_terminal(comp, segment);
        }

        let Some(value) = self.resolve(comp, segment)? else {
            return Ok(());
        };
        match segment.star {
            Star::None => match value {
                Value::Component(next) => self.walk(next, segments, i + 1),
                Value::Null => Ok(()),
                other => Err(self.error(
                    segment,
                    format!("resolved to {}, expected a component", other.type_name()),
                )),
            },
            Star::Each => match value {
                Value::List(_) => {
                    for element in Self::elements(&value) {
                        self.walk(element, segments, i + 1)?;
                    }
                    Ok(())
                }
                Value::Null => Ok(()),
                other => Err(self.error(
                    segment,
                    format!("resolved to {}, expected a list", other.type_name()),
                )),
            },
            Star::Deep => {
                let mut nodes = Vec::new();
                let mut visited = HashSet::new();
                self.collect_deep(comp, segment, &mut nodes, &mut visited)?;
                for node in nodes {
                    self.walk(node, segments, i + 1)?;
                }
                Ok(())
            }
        }
    }

    /// Recursively collect the elements of `segment.name` on `comp`, then
    /// of the same-named field on each element, cycle-guarded.
    fn collect_deep(
        &mut self,
        comp: ComponentKey,
        segment: &Segment,
        nodes: &mut Vec<ComponentKey>,
        visited: &mut HashSet<ComponentKey>,
    ) -> Result<(), RuntimeError> {
        if !visited.insert(comp) {
            return Ok(());
        }
        let Some(value) = self.resolve(comp, segment)? else {
            return Ok(());
        };
        match value {
            Value::List(_) => {
                for element in Self::elements(&value) {
                    nodes.push(element);
                    self.collect_deep(element, segment, nodes, visited)?;
                }
                Ok(())
            }
            Value::Null => Ok(()),
            other => Err(self.error(
                segment,
                format!("resolved to {}, expected a list", other.type_name()),
            )),
        }
    }

    fn walk_terminal(&mut self, comp: ComponentKey, segment: &Segment) -> Result<(), RuntimeError> {
        match segment.star {
            // Plain terminal: the segment names an event type here.
            Star::None => {
                self.push(comp, &segment.name, false);
                Ok(())
            }
            // `items*`: subscribe each component element to the event.
            Star::Each => {
                let Some(value) = self.resolve(comp, segment)? else {
                    return Ok(());
                };
                match value {
                    Value::List(_) => {
                        for element in Self::elements(&value) {
                            self.push(element, &segment.name, false);
                        }
                        Ok(())
                    }
                    Value::Null => Ok(()),
                    other => Err(self.error(
                        segment,
                        format!("resolved to {}, expected a list", other.type_name()),
                    )),
                }
            }
            // `children**`: subscribe this node and every recursive
            // descendant along the same-named field.
            Star::Deep => {
                if !self.push(comp, &segment.name, false) {
                    return Ok(());
                }
                let Some(value) = self.resolve(comp, segment)? else {
                    return Ok(());
                };
                match value {
                    Value::List(_) => {
                        for element in Self::elements(&value) {
                            self.walk_terminal(element, segment)?;
                        }
                        Ok(())
                    }
                    Value::Null => Ok(()),
                    other => Err(self.error(
                        segment,
                        format!("resolved to {}, expected a list", other.type_name()),
                    )),
                }
            }
        }
    }
}

impl Stage {
    /// Resolve a spec from `owner` to its current endpoint set.
    pub(crate) fn walk_spec(
        &self,
        owner: ComponentKey,
        spec: &ConnectionSpec,
    ) -> Result<Vec<Endpoint>, RuntimeError> {
        let mut walker = Walker {
            stage: self,
            spec,
            out: Vec::new(),
            seen: HashSet::new(),
        };
        walker.walk(owner, &spec.segments, 0)?;
        Ok(walker.out)
    }

    /// Rewalk spec `index` of a reaction and apply the connection diff.
    pub(crate) fn rebind_spec(
        &mut self,
        reaction: ReactionKey,
        index: usize,
    ) -> Result<(), RuntimeError> {
        let (owner, spec, label, old) = {
            let r = self
                .reactions
                .get(reaction)
                .ok_or(RuntimeError::UnknownComponent)?;
            let state = &r.specs[index];
            (
                r.owner,
                state.spec.clone(),
                state.label.clone(),
                state.endpoints.clone(),
            )
        };

        let new = self.walk_spec(owner, &spec)?;

        for endpoint in old.iter().filter(|ep| !new.contains(ep)) {
            self.unregister_endpoint(reaction, index, &label, endpoint);
        }
        let added: Vec<&Endpoint> = new.iter().filter(|ep| !old.contains(ep)).collect();
        for endpoint in added {
            let entry = HandlerEntry {
                label: if endpoint.structural {
                    DispatchLabel::Reconnect(index)
                } else {
                    DispatchLabel::Deliver(label.clone())
                },
                seq: self.sched.next_seq(),
                reaction,
            };
            if let Some(inst) = self.components.get_mut(endpoint.comp) {
                inst.register(&endpoint.event_type, entry);
            }
        }

        if let Some(r) = self.reactions.get_mut(reaction) {
            r.specs[index].endpoints = new;
        }
        Ok(())
    }

    fn unregister_endpoint(
        &mut self,
        reaction: ReactionKey,
        index: usize,
        label: &str,
        endpoint: &Endpoint,
    ) {
        let dispatch = if endpoint.structural {
            DispatchLabel::Reconnect(index)
        } else {
            DispatchLabel::Deliver(label.to_owned())
        };
        if let Some(inst) = self.components.get_mut(endpoint.comp) {
            inst.unregister(&endpoint.event_type, reaction, &dispatch);
        }
    }

    /// Replace an implicit reaction's connection set with the reads
    /// recorded during its last run.
    pub(crate) fn retrack_implicit(
        &mut self,
        reaction: ReactionKey,
        reads: Vec<(ComponentKey, String)>,
    ) {
        let Some(r) = self.reactions.get(reaction) else {
            return;
        };
        if !r.alive {
            return;
        }
        let name = r.name.clone();
        let old = r.implicit.clone();

        for (comp, property) in old.iter().filter(|read| !reads.contains(read)) {
            if let Some(inst) = self.components.get_mut(*comp) {
                inst.unregister(property, reaction, &DispatchLabel::Deliver(name.clone()));
            }
        }
        let added: Vec<(ComponentKey, String)> = reads
            .iter()
            .filter(|read| !old.contains(read))
            .cloned()
            .collect();
        for (comp, property) in added {
            let entry = HandlerEntry {
                label: DispatchLabel::Deliver(name.clone()),
                seq: self.sched.next_seq(),
                reaction,
            };
            if let Some(inst) = self.components.get_mut(comp) {
                inst.register(&property, entry);
            }
        }

        if let Some(r) = self.reactions.get_mut(reaction) {
            r.implicit = reads;
        }
    }

    /// Warn about terminal endpoints whose event type is not declared on
    /// the target's class, unless the spec carries `!`. Called once after
    /// the initial bind; dynamic rewalks stay quiet.
    pub(crate) fn warn_unknown_endpoints(&self, reaction: ReactionKey) {
        let Some(r) = self.reactions.get(reaction) else {
            return;
        };
        for state in &r.specs {
            if state.spec.suppress_unknown {
                continue;
            }
            for endpoint in state.endpoints.iter().filter(|ep| !ep.structural) {
                let Some(inst) = self.components.get(endpoint.comp) else {
                    continue;
                };
                if !inst.class.knows_event_type(&endpoint.event_type) {
                    tracing::warn!(
                        component = %inst.id,
                        reaction = %r.name,
                        event_type = %endpoint.event_type,
                        connection = %state.spec,
                        "connected to unknown event type"
                    );
                }
            }
        }
    }
}
