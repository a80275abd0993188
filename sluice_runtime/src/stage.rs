//! The stage: the arena holding every component and reaction, the class
//! registry, and the loop that drives them.
//!
//! All user-facing operations go through [`Stage`]: creating components,
//! invoking actions, reading properties, emitting events, and driving the
//! loop with [`Stage::iter`]. Action and reaction bodies receive
//! `&mut Stage` so the same surface is available inside them; the frame
//! rules (what may mutate, what gets enqueued) are enforced here.

use std::collections::BTreeMap;
use std::rc::Rc;

use itertools::Itertools;
use slotmap::SlotMap;

use sluice_core::{ComponentKey, ConnectionSpec, Mutation, ReactionKey, Record, Value};

use crate::action::ActionKind;
use crate::component::{ComponentInstance, DispatchLabel};
use crate::mutation::{apply_dict_mutation, apply_list_mutation};
use crate::reaction::{ComputeFn, ReactionBody, ReactionInstance, ReactionMode, SpecState};
use crate::sched::{Host, Invocation, Loop, TrackFrame, ROUND_LIMIT};
use crate::{Class, Event, PropKind, ReactionFn, RuntimeError};

/// Initial property values for [`Stage::create`].
///
/// A plain entry is applied synchronously within the construction frame. A
/// computed entry installs an implicit reaction that keeps feeding its
/// result into the property's setter whenever a read dependency changes.
#[derive(Default)]
pub struct Init {
    pub(crate) entries: Vec<(String, InitEntry)>,
}

pub(crate) enum InitEntry {
    Value(Value),
    Computed(ComputeFn),
}

impl Init {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.entries
            .push((name.to_owned(), InitEntry::Value(value.into())));
        self
    }

    /// Initialize `name` from a computed expression; the property must be
    /// settable, and the expression re-runs when its tracked reads change.
    pub fn computed(
        mut self,
        name: &str,
        f: impl Fn(&mut Stage, ComponentKey) -> Result<Value, RuntimeError> + 'static,
    ) -> Self {
        self.entries
            .push((name.to_owned(), InitEntry::Computed(Rc::new(f))));
        self
    }
}

/// The component arena, class registry and scheduler of one reactive
/// system. Single-threaded by contract: the loop provides determinism,
/// not parallelism.
#[derive(Default)]
pub struct Stage {
    pub(crate) classes: BTreeMap<String, Rc<Class>>,
    pub(crate) components: SlotMap<ComponentKey, ComponentInstance>,
    pub(crate) reactions: SlotMap<ReactionKey, ReactionInstance>,
    pub(crate) sched: Loop,
    /// Instance counter backing the `id` attribute.
    created: u64,
    /// Counter for naming dynamically added reactions.
    reaction_count: u64,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class definition under its name.
    pub fn add_class(&mut self, class: Class) -> Result<(), RuntimeError> {
        let name = class.name().to_owned();
        if self.classes.contains_key(&name) {
            return Err(RuntimeError::DuplicateClass(name));
        }
        self.classes.insert(name, Rc::new(class));
        Ok(())
    }

    pub fn class(&self, name: &str) -> Option<&Class> {
        self.classes.get(name).map(Rc::as_ref)
    }

    /// Scheduler state, for host integrations and introspection.
    pub fn scheduler(&self) -> &Loop {
        &self.sched
    }

    /// Whether all queues are drained.
    pub fn is_settled(&self) -> bool {
        self.sched.is_idle()
    }

    pub fn is_alive(&self, comp: ComponentKey) -> bool {
        self.components.get(comp).map(|i| i.alive).unwrap_or(false)
    }

    /// The component's stable identity, `"<Class>#<n>"`.
    pub fn id(&self, comp: ComponentKey) -> Option<&str> {
        self.components.get(comp).map(|i| i.id.as_str())
    }

    pub fn class_of(&self, comp: ComponentKey) -> Option<&Class> {
        self.components.get(comp).map(|i| i.class.as_ref())
    }

    fn debug_id(&self, comp: ComponentKey) -> String {
        self.components
            .get(comp)
            .map(|i| i.id.clone())
            .unwrap_or_else(|| format!("{comp:?}"))
    }

    // ------------------------------------------------------------------
    // Construction and disposal

    /// Instantiate a component of a registered class.
    ///
    /// Initial state is assembled synchronously within the construction
    /// frame, class-declared reactions are bound, and one
    /// `(old_value == new_value)` event per property is emitted so
    /// reactions observe initial state consistently.
    #[tracing::instrument(skip(self, init))]
    pub fn create(&mut self, class: &str, init: Init) -> Result<ComponentKey, RuntimeError> {
        let class = self
            .classes
            .get(class)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownClass(class.to_owned()))?;
        self.created += 1;
        let id = format!("{}#{}", class.name(), self.created);

        let mut values = Vec::with_capacity(class.properties().len());
        for property in class.properties() {
            values.push(property.validate(&id, property.default_value())?);
        }

        let comp = self
            .components
            .insert(ComponentInstance::new(class.clone(), id, values));
        self.components[comp].initing = true;
        let result = self.init_component(comp, &class, init);
        if let Some(inst) = self.components.get_mut(comp) {
            inst.initing = false;
        }
        match result {
            Ok(()) => Ok(comp),
            Err(error) => {
                self.abort_create(comp);
                Err(error)
            }
        }
    }

    fn init_component(
        &mut self,
        comp: ComponentKey,
        class: &Rc<Class>,
        init: Init,
    ) -> Result<(), RuntimeError> {
        let mut computed: Vec<(String, ComputeFn)> = Vec::new();
        for (name, entry) in init.entries {
            let property = class.property(&name).ok_or_else(|| {
                RuntimeError::UnknownProperty {
                    component: self.debug_id(comp),
                    name: name.clone(),
                }
            })?;
            match entry {
                InitEntry::Value(value) => {
                    self.do_mutate(comp, &name, value, Mutation::Set, None)?;
                }
                InitEntry::Computed(f) => {
                    if !property.is_settable() {
                        return Err(RuntimeError::NotSettable(name));
                    }
                    computed.push((name, f));
                }
            }
        }

        for decl in class.reactions() {
            self.insert_reaction(
                comp,
                decl.name.clone(),
                ReactionBody::User(decl.body.clone()),
                decl.specs.clone(),
            )?;
        }

        for (property, compute) in computed {
            let name = format!("init_{property}");
            self.insert_reaction(
                comp,
                name,
                ReactionBody::Setter { property, compute },
                Vec::new(),
            )?;
        }

        for (slot, property) in class.properties().iter().enumerate() {
            let value = match self.components.get(comp) {
                Some(inst) => inst.values[slot].clone(),
                None => return Err(RuntimeError::UnknownComponent),
            };
            self.emit(
                comp,
                property.name(),
                Record::new()
                    .with("old_value", value.clone())
                    .with("new_value", value),
            )?;
        }
        Ok(())
    }

    /// Tear down a half-constructed component without emitting events.
    fn abort_create(&mut self, comp: ComponentKey) {
        if let Some(inst) = self.components.get_mut(comp) {
            let owned = std::mem::take(&mut inst.owned);
            for reaction in owned {
                self.dispose_reaction(reaction);
            }
        }
        self.components.remove(comp);
    }

    /// Dispose a component: owned reactions are disposed, a final
    /// `"dispose"` event goes to any remaining listeners, and afterwards
    /// the component neither emits nor receives anything. Idempotent.
    #[tracing::instrument(skip(self), fields(id = %self.debug_id(comp)))]
    pub fn dispose(&mut self, comp: ComponentKey) {
        let Some(inst) = self.components.get_mut(comp) else {
            return;
        };
        if !inst.alive {
            return;
        }
        let owned = std::mem::take(&mut inst.owned);
        for reaction in owned {
            self.dispose_reaction(reaction);
        }
        let _ = self.emit(comp, "dispose", Record::new());
        if let Some(inst) = self.components.get_mut(comp) {
            inst.alive = false;
            inst.handlers.clear();
        }
    }

    /// Disconnect every endpoint of a reaction and remove it from its
    /// owner. Idempotent; a pending invocation is silently dropped.
    pub fn dispose_reaction(&mut self, reaction: ReactionKey) {
        let Some(r) = self.reactions.get_mut(reaction) else {
            return;
        };
        if !r.alive {
            return;
        }
        r.alive = false;
        let owner = r.owner;
        let name = r.name.clone();
        let mut connections = Vec::new();
        for (index, state) in r.specs.iter_mut().enumerate() {
            for endpoint in state.endpoints.drain(..) {
                let label = if endpoint.structural {
                    DispatchLabel::Reconnect(index)
                } else {
                    DispatchLabel::Deliver(state.label.clone())
                };
                connections.push((endpoint.comp, endpoint.event_type, label));
            }
        }
        for (comp, property) in r.implicit.drain(..) {
            connections.push((comp, property, DispatchLabel::Deliver(name.clone())));
        }
        r.pending_events.clear();
        r.pending_reconnect.clear();

        for (comp, event_type, label) in connections {
            if let Some(inst) = self.components.get_mut(comp) {
                inst.unregister(&event_type, reaction, &label);
            }
        }
        if let Some(owner_inst) = self.components.get_mut(owner) {
            owner_inst.owned.retain(|k| *k != reaction);
        }
        self.reactions.remove(reaction);
    }

    // ------------------------------------------------------------------
    // Reads

    /// Read a property. Inside an implicit reaction this records the read
    /// into the reaction's next dependency set.
    pub fn get(&mut self, comp: ComponentKey, name: &str) -> Result<Value, RuntimeError> {
        let value = self.peek(comp, name)?;
        if let Some(frame) = self.sched.trackers.last_mut() {
            let read = (comp, name.to_owned());
            if !frame.reads.contains(&read) {
                frame.reads.push(read);
            }
        }
        Ok(value)
    }

    /// Read a property without dependency tracking.
    pub fn peek(&self, comp: ComponentKey, name: &str) -> Result<Value, RuntimeError> {
        let inst = self
            .components
            .get(comp)
            .ok_or(RuntimeError::UnknownComponent)?;
        let slot = inst
            .class
            .property_index(name)
            .ok_or_else(|| RuntimeError::UnknownProperty {
                component: inst.id.clone(),
                name: name.to_owned(),
            })?;
        Ok(inst.values[slot].clone())
    }

    /// Read an attribute (read-only, non-observable). Every component has
    /// the built-in `id` attribute.
    pub fn attr(&self, comp: ComponentKey, name: &str) -> Result<Value, RuntimeError> {
        let inst = self
            .components
            .get(comp)
            .ok_or(RuntimeError::UnknownComponent)?;
        if name == "id" {
            return Ok(Value::Str(inst.id.clone()));
        }
        match inst.class.attribute(name) {
            Some(attribute) => match &attribute.value {
                crate::property::AttrValue::Fixed(value) => Ok(value.clone()),
                crate::property::AttrValue::Computed(f) => {
                    let f = f.clone();
                    Ok(f(self, comp))
                }
            },
            None => Err(RuntimeError::UnknownAttribute {
                component: inst.id.clone(),
                name: name.to_owned(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Actions and the mutation channel

    /// Invoke an action.
    ///
    /// From outside any frame the call is captured on the action queue and
    /// returns immediately; from a currently-executing action it runs
    /// synchronously in place; from the reaction phase it is captured for
    /// the next round, preserving the frozen-state invariant.
    #[tracing::instrument(skip(self, args), fields(id = %self.debug_id(comp)))]
    pub fn invoke(
        &mut self,
        comp: ComponentKey,
        action: &str,
        args: Vec<Value>,
    ) -> Result<(), RuntimeError> {
        let inst = self
            .components
            .get(comp)
            .ok_or(RuntimeError::UnknownComponent)?;
        if !inst.alive {
            return Err(RuntimeError::Disposed {
                component: inst.id.clone(),
            });
        }
        if inst.class.action(action).is_none() {
            return Err(RuntimeError::UnknownAction {
                component: inst.id.clone(),
                name: action.to_owned(),
            });
        }

        if self.sched.in_action_frame() && !self.sched.in_reaction_phase() {
            // Nested invocation: part of the caller's atomic batch.
            self.execute_action(comp, action, &args)
        } else {
            let was_idle = self.sched.is_idle();
            self.sched.actions.push_back(Invocation {
                comp,
                action: action.to_owned(),
                args,
            });
            if was_idle {
                self.sched.request_wake();
            }
            Ok(())
        }
    }

    fn execute_action(
        &mut self,
        comp: ComponentKey,
        action: &str,
        args: &[Value],
    ) -> Result<(), RuntimeError> {
        let Some(inst) = self.components.get(comp) else {
            // The component was disposed while the call was queued.
            return Ok(());
        };
        if !inst.alive {
            return Ok(());
        }
        let Some(def) = inst.class.action(action) else {
            return Err(RuntimeError::UnknownAction {
                component: inst.id.clone(),
                name: action.to_owned(),
            });
        };
        let kind = def.kind.clone();

        self.sched.action_depth += 1;
        let result = match kind {
            ActionKind::SetProp(property) => {
                if args.len() != 1 {
                    Err(RuntimeError::BadArguments {
                        name: action.to_owned(),
                        what: format!("expected exactly one argument, got {}", args.len()),
                    })
                } else {
                    self.do_mutate(comp, &property, args[0].clone(), Mutation::Set, None)
                }
            }
            ActionKind::User(f) => f(self, comp, args),
        };
        self.sched.action_depth -= 1;
        result
    }

    /// Set a property through the mutation channel. Permitted only from an
    /// action frame or the component's construction frame.
    pub fn mutate(
        &mut self,
        comp: ComponentKey,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), RuntimeError> {
        self.do_mutate(comp, name, value.into(), Mutation::Set, None)
    }

    /// Apply an in-place mutation to a list property.
    pub fn mutate_in_place(
        &mut self,
        comp: ComponentKey,
        name: &str,
        value: impl Into<Value>,
        mutation: Mutation,
        index: usize,
    ) -> Result<(), RuntimeError> {
        self.do_mutate(comp, name, value.into(), mutation, Some(index))
    }

    /// Apply a keyed in-place mutation to a dict property.
    pub fn mutate_keyed(
        &mut self,
        comp: ComponentKey,
        name: &str,
        value: impl Into<Value>,
        mutation: Mutation,
    ) -> Result<(), RuntimeError> {
        self.do_mutate(comp, name, value.into(), mutation, None)
    }

    fn do_mutate(
        &mut self,
        comp: ComponentKey,
        name: &str,
        value: Value,
        mutation: Mutation,
        index: Option<usize>,
    ) -> Result<(), RuntimeError> {
        let Some(inst) = self.components.get(comp) else {
            return Err(RuntimeError::UnknownComponent);
        };
        if !inst.alive {
            tracing::trace!(id = %inst.id, property = %name, "mutation on disposed component ignored");
            return Ok(());
        }
        let allowed = inst.initing
            || (self.sched.in_action_frame() && !self.sched.in_reaction_phase());
        if !allowed {
            return Err(RuntimeError::MutationOutsideAction {
                component: inst.id.clone(),
                property: name.to_owned(),
            });
        }
        let class = inst.class.clone();
        let id = inst.id.clone();
        let slot = class
            .property_index(name)
            .ok_or_else(|| RuntimeError::UnknownProperty {
                component: id.clone(),
                name: name.to_owned(),
            })?;
        let property = &class.properties()[slot];

        let record = match mutation {
            Mutation::Set => {
                if index.is_some() {
                    return Err(RuntimeError::BadArguments {
                        name: name.to_owned(),
                        what: "set takes no index".into(),
                    });
                }
                let new = property.validate(&id, value)?;
                let Some(inst) = self.components.get_mut(comp) else {
                    return Err(RuntimeError::UnknownComponent);
                };
                let old = std::mem::replace(&mut inst.values[slot], new.clone());
                let mut record = Record::new()
                    .with("mutation", "set")
                    .with("old_value", old)
                    .with("new_value", new.clone());
                // List/dict sets also carry the payload replicators expect.
                if matches!(property.kind(), PropKind::List | PropKind::Dict) {
                    record.insert("objects", new);
                }
                record
            }
            _ => match property.kind() {
                PropKind::List => {
                    let index = index.ok_or_else(|| RuntimeError::BadArguments {
                        name: name.to_owned(),
                        what: format!("{mutation} requires an index"),
                    })?;
                    let Some(inst) = self.components.get_mut(comp) else {
                        return Err(RuntimeError::UnknownComponent);
                    };
                    let Value::List(items) = &mut inst.values[slot] else {
                        return Err(RuntimeError::Other(format!(
                            "{id} storage for {name:?} is not a list"
                        )));
                    };
                    apply_list_mutation(items, mutation, index, value, name)?
                }
                PropKind::Dict => {
                    if index.is_some() {
                        return Err(RuntimeError::BadArguments {
                            name: name.to_owned(),
                            what: "dict mutations take no index".into(),
                        });
                    }
                    let Some(inst) = self.components.get_mut(comp) else {
                        return Err(RuntimeError::UnknownComponent);
                    };
                    let Value::Dict(map) = &mut inst.values[slot] else {
                        return Err(RuntimeError::Other(format!(
                            "{id} storage for {name:?} is not a dict"
                        )));
                    };
                    apply_dict_mutation(map, mutation, value, name)?
                }
                kind => {
                    return Err(RuntimeError::BadMutation {
                        property: name.to_owned(),
                        kind: kind.name(),
                        mutation,
                    })
                }
            },
        };

        self.emit(comp, name, record)
    }

    // ------------------------------------------------------------------
    // Events

    /// Emit an event from a component. Allowed from any frame; deliveries
    /// land in the next reaction phase. Emission from a disposed component
    /// is a no-op.
    pub fn emit(
        &mut self,
        comp: ComponentKey,
        event_type: &str,
        data: Record,
    ) -> Result<(), RuntimeError> {
        let Some(inst) = self.components.get(comp) else {
            return Err(RuntimeError::UnknownComponent);
        };
        if !inst.alive {
            return Ok(());
        }
        let entries = inst.entries(event_type).to_vec();
        if entries.is_empty() {
            return Ok(());
        }
        tracing::trace!(id = %inst.id, event_type, listeners = entries.len(), "emit");
        let event = Event::new(comp, event_type, data);
        let was_idle = self.sched.is_idle();

        for entry in entries {
            match entry.label {
                DispatchLabel::Reconnect(index) => {
                    let Some(r) = self.reactions.get_mut(entry.reaction) else {
                        continue;
                    };
                    if !r.alive {
                        continue;
                    }
                    r.pending_reconnect.insert(index);
                    let label = r.name.clone();
                    self.sched.enqueue_reaction(entry.reaction, &label);
                }
                DispatchLabel::Deliver(label) => {
                    let Some(r) = self.reactions.get_mut(entry.reaction) else {
                        continue;
                    };
                    if !r.alive {
                        continue;
                    }
                    // Implicit reactions run with zero events.
                    if matches!(r.mode, ReactionMode::Explicit) {
                        r.pending_events.push(event.clone());
                    }
                    self.sched.enqueue_reaction(entry.reaction, &label);
                }
            }
        }

        if was_idle && !self.sched.is_idle() {
            self.sched.request_wake();
        }
        Ok(())
    }

    /// Call an emitter: its returned record becomes an event of the
    /// emitter's name. Always synchronous; emitters do not mutate state.
    pub fn fire(
        &mut self,
        comp: ComponentKey,
        emitter: &str,
        args: Vec<Value>,
    ) -> Result<(), RuntimeError> {
        let Some(inst) = self.components.get(comp) else {
            return Err(RuntimeError::UnknownComponent);
        };
        if !inst.alive {
            return Ok(());
        }
        let Some(def) = inst.class.emitter(emitter) else {
            return Err(RuntimeError::UnknownEmitter {
                component: inst.id.clone(),
                name: emitter.to_owned(),
            });
        };
        let body = def.body.clone();
        let data = body(self, comp, &args)?;
        self.emit(comp, emitter, data)
    }

    /// Remove connections from a component's dispatch table by selector:
    /// `"type"`, `"type:label"`, or `":label"`.
    pub fn disconnect(&mut self, comp: ComponentKey, selector: &str) {
        let (event_type, label) = match selector.split_once(':') {
            Some((ty, label)) => ((!ty.is_empty()).then_some(ty), Some(label)),
            None => (Some(selector), None),
        };

        let Some(inst) = self.components.get_mut(comp) else {
            return;
        };
        let mut removed = Vec::new();
        for (ty, entries) in inst.handlers.iter_mut() {
            if event_type.is_some_and(|t| t != ty.as_str()) {
                continue;
            }
            entries.retain(|entry| {
                let matches = match (&entry.label, label) {
                    (_, None) => true,
                    (DispatchLabel::Deliver(l), Some(selector)) => l == selector,
                    (DispatchLabel::Reconnect(_), Some(_)) => false,
                };
                if matches {
                    removed.push((ty.clone(), entry.clone()));
                }
                !matches
            });
        }
        inst.handlers.retain(|_, entries| !entries.is_empty());

        // Keep the affected reactions' endpoint sets in sync so queued
        // events from the dropped connections are not delivered.
        for (ty, entry) in removed {
            let Some(r) = self.reactions.get_mut(entry.reaction) else {
                continue;
            };
            match entry.label {
                DispatchLabel::Reconnect(index) => {
                    if let Some(state) = r.specs.get_mut(index) {
                        state
                            .endpoints
                            .retain(|ep| !(ep.structural && ep.comp == comp && ep.event_type == ty));
                    }
                }
                DispatchLabel::Deliver(_) => {
                    for state in &mut r.specs {
                        state
                            .endpoints
                            .retain(|ep| !(!ep.structural && ep.comp == comp && ep.event_type == ty));
                    }
                    r.implicit
                        .retain(|(c, p)| !(*c == comp && p == &ty));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Reactions

    /// Connect a free-form reaction to this component via connection
    /// strings (the declaration-time equivalent lives on
    /// [`ClassBuilder`](crate::ClassBuilder)).
    pub fn add_reaction(
        &mut self,
        comp: ComponentKey,
        connections: &[&str],
        body: impl Fn(&mut Stage, ComponentKey, &[Event]) -> Result<(), RuntimeError> + 'static,
    ) -> Result<ReactionKey, RuntimeError> {
        if connections.is_empty() {
            return Err(RuntimeError::BadArguments {
                name: "add_reaction".into(),
                what: "at least one connection string is required; use add_auto_reaction".into(),
            });
        }
        let specs = connections
            .iter()
            .map(|s| ConnectionSpec::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        self.reaction_count += 1;
        let name = format!("r{}", self.reaction_count);
        self.insert_reaction(comp, name, ReactionBody::User(Rc::new(body) as ReactionFn), specs)
    }

    /// Connect an implicit reaction: its dependencies are whatever
    /// properties it reads, re-tracked on every run.
    pub fn add_auto_reaction(
        &mut self,
        comp: ComponentKey,
        body: impl Fn(&mut Stage, ComponentKey, &[Event]) -> Result<(), RuntimeError> + 'static,
    ) -> Result<ReactionKey, RuntimeError> {
        self.reaction_count += 1;
        let name = format!("r{}", self.reaction_count);
        self.insert_reaction(
            comp,
            name,
            ReactionBody::User(Rc::new(body) as ReactionFn),
            Vec::new(),
        )
    }

    pub(crate) fn insert_reaction(
        &mut self,
        comp: ComponentKey,
        name: String,
        body: ReactionBody,
        specs: Vec<ConnectionSpec>,
    ) -> Result<ReactionKey, RuntimeError> {
        let inst = self
            .components
            .get(comp)
            .ok_or(RuntimeError::UnknownComponent)?;
        if !inst.alive {
            return Err(RuntimeError::Disposed {
                component: inst.id.clone(),
            });
        }
        let mode = if specs.is_empty() {
            ReactionMode::Auto
        } else {
            ReactionMode::Explicit
        };
        let spec_states = specs
            .into_iter()
            .map(|spec| SpecState {
                label: spec.label_or(&name).to_owned(),
                spec,
                endpoints: Vec::new(),
            })
            .collect::<Vec<_>>();
        let spec_count = spec_states.len();

        let reaction = self
            .reactions
            .insert(ReactionInstance::new(name, comp, mode, body, spec_states));
        if let Some(inst) = self.components.get_mut(comp) {
            inst.owned.push(reaction);
        }

        for index in 0..spec_count {
            if let Err(error) = self.rebind_spec(reaction, index) {
                self.dispose_reaction(reaction);
                return Err(error);
            }
        }
        self.warn_unknown_endpoints(reaction);

        if mode == ReactionMode::Auto {
            // Seed the dependency set with one immediate run.
            self.run_implicit(reaction, true);
        }
        Ok(reaction)
    }

    /// Run an implicit reaction under a read tracker and rebind its
    /// connection set from the recorded reads.
    fn run_implicit(&mut self, reaction: ReactionKey, seeding: bool) {
        let Some(r) = self.reactions.get(reaction) else {
            return;
        };
        if !r.alive {
            return;
        }
        let owner = r.owner;
        let name = r.name.clone();
        let body = r.body.clone();

        self.sched.trackers.push(TrackFrame::default());
        let result = match &body {
            ReactionBody::User(f) => f(self, owner, &[]),
            ReactionBody::Setter { property, compute } => match compute(self, owner) {
                // During construction the seed value is applied directly;
                // afterwards it goes through the setter action.
                Ok(value) if seeding => self.do_mutate(owner, property, value, Mutation::Set, None),
                Ok(value) => self.invoke(owner, &format!("set_{property}"), vec![value]),
                Err(error) => Err(error),
            },
        };
        let frame = self.sched.trackers.pop().unwrap_or_default();

        if let Err(error) = result {
            tracing::error!(
                component = %self.debug_id(owner),
                reaction = %name,
                %error,
                "reaction failed"
            );
        }
        self.retrack_implicit(reaction, frame.reads);
    }

    fn run_queued_reaction(&mut self, reaction: ReactionKey) {
        let Some(r) = self.reactions.get_mut(reaction) else {
            return;
        };
        if !r.alive {
            return;
        }
        let reconnect: Vec<usize> = std::mem::take(&mut r.pending_reconnect)
            .into_iter()
            .collect();
        let events = std::mem::take(&mut r.pending_events);
        let mode = r.mode;
        let owner = r.owner;
        let name = r.name.clone();

        // Structural changes first: rewalk the affected specs so stale
        // endpoints are gone before delivery.
        for index in reconnect {
            if let Err(error) = self.rebind_spec(reaction, index) {
                tracing::error!(
                    component = %self.debug_id(owner),
                    reaction = %name,
                    index,
                    %error,
                    "reconnect failed"
                );
            }
        }

        match mode {
            ReactionMode::Auto => self.run_implicit(reaction, false),
            ReactionMode::Explicit => {
                let events: Vec<Event> = {
                    let Some(r) = self.reactions.get(reaction) else {
                        return;
                    };
                    // Drop events whose endpoint did not survive the rewalk.
                    events
                        .into_iter()
                        .filter(|ev| r.is_connected_to(ev.source(), ev.event_type()))
                        .collect()
                };
                if events.is_empty() {
                    return;
                }
                let Some(r) = self.reactions.get(reaction) else {
                    return;
                };
                let ReactionBody::User(f) = &r.body else {
                    return;
                };
                let f = f.clone();
                if let Err(error) = f(self, owner, &events) {
                    tracing::error!(
                        component = %self.debug_id(owner),
                        reaction = %name,
                        events = %events.iter().map(Event::event_type).join(","),
                        %error,
                        "reaction failed"
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // The loop

    /// Enqueue a callback to run before the current (or next) round ends.
    pub fn call_later(&mut self, f: impl FnOnce(&mut Stage) + 'static) {
        let was_idle = self.sched.is_idle();
        self.sched.laters.push(Box::new(f));
        if was_idle {
            self.sched.request_wake();
        }
    }

    /// Install the host scheduling primitive. The loop calls it whenever
    /// its queues transition from empty to non-empty, at most once per
    /// pending round.
    pub fn integrate(&mut self, host: impl Host + 'static) {
        self.sched.set_host(Box::new(host));
        if !self.sched.is_idle() {
            self.sched.request_wake();
        }
    }

    /// Drive rounds (actions, then reactions, then `call_later` callbacks)
    /// while any queue is non-empty, bounded by a fairness limit. If work
    /// remains at the limit the host is asked to schedule another call.
    #[tracing::instrument(skip(self))]
    pub fn iter(&mut self) {
        if self.sched.processing {
            return;
        }
        self.sched.processing = true;
        self.sched.wake_pending = false;

        for _round in 0..ROUND_LIMIT {
            if self.sched.is_idle() {
                break;
            }
            self.process_actions();
            self.process_reactions();
            self.process_laters();
        }

        self.sched.processing = false;
        if !self.sched.is_idle() {
            self.sched.request_wake();
        }
    }

    fn process_actions(&mut self) {
        while let Some(invocation) = self.sched.actions.pop_front() {
            if let Err(error) =
                self.execute_action(invocation.comp, &invocation.action, &invocation.args)
            {
                tracing::error!(
                    component = %self.debug_id(invocation.comp),
                    action = %invocation.action,
                    %error,
                    "action failed"
                );
            }
        }
    }

    fn process_reactions(&mut self) {
        if self.sched.in_reaction_phase {
            // A loop-internal invariant, not a user error.
            panic!("the reaction phase is not reentrant");
        }
        // Snapshot: reactions scheduled mid-phase run next round, which
        // both freezes the delivered batch and prevents cascade
        // starvation.
        let batch = std::mem::take(&mut self.sched.reactions);
        self.sched.queued.clear();

        self.sched.in_reaction_phase = true;
        for (_key, reaction) in batch {
            self.run_queued_reaction(reaction);
        }
        self.sched.in_reaction_phase = false;
    }

    fn process_laters(&mut self) {
        let laters = std::mem::take(&mut self.sched.laters);
        for later in laters {
            later(self);
        }
    }
}
