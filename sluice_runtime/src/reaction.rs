//! Reaction runtime objects.
//!
//! A reaction subscribes to events, either through connection strings
//! (explicit mode) or through the properties it read during its last run
//! (implicit mode). Events accumulate in a pending buffer and are
//! delivered coalesced, in emission order, when the loop dequeues the
//! reaction.

use std::collections::BTreeSet;
use std::rc::Rc;

use sluice_core::{ComponentKey, ConnectionSpec, Value};

use crate::{Event, RuntimeError, Stage};

/// The body of a user-defined reaction. Called with every event
/// accumulated since the last run (zero events for implicit reactions and
/// manual invocations).
pub type ReactionFn = Rc<dyn Fn(&mut Stage, ComponentKey, &[Event]) -> Result<(), RuntimeError>>;

/// Body of a computed property initializer: the result is fed into the
/// property's setter.
pub type ComputeFn = Rc<dyn Fn(&mut Stage, ComponentKey) -> Result<Value, RuntimeError>>;

#[derive(Clone)]
pub(crate) enum ReactionBody {
    User(ReactionFn),
    /// Implicit reaction backing `Init::computed`: evaluate and feed the
    /// result into `set_<property>`.
    Setter {
        property: String,
        compute: ComputeFn,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReactionMode {
    /// Bound along parsed connection strings.
    Explicit,
    /// Dependencies inferred from tracked property reads.
    Auto,
}

/// A resolved subscription target produced by walking one connection spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub comp: ComponentKey,
    /// Event type for delivering endpoints; property name for structural
    /// ones.
    pub event_type: String,
    /// Structural endpoints reconnect the spec instead of delivering.
    pub structural: bool,
}

/// One connection spec of an explicit reaction, with its current bind.
#[derive(Debug, Clone)]
pub(crate) struct SpecState {
    pub spec: ConnectionSpec,
    /// Resolved ordering label: the `:label` suffix or the reaction name.
    pub label: String,
    pub endpoints: Vec<Endpoint>,
}

pub(crate) struct ReactionInstance {
    pub name: String,
    pub owner: ComponentKey,
    pub mode: ReactionMode,
    pub body: ReactionBody,
    /// Explicit connection specs; empty in implicit mode.
    pub specs: Vec<SpecState>,
    /// Implicit-mode connection set: the properties read during the last
    /// run, in read order.
    pub implicit: Vec<(ComponentKey, String)>,
    /// Events accumulated since the last run, in emission order.
    pub pending_events: Vec<Event>,
    /// Spec indices flagged for rewalk before the next delivery.
    pub pending_reconnect: BTreeSet<usize>,
    pub alive: bool,
}

impl ReactionInstance {
    pub(crate) fn new(
        name: String,
        owner: ComponentKey,
        mode: ReactionMode,
        body: ReactionBody,
        specs: Vec<SpecState>,
    ) -> Self {
        Self {
            name,
            owner,
            mode,
            body,
            specs,
            implicit: Vec::new(),
            pending_events: Vec::new(),
            pending_reconnect: BTreeSet::new(),
            alive: true,
        }
    }

    /// Whether an event from `(source, event_type)` is currently part of
    /// this reaction's connection set. Structural endpoints do not deliver.
    pub(crate) fn is_connected_to(&self, source: ComponentKey, event_type: &str) -> bool {
        match self.mode {
            ReactionMode::Auto => self
                .implicit
                .iter()
                .any(|(comp, prop)| *comp == source && prop == event_type),
            ReactionMode::Explicit => self.specs.iter().any(|spec| {
                spec.endpoints
                    .iter()
                    .any(|ep| !ep.structural && ep.comp == source && ep.event_type == event_type)
            }),
        }
    }
}
