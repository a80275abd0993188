//! The Sluice runtime: components hold their state in declared properties,
//! properties are mutated only through actions, and reactions observe the
//! resulting events in a frozen-state phase driven by a cooperative loop.

#![deny(unsafe_code)]
#![deny(clippy::all)]

mod action;
mod binding;
mod class;
mod component;
mod emitter;
mod event;
mod mutation;
mod property;
mod reaction;
mod sched;
mod stage;


pub use action::*;
pub use class::*;
pub use emitter::*;
pub use event::*;
pub use mutation::{mutate_array, mutate_dict};
pub use property::*;
pub use reaction::ReactionFn;
pub use sched::{Host, Loop};
pub use stage::*;

use sluice_core::{Mutation, ParseError};

/// Errors raised by the runtime.
///
/// Failures inside user-supplied action and reaction bodies are caught by
/// the loop, logged with their component/action/reaction context, and do
/// not abort the running batch.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("cannot mutate {component}.{property}: mutations are only allowed from an action")]
    MutationOutsideAction { component: String, property: String },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("connection {spec:?} failed at segment {segment:?}: {what}")]
    Connection {
        spec: String,
        segment: String,
        what: String,
    },

    #[error("validation failed for {component}.{property}: {what}")]
    Validation {
        component: String,
        property: String,
        what: String,
    },

    #[error("a class named {0:?} is already registered")]
    DuplicateClass(String),

    #[error("no class named {0:?} is registered")]
    UnknownClass(String),

    #[error("component no longer exists")]
    UnknownComponent,

    #[error("{component} has no property {name:?}")]
    UnknownProperty { component: String, name: String },

    #[error("{component} has no action {name:?}")]
    UnknownAction { component: String, name: String },

    #[error("{component} has no emitter {name:?}")]
    UnknownEmitter { component: String, name: String },

    #[error("{component} has no attribute {name:?}")]
    UnknownAttribute { component: String, name: String },

    #[error("mutation {mutation} is not supported by {kind} property {property:?}")]
    BadMutation {
        property: String,
        kind: &'static str,
        mutation: Mutation,
    },

    #[error("index {index} out of range for {property:?} (len {len})")]
    IndexOutOfRange {
        property: String,
        index: usize,
        len: usize,
    },

    #[error("property {0:?} is not settable")]
    NotSettable(String),

    #[error("{component} is disposed")]
    Disposed { component: String },

    #[error("bad arguments for {name:?}: {what}")]
    BadArguments { name: String, what: String },

    #[error("duplicate definition of {kind} {name:?} on class {class:?}")]
    DuplicateDefinition {
        class: String,
        kind: &'static str,
        name: String,
    },

    #[error("invalid identifier {0:?}")]
    BadName(String),

    #[error("{0:?} is a reserved name")]
    ReservedName(String),

    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    /// Wrap an arbitrary failure from user code.
    pub fn other(what: impl Into<String>) -> Self {
        RuntimeError::Other(what.into())
    }
}
