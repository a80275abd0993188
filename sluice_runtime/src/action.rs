//! Action descriptors.
//!
//! An action is a named, component-bound callable and the only path to
//! property mutation. Invoking one from outside enqueues it on the loop;
//! invoking one from a currently-executing action runs it synchronously so
//! a compound action stays one atomic batch; invoking one from a reaction
//! enqueues it for the next round. See [`crate::Stage::invoke`].

use std::fmt;
use std::rc::Rc;

use sluice_core::{ComponentKey, Value};

use crate::{RuntimeError, Stage};

/// The body of a user-defined action.
pub type ActionFn = Rc<dyn Fn(&mut Stage, ComponentKey, &[Value]) -> Result<(), RuntimeError>>;

#[derive(Clone)]
pub(crate) enum ActionKind {
    /// A user body.
    User(ActionFn),
    /// A generated `set_<name>` action: one argument, fed to the mutation
    /// channel.
    SetProp(String),
}

/// A registered action on a class.
#[derive(Clone)]
pub struct ActionDef {
    pub(crate) name: String,
    pub(crate) doc: String,
    pub(crate) kind: ActionKind,
}

impl ActionDef {
    pub(crate) fn user(name: &str, body: ActionFn) -> Self {
        Self {
            name: name.to_owned(),
            doc: String::new(),
            kind: ActionKind::User(body),
        }
    }

    pub(crate) fn setter(property: &str) -> Self {
        Self {
            name: format!("set_{property}"),
            doc: format!("Set the {property:?} property."),
            kind: ActionKind::SetProp(property.to_owned()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc_string(&self) -> &str {
        &self.doc
    }

    /// Whether this is a generated property setter.
    pub fn is_setter(&self) -> bool {
        matches!(self.kind, ActionKind::SetProp(_))
    }
}

impl fmt::Debug for ActionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ActionKind::User(_) => "user",
            ActionKind::SetProp(_) => "setter",
        };
        f.debug_struct("ActionDef")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}
