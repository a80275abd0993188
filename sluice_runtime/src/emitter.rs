//! Emitter descriptors.
//!
//! An emitter is a component-bound callable whose returned [`Record`] is
//! packaged as an event with `type` equal to the emitter's name. Emitters
//! run synchronously and never mutate state; see [`crate::Stage::fire`].

use std::fmt;
use std::rc::Rc;

use sluice_core::{ComponentKey, Record, Value};

use crate::{RuntimeError, Stage};

/// The body of an emitter: maps call arguments to event fields.
pub type EmitterFn = Rc<dyn Fn(&mut Stage, ComponentKey, &[Value]) -> Result<Record, RuntimeError>>;

/// A registered emitter on a class.
#[derive(Clone)]
pub struct EmitterDef {
    pub(crate) name: String,
    pub(crate) doc: String,
    pub(crate) body: EmitterFn,
}

impl EmitterDef {
    pub(crate) fn new(name: &str, body: EmitterFn) -> Self {
        Self {
            name: name.to_owned(),
            doc: String::new(),
            body,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc_string(&self) -> &str {
        &self.doc
    }
}

impl fmt::Debug for EmitterDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmitterDef")
            .field("name", &self.name)
            .finish()
    }
}
