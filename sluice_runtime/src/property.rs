//! Property and attribute descriptors.
//!
//! A property is a named, typed, event-emitting slot declared on a class.
//! Each descriptor contributes a storage slot per instance, a read
//! accessor, an auto-generated `set_<name>` action when settable, and an
//! event type equal to the property name. An attribute is a read-only,
//! non-observable slot.

use std::fmt;
use std::rc::Rc;

use sluice_core::{ComponentKey, Value};

use crate::{RuntimeError, Stage};

/// A custom validator/coercer: returns the coerced value or a reason.
pub type ValidatorFn = Rc<dyn Fn(&Value) -> Result<Value, String>>;

/// A default-value factory, invoked once per instance.
pub type DefaultFn = Rc<dyn Fn() -> Value>;

/// Body of a computed attribute.
pub type AttrFn = Rc<dyn Fn(&Stage, ComponentKey) -> Value>;

/// The declared type of a property. Each kind is a thin validator; the
/// runtime only depends on the descriptor contract, not the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropKind {
    Any,
    Bool,
    Int,
    Float,
    Str,
    List,
    Dict,
    Component,
}

impl PropKind {
    pub fn name(&self) -> &'static str {
        match self {
            PropKind::Any => "any",
            PropKind::Bool => "bool",
            PropKind::Int => "int",
            PropKind::Float => "float",
            PropKind::Str => "str",
            PropKind::List => "list",
            PropKind::Dict => "dict",
            PropKind::Component => "component",
        }
    }
}

#[derive(Clone)]
pub(crate) enum DefaultValue {
    Value(Value),
    Factory(DefaultFn),
}

/// A property descriptor: name, kind, default, settable flag, doc, and an
/// optional custom validator run after the kind check.
#[derive(Clone)]
pub struct Property {
    pub(crate) name: String,
    pub(crate) kind: PropKind,
    pub(crate) default: DefaultValue,
    pub(crate) settable: bool,
    pub(crate) doc: String,
    pub(crate) validator: Option<ValidatorFn>,
}

impl Property {
    fn new(name: &str, kind: PropKind, default: Value) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            default: DefaultValue::Value(default),
            settable: false,
            doc: String::new(),
            validator: None,
        }
    }

    /// A property accepting any value. Defaults to null.
    pub fn any(name: &str) -> Self {
        Self::new(name, PropKind::Any, Value::Null)
    }

    /// A boolean property. Defaults to `false`.
    pub fn boolean(name: &str) -> Self {
        Self::new(name, PropKind::Bool, Value::Bool(false))
    }

    /// An integer property. Defaults to `0`. Fractionless floats coerce.
    pub fn int(name: &str) -> Self {
        Self::new(name, PropKind::Int, Value::Int(0))
    }

    /// A float property. Defaults to `0.0`. Integers coerce.
    pub fn float(name: &str) -> Self {
        Self::new(name, PropKind::Float, Value::Float(0.0))
    }

    /// A string property. Defaults to `""`.
    pub fn string(name: &str) -> Self {
        Self::new(name, PropKind::Str, Value::Str(String::new()))
    }

    /// A list property; accepts the in-place mutation kinds. Defaults to `[]`.
    pub fn list(name: &str) -> Self {
        Self::new(name, PropKind::List, Value::List(Vec::new()))
    }

    /// A dict property; accepts keyed in-place mutations. Defaults to `{}`.
    pub fn dict(name: &str) -> Self {
        Self::new(name, PropKind::Dict, Value::Dict(Default::default()))
    }

    /// A property holding a component reference (or null). Defaults to null.
    pub fn component(name: &str) -> Self {
        Self::new(name, PropKind::Component, Value::Null)
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = DefaultValue::Value(value.into());
        self
    }

    /// Use a factory for the default, for values that must be fresh per
    /// instance.
    pub fn with_default_factory(mut self, factory: impl Fn() -> Value + 'static) -> Self {
        self.default = DefaultValue::Factory(Rc::new(factory));
        self
    }

    /// Mark the property settable: the class gains a `set_<name>` action.
    pub fn settable(mut self) -> Self {
        self.settable = true;
        self
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = doc.to_owned();
        self
    }

    /// Install a custom validator, run after the kind check.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&Value) -> Result<Value, String> + 'static,
    ) -> Self {
        self.validator = Some(Rc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PropKind {
        self.kind
    }

    pub fn is_settable(&self) -> bool {
        self.settable
    }

    pub fn doc_string(&self) -> &str {
        &self.doc
    }

    pub(crate) fn default_value(&self) -> Value {
        match &self.default {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Factory(f) => f(),
        }
    }

    /// Validate and coerce a candidate value. `owner` is only used for the
    /// error message.
    pub(crate) fn validate(&self, owner: &str, value: Value) -> Result<Value, RuntimeError> {
        let mismatch = |got: &Value| RuntimeError::Validation {
            component: owner.to_owned(),
            property: self.name.clone(),
            what: format!("expected {}, got {}", self.kind.name(), got.type_name()),
        };
        let coerced = match (self.kind, value) {
            (PropKind::Any, v) => v,
            (PropKind::Bool, v @ Value::Bool(_)) => v,
            (PropKind::Int, v @ Value::Int(_)) => v,
            (PropKind::Int, Value::Float(x)) if x.fract() == 0.0 => Value::Int(x as i64),
            (PropKind::Float, v @ Value::Float(_)) => v,
            (PropKind::Float, Value::Int(i)) => Value::Float(i as f64),
            (PropKind::Str, v @ Value::Str(_)) => v,
            (PropKind::List, v @ Value::List(_)) => v,
            (PropKind::Dict, v @ Value::Dict(_)) => v,
            (PropKind::Component, v @ (Value::Component(_) | Value::Null)) => v,
            (_, v) => return Err(mismatch(&v)),
        };
        match &self.validator {
            Some(validator) => validator(&coerced).map_err(|what| RuntimeError::Validation {
                component: owner.to_owned(),
                property: self.name.clone(),
                what,
            }),
            None => Ok(coerced),
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("settable", &self.settable)
            .finish()
    }
}

pub(crate) enum AttrValue {
    Fixed(Value),
    Computed(AttrFn),
}

/// A read-only, non-observable slot on a class: a static value or a
/// computed one. Attributes never emit events.
pub struct Attribute {
    pub(crate) name: String,
    pub(crate) doc: String,
    pub(crate) value: AttrValue,
}

impl Attribute {
    pub fn fixed(name: &str, value: impl Into<Value>) -> Self {
        Self {
            name: name.to_owned(),
            doc: String::new(),
            value: AttrValue::Fixed(value.into()),
        }
    }

    pub fn computed(name: &str, f: impl Fn(&Stage, ComponentKey) -> Value + 'static) -> Self {
        Self {
            name: name.to_owned(),
            doc: String::new(),
            value: AttrValue::Computed(Rc::new(f)),
        }
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = doc.to_owned();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.value {
            AttrValue::Fixed(_) => "fixed",
            AttrValue::Computed(_) => "computed",
        };
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_coercions() {
        let p = Property::int("bar");
        assert_eq!(p.validate("c", Value::Int(3)).unwrap(), Value::Int(3));
        assert_eq!(p.validate("c", Value::Float(3.0)).unwrap(), Value::Int(3));
        assert!(matches!(
            p.validate("c", Value::Float(3.5)),
            Err(RuntimeError::Validation { .. })
        ));
        assert!(matches!(
            p.validate("c", Value::Str("3".into())),
            Err(RuntimeError::Validation { .. })
        ));

        let f = Property::float("x");
        assert_eq!(f.validate("c", Value::Int(2)).unwrap(), Value::Float(2.0));

        let c = Property::component("parent");
        assert_eq!(c.validate("c", Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_custom_validator() {
        let p = Property::int("age").with_validator(|v| match v.as_int() {
            Some(i) if i >= 0 => Ok(v.clone()),
            _ => Err("must be non-negative".into()),
        });
        assert!(p.validate("c", Value::Int(3)).is_ok());
        assert!(matches!(
            p.validate("c", Value::Int(-1)),
            Err(RuntimeError::Validation { what, .. }) if what == "must be non-negative"
        ));
    }

    #[test]
    fn test_default_factory() {
        let p = Property::list("items").with_default_factory(|| Value::list([1]));
        assert_eq!(p.default_value(), Value::list([1]));
    }
}
