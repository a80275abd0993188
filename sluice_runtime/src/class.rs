//! Class registration.
//!
//! A class is the per-type table of descriptors a component is built from.
//! Classes are assembled with [`ClassBuilder`], which validates names and
//! connection strings at build time, and registered on a
//! [`Stage`](crate::Stage) by name.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use sluice_core::{is_identifier, ComponentKey, ConnectionSpec, Record, Value};

use crate::{
    ActionDef, ActionFn, Attribute, EmitterDef, EmitterFn, Event, Property, ReactionFn,
    RuntimeError, Stage,
};

/// A class-declared reaction, instantiated per component at construction.
#[derive(Clone)]
pub(crate) struct ReactionDecl {
    pub name: String,
    /// Parsed connection strings; empty means implicit mode.
    pub specs: Vec<ConnectionSpec>,
    pub body: ReactionFn,
}

impl fmt::Debug for ReactionDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionDecl")
            .field("name", &self.name)
            .field("specs", &self.specs)
            .finish()
    }
}

/// The built, immutable definition of a component type.
#[derive(Debug)]
pub struct Class {
    name: String,
    doc: String,
    properties: Vec<Property>,
    prop_index: BTreeMap<String, usize>,
    attributes: BTreeMap<String, Attribute>,
    actions: BTreeMap<String, ActionDef>,
    emitters: BTreeMap<String, EmitterDef>,
    reactions: Vec<ReactionDecl>,
}

impl Class {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc_string(&self) -> &str {
        &self.doc
    }

    /// Declared properties, in declaration order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub(crate) fn property_index(&self, name: &str) -> Option<usize> {
        self.prop_index.get(name).copied()
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.property_index(name).map(|i| &self.properties[i])
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn action(&self, name: &str) -> Option<&ActionDef> {
        self.actions.get(name)
    }

    pub fn emitter(&self, name: &str) -> Option<&EmitterDef> {
        self.emitters.get(name)
    }

    pub(crate) fn reactions(&self) -> &[ReactionDecl] {
        &self.reactions
    }

    /// Whether `event_type` is declared on this class: a property name, an
    /// emitter name, or the synthetic `"dispose"` event.
    pub fn knows_event_type(&self, event_type: &str) -> bool {
        event_type == "dispose"
            || self.prop_index.contains_key(event_type)
            || self.emitters.contains_key(event_type)
    }
}

/// Builder for [`Class`] definitions: declare properties, attributes,
/// actions, emitters and reactions, then [`finish`](ClassBuilder::build).
pub struct ClassBuilder {
    name: String,
    doc: String,
    properties: Vec<Property>,
    attributes: Vec<Attribute>,
    actions: Vec<ActionDef>,
    emitters: Vec<EmitterDef>,
    reactions: Vec<(String, Vec<String>, ReactionFn)>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            doc: String::new(),
            properties: Vec::new(),
            attributes: Vec::new(),
            actions: Vec::new(),
            emitters: Vec::new(),
            reactions: Vec::new(),
        }
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = doc.to_owned();
        self
    }

    /// Declare a property.
    pub fn prop(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Declare a read-only attribute.
    pub fn attr(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Declare an action.
    pub fn action(
        mut self,
        name: &str,
        body: impl Fn(&mut Stage, ComponentKey, &[Value]) -> Result<(), RuntimeError> + 'static,
    ) -> Self {
        self.actions
            .push(ActionDef::user(name, Rc::new(body) as ActionFn));
        self
    }

    /// Declare an emitter: the returned record becomes an event of type
    /// `name`.
    pub fn emitter(
        mut self,
        name: &str,
        body: impl Fn(&mut Stage, ComponentKey, &[Value]) -> Result<Record, RuntimeError> + 'static,
    ) -> Self {
        self.emitters
            .push(EmitterDef::new(name, Rc::new(body) as EmitterFn));
        self
    }

    /// Declare an explicit reaction bound to the given connection strings.
    pub fn reaction(
        mut self,
        name: &str,
        connections: &[&str],
        body: impl Fn(&mut Stage, ComponentKey, &[Event]) -> Result<(), RuntimeError> + 'static,
    ) -> Self {
        self.reactions.push((
            name.to_owned(),
            connections.iter().map(|s| (*s).to_owned()).collect(),
            Rc::new(body) as ReactionFn,
        ));
        self
    }

    /// Declare an implicit reaction: dependencies are inferred from the
    /// properties it reads.
    pub fn auto_reaction(
        self,
        name: &str,
        body: impl Fn(&mut Stage, ComponentKey, &[Event]) -> Result<(), RuntimeError> + 'static,
    ) -> Self {
        self.reaction(name, &[], body)
    }

    /// Validate and build the class tables.
    pub fn build(self) -> Result<Class, RuntimeError> {
        let class_name = self.name.clone();
        if !is_identifier(&class_name) {
            return Err(RuntimeError::BadName(class_name));
        }
        let duplicate = |kind: &'static str, name: &str| RuntimeError::DuplicateDefinition {
            class: class_name.clone(),
            kind,
            name: name.to_owned(),
        };
        let check_name = |name: &str| -> Result<(), RuntimeError> {
            if !is_identifier(name) {
                Err(RuntimeError::BadName(name.to_owned()))
            } else if name == "dispose" || name == "id" {
                Err(RuntimeError::ReservedName(name.to_owned()))
            } else {
                Ok(())
            }
        };

        let mut prop_index = BTreeMap::new();
        for (i, property) in self.properties.iter().enumerate() {
            check_name(&property.name)?;
            if prop_index.insert(property.name.clone(), i).is_some() {
                return Err(duplicate("property", &property.name));
            }
            // Plain defaults are checked now; factory output at create time.
            if let crate::property::DefaultValue::Value(default) = &property.default {
                property.validate(&class_name, default.clone())?;
            }
        }

        let mut attributes = BTreeMap::new();
        for attribute in self.attributes {
            check_name(&attribute.name)?;
            if prop_index.contains_key(&attribute.name) {
                return Err(duplicate("attribute", &attribute.name));
            }
            let name = attribute.name.clone();
            if attributes.insert(name.clone(), attribute).is_some() {
                return Err(duplicate("attribute", &name));
            }
        }

        let mut actions = BTreeMap::new();
        for action in self.actions {
            check_name(&action.name)?;
            let name = action.name.clone();
            if actions.insert(name.clone(), action).is_some() {
                return Err(duplicate("action", &name));
            }
        }
        // Generated setters come last so a user action cannot shadow one.
        for property in self.properties.iter().filter(|p| p.settable) {
            let setter = ActionDef::setter(&property.name);
            let name = setter.name.clone();
            if actions.insert(name.clone(), setter).is_some() {
                return Err(duplicate("action", &name));
            }
        }

        let mut emitters = BTreeMap::new();
        for emitter in self.emitters {
            check_name(&emitter.name)?;
            // Emitter names share the event-type namespace with properties.
            if prop_index.contains_key(&emitter.name) {
                return Err(duplicate("emitter", &emitter.name));
            }
            let name = emitter.name.clone();
            if emitters.insert(name.clone(), emitter).is_some() {
                return Err(duplicate("emitter", &name));
            }
        }

        let mut reactions = Vec::new();
        let mut reaction_names = std::collections::BTreeSet::new();
        for (name, connections, body) in self.reactions {
            if !is_identifier(&name) {
                return Err(RuntimeError::BadName(name));
            }
            if !reaction_names.insert(name.clone()) {
                return Err(duplicate("reaction", &name));
            }
            let specs = connections
                .iter()
                .map(|s| ConnectionSpec::parse(s))
                .collect::<Result<Vec<_>, _>>()?;
            reactions.push(ReactionDecl { name, specs, body });
        }

        Ok(Class {
            name: self.name,
            doc: self.doc,
            properties: self.properties,
            prop_index,
            attributes,
            actions,
            emitters,
            reactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tables() {
        let class = ClassBuilder::new("Person")
            .prop(Property::string("first_name").settable())
            .prop(Property::int("age"))
            .attr(Attribute::fixed("species", "human"))
            .action("grow", |stage, this, _args| {
                let age = stage.peek(this, "age")?;
                stage.mutate(this, "age", Value::Int(age.as_int().unwrap_or(0) + 1))
            })
            .build()
            .unwrap();

        assert_eq!(class.name(), "Person");
        assert_eq!(class.properties().len(), 2);
        assert!(class.property("first_name").unwrap().is_settable());
        // Settable properties get a generated setter action.
        assert!(class.action("set_first_name").unwrap().is_setter());
        assert!(class.action("set_age").is_none());
        assert!(class.action("grow").is_some());
        assert!(class.knows_event_type("age"));
        assert!(class.knows_event_type("dispose"));
        assert!(!class.knows_event_type("mouse_down"));
    }

    #[test]
    fn test_duplicate_property() {
        let result = ClassBuilder::new("C")
            .prop(Property::int("x"))
            .prop(Property::string("x"))
            .build();
        assert!(matches!(
            result,
            Err(RuntimeError::DuplicateDefinition { kind: "property", name, .. }) if name == "x"
        ));
    }

    #[test]
    fn test_setter_collision() {
        let result = ClassBuilder::new("C")
            .prop(Property::int("x").settable())
            .action("set_x", |_, _, _| Ok(()))
            .build();
        assert!(matches!(
            result,
            Err(RuntimeError::DuplicateDefinition { kind: "action", name, .. }) if name == "set_x"
        ));
    }

    #[test]
    fn test_emitter_property_collision() {
        let result = ClassBuilder::new("C")
            .prop(Property::int("x"))
            .emitter("x", |_, _, _| Ok(Record::new()))
            .build();
        assert!(matches!(
            result,
            Err(RuntimeError::DuplicateDefinition { kind: "emitter", .. })
        ));
    }

    #[test]
    fn test_reserved_and_invalid_names() {
        assert!(matches!(
            ClassBuilder::new("C").prop(Property::any("dispose")).build(),
            Err(RuntimeError::ReservedName(_))
        ));
        assert!(matches!(
            ClassBuilder::new("C").prop(Property::any("9x")).build(),
            Err(RuntimeError::BadName(_))
        ));
        assert!(matches!(
            ClassBuilder::new("not a class").build(),
            Err(RuntimeError::BadName(_))
        ));
    }

    #[test]
    fn test_bad_connection_string_fails_build() {
        let result = ClassBuilder::new("C")
            .reaction("r", &["a..b"], |_, _, _| Ok(()))
            .build();
        assert!(matches!(result, Err(RuntimeError::Parse(_))));
    }

    #[test]
    fn test_bad_default_fails_build() {
        let result = ClassBuilder::new("C")
            .prop(Property::int("x").with_default("nope"))
            .build();
        assert!(matches!(result, Err(RuntimeError::Validation { .. })));
    }
}
