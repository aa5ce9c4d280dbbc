//! Object schema: classes, properties and their kinds.

use crate::error::{CoreError, CoreResult};
use driftdb_codec::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kind of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// A single value or link.
    Value {
        /// Declared value type.
        ty: ValueType,
        /// Whether `Null` is allowed.
        optional: bool,
    },
    /// Ordered list, duplicates allowed.
    List(ValueType),
    /// Unordered set of distinct values.
    Set(ValueType),
    /// String-keyed map.
    Map(ValueType),
    /// Computed inverse of a link property on another class.
    LinkingObjects {
        /// Class holding the forward link.
        origin_class: String,
        /// Forward link property on the origin class.
        origin_property: String,
    },
}

impl PropertyKind {
    /// Returns true if `value` may be stored as an element or field value.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            PropertyKind::Value { ty, optional } => {
                if value.is_null() {
                    *optional || matches!(ty, ValueType::Any | ValueType::Object(_))
                } else {
                    ty.accepts(value)
                }
            }
            PropertyKind::List(ty) | PropertyKind::Set(ty) => ty.accepts(value),
            // Map entries of links turn into null when the target goes away.
            PropertyKind::Map(ty) => (value.is_null() && ty.is_object()) || ty.accepts(value),
            PropertyKind::LinkingObjects { .. } => false,
        }
    }

    /// Returns the element or value type, if the property stores values.
    pub fn value_type(&self) -> Option<&ValueType> {
        match self {
            PropertyKind::Value { ty, .. }
            | PropertyKind::List(ty)
            | PropertyKind::Set(ty)
            | PropertyKind::Map(ty) => Some(ty),
            PropertyKind::LinkingObjects { .. } => None,
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            PropertyKind::Value { ty, optional: true } => format!("{ty}?"),
            PropertyKind::Value { ty, optional: false } => ty.to_string(),
            PropertyKind::List(ty) => format!("list<{ty}>"),
            PropertyKind::Set(ty) => format!("set<{ty}>"),
            PropertyKind::Map(ty) => format!("map<{ty}>"),
            PropertyKind::LinkingObjects {
                origin_class,
                origin_property,
            } => format!("linkingObjects<{origin_class}.{origin_property}>"),
        }
    }
}

/// A named property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Property kind.
    pub kind: PropertyKind,
}

/// Schema of one object class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSchema {
    /// Class name.
    pub name: String,
    /// Properties in declaration order.
    pub properties: Vec<Property>,
}

impl ClassSchema {
    /// Creates an empty class.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Adds a property of any kind.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, kind: PropertyKind) -> Self {
        self.properties.push(Property {
            name: name.into(),
            kind,
        });
        self
    }

    /// Adds a required value property.
    #[must_use]
    pub fn field(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.property(name, PropertyKind::Value { ty, optional: false })
    }

    /// Adds an optional value property.
    #[must_use]
    pub fn optional(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.property(name, PropertyKind::Value { ty, optional: true })
    }

    /// Adds a list property.
    #[must_use]
    pub fn list(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.property(name, PropertyKind::List(ty))
    }

    /// Adds a set property.
    #[must_use]
    pub fn set(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.property(name, PropertyKind::Set(ty))
    }

    /// Adds a map property.
    #[must_use]
    pub fn map(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.property(name, PropertyKind::Map(ty))
    }

    /// Adds a linking-objects property.
    #[must_use]
    pub fn backlinks(
        self,
        name: impl Into<String>,
        origin_class: impl Into<String>,
        origin_property: impl Into<String>,
    ) -> Self {
        self.property(
            name,
            PropertyKind::LinkingObjects {
                origin_class: origin_class.into(),
                origin_property: origin_property.into(),
            },
        )
    }

    /// Looks up a property by name.
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// The set of classes a store holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    classes: BTreeMap<String, ClassSchema>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class, replacing any class with the same name.
    #[must_use]
    pub fn class(mut self, class: ClassSchema) -> Self {
        self.classes.insert(class.name.clone(), class);
        self
    }

    /// Looks up a class.
    pub fn get(&self, name: &str) -> Option<&ClassSchema> {
        self.classes.get(name)
    }

    /// Iterates over classes in name order.
    pub fn classes(&self) -> impl Iterator<Item = &ClassSchema> {
        self.classes.values()
    }

    /// Returns the number of classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if no classes are declared.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Looks up a property, failing with the matching usage error.
    pub fn property(&self, class: &str, property: &str) -> CoreResult<&Property> {
        self.get(class)
            .ok_or_else(|| CoreError::unknown_class(class))?
            .get(property)
            .ok_or_else(|| CoreError::unknown_property(class, property))
    }

    /// Checks internal consistency: link targets and backlink origins exist.
    pub fn validate(&self) -> CoreResult<()> {
        for class in self.classes.values() {
            for property in &class.properties {
                if let Some(ValueType::Object(target)) = property.kind.value_type() {
                    if !self.classes.contains_key(target) {
                        return Err(CoreError::configuration(format!(
                            "{}.{} links to unknown class {target}",
                            class.name, property.name
                        )));
                    }
                }
                if let PropertyKind::LinkingObjects {
                    origin_class,
                    origin_property,
                } = &property.kind
                {
                    let origin = self
                        .get(origin_class)
                        .and_then(|c| c.get(origin_property))
                        .ok_or_else(|| {
                            CoreError::configuration(format!(
                                "{}.{} refers to missing {origin_class}.{origin_property}",
                                class.name, property.name
                            ))
                        })?;
                    let links_here = matches!(
                        origin.kind.value_type(),
                        Some(ValueType::Object(target)) if *target == class.name
                    ) && !matches!(origin.kind, PropertyKind::Map(_));
                    if !links_here {
                        return Err(CoreError::configuration(format!(
                            "{origin_class}.{origin_property} does not link to {}",
                            class.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Merges `incoming` into this schema.
    ///
    /// New classes are added. A class present in both must be identical;
    /// anything else would need a migration and is rejected. Returns `None`
    /// when nothing changes.
    pub fn merge(&self, incoming: &Schema) -> CoreResult<Option<Schema>> {
        let mut merged = self.clone();
        let mut changed = false;
        for class in incoming.classes.values() {
            match self.classes.get(&class.name) {
                Some(existing) if existing == class => {}
                Some(existing) => {
                    return Err(CoreError::configuration(format!(
                        "class {} does not match the stored schema ({} stored properties, {} declared); migration required",
                        class.name,
                        existing.properties.len(),
                        class.properties.len()
                    )));
                }
                None => {
                    merged.classes.insert(class.name.clone(), class.clone());
                    changed = true;
                }
            }
        }
        if changed {
            merged.validate()?;
            Ok(Some(merged))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dog_schema() -> Schema {
        Schema::new()
            .class(
                ClassSchema::new("Dog")
                    .field("name", ValueType::String)
                    .optional("age", ValueType::Int)
                    .backlinks("owners", "Person", "dogs"),
            )
            .class(ClassSchema::new("Person").list("dogs", ValueType::Object("Dog".into())))
    }

    #[test]
    fn valid_schema() {
        assert!(dog_schema().validate().is_ok());
    }

    #[test]
    fn dangling_link_is_rejected() {
        let schema =
            Schema::new().class(ClassSchema::new("A").field("b", ValueType::Object("B".into())));
        assert!(matches!(
            schema.validate(),
            Err(CoreError::Configuration { .. })
        ));
    }

    #[test]
    fn backlink_must_point_at_a_link() {
        let schema = Schema::new()
            .class(ClassSchema::new("Dog").backlinks("owners", "Person", "name"))
            .class(ClassSchema::new("Person").field("name", ValueType::String));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn merge_adds_classes() {
        let stored = Schema::new().class(ClassSchema::new("A").field("x", ValueType::Int));
        let incoming = Schema::new().class(ClassSchema::new("B").field("y", ValueType::Int));
        let merged = stored.merge(&incoming).unwrap().unwrap();
        assert_eq!(merged.len(), 2);
        assert!(stored.merge(&stored).unwrap().is_none());
    }

    #[test]
    fn merge_rejects_changed_class() {
        let stored = Schema::new().class(ClassSchema::new("A").field("x", ValueType::Int));
        let incoming = Schema::new().class(ClassSchema::new("A").field("x", ValueType::String));
        assert!(matches!(
            stored.merge(&incoming),
            Err(CoreError::Configuration { .. })
        ));
    }

    #[test]
    fn property_lookup_errors() {
        let schema = dog_schema();
        assert!(schema.property("Dog", "name").is_ok());
        assert!(matches!(
            schema.property("Cat", "name"),
            Err(CoreError::UnknownClass { .. })
        ));
        assert!(matches!(
            schema.property("Dog", "color"),
            Err(CoreError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn kind_accepts() {
        let opt = PropertyKind::Value {
            ty: ValueType::Int,
            optional: true,
        };
        assert!(opt.accepts(&Value::Null));
        assert!(opt.accepts(&Value::Int(3)));
        assert!(!PropertyKind::List(ValueType::Int).accepts(&Value::Null));
        assert!(PropertyKind::List(ValueType::Any).accepts(&Value::Null));
        assert!(PropertyKind::Map(ValueType::Object("Dog".into())).accepts(&Value::Null));
    }
}
