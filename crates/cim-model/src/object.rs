//! Model objects
//!
//! A [`ModelObject`] is `(OID, class, attribute values, association links)`.
//! Reads are available directly on the object; every mutation goes through
//! the owning document so the association manager can keep both sides of a
//! bidirectional association in step.

use crate::error::ModelError;
use crate::event::PropertyValue;
use crate::oid::Oid;
use crate::schema::{Cardinality, MetaClass, MetaProperty, PropertyKey};
use crate::value::{CimEnum, FromValue, Value};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;

/// Association links held under one property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// 1:1 target
    One(Oid),
    /// 1:many targets, insertion ordered and distinct
    Many(IndexSet<Oid>),
}

impl Link {
    /// All targets in order
    pub fn targets(&self) -> impl Iterator<Item = &Oid> {
        let (one, many) = match self {
            Self::One(oid) => (Some(oid), None),
            Self::Many(set) => (None, Some(set.iter())),
        };
        one.into_iter().chain(many.into_iter().flatten())
    }

    /// Check if `oid` is a target
    #[must_use]
    pub fn contains(&self, oid: &Oid) -> bool {
        match self {
            Self::One(target) => target == oid,
            Self::Many(set) => set.contains(oid),
        }
    }

    /// Number of targets
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(set) => set.len(),
        }
    }

    /// Check if no target is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Node of the object graph
#[derive(Debug, Clone)]
pub struct ModelObject {
    oid: Oid,
    class: Arc<MetaClass>,
    attributes: IndexMap<Arc<str>, Value>,
    links: IndexMap<Arc<str>, Link>,
}

impl ModelObject {
    pub(crate) fn new(oid: Oid, class: Arc<MetaClass>) -> Self {
        Self {
            oid,
            class,
            attributes: IndexMap::new(),
            links: IndexMap::new(),
        }
    }

    /// Object identifier
    #[inline]
    #[must_use]
    pub fn oid(&self) -> &Oid {
        &self.oid
    }

    /// Object class
    #[inline]
    #[must_use]
    pub fn class(&self) -> &Arc<MetaClass> {
        &self.class
    }

    /// Object class URI
    #[inline]
    #[must_use]
    pub fn class_uri(&self) -> &str {
        self.class.uri()
    }

    /// Resolve a property declared on this object's class or an ancestor
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownProperty`] if the class has no such property
    pub fn meta_property(&self, key: impl PropertyKey) -> Result<&Arc<MetaProperty>, ModelError> {
        let key = key.key();
        self.class
            .property(key)
            .ok_or_else(|| ModelError::unknown_property(self.class.uri(), key))
    }

    fn attribute_property(&self, key: impl PropertyKey) -> Result<&Arc<MetaProperty>, ModelError> {
        let property = self.meta_property(key)?;
        if property.is_attribute() {
            Ok(property)
        } else {
            Err(ModelError::type_mismatch(property.uri(), "attribute", "association"))
        }
    }

    pub(crate) fn association_property(
        &self,
        key: impl PropertyKey,
        requested: Cardinality,
    ) -> Result<&Arc<MetaProperty>, ModelError> {
        let property = self.meta_property(key)?;
        match property.cardinality() {
            Some(declared) if declared == requested => Ok(property),
            Some(declared) => Err(ModelError::WrongCardinality {
                property: property.uri().to_string(),
                declared,
                requested,
            }),
            None => Err(ModelError::type_mismatch(
                property.uri(),
                "association",
                "attribute",
            )),
        }
    }

    /// Raw attribute value
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownProperty`] or [`ModelError::TypeMismatch`]
    /// if `key` does not name an attribute of this class
    pub fn attribute(&self, key: impl PropertyKey) -> Result<Option<&Value>, ModelError> {
        let property = self.attribute_property(key)?;
        Ok(self.attributes.get(property.uri()))
    }

    /// Typed attribute value, `None` when unset
    ///
    /// # Errors
    /// Returns [`ModelError::TypeMismatch`] if the stored value cannot be read
    /// as `V`, or [`ModelError::UnknownProperty`] for undeclared properties
    pub fn get_attribute<V: FromValue>(&self, key: impl PropertyKey) -> Result<Option<V>, ModelError> {
        let property = self.attribute_property(key)?;
        match self.attributes.get(property.uri()) {
            None => Ok(None),
            Some(value) => V::from_value(value).map(Some).ok_or_else(|| {
                ModelError::type_mismatch(property.uri(), V::EXPECTED, value.kind_name())
            }),
        }
    }

    /// Enum attribute as a host enum, `None` when unset
    ///
    /// # Errors
    /// Returns [`ModelError::TypeMismatch`] if the stored literal does not
    /// belong to `E`
    pub fn get_enum<E: CimEnum>(&self, key: impl PropertyKey) -> Result<Option<E>, ModelError> {
        let property = self.attribute_property(key)?;
        match self.attributes.get(property.uri()) {
            None => Ok(None),
            Some(Value::Enum(value)) => value.to_enum::<E>().map(Some).ok_or_else(|| {
                ModelError::type_mismatch(property.uri(), E::ENUM_URI, value.uri())
            }),
            Some(other) => Err(ModelError::type_mismatch(
                property.uri(),
                E::ENUM_URI,
                other.kind_name(),
            )),
        }
    }

    /// Field of a compound attribute, `None` when the compound or field is unset
    ///
    /// # Errors
    /// Returns [`ModelError::TypeMismatch`] if the attribute is not compound or
    /// the field cannot be read as `V`
    pub fn get_compound_field<V: FromValue>(
        &self,
        key: impl PropertyKey,
        field: &str,
    ) -> Result<Option<V>, ModelError> {
        let property = self.attribute_property(key)?;
        let record = match self.attributes.get(property.uri()) {
            None => return Ok(None),
            Some(Value::Compound(record)) => record,
            Some(other) => {
                return Err(ModelError::type_mismatch(
                    property.uri(),
                    "Compound",
                    other.kind_name(),
                ))
            }
        };
        let field_uri = compound_field_uri(record.class(), field);
        match record.get(&field_uri).or_else(|| record.get(field)) {
            None => Ok(None),
            Some(value) => V::from_value(value).map(Some).ok_or_else(|| {
                ModelError::type_mismatch(field, V::EXPECTED, value.kind_name())
            }),
        }
    }

    /// 1:1 association target
    ///
    /// # Errors
    /// Returns [`ModelError::WrongCardinality`] on a 1:many property
    pub fn get_assoc_1to1(&self, key: impl PropertyKey) -> Result<Option<&Oid>, ModelError> {
        let property = self.association_property(key, Cardinality::OneToOne)?;
        Ok(self.one(property.uri()))
    }

    /// 1:many association targets in insertion order
    ///
    /// # Errors
    /// Returns [`ModelError::WrongCardinality`] on a 1:1 property
    pub fn get_assoc_1tom(&self, key: impl PropertyKey) -> Result<Vec<Oid>, ModelError> {
        let property = self.association_property(key, Cardinality::OneToMany)?;
        Ok(self
            .many(property.uri())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Set attributes as (property URI, value)
    pub fn attributes(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.attributes.iter()
    }

    /// Non-empty association links as (property URI, link)
    pub fn links(&self) -> impl Iterator<Item = (&Arc<str>, &Link)> {
        self.links.iter()
    }

    /// Full value of a property, by URI
    #[must_use]
    pub fn property_value(&self, property: &MetaProperty) -> PropertyValue {
        match property.cardinality() {
            None => PropertyValue::Attribute(self.attributes.get(property.uri()).cloned()),
            Some(Cardinality::OneToOne) => PropertyValue::One(self.one(property.uri()).cloned()),
            Some(Cardinality::OneToMany) => PropertyValue::Many(
                self.many(property.uri())
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Same OID, class, attributes, and association targets as sets
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.oid == other.oid
            && self.class.uri() == other.class.uri()
            && self.attributes == other.attributes
            && self.links == other.links
    }

    pub(crate) fn one(&self, uri: &str) -> Option<&Oid> {
        match self.links.get(uri) {
            Some(Link::One(oid)) => Some(oid),
            _ => None,
        }
    }

    pub(crate) fn many(&self, uri: &str) -> Option<&IndexSet<Oid>> {
        match self.links.get(uri) {
            Some(Link::Many(set)) => Some(set),
            _ => None,
        }
    }

    pub(crate) fn set_attribute_value(&mut self, uri: &Arc<str>, value: Option<Value>) {
        match value {
            Some(value) => {
                self.attributes.insert(Arc::clone(uri), value);
            }
            None => {
                self.attributes.shift_remove(&**uri);
            }
        }
    }

    /// Replace a 1:1 target, returning the previous one
    pub(crate) fn link_one(&mut self, uri: &Arc<str>, target: Oid) -> Option<Oid> {
        match self.links.insert(Arc::clone(uri), Link::One(target)) {
            Some(Link::One(previous)) => Some(previous),
            _ => None,
        }
    }

    pub(crate) fn unlink_one(&mut self, uri: &str) -> Option<Oid> {
        match self.links.shift_remove(uri) {
            Some(Link::One(previous)) => Some(previous),
            _ => None,
        }
    }

    /// Append to a 1:many set; false if already present
    pub(crate) fn insert_many(&mut self, uri: &Arc<str>, target: Oid) -> bool {
        let link = self
            .links
            .entry(Arc::clone(uri))
            .or_insert_with(|| Link::Many(IndexSet::new()));
        match link {
            Link::Many(set) => set.insert(target),
            Link::One(_) => {
                *link = Link::Many(IndexSet::from([target]));
                true
            }
        }
    }

    /// Remove from a 1:many set preserving order; empty sets are dropped
    pub(crate) fn remove_many(&mut self, uri: &str, target: &Oid) -> bool {
        let Some(Link::Many(set)) = self.links.get_mut(uri) else {
            return false;
        };
        let removed = set.shift_remove(target);
        if set.is_empty() {
            self.links.shift_remove(uri);
        }
        removed
    }

    /// Drop every link under a property
    pub(crate) fn take_links(&mut self, uri: &str) -> Vec<Oid> {
        match self.links.shift_remove(uri) {
            Some(Link::One(oid)) => vec![oid],
            Some(Link::Many(set)) => set.into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Drop `target` from whichever link shape the property holds
    pub(crate) fn remove_link_to(&mut self, uri: &str, target: &Oid) -> bool {
        match self.links.get(uri) {
            Some(Link::One(oid)) if oid == target => {
                self.links.shift_remove(uri);
                true
            }
            Some(Link::Many(_)) => self.remove_many(uri, target),
            _ => false,
        }
    }

    /// Properties whose links include `target`
    pub(crate) fn properties_referencing(&self, target: &Oid) -> Vec<Arc<str>> {
        self.links
            .iter()
            .filter(|(_, link)| link.contains(target))
            .map(|(uri, _)| Arc::clone(uri))
            .collect()
    }

    /// Association properties currently holding links
    pub(crate) fn linked_properties(&self) -> Vec<Arc<str>> {
        self.links.keys().cloned().collect()
    }
}

/// Compound fields are declared as `<CompoundClass>.<field>`
pub(crate) fn compound_field_uri(compound_class: &str, field: &str) -> String {
    if field.contains('#') {
        field.to_string()
    } else {
        format!("{compound_class}.{field}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClassDef, DataType, Schema, SchemaBuilder};
    use crate::value::CompoundValue;

    const NS: &str = "http://example.org/cim#";

    fn uri(local: &str) -> String {
        format!("{NS}{local}")
    }

    fn schema() -> Schema {
        SchemaBuilder::new()
            .class(ClassDef::new(uri("Line")))
            .class(ClassDef::compound(uri("Period")))
            .attribute(uri("Line"), uri("Line.length"), DataType::Float)
            .attribute(uri("Line"), uri("Line.period"), DataType::Compound(uri("Period")))
            .attribute(uri("Period"), uri("Period.start"), DataType::String)
            .association(uri("Line"), uri("Line.Ends"), uri("Line"), Cardinality::OneToMany, None)
            .association(uri("Line"), uri("Line.Next"), uri("Line"), Cardinality::OneToOne, None)
            .build()
            .unwrap()
    }

    fn line() -> ModelObject {
        let schema = schema();
        let class = Arc::clone(schema.class(&uri("Line")).unwrap());
        ModelObject::new(Oid::text("urn:t:", "l1"), class)
    }

    #[test]
    fn typed_attribute_read() {
        let mut obj = line();
        let length = Arc::clone(obj.meta_property("length").unwrap().uri_arc());
        obj.set_attribute_value(&length, Some(Value::Float(12.5)));

        assert_eq!(obj.get_attribute::<f64>("length").unwrap(), Some(12.5));
        assert!(matches!(
            obj.get_attribute::<String>("length"),
            Err(ModelError::TypeMismatch { .. })
        ));
        assert!(matches!(
            obj.get_attribute::<f64>("width"),
            Err(ModelError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn association_accessors_check_cardinality() {
        let obj = line();
        assert!(obj.get_assoc_1tom("Ends").unwrap().is_empty());
        assert_eq!(obj.get_assoc_1to1("Next").unwrap(), None);
        assert!(matches!(
            obj.get_assoc_1to1("Ends"),
            Err(ModelError::WrongCardinality { .. })
        ));
        assert!(matches!(
            obj.get_assoc_1tom("length"),
            Err(ModelError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn many_links_keep_order_and_drop_when_empty() {
        let mut obj = line();
        let ends: Arc<str> = Arc::from(uri("Line.Ends"));
        let (a, b, c) = (
            Oid::text("urn:t:", "a"),
            Oid::text("urn:t:", "b"),
            Oid::text("urn:t:", "c"),
        );
        assert!(obj.insert_many(&ends, a.clone()));
        assert!(obj.insert_many(&ends, b.clone()));
        assert!(obj.insert_many(&ends, c.clone()));
        assert!(!obj.insert_many(&ends, a.clone()));

        assert!(obj.remove_many(&ends, &b));
        assert_eq!(obj.get_assoc_1tom("Ends").unwrap(), vec![a.clone(), c.clone()]);

        obj.remove_many(&ends, &a);
        obj.remove_many(&ends, &c);
        assert_eq!(obj.links().count(), 0);
    }

    #[test]
    fn compound_field_read() {
        let mut obj = line();
        let period = Arc::clone(obj.meta_property("period").unwrap().uri_arc());
        assert_eq!(obj.get_compound_field::<String>("period", "start").unwrap(), None);

        let mut record = CompoundValue::new(uri("Period"));
        record.insert(uri("Period.start"), "2020");
        obj.set_attribute_value(&period, Some(Value::Compound(record)));

        assert_eq!(
            obj.get_compound_field::<String>("period", "start").unwrap(),
            Some("2020".to_string())
        );
    }

    #[test]
    fn equivalence_ignores_link_order() {
        let mut left = line();
        let mut right = line();
        let ends: Arc<str> = Arc::from(uri("Line.Ends"));
        let (a, b) = (Oid::text("urn:t:", "a"), Oid::text("urn:t:", "b"));
        left.insert_many(&ends, a.clone());
        left.insert_many(&ends, b.clone());
        right.insert_many(&ends, b);
        right.insert_many(&ends, a);
        assert!(left.is_equivalent(&right));
    }
}
