//! Schema lookup
//!
//! Read-only metamodel service: classes, properties and enumeration
//! individuals resolved by URI. Each [`MetaClass`] carries a flattened
//! property table (own + inherited) computed once when the schema is built,
//! so accessors never walk the ancestor chain.
//!
//! Schemas are constructed with [`SchemaBuilder`] or loaded from a JSON
//! description with [`Schema::from_json`], then shared behind an `Arc`.

mod builder;

pub use builder::{ClassDef, IndividualDef, PropertyDef, PropertyDefKind, SchemaBuilder};

use crate::error::SchemaError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::io::Read;
use std::sync::Arc;

/// XML Schema namespace, used for literal datatypes
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

/// RDF namespace
pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

/// Association cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Single target
    OneToOne,

    /// Ordered set of distinct targets
    OneToMany,
}

/// Class classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    /// Regular object class
    #[default]
    Concrete,

    /// Small record used as an attribute datatype
    Compound,

    /// Enumeration whose literals are schema individuals
    Enumeration,
}

/// Attribute datatype
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// xsd:boolean
    Boolean,
    /// xsd:integer
    Integer,
    /// xsd:float / xsd:double
    Float,
    /// xsd:string
    String,
    /// xsd:dateTime
    DateTime,
    /// Compound record class (URI)
    Compound(String),
    /// Enumeration class (URI)
    Enum(String),
}

impl DataType {
    /// XSD datatype IRI for primitive types
    #[must_use]
    pub fn xsd_iri(&self) -> Option<String> {
        let local = match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::DateTime => "dateTime",
            Self::Compound(_) | Self::Enum(_) => return None,
        };
        Some(format!("{XSD_NS}{local}"))
    }

    /// Check if datatype is a plain literal type
    #[inline]
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::Compound(_) | Self::Enum(_))
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => f.write_str("Boolean"),
            Self::Integer => f.write_str("Integer"),
            Self::Float => f.write_str("Float"),
            Self::String => f.write_str("String"),
            Self::DateTime => f.write_str("DateTime"),
            Self::Compound(uri) => write!(f, "Compound({uri})"),
            Self::Enum(uri) => write!(f, "Enum({uri})"),
        }
    }
}

/// Association metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationSpec {
    /// Target class URI
    pub range: Arc<str>,
    /// 1:1 or 1:many
    pub cardinality: Cardinality,
    /// Inverse property URI on the range class
    pub inverse: Option<Arc<str>>,
    /// Whether an object may target itself
    pub reflexive: bool,
}

/// Property kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    /// Value-holding property
    Attribute(DataType),
    /// Reference-holding property
    Association(AssociationSpec),
}

/// Schema description of an attribute or association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaProperty {
    uri: Arc<str>,
    name: String,
    domain: Arc<str>,
    kind: PropertyKind,
}

impl MetaProperty {
    /// Property URI
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Shared handle to the URI
    #[inline]
    #[must_use]
    pub fn uri_arc(&self) -> &Arc<str> {
        &self.uri
    }

    /// Short name (`IdentifiedObject.name` → `name`)
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaring class URI
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Attribute or association metadata
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    /// Check if property holds values
    #[inline]
    #[must_use]
    pub fn is_attribute(&self) -> bool {
        matches!(self.kind, PropertyKind::Attribute(_))
    }

    /// Check if property holds references
    #[inline]
    #[must_use]
    pub fn is_association(&self) -> bool {
        matches!(self.kind, PropertyKind::Association(_))
    }

    /// Attribute datatype
    #[inline]
    #[must_use]
    pub fn datatype(&self) -> Option<&DataType> {
        match &self.kind {
            PropertyKind::Attribute(datatype) => Some(datatype),
            PropertyKind::Association(_) => None,
        }
    }

    /// Association metadata
    #[inline]
    #[must_use]
    pub fn association(&self) -> Option<&AssociationSpec> {
        match &self.kind {
            PropertyKind::Association(spec) => Some(spec),
            PropertyKind::Attribute(_) => None,
        }
    }

    /// Association cardinality
    #[inline]
    #[must_use]
    pub fn cardinality(&self) -> Option<Cardinality> {
        self.association().map(|a| a.cardinality)
    }

    /// Inverse property URI
    #[inline]
    #[must_use]
    pub fn inverse(&self) -> Option<&str> {
        self.association().and_then(|a| a.inverse.as_deref())
    }
}

impl Display for MetaProperty {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Schema description of a class
#[derive(Debug, Clone)]
pub struct MetaClass {
    uri: Arc<str>,
    name: String,
    parent: Option<Arc<str>>,
    kind: ClassKind,
    /// Self first, root last
    lineage: Vec<Arc<str>>,
    own: Vec<Arc<str>>,
    /// Flattened property table keyed by property URI
    properties: IndexMap<Arc<str>, Arc<MetaProperty>>,
    /// Short name → property URI, derived classes shadow ancestors
    by_name: HashMap<String, Arc<str>>,
}

impl MetaClass {
    /// Class URI
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Shared handle to the URI
    #[inline]
    #[must_use]
    pub fn uri_arc(&self) -> &Arc<str> {
        &self.uri
    }

    /// Class name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Supertype URI
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Class kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// Check if class is a compound record type
    #[inline]
    #[must_use]
    pub fn is_compound(&self) -> bool {
        self.kind == ClassKind::Compound
    }

    /// Check if class is an enumeration
    #[inline]
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.kind == ClassKind::Enumeration
    }

    /// This class followed by its ancestors
    #[inline]
    #[must_use]
    pub fn lineage(&self) -> &[Arc<str>] {
        &self.lineage
    }

    /// Check if this class is `ancestor` or derives from it
    #[inline]
    #[must_use]
    pub fn is_subclass_of(&self, ancestor: &str) -> bool {
        self.lineage.iter().any(|uri| &**uri == ancestor)
    }

    /// Properties declared on this class only
    pub fn own_properties(&self) -> impl Iterator<Item = &Arc<MetaProperty>> {
        self.own.iter().filter_map(|uri| self.properties.get(uri))
    }

    /// Own and inherited properties, root-most first
    pub fn properties(&self) -> impl Iterator<Item = &Arc<MetaProperty>> {
        self.properties.values()
    }

    /// Resolve a property by URI or short name
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Arc<MetaProperty>> {
        self.properties.get(key).or_else(|| {
            self.by_name
                .get(key)
                .and_then(|uri| self.properties.get(uri))
        })
    }
}

impl Display for MetaClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Enumeration literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaIndividual {
    uri: Arc<str>,
    name: String,
    class: Arc<str>,
}

impl MetaIndividual {
    /// Individual URI (`…#PhaseCode.A`)
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Literal name (`A`)
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enumeration class URI
    #[inline]
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }
}

/// Any resource resolvable by URI
#[derive(Debug, Clone, Copy)]
pub enum SchemaResource<'a> {
    /// A class
    Class(&'a Arc<MetaClass>),
    /// An attribute or association
    Property(&'a Arc<MetaProperty>),
    /// An enumeration literal
    Individual(&'a Arc<MetaIndividual>),
}

/// Property lookup key: URI, short name, or a resolved property
pub trait PropertyKey {
    /// URI or short name to resolve against a class
    fn key(&self) -> &str;
}

impl PropertyKey for str {
    fn key(&self) -> &str {
        self
    }
}

impl PropertyKey for String {
    fn key(&self) -> &str {
        self
    }
}

impl PropertyKey for MetaProperty {
    fn key(&self) -> &str {
        self.uri()
    }
}

impl PropertyKey for Arc<MetaProperty> {
    fn key(&self) -> &str {
        self.uri()
    }
}

impl<T: PropertyKey + ?Sized> PropertyKey for &T {
    fn key(&self) -> &str {
        (**self).key()
    }
}

/// Loaded metamodel
///
/// Built once and shared read-only by every document and type library
/// that references it.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    classes: IndexMap<Arc<str>, Arc<MetaClass>>,
    properties: IndexMap<Arc<str>, Arc<MetaProperty>>,
    individuals: IndexMap<Arc<str>, Arc<MetaIndividual>>,
    namespaces: IndexMap<String, String>,
}

impl Schema {
    /// Start building a schema
    #[inline]
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Load a JSON schema description
    ///
    /// # Errors
    /// Returns error if the stream cannot be decoded or the description is
    /// inconsistent
    pub fn from_json(reader: impl Read) -> Result<Self, SchemaError> {
        let builder: SchemaBuilder = serde_json::from_reader(reader)?;
        builder.build()
    }

    /// Resolve any resource by URI
    #[must_use]
    pub fn resolve(&self, uri: &str) -> Option<SchemaResource<'_>> {
        self.classes
            .get(uri)
            .map(SchemaResource::Class)
            .or_else(|| self.properties.get(uri).map(SchemaResource::Property))
            .or_else(|| self.individuals.get(uri).map(SchemaResource::Individual))
    }

    /// Resolve class by URI
    #[inline]
    #[must_use]
    pub fn class(&self, uri: &str) -> Option<&Arc<MetaClass>> {
        self.classes.get(uri)
    }

    /// Resolve class by name (first match)
    #[must_use]
    pub fn class_by_name(&self, name: &str) -> Option<&Arc<MetaClass>> {
        self.classes.values().find(|c| c.name() == name)
    }

    /// Resolve property by URI
    #[inline]
    #[must_use]
    pub fn property(&self, uri: &str) -> Option<&Arc<MetaProperty>> {
        self.properties.get(uri)
    }

    /// Resolve enumeration literal by URI
    #[inline]
    #[must_use]
    pub fn individual(&self, uri: &str) -> Option<&Arc<MetaIndividual>> {
        self.individuals.get(uri)
    }

    /// Inverse of an association, if declared
    #[must_use]
    pub fn inverse_of(&self, property: &MetaProperty) -> Option<&Arc<MetaProperty>> {
        property.inverse().and_then(|uri| self.properties.get(uri))
    }

    /// All classes in declaration order
    pub fn classes(&self) -> impl Iterator<Item = &Arc<MetaClass>> {
        self.classes.values()
    }

    /// All properties in declaration order
    pub fn properties(&self) -> impl Iterator<Item = &Arc<MetaProperty>> {
        self.properties.values()
    }

    /// Literals of an enumeration class
    pub fn individuals_of<'a>(
        &'a self,
        enum_class: &'a str,
    ) -> impl Iterator<Item = &'a Arc<MetaIndividual>> + 'a {
        self.individuals
            .values()
            .filter(move |i| i.class() == enum_class)
    }

    /// Check if `class` is `ancestor` or derives from it
    #[must_use]
    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        self.classes
            .get(class)
            .is_some_and(|c| c.is_subclass_of(ancestor))
    }

    /// Supertypes of a class, nearest first
    pub fn ancestors(&self, class: &str) -> impl Iterator<Item = &Arc<MetaClass>> {
        self.classes
            .get(class)
            .map(|c| c.lineage().get(1..).unwrap_or_default())
            .unwrap_or_default()
            .iter()
            .filter_map(|uri| self.classes.get(uri))
    }

    /// Number of classes
    #[inline]
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Prefix → namespace table
    #[inline]
    #[must_use]
    pub fn namespaces(&self) -> &IndexMap<String, String> {
        &self.namespaces
    }

    /// Register a namespace prefix
    pub fn add_namespace(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        self.namespaces.insert(prefix.into(), namespace.into());
    }

    /// Shorten a URI to `prefix:local` when a namespace matches
    #[must_use]
    pub fn compact(&self, uri: &str) -> String {
        self.namespaces
            .iter()
            .find_map(|(prefix, ns)| {
                uri.strip_prefix(ns.as_str())
                    .map(|local| format!("{prefix}:{local}"))
            })
            .unwrap_or_else(|| uri.to_string())
    }

    /// Expand `prefix:local` to a full URI when the prefix is known
    #[must_use]
    pub fn expand(&self, curie: &str) -> String {
        curie
            .split_once(':')
            .and_then(|(prefix, local)| {
                self.namespaces
                    .get(prefix)
                    .map(|ns| format!("{ns}{local}"))
            })
            .unwrap_or_else(|| curie.to_string())
    }
}

/// Local part of a URI: fragment after `#`, else last path segment
#[must_use]
pub fn local_name(uri: &str) -> &str {
    uri.rsplit_once('#')
        .or_else(|| uri.rsplit_once('/'))
        .map_or(uri, |(_, local)| local)
}

/// Property short name: the local name after the class prefix
pub(crate) fn short_name(uri: &str) -> &str {
    let local = local_name(uri);
    local.rsplit_once('.').map_or(local, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://example.org/cim#";

    fn uri(local: &str) -> String {
        format!("{NS}{local}")
    }

    fn small_schema() -> Schema {
        SchemaBuilder::new()
            .namespace("cim", NS)
            .class(ClassDef::new(uri("IdentifiedObject")))
            .class(ClassDef::new(uri("Container")).parent(uri("IdentifiedObject")))
            .class(ClassDef::new(uri("Item")).parent(uri("IdentifiedObject")))
            .class(ClassDef::enumeration(uri("Colour")))
            .attribute(uri("IdentifiedObject"), uri("IdentifiedObject.name"), DataType::String)
            .attribute(uri("Item"), uri("Item.colour"), DataType::Enum(uri("Colour")))
            .association(
                uri("Container"),
                uri("Container.Items"),
                uri("Item"),
                Cardinality::OneToMany,
                Some(uri("Item.Container")),
            )
            .association(
                uri("Item"),
                uri("Item.Container"),
                uri("Container"),
                Cardinality::OneToOne,
                Some(uri("Container.Items")),
            )
            .individual(uri("Colour.red"), uri("Colour"))
            .individual(uri("Colour.blue"), uri("Colour"))
            .build()
            .unwrap()
    }

    #[test]
    fn resolve_by_uri() {
        let schema = small_schema();
        assert!(matches!(
            schema.resolve(&uri("Item")),
            Some(SchemaResource::Class(_))
        ));
        assert!(matches!(
            schema.resolve(&uri("Item.Container")),
            Some(SchemaResource::Property(_))
        ));
        assert!(matches!(
            schema.resolve(&uri("Colour.red")),
            Some(SchemaResource::Individual(_))
        ));
        assert!(schema.resolve(&uri("Nope")).is_none());
    }

    #[test]
    fn flattened_properties_include_inherited() {
        let schema = small_schema();
        let item = schema.class(&uri("Item")).unwrap();

        assert!(item.property("name").is_some());
        assert!(item.property(&uri("IdentifiedObject.name")).is_some());
        assert!(item.property("Container").is_some());
        assert_eq!(item.own_properties().count(), 2);
        assert_eq!(item.properties().count(), 3);
        assert!(item.property("Items").is_none());
    }

    #[test]
    fn lineage_and_subclass() {
        let schema = small_schema();
        let container = schema.class(&uri("Container")).unwrap();
        assert_eq!(container.lineage().len(), 2);
        assert!(schema.is_subclass_of(&uri("Container"), &uri("IdentifiedObject")));
        assert!(!schema.is_subclass_of(&uri("Container"), &uri("Item")));

        let ancestors: Vec<_> = schema
            .ancestors(&uri("Container"))
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(ancestors, vec!["IdentifiedObject"]);
        assert_eq!(schema.ancestors(&uri("Missing")).count(), 0);
    }

    #[test]
    fn inverse_lookup() {
        let schema = small_schema();
        let items = schema.property(&uri("Container.Items")).unwrap();
        let inverse = schema.inverse_of(items).unwrap();
        assert_eq!(inverse.name(), "Container");
        assert_eq!(inverse.cardinality(), Some(Cardinality::OneToOne));
    }

    #[test]
    fn individuals_of_enum() {
        let schema = small_schema();
        let names: Vec<_> = schema
            .individuals_of(&uri("Colour"))
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(names, vec!["red", "blue"]);
    }

    #[test]
    fn compact_and_expand() {
        let schema = small_schema();
        assert_eq!(schema.compact(&uri("Item")), "cim:Item");
        assert_eq!(schema.expand("cim:Item"), uri("Item"));
        assert_eq!(schema.expand("other:Item"), "other:Item");
    }

    #[test]
    fn local_name_variants() {
        assert_eq!(local_name("http://a/b#C.d"), "C.d");
        assert_eq!(local_name("http://a/b/c"), "c");
        assert_eq!(local_name("plain"), "plain");
    }
}
