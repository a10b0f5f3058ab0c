//! Serializer contract
//!
//! Codecs translate between a linear text form and [`ObjectRecord`]s, the
//! neutral exchange shape shared by full documents and difference models:
//! - Full documents: records without a change tag
//! - Differences: records tagged added / modified / removed, where a
//!   property recorded with no value means "cleared"
//!
//! Codecs receive a [`SerializerContext`] carrying the schema and the OID
//! factory so they can type literals and resolve identifiers.

use crate::config::{ReadOptions, WriteOptions};
use crate::error::ModelError;
use crate::event::PropertyValue;
use crate::oid::{Oid, OidFactory};
use crate::schema::{Cardinality, MetaProperty, Schema};
use crate::value::Value;
use indexmap::IndexMap;
use std::fmt::{self, Display, Formatter};
use std::io::Write;
use std::str::FromStr;

/// Difference model vocabulary namespace
pub const DIFFERENCE_NS: &str = "http://iec.ch/TC57/61970-552/DifferenceModel/1#";

/// Predicate carrying an object's change tag
pub const CHANGE_PREDICATE: &str = "http://iec.ch/TC57/61970-552/DifferenceModel/1#change";

/// Resource marking a cleared property
pub const NONE_RESOURCE: &str = "http://iec.ch/TC57/61970-552/DifferenceModel/1#none";

/// Operation that produced a difference entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeTag {
    /// Object created since subscription
    Added,
    /// Object existed and had properties changed
    Modified,
    /// Object removed since subscription
    Removed,
}

impl ChangeTag {
    /// Wire literal
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

impl Display for ChangeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeTag {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(Self::Added),
            "modified" => Ok(Self::Modified),
            "removed" => Ok(Self::Removed),
            other => Err(ModelError::format(format!("unknown change tag '{other}'"))),
        }
    }
}

/// Serialized property content
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyRecord {
    /// Attribute value; `None` means cleared
    Attribute(Option<Value>),
    /// Association targets in order; empty means cleared
    References(Vec<Oid>),
}

impl PropertyRecord {
    /// Check if the record clears the property
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        match self {
            Self::Attribute(value) => value.is_none(),
            Self::References(targets) => targets.is_empty(),
        }
    }
}

impl From<PropertyValue> for PropertyRecord {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Attribute(value) => Self::Attribute(value),
            PropertyValue::One(target) => Self::References(target.into_iter().collect()),
            PropertyValue::Many(targets) => Self::References(targets),
        }
    }
}

/// One object in exchange form
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    /// Object identifier
    pub oid: Oid,
    /// Class URI
    pub class: String,
    /// Difference tag; `None` in full documents
    pub change: Option<ChangeTag>,
    /// Property URI → content, in schema order
    pub properties: IndexMap<String, PropertyRecord>,
}

impl ObjectRecord {
    /// Create record without properties
    #[must_use]
    pub fn new(oid: Oid, class: impl Into<String>) -> Self {
        Self {
            oid,
            class: class.into(),
            change: None,
            properties: IndexMap::new(),
        }
    }

    /// Set change tag
    #[must_use]
    pub fn with_change(mut self, change: ChangeTag) -> Self {
        self.change = Some(change);
        self
    }

    /// Record an attribute value
    pub fn set_attribute(&mut self, property: impl Into<String>, value: Option<Value>) {
        self.properties
            .insert(property.into(), PropertyRecord::Attribute(value));
    }

    /// Append an association target
    pub fn push_reference(&mut self, property: impl Into<String>, target: Oid) {
        let entry = self
            .properties
            .entry(property.into())
            .or_insert_with(|| PropertyRecord::References(Vec::new()));
        match entry {
            PropertyRecord::References(targets) => {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
            PropertyRecord::Attribute(_) => *entry = PropertyRecord::References(vec![target]),
        }
    }

    /// Record a cleared association
    pub fn clear_references(&mut self, property: impl Into<String>) {
        self.properties
            .insert(property.into(), PropertyRecord::References(Vec::new()));
    }
}

/// Everything a codec needs besides the records
#[derive(Debug, Clone, Copy)]
pub struct SerializerContext<'a> {
    /// Active schema
    pub schema: &'a Schema,
    /// Identifier factory of the document
    pub oid_factory: &'a dyn OidFactory,
    /// Output settings
    pub write: &'a WriteOptions,
    /// Input settings
    pub read: &'a ReadOptions,
}

impl<'a> SerializerContext<'a> {
    /// Resolve the property a codec encountered on a subject of `class`
    ///
    /// Returns `Ok(None)` for unknown properties when `skip_unknown` is set.
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownClass`] or [`ModelError::UnknownProperty`]
    /// otherwise
    pub fn property_of(
        &self,
        class: &str,
        property: &str,
    ) -> Result<Option<&'a std::sync::Arc<MetaProperty>>, ModelError> {
        let schema: &'a Schema = self.schema;
        let Some(meta) = schema.class(class) else {
            return if self.read.skip_unknown {
                Ok(None)
            } else {
                Err(ModelError::UnknownClass(class.to_string()))
            };
        };
        match meta.property(property) {
            Some(p) => Ok(Some(p)),
            None if self.read.skip_unknown => Ok(None),
            None => Err(ModelError::unknown_property(class, property)),
        }
    }
}

/// Pluggable codec
pub trait Serializer: Send + Sync {
    /// Codec name
    fn name(&self) -> &'static str;

    /// File extensions handled, without the dot
    fn extensions(&self) -> &'static [&'static str];

    /// Write records
    ///
    /// # Errors
    /// Returns error on I/O failure or values with no encoding
    fn write(
        &self,
        records: &[ObjectRecord],
        ctx: &SerializerContext<'_>,
        out: &mut dyn Write,
    ) -> Result<(), ModelError>;

    /// Read records
    ///
    /// # Errors
    /// Returns [`ModelError::SerializationFormat`] on malformed input, or a
    /// schema error for unknown classes and properties unless skipped
    fn read(&self, input: &str, ctx: &SerializerContext<'_>) -> Result<Vec<ObjectRecord>, ModelError>;
}

/// Whether a link under `property` is written when inverse links are omitted
///
/// Bidirectional associations are written once: from the 1:1 side, or from
/// the lexically smaller property URI when both sides share a cardinality.
#[must_use]
pub fn writes_direction(property: &MetaProperty, inverse: Option<&MetaProperty>) -> bool {
    let Some(inverse) = inverse else {
        return true;
    };
    match (property.cardinality(), inverse.cardinality()) {
        (Some(Cardinality::OneToOne), Some(Cardinality::OneToMany)) => true,
        (Some(Cardinality::OneToMany), Some(Cardinality::OneToOne)) => false,
        _ => property.uri() <= inverse.uri(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClassDef, SchemaBuilder};

    #[test]
    fn change_tag_wire_literals() {
        for tag in [ChangeTag::Added, ChangeTag::Modified, ChangeTag::Removed] {
            assert_eq!(tag.as_str().parse::<ChangeTag>().unwrap(), tag);
        }
        assert!("renamed".parse::<ChangeTag>().is_err());
    }

    #[test]
    fn push_reference_deduplicates() {
        let mut record = ObjectRecord::new(Oid::text("", "a"), "http://x#A");
        record.push_reference("http://x#A.b", Oid::text("", "b"));
        record.push_reference("http://x#A.b", Oid::text("", "b"));
        assert_eq!(
            record.properties["http://x#A.b"],
            PropertyRecord::References(vec![Oid::text("", "b")])
        );
        record.clear_references("http://x#A.c");
        assert!(record.properties["http://x#A.c"].is_cleared());
    }

    #[test]
    fn one_direction_rule() {
        let schema = SchemaBuilder::new()
            .class(ClassDef::new("http://x#S"))
            .class(ClassDef::new("http://x#V"))
            .association(
                "http://x#S",
                "http://x#S.Vs",
                "http://x#V",
                Cardinality::OneToMany,
                Some("http://x#V.S".to_string()),
            )
            .association(
                "http://x#V",
                "http://x#V.S",
                "http://x#S",
                Cardinality::OneToOne,
                Some("http://x#S.Vs".to_string()),
            )
            .build()
            .unwrap();
        let many = schema.property("http://x#S.Vs").unwrap();
        let one = schema.property("http://x#V.S").unwrap();
        assert!(writes_direction(one, Some(many)));
        assert!(!writes_direction(many, Some(one)));
        assert!(writes_direction(many, None));
    }
}
