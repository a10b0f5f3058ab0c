//! Schema construction and validation
//!
//! The builder input types double as the JSON schema description format,
//! so a description file is just a serialized [`SchemaBuilder`].

use super::{
    local_name, short_name, AssociationSpec, Cardinality, ClassKind, DataType, MetaClass,
    MetaIndividual, MetaProperty, PropertyKind, Schema,
};
use crate::error::SchemaError;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Class declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    /// Class URI
    pub uri: String,
    /// Display name, defaults to the URI fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Supertype URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Class kind
    #[serde(default)]
    pub kind: ClassKind,
}

impl ClassDef {
    /// Declare a concrete class
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
            parent: None,
            kind: ClassKind::Concrete,
        }
    }

    /// Declare a compound record class
    #[must_use]
    pub fn compound(uri: impl Into<String>) -> Self {
        Self::new(uri).kind(ClassKind::Compound)
    }

    /// Declare an enumeration class
    #[must_use]
    pub fn enumeration(uri: impl Into<String>) -> Self {
        Self::new(uri).kind(ClassKind::Enumeration)
    }

    /// Set supertype
    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Set display name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set class kind
    #[must_use]
    pub fn kind(mut self, kind: ClassKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Attribute or association part of a property declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyDefKind {
    /// Value-holding property
    Attribute {
        /// Declared datatype
        datatype: DataType,
    },
    /// Reference-holding property
    Association {
        /// Target class URI
        range: String,
        /// 1:1 or 1:many
        cardinality: Cardinality,
        /// Inverse property URI
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inverse: Option<String>,
        /// Allow self-links
        #[serde(default)]
        reflexive: bool,
    },
}

/// Property declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property URI
    pub uri: String,
    /// Declaring class URI
    pub domain: String,
    /// Short name, defaults to the text after the last `.` of the fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Attribute or association
    #[serde(flatten)]
    pub kind: PropertyDefKind,
}

/// Enumeration literal declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualDef {
    /// Individual URI
    pub uri: String,
    /// Enumeration class URI
    pub class: String,
}

/// Schema builder and JSON description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaBuilder {
    /// Prefix → namespace
    pub namespaces: IndexMap<String, String>,
    /// Classes in declaration order
    pub classes: Vec<ClassDef>,
    /// Properties in declaration order
    pub properties: Vec<PropertyDef>,
    /// Enumeration literals
    pub individuals: Vec<IndividualDef>,
}

impl SchemaBuilder {
    /// Create empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a namespace prefix
    #[must_use]
    pub fn namespace(mut self, prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), namespace.into());
        self
    }

    /// Declare a class
    #[must_use]
    pub fn class(mut self, class: ClassDef) -> Self {
        self.classes.push(class);
        self
    }

    /// Declare an attribute
    #[must_use]
    pub fn attribute(
        mut self,
        domain: impl Into<String>,
        uri: impl Into<String>,
        datatype: DataType,
    ) -> Self {
        self.properties.push(PropertyDef {
            uri: uri.into(),
            domain: domain.into(),
            name: None,
            kind: PropertyDefKind::Attribute { datatype },
        });
        self
    }

    /// Declare an association
    #[must_use]
    pub fn association(
        mut self,
        domain: impl Into<String>,
        uri: impl Into<String>,
        range: impl Into<String>,
        cardinality: Cardinality,
        inverse: Option<String>,
    ) -> Self {
        self.properties.push(PropertyDef {
            uri: uri.into(),
            domain: domain.into(),
            name: None,
            kind: PropertyDefKind::Association {
                range: range.into(),
                cardinality,
                inverse,
                reflexive: false,
            },
        });
        self
    }

    /// Declare a fully specified property
    #[must_use]
    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    /// Declare an enumeration literal
    #[must_use]
    pub fn individual(mut self, uri: impl Into<String>, class: impl Into<String>) -> Self {
        self.individuals.push(IndividualDef {
            uri: uri.into(),
            class: class.into(),
        });
        self
    }

    /// Validate declarations and compute flattened class tables
    ///
    /// # Errors
    /// Returns [`SchemaError`] on duplicate URIs, dangling class or inverse
    /// references, inheritance cycles, or individuals on non-enumerations
    pub fn build(self) -> Result<Schema, SchemaError> {
        self.check_unique()?;

        let class_defs: IndexMap<&str, &ClassDef> =
            self.classes.iter().map(|c| (c.uri.as_str(), c)).collect();

        let lineages = lineages(&class_defs)?;

        let properties = self.build_properties(&class_defs)?;
        check_inverses(&properties, &lineages)?;

        let individuals = self.build_individuals(&class_defs)?;

        let mut classes = IndexMap::with_capacity(self.classes.len());
        for def in &self.classes {
            let lineage = lineages.get(def.uri.as_str()).cloned().unwrap_or_default();
            let class = flatten(def, lineage, &properties);
            classes.insert(Arc::clone(class.uri_arc()), Arc::new(class));
        }

        tracing::debug!(
            classes = classes.len(),
            properties = properties.len(),
            individuals = individuals.len(),
            "schema built"
        );

        Ok(Schema {
            classes,
            properties,
            individuals,
            namespaces: self.namespaces,
        })
    }

    fn check_unique(&self) -> Result<(), SchemaError> {
        let mut seen = IndexSet::new();
        let uris = self
            .classes
            .iter()
            .map(|c| &c.uri)
            .chain(self.properties.iter().map(|p| &p.uri))
            .chain(self.individuals.iter().map(|i| &i.uri));
        for uri in uris {
            if !seen.insert(uri.as_str()) {
                return Err(SchemaError::DuplicateUri(uri.clone()));
            }
        }
        Ok(())
    }

    fn build_properties(
        &self,
        classes: &IndexMap<&str, &ClassDef>,
    ) -> Result<IndexMap<Arc<str>, Arc<MetaProperty>>, SchemaError> {
        let require = |class: &str, kind: Option<ClassKind>, referenced_by: &str| {
            match classes.get(class) {
                Some(def) if kind.map_or(true, |k| def.kind == k) => Ok(()),
                _ => Err(SchemaError::UnknownClass {
                    class: class.to_string(),
                    referenced_by: referenced_by.to_string(),
                }),
            }
        };

        let mut out = IndexMap::with_capacity(self.properties.len());
        for def in &self.properties {
            require(&def.domain, None, &def.uri)?;

            let kind = match &def.kind {
                PropertyDefKind::Attribute { datatype } => {
                    match datatype {
                        DataType::Compound(class) => {
                            require(class, Some(ClassKind::Compound), &def.uri)?;
                        }
                        DataType::Enum(class) => {
                            require(class, Some(ClassKind::Enumeration), &def.uri)?;
                        }
                        _ => {}
                    }
                    PropertyKind::Attribute(datatype.clone())
                }
                PropertyDefKind::Association {
                    range,
                    cardinality,
                    inverse,
                    reflexive,
                } => {
                    require(range, None, &def.uri)?;
                    PropertyKind::Association(AssociationSpec {
                        range: Arc::from(range.as_str()),
                        cardinality: *cardinality,
                        inverse: inverse.as_deref().map(Arc::from),
                        reflexive: *reflexive,
                    })
                }
            };

            let name = def
                .name
                .clone()
                .unwrap_or_else(|| short_name(&def.uri).to_string());
            let uri: Arc<str> = Arc::from(def.uri.as_str());
            out.insert(
                Arc::clone(&uri),
                Arc::new(MetaProperty {
                    uri,
                    name,
                    domain: Arc::from(def.domain.as_str()),
                    kind,
                }),
            );
        }
        Ok(out)
    }

    fn build_individuals(
        &self,
        classes: &IndexMap<&str, &ClassDef>,
    ) -> Result<IndexMap<Arc<str>, Arc<MetaIndividual>>, SchemaError> {
        let mut out = IndexMap::with_capacity(self.individuals.len());
        for def in &self.individuals {
            match classes.get(def.class.as_str()) {
                Some(class) if class.kind == ClassKind::Enumeration => {}
                Some(_) => {
                    return Err(SchemaError::NotAnEnumeration {
                        individual: def.uri.clone(),
                        class: def.class.clone(),
                    })
                }
                None => {
                    return Err(SchemaError::UnknownClass {
                        class: def.class.clone(),
                        referenced_by: def.uri.clone(),
                    })
                }
            }
            let uri: Arc<str> = Arc::from(def.uri.as_str());
            out.insert(
                Arc::clone(&uri),
                Arc::new(MetaIndividual {
                    name: short_name(&def.uri).to_string(),
                    uri,
                    class: Arc::from(def.class.as_str()),
                }),
            );
        }
        Ok(out)
    }
}

/// `…#IdentifiedObject.name` → `name`
/// Resolve each class's ancestor chain, self first
fn lineages<'a>(
    classes: &IndexMap<&'a str, &'a ClassDef>,
) -> Result<HashMap<&'a str, Vec<Arc<str>>>, SchemaError> {
    let mut out = HashMap::with_capacity(classes.len());
    for (&uri, def) in classes {
        let mut chain: Vec<Arc<str>> = vec![Arc::from(uri)];
        let mut parent = def.parent.as_deref();
        while let Some(next) = parent {
            if chain.iter().any(|c| &**c == next) {
                return Err(SchemaError::InheritanceCycle(uri.to_string()));
            }
            let Some(next_def) = classes.get(next) else {
                return Err(SchemaError::UnknownClass {
                    class: next.to_string(),
                    referenced_by: uri.to_string(),
                });
            };
            chain.push(Arc::from(next));
            parent = next_def.parent.as_deref();
        }
        out.insert(uri, chain);
    }
    Ok(out)
}

/// Inverses must exist, point back, and be declared on a supertype of the range
fn check_inverses(
    properties: &IndexMap<Arc<str>, Arc<MetaProperty>>,
    lineages: &HashMap<&str, Vec<Arc<str>>>,
) -> Result<(), SchemaError> {
    for property in properties.values() {
        let Some(spec) = property.association() else {
            continue;
        };
        let Some(inverse_uri) = spec.inverse.as_deref() else {
            continue;
        };
        let mismatch = || SchemaError::InverseMismatch {
            property: property.uri().to_string(),
            inverse: inverse_uri.to_string(),
        };

        let inverse = properties
            .get(inverse_uri)
            .ok_or_else(|| SchemaError::UnknownInverse {
                property: property.uri().to_string(),
                inverse: inverse_uri.to_string(),
            })?;
        let back = inverse.association().ok_or_else(mismatch)?;
        if back.inverse.as_deref() != Some(property.uri()) {
            return Err(mismatch());
        }
        let range_lineage = lineages.get(&*spec.range).ok_or_else(mismatch)?;
        if !range_lineage.iter().any(|c| &**c == inverse.domain()) {
            return Err(mismatch());
        }
    }
    Ok(())
}

fn flatten(
    def: &ClassDef,
    lineage: Vec<Arc<str>>,
    properties: &IndexMap<Arc<str>, Arc<MetaProperty>>,
) -> MetaClass {
    let mut table = IndexMap::new();
    let mut by_name = HashMap::new();

    // Root-most first so derived declarations shadow inherited short names
    for ancestor in lineage.iter().rev() {
        for property in properties.values().filter(|p| p.domain() == &**ancestor) {
            by_name.insert(property.name().to_string(), Arc::clone(property.uri_arc()));
            table.insert(Arc::clone(property.uri_arc()), Arc::clone(property));
        }
    }

    let own = properties
        .values()
        .filter(|p| p.domain() == def.uri)
        .map(|p| Arc::clone(p.uri_arc()))
        .collect();

    MetaClass {
        uri: Arc::from(def.uri.as_str()),
        name: def
            .name
            .clone()
            .unwrap_or_else(|| local_name(&def.uri).to_string()),
        parent: def.parent.as_deref().map(Arc::from),
        kind: def.kind,
        lineage,
        own,
        properties: table,
        by_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://example.org/cim#";

    fn uri(local: &str) -> String {
        format!("{NS}{local}")
    }

    #[test]
    fn duplicate_uri_rejected() {
        let err = SchemaBuilder::new()
            .class(ClassDef::new(uri("A")))
            .class(ClassDef::new(uri("A")))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateUri(_)));
    }

    #[test]
    fn unknown_parent_rejected() {
        let err = SchemaBuilder::new()
            .class(ClassDef::new(uri("A")).parent(uri("Missing")))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownClass { .. }));
    }

    #[test]
    fn inheritance_cycle_rejected() {
        let err = SchemaBuilder::new()
            .class(ClassDef::new(uri("A")).parent(uri("B")))
            .class(ClassDef::new(uri("B")).parent(uri("A")))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InheritanceCycle(_)));
    }

    #[test]
    fn inverse_must_point_back() {
        let err = SchemaBuilder::new()
            .class(ClassDef::new(uri("A")))
            .class(ClassDef::new(uri("B")))
            .association(uri("A"), uri("A.B"), uri("B"), Cardinality::OneToOne, Some(uri("B.A")))
            .association(uri("B"), uri("B.A"), uri("A"), Cardinality::OneToOne, None)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InverseMismatch { .. }));
    }

    #[test]
    fn missing_inverse_rejected() {
        let err = SchemaBuilder::new()
            .class(ClassDef::new(uri("A")))
            .class(ClassDef::new(uri("B")))
            .association(uri("A"), uri("A.B"), uri("B"), Cardinality::OneToOne, Some(uri("B.A")))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownInverse { .. }));
    }

    #[test]
    fn individual_requires_enumeration() {
        let err = SchemaBuilder::new()
            .class(ClassDef::new(uri("A")))
            .individual(uri("A.x"), uri("A"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::NotAnEnumeration { .. }));
    }

    #[test]
    fn enum_attribute_requires_enum_class() {
        let err = SchemaBuilder::new()
            .class(ClassDef::new(uri("A")))
            .attribute(uri("A"), uri("A.kind"), DataType::Enum(uri("A")))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownClass { .. }));
    }

    #[test]
    fn short_names_derived_from_uri() {
        assert_eq!(short_name("http://x#IdentifiedObject.mRID"), "mRID");
        assert_eq!(short_name("http://x#PhaseCode.ABC"), "ABC");
        assert_eq!(short_name("http://x#Plain"), "Plain");
    }

    #[test]
    fn derived_short_name_shadows_inherited() {
        let schema = SchemaBuilder::new()
            .class(ClassDef::new(uri("Base")))
            .class(ClassDef::new(uri("Derived")).parent(uri("Base")))
            .attribute(uri("Base"), uri("Base.value"), DataType::String)
            .attribute(uri("Derived"), uri("Derived.value"), DataType::Float)
            .build()
            .unwrap();
        let derived = schema.class(&uri("Derived")).unwrap();
        assert_eq!(derived.property("value").unwrap().uri(), uri("Derived.value"));
        assert!(derived.property(&uri("Base.value")).is_some());
    }

    #[test]
    fn json_description_loads() {
        let json = format!(
            r#"{{
                "namespaces": {{ "cim": "{NS}" }},
                "classes": [
                    {{ "uri": "{NS}Substation" }},
                    {{ "uri": "{NS}VoltageLevel" }},
                    {{ "uri": "{NS}PhaseCode", "kind": "enumeration" }}
                ],
                "properties": [
                    {{ "uri": "{NS}Substation.VoltageLevels", "domain": "{NS}Substation",
                       "kind": "association", "range": "{NS}VoltageLevel",
                       "cardinality": "one_to_many", "inverse": "{NS}VoltageLevel.Substation" }},
                    {{ "uri": "{NS}VoltageLevel.Substation", "domain": "{NS}VoltageLevel",
                       "kind": "association", "range": "{NS}Substation",
                       "cardinality": "one_to_one", "inverse": "{NS}Substation.VoltageLevels" }},
                    {{ "uri": "{NS}VoltageLevel.highVoltageLimit", "domain": "{NS}VoltageLevel",
                       "kind": "attribute", "datatype": "float" }},
                    {{ "uri": "{NS}VoltageLevel.phases", "domain": "{NS}VoltageLevel",
                       "kind": "attribute", "datatype": {{ "enum": "{NS}PhaseCode" }} }}
                ],
                "individuals": [ {{ "uri": "{NS}PhaseCode.A", "class": "{NS}PhaseCode" }} ]
            }}"#
        );
        let schema = Schema::from_json(json.as_bytes()).unwrap();
        assert_eq!(schema.class_count(), 3);
        assert_eq!(schema.namespaces().get("cim").map(String::as_str), Some(NS));
        let vl = schema.class(&uri("VoltageLevel")).unwrap();
        assert_eq!(
            vl.property("phases").and_then(|p| p.datatype()),
            Some(&DataType::Enum(uri("PhaseCode")))
        );
    }
}
