//! Error types for the CIM model engine
//!
//! Provides the error taxonomy for:
//! - Schema violations raised by the generic accessor protocol
//! - Object identity conflicts and lookups
//! - Serialization format and I/O failures

use crate::oid::Oid;
use crate::schema::Cardinality;

/// Main model error type
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Class URI not resolvable in the active schema
    #[error("unknown class: {0}")]
    UnknownClass(String),

    /// Enumeration individual not declared in the active schema
    #[error("unknown enumeration individual: {0}")]
    UnknownIndividual(String),

    /// Host type has no type library entry
    #[error("type not registered in type library: {0}")]
    UnregisteredType(&'static str),

    /// Property not declared on the class or any ancestor
    #[error("unknown property '{property}' on class {class}")]
    UnknownProperty {
        /// Class URI the lookup ran against
        class: String,
        /// Requested property key
        property: String,
    },

    /// Association accessor used against the other cardinality
    #[error("wrong cardinality for '{property}': declared {declared:?}, requested {requested:?}")]
    WrongCardinality {
        /// Property URI
        property: String,
        /// Cardinality in the schema
        declared: Cardinality,
        /// Cardinality of the accessor used
        requested: Cardinality,
    },

    /// Value or target incompatible with the declared datatype or range
    #[error("type mismatch for '{property}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Property URI
        property: String,
        /// Declared datatype or range class
        expected: String,
        /// Supplied value kind or target class
        found: String,
    },

    /// Object identifier already present (or retired) in the document
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(Oid),

    /// Object identifier not present in the document
    #[error("object not found: {0}")]
    NotFound(Oid),

    /// Self-link on an association that is not declared reflexive
    #[error("reflexive link not allowed on '{property}' for {oid}")]
    ReflexiveLink {
        /// Association URI
        property: String,
        /// Object linked to itself
        oid: Oid,
    },

    /// Bulk import aborted; carries every colliding identifier
    #[error("import aborted: {} colliding identifiers", .0.len())]
    ImportCollisions(Vec<Oid>),

    /// Identifier text cannot be parsed by the factory
    #[error("invalid object identifier: {0}")]
    InvalidOid(String),

    /// Operation not valid in the current lifecycle state
    #[error("invalid state: expected {expected}, actual {actual}")]
    InvalidState {
        /// States the operation accepts
        expected: &'static str,
        /// State at the time of the call
        actual: &'static str,
    },

    /// Malformed serialized input
    #[error("serialization format error{}: {message}", line_suffix(.line))]
    SerializationFormat {
        /// 1-based input line, when known
        line: Option<usize>,
        /// What was wrong
        message: String,
    },

    /// Underlying stream failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(" at line {l}")).unwrap_or_default()
}

impl ModelError {
    /// Create a format error without position information
    #[inline]
    pub fn format(message: impl Into<String>) -> Self {
        Self::SerializationFormat {
            line: None,
            message: message.into(),
        }
    }

    /// Create a format error at a 1-based line
    #[inline]
    pub fn format_at(line: usize, message: impl Into<String>) -> Self {
        Self::SerializationFormat {
            line: Some(line),
            message: message.into(),
        }
    }

    /// Create unknown property error
    #[inline]
    pub fn unknown_property(class: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            class: class.into(),
            property: property.into(),
        }
    }

    /// Create type mismatch error
    #[inline]
    pub fn type_mismatch(
        property: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            property: property.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Check if error is a schema violation surfaced by an accessor
    #[inline]
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::UnknownClass(_)
                | Self::UnknownIndividual(_)
                | Self::UnknownProperty { .. }
                | Self::WrongCardinality { .. }
                | Self::TypeMismatch { .. }
                | Self::ReflexiveLink { .. }
        )
    }

    /// Check if error is a missing-object condition
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors while building or loading a schema
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Same URI declared twice
    #[error("duplicate schema resource: {0}")]
    DuplicateUri(String),

    /// Referenced class does not exist
    #[error("'{referenced_by}' references unknown class {class}")]
    UnknownClass {
        /// Missing class URI
        class: String,
        /// Resource that names it
        referenced_by: String,
    },

    /// Inverse property does not exist
    #[error("'{property}' declares unknown inverse {inverse}")]
    UnknownInverse {
        /// Declaring association URI
        property: String,
        /// Missing inverse URI
        inverse: String,
    },

    /// Inverse property does not point back or is declared on the wrong class
    #[error("inverse mismatch between '{property}' and '{inverse}'")]
    InverseMismatch {
        /// Declaring association URI
        property: String,
        /// Declared inverse URI
        inverse: String,
    },

    /// Class inheritance loops back on itself
    #[error("inheritance cycle through {0}")]
    InheritanceCycle(String),

    /// Individual declared on a class that is not an enumeration
    #[error("individual {individual} belongs to non-enumeration class {class}")]
    NotAnEnumeration {
        /// Individual URI
        individual: String,
        /// Class it was declared on
        class: String,
    },

    /// Schema description could not be decoded
    #[error("schema description error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema stream could not be read
    #[error("io error reading schema: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_display() {
        let err = ModelError::UnknownClass("http://example.org#Nope".to_string());
        assert!(err.to_string().contains("unknown class"));
    }

    #[test]
    fn format_error_line_in_message() {
        let err = ModelError::format_at(12, "unterminated literal");
        assert_eq!(
            err.to_string(),
            "serialization format error at line 12: unterminated literal"
        );

        let err = ModelError::format("bad graph");
        assert_eq!(err.to_string(), "serialization format error: bad graph");
    }

    #[test]
    fn structural_classification() {
        assert!(ModelError::unknown_property("A", "b").is_structural());
        assert!(ModelError::type_mismatch("p", "Float", "String").is_structural());
        assert!(!ModelError::format("x").is_structural());
        assert!(!ModelError::InvalidOid("x".into()).is_not_found());
    }

    #[test]
    fn import_collisions_counts() {
        let err = ModelError::ImportCollisions(vec![Oid::text("", "a"), Oid::text("", "b")]);
        assert!(err.to_string().contains("2 colliding"));
    }
}
