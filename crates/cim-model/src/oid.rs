//! Object identifiers
//!
//! Provides [`Oid`], the namespace-scoped identity of every model object,
//! and the [`OidFactory`] trait that generates and parses identifiers.

use crate::error::ModelError;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Namespace used for UUID identifiers when none is configured
pub const URN_UUID: &str = "urn:uuid:";

/// Value part of an object identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OidValue {
    /// 128-bit UUID, rendered hyphenated
    Uuid(Uuid),

    /// Free-form identifier text
    Text(String),
}

impl Display for OidValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(uuid) => write!(f, "{}", uuid.hyphenated()),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Namespace-scoped object identifier
///
/// Immutable once assigned. Equality is value equality over
/// namespace and value.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid {
    namespace: Arc<str>,
    value: OidValue,
}

impl Oid {
    /// Create identifier from parts
    #[inline]
    #[must_use]
    pub fn new(namespace: impl Into<Arc<str>>, value: OidValue) -> Self {
        Self {
            namespace: namespace.into(),
            value,
        }
    }

    /// Create UUID identifier
    #[inline]
    #[must_use]
    pub fn uuid(namespace: impl Into<Arc<str>>, uuid: Uuid) -> Self {
        Self::new(namespace, OidValue::Uuid(uuid))
    }

    /// Create text identifier
    #[inline]
    #[must_use]
    pub fn text(namespace: impl Into<Arc<str>>, text: impl Into<String>) -> Self {
        Self::new(namespace, OidValue::Text(text.into()))
    }

    /// Namespace this identifier is scoped by
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Value part
    #[inline]
    #[must_use]
    pub fn value(&self) -> &OidValue {
        &self.value
    }

    /// Full IRI: namespace followed by value
    #[must_use]
    pub fn iri(&self) -> String {
        format!("{}{}", self.namespace, self.value)
    }
}

impl Display for Oid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.value, f)
    }
}

impl Debug for Oid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({}{})", self.namespace, self.value)
    }
}

/// Generates and parses object identifiers for one namespace
pub trait OidFactory: Send + Sync + Debug {
    /// Namespace prefix of produced identifiers
    fn namespace(&self) -> &str;

    /// Generate a fresh identifier
    fn create(&self) -> Oid;

    /// Parse the value part of an identifier
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidOid`] if the text is not a valid value
    fn parse(&self, text: &str) -> Result<Oid, ModelError>;

    /// Parse a full IRI
    ///
    /// Strips this factory's namespace when present, otherwise falls back to
    /// the fragment after the last `#`, then to a `urn:uuid:` prefix. The
    /// result keeps the IRI's own namespace whenever the IRI ends with the
    /// canonical rendering of the parsed value, so `from_iri(oid.iri())`
    /// returns `oid` for any namespace.
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidOid`] if the remaining value is invalid
    fn from_iri(&self, iri: &str) -> Result<Oid, ModelError> {
        let local = iri
            .strip_prefix(self.namespace())
            .filter(|_| !self.namespace().is_empty())
            .or_else(|| iri.rsplit_once('#').map(|(_, fragment)| fragment))
            .or_else(|| iri.strip_prefix(URN_UUID))
            .unwrap_or(iri);
        let parsed = self.parse(local)?;
        let value = parsed.value().to_string();
        match iri.strip_suffix(value.as_str()) {
            Some(namespace) if namespace != parsed.namespace() => {
                Ok(Oid::new(namespace, parsed.value))
            }
            _ => Ok(parsed),
        }
    }
}

/// UUID identifiers (v4 generation)
#[derive(Debug, Clone)]
pub struct UuidOidFactory {
    namespace: Arc<str>,
}

impl UuidOidFactory {
    /// Create factory for `urn:uuid:` identifiers
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_namespace(URN_UUID)
    }

    /// Create factory for a custom namespace
    #[inline]
    #[must_use]
    pub fn with_namespace(namespace: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Wrap a known UUID in this factory's namespace
    #[inline]
    #[must_use]
    pub fn from_uuid(&self, uuid: Uuid) -> Oid {
        Oid::uuid(Arc::clone(&self.namespace), uuid)
    }
}

impl Default for UuidOidFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl OidFactory for UuidOidFactory {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn create(&self) -> Oid {
        self.from_uuid(Uuid::new_v4())
    }

    fn parse(&self, text: &str) -> Result<Oid, ModelError> {
        // CIMXML writes rdf:ID="_<uuid>" and rdf:about="#_<uuid>"
        let trimmed = text.trim_start_matches('#').trim_start_matches('_');
        Uuid::parse_str(trimmed)
            .map(|uuid| self.from_uuid(uuid))
            .map_err(|_| ModelError::InvalidOid(text.to_string()))
    }
}

/// Free-form text identifiers with a sequential generator
#[derive(Debug)]
pub struct TextOidFactory {
    namespace: Arc<str>,
    next: std::sync::atomic::AtomicU64,
}

impl TextOidFactory {
    /// Create factory for a namespace
    #[inline]
    #[must_use]
    pub fn new(namespace: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
            next: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

impl OidFactory for TextOidFactory {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn create(&self) -> Oid {
        let n = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Oid::text(Arc::clone(&self.namespace), format!("obj-{n}"))
    }

    fn parse(&self, text: &str) -> Result<Oid, ModelError> {
        let trimmed = text.trim_start_matches('#');
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(ModelError::InvalidOid(text.to_string()));
        }
        Ok(Oid::text(Arc::clone(&self.namespace), trimmed))
    }
}
