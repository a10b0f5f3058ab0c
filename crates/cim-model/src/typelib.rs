//! Type library
//!
//! Maps schema classes to host representations:
//! - Generic: any class, accessed through the property-name protocol
//! - Typed: an OID-carrying handle registered with [`TypeLibrary::register`]
//!
//! Typed handles are declared with [`typed_object!`](crate::typed_object)
//! and host enums with [`cim_enum!`](crate::cim_enum).

use crate::error::ModelError;
use crate::oid::Oid;
use crate::schema::{MetaClass, Schema};
use crate::value::{CimEnum, EnumValue};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Strongly-typed handle over a generic model object
///
/// A handle is the object's OID tagged with its host type; all state stays in
/// the document.
pub trait TypedObject: Clone + 'static {
    /// Schema class this type represents
    const CLASS_URI: &'static str;

    /// Host type name, for diagnostics
    const TYPE_NAME: &'static str;

    /// Wrap an OID
    fn from_oid(oid: Oid) -> Self;

    /// Wrapped OID
    fn oid(&self) -> &Oid;
}

/// Declare typed object handles
///
/// ```
/// cim_model::typed_object! {
///     /// Substation handle
///     pub struct Substation = "http://iec.ch/TC57/CIM100#Substation";
/// }
/// ```
#[macro_export]
macro_rules! typed_object {
    ($($(#[$meta:meta])* $vis:vis struct $name:ident = $uri:expr;)+) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq, Hash)]
            $vis struct $name($crate::Oid);

            impl $crate::TypedObject for $name {
                const CLASS_URI: &'static str = $uri;
                const TYPE_NAME: &'static str = stringify!($name);

                fn from_oid(oid: $crate::Oid) -> Self {
                    Self(oid)
                }

                fn oid(&self) -> &$crate::Oid {
                    &self.0
                }
            }
        )+
    };
}

/// Declare a host enum bound to a schema enumeration
///
/// ```
/// cim_model::cim_enum! {
///     /// Switch state
///     pub enum SwitchState = "http://example.org/cim#SwitchState" {
///         /// Closed
///         Closed => "closed",
///         /// Open
///         Open => "open",
///     }
/// }
/// ```
#[macro_export]
macro_rules! cim_enum {
    (
        $(#[$meta:meta])* $vis:vis enum $name:ident = $uri:literal {
            $($(#[$vmeta:meta])* $variant:ident => $literal:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $crate::CimEnum for $name {
            const ENUM_URI: &'static str = $uri;
            const VARIANTS: &'static [Self] = &[$(Self::$variant),+];

            fn literal(self) -> &'static str {
                match self {
                    $(Self::$variant => $literal),+
                }
            }

            fn from_literal(name: &str) -> Option<Self> {
                match name {
                    $($literal => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

/// How a class is represented in host code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Generic property-name accessors only
    Generic,
    /// Registered typed handle (host type name)
    Typed(&'static str),
}

#[derive(Debug, Clone)]
struct Registration {
    class: Arc<MetaClass>,
    type_name: &'static str,
}

/// Registry of typed handles and host enums for one schema
#[derive(Debug, Clone)]
pub struct TypeLibrary {
    schema: Arc<Schema>,
    types: HashMap<TypeId, Registration>,
    by_class: HashMap<Arc<str>, &'static str>,
    enums: HashMap<TypeId, Arc<MetaClass>>,
}

impl TypeLibrary {
    /// Create empty library over a schema
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            types: HashMap::new(),
            by_class: HashMap::new(),
            enums: HashMap::new(),
        }
    }

    /// Schema this library is bound to
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Register a typed handle
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownClass`] if the schema has no such class,
    /// or if it names an enumeration
    pub fn register<T: TypedObject>(&mut self) -> Result<&mut Self, ModelError> {
        let class = self
            .schema
            .class(T::CLASS_URI)
            .filter(|c| !c.is_enum())
            .ok_or_else(|| ModelError::UnknownClass(T::CLASS_URI.to_string()))?;

        tracing::debug!(class = T::CLASS_URI, ty = T::TYPE_NAME, "registered typed object");
        self.by_class
            .insert(Arc::clone(class.uri_arc()), T::TYPE_NAME);
        self.types.insert(
            TypeId::of::<T>(),
            Registration {
                class: Arc::clone(class),
                type_name: T::TYPE_NAME,
            },
        );
        Ok(self)
    }

    /// Register a host enum
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownClass`] if the enumeration class is
    /// missing, or [`ModelError::UnknownIndividual`] for the first literal
    /// without a schema individual
    pub fn register_enum<E: CimEnum>(&mut self) -> Result<&mut Self, ModelError> {
        let class = self
            .schema
            .class(E::ENUM_URI)
            .filter(|c| c.is_enum())
            .ok_or_else(|| ModelError::UnknownClass(E::ENUM_URI.to_string()))?;

        if let Some(missing) = E::VARIANTS
            .iter()
            .map(|v| v.individual_uri())
            .find(|uri| self.schema.individual(uri).is_none())
        {
            return Err(ModelError::UnknownIndividual(missing));
        }

        self.enums.insert(TypeId::of::<E>(), Arc::clone(class));
        Ok(self)
    }

    /// Check if a typed handle is registered
    #[inline]
    #[must_use]
    pub fn is_registered<T: TypedObject>(&self) -> bool {
        self.types.contains_key(&TypeId::of::<T>())
    }

    /// Registered class of a typed handle
    ///
    /// # Errors
    /// Returns [`ModelError::UnregisteredType`] if `T` was never registered
    pub fn class_of<T: TypedObject>(&self) -> Result<&Arc<MetaClass>, ModelError> {
        self.types
            .get(&TypeId::of::<T>())
            .map(|r| &r.class)
            .ok_or(ModelError::UnregisteredType(T::TYPE_NAME))
    }

    /// Registered class of a host enum
    ///
    /// # Errors
    /// Returns [`ModelError::UnregisteredType`] if `E` was never registered
    pub fn enum_class_of<E: CimEnum>(&self) -> Result<&Arc<MetaClass>, ModelError> {
        self.enums
            .get(&TypeId::of::<E>())
            .ok_or(ModelError::UnregisteredType(std::any::type_name::<E>()))
    }

    /// Representation chosen for a class
    #[must_use]
    pub fn representation(&self, class: &str) -> Representation {
        self.by_class
            .get(class)
            .map_or(Representation::Generic, |name| Representation::Typed(*name))
    }

    /// Registered handles as (host type name, class)
    pub fn registrations(&self) -> impl Iterator<Item = (&'static str, &Arc<MetaClass>)> {
        self.types.values().map(|r| (r.type_name, &r.class))
    }

    /// Number of registered typed handles
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if no typed handle is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Build an enum value from a schema individual
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownIndividual`] if the URI does not name an
    /// individual in the schema
    pub fn create_enum_value_instance(&self, individual: &str) -> Result<EnumValue, ModelError> {
        self.schema
            .individual(individual)
            .map(|i| EnumValue::new(i.uri()))
            .ok_or_else(|| ModelError::UnknownIndividual(individual.to_string()))
    }

    /// Build an enum value from a host literal, checked against the schema
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownIndividual`] if the literal has no schema
    /// individual
    pub fn enum_value<E: CimEnum>(&self, literal: E) -> Result<EnumValue, ModelError> {
        self.create_enum_value_instance(&literal.individual_uri())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClassDef, SchemaBuilder};

    const NS: &str = "http://example.org/cim#";

    crate::typed_object! {
        struct Breaker = "http://example.org/cim#Breaker";
        struct Ghost = "http://example.org/cim#Ghost";
    }

    crate::cim_enum! {
        enum SwitchState = "http://example.org/cim#SwitchState" {
            Open => "open",
            Closed => "closed",
        }
    }

    crate::cim_enum! {
        enum Partial = "http://example.org/cim#SwitchState" {
            Open => "open",
            Stuck => "stuck",
        }
    }

    fn schema() -> Arc<Schema> {
        Arc::new(
            SchemaBuilder::new()
                .class(ClassDef::new(format!("{NS}Breaker")))
                .class(ClassDef::enumeration(format!("{NS}SwitchState")))
                .individual(format!("{NS}SwitchState.open"), format!("{NS}SwitchState"))
                .individual(format!("{NS}SwitchState.closed"), format!("{NS}SwitchState"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn register_known_class() {
        let mut types = TypeLibrary::new(schema());
        types.register::<Breaker>().unwrap();

        assert!(types.is_registered::<Breaker>());
        assert_eq!(types.len(), 1);
        assert_eq!(
            types.registrations().map(|(name, _)| name).collect::<Vec<_>>(),
            vec!["Breaker"]
        );
        assert_eq!(types.class_of::<Breaker>().unwrap().name(), "Breaker");
        assert_eq!(
            types.representation(&format!("{NS}Breaker")),
            Representation::Typed("Breaker")
        );
        assert_eq!(
            types.representation(&format!("{NS}Other")),
            Representation::Generic
        );
    }

    #[test]
    fn register_unknown_class_fails() {
        let mut types = TypeLibrary::new(schema());
        assert!(matches!(
            types.register::<Ghost>(),
            Err(ModelError::UnknownClass(_))
        ));
        assert!(matches!(
            types.class_of::<Ghost>(),
            Err(ModelError::UnregisteredType("Ghost"))
        ));
    }

    #[test]
    fn register_enum_checks_literals() {
        let mut types = TypeLibrary::new(schema());
        types.register_enum::<SwitchState>().unwrap();
        assert!(types.enum_class_of::<SwitchState>().is_ok());

        assert!(matches!(
            types.register_enum::<Partial>(),
            Err(ModelError::UnknownIndividual(uri)) if uri.ends_with("SwitchState.stuck")
        ));
    }

    #[test]
    fn enum_paths_agree() {
        let types = TypeLibrary::new(schema());
        let from_literal = types.enum_value(SwitchState::Closed).unwrap();
        let from_individual = types
            .create_enum_value_instance(&format!("{NS}SwitchState.closed"))
            .unwrap();
        assert_eq!(from_literal, from_individual);
        assert_eq!(from_individual.to_enum::<SwitchState>(), Some(SwitchState::Closed));
        assert!(types
            .create_enum_value_instance(&format!("{NS}SwitchState.ajar"))
            .is_err());
    }
}
