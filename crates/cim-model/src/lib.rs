//! CIM Model - schema-typed object graph engine
//!
//! In-memory engine for CIM electrical network models:
//! - Objects are instances of schema classes, identified by OIDs
//! - Attributes and associations are read and written through a generic
//!   property protocol, or through typed handles declared with
//!   [`typed_object!`]
//! - Bidirectional associations are kept symmetric on every mutation
//! - Every mutation is broadcast to subscribers; a [`DifferenceModel`]
//!   subscribes to record the delta against a baseline
//! - Codecs plug in through the [`Serializer`] contract
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_model::prelude::*;
//!
//! let schema = Arc::new(Schema::from_json(File::open("cim.json")?)?);
//! let mut doc = Document::new(schema, Arc::new(UuidOidFactory::new()));
//!
//! let substation = doc.create_object_auto(SUBSTATION)?.oid().clone();
//! let level = doc.create_object_auto(VOLTAGE_LEVEL)?.oid().clone();
//! doc.object_mut(&substation)?.add_assoc_1tom("VoltageLevels", &level)?;
//!
//! assert_eq!(
//!     doc.get_object(&level).and_then(|v| v.get_assoc_1to1("Substation").ok().flatten()),
//!     Some(&substation)
//! );
//! ```

mod association;
pub mod config;
pub mod difference;
pub mod document;
pub mod error;
pub mod event;
pub mod object;
pub mod oid;
pub mod schema;
pub mod serializer;
pub mod typelib;
pub mod value;

pub use config::{DocumentConfig, ImportPolicy, ReadOptions, WriteOptions};
pub use difference::{DifferenceEntry, DifferenceModel, DifferenceState};
pub use document::{ApplyMode, Document, ImportReport, ObjectMut};
pub use error::{ModelError, SchemaError};
pub use event::{
    ChangeEvent, ChangeSubscriber, LoggingSubscriber, MirroredChange, PropertyChangeKind,
    PropertyValue, SubscriptionId,
};
pub use object::{Link, ModelObject};
pub use oid::{Oid, OidFactory, OidValue, TextOidFactory, UuidOidFactory};
pub use schema::{
    Cardinality, ClassKind, DataType, MetaClass, MetaIndividual, MetaProperty, PropertyKey,
    Schema, SchemaBuilder,
};
pub use serializer::{ChangeTag, ObjectRecord, PropertyRecord, Serializer, SerializerContext};
pub use typelib::{Representation, TypeLibrary, TypedObject};
pub use value::{CimEnum, CompoundValue, EnumValue, FromValue, Value};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with CIM documents
    pub use crate::{
        CimEnum, DataType, DifferenceModel, Document, DocumentConfig, ModelError, ModelObject,
        Oid, OidFactory, Schema, Serializer, TypeLibrary, TypedObject, UuidOidFactory, Value,
    };
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
