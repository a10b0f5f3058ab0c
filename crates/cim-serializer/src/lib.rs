//! CIM Serializer - codecs for CIM documents
//!
//! Implementations of the `cim_model::Serializer` contract:
//! - [`NTriplesSerializer`]: one RDF triple per line
//! - [`JsonLdSerializer`]: flattened JSON-LD graph
//! - [`SerializerRegistry`]: codec lookup by name or file extension
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_serializer::SerializerRegistry;
//!
//! let registry = SerializerRegistry::default_serializers();
//! let codec = registry.find_for_path(Path::new("grid.nt")).unwrap();
//! doc.save(&mut file, codec.as_ref())?;
//! ```

pub mod jsonld;
pub mod ntriples;
pub mod registry;

pub use jsonld::JsonLdSerializer;
pub use ntriples::NTriplesSerializer;
pub use registry::SerializerRegistry;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
