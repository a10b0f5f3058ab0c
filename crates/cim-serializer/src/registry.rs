//! Serializer registry
//!
//! Provides [`SerializerRegistry`] for selecting codecs by name or by file
//! extension.

use crate::{JsonLdSerializer, NTriplesSerializer};
use cim_model::Serializer;
use std::path::Path;
use std::sync::Arc;

/// Registry of available codecs, searched in registration order
#[derive(Clone, Default)]
pub struct SerializerRegistry {
    serializers: Vec<Arc<dyn Serializer>>,
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl SerializerRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create registry with the built-in codecs
    #[must_use]
    pub fn default_serializers() -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(NTriplesSerializer::new()))
            .register(Arc::new(JsonLdSerializer::new()));
        registry
    }

    /// Register a codec; a codec with the same name is replaced
    pub fn register(&mut self, serializer: Arc<dyn Serializer>) -> &mut Self {
        self.serializers.retain(|s| s.name() != serializer.name());
        self.serializers.push(serializer);
        self
    }

    /// Codec by name
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Arc<dyn Serializer>> {
        self.serializers.iter().find(|s| s.name() == name)
    }

    /// Codec handling the file's extension, case-insensitively
    #[must_use]
    pub fn find_for_path(&self, path: &Path) -> Option<&Arc<dyn Serializer>> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        self.serializers
            .iter()
            .find(|s| s.extensions().contains(&extension.as_str()))
    }

    /// Every handled extension, in registration order
    #[must_use]
    pub fn all_extensions(&self) -> Vec<&'static str> {
        self.serializers
            .iter()
            .flat_map(|s| s.extensions().iter().copied())
            .collect()
    }

    /// Registered codec names
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.serializers.iter().map(|s| s.name()).collect()
    }

    /// Number of registered codecs
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.serializers.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.serializers.is_empty()
    }
}
