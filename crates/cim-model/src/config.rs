//! Configuration
//!
//! Builder-style settings for documents and serializers.

use serde::{Deserialize, Serialize};

/// Collision handling for bulk import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPolicy {
    /// Import non-colliding objects, report collisions
    #[default]
    Skip,
    /// Import nothing if any OID collides
    Abort,
}

/// Document configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Bulk import collision handling
    pub import_policy: ImportPolicy,
    /// Forbid reusing the OID of a removed object
    pub retire_removed_oids: bool,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            import_policy: ImportPolicy::Skip,
            retire_removed_oids: true,
        }
    }
}

impl DocumentConfig {
    /// Create default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set import policy
    #[must_use]
    pub fn with_import_policy(mut self, policy: ImportPolicy) -> Self {
        self.import_policy = policy;
        self
    }

    /// Set OID retirement
    #[must_use]
    pub fn with_retire_removed_oids(mut self, retire: bool) -> Self {
        self.retire_removed_oids = retire;
        self
    }
}

/// Serializer output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Write both directions of bidirectional associations
    pub include_inverse_links: bool,
    /// Order subjects by OID instead of document order
    pub sort_by_oid: bool,
    /// Human-friendly layout where the format allows it
    pub pretty: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            include_inverse_links: true,
            sort_by_oid: false,
            pretty: true,
        }
    }
}

impl WriteOptions {
    /// Set inverse link output
    #[must_use]
    pub fn with_inverse_links(mut self, include: bool) -> Self {
        self.include_inverse_links = include;
        self
    }

    /// Set OID ordering
    #[must_use]
    pub fn with_sort_by_oid(mut self, sort: bool) -> Self {
        self.sort_by_oid = sort;
        self
    }

    /// Set pretty output
    #[must_use]
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

/// Serializer input settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Ignore subjects and properties unknown to the schema instead of failing
    pub skip_unknown: bool,
}

impl ReadOptions {
    /// Set unknown-resource handling
    #[must_use]
    pub fn with_skip_unknown(mut self, skip: bool) -> Self {
        self.skip_unknown = skip;
        self
    }
}
