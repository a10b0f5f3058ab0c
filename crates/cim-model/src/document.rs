//! Document
//!
//! Owning container of model objects, indexed by OID:
//! - Creation (generic or typed), lookup, removal and bulk import
//! - Mutating accessors through [`ObjectMut`], routed through the
//!   association manager so bidirectional links stay symmetric
//! - Synchronous change events to subscribers
//! - Save/parse through any [`Serializer`]
//!
//! Mutation requires `&mut Document`, so a document has a single writer;
//! shared `&Document` reads may run concurrently.

use crate::association::{AssociationManager, LocalChange, ObjectStore};
use crate::config::{DocumentConfig, ImportPolicy, ReadOptions, WriteOptions};
use crate::error::ModelError;
use crate::event::{
    ChangeEvent, ChangeSubscriber, LoggingSubscriber, MirroredChange, PropertyChangeKind,
    Subscribers, SubscriptionId,
};
use crate::object::ModelObject;
use crate::oid::{Oid, OidFactory};
use crate::schema::{Cardinality, ClassKind, DataType, MetaClass, MetaProperty, PropertyKey, Schema};
use crate::serializer::{
    writes_direction, ChangeTag, ObjectRecord, PropertyRecord, Serializer, SerializerContext,
};
use crate::typelib::{TypeLibrary, TypedObject};
use crate::value::{CimEnum, CompoundValue, EnumValue, FromValue, Value};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;

/// Outcome of a bulk import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Objects copied into the document
    pub imported: Vec<Oid>,
    /// Source objects whose OID already existed here
    pub collisions: Vec<Oid>,
}

/// How recorded association properties are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Add recorded links to whatever is present (parse, import)
    Merge,
    /// Make every recorded property hold exactly the recorded value (difference replay)
    Replace,
}

/// Container of model objects
#[derive(Debug)]
pub struct Document {
    schema: Arc<Schema>,
    types: Arc<TypeLibrary>,
    oids: Arc<dyn OidFactory>,
    config: DocumentConfig,
    objects: ObjectStore,
    retired: HashSet<Oid>,
    subscribers: Subscribers,
}

impl Clone for Document {
    /// Detached copy: same objects, no subscribers
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            types: Arc::clone(&self.types),
            oids: Arc::clone(&self.oids),
            config: self.config.clone(),
            objects: self.objects.clone(),
            retired: self.retired.clone(),
            subscribers: Subscribers::default(),
        }
    }
}

impl Document {
    /// Create an empty document over a schema, without typed handles
    #[must_use]
    pub fn new(schema: Arc<Schema>, oids: Arc<dyn OidFactory>) -> Self {
        Self::with_types(Arc::new(TypeLibrary::new(schema)), oids)
    }

    /// Create an empty document over a type library and its schema
    #[must_use]
    pub fn with_types(types: Arc<TypeLibrary>, oids: Arc<dyn OidFactory>) -> Self {
        Self {
            schema: Arc::clone(types.schema()),
            types,
            oids,
            config: DocumentConfig::default(),
            objects: ObjectStore::new(),
            retired: HashSet::new(),
            subscribers: Subscribers::default(),
        }
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: DocumentConfig) -> Self {
        self.config = config;
        self
    }

    /// Empty document sharing schema, type library, factory and configuration
    #[must_use]
    pub fn empty_like(&self) -> Self {
        Self::with_types(Arc::clone(&self.types), Arc::clone(&self.oids))
            .with_config(self.config.clone())
    }

    /// Active schema
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Type library
    #[inline]
    #[must_use]
    pub fn types(&self) -> &Arc<TypeLibrary> {
        &self.types
    }

    /// Identifier factory
    #[inline]
    #[must_use]
    pub fn oid_factory(&self) -> &Arc<dyn OidFactory> {
        &self.oids
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Register a change subscriber
    pub fn subscribe(&mut self, subscriber: Arc<dyn ChangeSubscriber>) -> SubscriptionId {
        self.subscribers.add(subscriber)
    }

    /// Remove a subscriber; false if the id was unknown
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    /// Number of subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Attach a [`LoggingSubscriber`]
    pub fn log_model_changes(&mut self) -> SubscriptionId {
        self.subscribe(Arc::new(LoggingSubscriber))
    }

    fn emit(&self, event: &ChangeEvent) {
        self.subscribers.dispatch(event);
    }

    fn property_event(&self, change: LocalChange) -> Option<ChangeEvent> {
        let obj = self.objects.get(&change.oid)?;
        let mirrored = change
            .mirrored
            .iter()
            .filter_map(|(oid, property)| {
                let holder = self.objects.get(oid)?;
                Some(MirroredChange {
                    oid: oid.clone(),
                    class: Arc::clone(holder.class().uri_arc()),
                    property: Arc::clone(property.uri_arc()),
                    value: holder.property_value(property),
                })
            })
            .collect();
        Some(ChangeEvent::PropertyChanged {
            value: obj.property_value(&change.property),
            class: Arc::clone(obj.class().uri_arc()),
            property: Arc::clone(change.property.uri_arc()),
            oid: change.oid,
            kind: change.kind,
            mirrored,
        })
    }

    fn emit_change(&self, change: LocalChange) {
        if let Some(event) = self.property_event(change) {
            self.emit(&event);
        }
    }

    // ------------------------------------------------------------------
    // Creation and lookup
    // ------------------------------------------------------------------

    fn insert_object(&mut self, oid: Oid, class: Arc<MetaClass>) -> Result<(), ModelError> {
        if self.objects.contains_key(&oid) || self.retired.contains(&oid) {
            return Err(ModelError::DuplicateIdentifier(oid));
        }
        tracing::debug!(%oid, class = class.uri(), "object created");
        let class_uri = Arc::clone(class.uri_arc());
        self.objects
            .insert(oid.clone(), ModelObject::new(oid.clone(), class));
        self.emit(&ChangeEvent::ObjectAdded {
            oid,
            class: class_uri,
        });
        Ok(())
    }

    /// Rejects identifiers whose IRI would not parse back to the same OID
    fn check_oid(&self, oid: &Oid) -> Result<(), ModelError> {
        let iri = oid.iri();
        match self.oids.from_iri(&iri) {
            Ok(parsed) if parsed == *oid => Ok(()),
            _ => Err(ModelError::InvalidOid(iri)),
        }
    }

    fn concrete_class(&self, class: &str) -> Result<Arc<MetaClass>, ModelError> {
        self.schema
            .class(class)
            .filter(|c| c.kind() == ClassKind::Concrete)
            .cloned()
            .ok_or_else(|| ModelError::UnknownClass(class.to_string()))
    }

    /// Create an object of a schema class
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownClass`] if the class is not a concrete
    /// schema class, [`ModelError::DuplicateIdentifier`] if the OID is in use
    /// or retired, [`ModelError::InvalidOid`] if the OID's IRI does not parse
    /// back to the same OID
    pub fn create_object(&mut self, oid: Oid, class: &str) -> Result<ObjectMut<'_>, ModelError> {
        self.check_oid(&oid)?;
        let class = self.concrete_class(class)?;
        self.insert_object(oid.clone(), class)?;
        Ok(ObjectMut { doc: self, oid })
    }

    /// Create an object with a fresh OID from the document's factory
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownClass`] if the class is not a concrete
    /// schema class
    pub fn create_object_auto(&mut self, class: &str) -> Result<ObjectMut<'_>, ModelError> {
        let oid = self.oids.create();
        self.create_object(oid, class)
    }

    /// Create an object of a registered typed handle's class
    ///
    /// # Errors
    /// Returns [`ModelError::UnregisteredType`] if `T` has no type library
    /// entry, [`ModelError::DuplicateIdentifier`] if the OID is in use,
    /// [`ModelError::InvalidOid`] if the OID's IRI does not parse back
    pub fn create_typed<T: TypedObject>(&mut self, oid: Oid) -> Result<T, ModelError> {
        self.check_oid(&oid)?;
        let class = Arc::clone(self.types.class_of::<T>()?);
        self.insert_object(oid.clone(), class)?;
        Ok(T::from_oid(oid))
    }

    /// Create a typed object with a fresh OID
    ///
    /// # Errors
    /// Returns [`ModelError::UnregisteredType`] if `T` has no type library entry
    pub fn create_typed_auto<T: TypedObject>(&mut self) -> Result<T, ModelError> {
        let oid = self.oids.create();
        self.create_typed(oid)
    }

    /// Object by OID
    #[inline]
    #[must_use]
    pub fn get_object(&self, oid: &Oid) -> Option<&ModelObject> {
        self.objects.get(oid)
    }

    /// Typed handle if the object's class is `T`'s class or derives from it
    #[must_use]
    pub fn get_object_typed<T: TypedObject>(&self, oid: &Oid) -> Option<T> {
        let class = self.types.class_of::<T>().ok()?;
        self.objects
            .get(oid)
            .filter(|obj| obj.class().is_subclass_of(class.uri()))
            .map(|obj| T::from_oid(obj.oid().clone()))
    }

    /// All objects in insertion order
    pub fn get_all_objects(&self) -> impl Iterator<Item = &ModelObject> {
        self.objects.values()
    }

    /// Typed handles for every object of `T`'s class or a subclass
    #[must_use]
    pub fn get_objects<T: TypedObject>(&self) -> Vec<T> {
        let Ok(class) = self.types.class_of::<T>() else {
            return Vec::new();
        };
        self.objects
            .values()
            .filter(|obj| obj.class().is_subclass_of(class.uri()))
            .map(|obj| T::from_oid(obj.oid().clone()))
            .collect()
    }

    /// Objects of a class, optionally including subclasses
    pub fn objects_of_class<'a>(
        &'a self,
        class: &'a str,
        include_subclasses: bool,
    ) -> impl Iterator<Item = &'a ModelObject> + 'a {
        self.objects.values().filter(move |obj| {
            if include_subclasses {
                obj.class().is_subclass_of(class)
            } else {
                obj.class_uri() == class
            }
        })
    }

    /// Number of objects
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if the document holds no objects
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Check if an object exists
    #[inline]
    #[must_use]
    pub fn contains(&self, oid: &Oid) -> bool {
        self.objects.contains_key(oid)
    }

    /// Mutating accessor handle for an object
    ///
    /// # Errors
    /// Returns [`ModelError::NotFound`] if the object does not exist
    pub fn object_mut(&mut self, oid: &Oid) -> Result<ObjectMut<'_>, ModelError> {
        if !self.objects.contains_key(oid) {
            return Err(ModelError::NotFound(oid.clone()));
        }
        Ok(ObjectMut {
            doc: self,
            oid: oid.clone(),
        })
    }

    /// Mutating accessor handle for a typed object
    ///
    /// # Errors
    /// Returns [`ModelError::NotFound`] if the object does not exist
    pub fn typed_mut<T: TypedObject>(&mut self, handle: &T) -> Result<ObjectMut<'_>, ModelError> {
        self.object_mut(handle.oid())
    }

    fn require(&self, oid: &Oid) -> Result<&ModelObject, ModelError> {
        self.objects
            .get(oid)
            .ok_or_else(|| ModelError::NotFound(oid.clone()))
    }

    /// Object referenced by a 1:1 association
    ///
    /// # Errors
    /// Returns [`ModelError::NotFound`] for a missing source and the
    /// accessor errors of [`ModelObject::get_assoc_1to1`]
    pub fn get_assoc_1to1_object(
        &self,
        oid: &Oid,
        key: impl PropertyKey,
    ) -> Result<Option<&ModelObject>, ModelError> {
        Ok(self
            .require(oid)?
            .get_assoc_1to1(key)?
            .and_then(|target| self.objects.get(target)))
    }

    /// Objects referenced by a 1:many association, in order
    ///
    /// # Errors
    /// Returns [`ModelError::NotFound`] for a missing source and the
    /// accessor errors of [`ModelObject::get_assoc_1tom`]
    pub fn get_assoc_1tom_objects(
        &self,
        oid: &Oid,
        key: impl PropertyKey,
    ) -> Result<Vec<&ModelObject>, ModelError> {
        Ok(self
            .require(oid)?
            .get_assoc_1tom(key)?
            .iter()
            .filter_map(|target| self.objects.get(target))
            .collect())
    }

    /// 1:1 target as a typed handle; absent on class mismatch
    ///
    /// # Errors
    /// Same as [`Document::get_assoc_1to1_object`]
    pub fn get_assoc_1to1_typed<T: TypedObject>(
        &self,
        oid: &Oid,
        key: impl PropertyKey,
    ) -> Result<Option<T>, ModelError> {
        Ok(self
            .require(oid)?
            .get_assoc_1to1(key)?
            .and_then(|target| self.get_object_typed::<T>(target)))
    }

    /// 1:many targets as typed handles; mismatching targets are skipped
    ///
    /// # Errors
    /// Same as [`Document::get_assoc_1tom_objects`]
    pub fn get_assoc_1tom_typed<T: TypedObject>(
        &self,
        oid: &Oid,
        key: impl PropertyKey,
    ) -> Result<Vec<T>, ModelError> {
        Ok(self
            .require(oid)?
            .get_assoc_1tom(key)?
            .iter()
            .filter_map(|target| self.get_object_typed::<T>(target))
            .collect())
    }

    // ------------------------------------------------------------------
    // Removal and import
    // ------------------------------------------------------------------

    /// Remove an object after clearing every association it takes part in
    ///
    /// Emits one property change per cleared association, then
    /// [`ChangeEvent::ObjectRemoved`].
    ///
    /// # Errors
    /// Returns [`ModelError::NotFound`] if the object does not exist
    pub fn remove_object(&mut self, oid: &Oid) -> Result<(), ModelError> {
        if !self.objects.contains_key(oid) {
            return Err(ModelError::NotFound(oid.clone()));
        }

        let changes = AssociationManager::new(&self.schema, &mut self.objects).detach(oid);
        let events: Vec<ChangeEvent> = changes
            .into_iter()
            .filter_map(|change| self.property_event(change))
            .collect();

        let Some(removed) = self.objects.shift_remove(oid) else {
            return Err(ModelError::NotFound(oid.clone()));
        };
        if self.config.retire_removed_oids {
            self.retired.insert(oid.clone());
        }
        tracing::debug!(%oid, class = removed.class_uri(), cleared = events.len(), "object removed");

        for event in &events {
            self.emit(event);
        }
        self.emit(&ChangeEvent::ObjectRemoved {
            oid: oid.clone(),
            class: Arc::clone(removed.class().uri_arc()),
        });
        Ok(())
    }

    /// Copy every object of another document, preserving OIDs
    ///
    /// Collisions are reported in full. Under [`ImportPolicy::Abort`] nothing
    /// is imported when any OID collides; under [`ImportPolicy::Skip`] the
    /// colliding source objects are left out.
    ///
    /// # Errors
    /// Returns [`ModelError::ImportCollisions`] under the abort policy, or a
    /// schema error if a source object does not fit this document's schema
    pub fn import_model_objects(&mut self, other: &Document) -> Result<ImportReport, ModelError> {
        let collisions: Vec<Oid> = other
            .objects
            .keys()
            .filter(|oid| self.objects.contains_key(*oid) || self.retired.contains(*oid))
            .cloned()
            .collect();

        if !collisions.is_empty() && self.config.import_policy == ImportPolicy::Abort {
            tracing::warn!(collisions = collisions.len(), "import aborted");
            return Err(ModelError::ImportCollisions(collisions));
        }
        for oid in &collisions {
            tracing::warn!(%oid, "import collision skipped");
        }

        let skip: HashSet<&Oid> = collisions.iter().collect();
        let records: Vec<ObjectRecord> = other
            .to_records(&WriteOptions::default())
            .into_iter()
            .filter(|record| !skip.contains(&record.oid))
            .collect();

        self.apply_records(&records, ApplyMode::Merge)?;

        let imported: Vec<Oid> = records.into_iter().map(|record| record.oid).collect();
        tracing::info!(
            imported = imported.len(),
            collisions = collisions.len(),
            "model objects imported"
        );
        Ok(ImportReport {
            imported,
            collisions,
        })
    }

    /// Same objects by OID, class, attributes and association targets as sets
    #[must_use]
    pub fn is_equivalent(&self, other: &Document) -> bool {
        self.objects.len() == other.objects.len()
            && self.objects.iter().all(|(oid, obj)| {
                other
                    .objects
                    .get(oid)
                    .is_some_and(|theirs| obj.is_equivalent(theirs))
            })
    }

    // ------------------------------------------------------------------
    // Accessor internals
    // ------------------------------------------------------------------

    fn write_attribute(
        &mut self,
        oid: &Oid,
        key: impl PropertyKey,
        value: Option<Value>,
    ) -> Result<bool, ModelError> {
        let obj = self.require(oid)?;
        let property = Arc::clone(obj.meta_property(key)?);
        let Some(datatype) = property.datatype() else {
            return Err(ModelError::type_mismatch(property.uri(), "attribute", "association"));
        };
        if let Some(value) = &value {
            check_value(&self.schema, &property, datatype, value)?;
        }
        if obj.attribute(&property)? == value.as_ref() {
            return Ok(false);
        }

        if let Some(obj) = self.objects.get_mut(oid) {
            obj.set_attribute_value(property.uri_arc(), value);
        }
        tracing::debug!(%oid, property = property.uri(), "attribute set");
        self.emit_change(LocalChange {
            oid: oid.clone(),
            property,
            kind: PropertyChangeKind::AttributeSet,
            mirrored: Vec::new(),
        });
        Ok(true)
    }

    fn initialize_compound(&mut self, oid: &Oid, key: impl PropertyKey) -> Result<(), ModelError> {
        let property = Arc::clone(self.require(oid)?.meta_property(key)?);
        match property.datatype() {
            Some(DataType::Compound(class)) => {
                let empty = Value::Compound(CompoundValue::new(class.as_str()));
                self.write_attribute(oid, &property, Some(empty))?;
                Ok(())
            }
            Some(other) => Err(ModelError::type_mismatch(
                property.uri(),
                "Compound",
                other.to_string(),
            )),
            None => Err(ModelError::type_mismatch(property.uri(), "attribute", "association")),
        }
    }

    fn write_compound_field(
        &mut self,
        oid: &Oid,
        key: impl PropertyKey,
        field: &str,
        value: Value,
    ) -> Result<(), ModelError> {
        let obj = self.require(oid)?;
        let property = Arc::clone(obj.meta_property(key)?);
        let record = match obj.attribute(&property)? {
            Some(Value::Compound(record)) => record,
            Some(other) => {
                return Err(ModelError::type_mismatch(
                    property.uri(),
                    "Compound",
                    other.kind_name(),
                ))
            }
            None => {
                return Err(ModelError::InvalidState {
                    expected: "initialized compound attribute",
                    actual: "unset",
                })
            }
        };

        let field_meta = self
            .schema
            .class(record.class())
            .and_then(|class| class.property(field))
            .ok_or_else(|| ModelError::unknown_property(record.class(), field))?;
        let Some(datatype) = field_meta.datatype() else {
            return Err(ModelError::type_mismatch(field_meta.uri(), "attribute", "association"));
        };
        check_value(&self.schema, field_meta, datatype, &value)?;

        let mut updated = record.clone();
        updated.insert(Arc::clone(field_meta.uri_arc()), value);
        self.write_attribute(oid, &property, Some(Value::Compound(updated)))?;
        Ok(())
    }

    fn associate<F>(&mut self, op: F) -> Result<bool, ModelError>
    where
        F: FnOnce(&mut AssociationManager<'_>) -> Result<Option<LocalChange>, ModelError>,
    {
        let change = op(&mut AssociationManager::new(&self.schema, &mut self.objects))?;
        Ok(match change {
            Some(change) => {
                self.emit_change(change);
                true
            }
            None => false,
        })
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Codec context for this document
    #[must_use]
    pub fn context<'a>(
        &'a self,
        write: &'a WriteOptions,
        read: &'a ReadOptions,
    ) -> SerializerContext<'a> {
        SerializerContext {
            schema: &self.schema,
            oid_factory: &*self.oids,
            write,
            read,
        }
    }

    /// Export every object as records
    #[must_use]
    pub fn to_records(&self, options: &WriteOptions) -> Vec<ObjectRecord> {
        let mut objects: Vec<&ModelObject> = self.objects.values().collect();
        if options.sort_by_oid {
            objects.sort_by_cached_key(|obj| obj.oid().iri());
        }
        objects
            .into_iter()
            .map(|obj| self.record_of(obj, options))
            .collect()
    }

    fn record_of(&self, obj: &ModelObject, options: &WriteOptions) -> ObjectRecord {
        let mut record = ObjectRecord::new(obj.oid().clone(), obj.class_uri());
        for property in obj.class().properties() {
            if property.is_association() && !options.include_inverse_links {
                let inverse = self.schema.inverse_of(property).map(|p| &**p);
                if !writes_direction(property, inverse) {
                    continue;
                }
            }
            let content = PropertyRecord::from(obj.property_value(property));
            if !content.is_cleared() {
                record.properties.insert(property.uri().to_string(), content);
            }
        }
        record
    }

    /// Write the document with default options
    ///
    /// # Errors
    /// Returns error on I/O failure or unencodable values
    pub fn save(&self, out: &mut dyn Write, serializer: &dyn Serializer) -> Result<(), ModelError> {
        self.save_with(out, serializer, &WriteOptions::default())
    }

    /// Write the document
    ///
    /// # Errors
    /// Returns error on I/O failure or unencodable values
    pub fn save_with(
        &self,
        out: &mut dyn Write,
        serializer: &dyn Serializer,
        options: &WriteOptions,
    ) -> Result<(), ModelError> {
        let records = self.to_records(options);
        let read = ReadOptions::default();
        serializer.write(&records, &self.context(options, &read), out)?;
        tracing::info!(format = serializer.name(), objects = records.len(), "document saved");
        Ok(())
    }

    /// Read objects into the document with default options
    ///
    /// Returns the number of object records read.
    ///
    /// # Errors
    /// Returns format errors from the codec or schema errors for records that
    /// do not fit the schema; no object is created in that case
    pub fn parse(&mut self, text: &str, serializer: &dyn Serializer) -> Result<usize, ModelError> {
        self.parse_with(text, serializer, &ReadOptions::default())
    }

    /// Read objects into the document
    ///
    /// # Errors
    /// Same as [`Document::parse`]
    pub fn parse_with(
        &mut self,
        text: &str,
        serializer: &dyn Serializer,
        options: &ReadOptions,
    ) -> Result<usize, ModelError> {
        let write = WriteOptions::default();
        let records = serializer.read(text, &self.context(&write, options))?;
        self.apply_records(&records, ApplyMode::Merge)?;
        tracing::info!(format = serializer.name(), objects = records.len(), "document parsed");
        Ok(records.len())
    }

    /// Replay a saved difference
    ///
    /// Creates added objects, replaces every recorded property, then removes
    /// removed objects. Returns the number of entries applied.
    ///
    /// # Errors
    /// Returns format errors from the codec, [`ModelError::DuplicateIdentifier`]
    /// for added objects already present, [`ModelError::NotFound`] for
    /// modified objects that are missing
    pub fn apply_difference(
        &mut self,
        text: &str,
        serializer: &dyn Serializer,
    ) -> Result<usize, ModelError> {
        let write = WriteOptions::default();
        let read = ReadOptions::default();
        let records = serializer.read(text, &self.context(&write, &read))?;
        self.apply_records(&records, ApplyMode::Replace)?;
        tracing::info!(format = serializer.name(), entries = records.len(), "difference applied");
        Ok(records.len())
    }

    /// Apply exchange records
    ///
    /// Records are validated against the schema and the current graph before
    /// anything changes. Application then runs in phases: create objects,
    /// write attributes, apply 1:many links, apply 1:1 links, remove objects
    /// tagged removed. Links to objects that exist neither here nor in the
    /// batch are dropped with a warning.
    ///
    /// # Errors
    /// Returns the first validation error found
    pub fn apply_records(
        &mut self,
        records: &[ObjectRecord],
        mode: ApplyMode,
    ) -> Result<(), ModelError> {
        self.validate_records(records)?;
        let live = || {
            records
                .iter()
                .filter(|r| r.change != Some(ChangeTag::Removed))
        };

        for record in live() {
            if !self.objects.contains_key(&record.oid) {
                let class = self.concrete_class(&record.class)?;
                self.insert_object(record.oid.clone(), class)?;
            }
        }

        for record in live() {
            for (uri, content) in &record.properties {
                if let PropertyRecord::Attribute(value) = content {
                    self.write_attribute(&record.oid, uri.as_str(), value.clone())?;
                }
            }
        }

        for cardinality in [Cardinality::OneToMany, Cardinality::OneToOne] {
            for record in live() {
                for (uri, content) in &record.properties {
                    let PropertyRecord::References(targets) = content else {
                        continue;
                    };
                    if self.cardinality_of(record, uri) != Some(cardinality) {
                        continue;
                    }
                    self.apply_references(&record.oid, uri, targets, cardinality, mode)?;
                }
            }
        }

        for record in records
            .iter()
            .filter(|r| r.change == Some(ChangeTag::Removed))
        {
            if self.objects.contains_key(&record.oid) {
                self.remove_object(&record.oid)?;
            } else {
                tracing::warn!(oid = %record.oid, "removed object not present");
            }
        }
        Ok(())
    }

    fn cardinality_of(&self, record: &ObjectRecord, uri: &str) -> Option<Cardinality> {
        self.objects
            .get(&record.oid)
            .and_then(|obj| obj.class().property(uri))
            .and_then(|p| p.cardinality())
    }

    fn apply_references(
        &mut self,
        source: &Oid,
        uri: &str,
        recorded: &[Oid],
        cardinality: Cardinality,
        mode: ApplyMode,
    ) -> Result<(), ModelError> {
        let targets: Vec<Oid> = recorded
            .iter()
            .filter(|target| {
                let present = self.objects.contains_key(*target);
                if !present {
                    tracing::warn!(%source, property = uri, %target, "dropping dangling reference");
                }
                present
            })
            .cloned()
            .collect();
        if targets.is_empty() && !recorded.is_empty() {
            return Ok(());
        }

        match (cardinality, mode) {
            (Cardinality::OneToMany, ApplyMode::Merge) => {
                for target in &targets {
                    self.associate(|m| m.add_many(source, uri, target))?;
                }
            }
            (Cardinality::OneToMany, ApplyMode::Replace) => {
                self.replace_many(source, uri, &targets)?;
            }
            (Cardinality::OneToOne, _) => match targets.first() {
                Some(target) => {
                    self.associate(|m| m.set_one(source, uri, Some(target)))?;
                }
                None if mode == ApplyMode::Replace => {
                    self.associate(|m| m.set_one(source, uri, None))?;
                }
                None => {}
            },
        }
        Ok(())
    }

    /// Make a 1:many property hold exactly `targets`, with minimal churn
    fn replace_many(&mut self, source: &Oid, uri: &str, targets: &[Oid]) -> Result<(), ModelError> {
        let current = self.require(source)?.get_assoc_1tom(uri)?;
        if current == targets {
            return Ok(());
        }

        let retained: Vec<&Oid> = current.iter().filter(|c| targets.contains(c)).collect();
        let keeps_order = targets
            .iter()
            .take(retained.len())
            .eq(retained.iter().copied());

        if keeps_order {
            for stale in current.iter().filter(|c| !targets.contains(c)) {
                self.associate(|m| m.remove_many(source, uri, stale))?;
            }
            for target in targets.iter().skip(retained.len()) {
                self.associate(|m| m.add_many(source, uri, target))?;
            }
        } else {
            self.associate(|m| m.clear_many(source, uri))?;
            for target in targets {
                self.associate(|m| m.add_many(source, uri, target))?;
            }
        }
        Ok(())
    }

    fn validate_records(&self, records: &[ObjectRecord]) -> Result<(), ModelError> {
        let batch: HashMap<&Oid, &str> = records
            .iter()
            .filter(|r| r.change != Some(ChangeTag::Removed))
            .map(|r| (&r.oid, r.class.as_str()))
            .collect();

        for record in records {
            let existing = self.objects.get(&record.oid);
            match (record.change, existing) {
                (Some(ChangeTag::Removed), _) => continue,
                (Some(ChangeTag::Added), Some(_)) => {
                    return Err(ModelError::DuplicateIdentifier(record.oid.clone()))
                }
                (Some(ChangeTag::Modified), None) => {
                    return Err(ModelError::NotFound(record.oid.clone()))
                }
                (_, None) if self.retired.contains(&record.oid) => {
                    return Err(ModelError::DuplicateIdentifier(record.oid.clone()))
                }
                (_, Some(obj)) if obj.class_uri() != record.class => {
                    return Err(ModelError::type_mismatch(
                        record.oid.to_string(),
                        obj.class_uri(),
                        record.class.as_str(),
                    ))
                }
                _ => {}
            }

            let class = self.concrete_class(&record.class)?;
            for (uri, content) in &record.properties {
                let property = class
                    .property(uri)
                    .ok_or_else(|| ModelError::unknown_property(class.uri(), uri.as_str()))?;
                match (content, property.datatype()) {
                    (PropertyRecord::Attribute(value), Some(datatype)) => {
                        if let Some(value) = value {
                            check_value(&self.schema, property, datatype, value)?;
                        }
                    }
                    (PropertyRecord::References(targets), None) => {
                        self.check_references(record, property, targets, &batch)?;
                    }
                    (PropertyRecord::Attribute(_), None) => {
                        return Err(ModelError::type_mismatch(
                            property.uri(),
                            "association",
                            "attribute",
                        ))
                    }
                    (PropertyRecord::References(_), Some(_)) => {
                        return Err(ModelError::type_mismatch(
                            property.uri(),
                            "attribute",
                            "association",
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    fn check_references(
        &self,
        record: &ObjectRecord,
        property: &MetaProperty,
        targets: &[Oid],
        batch: &HashMap<&Oid, &str>,
    ) -> Result<(), ModelError> {
        let Some(spec) = property.association() else {
            return Ok(());
        };
        if spec.cardinality == Cardinality::OneToOne && targets.len() > 1 {
            return Err(ModelError::format(format!(
                "{} targets for 1:1 property {} on {}",
                targets.len(),
                property.uri(),
                record.oid
            )));
        }
        for target in targets {
            let class = batch
                .get(target)
                .copied()
                .or_else(|| self.objects.get(target).map(ModelObject::class_uri));
            let Some(class) = class else {
                continue;
            };
            if !self.schema.is_subclass_of(class, &spec.range) {
                return Err(ModelError::type_mismatch(property.uri(), &*spec.range, class));
            }
            if *target == record.oid && !spec.reflexive {
                return Err(ModelError::ReflexiveLink {
                    property: property.uri().to_string(),
                    oid: target.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Check a value against a declared datatype, including enum individuals
/// and compound fields
fn check_value(
    schema: &Schema,
    property: &MetaProperty,
    datatype: &DataType,
    value: &Value,
) -> Result<(), ModelError> {
    let mismatch = |found: &str| ModelError::type_mismatch(property.uri(), datatype.to_string(), found);
    if !value.datatype_matches(datatype) {
        return Err(mismatch(value.kind_name()));
    }
    match (datatype, value) {
        (DataType::Enum(class), Value::Enum(literal)) => {
            let individual = schema
                .individual(literal.uri())
                .ok_or_else(|| ModelError::UnknownIndividual(literal.uri().to_string()))?;
            if individual.class() != class {
                return Err(mismatch(individual.class()));
            }
        }
        (DataType::Compound(class), Value::Compound(record)) => {
            let Some(meta) = schema
                .class(record.class())
                .filter(|c| c.is_subclass_of(class))
            else {
                return Err(mismatch(record.class()));
            };
            for (field, field_value) in record.fields() {
                let field_meta = meta
                    .property(field)
                    .ok_or_else(|| ModelError::unknown_property(record.class(), field))?;
                let Some(field_type) = field_meta.datatype() else {
                    return Err(ModelError::type_mismatch(field, "attribute", "association"));
                };
                check_value(schema, field_meta, field_type, field_value)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Mutating accessor protocol for one object
///
/// Obtained from [`Document::object_mut`] or [`Document::create_object`].
/// Every setter returns `&mut Self` so calls chain with `?`.
#[derive(Debug)]
pub struct ObjectMut<'d> {
    doc: &'d mut Document,
    oid: Oid,
}

impl ObjectMut<'_> {
    /// Object identifier
    #[inline]
    #[must_use]
    pub fn oid(&self) -> &Oid {
        &self.oid
    }

    /// Current object state
    ///
    /// # Errors
    /// Returns [`ModelError::NotFound`] if the object no longer exists
    pub fn object(&self) -> Result<&ModelObject, ModelError> {
        self.doc.require(&self.oid)
    }

    /// Typed attribute read
    ///
    /// # Errors
    /// Same as [`ModelObject::get_attribute`]
    pub fn get_attribute<V: FromValue>(&self, key: impl PropertyKey) -> Result<Option<V>, ModelError> {
        self.object()?.get_attribute(key)
    }

    /// Write an attribute
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownProperty`] for undeclared properties and
    /// [`ModelError::TypeMismatch`] if the value does not fit the datatype
    pub fn set_attribute(
        &mut self,
        key: impl PropertyKey,
        value: impl Into<Value>,
    ) -> Result<&mut Self, ModelError> {
        self.doc.write_attribute(&self.oid, key, Some(value.into()))?;
        Ok(self)
    }

    /// Unset an attribute
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownProperty`] for undeclared properties
    pub fn clear_attribute(&mut self, key: impl PropertyKey) -> Result<&mut Self, ModelError> {
        self.doc.write_attribute(&self.oid, key, None)?;
        Ok(self)
    }

    /// Write an enum attribute from a host literal
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownIndividual`] if the literal has no schema
    /// individual, [`ModelError::TypeMismatch`] if it belongs to another
    /// enumeration
    pub fn set_enum<E: CimEnum>(
        &mut self,
        key: impl PropertyKey,
        literal: E,
    ) -> Result<&mut Self, ModelError> {
        let value = Value::Enum(EnumValue::from(literal));
        self.doc.write_attribute(&self.oid, key, Some(value))?;
        Ok(self)
    }

    /// Write an enum attribute from a schema individual URI
    ///
    /// # Errors
    /// Same as [`ObjectMut::set_enum`]
    pub fn set_attribute_as_enum(
        &mut self,
        key: impl PropertyKey,
        individual: &str,
    ) -> Result<&mut Self, ModelError> {
        let value = self.doc.types.create_enum_value_instance(individual)?;
        self.doc
            .write_attribute(&self.oid, key, Some(Value::Enum(value)))?;
        Ok(self)
    }

    /// Materialize an empty record for a compound attribute
    ///
    /// # Errors
    /// Returns [`ModelError::TypeMismatch`] if the attribute is not compound
    pub fn initialize_compound_attribute(
        &mut self,
        key: impl PropertyKey,
    ) -> Result<&mut Self, ModelError> {
        self.doc.initialize_compound(&self.oid, key)?;
        Ok(self)
    }

    /// Write one field of an initialized compound attribute
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidState`] if the compound was never
    /// initialized, [`ModelError::UnknownProperty`] for unknown fields
    pub fn set_compound_field(
        &mut self,
        key: impl PropertyKey,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, ModelError> {
        self.doc
            .write_compound_field(&self.oid, key, field, value.into())?;
        Ok(self)
    }

    /// Point a 1:1 association at `target`
    ///
    /// # Errors
    /// Returns [`ModelError::WrongCardinality`] on 1:many properties,
    /// [`ModelError::NotFound`] for missing targets, [`ModelError::TypeMismatch`]
    /// for targets outside the range
    pub fn set_assoc_1to1(
        &mut self,
        key: impl PropertyKey,
        target: &Oid,
    ) -> Result<&mut Self, ModelError> {
        let source = &self.oid;
        self.doc
            .associate(|m| m.set_one(source, key, Some(target)))?;
        Ok(self)
    }

    /// Clear a 1:1 association
    ///
    /// # Errors
    /// Returns [`ModelError::WrongCardinality`] on 1:many properties
    pub fn clear_assoc_1to1(&mut self, key: impl PropertyKey) -> Result<&mut Self, ModelError> {
        let source = &self.oid;
        self.doc.associate(|m| m.set_one(source, key, None))?;
        Ok(self)
    }

    /// Append to a 1:many association; present targets are left in place
    ///
    /// # Errors
    /// Same as [`ObjectMut::set_assoc_1to1`], with cardinalities swapped
    pub fn add_assoc_1tom(
        &mut self,
        key: impl PropertyKey,
        target: &Oid,
    ) -> Result<&mut Self, ModelError> {
        let source = &self.oid;
        self.doc.associate(|m| m.add_many(source, key, target))?;
        Ok(self)
    }

    /// Remove one target from a 1:many association
    ///
    /// # Errors
    /// Returns [`ModelError::WrongCardinality`] on 1:1 properties
    pub fn remove_assoc_1tom(
        &mut self,
        key: impl PropertyKey,
        target: &Oid,
    ) -> Result<&mut Self, ModelError> {
        let source = &self.oid;
        self.doc
            .associate(|m| m.remove_many(source, key, target))?;
        Ok(self)
    }

    /// Remove every target from a 1:many association
    ///
    /// # Errors
    /// Returns [`ModelError::WrongCardinality`] on 1:1 properties
    pub fn remove_all_assocs_1tom(&mut self, key: impl PropertyKey) -> Result<&mut Self, ModelError> {
        let source = &self.oid;
        self.doc.associate(|m| m.clear_many(source, key))?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::TextOidFactory;
    use crate::schema::{ClassDef, SchemaBuilder};
    use parking_lot::Mutex;

    const NS: &str = "http://example.org/cim#";

    fn uri(local: &str) -> String {
        format!("{NS}{local}")
    }

    fn schema() -> Arc<Schema> {
        Arc::new(
            SchemaBuilder::new()
                .class(ClassDef::new(uri("Named")))
                .class(ClassDef::new(uri("Site")).parent(uri("Named")))
                .class(ClassDef::new(uri("Bay")).parent(uri("Named")))
                .class(ClassDef::compound(uri("Period")))
                .class(ClassDef::enumeration(uri("Phase")))
                .attribute(uri("Named"), uri("Named.name"), DataType::String)
                .attribute(uri("Bay"), uri("Bay.rating"), DataType::Float)
                .attribute(uri("Bay"), uri("Bay.phase"), DataType::Enum(uri("Phase")))
                .attribute(uri("Bay"), uri("Bay.period"), DataType::Compound(uri("Period")))
                .attribute(uri("Period"), uri("Period.start"), DataType::String)
                .individual(uri("Phase.A"), uri("Phase"))
                .association(
                    uri("Site"),
                    uri("Site.Bays"),
                    uri("Bay"),
                    Cardinality::OneToMany,
                    Some(uri("Bay.Site")),
                )
                .association(
                    uri("Bay"),
                    uri("Bay.Site"),
                    uri("Site"),
                    Cardinality::OneToOne,
                    Some(uri("Site.Bays")),
                )
                .build()
                .unwrap(),
        )
    }

    fn document() -> Document {
        Document::new(schema(), Arc::new(TextOidFactory::new("urn:t:")))
    }

    fn oid(id: &str) -> Oid {
        Oid::text("urn:t:", id)
    }

    fn recorder(doc: &mut Document) -> Arc<Mutex<Vec<ChangeEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        doc.subscribe(Arc::new(move |e: &ChangeEvent| sink.lock().push(e.clone())));
        events
    }

    #[test]
    fn create_rejects_duplicates_and_unknown_classes() {
        let mut doc = document();
        doc.create_object(oid("s"), &uri("Site")).unwrap();

        assert!(matches!(
            doc.create_object(oid("s"), &uri("Bay")),
            Err(ModelError::DuplicateIdentifier(_))
        ));
        assert!(matches!(
            doc.create_object(oid("x"), &uri("Nope")),
            Err(ModelError::UnknownClass(_))
        ));
        assert!(matches!(
            doc.create_object(oid("x"), &uri("Period")),
            Err(ModelError::UnknownClass(_))
        ));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn create_rejects_identifiers_that_do_not_parse_back() {
        let mut doc = document();
        for bad in [oid("s 1"), oid(""), oid("#s")] {
            assert!(matches!(
                doc.create_object(bad, &uri("Site")),
                Err(ModelError::InvalidOid(_))
            ));
        }
        assert!(doc.is_empty());

        let foreign = Oid::text("http://other.org/m#", "s1");
        doc.create_object(foreign.clone(), &uri("Site")).unwrap();
        assert!(doc.contains(&foreign));
    }

    #[test]
    fn attribute_type_checks() {
        let mut doc = document();
        let mut bay = doc.create_object(oid("b"), &uri("Bay")).unwrap();
        bay.set_attribute("name", "B1").unwrap().set_attribute("rating", 3.5).unwrap();

        assert!(matches!(
            bay.set_attribute("rating", "high"),
            Err(ModelError::TypeMismatch { .. })
        ));
        assert!(matches!(
            bay.set_attribute("colour", "red"),
            Err(ModelError::UnknownProperty { .. })
        ));
        assert!(matches!(
            bay.set_attribute_as_enum("phase", &uri("Phase.Z")),
            Err(ModelError::UnknownIndividual(_))
        ));
        bay.set_attribute_as_enum("phase", &uri("Phase.A")).unwrap();
        assert_eq!(bay.get_attribute::<f64>("rating").unwrap(), Some(3.5));
    }

    #[test]
    fn compound_requires_initialization() {
        let mut doc = document();
        let mut bay = doc.create_object(oid("b"), &uri("Bay")).unwrap();
        assert!(matches!(
            bay.set_compound_field("period", "start", "2020"),
            Err(ModelError::InvalidState { .. })
        ));
        bay.initialize_compound_attribute("period")
            .unwrap()
            .set_compound_field("period", "start", "2020")
            .unwrap();

        let obj = doc.get_object(&oid("b")).unwrap();
        assert_eq!(
            obj.get_compound_field::<String>("period", "start").unwrap(),
            Some("2020".to_string())
        );
    }

    #[test]
    fn one_event_per_mutation() {
        let mut doc = document();
        doc.create_object(oid("s"), &uri("Site")).unwrap();
        doc.create_object(oid("b"), &uri("Bay")).unwrap();
        let events = recorder(&mut doc);

        doc.object_mut(&oid("s"))
            .unwrap()
            .add_assoc_1tom("Bays", &oid("b"))
            .unwrap()
            .add_assoc_1tom("Bays", &oid("b"))
            .unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        let ChangeEvent::PropertyChanged { kind, mirrored, .. } = &events[0] else {
            panic!("expected property change");
        };
        assert_eq!(*kind, PropertyChangeKind::AssociationAdded(oid("b")));
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].oid, oid("b"));
    }

    #[test]
    fn remove_clears_links_and_retires_oid() {
        let mut doc = document();
        doc.create_object(oid("s"), &uri("Site")).unwrap();
        doc.create_object(oid("b"), &uri("Bay"))
            .unwrap()
            .set_assoc_1to1("Site", &oid("s"))
            .unwrap();
        let events = recorder(&mut doc);

        doc.remove_object(&oid("b")).unwrap();

        assert!(doc
            .get_object(&oid("s"))
            .unwrap()
            .get_assoc_1tom("Bays")
            .unwrap()
            .is_empty());
        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ChangeEvent::ObjectRemoved { .. }));
        drop(events);

        assert!(matches!(
            doc.create_object(oid("b"), &uri("Bay")),
            Err(ModelError::DuplicateIdentifier(_))
        ));
        assert!(matches!(doc.remove_object(&oid("b")), Err(ModelError::NotFound(_))));
    }

    #[test]
    fn reuse_allowed_when_not_retiring() {
        let mut doc = document().with_config(DocumentConfig::new().with_retire_removed_oids(false));
        doc.create_object(oid("b"), &uri("Bay")).unwrap();
        doc.remove_object(&oid("b")).unwrap();
        assert!(doc.create_object(oid("b"), &uri("Bay")).is_ok());
    }

    #[test]
    fn objects_of_class_with_subclasses() {
        let mut doc = document();
        doc.create_object(oid("s"), &uri("Site")).unwrap();
        doc.create_object(oid("b"), &uri("Bay")).unwrap();
        assert_eq!(doc.objects_of_class(&uri("Named"), true).count(), 2);
        assert_eq!(doc.objects_of_class(&uri("Named"), false).count(), 0);
        assert_eq!(doc.objects_of_class(&uri("Bay"), false).count(), 1);
    }

    #[test]
    fn clone_is_detached() {
        let mut doc = document();
        let _events = recorder(&mut doc);
        doc.create_object(oid("s"), &uri("Site")).unwrap();

        let copy = doc.clone();
        assert_eq!(copy.subscriber_count(), 0);
        assert!(copy.is_equivalent(&doc));
    }

    #[test]
    fn import_policies() {
        let mut source = document();
        source.create_object(oid("a"), &uri("Site")).unwrap();
        source.create_object(oid("b"), &uri("Bay"))
            .unwrap()
            .set_assoc_1to1("Site", &oid("a"))
            .unwrap();

        let mut target = document();
        target.create_object(oid("a"), &uri("Site")).unwrap();

        let mut strict = target
            .clone()
            .with_config(DocumentConfig::new().with_import_policy(ImportPolicy::Abort));
        assert!(matches!(
            strict.import_model_objects(&source),
            Err(ModelError::ImportCollisions(c)) if c == vec![oid("a")]
        ));
        assert_eq!(strict.len(), 1);

        let report = target.import_model_objects(&source).unwrap();
        assert_eq!(report.collisions, vec![oid("a")]);
        assert_eq!(report.imported, vec![oid("b")]);
        assert_eq!(
            target.get_object(&oid("a")).unwrap().get_assoc_1tom("Bays").unwrap(),
            vec![oid("b")]
        );
    }

    #[test]
    fn records_validate_before_mutation() {
        let mut doc = document();
        let mut bad = ObjectRecord::new(oid("b"), uri("Bay"));
        bad.set_attribute(uri("Bay.rating"), Some(Value::from("x")));
        let good = ObjectRecord::new(oid("s"), uri("Site"));

        assert!(doc.apply_records(&[good, bad], ApplyMode::Merge).is_err());
        assert!(doc.is_empty());
    }
}
