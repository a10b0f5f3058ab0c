//! Difference model
//!
//! Accumulates the delta of a source document from the moment it subscribes:
//! - `ObjectAdded` opens an entry tagged added
//! - `ObjectRemoved` turns the entry into a tombstone, or drops it if the
//!   object was added inside the window
//! - `PropertyChanged` records the final value of the changed slot and of
//!   every mirrored slot, last write wins
//!
//! Replaying the saved delta on a copy of the baseline reproduces the
//! source's state for every touched object.
//!
//! The delta is held as per-object entries rather than as a second
//! [`Document`]: removed objects need tombstones and modified objects carry
//! only their touched slots, neither of which a document can represent.
//! [`DifferenceModel::to_records`] exposes the entries in exchange form.
//!
//! The source only holds a weak handle to the recorder, so dropping a
//! model without unsubscribing stops recording.

use crate::document::{ApplyMode, Document};
use crate::error::ModelError;
use crate::event::{ChangeEvent, ChangeSubscriber, PropertyValue, SubscriptionId};
use crate::oid::{Oid, OidFactory};
use crate::config::{ReadOptions, WriteOptions};
use crate::schema::{Cardinality, MetaProperty, Schema};
use crate::serializer::{ChangeTag, ObjectRecord, PropertyRecord, Serializer, SerializerContext};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::{Arc, Weak};

/// Lifecycle of a difference model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferenceState {
    /// Not attached to a source, either never subscribed or detached
    /// with its entries kept
    Unsubscribed,
    /// Accumulating changes
    Subscribed,
    /// Delta written at least once
    Saved,
    /// Delta thrown away; no longer records
    Discarded,
}

impl DifferenceState {
    /// Lowercase label for errors and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribed => "subscribed",
            Self::Saved => "saved",
            Self::Discarded => "discarded",
        }
    }
}

/// Accumulated change for one object
#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceEntry {
    /// Class URI
    pub class: Arc<str>,
    /// Operation that produced the entry
    pub change: ChangeTag,
    /// Final value per touched property URI
    pub properties: IndexMap<Arc<str>, PropertyValue>,
}

impl DifferenceEntry {
    fn new(class: Arc<str>, change: ChangeTag) -> Self {
        Self {
            class,
            change,
            properties: IndexMap::new(),
        }
    }

    fn record(&self, oid: &Oid) -> ObjectRecord {
        let mut record = ObjectRecord::new(oid.clone(), &*self.class).with_change(self.change);
        if self.change != ChangeTag::Removed {
            for (property, value) in &self.properties {
                record
                    .properties
                    .insert(property.to_string(), PropertyRecord::from(value.clone()));
            }
        }
        record
    }
}

/// Empty value of a property's slot
fn cleared(property: &MetaProperty) -> PropertyValue {
    match property.cardinality() {
        None => PropertyValue::Attribute(None),
        Some(Cardinality::OneToOne) => PropertyValue::One(None),
        Some(Cardinality::OneToMany) => PropertyValue::Many(Vec::new()),
    }
}

#[derive(Debug, Default)]
struct Recorder {
    recording: bool,
    schema: Option<Arc<Schema>>,
    entries: IndexMap<Oid, DifferenceEntry>,
}

impl Recorder {
    fn slot(&mut self, oid: &Oid, class: &Arc<str>, property: &Arc<str>, value: &PropertyValue) {
        let entry = self
            .entries
            .entry(oid.clone())
            .or_insert_with(|| DifferenceEntry::new(Arc::clone(class), ChangeTag::Modified));
        if entry.change != ChangeTag::Removed {
            entry.properties.insert(Arc::clone(property), value.clone());
        }
    }

    fn apply(&mut self, event: &ChangeEvent) {
        if !self.recording {
            return;
        }
        match event {
            ChangeEvent::ObjectAdded { oid, class } => match self.entries.get_mut(oid) {
                // OID reused after removal: the baseline still holds the old
                // object, so every slot starts cleared
                Some(entry) if entry.change == ChangeTag::Removed => {
                    entry.change = ChangeTag::Modified;
                    entry.class = Arc::clone(class);
                    let declared = self.schema.as_ref().and_then(|schema| schema.class(class));
                    for property in declared.into_iter().flat_map(|c| c.properties()) {
                        entry
                            .properties
                            .insert(Arc::clone(property.uri_arc()), cleared(property));
                    }
                }
                Some(_) => {}
                None => {
                    self.entries.insert(
                        oid.clone(),
                        DifferenceEntry::new(Arc::clone(class), ChangeTag::Added),
                    );
                }
            },
            ChangeEvent::ObjectRemoved { oid, class } => {
                let added = self
                    .entries
                    .get(oid)
                    .is_some_and(|entry| entry.change == ChangeTag::Added);
                if added {
                    self.entries.shift_remove(oid);
                } else {
                    self.entries.insert(
                        oid.clone(),
                        DifferenceEntry::new(Arc::clone(class), ChangeTag::Removed),
                    );
                }
            }
            ChangeEvent::PropertyChanged {
                oid,
                class,
                property,
                value,
                mirrored,
                ..
            } => {
                self.slot(oid, class, property, value);
                for change in mirrored {
                    self.slot(&change.oid, &change.class, &change.property, &change.value);
                }
            }
        }
    }
}

struct RecorderHandle(Weak<Mutex<Recorder>>);

impl ChangeSubscriber for RecorderHandle {
    fn on_change(&self, event: &ChangeEvent) {
        if let Some(recorder) = self.0.upgrade() {
            recorder.lock().apply(event);
        }
    }
}

/// Delta of a source document since subscription
#[derive(Debug)]
pub struct DifferenceModel {
    state: DifferenceState,
    recorder: Arc<Mutex<Recorder>>,
    subscription: Option<SubscriptionId>,
    schema: Option<Arc<Schema>>,
    oids: Option<Arc<dyn OidFactory>>,
}

impl Default for DifferenceModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DifferenceModel {
    /// Create an unsubscribed difference model
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DifferenceState::Unsubscribed,
            recorder: Arc::new(Mutex::new(Recorder::default())),
            subscription: None,
            schema: None,
            oids: None,
        }
    }

    /// Current lifecycle state
    #[inline]
    #[must_use]
    pub fn state(&self) -> DifferenceState {
        self.state
    }

    /// Check if still attached to a source document
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    /// Detached after a subscription, entries still available
    fn is_detached(&self) -> bool {
        self.state == DifferenceState::Unsubscribed && self.schema.is_some()
    }

    fn require_state(&self, expected: &'static str, allowed: &[DifferenceState]) -> Result<(), ModelError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ModelError::InvalidState {
                expected,
                actual: self.state.as_str(),
            })
        }
    }

    /// Start recording changes of `source`
    ///
    /// A detached model resumes recording into its existing entries.
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidState`] unless unsubscribed
    pub fn subscribe_to_data_model_changes(&mut self, source: &mut Document) -> Result<(), ModelError> {
        self.require_state("unsubscribed", &[DifferenceState::Unsubscribed])?;
        let mut recorder = self.recorder.lock();
        recorder.recording = true;
        recorder.schema = Some(Arc::clone(source.schema()));
        drop(recorder);
        let handle = RecorderHandle(Arc::downgrade(&self.recorder));
        self.subscription = Some(source.subscribe(Arc::new(handle)));
        self.schema = Some(Arc::clone(source.schema()));
        self.oids = Some(Arc::clone(source.oid_factory()));
        self.state = DifferenceState::Subscribed;
        tracing::debug!("difference model subscribed");
        Ok(())
    }

    /// Stop recording; accumulated entries are kept
    ///
    /// The model returns to [`DifferenceState::Unsubscribed`] unless it was
    /// discarded, and can still be saved or subscribed again.
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidState`] if not attached
    pub fn unsubscribe(&mut self, source: &mut Document) -> Result<(), ModelError> {
        let Some(id) = self.subscription.take() else {
            return Err(ModelError::InvalidState {
                expected: "attached",
                actual: self.state.as_str(),
            });
        };
        self.recorder.lock().recording = false;
        source.unsubscribe(id);
        if self.state != DifferenceState::Discarded {
            self.state = DifferenceState::Unsubscribed;
        }
        tracing::debug!(entries = self.len(), "difference model unsubscribed");
        Ok(())
    }

    /// Drop every entry and stop recording
    ///
    /// The source still holds the subscription until [`DifferenceModel::unsubscribe`].
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidState`] if never subscribed or already discarded
    pub fn discard(&mut self) -> Result<(), ModelError> {
        if !self.is_detached() {
            self.require_state(
                "subscribed or saved",
                &[DifferenceState::Subscribed, DifferenceState::Saved],
            )?;
        }
        let mut recorder = self.recorder.lock();
        recorder.recording = false;
        recorder.entries.clear();
        drop(recorder);
        self.state = DifferenceState::Discarded;
        Ok(())
    }

    /// Number of touched objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.recorder.lock().entries.len()
    }

    /// Check if nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recorder.lock().entries.is_empty()
    }

    /// Snapshot of all entries in first-touch order
    #[must_use]
    pub fn entries(&self) -> Vec<(Oid, DifferenceEntry)> {
        self.recorder
            .lock()
            .entries
            .iter()
            .map(|(oid, entry)| (oid.clone(), entry.clone()))
            .collect()
    }

    /// Entry for one object
    #[must_use]
    pub fn entry(&self, oid: &Oid) -> Option<DifferenceEntry> {
        self.recorder.lock().entries.get(oid).cloned()
    }

    /// Delta as tagged exchange records
    #[must_use]
    pub fn to_records(&self) -> Vec<ObjectRecord> {
        self.recorder
            .lock()
            .entries
            .iter()
            .map(|(oid, entry)| entry.record(oid))
            .collect()
    }

    /// Write the delta in the serializer's full-document format
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidState`] if never subscribed or discarded,
    /// or the serializer's error
    pub fn save(&mut self, out: &mut dyn Write, serializer: &dyn Serializer) -> Result<(), ModelError> {
        if !self.is_detached() {
            self.require_state(
                "subscribed or saved",
                &[DifferenceState::Subscribed, DifferenceState::Saved],
            )?;
        }
        let (Some(schema), Some(oids)) = (&self.schema, &self.oids) else {
            return Err(ModelError::InvalidState {
                expected: "subscribed",
                actual: self.state.as_str(),
            });
        };

        let records = self.to_records();
        let write = WriteOptions::default();
        let read = ReadOptions::default();
        let ctx = SerializerContext {
            schema,
            oid_factory: &**oids,
            write: &write,
            read: &read,
        };
        serializer.write(&records, &ctx, out)?;
        if self.is_attached() {
            self.state = DifferenceState::Saved;
        }
        tracing::info!(format = serializer.name(), entries = records.len(), "difference saved");
        Ok(())
    }

    /// Replay the delta onto a copy of the baseline
    ///
    /// # Errors
    /// Same as [`Document::apply_records`]
    pub fn apply_to(&self, target: &mut Document) -> Result<(), ModelError> {
        target.apply_records(&self.to_records(), ApplyMode::Replace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::TextOidFactory;
    use crate::schema::{Cardinality, ClassDef, DataType, SchemaBuilder};

    const NS: &str = "http://example.org/cim#";

    fn uri(local: &str) -> String {
        format!("{NS}{local}")
    }

    fn oid(id: &str) -> Oid {
        Oid::text("urn:t:", id)
    }

    fn document() -> Document {
        let schema = SchemaBuilder::new()
            .class(ClassDef::new(uri("Site")))
            .class(ClassDef::new(uri("Bay")))
            .attribute(uri("Bay"), uri("Bay.name"), DataType::String)
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
            .unwrap();
        Document::new(Arc::new(schema), Arc::new(TextOidFactory::new("urn:t:")))
    }

    #[test]
    fn state_machine() {
        let mut doc = document();
        let mut diff = DifferenceModel::new();
        assert_eq!(diff.state(), DifferenceState::Unsubscribed);
        assert!(matches!(diff.discard(), Err(ModelError::InvalidState { .. })));

        diff.subscribe_to_data_model_changes(&mut doc).unwrap();
        assert!(diff.subscribe_to_data_model_changes(&mut doc).is_err());
        assert_eq!(doc.subscriber_count(), 1);

        diff.discard().unwrap();
        let mut sink = Vec::new();
        struct Never;
        impl Serializer for Never {
            fn name(&self) -> &'static str {
                "never"
            }
            fn extensions(&self) -> &'static [&'static str] {
                &[]
            }
            fn write(
                &self,
                _: &[ObjectRecord],
                _: &SerializerContext<'_>,
                _: &mut dyn Write,
            ) -> Result<(), ModelError> {
                unreachable!()
            }
            fn read(&self, _: &str, _: &SerializerContext<'_>) -> Result<Vec<ObjectRecord>, ModelError> {
                unreachable!()
            }
        }
        assert!(matches!(
            diff.save(&mut sink, &Never),
            Err(ModelError::InvalidState { actual: "discarded", .. })
        ));

        diff.unsubscribe(&mut doc).unwrap();
        assert_eq!(doc.subscriber_count(), 0);
        assert!(diff.unsubscribe(&mut doc).is_err());
    }

    struct Lines;

    impl Serializer for Lines {
        fn name(&self) -> &'static str {
            "lines"
        }
        fn extensions(&self) -> &'static [&'static str] {
            &[]
        }
        fn write(
            &self,
            records: &[ObjectRecord],
            _: &SerializerContext<'_>,
            out: &mut dyn Write,
        ) -> Result<(), ModelError> {
            for record in records {
                writeln!(out, "{}", record.oid.iri())?;
            }
            Ok(())
        }
        fn read(&self, _: &str, _: &SerializerContext<'_>) -> Result<Vec<ObjectRecord>, ModelError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn detached_model_saves_and_resubscribes() {
        let mut doc = document();
        doc.create_object(oid("s"), &uri("Site")).unwrap();
        let mut diff = DifferenceModel::new();
        diff.subscribe_to_data_model_changes(&mut doc).unwrap();
        doc.create_object(oid("a"), &uri("Bay")).unwrap();
        diff.unsubscribe(&mut doc).unwrap();
        assert_eq!(diff.state(), DifferenceState::Unsubscribed);
        assert!(!diff.is_attached());

        let mut out = Vec::new();
        diff.save(&mut out, &Lines).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "urn:t:a\n");
        assert_eq!(diff.state(), DifferenceState::Unsubscribed);

        diff.subscribe_to_data_model_changes(&mut doc).unwrap();
        doc.create_object(oid("b"), &uri("Bay")).unwrap();
        assert_eq!(diff.state(), DifferenceState::Subscribed);
        assert_eq!(diff.len(), 2);

        diff.save(&mut Vec::new(), &Lines).unwrap();
        assert_eq!(diff.state(), DifferenceState::Saved);
        diff.unsubscribe(&mut doc).unwrap();
        assert_eq!(diff.state(), DifferenceState::Unsubscribed);
        diff.discard().unwrap();
        assert_eq!(diff.state(), DifferenceState::Discarded);
        assert!(diff.is_empty());
    }

    #[test]
    fn never_subscribed_model_cannot_save() {
        let mut diff = DifferenceModel::new();
        assert!(matches!(
            diff.save(&mut Vec::new(), &Lines),
            Err(ModelError::InvalidState { actual: "unsubscribed", .. })
        ));
    }

    #[test]
    fn dropped_model_stops_recording() {
        let mut doc = document();
        let mut diff = DifferenceModel::new();
        diff.subscribe_to_data_model_changes(&mut doc).unwrap();
        let recorder = Arc::downgrade(&diff.recorder);
        drop(diff);

        assert!(recorder.upgrade().is_none());
        doc.create_object(oid("b"), &uri("Bay")).unwrap();
        assert!(doc.contains(&oid("b")));
    }

    #[test]
    fn reused_oid_starts_from_cleared_slots() {
        let mut doc = document()
            .with_config(crate::config::DocumentConfig::default().with_retire_removed_oids(false));
        doc.create_object(oid("s"), &uri("Site")).unwrap();
        doc.create_object(oid("b"), &uri("Bay"))
            .unwrap()
            .set_attribute("name", "old")
            .unwrap()
            .set_assoc_1to1("Site", &oid("s"))
            .unwrap();
        let baseline = doc.clone();

        let mut diff = DifferenceModel::new();
        diff.subscribe_to_data_model_changes(&mut doc).unwrap();
        doc.remove_object(&oid("b")).unwrap();
        doc.create_object(oid("b"), &uri("Bay")).unwrap();

        let entry = diff.entry(&oid("b")).unwrap();
        assert_eq!(entry.change, ChangeTag::Modified);
        assert_eq!(
            entry.properties[uri("Bay.name").as_str()],
            PropertyValue::Attribute(None)
        );
        assert_eq!(entry.properties[uri("Bay.Site").as_str()], PropertyValue::One(None));

        let mut replay = baseline;
        diff.apply_to(&mut replay).unwrap();
        assert!(replay.is_equivalent(&doc));
    }

    #[test]
    fn added_then_removed_leaves_nothing() {
        let mut doc = document();
        let mut diff = DifferenceModel::new();
        diff.subscribe_to_data_model_changes(&mut doc).unwrap();

        doc.create_object(oid("b"), &uri("Bay"))
            .unwrap()
            .set_attribute("name", "B")
            .unwrap();
        doc.remove_object(&oid("b")).unwrap();

        assert!(diff.is_empty());
    }

    #[test]
    fn records_tags_and_mirrored_slots() {
        let mut doc = document();
        doc.create_object(oid("s"), &uri("Site")).unwrap();
        doc.create_object(oid("old"), &uri("Bay")).unwrap();

        let mut diff = DifferenceModel::new();
        diff.subscribe_to_data_model_changes(&mut doc).unwrap();

        doc.create_object(oid("b"), &uri("Bay"))
            .unwrap()
            .set_assoc_1to1("Site", &oid("s"))
            .unwrap();
        doc.remove_object(&oid("old")).unwrap();

        let added = diff.entry(&oid("b")).unwrap();
        assert_eq!(added.change, ChangeTag::Added);
        assert_eq!(
            added.properties[uri("Bay.Site").as_str()],
            PropertyValue::One(Some(oid("s")))
        );

        let site = diff.entry(&oid("s")).unwrap();
        assert_eq!(site.change, ChangeTag::Modified);
        assert_eq!(
            site.properties[uri("Site.Bays").as_str()],
            PropertyValue::Many(vec![oid("b")])
        );

        let removed = diff.entry(&oid("old")).unwrap();
        assert_eq!(removed.change, ChangeTag::Removed);
        assert!(diff.to_records()[2].properties.is_empty());
    }

    #[test]
    fn replay_reproduces_source() {
        let mut doc = document();
        doc.create_object(oid("s1"), &uri("Site")).unwrap();
        doc.create_object(oid("s2"), &uri("Site")).unwrap();
        doc.create_object(oid("b"), &uri("Bay"))
            .unwrap()
            .set_assoc_1to1("Site", &oid("s1"))
            .unwrap();
        let baseline = doc.clone();

        let mut diff = DifferenceModel::new();
        diff.subscribe_to_data_model_changes(&mut doc).unwrap();
        doc.object_mut(&oid("b"))
            .unwrap()
            .set_assoc_1to1("Site", &oid("s2"))
            .unwrap()
            .set_attribute("name", "moved")
            .unwrap();
        doc.create_object(oid("c"), &uri("Bay")).unwrap();
        doc.object_mut(&oid("s1"))
            .unwrap()
            .add_assoc_1tom("Bays", &oid("c"))
            .unwrap();
        doc.remove_object(&oid("s2")).unwrap();

        let mut replay = baseline.clone();
        diff.apply_to(&mut replay).unwrap();
        assert!(replay.is_equivalent(&doc));
    }
}
