//! Association manager
//!
//! Keeps bidirectional associations symmetric:
//! - Every call validates the whole request first (property, cardinality,
//!   target existence, range, reflexivity) and only then mutates, so a
//!   failed request leaves both sides untouched
//! - The inverse side is mirrored in the same call, including unlinking a
//!   target's previous holder when the inverse is 1:1
//! - Each logical mutation yields exactly one [`LocalChange`] for the side
//!   the caller touched, listing the inverse-side slots it also updated;
//!   no-op requests yield none
//!
//! 1:many order is insertion order and removal never reorders survivors.

use crate::error::ModelError;
use crate::event::PropertyChangeKind;
use crate::object::ModelObject;
use crate::oid::Oid;
use crate::schema::{Cardinality, MetaProperty, PropertyKey, Schema};
use indexmap::IndexMap;
use std::sync::Arc;

/// Object arena owned by a document
pub(crate) type ObjectStore = IndexMap<Oid, ModelObject>;

/// Slot of the graph: one property of one object
pub(crate) type Slot = (Oid, Arc<MetaProperty>);

/// Change on the caller's side of an association mutation
#[derive(Debug, Clone)]
pub(crate) struct LocalChange {
    pub(crate) oid: Oid,
    pub(crate) property: Arc<MetaProperty>,
    pub(crate) kind: PropertyChangeKind,
    pub(crate) mirrored: Vec<Slot>,
}

/// Borrowed view applying association mutations to a store
pub(crate) struct AssociationManager<'a> {
    schema: &'a Schema,
    objects: &'a mut ObjectStore,
    touched: Vec<Slot>,
}

impl<'a> AssociationManager<'a> {
    pub(crate) fn new(schema: &'a Schema, objects: &'a mut ObjectStore) -> Self {
        Self {
            schema,
            objects,
            touched: Vec::new(),
        }
    }

    fn touch(&mut self, oid: &Oid, property: &Arc<MetaProperty>) {
        let seen = self
            .touched
            .iter()
            .any(|(o, p)| o == oid && p.uri() == property.uri());
        if !seen {
            self.touched.push((oid.clone(), Arc::clone(property)));
        }
    }

    fn change(&mut self, oid: &Oid, property: Arc<MetaProperty>, kind: PropertyChangeKind) -> LocalChange {
        let mirrored = std::mem::take(&mut self.touched)
            .into_iter()
            .filter(|(o, p)| !(o == oid && p.uri() == property.uri()))
            .collect();
        LocalChange {
            oid: oid.clone(),
            property,
            kind,
            mirrored,
        }
    }

    fn object(&self, oid: &Oid) -> Result<&ModelObject, ModelError> {
        self.objects
            .get(oid)
            .ok_or_else(|| ModelError::NotFound(oid.clone()))
    }

    fn resolve(
        &self,
        source: &Oid,
        key: impl PropertyKey,
        cardinality: Cardinality,
    ) -> Result<(Arc<MetaProperty>, Option<Arc<MetaProperty>>), ModelError> {
        let property = Arc::clone(
            self.object(source)?
                .association_property(key, cardinality)?,
        );
        let inverse = self.schema.inverse_of(&property).cloned();
        Ok((property, inverse))
    }

    fn check_target(
        &self,
        property: &MetaProperty,
        source: &Oid,
        target: &Oid,
    ) -> Result<(), ModelError> {
        let target_obj = self.object(target)?;
        let Some(spec) = property.association() else {
            return Err(ModelError::type_mismatch(property.uri(), "association", "attribute"));
        };
        if !target_obj.class().is_subclass_of(&spec.range) {
            return Err(ModelError::type_mismatch(
                property.uri(),
                &*spec.range,
                target_obj.class_uri(),
            ));
        }
        if source == target && !spec.reflexive {
            return Err(ModelError::ReflexiveLink {
                property: property.uri().to_string(),
                oid: source.clone(),
            });
        }
        Ok(())
    }

    /// Set or clear a 1:1 association
    pub(crate) fn set_one(
        &mut self,
        source: &Oid,
        key: impl PropertyKey,
        target: Option<&Oid>,
    ) -> Result<Option<LocalChange>, ModelError> {
        let (property, inverse) = self.resolve(source, key, Cardinality::OneToOne)?;
        if let Some(target) = target {
            self.check_target(&property, source, target)?;
        }

        let current = self.object(source)?.one(property.uri()).cloned();
        if current.as_ref() == target {
            return Ok(None);
        }

        if let (Some(old), Some(inverse)) = (&current, &inverse) {
            self.unlink_inverse(inverse, old, source);
        }
        match target {
            Some(target) => {
                if let Some(inverse) = &inverse {
                    self.link_inverse(&property, inverse, target, source);
                }
                if let Some(obj) = self.objects.get_mut(source) {
                    obj.link_one(property.uri_arc(), target.clone());
                }
            }
            None => {
                if let Some(obj) = self.objects.get_mut(source) {
                    obj.unlink_one(property.uri());
                }
            }
        }

        tracing::debug!(%source, property = property.uri(), target = ?target, "association set");
        Ok(Some(self.change(
            source,
            property,
            PropertyChangeKind::AssociationSet(target.cloned()),
        )))
    }

    /// Append to a 1:many association; adding a present target is a no-op
    pub(crate) fn add_many(
        &mut self,
        source: &Oid,
        key: impl PropertyKey,
        target: &Oid,
    ) -> Result<Option<LocalChange>, ModelError> {
        let (property, inverse) = self.resolve(source, key, Cardinality::OneToMany)?;
        self.check_target(&property, source, target)?;

        let present = self
            .object(source)?
            .many(property.uri())
            .is_some_and(|set| set.contains(target));
        if present {
            return Ok(None);
        }

        if let Some(inverse) = &inverse {
            self.link_inverse(&property, inverse, target, source);
        }
        if let Some(obj) = self.objects.get_mut(source) {
            obj.insert_many(property.uri_arc(), target.clone());
        }

        tracing::debug!(%source, property = property.uri(), %target, "association added");
        Ok(Some(self.change(
            source,
            property,
            PropertyChangeKind::AssociationAdded(target.clone()),
        )))
    }

    /// Remove one target from a 1:many association; absent targets are a no-op
    pub(crate) fn remove_many(
        &mut self,
        source: &Oid,
        key: impl PropertyKey,
        target: &Oid,
    ) -> Result<Option<LocalChange>, ModelError> {
        let (property, inverse) = self.resolve(source, key, Cardinality::OneToMany)?;

        let removed = self
            .objects
            .get_mut(source)
            .is_some_and(|obj| obj.remove_many(property.uri(), target));
        if !removed {
            return Ok(None);
        }
        if let Some(inverse) = &inverse {
            self.unlink_inverse(inverse, target, source);
        }

        tracing::debug!(%source, property = property.uri(), %target, "association removed");
        Ok(Some(self.change(
            source,
            property,
            PropertyChangeKind::AssociationRemoved(target.clone()),
        )))
    }

    /// Remove every target from a 1:many association
    pub(crate) fn clear_many(
        &mut self,
        source: &Oid,
        key: impl PropertyKey,
    ) -> Result<Option<LocalChange>, ModelError> {
        let (property, inverse) = self.resolve(source, key, Cardinality::OneToMany)?;

        let targets = self
            .objects
            .get_mut(source)
            .map(|obj| obj.take_links(property.uri()))
            .unwrap_or_default();
        if targets.is_empty() {
            return Ok(None);
        }
        if let Some(inverse) = &inverse {
            for target in &targets {
                self.unlink_inverse(inverse, target, source);
            }
        }

        tracing::debug!(%source, property = property.uri(), count = targets.len(), "association cleared");
        Ok(Some(self.change(
            source,
            property,
            PropertyChangeKind::AssociationCleared,
        )))
    }

    /// Drop every link to and from `oid` ahead of its removal
    ///
    /// Yields one change per association property of `oid` that held links,
    /// then one per other object whose non-mirrored link to `oid` was dropped.
    pub(crate) fn detach(&mut self, oid: &Oid) -> Vec<LocalChange> {
        let Some(obj) = self.objects.get(oid) else {
            return Vec::new();
        };
        let class = Arc::clone(obj.class());
        let mut changes = Vec::new();

        for uri in obj.linked_properties() {
            let Some(property) = class.property(&uri).cloned() else {
                continue;
            };
            let inverse = self.schema.inverse_of(&property).cloned();
            let targets = self
                .objects
                .get_mut(oid)
                .map(|obj| obj.take_links(&uri))
                .unwrap_or_default();
            if let Some(inverse) = &inverse {
                for target in targets.iter().filter(|t| *t != oid) {
                    self.unlink_inverse(inverse, target, oid);
                }
            }
            let change = self.change(oid, property, PropertyChangeKind::AssociationCleared);
            changes.push(change);
        }

        let holders: Vec<(Oid, Arc<str>)> = self
            .objects
            .iter()
            .filter(|(holder, _)| *holder != oid)
            .flat_map(|(holder, obj)| {
                obj.properties_referencing(oid)
                    .into_iter()
                    .map(move |uri| (holder.clone(), uri))
            })
            .collect();

        for (holder, uri) in holders {
            let Some(obj) = self.objects.get_mut(&holder) else {
                continue;
            };
            obj.remove_link_to(&uri, oid);
            let Some(property) = obj.class().property(&uri).cloned() else {
                continue;
            };
            let kind = match property.cardinality() {
                Some(Cardinality::OneToMany) => PropertyChangeKind::AssociationRemoved(oid.clone()),
                _ => PropertyChangeKind::AssociationSet(None),
            };
            changes.push(LocalChange {
                oid: holder,
                property,
                kind,
                mirrored: Vec::new(),
            });
        }

        changes
    }

    /// Mirror `source → target` onto `target.inverse`
    fn link_inverse(
        &mut self,
        forward: &Arc<MetaProperty>,
        inverse: &Arc<MetaProperty>,
        target: &Oid,
        source: &Oid,
    ) {
        let changed = match inverse.cardinality() {
            Some(Cardinality::OneToOne) => {
                let previous = self
                    .objects
                    .get(target)
                    .and_then(|t| t.one(inverse.uri()))
                    .filter(|holder| *holder != source)
                    .cloned();
                if let Some(holder) = previous {
                    let stolen = self
                        .objects
                        .get_mut(&holder)
                        .is_some_and(|obj| obj.remove_link_to(forward.uri(), target));
                    if stolen {
                        self.touch(&holder, forward);
                    }
                }
                self.objects.get_mut(target).is_some_and(|obj| {
                    obj.link_one(inverse.uri_arc(), source.clone()).as_ref() != Some(source)
                })
            }
            Some(Cardinality::OneToMany) => self
                .objects
                .get_mut(target)
                .is_some_and(|obj| obj.insert_many(inverse.uri_arc(), source.clone())),
            None => false,
        };
        if changed {
            self.touch(target, inverse);
        }
    }

    /// Remove `source` from `target.inverse`
    fn unlink_inverse(&mut self, inverse: &Arc<MetaProperty>, target: &Oid, source: &Oid) {
        let changed = self
            .objects
            .get_mut(target)
            .is_some_and(|obj| obj.remove_link_to(inverse.uri(), source));
        if changed {
            self.touch(target, inverse);
        }
    }
}
