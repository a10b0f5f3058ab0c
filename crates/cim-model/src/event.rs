//! Change events
//!
//! Documents publish a synchronous event stream:
//! - Storage changes: [`ChangeEvent::ObjectAdded`], [`ChangeEvent::ObjectRemoved`]
//! - Property changes: [`ChangeEvent::PropertyChanged`], carrying the
//!   property's full value after the mutation plus every inverse-side slot
//!   the association manager updated along with it
//!
//! Events fire after the mutation and its inverse-side mirroring are fully
//! applied, so subscribers always observe a consistent graph.

use crate::oid::Oid;
use crate::value::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What happened to a property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyChangeKind {
    /// Attribute value written or cleared
    AttributeSet,
    /// Target appended to a 1:many association
    AssociationAdded(Oid),
    /// Target removed from a 1:many association
    AssociationRemoved(Oid),
    /// 1:1 association retargeted or cleared
    AssociationSet(Option<Oid>),
    /// Every link of the association dropped
    AssociationCleared,
}

impl PropertyChangeKind {
    /// Short label used in logs
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::AttributeSet => "attribute-set",
            Self::AssociationAdded(_) => "association-add",
            Self::AssociationRemoved(_) => "association-remove",
            Self::AssociationSet(_) => "association-set",
            Self::AssociationCleared => "association-clear",
        }
    }
}

/// Full value of a property after a change
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Attribute value, `None` when unset
    Attribute(Option<Value>),
    /// 1:1 target, `None` when unset
    One(Option<Oid>),
    /// 1:many targets in insertion order
    Many(Vec<Oid>),
}

impl PropertyValue {
    /// Check if the property holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Attribute(v) => v.is_none(),
            Self::One(t) => t.is_none(),
            Self::Many(ts) => ts.is_empty(),
        }
    }
}

/// Inverse-side slot updated as part of the same logical mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MirroredChange {
    /// Object owning the slot
    pub oid: Oid,
    /// Its class URI
    pub class: Arc<str>,
    /// Property URI of the slot
    pub property: Arc<str>,
    /// Slot value after the mutation
    pub value: PropertyValue,
}

/// Document change notification
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Object registered in the document
    ObjectAdded {
        /// New object
        oid: Oid,
        /// Its class URI
        class: Arc<str>,
    },

    /// Object removed from the document
    ObjectRemoved {
        /// Removed object
        oid: Oid,
        /// Its class URI
        class: Arc<str>,
    },

    /// Attribute or association mutated
    PropertyChanged {
        /// Owning object
        oid: Oid,
        /// Its class URI
        class: Arc<str>,
        /// Property URI
        property: Arc<str>,
        /// Mutation kind
        kind: PropertyChangeKind,
        /// Property value after the change
        value: PropertyValue,
        /// Inverse-side slots changed by the same mutation
        mirrored: Vec<MirroredChange>,
    },
}

impl ChangeEvent {
    /// Object the event is about
    #[must_use]
    pub fn oid(&self) -> &Oid {
        match self {
            Self::ObjectAdded { oid, .. }
            | Self::ObjectRemoved { oid, .. }
            | Self::PropertyChanged { oid, .. } => oid,
        }
    }

    /// Class URI of that object
    #[must_use]
    pub fn class(&self) -> &str {
        match self {
            Self::ObjectAdded { class, .. }
            | Self::ObjectRemoved { class, .. }
            | Self::PropertyChanged { class, .. } => class,
        }
    }

    /// Check if event is a storage (add/remove) change
    #[inline]
    #[must_use]
    pub fn is_storage(&self) -> bool {
        !matches!(self, Self::PropertyChanged { .. })
    }
}

/// Receiver of document change events
///
/// Handlers run synchronously on the mutating thread. They must not mutate
/// the document that is notifying them.
pub trait ChangeSubscriber: Send + Sync {
    /// Handle one event
    fn on_change(&self, event: &ChangeEvent);
}

impl<F> ChangeSubscriber for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent) {
        self(event);
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Ordered subscriber list
#[derive(Default)]
pub(crate) struct Subscribers {
    entries: Vec<(SubscriptionId, Arc<dyn ChangeSubscriber>)>,
}

impl Subscribers {
    pub(crate) fn add(&mut self, subscriber: Arc<dyn ChangeSubscriber>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.entries.push((id, subscriber));
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn dispatch(&self, event: &ChangeEvent) {
        for (_, subscriber) in &self.entries {
            subscriber.on_change(event);
        }
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// Logs every storage and property change at `info` level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSubscriber;

impl ChangeSubscriber for LoggingSubscriber {
    fn on_change(&self, event: &ChangeEvent) {
        match event {
            ChangeEvent::ObjectAdded { oid, class } => {
                tracing::info!(op = "add", %oid, class = %class, "model object storage changed");
            }
            ChangeEvent::ObjectRemoved { oid, class } => {
                tracing::info!(op = "remove", %oid, class = %class, "model object storage changed");
            }
            ChangeEvent::PropertyChanged {
                oid,
                class,
                property,
                kind,
                mirrored,
                ..
            } => {
                tracing::info!(
                    op = kind.label(),
                    %oid,
                    class = %class,
                    property = %property,
                    mirrored = mirrored.len(),
                    "model object property changed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn added(text: &str) -> ChangeEvent {
        ChangeEvent::ObjectAdded {
            oid: Oid::text("urn:test:", text),
            class: Arc::from("http://x#A"),
        }
    }

    #[test]
    fn closures_subscribe() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut subs = Subscribers::default();
        let id = subs.add(Arc::new(move |e: &ChangeEvent| {
            sink.lock().push(e.oid().to_string());
        }));

        subs.dispatch(&added("a"));
        assert!(subs.remove(id));
        assert!(!subs.remove(id));
        subs.dispatch(&added("b"));

        assert_eq!(*seen.lock(), vec!["a".to_string()]);
        assert_eq!(subs.len(), 0);
    }

    #[test]
    fn subscription_ids_unique() {
        assert_ne!(SubscriptionId::next(), SubscriptionId::next());
    }

    #[test]
    fn event_accessors() {
        let event = added("x");
        assert!(event.is_storage());
        assert_eq!(event.class(), "http://x#A");
        assert!(PropertyValue::Many(Vec::new()).is_empty());
        assert!(!PropertyValue::One(Some(Oid::text("", "t"))).is_empty());
    }

    #[test]
    fn logging_subscriber_handles_all_events() {
        let logger = LoggingSubscriber;
        logger.on_change(&added("x"));
        logger.on_change(&ChangeEvent::PropertyChanged {
            oid: Oid::text("", "x"),
            class: Arc::from("http://x#A"),
            property: Arc::from("http://x#A.b"),
            kind: PropertyChangeKind::AttributeSet,
            value: PropertyValue::Attribute(None),
            mirrored: Vec::new(),
        });
    }
}
