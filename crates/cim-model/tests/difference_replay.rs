//! Difference replay
//!
//! Recording changes on one copy and applying the recorded delta to an
//! untouched copy of the baseline yields the same graph.

use cim_model::{
    ChangeTag, DifferenceModel, DifferenceState, Document, DocumentConfig, ImportPolicy,
    ModelError, PropertyValue, Value,
};
use cim_test_utils::{
    assert_symmetric, build_sample_network, cim, fixture_document, oid, Identified,
};
use pretty_assertions::assert_eq;

fn baseline() -> Document {
    let mut doc = fixture_document();
    build_sample_network(&mut doc).unwrap();
    doc.create_object(oid("sub-2"), &cim("Substation"))
        .unwrap()
        .set_attribute("name", "South")
        .unwrap();
    doc
}

fn replay(edit: impl FnOnce(&mut Document)) -> (Document, Document, DifferenceModel) {
    let mut working = baseline();
    let untouched = working.clone();
    let mut diff = DifferenceModel::new();
    diff.subscribe_to_data_model_changes(&mut working).unwrap();

    edit(&mut working);

    let mut target = untouched;
    diff.apply_to(&mut target).unwrap();
    (working, target, diff)
}

#[test]
fn attribute_edits_replay() {
    let (working, target, diff) = replay(|doc| {
        doc.object_mut(&oid("sub-1"))
            .unwrap()
            .set_attribute("name", "First")
            .unwrap()
            .set_attribute("name", "Final")
            .unwrap()
            .clear_attribute("description")
            .unwrap();
        doc.object_mut(&oid("bv-110"))
            .unwrap()
            .set_attribute("nominalVoltage", 115.0)
            .unwrap();
    });

    let entry = diff.entry(&oid("sub-1")).unwrap();
    assert_eq!(entry.change, ChangeTag::Modified);
    assert_eq!(
        entry.properties.get(cim("IdentifiedObject.name").as_str()),
        Some(&PropertyValue::Attribute(Some(Value::String("Final".into()))))
    );
    assert!(target.is_equivalent(&working));
}

#[test]
fn reparent_steal_replays_on_every_side() {
    let (working, target, diff) = replay(|doc| {
        doc.object_mut(&oid("sub-2"))
            .unwrap()
            .add_assoc_1tom("VoltageLevels", &oid("vl-110"))
            .unwrap();
    });

    let touched: Vec<String> = diff.entries().iter().map(|(o, _)| o.to_string()).collect();
    assert!(touched.contains(&"sub-1".to_string()));
    assert!(touched.contains(&"sub-2".to_string()));
    assert!(touched.contains(&"vl-110".to_string()));

    let level = target.get_object(&oid("vl-110")).unwrap();
    assert_eq!(level.get_assoc_1to1("Substation").unwrap(), Some(&oid("sub-2")));
    assert!(target.is_equivalent(&working));
    assert_symmetric(&target);
}

#[test]
fn structural_edits_replay() {
    let (working, target, diff) = replay(|doc| {
        doc.remove_object(&oid("t-1")).unwrap();
        doc.create_object(oid("brk-2"), &cim("Breaker"))
            .unwrap()
            .set_attribute("normalOpen", true)
            .unwrap()
            .set_assoc_1to1("EquipmentContainer", &oid("vl-110"))
            .unwrap();
        doc.object_mut(&oid("asset-1"))
            .unwrap()
            .add_assoc_1tom("PowerSystemResources", &oid("brk-2"))
            .unwrap();
    });

    assert_eq!(diff.entry(&oid("t-1")).unwrap().change, ChangeTag::Removed);
    assert_eq!(diff.entry(&oid("brk-2")).unwrap().change, ChangeTag::Added);
    assert!(!target.contains(&oid("t-1")));
    assert!(target.is_equivalent(&working));
    assert_symmetric(&target);
}

#[test]
fn transient_objects_leave_no_trace() {
    let (working, target, diff) = replay(|doc| {
        doc.create_object(oid("tmp"), &cim("VoltageLevel"))
            .unwrap()
            .set_assoc_1to1("Substation", &oid("sub-2"))
            .unwrap();
        doc.remove_object(&oid("tmp")).unwrap();
    });

    assert!(diff.entry(&oid("tmp")).is_none());
    assert!(target.is_equivalent(&working));
}

#[test]
fn unsubscribed_changes_are_not_recorded() {
    let mut doc = baseline();
    let mut diff = DifferenceModel::new();
    diff.subscribe_to_data_model_changes(&mut doc).unwrap();
    doc.object_mut(&oid("sub-2"))
        .unwrap()
        .set_attribute("name", "Recorded")
        .unwrap();
    diff.unsubscribe(&mut doc).unwrap();
    doc.object_mut(&oid("sub-1"))
        .unwrap()
        .set_attribute("name", "Ignored")
        .unwrap();

    assert_eq!(diff.state(), DifferenceState::Unsubscribed);
    assert_eq!(diff.len(), 1);
    assert!(diff.entry(&oid("sub-1")).is_none());
    assert_eq!(doc.subscriber_count(), 0);
}

#[test]
fn reused_identifier_replays_as_a_fresh_object() {
    let mut working = baseline().with_config(DocumentConfig::new().with_retire_removed_oids(false));
    let untouched = working.clone();
    let mut diff = DifferenceModel::new();
    diff.subscribe_to_data_model_changes(&mut working).unwrap();

    working.remove_object(&oid("sub-2")).unwrap();
    working.create_object(oid("sub-2"), &cim("Substation")).unwrap();

    let mut target = untouched;
    diff.apply_to(&mut target).unwrap();
    let name = |doc: &Document| {
        doc.get_object(&oid("sub-2"))
            .unwrap()
            .attribute("name")
            .unwrap()
            .cloned()
    };
    assert_eq!(name(&working), None);
    assert_eq!(name(&target), None);
    assert!(target.is_equivalent(&working));
}

#[test]
fn detached_model_keeps_its_entries_for_saving() {
    let mut doc = baseline();
    let mut diff = DifferenceModel::new();
    diff.subscribe_to_data_model_changes(&mut doc).unwrap();
    doc.object_mut(&oid("sub-2"))
        .unwrap()
        .set_attribute("name", "Recorded")
        .unwrap();
    diff.unsubscribe(&mut doc).unwrap();

    diff.subscribe_to_data_model_changes(&mut doc).unwrap();
    doc.object_mut(&oid("sub-1"))
        .unwrap()
        .set_attribute("name", "Resumed")
        .unwrap();
    assert_eq!(diff.state(), DifferenceState::Subscribed);
    assert_eq!(diff.len(), 2);
}

#[test]
fn replay_against_wrong_baseline_fails_cleanly() {
    let (_, _, diff) = replay(|doc| {
        doc.object_mut(&oid("sub-2"))
            .unwrap()
            .set_attribute("name", "Renamed")
            .unwrap();
    });

    let mut unrelated = fixture_document();
    let result = diff.apply_to(&mut unrelated);
    assert!(matches!(result, Err(ModelError::NotFound(_))));
    assert!(unrelated.is_empty());
}

#[test]
fn import_merges_disjoint_documents() {
    let mut target = baseline();
    let mut source = fixture_document();
    source
        .create_object(oid("vl-20"), &cim("VoltageLevel"))
        .unwrap()
        .set_attribute("name", "South 20")
        .unwrap();

    let report = target.import_model_objects(&source).unwrap();
    assert_eq!(report.imported, vec![oid("vl-20")]);
    assert!(report.collisions.is_empty());
    assert!(target.contains(&oid("vl-20")));
}

#[test]
fn import_abort_policy_leaves_target_untouched() {
    let mut target = baseline().with_config(
        DocumentConfig::new().with_import_policy(ImportPolicy::Abort),
    );
    let before = target.clone();
    let mut source = fixture_document();
    let net = build_sample_network(&mut source).unwrap();
    net.substation.set_name(&mut source, "Clash").unwrap();

    let result = target.import_model_objects(&source);
    assert!(matches!(result, Err(ModelError::ImportCollisions(_))));
    assert!(target.is_equivalent(&before));
}
