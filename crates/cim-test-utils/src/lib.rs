//! Testing utilities for CimBios workspace
//!
//! Shared fixture schema, typed handles, and assertions.

#![allow(missing_docs)]

use cim_model::schema::{Cardinality, ClassDef, DataType, Schema, SchemaBuilder};
use cim_model::value::FromValue;
use cim_model::{
    ChangeEvent, Document, ModelError, Oid, TextOidFactory, TypeLibrary, TypedObject,
    UuidOidFactory, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub const CIM: &str = "http://iec.ch/TC57/CIM100#";
pub const TEST_NS: &str = "urn:test:";

/// Full URI of a CIM class or property
pub fn cim(local: &str) -> String {
    format!("{CIM}{local}")
}

/// Text OID in the test namespace
pub fn oid(id: &str) -> Oid {
    Oid::text(TEST_NS, id)
}

fn one_to_many(
    builder: SchemaBuilder,
    (owner, many): (&str, &str),
    (member, one): (&str, &str),
) -> SchemaBuilder {
    builder
        .association(
            cim(owner),
            cim(&format!("{owner}.{many}")),
            cim(member),
            Cardinality::OneToMany,
            Some(cim(&format!("{member}.{one}"))),
        )
        .association(
            cim(member),
            cim(&format!("{member}.{one}")),
            cim(owner),
            Cardinality::OneToOne,
            Some(cim(&format!("{owner}.{many}"))),
        )
}

/// Declarations of the fixture schema
pub fn fixture_builder() -> SchemaBuilder {
    let classes = [
        ("IdentifiedObject", None),
        ("PowerSystemResource", Some("IdentifiedObject")),
        ("ConnectivityNodeContainer", Some("PowerSystemResource")),
        ("EquipmentContainer", Some("ConnectivityNodeContainer")),
        ("Substation", Some("EquipmentContainer")),
        ("VoltageLevel", Some("EquipmentContainer")),
        ("Equipment", Some("PowerSystemResource")),
        ("ConductingEquipment", Some("Equipment")),
        ("Switch", Some("ConductingEquipment")),
        ("ProtectedSwitch", Some("Switch")),
        ("Breaker", Some("ProtectedSwitch")),
        ("BaseVoltage", Some("IdentifiedObject")),
        ("ACDCTerminal", Some("IdentifiedObject")),
        ("Terminal", Some("ACDCTerminal")),
        ("Asset", Some("IdentifiedObject")),
        ("Location", Some("IdentifiedObject")),
        ("GeographicalRegion", Some("IdentifiedObject")),
        ("SubGeographicalRegion", Some("IdentifiedObject")),
        ("FullModel", None),
    ];

    let mut builder = SchemaBuilder::new()
        .namespace("cim", CIM)
        .namespace("md", "http://iec.ch/TC57/61970-552/ModelDescription/1#");
    for (class, parent) in classes {
        let mut def = ClassDef::new(cim(class));
        if let Some(parent) = parent {
            def = def.parent(cim(parent));
        }
        builder = builder.class(def);
    }

    builder = builder
        .class(ClassDef::compound(cim("InUseDate")))
        .class(ClassDef::enumeration(cim("PhaseCode")));
    for literal in ["A", "B", "C", "N", "ABC", "ABCN"] {
        builder = builder.individual(cim(&format!("PhaseCode.{literal}")), cim("PhaseCode"));
    }

    builder = builder
        .attribute(cim("IdentifiedObject"), cim("IdentifiedObject.name"), DataType::String)
        .attribute(cim("IdentifiedObject"), cim("IdentifiedObject.mRID"), DataType::String)
        .attribute(
            cim("IdentifiedObject"),
            cim("IdentifiedObject.description"),
            DataType::String,
        )
        .attribute(cim("BaseVoltage"), cim("BaseVoltage.nominalVoltage"), DataType::Float)
        .attribute(cim("Switch"), cim("Switch.normalOpen"), DataType::Boolean)
        .attribute(
            cim("ProtectedSwitch"),
            cim("ProtectedSwitch.breakingCapacity"),
            DataType::Float,
        )
        .attribute(cim("ACDCTerminal"), cim("ACDCTerminal.sequenceNumber"), DataType::Integer)
        .attribute(cim("Terminal"), cim("Terminal.phases"), DataType::Enum(cim("PhaseCode")))
        .attribute(cim("Asset"), cim("Asset.inUseDate"), DataType::Compound(cim("InUseDate")))
        .attribute(cim("InUseDate"), cim("InUseDate.inUseDate"), DataType::DateTime)
        .attribute(cim("InUseDate"), cim("InUseDate.installationDate"), DataType::DateTime)
        .attribute(cim("FullModel"), cim("FullModel.created"), DataType::DateTime)
        .attribute(cim("FullModel"), cim("FullModel.description"), DataType::String);

    builder = one_to_many(builder, ("Substation", "VoltageLevels"), ("VoltageLevel", "Substation"));
    builder = one_to_many(builder, ("BaseVoltage", "VoltageLevel"), ("VoltageLevel", "BaseVoltage"));
    builder = one_to_many(
        builder,
        ("EquipmentContainer", "Equipments"),
        ("Equipment", "EquipmentContainer"),
    );
    builder = one_to_many(
        builder,
        ("ConductingEquipment", "Terminals"),
        ("Terminal", "ConductingEquipment"),
    );
    builder = one_to_many(
        builder,
        ("Location", "PowerSystemResources"),
        ("PowerSystemResource", "Location"),
    );
    builder = one_to_many(
        builder,
        ("SubGeographicalRegion", "Substations"),
        ("Substation", "Region"),
    );
    builder = one_to_many(
        builder,
        ("GeographicalRegion", "Regions"),
        ("SubGeographicalRegion", "Region"),
    );

    builder
        .association(
            cim("PowerSystemResource"),
            cim("PowerSystemResource.Assets"),
            cim("Asset"),
            Cardinality::OneToMany,
            Some(cim("Asset.PowerSystemResources")),
        )
        .association(
            cim("Asset"),
            cim("Asset.PowerSystemResources"),
            cim("PowerSystemResource"),
            Cardinality::OneToMany,
            Some(cim("PowerSystemResource.Assets")),
        )
        .association(cim("Asset"), cim("Asset.Location"), cim("Location"), Cardinality::OneToOne, None)
}

/// Fixture schema
pub fn fixture_schema() -> Arc<Schema> {
    Arc::new(fixture_builder().build().unwrap())
}

/// Fixture schema as a JSON description
pub fn fixture_schema_json() -> String {
    serde_json::to_string_pretty(&fixture_builder()).unwrap()
}

/// Type library with every fixture handle and enum registered
pub fn fixture_types() -> Arc<TypeLibrary> {
    let mut types = TypeLibrary::new(fixture_schema());
    types
        .register::<Substation>()
        .and_then(|t| t.register::<VoltageLevel>())
        .and_then(|t| t.register::<BaseVoltage>())
        .and_then(|t| t.register::<Breaker>())
        .and_then(|t| t.register::<Terminal>())
        .and_then(|t| t.register::<Asset>())
        .and_then(|t| t.register::<Location>())
        .and_then(|t| t.register::<GeographicalRegion>())
        .and_then(|t| t.register::<SubGeographicalRegion>())
        .and_then(|t| t.register::<FullModel>())
        .and_then(|t| t.register_enum::<PhaseCode>())
        .unwrap();
    Arc::new(types)
}

/// Empty document with text OIDs in the test namespace
pub fn fixture_document() -> Document {
    Document::with_types(fixture_types(), Arc::new(TextOidFactory::new(TEST_NS)))
}

/// Empty document with UUID OIDs
pub fn uuid_document() -> Document {
    Document::with_types(fixture_types(), Arc::new(UuidOidFactory::new()))
}

cim_model::typed_object! {
    /// Substation handle
    pub struct Substation = "http://iec.ch/TC57/CIM100#Substation";
    /// Voltage level handle
    pub struct VoltageLevel = "http://iec.ch/TC57/CIM100#VoltageLevel";
    /// Base voltage handle
    pub struct BaseVoltage = "http://iec.ch/TC57/CIM100#BaseVoltage";
    /// Breaker handle
    pub struct Breaker = "http://iec.ch/TC57/CIM100#Breaker";
    /// Terminal handle
    pub struct Terminal = "http://iec.ch/TC57/CIM100#Terminal";
    /// Asset handle
    pub struct Asset = "http://iec.ch/TC57/CIM100#Asset";
    /// Location handle
    pub struct Location = "http://iec.ch/TC57/CIM100#Location";
    /// Geographical region handle
    pub struct GeographicalRegion = "http://iec.ch/TC57/CIM100#GeographicalRegion";
    /// Sub-geographical region handle
    pub struct SubGeographicalRegion = "http://iec.ch/TC57/CIM100#SubGeographicalRegion";
    /// Model header handle
    pub struct FullModel = "http://iec.ch/TC57/CIM100#FullModel";
}

cim_model::cim_enum! {
    /// Phase codes
    pub enum PhaseCode = "http://iec.ch/TC57/CIM100#PhaseCode" {
        A => "A",
        B => "B",
        C => "C",
        N => "N",
        Abc => "ABC",
        Abcn => "ABCN",
    }
}

fn read<V: FromValue>(doc: &Document, oid: &Oid, key: &str) -> Result<Option<V>, ModelError> {
    doc.get_object(oid)
        .ok_or_else(|| ModelError::NotFound(oid.clone()))?
        .get_attribute(key)
}

/// Accessors shared by every `IdentifiedObject` handle
pub trait Identified: TypedObject {
    fn name(&self, doc: &Document) -> Result<Option<String>, ModelError> {
        read(doc, self.oid(), "name")
    }

    fn set_name(&self, doc: &mut Document, name: &str) -> Result<(), ModelError> {
        doc.typed_mut(self)?.set_attribute("name", name)?;
        Ok(())
    }
}

impl Identified for Substation {}
impl Identified for VoltageLevel {}
impl Identified for BaseVoltage {}
impl Identified for Breaker {}
impl Identified for Terminal {}
impl Identified for Asset {}
impl Identified for Location {}
impl Identified for GeographicalRegion {}
impl Identified for SubGeographicalRegion {}

impl Substation {
    pub fn voltage_levels(&self, doc: &Document) -> Result<Vec<VoltageLevel>, ModelError> {
        doc.get_assoc_1tom_typed(self.oid(), "VoltageLevels")
    }

    pub fn add_to_voltage_levels(&self, doc: &mut Document, level: &VoltageLevel) -> Result<(), ModelError> {
        doc.typed_mut(self)?.add_assoc_1tom("VoltageLevels", level.oid())?;
        Ok(())
    }

    pub fn region(&self, doc: &Document) -> Result<Option<SubGeographicalRegion>, ModelError> {
        doc.get_assoc_1to1_typed(self.oid(), "Region")
    }
}

impl VoltageLevel {
    pub fn substation(&self, doc: &Document) -> Result<Option<Substation>, ModelError> {
        doc.get_assoc_1to1_typed(self.oid(), "Substation")
    }

    pub fn base_voltage(&self, doc: &Document) -> Result<Option<BaseVoltage>, ModelError> {
        doc.get_assoc_1to1_typed(self.oid(), "BaseVoltage")
    }

    pub fn set_base_voltage(&self, doc: &mut Document, base: &BaseVoltage) -> Result<(), ModelError> {
        doc.typed_mut(self)?.set_assoc_1to1("BaseVoltage", base.oid())?;
        Ok(())
    }
}

impl BaseVoltage {
    pub fn nominal_voltage(&self, doc: &Document) -> Result<Option<f64>, ModelError> {
        read(doc, self.oid(), "nominalVoltage")
    }

    pub fn set_nominal_voltage(&self, doc: &mut Document, kv: f64) -> Result<(), ModelError> {
        doc.typed_mut(self)?.set_attribute("nominalVoltage", kv)?;
        Ok(())
    }

    pub fn voltage_levels(&self, doc: &Document) -> Result<Vec<VoltageLevel>, ModelError> {
        doc.get_assoc_1tom_typed(self.oid(), "VoltageLevel")
    }
}

impl Breaker {
    pub fn normal_open(&self, doc: &Document) -> Result<Option<bool>, ModelError> {
        read(doc, self.oid(), "normalOpen")
    }

    pub fn terminals(&self, doc: &Document) -> Result<Vec<Terminal>, ModelError> {
        doc.get_assoc_1tom_typed(self.oid(), "Terminals")
    }

    pub fn add_to_terminals(&self, doc: &mut Document, terminal: &Terminal) -> Result<(), ModelError> {
        doc.typed_mut(self)?.add_assoc_1tom("Terminals", terminal.oid())?;
        Ok(())
    }

    pub fn container(&self, doc: &Document) -> Result<Option<Oid>, ModelError> {
        Ok(doc
            .get_assoc_1to1_object(self.oid(), "EquipmentContainer")?
            .map(|obj| obj.oid().clone()))
    }
}

impl Terminal {
    pub fn phases(&self, doc: &Document) -> Result<Option<PhaseCode>, ModelError> {
        doc.get_object(self.oid())
            .ok_or_else(|| ModelError::NotFound(self.oid().clone()))?
            .get_enum("phases")
    }

    pub fn set_phases(&self, doc: &mut Document, phases: PhaseCode) -> Result<(), ModelError> {
        doc.typed_mut(self)?.set_enum("phases", phases)?;
        Ok(())
    }

    pub fn conducting_equipment(&self, doc: &Document) -> Result<Option<Oid>, ModelError> {
        Ok(doc
            .get_assoc_1to1_object(self.oid(), "ConductingEquipment")?
            .map(|obj| obj.oid().clone()))
    }
}

impl Asset {
    pub fn power_system_resources(&self, doc: &Document) -> Result<Vec<Oid>, ModelError> {
        doc.get_object(self.oid())
            .ok_or_else(|| ModelError::NotFound(self.oid().clone()))?
            .get_assoc_1tom("PowerSystemResources")
    }
}

/// Objects created by [`build_sample_network`]
#[derive(Debug, Clone)]
pub struct SampleNetwork {
    pub substation: Substation,
    pub voltage_level: VoltageLevel,
    pub base_voltage: BaseVoltage,
    pub breaker: Breaker,
    pub terminals: Vec<Terminal>,
    pub asset: Asset,
}

/// Substation with one 110 kV level, a breaker with two terminals and an asset
pub fn build_sample_network(doc: &mut Document) -> Result<SampleNetwork, ModelError> {
    let substation: Substation = doc.create_typed(oid("sub-1"))?;
    let voltage_level: VoltageLevel = doc.create_typed(oid("vl-110"))?;
    let base_voltage: BaseVoltage = doc.create_typed(oid("bv-110"))?;
    let breaker: Breaker = doc.create_typed(oid("brk-1"))?;
    let asset: Asset = doc.create_typed(oid("asset-1"))?;

    substation.set_name(doc, "North")?;
    voltage_level.set_name(doc, "North 110")?;
    base_voltage.set_nominal_voltage(doc, 110.0)?;
    substation.add_to_voltage_levels(doc, &voltage_level)?;
    voltage_level.set_base_voltage(doc, &base_voltage)?;

    doc.typed_mut(&breaker)?
        .set_attribute("name", "Q1")?
        .set_attribute("normalOpen", false)?
        .set_assoc_1to1("EquipmentContainer", voltage_level.oid())?;

    let mut terminals = Vec::new();
    for (id, sequence) in [("t-1", 1_i64), ("t-2", 2)] {
        let terminal: Terminal = doc.create_typed(oid(id))?;
        doc.typed_mut(&terminal)?
            .set_attribute("sequenceNumber", Value::Integer(sequence))?;
        terminal.set_phases(doc, PhaseCode::Abc)?;
        breaker.add_to_terminals(doc, &terminal)?;
        terminals.push(terminal);
    }

    doc.typed_mut(&asset)?
        .set_attribute("name", "Breaker asset")?
        .add_assoc_1tom("PowerSystemResources", breaker.oid())?;

    Ok(SampleNetwork {
        substation,
        voltage_level,
        base_voltage,
        breaker,
        terminals,
        asset,
    })
}

/// Collect every event the document emits from now on
pub fn record_events(doc: &mut Document) -> Arc<Mutex<Vec<ChangeEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    doc.subscribe(Arc::new(move |event: &ChangeEvent| sink.lock().push(event.clone())));
    events
}

/// Panic unless every bidirectional link is mirrored by its inverse
pub fn assert_symmetric(doc: &Document) {
    let schema = doc.schema();
    for obj in doc.get_all_objects() {
        for (uri, link) in obj.links() {
            let property = obj.class().property(uri).unwrap();
            let Some(inverse) = schema.inverse_of(property) else {
                continue;
            };
            for target in link.targets() {
                let other = doc
                    .get_object(target)
                    .unwrap_or_else(|| panic!("{} links missing {target}", obj.oid()));
                let mirrored = other
                    .links()
                    .find(|(p, _)| &***p == inverse.uri())
                    .is_some_and(|(_, l)| l.contains(obj.oid()));
                assert!(
                    mirrored,
                    "{}.{} -> {target} has no inverse {}",
                    obj.oid(),
                    property.name(),
                    inverse.name()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_schema_builds_and_round_trips_json() {
        let schema = fixture_schema();
        assert!(schema.class(&cim("Breaker")).unwrap().is_subclass_of(&cim("Equipment")));

        let reloaded = Schema::from_json(fixture_schema_json().as_bytes()).unwrap();
        assert_eq!(reloaded.class_count(), schema.class_count());
    }

    #[test]
    fn sample_network_is_symmetric() {
        let mut doc = fixture_document();
        let net = build_sample_network(&mut doc).unwrap();
        assert_symmetric(&doc);
        assert_eq!(net.breaker.terminals(&doc).unwrap().len(), 2);
        assert_eq!(net.voltage_level.substation(&doc).unwrap(), Some(net.substation.clone()));
        assert_eq!(net.terminals[0].phases(&doc).unwrap(), Some(PhaseCode::Abc));
    }
}
