//! End-to-end runs of the `cimbios` binary on temporary files

use cim_model::{DifferenceModel, Document, Serializer};
use cim_serializer::{JsonLdSerializer, NTriplesSerializer};
use cim_test_utils::{build_sample_network, cim, fixture_document, fixture_schema_json, oid, TEST_NS};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    schema: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema.json");
        fs::write(&schema, fixture_schema_json()).unwrap();
        Self { dir, schema }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write_model(&self, name: &str, doc: &Document, codec: &dyn Serializer) -> PathBuf {
        let path = self.path(name);
        let mut bytes = Vec::new();
        doc.save(&mut bytes, codec).unwrap();
        fs::write(&path, bytes).unwrap();
        path
    }

    fn run(&self, command: &str, args: &[&Path]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_cimbios"))
            .arg(command)
            .arg("--schema")
            .arg(&self.schema)
            .args(["--oids", "text", "--namespace", TEST_NS])
            .args(args)
            .env_remove("RUST_LOG")
            .output()
            .unwrap()
    }

    fn read(&self, path: &Path, codec: &dyn Serializer) -> Document {
        let mut doc = fixture_document();
        doc.parse(&fs::read_to_string(path).unwrap(), codec).unwrap();
        doc
    }
}

fn sample() -> Document {
    let mut doc = fixture_document();
    build_sample_network(&mut doc).unwrap();
    doc
}

#[test]
fn stats_reports_counts_per_class() {
    let ws = Workspace::new();
    let model = ws.write_model("grid.nt", &sample(), &NTriplesSerializer::new());

    let output = Command::new(env!("CARGO_BIN_EXE_cimbios"))
        .args(["stats", "--json", "--oids", "text", "--namespace", TEST_NS, "--schema"])
        .arg(&ws.schema)
        .arg(&model)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["objects"], 7);
    assert_eq!(report["classes"]["cim:Terminal"], 2);
    assert_eq!(report["classes"]["cim:Substation"], 1);
}

#[test]
fn convert_between_codecs() {
    let ws = Workspace::new();
    let source = sample();
    let input = ws.write_model("grid.nt", &source, &NTriplesSerializer::new());
    let output_path = ws.path("grid.jsonld");

    let output = ws.run("convert", &[&input, &output_path]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let converted = ws.read(&output_path, &JsonLdSerializer::new());
    assert!(converted.is_equivalent(&source));
}

#[test]
fn diff_apply_replays_changes() {
    let ws = Workspace::new();
    let mut doc = sample();
    let base = ws.write_model("base.nt", &doc, &NTriplesSerializer::new());

    let mut diff = DifferenceModel::new();
    diff.subscribe_to_data_model_changes(&mut doc).unwrap();
    doc.remove_object(&oid("t-2")).unwrap();
    doc.create_object(oid("vl-20"), &cim("VoltageLevel"))
        .unwrap()
        .set_assoc_1to1("Substation", &oid("sub-1"))
        .unwrap();
    let diff_path = ws.path("changes.jsonld");
    let mut bytes = Vec::new();
    diff.save(&mut bytes, &JsonLdSerializer::new()).unwrap();
    fs::write(&diff_path, bytes).unwrap();

    let merged = ws.path("merged.nt");
    let output = ws.run("diff-apply", &[&base, &diff_path, &merged]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let result = ws.read(&merged, &NTriplesSerializer::new());
    assert!(result.is_equivalent(&doc));
}

#[test]
fn unknown_extension_fails() {
    let ws = Workspace::new();
    let input = ws.write_model("grid.nt", &sample(), &NTriplesSerializer::new());
    let output_path = ws.path("grid.xml");

    let output = ws.run("convert", &[&input, &output_path]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no codec"));
}

#[test]
fn missing_schema_fails() {
    let ws = Workspace::new();
    let input = ws.write_model("grid.nt", &sample(), &NTriplesSerializer::new());

    let output = Command::new(env!("CARGO_BIN_EXE_cimbios"))
        .args(["stats", "--schema"])
        .arg(ws.path("absent.json"))
        .arg(&input)
        .output()
        .unwrap();
    assert!(!output.status.success());
}
