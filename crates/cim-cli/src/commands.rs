//! Subcommand implementations

use crate::{ModelArgs, OidScheme, OutputArgs};
use anyhow::{bail, Context, Result};
use cim_model::{
    Document, OidFactory, ReadOptions, Schema, Serializer, TextOidFactory, UuidOidFactory,
    WriteOptions,
};
use cim_serializer::SerializerRegistry;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const DEFAULT_TEXT_NAMESPACE: &str = "urn:cim:";

impl ModelArgs {
    fn read_options(&self) -> ReadOptions {
        ReadOptions::default().with_skip_unknown(self.skip_unknown)
    }

    fn oid_factory(&self) -> Arc<dyn OidFactory> {
        match (self.oids, &self.namespace) {
            (OidScheme::Uuid, None) => Arc::new(UuidOidFactory::new()),
            (OidScheme::Uuid, Some(ns)) => Arc::new(UuidOidFactory::with_namespace(ns.as_str())),
            (OidScheme::Text, ns) => Arc::new(TextOidFactory::new(
                ns.as_deref().unwrap_or(DEFAULT_TEXT_NAMESPACE),
            )),
        }
    }

    fn empty_document(&self) -> Result<Document> {
        let file = File::open(&self.schema)
            .with_context(|| format!("opening schema {}", self.schema.display()))?;
        let schema = Schema::from_json(file)
            .with_context(|| format!("loading schema {}", self.schema.display()))?;
        info!(classes = schema.class_count(), "schema loaded");
        Ok(Document::new(Arc::new(schema), self.oid_factory()))
    }

    fn load(&self, registry: &SerializerRegistry, path: &Path) -> Result<Document> {
        let mut doc = self.empty_document()?;
        let codec = codec_for(registry, path)?;
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        doc.parse_with(&text, codec.as_ref(), &self.read_options())
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(doc)
    }
}

impl OutputArgs {
    fn write_options(&self) -> WriteOptions {
        WriteOptions::default()
            .with_inverse_links(!self.no_inverse)
            .with_sort_by_oid(self.sort)
            .with_pretty(!self.compact)
    }
}

fn codec_for(registry: &SerializerRegistry, path: &Path) -> Result<Arc<dyn Serializer>> {
    match registry.find_for_path(path) {
        Some(codec) => Ok(Arc::clone(codec)),
        None => bail!(
            "no codec for {} (known extensions: {})",
            path.display(),
            registry.all_extensions().join(", ")
        ),
    }
}

fn save(doc: &Document, registry: &SerializerRegistry, output: &OutputArgs, path: &Path) -> Result<()> {
    let codec = codec_for(registry, path)?;
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    doc.save_with(&mut out, codec.as_ref(), &output.write_options())
        .with_context(|| format!("writing {}", path.display()))?;
    out.flush()?;
    info!(objects = doc.len(), path = %path.display(), "model written");
    Ok(())
}

/// Print the object count of every class present in the model
pub(crate) fn stats(model: &ModelArgs, input: &Path, json: bool) -> Result<()> {
    let registry = SerializerRegistry::default_serializers();
    let doc = model.load(&registry, input)?;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for obj in doc.get_all_objects() {
        *counts.entry(doc.schema().compact(obj.class_uri())).or_default() += 1;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if json {
        let report = serde_json::json!({ "objects": doc.len(), "classes": counts });
        serde_json::to_writer_pretty(&mut out, &report)?;
        writeln!(out)?;
    } else {
        writeln!(out, "Objects: {}", doc.len())?;
        for (class, count) in &counts {
            writeln!(out, "  {class}: {count}")?;
        }
    }
    Ok(())
}

/// Re-encode `input` into `output_path`
pub(crate) fn convert(
    model: &ModelArgs,
    output: &OutputArgs,
    input: &Path,
    output_path: &Path,
) -> Result<()> {
    let registry = SerializerRegistry::default_serializers();
    let doc = model.load(&registry, input)?;
    save(&doc, &registry, output, output_path)
}

/// Replay the difference in `diff` onto `base` and write the result
pub(crate) fn diff_apply(
    model: &ModelArgs,
    output: &OutputArgs,
    base: &Path,
    diff: &Path,
    output_path: &Path,
) -> Result<()> {
    let registry = SerializerRegistry::default_serializers();
    let mut doc = model.load(&registry, base)?;
    let before = doc.len();

    let codec = codec_for(&registry, diff)?;
    let text = fs::read_to_string(diff).with_context(|| format!("reading {}", diff.display()))?;
    doc.apply_difference(&text, codec.as_ref())
        .with_context(|| format!("applying {}", diff.display()))?;
    info!(before, after = doc.len(), "difference applied");

    save(&doc, &registry, output, output_path)
}
