//! JSON-LD codec
//!
//! Flattened document with an `@context` built from the schema namespaces
//! and a `@graph` of node objects:
//! - `@id` / `@type` per object, properties keyed by compacted property URI
//! - References as `{"@id": …}`, 1:many as arrays
//! - Compounds as nested nodes with their own `@type`
//! - `null` marks a cleared property in a difference

use cim_model::schema::{DataType, Schema};
use cim_model::serializer::{
    ChangeTag, ObjectRecord, PropertyRecord, Serializer, SerializerContext, CHANGE_PREDICATE,
    DIFFERENCE_NS,
};
use cim_model::{CompoundValue, EnumValue, ModelError, Value};
use serde_json::{json, Map, Value as Json};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

/// JSON-LD codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLdSerializer;

impl JsonLdSerializer {
    /// Create codec
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Prefix table used for compaction and expansion
struct Prefixes<'a> {
    schema: &'a Schema,
    extra: HashMap<String, String>,
}

impl<'a> Prefixes<'a> {
    fn for_writing(schema: &'a Schema) -> Self {
        let mut extra = HashMap::new();
        extra.insert("dm".to_string(), DIFFERENCE_NS.to_string());
        Self { schema, extra }
    }

    fn for_reading(schema: &'a Schema, context: Option<&Json>) -> Self {
        let extra = context
            .and_then(Json::as_object)
            .map(|ctx| {
                ctx.iter()
                    .filter_map(|(prefix, ns)| Some((prefix.clone(), ns.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Self { schema, extra }
    }

    fn context(&self) -> Json {
        let mut ctx = Map::new();
        for (prefix, ns) in self.schema.namespaces() {
            ctx.insert(prefix.clone(), Json::String(ns.clone()));
        }
        for (prefix, ns) in &self.extra {
            ctx.insert(prefix.clone(), Json::String(ns.clone()));
        }
        Json::Object(ctx)
    }

    fn compact(&self, uri: &str) -> String {
        self.extra
            .iter()
            .find_map(|(prefix, ns)| uri.strip_prefix(ns.as_str()).map(|l| format!("{prefix}:{l}")))
            .unwrap_or_else(|| self.schema.compact(uri))
    }

    fn expand(&self, curie: &str) -> String {
        curie
            .split_once(':')
            .and_then(|(prefix, local)| self.extra.get(prefix).map(|ns| format!("{ns}{local}")))
            .unwrap_or_else(|| self.schema.expand(curie))
    }
}

fn encode_value(value: &Value, prefixes: &Prefixes<'_>) -> Json {
    match value {
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => json!(i),
        Value::Float(f) if f.is_finite() => json!(f),
        Value::Enum(literal) => json!({ "@id": prefixes.compact(literal.uri()) }),
        Value::Compound(record) => {
            let mut node = Map::new();
            node.insert("@type".into(), Json::String(prefixes.compact(record.class())));
            for (field, field_value) in record.fields() {
                node.insert(prefixes.compact(field), encode_value(field_value, prefixes));
            }
            Json::Object(node)
        }
        other => Json::String(other.to_lexical().unwrap_or_default()),
    }
}

fn decode_value(
    datatype: &DataType,
    json: &Json,
    ctx: &SerializerContext<'_>,
    prefixes: &Prefixes<'_>,
) -> Result<Value, ModelError> {
    let invalid = || ModelError::format(format!("expected {datatype} value, found {json}"));
    let json = json.get("@value").unwrap_or(json);
    match (datatype, json) {
        (DataType::Boolean, Json::Bool(b)) => Ok(Value::Boolean(*b)),
        (DataType::Integer, Json::Number(n)) => n.as_i64().map(Value::Integer).ok_or_else(invalid),
        (DataType::Float, Json::Number(n)) => n.as_f64().map(Value::Float).ok_or_else(invalid),
        (DataType::Enum(_), Json::Object(node)) => {
            let id = node.get("@id").and_then(Json::as_str).ok_or_else(invalid)?;
            Ok(Value::Enum(EnumValue::new(prefixes.expand(id))))
        }
        (DataType::Compound(declared), Json::Object(node)) => {
            let class = node
                .get("@type")
                .and_then(Json::as_str)
                .map_or_else(|| declared.clone(), |t| prefixes.expand(t));
            let meta = ctx
                .schema
                .class(&class)
                .ok_or_else(|| ModelError::UnknownClass(class.clone()))?;
            let mut record = CompoundValue::new(class.as_str());
            for (key, field_json) in node.iter().filter(|(k, _)| !k.starts_with('@')) {
                let uri = prefixes.expand(key);
                let Some(field) = meta.property(&uri) else {
                    if ctx.read.skip_unknown {
                        continue;
                    }
                    return Err(ModelError::unknown_property(class.as_str(), uri));
                };
                let Some(field_type) = field.datatype() else {
                    return Err(ModelError::format(format!("{uri} is not a compound field")));
                };
                let value = decode_value(field_type, field_json, ctx, prefixes)?;
                record.insert(Arc::clone(field.uri_arc()), value);
            }
            Ok(Value::Compound(record))
        }
        (DataType::Enum(_) | DataType::Compound(_), _) => Err(invalid()),
        (primitive, Json::String(text)) => Value::parse_lexical(primitive, text),
        _ => Err(invalid()),
    }
}

fn encode_record(record: &ObjectRecord, prefixes: &Prefixes<'_>) -> Json {
    let mut node = Map::new();
    node.insert("@id".into(), Json::String(record.oid.iri()));
    node.insert("@type".into(), Json::String(prefixes.compact(&record.class)));
    if let Some(change) = record.change {
        node.insert(prefixes.compact(CHANGE_PREDICATE), Json::String(change.to_string()));
    }
    for (property, content) in &record.properties {
        let json = match content {
            PropertyRecord::Attribute(Some(value)) => encode_value(value, prefixes),
            PropertyRecord::Attribute(None) => Json::Null,
            PropertyRecord::References(targets) => match targets.as_slice() {
                [] => Json::Null,
                [one] => json!({ "@id": one.iri() }),
                many => Json::Array(many.iter().map(|t| json!({ "@id": t.iri() })).collect()),
            },
        };
        node.insert(prefixes.compact(property), json);
    }
    Json::Object(node)
}

fn decode_record(
    node: &Json,
    ctx: &SerializerContext<'_>,
    prefixes: &Prefixes<'_>,
) -> Result<Option<ObjectRecord>, ModelError> {
    let node = node
        .as_object()
        .ok_or_else(|| ModelError::format("graph entries must be objects"))?;
    let id = node
        .get("@id")
        .and_then(Json::as_str)
        .ok_or_else(|| ModelError::format("node without @id"))?;
    let class = node
        .get("@type")
        .and_then(Json::as_str)
        .map(|t| prefixes.expand(t))
        .ok_or_else(|| ModelError::format(format!("node {id} without @type")))?;
    if ctx.schema.class(&class).is_none() {
        if ctx.read.skip_unknown {
            tracing::debug!(%id, %class, "skipping node of unknown class");
            return Ok(None);
        }
        return Err(ModelError::UnknownClass(class));
    }

    let mut record = ObjectRecord::new(ctx.oid_factory.from_iri(id)?, class.as_str());
    for (key, json) in node.iter().filter(|(k, _)| !k.starts_with('@')) {
        let uri = prefixes.expand(key);
        if uri == CHANGE_PREDICATE {
            let tag = json
                .as_str()
                .ok_or_else(|| ModelError::format("change tag must be a string"))?;
            record.change = Some(tag.parse::<ChangeTag>()?);
            continue;
        }
        let Some(property) = ctx.property_of(&class, &uri)? else {
            continue;
        };
        let uri = property.uri();
        match property.datatype() {
            Some(_) if json.is_null() => record.set_attribute(uri, None),
            Some(datatype) => {
                let value = decode_value(datatype, json, ctx, prefixes)?;
                record.set_attribute(uri, Some(value));
            }
            None => {
                record.clear_references(uri);
                let targets = match json {
                    Json::Null => Vec::new(),
                    Json::Array(items) => items.iter().collect(),
                    single => vec![single],
                };
                for target in targets {
                    let iri = target
                        .get("@id")
                        .and_then(Json::as_str)
                        .ok_or_else(|| ModelError::format(format!("{uri} expects {{\"@id\": …}}")))?;
                    record.push_reference(uri, ctx.oid_factory.from_iri(&prefixes.expand(iri))?);
                }
            }
        }
    }
    Ok(Some(record))
}

impl Serializer for JsonLdSerializer {
    fn name(&self) -> &'static str {
        "jsonld"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jsonld", "json"]
    }

    fn write(
        &self,
        records: &[ObjectRecord],
        ctx: &SerializerContext<'_>,
        out: &mut dyn Write,
    ) -> Result<(), ModelError> {
        let prefixes = Prefixes::for_writing(ctx.schema);
        let graph: Vec<Json> = records.iter().map(|r| encode_record(r, &prefixes)).collect();
        let document = json!({ "@context": prefixes.context(), "@graph": graph });
        let written = if ctx.write.pretty {
            serde_json::to_writer_pretty(&mut *out, &document)
        } else {
            serde_json::to_writer(&mut *out, &document)
        };
        written.map_err(|e| ModelError::format(e.to_string()))?;
        writeln!(out)?;
        Ok(())
    }

    fn read(&self, input: &str, ctx: &SerializerContext<'_>) -> Result<Vec<ObjectRecord>, ModelError> {
        let document: Json = serde_json::from_str(input)
            .map_err(|e| ModelError::format_at(e.line(), e.to_string()))?;
        let prefixes = Prefixes::for_reading(ctx.schema, document.get("@context"));
        let graph = match &document {
            Json::Array(nodes) => nodes,
            other => other
                .get("@graph")
                .and_then(Json::as_array)
                .ok_or_else(|| ModelError::format("document without @graph"))?,
        };

        let mut records = Vec::with_capacity(graph.len());
        for node in graph {
            if let Some(record) = decode_record(node, ctx, &prefixes)? {
                records.push(record);
            }
        }
        tracing::debug!(records = records.len(), "json-ld read");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cim_model::schema::SchemaBuilder;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .namespace("ex", "http://example.org/cim#")
            .build()
            .unwrap()
    }

    #[test]
    fn prefixes_compact_and_expand() {
        let schema = schema();
        let prefixes = Prefixes::for_writing(&schema);
        assert_eq!(prefixes.compact("http://example.org/cim#Bay"), "ex:Bay");
        assert_eq!(prefixes.compact(CHANGE_PREDICATE), "dm:change");
        assert_eq!(prefixes.expand("dm:change"), CHANGE_PREDICATE);
        assert_eq!(prefixes.expand("urn:uuid:1"), "urn:uuid:1");
    }

    #[test]
    fn non_finite_floats_use_lexical_form() {
        let schema = schema();
        let prefixes = Prefixes::for_writing(&schema);
        assert_eq!(encode_value(&Value::Float(f64::INFINITY), &prefixes), json!("INF"));
        assert_eq!(encode_value(&Value::Float(1.5), &prefixes), json!(1.5));
    }
}
