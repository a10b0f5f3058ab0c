//! N-Triples codec
//!
//! One triple per line:
//! - `rdf:type` first for every subject
//! - Literals typed with XSD datatypes; enum values and references as IRIs
//! - Compound values as blank nodes carrying their own `rdf:type`
//! - Difference tags and cleared properties use the difference vocabulary
//!
//! Comments and blank lines are ignored on read. Errors carry the 1-based
//! line number.

use cim_model::schema::{DataType, XSD_NS};
use cim_model::serializer::{
    ChangeTag, ObjectRecord, PropertyRecord, Serializer, SerializerContext, CHANGE_PREDICATE, NONE_RESOURCE,
};
use cim_model::{CompoundValue, EnumValue, ModelError, Value};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;
use std::sync::Arc;

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Nesting limit for compound blank nodes
const MAX_DEPTH: usize = 32;

static TRIPLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(<[^>]*>|_:[A-Za-z0-9_\-]+)\s+<([^>]*)>\s+(<[^>]*>|_:[A-Za-z0-9_\-]+|"(?:[^"\\]|\\.)*"(?:\^\^<[^>]*>|@[A-Za-z0-9\-]+)?)\s*\.$"#,
    )
    .unwrap()
});

/// Line-based RDF codec
#[derive(Debug, Clone, Copy, Default)]
pub struct NTriplesSerializer;

impl NTriplesSerializer {
    /// Create codec
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Node {
    Iri(String),
    Blank(String),
    Literal(String),
}

#[derive(Debug)]
struct Triple {
    line: usize,
    subject: Node,
    predicate: String,
    object: Node,
}

/// Attach a line number to position-less format errors
fn at_line(line: usize) -> impl Fn(ModelError) -> ModelError {
    move |err| match err {
        ModelError::SerializationFormat { line: None, message } => {
            ModelError::SerializationFormat {
                line: Some(line),
                message,
            }
        }
        other => other,
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(body: &str, line: usize) -> Result<String, ModelError> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(kind @ ('u' | 'U')) => {
                let width = if kind == 'u' { 4 } else { 8 };
                let hex: String = chars.by_ref().take(width).collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == width)
                    .and_then(char::from_u32)
                    .ok_or_else(|| ModelError::format_at(line, format!("bad escape \\{kind}{hex}")))?;
                out.push(decoded);
            }
            other => {
                return Err(ModelError::format_at(
                    line,
                    format!("bad escape \\{}", other.map(String::from).unwrap_or_default()),
                ))
            }
        }
    }
    Ok(out)
}

fn parse_node(text: &str, line: usize) -> Result<Node, ModelError> {
    if let Some(iri) = text.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        return Ok(Node::Iri(iri.to_string()));
    }
    if let Some(label) = text.strip_prefix("_:") {
        return Ok(Node::Blank(label.to_string()));
    }
    let close = text
        .rfind('"')
        .filter(|&close| close > 0)
        .ok_or_else(|| ModelError::format_at(line, "unterminated literal"))?;
    Ok(Node::Literal(unescape(&text[1..close], line)?))
}

fn parse_triples(input: &str) -> Result<Vec<Triple>, ModelError> {
    let mut triples = Vec::new();
    for (index, raw) in input.lines().enumerate() {
        let line = index + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let caps = TRIPLE
            .captures(text)
            .ok_or_else(|| ModelError::format_at(line, format!("malformed triple: {text}")))?;
        triples.push(Triple {
            line,
            subject: parse_node(&caps[1], line)?,
            predicate: caps[2].to_string(),
            object: parse_node(&caps[3], line)?,
        });
    }
    Ok(triples)
}

fn xsd_local(value: &Value) -> &'static str {
    match value {
        Value::Boolean(_) => "boolean",
        Value::Integer(_) => "integer",
        Value::Float(_) => "float",
        Value::DateTime(_) => "dateTime",
        _ => "string",
    }
}

struct TripleWriter<'w> {
    out: &'w mut dyn Write,
    blanks: usize,
}

impl TripleWriter<'_> {
    fn triple(&mut self, subject: &str, predicate: &str, object: &str) -> Result<(), ModelError> {
        writeln!(self.out, "{subject} <{predicate}> {object} .")?;
        Ok(())
    }

    fn value(&mut self, subject: &str, predicate: &str, value: &Value) -> Result<(), ModelError> {
        match value {
            Value::Enum(literal) => self.triple(subject, predicate, &format!("<{}>", literal.uri())),
            Value::Compound(record) => {
                let node = format!("_:c{}", self.blanks);
                self.blanks += 1;
                self.triple(subject, predicate, &node)?;
                self.triple(&node, RDF_TYPE, &format!("<{}>", record.class()))?;
                for (field, field_value) in record.fields() {
                    self.value(&node, field, field_value)?;
                }
                Ok(())
            }
            literal => {
                let lexical = literal.to_lexical().unwrap_or_default();
                let object = format!("\"{}\"^^<{XSD_NS}{}>", escape(&lexical), xsd_local(literal));
                self.triple(subject, predicate, &object)
            }
        }
    }
}

/// Triples grouped by subject, in order of first appearance
struct Graph<'t> {
    subjects: IndexMap<&'t Node, Vec<&'t Triple>>,
}

impl<'t> Graph<'t> {
    fn new(triples: &'t [Triple]) -> Self {
        let mut subjects: IndexMap<&Node, Vec<&Triple>> = IndexMap::new();
        for triple in triples {
            subjects.entry(&triple.subject).or_default().push(triple);
        }
        Self { subjects }
    }

    fn type_of(group: &[&Triple]) -> Result<Option<String>, ModelError> {
        match group.iter().find(|t| t.predicate == RDF_TYPE) {
            None => Ok(None),
            Some(Triple {
                object: Node::Iri(class),
                ..
            }) => Ok(Some(class.clone())),
            Some(triple) => Err(ModelError::format_at(
                triple.line,
                "rdf:type object must be an IRI",
            )),
        }
    }

    fn record(
        &self,
        iri: &str,
        group: &[&Triple],
        ctx: &SerializerContext<'_>,
    ) -> Result<Option<ObjectRecord>, ModelError> {
        let line = group.first().map_or(0, |t| t.line);
        let Some(class) = Self::type_of(group)? else {
            return Err(ModelError::format_at(line, format!("<{iri}> has no rdf:type")));
        };
        if ctx.schema.class(&class).is_none() {
            if ctx.read.skip_unknown {
                tracing::debug!(%iri, %class, "skipping subject of unknown class");
                return Ok(None);
            }
            return Err(ModelError::UnknownClass(class));
        }

        let oid = ctx.oid_factory.from_iri(iri).map_err(at_line(line))?;
        let mut record = ObjectRecord::new(oid, class.as_str());

        for triple in group.iter().filter(|t| t.predicate != RDF_TYPE) {
            if triple.predicate == CHANGE_PREDICATE {
                let Node::Literal(tag) = &triple.object else {
                    return Err(ModelError::format_at(triple.line, "change tag must be a literal"));
                };
                record.change = Some(tag.parse::<ChangeTag>().map_err(at_line(triple.line))?);
                continue;
            }

            let Some(property) = ctx.property_of(&class, &triple.predicate)? else {
                continue;
            };
            let uri = property.uri();
            match property.datatype() {
                Some(datatype) => {
                    let value = match &triple.object {
                        Node::Iri(none) if none == NONE_RESOURCE => None,
                        object => Some(self.value(datatype, object, triple.line, ctx, 0)?),
                    };
                    record.set_attribute(uri, value);
                }
                None => match &triple.object {
                    Node::Iri(none) if none == NONE_RESOURCE => record.clear_references(uri),
                    Node::Iri(target) => {
                        let target = ctx
                            .oid_factory
                            .from_iri(target)
                            .map_err(at_line(triple.line))?;
                        record.push_reference(uri, target);
                    }
                    _ => {
                        return Err(ModelError::format_at(
                            triple.line,
                            format!("{uri} expects an IRI reference"),
                        ))
                    }
                },
            }
        }
        Ok(Some(record))
    }

    fn value(
        &self,
        datatype: &DataType,
        object: &Node,
        line: usize,
        ctx: &SerializerContext<'_>,
        depth: usize,
    ) -> Result<Value, ModelError> {
        match (datatype, object) {
            (DataType::Enum(_), Node::Iri(individual)) => {
                Ok(Value::Enum(EnumValue::new(individual.as_str())))
            }
            (DataType::Compound(class), Node::Blank(label)) => {
                self.compound(class, label, line, ctx, depth)
            }
            (DataType::Enum(_) | DataType::Compound(_), _) | (_, Node::Iri(_) | Node::Blank(_)) => {
                Err(ModelError::format_at(line, format!("expected {datatype} value")))
            }
            (primitive, Node::Literal(text)) => {
                Value::parse_lexical(primitive, text).map_err(at_line(line))
            }
        }
    }

    fn compound(
        &self,
        declared: &str,
        label: &str,
        line: usize,
        ctx: &SerializerContext<'_>,
        depth: usize,
    ) -> Result<Value, ModelError> {
        if depth >= MAX_DEPTH {
            return Err(ModelError::format_at(line, "compound nesting too deep"));
        }
        let group = self
            .subjects
            .get(&Node::Blank(label.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let class = Self::type_of(group)?.unwrap_or_else(|| declared.to_string());
        let meta = ctx
            .schema
            .class(&class)
            .ok_or_else(|| ModelError::UnknownClass(class.clone()))?;

        let mut record = CompoundValue::new(class.as_str());
        for triple in group.iter().filter(|t| t.predicate != RDF_TYPE) {
            let Some(field) = meta.property(&triple.predicate) else {
                if ctx.read.skip_unknown {
                    continue;
                }
                return Err(ModelError::unknown_property(class.as_str(), triple.predicate.as_str()));
            };
            let Some(datatype) = field.datatype() else {
                return Err(ModelError::format_at(
                    triple.line,
                    format!("{} is not a compound field", field.uri()),
                ));
            };
            let value = self.value(datatype, &triple.object, triple.line, ctx, depth + 1)?;
            record.insert(Arc::clone(field.uri_arc()), value);
        }
        Ok(Value::Compound(record))
    }
}

impl Serializer for NTriplesSerializer {
    fn name(&self) -> &'static str {
        "ntriples"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["nt"]
    }

    fn write(
        &self,
        records: &[ObjectRecord],
        ctx: &SerializerContext<'_>,
        out: &mut dyn Write,
    ) -> Result<(), ModelError> {
        let mut writer = TripleWriter { out, blanks: 0 };
        for (index, record) in records.iter().enumerate() {
            if ctx.write.pretty && index > 0 {
                writeln!(writer.out)?;
            }
            let subject = format!("<{}>", record.oid.iri());
            writer.triple(&subject, RDF_TYPE, &format!("<{}>", record.class))?;
            if let Some(change) = record.change {
                writer.triple(&subject, CHANGE_PREDICATE, &format!("\"{change}\""))?;
            }
            for (property, content) in &record.properties {
                match content {
                    PropertyRecord::Attribute(Some(value)) => {
                        writer.value(&subject, property, value)?;
                    }
                    PropertyRecord::References(targets) if !targets.is_empty() => {
                        for target in targets {
                            writer.triple(&subject, property, &format!("<{}>", target.iri()))?;
                        }
                    }
                    _ => writer.triple(&subject, property, &format!("<{NONE_RESOURCE}>"))?,
                }
            }
        }
        Ok(())
    }

    fn read(&self, input: &str, ctx: &SerializerContext<'_>) -> Result<Vec<ObjectRecord>, ModelError> {
        let triples = parse_triples(input)?;
        let graph = Graph::new(&triples);
        let mut records = Vec::new();
        for (subject, group) in &graph.subjects {
            if let Node::Iri(iri) = subject {
                if let Some(record) = graph.record(iri, group, ctx)? {
                    records.push(record);
                }
            }
        }
        tracing::debug!(triples = triples.len(), records = records.len(), "n-triples read");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trip() {
        let text = "line \"one\"\n\ttab \\ end";
        assert_eq!(unescape(&escape(text), 1).unwrap(), text);
        assert_eq!(unescape("\\u00e9", 1).unwrap(), "é");
        assert!(unescape("\\q", 1).is_err());
    }

    #[test]
    fn line_grammar() {
        let input = "# header\n\n<urn:a> <http://x#p> \"v \\\" q\"^^<http://www.w3.org/2001/XMLSchema#string> .\n_:b <http://x#q> <urn:c> .\n";
        let triples = parse_triples(input).unwrap();
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0].line, 3);
        assert_eq!(triples[0].object, Node::Literal("v \" q".to_string()));
        assert_eq!(triples[1].subject, Node::Blank("b".to_string()));
    }

    #[test]
    fn malformed_line_reports_position() {
        let err = parse_triples("<urn:a> <http://x#p> <urn:b> .\n<urn:a> oops\n").unwrap_err();
        assert!(matches!(err, ModelError::SerializationFormat { line: Some(2), .. }));
    }
}
