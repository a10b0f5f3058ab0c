//! Attribute values
//!
//! - [`Value`]: tagged attribute value covering the CIM primitive datatypes,
//!   compound records and enumeration literals
//! - [`FromValue`]: typed extraction used by `get_attribute::<T>()`
//! - [`CimEnum`]: host enums bound to a schema enumeration class
//! - Lexical forms for literal serialization

use crate::error::ModelError;
use crate::schema::{local_name, short_name, DataType};
use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// Attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Boolean(bool),
    /// Signed integer
    Integer(i64),
    /// Floating point
    Float(f64),
    /// Text
    String(String),
    /// UTC timestamp
    DateTime(DateTime<Utc>),
    /// Compound record
    Compound(CompoundValue),
    /// Enumeration literal
    Enum(EnumValue),
}

impl Value {
    /// Datatype family name, for diagnostics
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "Boolean",
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::Compound(_) => "Compound",
            Self::Enum(_) => "Enum",
        }
    }

    /// Check value shape against a declared datatype
    ///
    /// Compound and enum class identity is checked by the caller, which has
    /// the schema at hand.
    #[must_use]
    pub fn datatype_matches(&self, datatype: &DataType) -> bool {
        matches!(
            (self, datatype),
            (Self::Boolean(_), DataType::Boolean)
                | (Self::Integer(_), DataType::Integer)
                | (Self::Float(_), DataType::Float)
                | (Self::String(_), DataType::String)
                | (Self::DateTime(_), DataType::DateTime)
                | (Self::Compound(_), DataType::Compound(_))
                | (Self::Enum(_), DataType::Enum(_))
        )
    }

    /// Lexical form for literal serialization
    ///
    /// Enum values render as their individual URI. Compounds have no
    /// lexical form.
    #[must_use]
    pub fn to_lexical(&self) -> Option<String> {
        Some(match self {
            Self::Boolean(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => float_lexical(*f),
            Self::String(s) => s.clone(),
            Self::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Self::Enum(e) => e.uri().to_string(),
            Self::Compound(_) => return None,
        })
    }

    /// Parse a lexical form according to a declared datatype
    ///
    /// # Errors
    /// Returns [`ModelError::SerializationFormat`] if the text is not a valid
    /// lexical form for `datatype`
    pub fn parse_lexical(datatype: &DataType, text: &str) -> Result<Self, ModelError> {
        let invalid = || ModelError::format(format!("invalid {datatype} literal '{text}'"));
        match datatype {
            DataType::Boolean => match text.trim() {
                "true" | "1" => Ok(Self::Boolean(true)),
                "false" | "0" => Ok(Self::Boolean(false)),
                _ => Err(invalid()),
            },
            DataType::Integer => text.trim().parse().map(Self::Integer).map_err(|_| invalid()),
            DataType::Float => parse_float(text.trim()).map(Self::Float).ok_or_else(invalid),
            DataType::String => Ok(Self::String(text.to_string())),
            DataType::DateTime => DateTime::parse_from_rfc3339(text.trim())
                .map(|dt| Self::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| invalid()),
            DataType::Enum(_) => Ok(Self::Enum(EnumValue::new(text.trim()))),
            DataType::Compound(_) => Err(invalid()),
        }
    }
}

fn float_lexical(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f.is_sign_positive() { "INF" } else { "-INF" }.to_string()
    } else {
        f.to_string()
    }
}

fn parse_float(text: &str) -> Option<f64> {
    match text {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => text.parse().ok(),
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compound(c) => Display::fmt(c, f),
            Self::Enum(e) => f.write_str(e.name()),
            other => f.write_str(&other.to_lexical().unwrap_or_default()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl From<CompoundValue> for Value {
    fn from(v: CompoundValue) -> Self {
        Self::Compound(v)
    }
}

impl From<EnumValue> for Value {
    fn from(v: EnumValue) -> Self {
        Self::Enum(v)
    }
}

/// Compound record value: field property URI → value
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundValue {
    class: Arc<str>,
    fields: IndexMap<Arc<str>, Value>,
}

impl CompoundValue {
    /// Create empty record of a compound class
    #[must_use]
    pub fn new(class: impl Into<Arc<str>>) -> Self {
        Self {
            class: class.into(),
            fields: IndexMap::new(),
        }
    }

    /// Compound class URI
    #[inline]
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Field value by property URI
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a field without schema checks
    ///
    /// Use [`crate::ObjectMut::set_compound_field`] for a validated update.
    pub fn insert(&mut self, field: impl Into<Arc<str>>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Remove a field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.shift_remove(field)
    }

    /// Fields in insertion order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (&**k, v))
    }

    /// Check if no field is set
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Display for CompoundValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", local_name(&self.class))?;
        for (i, (field, value)) in self.fields.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{}: {value}", short_name(field))?;
        }
        f.write_str(" }")
    }
}

/// Enumeration literal value, identified by its individual URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    individual: Arc<str>,
}

impl EnumValue {
    /// Wrap an individual URI
    #[inline]
    #[must_use]
    pub fn new(individual: impl Into<Arc<str>>) -> Self {
        Self {
            individual: individual.into(),
        }
    }

    /// Individual URI (`…#PhaseCode.ABC`)
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.individual
    }

    /// Literal name (`ABC`)
    #[must_use]
    pub fn name(&self) -> &str {
        let local = local_name(&self.individual);
        local.rsplit_once('.').map_or(local, |(_, name)| name)
    }

    /// Convert to a host enum if the literal belongs to it
    #[must_use]
    pub fn to_enum<E: CimEnum>(&self) -> Option<E> {
        self.individual
            .strip_prefix(E::ENUM_URI)
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(E::from_literal)
    }
}

impl<E: CimEnum> From<E> for EnumValue {
    fn from(value: E) -> Self {
        Self::new(value.individual_uri())
    }
}

/// Host enum bound to a schema enumeration class
///
/// Individuals are named `<ENUM_URI>.<literal>`.
pub trait CimEnum: Sized + Copy + 'static {
    /// Enumeration class URI
    const ENUM_URI: &'static str;

    /// Every variant, in declaration order
    const VARIANTS: &'static [Self];

    /// Literal name of this variant
    fn literal(self) -> &'static str;

    /// Variant for a literal name
    fn from_literal(name: &str) -> Option<Self>;

    /// Individual URI of this variant
    fn individual_uri(self) -> String {
        format!("{}.{}", Self::ENUM_URI, self.literal())
    }
}

/// Typed extraction from a [`Value`]
pub trait FromValue: Sized {
    /// Expected datatype family, for diagnostics
    const EXPECTED: &'static str;

    /// Extract if the value has the right shape
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! from_value {
    ($ty:ty, $name:literal, $variant:ident) => {
        impl FromValue for $ty {
            const EXPECTED: &'static str = $name;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

from_value!(bool, "Boolean", Boolean);
from_value!(i64, "Integer", Integer);
from_value!(f64, "Float", Float);
from_value!(String, "String", String);
from_value!(DateTime<Utc>, "DateTime", DateTime);
from_value!(CompoundValue, "Compound", Compound);
from_value!(EnumValue, "Enum", Enum);

impl FromValue for i32 {
    const EXPECTED: &'static str = "Integer";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(v) => Self::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    const EXPECTED: &'static str = "Float";

    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(v) => Some(*v as f32),
            _ => None,
        }
    }
}

impl FromValue for Value {
    const EXPECTED: &'static str = "any";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}
