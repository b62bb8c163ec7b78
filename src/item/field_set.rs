//! # Field Sets and Records
//!
//! A [`FieldSet`] is one tokenized input line with named columns. A
//! [`FieldSetMapper`] turns it into a domain value; [`RecordMapper`] is the
//! configuration-driven mapper that produces a generic [`Record`] from a list
//! of [`FieldSpec`]s, so the record schema stays data rather than code.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

use super::{ItemError, ItemResult};

/// One tokenized input line with its column names
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    names: Arc<[String]>,
    values: Vec<String>,
}

impl FieldSet {
    pub fn new(names: Arc<[String]>, values: Vec<String>) -> Self {
        Self { names, values }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn index_of(&self, name: &str) -> ItemResult<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ItemError::invalid(format!("no field named '{name}'")))
    }

    /// Raw, untrimmed value
    pub fn read_raw(&self, name: &str) -> ItemResult<&str> {
        let index = self.index_of(name)?;
        self.values
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| ItemError::invalid(format!("field '{name}' missing from line")))
    }

    pub fn read_string(&self, name: &str) -> ItemResult<String> {
        Ok(self.read_raw(name)?.trim().to_string())
    }

    pub fn read_i64(&self, name: &str) -> ItemResult<i64> {
        let raw = self.read_raw(name)?.trim();
        raw.parse()
            .map_err(|_| ItemError::invalid(format!("field '{name}': '{raw}' is not an integer")))
    }

    pub fn read_f64(&self, name: &str) -> ItemResult<f64> {
        let raw = self.read_raw(name)?.trim();
        raw.parse()
            .map_err(|_| ItemError::invalid(format!("field '{name}': '{raw}' is not a number")))
    }

    pub fn read_char(&self, name: &str) -> ItemResult<char> {
        let raw = self.read_raw(name)?.trim();
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(ItemError::invalid(format!(
                "field '{name}': '{raw}' is not a single character"
            ))),
        }
    }

    pub fn read_date(&self, name: &str, format: &str) -> ItemResult<NaiveDate> {
        let raw = self.read_raw(name)?.trim();
        NaiveDate::parse_from_str(raw, format).map_err(|e| {
            ItemError::invalid(format!("field '{name}': '{raw}' is not a {format} date: {e}"))
        })
    }
}

/// Maps a tokenized line to a domain value
pub trait FieldSetMapper<T>: Send + Sync {
    fn map_field_set(&self, field_set: &FieldSet) -> ItemResult<T>;
}

impl<T, F> FieldSetMapper<T> for F
where
    F: Fn(&FieldSet) -> ItemResult<T> + Send + Sync,
{
    fn map_field_set(&self, field_set: &FieldSet) -> ItemResult<T> {
        self(field_set)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Long,
    Double,
    Char,
    Date,
}

/// Column declaration: name in file order and the type to parse it as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: FieldType,
    /// An empty value becomes `NULL` instead of a parse error
    #[serde(default)]
    pub nullable: bool,
}

fn default_field_type() -> FieldType {
    FieldType::String
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Long(i64),
    Double(f64),
    Char(char),
    Date(NaiveDate),
    /// Missing value of a declared column type, so sinks can bind a typed NULL
    #[serde(serialize_with = "serialize_null", deserialize_with = "deserialize_null")]
    Null(FieldType),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }
}

fn serialize_null<S: Serializer>(_: &FieldType, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_none()
}

// serialized nulls carry no type
fn deserialize_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FieldType, D::Error> {
    <()>::deserialize(deserializer).map(|()| FieldType::String)
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(v) => f.write_str(v),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Char(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{v}"),
            Self::Null(_) => f.write_str("null"),
        }
    }
}

/// Generic record: typed values in declared field order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(FieldValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

/// Named bind parameters for a SQL statement
pub trait SqlParameterSource {
    fn sql_parameter(&self, name: &str) -> Option<FieldValue>;
}

impl SqlParameterSource for Record {
    fn sql_parameter(&self, name: &str) -> Option<FieldValue> {
        self.get(name).cloned()
    }
}

/// Configuration-driven mapper from a [`FieldSet`] to a [`Record`]
#[derive(Debug, Clone)]
pub struct RecordMapper {
    specs: Vec<FieldSpec>,
    date_format: String,
}

impl RecordMapper {
    pub fn new(specs: Vec<FieldSpec>, date_format: impl Into<String>) -> Self {
        Self {
            specs,
            date_format: date_format.into(),
        }
    }
}

impl FieldSetMapper<Record> for RecordMapper {
    fn map_field_set(&self, field_set: &FieldSet) -> ItemResult<Record> {
        let mut record = Record::new();
        // without a schema every column is text
        if self.specs.is_empty() {
            for name in field_set.names() {
                record.insert(name.clone(), FieldValue::Text(field_set.read_string(name)?));
            }
            return Ok(record);
        }
        for spec in &self.specs {
            let raw = field_set.read_raw(&spec.name)?;
            if spec.nullable && raw.trim().is_empty() {
                record.insert(spec.name.clone(), FieldValue::Null(spec.field_type));
                continue;
            }
            let value = match spec.field_type {
                FieldType::String => FieldValue::Text(field_set.read_string(&spec.name)?),
                FieldType::Long => FieldValue::Long(field_set.read_i64(&spec.name)?),
                FieldType::Double => FieldValue::Double(field_set.read_f64(&spec.name)?),
                FieldType::Char => FieldValue::Char(field_set.read_char(&spec.name)?),
                FieldType::Date => {
                    FieldValue::Date(field_set.read_date(&spec.name, &self.date_format)?)
                }
            };
            record.insert(spec.name.clone(), value);
        }
        Ok(record)
    }
}
