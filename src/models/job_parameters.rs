//! # Job Parameters
//!
//! Typed, immutable parameters for a job launch.
//!
//! Every parameter carries an `identifying` flag. The identifying subset defines
//! the job instance: two launches with equal identifying parameters are the same
//! logical run, which is how duplicate runs are rejected and failed runs resumed.
//! Non-identifying parameters (labels, informational metadata) travel with the
//! execution but never influence that decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Typed job parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum JobParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl JobParameterValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Date(_) => "date",
        }
    }
}

impl fmt::Display for JobParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => f.write_str(value),
            Self::Long(value) => write!(f, "{value}"),
            Self::Double(value) => write!(f, "{value:?}"),
            Self::Date(value) => f.write_str(&value.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: JobParameterValue,
    pub identifying: bool,
}

impl JobParameter {
    pub fn identifying(value: JobParameterValue) -> Self {
        Self {
            value,
            identifying: true,
        }
    }

    pub fn non_identifying(value: JobParameterValue) -> Self {
        Self {
            value,
            identifying: false,
        }
    }
}

/// Immutable set of job parameters
///
/// Equality only considers identifying parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key).map(|p| &p.value) {
            Some(JobParameterValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key).map(|p| &p.value) {
            Some(JobParameterValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key).map(|p| &p.value) {
            Some(JobParameterValue::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.get(key).map(|p| &p.value) {
            Some(JobParameterValue::Date(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.parameters.iter()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// The identifying subset of these parameters
    pub fn identifying_parameters(&self) -> JobParameters {
        JobParameters {
            parameters: self
                .parameters
                .iter()
                .filter(|(_, p)| p.identifying)
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
        }
    }

    /// Deterministic key of the identifying subset, used to look up job instances
    ///
    /// Keys are emitted in sorted order so that insertion order never matters.
    pub fn job_key(&self) -> String {
        self.parameters
            .iter()
            .filter(|(_, p)| p.identifying)
            .map(|(k, p)| format!("{k}={}:{}", p.value.type_name(), p.value))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Merge `other` on top of `self`; entries in `other` win
    pub fn merged_with(&self, other: &JobParameters) -> JobParameters {
        let mut parameters = self.parameters.clone();
        for (key, parameter) in &other.parameters {
            parameters.insert(key.clone(), parameter.clone());
        }
        JobParameters { parameters }
    }
}

impl PartialEq for JobParameters {
    fn eq(&self, other: &Self) -> bool {
        self.identifying_parameters().parameters == other.identifying_parameters().parameters
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .parameters
            .iter()
            .map(|(k, p)| {
                if p.identifying {
                    format!("{k}={}", p.value)
                } else {
                    format!("{k}={} (non-identifying)", p.value)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{{rendered}}}")
    }
}

/// Builder for [`JobParameters`]
///
/// Parameters added without an explicit flag are identifying.
#[derive(Debug, Clone, Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parameters(parameters: &JobParameters) -> Self {
        Self {
            parameters: parameters.parameters.clone(),
        }
    }

    pub fn add_parameter(mut self, key: impl Into<String>, parameter: JobParameter) -> Self {
        self.parameters.insert(key.into(), parameter);
        self
    }

    pub fn add_string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_string_with(key, value, true)
    }

    pub fn add_string_with(
        self,
        key: impl Into<String>,
        value: impl Into<String>,
        identifying: bool,
    ) -> Self {
        self.add_value(key, JobParameterValue::String(value.into()), identifying)
    }

    pub fn add_long(self, key: impl Into<String>, value: i64) -> Self {
        self.add_value(key, JobParameterValue::Long(value), true)
    }

    pub fn add_long_with(self, key: impl Into<String>, value: i64, identifying: bool) -> Self {
        self.add_value(key, JobParameterValue::Long(value), identifying)
    }

    pub fn add_double(self, key: impl Into<String>, value: f64) -> Self {
        self.add_value(key, JobParameterValue::Double(value), true)
    }

    pub fn add_date(self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.add_value(key, JobParameterValue::Date(value), true)
    }

    fn add_value(
        mut self,
        key: impl Into<String>,
        value: JobParameterValue,
        identifying: bool,
    ) -> Self {
        self.parameters
            .insert(key.into(), JobParameter { value, identifying });
        self
    }

    pub fn to_job_parameters(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}
