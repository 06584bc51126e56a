//! Schema and run-metadata types shared by taps, mappers, sinks and jobs

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;

/// Metadata column names, in the order they are appended to a schema.
pub const SOURCE_ENV_COLUMN: &str = "_inbound__source_env";
pub const RUN_ID_COLUMN: &str = "_inbound__run_id";
pub const JOB_NAME_COLUMN: &str = "_inbound__job_name";
pub const VERSION_COLUMN: &str = "_inbound__version";
pub const LOAD_TIME_COLUMN: &str = "_inbound__load_time";

/// Column holding the whole source row as one JSON document in raw mode.
pub const RAW_COLUMN: &str = "_inbound__raw";

/// Width of the metadata string columns.
const METADATA_VARCHAR_PRECISION: i64 = 200;

/// One column's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Description {
    pub name: String,
    /// Destination-agnostic type tag, e.g. "number" or "<DbType DB_TYPE_VARCHAR>"
    #[serde(rename = "type")]
    pub data_type: String,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
    pub nullable: bool,
}

impl Description {
    /// A nullable column without precision or scale
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            precision: None,
            scale: None,
            nullable: true,
        }
    }

    pub fn with_precision(mut self, precision: i64) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_scale(mut self, scale: i64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// The `variant` column that carries a JSON copy of each row in raw mode
    pub fn raw() -> Self {
        Self::new(RAW_COLUMN, "variant").with_nullable(false)
    }
}

/// A single cell of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numeric kept in its textual form
    Decimal(String),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// Textual timestamp layout used in staging files and JSON documents.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

impl Value {
    /// Render the value as a delimited-text field; null becomes an empty field.
    pub fn to_field(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Decimal(d) => d.clone(),
            Value::Text(s) => s.clone(),
            Value::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Decimal(d) => serializer.serialize_str(d),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Timestamp(ts) => serializer.collect_str(&ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            other => serde_json::Value::String(other.to_field()),
        }
    }
}

/// Fixed-arity tuple matching the column order of its schema.
pub type Row = Vec<Value>;

/// Unit of transfer between a tap and a sink.
pub type RowBatch = Vec<Row>;

/// One highwatermark bookmark: column name to value.
pub type HighwatermarkRow = BTreeMap<String, serde_json::Value>;

/// Provenance of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub load_time: DateTime<Utc>,
    pub source_env: String,
    pub run_id: String,
    pub job_name: String,
    pub version: String,
}

impl Metadata {
    /// Metadata stamped with the current time and this crate's version
    pub fn new(
        source_env: impl Into<String>,
        run_id: impl Into<String>,
        job_name: impl Into<String>,
    ) -> Self {
        Self {
            load_time: Utc::now(),
            source_env: source_env.into(),
            run_id: run_id.into(),
            job_name: job_name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_load_time(mut self, load_time: DateTime<Utc>) -> Self {
        self.load_time = load_time;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Synthetic columns appended to every enriched schema.
    ///
    /// The order here is the order of [`Metadata::values`].
    pub fn descriptions(&self) -> Vec<Description> {
        let varchar = |name: &str| {
            Description::new(name, "varchar")
                .with_precision(METADATA_VARCHAR_PRECISION)
                .with_nullable(false)
        };

        vec![
            varchar(SOURCE_ENV_COLUMN),
            varchar(RUN_ID_COLUMN),
            varchar(JOB_NAME_COLUMN),
            varchar(VERSION_COLUMN),
            Description::new(LOAD_TIME_COLUMN, "timestamp").with_nullable(false),
        ]
    }

    /// Cell values for the metadata columns
    pub fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.source_env.clone()),
            Value::Text(self.run_id.clone()),
            Value::Text(self.job_name.clone()),
            Value::Text(self.version.clone()),
            Value::Timestamp(self.load_time),
        ]
    }
}

/// Statistics for one staging-file cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    /// 0-based sequence number
    pub number: usize,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub rows: usize,
    /// Bytes in the staging file when it was closed
    pub size_bytes: u64,
}

/// Outcome of one `Job::run`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRunSummary {
    pub tap: String,
    pub sink: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub columns: Vec<String>,
    pub batches: Vec<BatchResult>,
}

impl JobRunSummary {
    /// Rows handed to the sink across all batches
    pub fn total_rows(&self) -> usize {
        self.batches.iter().map(|b| b.rows).sum()
    }
}

/// A row serialized as a JSON object keyed by column name, in column order.
pub(crate) struct NamedRow<'a> {
    pub names: &'a [String],
    pub values: &'a [Value],
}

impl Serialize for NamedRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.names.iter().zip(self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
