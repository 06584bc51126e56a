//! Job orchestration: tap → (mapper) → enrichment → sink

use chrono::Utc;
use inbound_common::{InboundError, Result};
use serde::Serialize;
use serde_json::ser::Formatter;
use std::io;
use tracing::{info, instrument};

use crate::models::{Description, HighwatermarkRow, JobRunSummary, Metadata, NamedRow, Row, Value};
use crate::sdk::{Highwatermark, Mapper, RowStream, Sink, Tap};

/// Moves every row of a [`Tap`] into a [`Sink`].
///
/// With metadata the schema gains the five `_inbound__*` provenance columns.
/// In raw mode an `_inbound__raw` column holding the row as a JSON object
/// is inserted before them.
pub struct Job<T, S> {
    tap: T,
    sink: S,
    mapper: Option<Box<dyn Mapper>>,
    metadata: Option<Metadata>,
    raw: bool,
}

impl<T: Tap, S: Sink> Job<T, S> {
    pub fn new(tap: T, sink: S) -> Self {
        Self {
            tap,
            sink,
            mapper: None,
            metadata: None,
            raw: false,
        }
    }

    pub fn with_mapper(mut self, mapper: impl Mapper + 'static) -> Self {
        self.mapper = Some(Box::new(mapper));
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run the job once. Tap and sink errors propagate unchanged.
    #[instrument(skip_all, fields(tap = short_type_name::<T>(), sink = short_type_name::<S>()))]
    pub fn run(&mut self) -> Result<JobRunSummary> {
        let start = self.metadata.as_ref().map_or_else(Utc::now, |m| m.load_time);

        let tap_columns = self.tap.column_descriptions()?;
        let mut columns = match &self.mapper {
            Some(mapper) => tap_columns
                .iter()
                .map(|column| mapper.map(column))
                .collect::<Result<Vec<Description>>>()?,
            None => tap_columns,
        };

        let raw_names = self
            .raw
            .then(|| columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>());
        if self.raw {
            columns.push(Description::raw());
        }
        let metadata_values = match &self.metadata {
            Some(metadata) => {
                columns.extend(metadata.descriptions());
                metadata.values()
            },
            None => Vec::new(),
        };

        let enrichment = Enrichment {
            raw_names,
            metadata: metadata_values,
        };

        let rows = self.tap.data_generator()?;
        let rows = if enrichment.is_noop() {
            rows
        } else {
            enrich_rows(rows, enrichment)
        };

        let batches = self.sink.ingest(rows, &columns)?;

        let summary = JobRunSummary {
            tap: short_type_name::<T>().to_string(),
            sink: short_type_name::<S>().to_string(),
            start,
            stop: Utc::now(),
            columns: columns.into_iter().map(|c| c.name).collect(),
            batches,
        };
        info!(
            batches = summary.batches.len(),
            rows = summary.total_rows(),
            "Job finished"
        );
        Ok(summary)
    }
}

/// Extra fields appended to each source row
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    /// Column names for the raw JSON document; `None` disables raw mode
    pub raw_names: Option<Vec<String>>,
    /// Values appended after the raw column, if any
    pub metadata: Vec<Value>,
}

impl Enrichment {
    fn is_noop(&self) -> bool {
        self.raw_names.is_none() && self.metadata.is_empty()
    }

    /// `row + (raw JSON,)? + metadata`
    pub fn apply(&self, mut row: Row) -> Result<Row> {
        if let Some(names) = &self.raw_names {
            let document = to_python_json(&NamedRow { names, values: &row })?;
            row.push(Value::Text(document));
        }
        row.extend(self.metadata.iter().cloned());
        Ok(row)
    }
}

/// Wrap `rows` so every row passes through `enrichment`.
pub fn enrich_rows<'a>(rows: RowStream<'a>, enrichment: Enrichment) -> RowStream<'a> {
    Box::new(rows.map(move |batch| {
        batch?
            .into_iter()
            .map(|row| enrichment.apply(row))
            .collect()
    }))
}

/// JSON with `", "` and `": "` separators, the layout of Python's `json.dumps`.
struct PythonFormatter;

impl Formatter for PythonFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

fn to_python_json<T: Serialize>(value: &T) -> Result<String> {
    let mut serializer = serde_json::Serializer::with_formatter(Vec::new(), PythonFormatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(serializer.into_inner())
        .map_err(|e| InboundError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Type name without module path or generic arguments
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Run an incremental job, or nothing when there are no highwatermark rows.
///
/// `build` receives the rows and constructs the job; it is not called when
/// the highwatermark returns an empty list.
pub fn run_incremental<H, T, S, F>(highwatermark: &mut H, build: F) -> Result<Option<JobRunSummary>>
where
    H: Highwatermark + ?Sized,
    T: Tap,
    S: Sink,
    F: FnOnce(Vec<HighwatermarkRow>) -> Result<Job<T, S>>,
{
    let rows = highwatermark.generate_query_list()?;
    if rows.is_empty() {
        info!("No highwatermark rows, nothing to extract");
        return Ok(None);
    }

    let mut job = build(rows)?;
    job.run().map(Some)
}
