//! Single-writer CSV sink

use chrono::Utc;
use inbound_common::Result;
use std::io::Write;
use tracing::{debug, instrument};

use super::CountingWriter;
use crate::models::{BatchResult, Description, Value};
use crate::sdk::{RowStream, Sink};

/// Writes the header and every row to one writer.
///
/// Each `ingest` produces exactly one [`BatchResult`]; there is no rotation.
#[derive(Debug)]
pub struct CsvSink<W> {
    out: CountingWriter<W>,
    ingested: usize,
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: CountingWriter::new(writer),
            ingested: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write> Sink for CsvSink<W> {
    #[instrument(skip_all, fields(columns = columns.len()))]
    fn ingest(&mut self, rows: RowStream<'_>, columns: &[Description]) -> Result<Vec<BatchResult>> {
        let start = Utc::now();
        let before = self.out.count();

        let mut writer = csv::Writer::from_writer(&mut self.out);
        writer.write_record(columns.iter().map(|c| c.name.as_str()))?;

        let mut row_count = 0;
        for batch in rows {
            let batch = batch?;
            for row in &batch {
                writer.write_record(row.iter().map(Value::to_field))?;
            }
            row_count += batch.len();
        }
        writer.flush()?;
        drop(writer);

        let size_bytes = self.out.count() - before;
        debug!(rows = row_count, size_bytes, "Wrote CSV output");

        let result = BatchResult {
            number: self.ingested,
            start,
            stop: Utc::now(),
            rows: row_count,
            size_bytes,
        };
        self.ingested += 1;
        Ok(vec![result])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_header_and_rows() {
        let mut sink = CsvSink::new(Vec::new());
        let columns = vec![Description::new("a", "number"), Description::new("b", "varchar")];
        let rows: RowStream<'static> = Box::new(
            vec![
                Ok(vec![vec![Value::Int(1), Value::from("x")]]),
                Ok(vec![vec![Value::Int(2), Value::Null], vec![Value::Int(3), Value::from("y,z")]]),
            ]
            .into_iter(),
        );

        let batches = sink.ingest(rows, &columns).unwrap();
        let output = String::from_utf8(sink.into_inner()).unwrap();

        assert_eq!(output, "a,b\n1,x\n2,\n3,\"y,z\"\n");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].rows, 3);
        assert_eq!(batches[0].size_bytes, output.len() as u64);
    }

    #[test]
    fn test_empty_stream_writes_only_header() {
        let mut sink = CsvSink::new(Vec::new());
        let batches = sink
            .ingest(Box::new(std::iter::empty()), &[Description::new("a", "varchar")])
            .unwrap();

        assert_eq!(batches[0].rows, 0);
        assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), "a\n");
    }
}
