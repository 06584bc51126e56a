//! Sinks and the warehouse primitives they compose
//!
//! - [`BulkLoadSink`] stages rows into bounded CSV files, bulk-loads them into
//!   a working table and swaps that table into place.
//! - [`CsvSink`] writes everything to a single writer.
//! - [`MemoryWarehouse`] is an in-process [`WarehouseHandler`] for tests and
//!   dry runs.

use inbound_common::Result;
use std::io::{self, Write};
use std::path::Path;

pub mod bulk;
pub mod delimited;
pub mod memory;

pub use bulk::{create_ddl, BulkLoadSink, LoadState, StagingArea};
pub use delimited::CsvSink;
pub use memory::{MemoryWarehouse, Operation};

/// Primitive operations a warehouse offers to [`BulkLoadSink`].
pub trait WarehouseHandler {
    /// Execute a `create table` statement
    fn create_table(&mut self, ddl: &str) -> Result<()>;

    fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Load a staged CSV file (header row included) into `table`.
    ///
    /// Columns are matched by name, case-insensitively.
    fn bulk_load(&mut self, table: &str, file: &Path) -> Result<()>;

    /// `insert into <to> select * from <from>`
    fn copy_rows(&mut self, from: &str, to: &str) -> Result<()>;

    fn rename_table(&mut self, from: &str, to: &str) -> Result<()>;

    /// Drop `table` if it exists
    fn drop_table(&mut self, table: &str) -> Result<()>;
}

/// Counts the bytes that pass through to the inner writer.
#[derive(Debug)]
pub(crate) struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_writer_counts_written_bytes() {
        let mut writer = CountingWriter::new(Vec::new());
        writer.write_all(b"a,b\n").unwrap();
        writer.write_all(b"1,2\n").unwrap();

        assert_eq!(writer.count(), 8);
        assert_eq!(writer.into_inner(), b"a,b\n1,2\n");
    }
}
