//! Taps: SQL queries through a [`QueryConnection`] and delimited text files

use inbound_common::Result;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::DEFAULT_FETCH_SIZE;
use crate::models::{Description, HighwatermarkRow, Row, RowBatch, Value};
use crate::query::{describe_query, get_query_list};
use crate::sdk::{RowStream, Tap};

/// Cursor-style access to a SQL engine.
///
/// `execute` runs a statement and returns its column descriptions;
/// `fetch_many` then pages through the result. An empty page means the
/// result is exhausted.
pub trait QueryConnection: Send {
    fn execute(&mut self, query: &str) -> Result<Vec<Description>>;

    fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>>;
}

impl<C: QueryConnection + ?Sized> QueryConnection for &mut C {
    fn execute(&mut self, query: &str) -> Result<Vec<Description>> {
        (**self).execute(query)
    }

    fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>> {
        (**self).fetch_many(size)
    }
}

/// Runs a templated query once per highwatermark row.
pub struct SqlTap<C> {
    connection: C,
    queries: Vec<String>,
    fetch_size: usize,
}

impl<C: QueryConnection> SqlTap<C> {
    /// A tap for a query without highwatermark substitution
    pub fn new(connection: C, query: &str) -> Result<Self> {
        Self::with_highwatermarks(connection, query, &[HighwatermarkRow::new()])
    }

    /// Render `query` for each of `highwatermarks`.
    ///
    /// An empty list is an `InvalidArgument` error.
    pub fn with_highwatermarks(connection: C, query: &str, highwatermarks: &[HighwatermarkRow]) -> Result<Self> {
        let queries = get_query_list(query, highwatermarks)?;
        Ok(Self {
            connection,
            queries,
            fetch_size: DEFAULT_FETCH_SIZE,
        })
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    /// Rendered queries, in execution order
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    pub fn into_connection(self) -> C {
        self.connection
    }
}

impl<C: QueryConnection> Tap for SqlTap<C> {
    fn column_descriptions(&mut self) -> Result<Vec<Description>> {
        let Some(first) = self.queries.first() else {
            return Ok(Vec::new());
        };
        let desc_query = describe_query(first)?;
        self.connection.execute(&desc_query)
    }

    fn data_generator(&mut self) -> Result<RowStream<'_>> {
        info!(queries = self.queries.len(), fetch_size = self.fetch_size, "Streaming query results");
        Ok(Box::new(QueryBatches {
            connection: &mut self.connection,
            queries: self.queries.iter(),
            fetch_size: self.fetch_size,
            active: false,
            done: false,
        }))
    }
}

/// Pages through each query in turn; stops after the first error.
struct QueryBatches<'a, C> {
    connection: &'a mut C,
    queries: std::slice::Iter<'a, String>,
    fetch_size: usize,
    active: bool,
    done: bool,
}

impl<C: QueryConnection> Iterator for QueryBatches<'_, C> {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if !self.active {
                let query = self.queries.next()?;
                debug!(query = %query, "Executing query");
                if let Err(e) = self.connection.execute(query) {
                    self.done = true;
                    return Some(Err(e));
                }
                self.active = true;
            }

            match self.connection.fetch_many(self.fetch_size) {
                Ok(rows) if rows.is_empty() => self.active = false,
                Ok(rows) => return Some(Ok(rows)),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                },
            }
        }
        None
    }
}

/// Reads a delimited text file with a header row.
///
/// Every column is a nullable `varchar`; empty fields become [`Value::Null`].
#[derive(Debug, Clone)]
pub struct CsvFileTap {
    path: PathBuf,
    delimiter: u8,
    fetch_size: usize,
}

impl CsvFileTap {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    fn reader(&self) -> Result<csv::Reader<std::fs::File>> {
        Ok(csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .from_path(&self.path)?)
    }
}

fn field_value(field: &str) -> Value {
    if field.is_empty() {
        Value::Null
    } else {
        Value::Text(field.to_string())
    }
}

impl Tap for CsvFileTap {
    fn column_descriptions(&mut self) -> Result<Vec<Description>> {
        let mut reader = self.reader()?;
        Ok(reader
            .headers()?
            .iter()
            .map(|name| Description::new(name, "varchar"))
            .collect())
    }

    fn data_generator(&mut self) -> Result<RowStream<'_>> {
        let mut records = self.reader()?.into_records();
        let fetch_size = self.fetch_size;
        let mut done = false;

        Ok(Box::new(std::iter::from_fn(move || {
            if done {
                return None;
            }
            let mut batch = Vec::with_capacity(fetch_size);
            while batch.len() < fetch_size {
                match records.next() {
                    Some(Ok(record)) => batch.push(record.iter().map(field_value).collect()),
                    Some(Err(e)) => {
                        done = true;
                        return Some(Err(e.into()));
                    },
                    None => {
                        done = true;
                        break;
                    },
                }
            }
            (!batch.is_empty()).then_some(Ok(batch))
        })))
    }
}
