//! Highwatermark sources

use inbound_common::Result;
use tracing::debug;

use crate::config::DEFAULT_FETCH_SIZE;
use crate::models::HighwatermarkRow;
use crate::sdk::Highwatermark;
use crate::tap::QueryConnection;

/// Reads bookmarks with a query; each result row becomes one
/// [`HighwatermarkRow`] keyed by column name.
pub struct SqlHighwatermark<C> {
    connection: C,
    query: String,
}

impl<C: QueryConnection> SqlHighwatermark<C> {
    pub fn new(connection: C, query: impl Into<String>) -> Self {
        Self {
            connection,
            query: query.into(),
        }
    }

    pub fn into_connection(self) -> C {
        self.connection
    }
}

impl<C: QueryConnection> Highwatermark for SqlHighwatermark<C> {
    fn generate_query_list(&mut self) -> Result<Vec<HighwatermarkRow>> {
        let columns = self.connection.execute(&self.query)?;
        let mut marks = Vec::new();

        loop {
            let rows = self.connection.fetch_many(DEFAULT_FETCH_SIZE)?;
            if rows.is_empty() {
                break;
            }
            marks.extend(rows.iter().map(|row| {
                columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| (column.name.clone(), serde_json::Value::from(value)))
                    .collect::<HighwatermarkRow>()
            }));
        }

        debug!(rows = marks.len(), "Generated highwatermarks");
        Ok(marks)
    }
}

/// A fixed list of bookmarks
#[derive(Debug, Clone, Default)]
pub struct StaticHighwatermark {
    rows: Vec<HighwatermarkRow>,
}

impl StaticHighwatermark {
    pub fn new(rows: Vec<HighwatermarkRow>) -> Self {
        Self { rows }
    }
}

impl Highwatermark for StaticHighwatermark {
    fn generate_query_list(&mut self) -> Result<Vec<HighwatermarkRow>> {
        Ok(self.rows.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{Description, Row, Value};
    use serde_json::json;

    struct OneShot {
        columns: Vec<Description>,
        rows: Option<Vec<Row>>,
    }

    impl QueryConnection for OneShot {
        fn execute(&mut self, _query: &str) -> Result<Vec<Description>> {
            Ok(self.columns.clone())
        }

        fn fetch_many(&mut self, _size: usize) -> Result<Vec<Row>> {
            Ok(self.rows.take().unwrap_or_default())
        }
    }

    #[test]
    fn test_rows_become_named_marks() {
        let connection = OneShot {
            columns: vec![Description::new("PERIODE", "varchar"), Description::new("ID", "number")],
            rows: Some(vec![
                vec![Value::from("2024-01"), Value::Int(1)],
                vec![Value::from("2024-02"), Value::Null],
            ]),
        };
        let marks = SqlHighwatermark::new(connection, "select periode, id from marks")
            .generate_query_list()
            .unwrap();

        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0]["PERIODE"], json!("2024-01"));
        assert_eq!(marks[0]["ID"], json!(1));
        assert_eq!(marks[1]["ID"], json!(null));
    }

    #[test]
    fn test_empty_result_gives_no_marks() {
        let connection = OneShot {
            columns: vec![Description::new("ID", "number")],
            rows: None,
        };
        let marks = SqlHighwatermark::new(connection, "select id from marks")
            .generate_query_list()
            .unwrap();

        assert!(marks.is_empty());
    }
}
