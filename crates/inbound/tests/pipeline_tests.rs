//! End-to-end tests for tap → job → bulk-load sink
//!
//! These tests run the whole pipeline against the in-memory warehouse:
//! - Append versus replace publishing
//! - Batch rotation under a staging size limit
//! - Cleanup when staging or upload fails

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{TimeZone, Utc};
use inbound::config::SinkConfig;
use inbound::job::Job;
use inbound::models::{Description, Metadata, Row, RowBatch, Value};
use inbound::sdk::{RowStream, Sink, Tap};
use inbound::sink::{BulkLoadSink, LoadState, MemoryWarehouse, Operation, StagingArea, WarehouseHandler};
use inbound::InboundError;
use proptest::prelude::*;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Yields `rows` in batches of `batch_size`.
struct VecTap {
    columns: Vec<Description>,
    rows: Vec<Row>,
    batch_size: usize,
}

impl VecTap {
    fn ids(range: std::ops::Range<i64>, batch_size: usize) -> Self {
        Self {
            columns: vec![Description::new("id", "number").with_precision(38).with_scale(0)],
            rows: range.map(|i| vec![Value::Int(i)]).collect(),
            batch_size,
        }
    }
}

impl Tap for VecTap {
    fn column_descriptions(&mut self) -> inbound::Result<Vec<Description>> {
        Ok(self.columns.clone())
    }

    fn data_generator(&mut self) -> inbound::Result<RowStream<'_>> {
        let batches: Vec<RowBatch> = self
            .rows
            .chunks(self.batch_size.max(1))
            .map(<[Row]>::to_vec)
            .collect();
        Ok(Box::new(batches.into_iter().map(Ok)))
    }
}

/// Delegates to a memory warehouse but fails every bulk load.
struct BrokenUpload(MemoryWarehouse);

impl WarehouseHandler for BrokenUpload {
    fn create_table(&mut self, ddl: &str) -> inbound::Result<()> {
        self.0.create_table(ddl)
    }

    fn table_exists(&mut self, table: &str) -> inbound::Result<bool> {
        self.0.table_exists(table)
    }

    fn bulk_load(&mut self, _table: &str, file: &Path) -> inbound::Result<()> {
        assert!(file.exists(), "staging file must exist during upload");
        Err(InboundError::Warehouse("PUT failed".to_string()))
    }

    fn copy_rows(&mut self, from: &str, to: &str) -> inbound::Result<()> {
        self.0.copy_rows(from, to)
    }

    fn rename_table(&mut self, from: &str, to: &str) -> inbound::Result<()> {
        self.0.rename_table(from, to)
    }

    fn drop_table(&mut self, table: &str) -> inbound::Result<()> {
        self.0.drop_table(table)
    }
}

/// Delegates to a memory warehouse and keeps every DDL statement it receives.
struct RecordingDdl {
    warehouse: MemoryWarehouse,
    statements: Arc<Mutex<Vec<String>>>,
}

impl WarehouseHandler for RecordingDdl {
    fn create_table(&mut self, ddl: &str) -> inbound::Result<()> {
        self.statements.lock().unwrap().push(ddl.to_string());
        self.warehouse.create_table(ddl)
    }

    fn table_exists(&mut self, table: &str) -> inbound::Result<bool> {
        self.warehouse.table_exists(table)
    }

    fn bulk_load(&mut self, table: &str, file: &Path) -> inbound::Result<()> {
        self.warehouse.bulk_load(table, file)
    }

    fn copy_rows(&mut self, from: &str, to: &str) -> inbound::Result<()> {
        self.warehouse.copy_rows(from, to)
    }

    fn rename_table(&mut self, from: &str, to: &str) -> inbound::Result<()> {
        self.warehouse.rename_table(from, to)
    }

    fn drop_table(&mut self, table: &str) -> inbound::Result<()> {
        self.warehouse.drop_table(table)
    }
}

fn metadata(run_id: &str) -> Metadata {
    Metadata::new("test", run_id, "pipeline")
        .with_version("1.0.0")
        .with_load_time(Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap())
}

fn bulk_sink(dir: &TempDir, warehouse: &MemoryWarehouse, transient: bool) -> BulkLoadSink<MemoryWarehouse> {
    BulkLoadSink::new("db.schema.orders", transient, warehouse.clone())
        .with_staging(StagingArea::new(dir.path(), "inbound.csv"))
}

fn run_ids(rows: &[Vec<String>]) -> Vec<&str> {
    // id, source_env, run_id, ...
    rows.iter().map(|row| row[2].as_str()).collect()
}

// ============================================================================
// Publishing
// ============================================================================

#[test]
fn test_append_mode_accumulates_runs() {
    let dir = TempDir::new().unwrap();
    let warehouse = MemoryWarehouse::new();

    for (run, range) in [("run-1", 0..3), ("run-2", 3..5)] {
        let mut job = Job::new(VecTap::ids(range, 2), bulk_sink(&dir, &warehouse, false))
            .with_metadata(metadata(run));
        job.run().unwrap();
    }

    let table = warehouse.rows("db.schema.orders").unwrap();
    assert_eq!(table.len(), 5);
    assert_eq!(run_ids(&table), vec!["run-1", "run-1", "run-1", "run-2", "run-2"]);

    // The swap target only holds the latest run.
    let latest = warehouse.rows("db.schema.orders__transient").unwrap();
    assert_eq!(run_ids(&latest), vec!["run-2", "run-2"]);
    assert!(!warehouse.contains_table("db.schema.orders__tmp").unwrap());
    assert!(!warehouse.contains_table("db.schema.orders__transient__old").unwrap());
}

#[test]
fn test_replace_mode_keeps_only_latest_run() {
    let dir = TempDir::new().unwrap();
    let warehouse = MemoryWarehouse::new();

    for (run, range) in [("run-1", 0..3), ("run-2", 10..12)] {
        let mut job = Job::new(VecTap::ids(range, 10), bulk_sink(&dir, &warehouse, true))
            .with_metadata(metadata(run));
        job.run().unwrap();
    }

    let latest = warehouse.rows("db.schema.orders__transient").unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0][0], "10");
    assert_eq!(run_ids(&latest), vec!["run-2", "run-2"]);
    assert!(!warehouse.contains_table("db.schema.orders").unwrap());
}

#[test]
fn test_staged_columns_follow_final_schema() {
    let dir = TempDir::new().unwrap();
    let warehouse = MemoryWarehouse::new();

    let mut job = Job::new(VecTap::ids(0..1, 1), bulk_sink(&dir, &warehouse, true))
        .with_metadata(metadata("run-1"))
        .with_raw(true);
    let summary = job.run().unwrap();

    let columns = warehouse.columns("db.schema.orders__transient").unwrap();
    assert_eq!(columns, summary.columns);

    let row = &warehouse.rows("db.schema.orders__transient").unwrap()[0];
    assert_eq!(row[0], "0");
    assert_eq!(row[1], r#"{"id": 0}"#);
    assert_eq!(row[6], "2024-05-01 06:00:00");
    assert_eq!(summary.tap, "VecTap");
    assert_eq!(summary.sink, "BulkLoadSink");
}

#[test]
fn test_sink_built_from_config() {
    let dir = TempDir::new().unwrap();
    let warehouse = MemoryWarehouse::new();
    let statements = Arc::new(Mutex::new(Vec::new()));
    let config = SinkConfig {
        staging_dir: dir.path().join("staging"),
        staging_file: None,
        tmp_file_max_size: 40,
        transient_postfix: "__latest".to_string(),
        quoted_identifiers: true,
    };
    let handler = RecordingDdl {
        warehouse: warehouse.clone(),
        statements: Arc::clone(&statements),
    };
    let mut sink = BulkLoadSink::from_config("db.s.orders", false, handler, &config);

    let columns = [Description::new("Order-Id", "number").with_precision(38).with_scale(0)];
    let batches: Vec<RowBatch> = (0..4)
        .map(|chunk| (chunk * 5..chunk * 5 + 5).map(|i| vec![Value::Int(i)]).collect())
        .collect();
    let results = sink
        .ingest(Box::new(batches.into_iter().map(Ok)), &columns)
        .unwrap();

    // "Order-Id\n" plus 0..=14 is 44 bytes, past the 40 byte limit.
    assert_eq!(results.len(), 2);
    assert_eq!((results[0].rows, results[0].size_bytes), (15, 44));
    assert_eq!((results[1].rows, results[1].size_bytes), (5, 24));

    assert_eq!(
        *statements.lock().unwrap(),
        vec![
            r#"create table if not exists db.s.orders ("Order-Id" number(38, 0))"#.to_string(),
            r#"create or replace transient table db.s.orders__tmp ("Order-Id" number(38, 0))"#.to_string(),
        ]
    );

    assert_eq!(warehouse.rows("db.s.orders__latest").unwrap().len(), 20);
    assert_eq!(warehouse.rows("db.s.orders").unwrap().len(), 20);
    assert!(!warehouse.contains_table("db.s.orders__transient").unwrap());
    assert!(dir.path().join("staging").is_dir());
    assert!(!dir.path().join("staging").join("db.s.orders.csv").exists());
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_upload_failure_skips_swap_and_removes_staging_file() {
    let dir = TempDir::new().unwrap();
    let warehouse = MemoryWarehouse::new();
    let mut sink = BulkLoadSink::new("db.schema.orders", false, BrokenUpload(warehouse.clone()))
        .with_staging(StagingArea::new(dir.path(), "inbound.csv"));

    let rows: RowStream<'static> = Box::new(vec![Ok(vec![vec![Value::Int(1)]])].into_iter());
    let err = sink
        .ingest(rows, &[Description::new("id", "number")])
        .unwrap_err();

    assert!(matches!(err, InboundError::Warehouse(_)));
    assert_eq!(sink.state(), LoadState::Failed);
    assert!(!dir.path().join("inbound.csv").exists());

    let ops = warehouse.operations().unwrap();
    assert!(!ops.iter().any(|op| matches!(op, Operation::RenameTable { .. } | Operation::CopyRows { .. })));
    assert!(warehouse.rows("db.schema.orders").unwrap().is_empty());
}

#[test]
fn test_previous_run_survives_failed_run() {
    let dir = TempDir::new().unwrap();
    let warehouse = MemoryWarehouse::new();

    let mut job = Job::new(VecTap::ids(0..2, 2), bulk_sink(&dir, &warehouse, true))
        .with_metadata(metadata("run-1"));
    job.run().unwrap();

    let mut sink = bulk_sink(&dir, &warehouse, true);
    let rows: RowStream<'static> = Box::new(
        vec![
            Ok(vec![vec![Value::Int(9)]]),
            Err(InboundError::Source("ORA-03113: end-of-file on communication channel".to_string())),
        ]
        .into_iter(),
    );
    assert!(sink.ingest(rows, &[Description::new("id", "number")]).is_err());

    let latest = warehouse.rows("db.schema.orders__transient").unwrap();
    assert_eq!(run_ids(&latest), vec!["run-1", "run-1"]);
}

// ============================================================================
// Rotation
// ============================================================================

#[test]
fn test_empty_source_produces_one_empty_batch() {
    let dir = TempDir::new().unwrap();
    let warehouse = MemoryWarehouse::new();

    let mut job = Job::new(VecTap::ids(0..0, 5), bulk_sink(&dir, &warehouse, false));
    let summary = job.run().unwrap();

    assert_eq!(summary.batches.len(), 1);
    assert_eq!(summary.batches[0].rows, 0);
    assert!(warehouse.rows("db.schema.orders__transient").unwrap().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_rotation_bounds_batches(
        rows in 0i64..200,
        batch_size in 1usize..20,
        max_size in 1u64..400,
    ) {
        let dir = TempDir::new().unwrap();
        let warehouse = MemoryWarehouse::new();
        let mut sink = bulk_sink(&dir, &warehouse, true).with_max_file_size(max_size);
        let mut tap = VecTap::ids(0..rows, batch_size);

        let columns = tap.column_descriptions().unwrap();
        let batches = sink.ingest(tap.data_generator().unwrap(), &columns).unwrap();

        prop_assert!(!batches.is_empty());
        // Every file but the last was closed because it crossed the limit.
        let (_, rotated) = batches.split_last().unwrap();
        for batch in rotated {
            prop_assert!(batch.size_bytes > max_size);
            prop_assert!(batch.rows > 0);
        }
        for (i, batch) in batches.iter().enumerate() {
            prop_assert_eq!(batch.number, i);
        }

        let total: usize = batches.iter().map(|b| b.rows).sum();
        prop_assert_eq!(total, rows as usize);
        prop_assert_eq!(warehouse.rows("db.schema.orders__transient").unwrap().len(), rows as usize);
    }
}
