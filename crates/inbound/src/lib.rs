//! Inbound Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Moves tabular data from a source system into a warehouse.
//!
//! # Overview
//!
//! A [`Job`](job::Job) pulls column descriptions and row batches from a
//! [`Tap`](sdk::Tap), optionally maps the descriptions with a
//! [`Mapper`](sdk::Mapper), appends provenance metadata (and a raw JSON
//! column), and hands everything to a [`Sink`](sdk::Sink).
//!
//! - **Taps**: [`SqlTap`](tap::SqlTap) over any [`QueryConnection`](tap::QueryConnection),
//!   [`CsvFileTap`](tap::CsvFileTap)
//! - **Sinks**: [`BulkLoadSink`](sink::BulkLoadSink) over any
//!   [`WarehouseHandler`](sink::WarehouseHandler), [`CsvSink`](sink::CsvSink)
//! - **Mappers**: [`DescriptionMapper`](mapper::DescriptionMapper) and presets
//! - **Clerk**: [`JobClerk`](clerk::JobClerk) runs job closures off a queue
//!
//! # Example
//!
//! ```no_run
//! use inbound::job::Job;
//! use inbound::models::Metadata;
//! use inbound::sink::CsvSink;
//! use inbound::tap::CsvFileTap;
//!
//! fn main() -> anyhow::Result<()> {
//!     let tap = CsvFileTap::new("input.csv");
//!     let sink = CsvSink::new(std::io::stdout());
//!     let summary = Job::new(tap, sink)
//!         .with_metadata(Metadata::new("dev", "run-1", "example"))
//!         .run()?;
//!     eprintln!("{} rows", summary.total_rows());
//!     Ok(())
//! }
//! ```

pub mod clerk;
pub mod config;
pub mod highwatermark;
pub mod job;
pub mod mapper;
pub mod models;
pub mod query;
pub mod sdk;
pub mod sink;
pub mod tap;

pub use inbound_common::{InboundError, Result};
