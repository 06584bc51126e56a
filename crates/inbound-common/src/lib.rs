//! Inbound Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the inbound workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the [`InboundError`] taxonomy and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use inbound_common::{InboundError, Result};
//!
//! fn require_rows(rows: &[u32]) -> Result<()> {
//!     if rows.is_empty() {
//!         return Err(InboundError::InvalidArgument("no rows".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{InboundError, Result};
