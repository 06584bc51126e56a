//! Capability traits composed by a [`Job`](crate::job::Job)
//!
//! Each source or destination implements exactly the trait it needs; there is
//! no shared base state. Fakes in tests implement the same traits.

use inbound_common::Result;

use crate::models::{BatchResult, Description, HighwatermarkRow, RowBatch};

/// Lazy, finite sequence of row batches.
///
/// Every row matches the column order of the descriptions it travels with.
/// An `Err` item aborts the consumer.
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<RowBatch>> + Send + 'a>;

/// Source-side capability
pub trait Tap {
    /// Column metadata, in row order
    fn column_descriptions(&mut self) -> Result<Vec<Description>>;

    /// Row batches for the whole result set.
    ///
    /// The stream must terminate. Calling this twice re-queries only if the
    /// underlying source supports it.
    fn data_generator(&mut self) -> Result<RowStream<'_>>;
}

/// Destination-side capability
pub trait Sink {
    /// Consume `rows` completely (single pass) and publish them.
    fn ingest(&mut self, rows: RowStream<'_>, columns: &[Description]) -> Result<Vec<BatchResult>>;
}

/// Translates a source column description into a destination one
pub trait Mapper: Send + Sync {
    fn map(&self, column: &Description) -> Result<Description>;
}

/// Bookmarks that bound an incremental extraction
pub trait Highwatermark {
    /// An empty list means there is nothing new to extract.
    fn generate_query_list(&mut self) -> Result<Vec<HighwatermarkRow>>;
}

impl<M: Mapper + ?Sized> Mapper for Box<M> {
    fn map(&self, column: &Description) -> Result<Description> {
        (**self).map(column)
    }
}
