//! Core capabilities of the export pipeline.
//!
//! The three capabilities correspond to the three pipeline stages:
//!
//! - [`StreamReader`]: opens a source and produces row batches lazily
//! - [`DataTransformer`]: schema-rewriting, row-rewriting middle stage
//! - [`DataWriter`]: accepts batches and finalizes the output file
//!
//! Concrete kinds are constructed through the descriptor mechanism in
//! [`providers`](crate::providers); the orchestrator owns one reader, one
//! writer and an ordered transformer list for the duration of a run.

use async_trait::async_trait;

use crate::core::schema::Schema;
use crate::core::value::{Batch, Row};
use crate::error::Result;

/// Read rows from a relational source.
///
/// # Lifecycle
///
/// `open` → `columns` → repeated `next_batch` until `None` → `close`.
/// The batch sequence is not restartable.
#[async_trait]
pub trait StreamReader: Send {
    /// Establish the connection, submit the query and materialize the
    /// column schema.
    ///
    /// The query must be read-only: any statement whose first significant
    /// token is not `SELECT` or `WITH` fails with a security error before
    /// touching the source.
    async fn open(&mut self) -> Result<()>;

    /// The column schema. Valid after `open`.
    fn columns(&self) -> &Schema;

    /// Fetch the next batch of rows, between 1 and `batch_size` rows.
    ///
    /// Returns `None` once the result set is exhausted. Cancellation is
    /// observed at batch boundaries: the caller simply stops fetching and
    /// drops the reader.
    async fn next_batch(&mut self, batch_size: usize) -> Result<Option<Batch>>;

    /// Release the connection. Idempotent.
    async fn close(&mut self);
}

/// Write rows to an output target.
#[async_trait]
pub trait DataWriter: Send {
    /// Record the output schema and allocate output resources (create the
    /// file, write headers).
    async fn initialize(&mut self, schema: &Schema) -> Result<()>;

    /// Append a batch of rows. The writer may buffer internally but must
    /// flush at batch boundaries.
    async fn write_batch(&mut self, rows: Vec<Row>) -> Result<()>;

    /// Finalize the output (footer, flush). After `complete` the file is
    /// self-consistent.
    async fn complete(&mut self) -> Result<()>;

    /// Monotonic count of bytes written so far, for progress reporting.
    fn bytes_written(&self) -> u64;
}

/// Schema-rewriting, row-rewriting pipeline stage.
///
/// Transformers are synchronous and must not block on I/O; the transform
/// stage of the pipeline calls them one row at a time, never re-entrantly.
pub trait DataTransformer: Send {
    /// One-shot initialization, called before any row is transformed.
    ///
    /// Receives the cumulative schema produced by all upstream stages and
    /// returns the schema this stage publishes. May add columns (marked
    /// virtual when they are ephemeral), remove columns, or change a
    /// column's logical type.
    fn initialize(&mut self, input: &Schema) -> Result<Schema>;

    /// Transform one row. May mutate the row in place and return it, or
    /// return a new row; the caller makes no copy.
    fn transform(&mut self, row: Row) -> Result<Row>;
}
