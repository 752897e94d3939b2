//! # sqldump
//!
//! Streaming export of read-only SQL query results into Parquet or CSV
//! files, with optional in-process row transformers that anonymize,
//! reshape or null individual columns.
//!
//! The pipeline has three concurrent stages connected by bounded
//! channels: a reader produces row batches, a transform stage rewrites
//! rows one at a time, and a writer appends batches to the output file.
//! Backpressure, ordering and cancellation are handled by the
//! [`ExportService`] orchestrator.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqldump::{DumpOptions, ExportService, OptionsRegistry, ProviderCatalog};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> sqldump::Result<()> {
//!     let options = DumpOptions {
//!         connection: "postgres://localhost/app".into(),
//!         query: "SELECT id, name FROM users".into(),
//!         output: "users.parquet".into(),
//!         ..Default::default()
//!     };
//!     let service = ExportService::new(
//!         ProviderCatalog::with_builtins(),
//!         OptionsRegistry::new(),
//!         options,
//!     );
//!     let summary = service.run(CancellationToken::new()).await?;
//!     println!("Exported {} rows", summary.rows_written);
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod error;
pub mod export;
pub mod options;
pub mod providers;
pub mod readers;
pub mod transform;
pub mod writers;

// Re-exports for convenient access
pub use self::core::{
    Batch, ColumnInfo, DataTransformer, DataWriter, LogicalType, Row, Schema, StreamReader, Value,
};
pub use error::{DumpError, Result};
pub use export::{ExportService, ExportSummary, ProgressReporter, ProgressSnapshot};
pub use options::{
    CsvOptions, DumpOptions, FakeOptions, FormatOptions, OptionsRegistry, ParquetCompression,
    ParquetOptions,
};
pub use providers::{ProviderCatalog, ReaderDescriptor, TransformerDescriptor, WriterDescriptor};
pub use transform::{FakeDataTransformer, FakerRegistry, FormatDataTransformer};
