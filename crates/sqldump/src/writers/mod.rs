//! Output writers.
//!
//! One writer per target format, selected by the output path's extension
//! through the provider descriptors. Writers receive the final transform
//! schema with virtual columns already elided.

pub mod csv;
pub mod parquet;

pub use csv::CsvWriter;
pub use parquet::ParquetWriter;
