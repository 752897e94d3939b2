//! Core data model: cell values, schemas and the pipeline capabilities.

pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{ColumnInfo, LogicalType, Schema};
pub use traits::{DataTransformer, DataWriter, StreamReader};
pub use value::{Batch, Row, Value};
