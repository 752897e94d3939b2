//! Output schema types: logical column types, column metadata and the
//! ordered schema a pipeline stage publishes.

use serde::{Deserialize, Serialize};

use crate::error::{DumpError, Result};

/// Logical column type, a closed set shared by readers, transformers and
/// writers. Source-specific type names are mapped into this set by each
/// reader; writers map out of it into their format's native types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Fixed-point decimal with precision and scale.
    Decimal {
        precision: u8,
        scale: i8,
    },
    Boolean,
    String,
    Bytes,
    Date,
    Time,
    Timestamp,
    Uuid,
    Json,
}

impl LogicalType {
    /// Human-readable name used in diagnostics and the dry-run table.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            LogicalType::Int8 => "int8".into(),
            LogicalType::Int16 => "int16".into(),
            LogicalType::Int32 => "int32".into(),
            LogicalType::Int64 => "int64".into(),
            LogicalType::UInt8 => "uint8".into(),
            LogicalType::UInt16 => "uint16".into(),
            LogicalType::UInt32 => "uint32".into(),
            LogicalType::UInt64 => "uint64".into(),
            LogicalType::Float32 => "float32".into(),
            LogicalType::Float64 => "float64".into(),
            LogicalType::Decimal { precision, scale } => {
                format!("decimal({},{})", precision, scale)
            }
            LogicalType::Boolean => "boolean".into(),
            LogicalType::String => "string".into(),
            LogicalType::Bytes => "bytes".into(),
            LogicalType::Date => "date".into(),
            LogicalType::Time => "time".into(),
            LogicalType::Timestamp => "timestamp".into(),
            LogicalType::Uuid => "uuid".into(),
            LogicalType::Json => "json".into(),
        }
    }
}

/// Metadata for one output column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name. Identity is case-insensitive.
    pub name: String,

    /// Logical type of the column's cells.
    pub logical_type: LogicalType,

    /// Whether cells may be NULL.
    pub nullable: bool,

    /// Virtual columns exist in the transform schema but are elided
    /// before reaching the writer.
    pub is_virtual: bool,
}

impl ColumnInfo {
    /// Create a non-virtual nullable column.
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: true,
            is_virtual: false,
        }
    }

    /// Create a virtual column (intermediate value for templates).
    pub fn virtual_column(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: true,
            is_virtual: true,
        }
    }

    /// Mark the column non-nullable.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// An ordered sequence of columns with unique case-insensitive names.
///
/// A schema is immutable once published by a pipeline stage: each stage
/// receives an input schema during initialization and publishes its output
/// schema for the next stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnInfo>,
}

impl Schema {
    /// Build a schema, rejecting duplicate (case-insensitive) names.
    pub fn new(columns: Vec<ColumnInfo>) -> Result<Self> {
        for (i, col) in columns.iter().enumerate() {
            if columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&col.name))
            {
                return Err(DumpError::Schema(format!(
                    "duplicate column name '{}'",
                    col.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// The ordered columns.
    #[must_use]
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Case-insensitive position lookup.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Case-insensitive column lookup.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.position(name).map(|i| &self.columns[i])
    }

    /// The schema the writer receives: every column except the virtual
    /// ones, original order preserved.
    #[must_use]
    pub fn without_virtual(&self) -> Schema {
        Schema {
            columns: self
                .columns
                .iter()
                .filter(|c| !c.is_virtual)
                .cloned()
                .collect(),
        }
    }

    /// Positions of the non-virtual columns, for projecting rows down to
    /// the writer schema.
    #[must_use]
    pub fn non_virtual_positions(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_virtual)
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether any column is virtual.
    #[must_use]
    pub fn has_virtual(&self) -> bool {
        self.columns.iter().any(|c| c.is_virtual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(vec![
            ColumnInfo::new("Id", LogicalType::Int32).not_null(),
            ColumnInfo::new("Name", LogicalType::String),
            ColumnInfo::virtual_column("Scratch", LogicalType::String),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Schema::new(vec![
            ColumnInfo::new("id", LogicalType::Int32),
            ColumnInfo::new("ID", LogicalType::Int64),
        ]);
        assert!(matches!(result, Err(DumpError::Schema(_))));
    }

    #[test]
    fn test_position_is_case_insensitive() {
        let schema = sample();
        assert_eq!(schema.position("id"), Some(0));
        assert_eq!(schema.position("NAME"), Some(1));
        assert_eq!(schema.position("missing"), None);
    }

    #[test]
    fn test_without_virtual() {
        let schema = sample();
        assert!(schema.has_virtual());

        let writer_schema = schema.without_virtual();
        assert_eq!(writer_schema.len(), 2);
        assert!(!writer_schema.has_virtual());
        assert_eq!(writer_schema.columns()[0].name, "Id");
        assert_eq!(writer_schema.columns()[1].name, "Name");

        assert_eq!(schema.non_virtual_positions(), vec![0, 1]);
    }

    #[test]
    fn test_logical_type_names() {
        assert_eq!(LogicalType::Int64.name(), "int64");
        assert_eq!(
            LogicalType::Decimal {
                precision: 10,
                scale: 2
            }
            .name(),
            "decimal(10,2)"
        );
    }
}
