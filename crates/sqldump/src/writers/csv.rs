//! CSV writer.
//!
//! UTF-8, configurable delimiter, RFC 4180 quoting, optional header row.
//! NULL cells are written as empty unquoted fields. Output is buffered and
//! flushed at batch boundaries so progress counters track real file
//! growth.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::core::schema::Schema;
use crate::core::value::{Row, Value};
use crate::core::DataWriter;
use crate::error::{DumpError, Result};
use crate::options::CsvOptions;

const WRITE_BUFFER_BYTES: usize = 1 << 20;

/// CSV implementation of [`DataWriter`].
pub struct CsvWriter {
    path: PathBuf,
    delimiter: char,
    header: bool,
    writer: Option<BufWriter<File>>,
    column_count: usize,
    bytes_written: u64,
}

impl CsvWriter {
    /// Create a writer for the given output path.
    pub fn new(path: &Path, options: &CsvOptions) -> Self {
        Self {
            path: path.to_path_buf(),
            delimiter: options.delimiter,
            header: options.header,
            writer: None,
            column_count: 0,
            bytes_written: 0,
        }
    }

    /// Quote a field per RFC 4180 when it contains the delimiter, a
    /// quote, or a line break.
    fn encode_field(&self, out: &mut String, field: &str) {
        let needs_quoting = field.contains(self.delimiter)
            || field.contains('"')
            || field.contains('\n')
            || field.contains('\r');
        if needs_quoting {
            out.push('"');
            for c in field.chars() {
                if c == '"' {
                    out.push('"');
                }
                out.push(c);
            }
            out.push('"');
        } else {
            out.push_str(field);
        }
    }

    fn encode_row(&self, out: &mut String, cells: &[String], nulls: &[bool]) {
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                out.push(self.delimiter);
            }
            // NULL is an empty unquoted field, distinct from an empty
            // string only when quoting would apply.
            if !nulls[i] {
                self.encode_field(out, cell);
            }
        }
        out.push('\n');
    }

    async fn write_encoded(&mut self, encoded: String) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| DumpError::Internal("writer not initialized".to_string()))?;
        writer
            .write_all(encoded.as_bytes())
            .await
            .map_err(|e| DumpError::Output(format!("failed to write {}: {}", self.path.display(), e)))?;
        self.bytes_written += encoded.len() as u64;
        Ok(())
    }
}

#[async_trait]
impl DataWriter for CsvWriter {
    async fn initialize(&mut self, schema: &Schema) -> Result<()> {
        let file = File::create(&self.path).await.map_err(|e| {
            DumpError::Output(format!("failed to create {}: {}", self.path.display(), e))
        })?;
        self.writer = Some(BufWriter::with_capacity(WRITE_BUFFER_BYTES, file));
        self.column_count = schema.len();

        if self.header {
            let mut line = String::new();
            let names: Vec<String> = schema.columns().iter().map(|c| c.name.clone()).collect();
            let nulls = vec![false; names.len()];
            self.encode_row(&mut line, &names, &nulls);
            self.write_encoded(line).await?;
        }

        debug!("Initialized CSV output at {}", self.path.display());
        Ok(())
    }

    async fn write_batch(&mut self, rows: Vec<Row>) -> Result<()> {
        let mut encoded = String::new();
        for row in &rows {
            if row.len() != self.column_count {
                return Err(DumpError::Schema(format!(
                    "row has {} cells, schema has {} columns",
                    row.len(),
                    self.column_count
                )));
            }
            let cells: Vec<String> = row.iter().map(Value::render).collect();
            let nulls: Vec<bool> = row.iter().map(Value::is_null).collect();
            self.encode_row(&mut encoded, &cells, &nulls);
        }
        self.write_encoded(encoded).await?;

        // Flush at batch boundaries so partial output is visible and
        // byte counters reflect the file.
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .await
                .map_err(|e| DumpError::Output(e.to_string()))?;
        }
        Ok(())
    }

    async fn complete(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .await
                .map_err(|e| DumpError::Output(e.to_string()))?;
            writer
                .shutdown()
                .await
                .map_err(|e| DumpError::Output(e.to_string()))?;
        }
        debug!(
            "Completed CSV output at {} ({} bytes)",
            self.path.display(),
            self.bytes_written
        );
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnInfo, LogicalType};
    use rust_decimal::Decimal;
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnInfo::new("id", LogicalType::Int32),
            ColumnInfo::new("name", LogicalType::String),
            ColumnInfo::new("active", LogicalType::Boolean),
            ColumnInfo::new("score", LogicalType::Decimal { precision: 5, scale: 2 }),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_basic_export_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut writer = CsvWriter::new(&path, &CsvOptions::default());

        writer.initialize(&schema()).await.unwrap();
        writer
            .write_batch(vec![
                vec![
                    Value::I32(1),
                    Value::Text("Alice".into()),
                    Value::Bool(true),
                    Value::Decimal(Decimal::new(9550, 2)),
                ],
                vec![
                    Value::I32(2),
                    Value::Text("Bob".into()),
                    Value::Bool(false),
                    Value::Decimal(Decimal::new(8000, 2)),
                ],
            ])
            .await
            .unwrap();
        writer.complete().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id,name,active,score\n1,Alice,true,95.50\n2,Bob,false,80.00\n");
        assert_eq!(writer.bytes_written(), content.len() as u64);
    }

    #[tokio::test]
    async fn test_quoting_and_nulls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut writer = CsvWriter::new(&path, &CsvOptions::default());

        let schema = Schema::new(vec![
            ColumnInfo::new("a", LogicalType::String),
            ColumnInfo::new("b", LogicalType::String),
        ])
        .unwrap();
        writer.initialize(&schema).await.unwrap();
        writer
            .write_batch(vec![
                vec![Value::Text("Hello, World".into()), Value::Null],
                vec![Value::Text("say \"hi\"".into()), Value::Text("line\nbreak".into())],
            ])
            .await
            .unwrap();
        writer.complete().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "a,b\n\"Hello, World\",\n\"say \"\"hi\"\"\",\"line\nbreak\"\n"
        );
    }

    #[tokio::test]
    async fn test_no_header_and_custom_delimiter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let options = CsvOptions {
            delimiter: ';',
            header: false,
        };
        let mut writer = CsvWriter::new(&path, &options);

        let schema = Schema::new(vec![
            ColumnInfo::new("a", LogicalType::Int32),
            ColumnInfo::new("b", LogicalType::String),
        ])
        .unwrap();
        writer.initialize(&schema).await.unwrap();
        writer
            .write_batch(vec![vec![Value::I32(1), Value::Text("x;y".into())]])
            .await
            .unwrap();
        writer.complete().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "1;\"x;y\"\n");
    }

    #[tokio::test]
    async fn test_empty_result_is_valid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let mut writer = CsvWriter::new(&path, &CsvOptions::default());
        writer.initialize(&schema()).await.unwrap();
        writer.complete().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id,name,active,score\n");
    }

    #[tokio::test]
    async fn test_row_width_mismatch_is_schema_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut writer = CsvWriter::new(&path, &CsvOptions::default());
        writer.initialize(&schema()).await.unwrap();
        let err = writer
            .write_batch(vec![vec![Value::I32(1)]])
            .await
            .unwrap_err();
        assert!(matches!(err, DumpError::Schema(_)));
    }
}
