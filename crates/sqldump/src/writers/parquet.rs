//! Parquet writer.
//!
//! Rows are pivoted into Arrow `RecordBatch`es and appended with
//! `parquet::arrow::ArrowWriter`. Each incoming batch is flushed as its
//! own row group, so row-group size in the file equals the configured
//! batch size.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Date32Builder, Decimal128Builder, Float32Builder,
    Float64Builder, Int16Builder, Int32Builder, Int64Builder, Int8Builder, StringBuilder,
    Time64MicrosecondBuilder, TimestampMicrosecondBuilder, UInt16Builder, UInt32Builder,
    UInt64Builder, UInt8Builder,
};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Timelike;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::debug;

use crate::core::schema::{LogicalType, Schema};
use crate::core::value::{Row, Value};
use crate::core::DataWriter;
use crate::error::{DumpError, Result};
use crate::options::{ParquetCompression, ParquetOptions};

/// Parquet implementation of [`DataWriter`].
pub struct ParquetWriter {
    path: PathBuf,
    compression: ParquetCompression,
    row_group_size: usize,
    schema: Schema,
    arrow_schema: Option<Arc<ArrowSchema>>,
    writer: Option<ArrowWriter<CountingWriter>>,
    bytes_written: Arc<AtomicU64>,
}

impl ParquetWriter {
    /// Create a writer for the given output path. `row_group_size` is the
    /// configured batch size.
    pub fn new(path: &Path, options: &ParquetOptions, row_group_size: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            compression: options.compression,
            row_group_size: row_group_size.max(1),
            schema: Schema::default(),
            arrow_schema: None,
            writer: None,
            bytes_written: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl DataWriter for ParquetWriter {
    async fn initialize(&mut self, schema: &Schema) -> Result<()> {
        let fields: Vec<Field> = schema
            .columns()
            .iter()
            .map(|c| {
                Ok(Field::new(
                    c.name.as_str(),
                    map_arrow_type(&c.logical_type)?,
                    c.nullable,
                ))
            })
            .collect::<Result<_>>()?;
        let arrow_schema = Arc::new(ArrowSchema::new(fields));

        let file = std::fs::File::create(&self.path).map_err(|e| {
            DumpError::Output(format!("failed to create {}: {}", self.path.display(), e))
        })?;
        let counting = CountingWriter {
            inner: file,
            count: Arc::clone(&self.bytes_written),
        };

        let props = WriterProperties::builder()
            .set_compression(map_compression(self.compression))
            .set_max_row_group_size(self.row_group_size)
            .build();

        let writer = ArrowWriter::try_new(counting, Arc::clone(&arrow_schema), Some(props))
            .map_err(|e| DumpError::Output(e.to_string()))?;

        self.schema = schema.clone();
        self.arrow_schema = Some(arrow_schema);
        self.writer = Some(writer);

        debug!("Initialized Parquet output at {}", self.path.display());
        Ok(())
    }

    async fn write_batch(&mut self, rows: Vec<Row>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let arrow_schema = self
            .arrow_schema
            .as_ref()
            .ok_or_else(|| DumpError::Internal("writer not initialized".to_string()))?;

        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.schema.len());
        for (idx, col) in self.schema.columns().iter().enumerate() {
            arrays.push(build_array(&rows, idx, &col.logical_type)?);
        }

        let batch = RecordBatch::try_new(Arc::clone(arrow_schema), arrays)
            .map_err(|e| DumpError::Output(e.to_string()))?;

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| DumpError::Internal("writer not initialized".to_string()))?;
        writer
            .write(&batch)
            .map_err(|e| DumpError::Output(e.to_string()))?;
        // End the row group at the batch boundary.
        writer
            .flush()
            .map_err(|e| DumpError::Output(e.to_string()))?;
        Ok(())
    }

    async fn complete(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .close()
                .map_err(|e| DumpError::Output(e.to_string()))?;
        }
        debug!(
            "Completed Parquet output at {} ({} bytes)",
            self.path.display(),
            self.bytes_written.load(Ordering::Relaxed)
        );
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

/// `std::io::Write` wrapper that counts bytes as they reach the file.
struct CountingWriter {
    inner: std::fs::File,
    count: Arc<AtomicU64>,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count.fetch_add(written as u64, Ordering::Relaxed);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn map_compression(c: ParquetCompression) -> Compression {
    match c {
        ParquetCompression::None => Compression::UNCOMPRESSED,
        ParquetCompression::Snappy => Compression::SNAPPY,
        ParquetCompression::Gzip => Compression::GZIP(Default::default()),
        ParquetCompression::Lz4 => Compression::LZ4,
        ParquetCompression::Zstd => Compression::ZSTD(Default::default()),
    }
}

/// Map a logical type to its Arrow representation.
fn map_arrow_type(ty: &LogicalType) -> Result<DataType> {
    let mapped = match ty {
        LogicalType::Int8 => DataType::Int8,
        LogicalType::Int16 => DataType::Int16,
        LogicalType::Int32 => DataType::Int32,
        LogicalType::Int64 => DataType::Int64,
        LogicalType::UInt8 => DataType::UInt8,
        LogicalType::UInt16 => DataType::UInt16,
        LogicalType::UInt32 => DataType::UInt32,
        LogicalType::UInt64 => DataType::UInt64,
        LogicalType::Float32 => DataType::Float32,
        LogicalType::Float64 => DataType::Float64,
        LogicalType::Decimal { precision, scale } => {
            if *precision > 38 {
                return Err(DumpError::Schema(format!(
                    "decimal precision {} exceeds the Parquet maximum of 38",
                    precision
                )));
            }
            DataType::Decimal128(*precision, *scale)
        }
        LogicalType::Boolean => DataType::Boolean,
        LogicalType::String | LogicalType::Uuid | LogicalType::Json => DataType::Utf8,
        LogicalType::Bytes => DataType::Binary,
        LogicalType::Date => DataType::Date32,
        LogicalType::Time => DataType::Time64(TimeUnit::Microsecond),
        LogicalType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
    };
    Ok(mapped)
}

macro_rules! build_primitive {
    ($builder:ty, $rows:expr, $idx:expr, $variant:path) => {{
        let mut builder = <$builder>::with_capacity($rows.len());
        for row in $rows {
            match &row[$idx] {
                Value::Null => builder.append_null(),
                $variant(v) => builder.append_value(*v),
                other => return Err(cell_mismatch($idx, other)),
            }
        }
        Ok(Arc::new(builder.finish()) as ArrayRef)
    }};
}

/// Pivot one column of a row batch into an Arrow array.
fn build_array(rows: &[Row], idx: usize, ty: &LogicalType) -> Result<ArrayRef> {
    for row in rows {
        if idx >= row.len() {
            return Err(DumpError::Schema(format!(
                "row has {} cells, expected at least {}",
                row.len(),
                idx + 1
            )));
        }
    }

    match ty {
        LogicalType::Int8 => build_primitive!(Int8Builder, rows, idx, Value::I8),
        LogicalType::Int16 => build_primitive!(Int16Builder, rows, idx, Value::I16),
        LogicalType::Int32 => build_primitive!(Int32Builder, rows, idx, Value::I32),
        LogicalType::Int64 => build_primitive!(Int64Builder, rows, idx, Value::I64),
        LogicalType::UInt8 => build_primitive!(UInt8Builder, rows, idx, Value::U8),
        LogicalType::UInt16 => build_primitive!(UInt16Builder, rows, idx, Value::U16),
        LogicalType::UInt32 => build_primitive!(UInt32Builder, rows, idx, Value::U32),
        LogicalType::UInt64 => build_primitive!(UInt64Builder, rows, idx, Value::U64),
        LogicalType::Float32 => build_primitive!(Float32Builder, rows, idx, Value::F32),
        LogicalType::Float64 => build_primitive!(Float64Builder, rows, idx, Value::F64),
        LogicalType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    Value::Bool(v) => builder.append_value(*v),
                    other => return Err(cell_mismatch(idx, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        LogicalType::Decimal { precision, scale } => {
            let mut builder = Decimal128Builder::with_capacity(rows.len())
                .with_precision_and_scale(*precision, *scale)
                .map_err(|e| DumpError::Schema(e.to_string()))?;
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    Value::Decimal(v) => {
                        let mut scaled = *v;
                        scaled.rescale(*scale as u32);
                        builder.append_value(scaled.mantissa());
                    }
                    other => return Err(cell_mismatch(idx, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        LogicalType::String | LogicalType::Uuid | LogicalType::Json => {
            let mut builder = StringBuilder::with_capacity(rows.len(), rows.len() * 16);
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    // String columns accept any cell through its canonical
                    // rendering; transformers retype to string without
                    // rewriting untouched cells.
                    other => builder.append_value(other.render()),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        LogicalType::Bytes => {
            let mut builder = BinaryBuilder::with_capacity(rows.len(), rows.len() * 16);
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    Value::Bytes(v) => builder.append_value(v),
                    other => return Err(cell_mismatch(idx, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        LogicalType::Date => {
            let mut builder = Date32Builder::with_capacity(rows.len());
            let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch");
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    Value::Date(v) => {
                        builder.append_value(v.signed_duration_since(epoch).num_days() as i32)
                    }
                    other => return Err(cell_mismatch(idx, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        LogicalType::Time => {
            let mut builder = Time64MicrosecondBuilder::with_capacity(rows.len());
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    Value::Time(v) => {
                        let micros = v.num_seconds_from_midnight() as i64 * 1_000_000
                            + (v.nanosecond() / 1_000) as i64;
                        builder.append_value(micros);
                    }
                    other => return Err(cell_mismatch(idx, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        LogicalType::Timestamp => {
            let mut builder = TimestampMicrosecondBuilder::with_capacity(rows.len());
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    Value::Timestamp(v) => builder.append_value(v.and_utc().timestamp_micros()),
                    other => return Err(cell_mismatch(idx, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
    }
}

fn cell_mismatch(idx: usize, value: &Value) -> DumpError {
    DumpError::Schema(format!(
        "cell at column {} has type {} which does not match the column type",
        idx,
        value.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnInfo;
    use arrow::array::{Array, BooleanArray, Int64Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use rust_decimal::Decimal;
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnInfo::new("id", LogicalType::Int64),
            ColumnInfo::new("name", LogicalType::String),
            ColumnInfo::new("active", LogicalType::Boolean),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let mut writer = ParquetWriter::new(&path, &ParquetOptions::default(), 1000);

        writer.initialize(&schema()).await.unwrap();
        writer
            .write_batch(vec![
                vec![Value::I64(1), Value::Text("Alice".into()), Value::Bool(true)],
                vec![Value::I64(2), Value::Null, Value::Bool(false)],
            ])
            .await
            .unwrap();
        writer.complete().await.unwrap();
        assert!(writer.bytes_written() > 0);

        let file = std::fs::File::open(&path).unwrap();
        let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(batch.num_rows(), 2);

        let ids = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.value(0), 1);
        assert_eq!(ids.value(1), 2);

        let names = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "Alice");
        assert!(names.is_null(1));

        let active = batch.column(2).as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(active.value(0));
        assert!(!active.value(1));
    }

    #[tokio::test]
    async fn test_row_groups_align_to_batches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("groups.parquet");
        let mut writer = ParquetWriter::new(&path, &ParquetOptions::default(), 2);

        let schema = Schema::new(vec![ColumnInfo::new("id", LogicalType::Int64)]).unwrap();
        writer.initialize(&schema).await.unwrap();
        writer
            .write_batch(vec![vec![Value::I64(1)], vec![Value::I64(2)]])
            .await
            .unwrap();
        writer
            .write_batch(vec![vec![Value::I64(3)], vec![Value::I64(4)]])
            .await
            .unwrap();
        writer.write_batch(vec![vec![Value::I64(5)]]).await.unwrap();
        writer.complete().await.unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        assert_eq!(builder.metadata().num_row_groups(), 3);
    }

    #[tokio::test]
    async fn test_empty_result_is_valid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        let mut writer = ParquetWriter::new(&path, &ParquetOptions::default(), 1000);
        writer.initialize(&schema()).await.unwrap();
        writer.complete().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"PAR1");

        let file = std::fs::File::open(&path).unwrap();
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        assert_eq!(builder.metadata().file_metadata().num_rows(), 0);
    }

    #[tokio::test]
    async fn test_decimal_rescaled_to_schema_scale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dec.parquet");
        let mut writer = ParquetWriter::new(&path, &ParquetOptions::default(), 1000);

        let schema = Schema::new(vec![ColumnInfo::new(
            "amount",
            LogicalType::Decimal { precision: 10, scale: 2 },
        )])
        .unwrap();
        writer.initialize(&schema).await.unwrap();
        writer
            .write_batch(vec![vec![Value::Decimal(Decimal::new(955, 1))]]) // 95.5
            .await
            .unwrap();
        writer.complete().await.unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let batch = reader.next().unwrap().unwrap();
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Decimal128Array>()
            .unwrap();
        assert_eq!(col.value(0), 9550); // 95.50 at scale 2
    }

    #[tokio::test]
    async fn test_cell_type_mismatch_is_schema_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.parquet");
        let mut writer = ParquetWriter::new(&path, &ParquetOptions::default(), 1000);

        let schema = Schema::new(vec![ColumnInfo::new("id", LogicalType::Int64)]).unwrap();
        writer.initialize(&schema).await.unwrap();
        let err = writer
            .write_batch(vec![vec![Value::Bool(true)]])
            .await
            .unwrap_err();
        assert!(matches!(err, DumpError::Schema(_)));
    }
}
