//! SQL Server reader.
//!
//! Connects with `tiberius` over a raw TCP stream. The TDS query stream
//! borrows the client, so a background task owns both and feeds decoded
//! rows into a bounded channel; the reader side pulls batches from the
//! channel, which gives the same backpressure behavior as the lazy
//! PostgreSQL stream.

use async_trait::async_trait;
use futures::TryStreamExt;
use tiberius::{Client, ColumnType, Config as TdsConfig, QueryItem};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::core::schema::{ColumnInfo, LogicalType, Schema};
use crate::core::value::{Batch, Row, Value};
use crate::core::StreamReader;
use crate::error::{DumpError, Result};
use crate::options::DumpOptions;
use crate::readers::guard::ensure_read_only;
use crate::readers::redact_connection_string;

/// Number of rows buffered between the TDS stream task and the reader.
const STREAM_BUFFER_ROWS: usize = 1024;

/// SQL Server implementation of [`StreamReader`].
pub struct MssqlReader {
    connection: String,
    query: String,
    connect_timeout: std::time::Duration,
    query_timeout: std::time::Duration,
    schema: Schema,
    rows: Option<mpsc::Receiver<Result<Row>>>,
    task: Option<JoinHandle<()>>,
}

impl MssqlReader {
    /// Create a reader bound to the run options. No I/O happens until
    /// [`open`](StreamReader::open).
    pub fn new(options: &DumpOptions) -> Self {
        Self {
            connection: options.connection.clone(),
            query: options.query.clone(),
            connect_timeout: options.connect_timeout,
            query_timeout: options.query_timeout,
            schema: Schema::default(),
            rows: None,
            task: None,
        }
    }

    /// Whether a connection string looks like a SQL Server one.
    pub fn can_handle(conn: &str) -> bool {
        let lower = conn.to_ascii_lowercase();
        lower.starts_with("jdbc:sqlserver://")
            || lower.contains("server=")
            || lower.contains("data source=")
            || lower.contains("initial catalog=")
    }

    async fn connect(&self) -> Result<Client<Compat<TcpStream>>> {
        let config = if self.connection.starts_with("jdbc:sqlserver://") {
            TdsConfig::from_jdbc_string(&self.connection)
        } else {
            TdsConfig::from_ado_string(&self.connection)
        }
        .map_err(|e| DumpError::Config(format!("invalid connection string: {}", e)))?;

        let connect = async {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| DumpError::Connection(e.to_string()))?;
            tcp.set_nodelay(true)
                .map_err(|e| DumpError::Connection(e.to_string()))?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(map_tds_err)
        };

        tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                DumpError::Connection(format!(
                    "connection to {} timed out after {:?}",
                    redact_connection_string(&self.connection),
                    self.connect_timeout
                ))
            })?
    }
}

#[async_trait]
impl StreamReader for MssqlReader {
    async fn open(&mut self) -> Result<()> {
        ensure_read_only(&self.query)?;

        let client = self.connect().await?;
        info!(
            "Connected to SQL Server source: {}",
            redact_connection_string(&self.connection)
        );

        let (schema_tx, schema_rx) = oneshot::channel();
        let (row_tx, row_rx) = mpsc::channel::<Result<Row>>(STREAM_BUFFER_ROWS);
        let query = self.query.clone();

        let task = tokio::spawn(stream_rows(client, query, schema_tx, row_tx));

        self.schema = schema_rx
            .await
            .map_err(|_| DumpError::Query("query returned no result set".to_string()))??;
        debug!("Result set has {} columns", self.schema.len());

        self.rows = Some(row_rx);
        self.task = Some(task);
        Ok(())
    }

    fn columns(&self) -> &Schema {
        &self.schema
    }

    async fn next_batch(&mut self, batch_size: usize) -> Result<Option<Batch>> {
        let rx = self
            .rows
            .as_mut()
            .ok_or_else(|| DumpError::Internal("reader not opened".to_string()))?;

        let mut rows = Vec::with_capacity(batch_size.min(STREAM_BUFFER_ROWS));
        while rows.len() < batch_size {
            let next = if self.query_timeout.is_zero() {
                rx.recv().await
            } else {
                match tokio::time::timeout(self.query_timeout, rx.recv()).await {
                    Ok(item) => item,
                    Err(_) => {
                        return Err(DumpError::Query(format!(
                            "fetch timed out after {:?}",
                            self.query_timeout
                        )))
                    }
                }
            };
            match next {
                Some(Ok(row)) => rows.push(row),
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Batch::new(rows)))
        }
    }

    async fn close(&mut self) {
        // Dropping the receiver makes the stream task's next send fail,
        // which ends the task and releases the connection.
        self.rows = None;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("TDS stream task ended abnormally: {}", e);
                }
            }
        }
    }
}

/// Background task: run the query and push decoded rows into the channel.
///
/// Only the first result set is exported; a second metadata item ends the
/// stream.
async fn stream_rows(
    mut client: Client<Compat<TcpStream>>,
    query: String,
    schema_tx: oneshot::Sender<Result<Schema>>,
    row_tx: mpsc::Sender<Result<Row>>,
) {
    let mut stream = match client.query(&query, &[]).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = schema_tx.send(Err(map_tds_err(e)));
            return;
        }
    };

    let mut schema_tx = Some(schema_tx);
    let mut column_types: Vec<LogicalType> = Vec::new();

    loop {
        match stream.try_next().await {
            Ok(Some(QueryItem::Metadata(meta))) => {
                if let Some(tx) = schema_tx.take() {
                    let columns: Vec<ColumnInfo> = meta
                        .columns()
                        .iter()
                        .map(|c| ColumnInfo::new(c.name(), map_tds_type(c.column_type())))
                        .collect();
                    column_types = columns.iter().map(|c| c.logical_type).collect();
                    let schema = Schema::new(columns);
                    let failed = schema.is_err();
                    if tx.send(schema).is_err() || failed {
                        return;
                    }
                } else {
                    // Second result set: not exported.
                    return;
                }
            }
            Ok(Some(QueryItem::Row(row))) => {
                let decoded = decode_tds_row(&row, &column_types);
                if row_tx.send(decoded).await.is_err() {
                    // Receiver dropped: the export was cancelled.
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let err = map_tds_err(e);
                if let Some(tx) = schema_tx.take() {
                    let _ = tx.send(Err(err));
                } else {
                    let _ = row_tx.send(Err(err)).await;
                }
                return;
            }
        }
    }
}

fn map_tds_err(e: tiberius::error::Error) -> DumpError {
    if let tiberius::error::Error::Server(token) = &e {
        // 229/230: SELECT/column permission denied. 18456: login failed.
        match token.code() {
            229 | 230 => return DumpError::Permission(token.message().to_string()),
            18456 => return DumpError::Connection(token.message().to_string()),
            _ => {}
        }
    }
    match e {
        tiberius::error::Error::Io { .. } | tiberius::error::Error::Routing { .. } => {
            DumpError::Connection(e.to_string())
        }
        other => DumpError::Query(other.to_string()),
    }
}

/// Map a TDS column type to the closed logical type set.
fn map_tds_type(ty: ColumnType) -> LogicalType {
    match ty {
        ColumnType::Bit | ColumnType::Bitn => LogicalType::Boolean,
        // tinyint is unsigned on SQL Server
        ColumnType::Int1 => LogicalType::UInt8,
        ColumnType::Int2 => LogicalType::Int16,
        ColumnType::Int4 => LogicalType::Int32,
        ColumnType::Int8 | ColumnType::Intn => LogicalType::Int64,
        ColumnType::Float4 => LogicalType::Float32,
        ColumnType::Float8 | ColumnType::Floatn => LogicalType::Float64,
        ColumnType::Money | ColumnType::Money4 => LogicalType::Decimal {
            precision: 19,
            scale: 4,
        },
        ColumnType::Decimaln | ColumnType::Numericn => LogicalType::Decimal {
            precision: 38,
            scale: 10,
        },
        ColumnType::Guid => LogicalType::Uuid,
        ColumnType::Daten => LogicalType::Date,
        ColumnType::Timen => LogicalType::Time,
        ColumnType::Datetime
        | ColumnType::Datetime4
        | ColumnType::Datetimen
        | ColumnType::Datetime2
        | ColumnType::DatetimeOffsetn => LogicalType::Timestamp,
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => LogicalType::Bytes,
        _ => LogicalType::String,
    }
}

/// Decode one TDS row into cell values.
fn decode_tds_row(row: &tiberius::Row, types: &[LogicalType]) -> Result<Row> {
    let mut cells = Vec::with_capacity(types.len());
    for (idx, ty) in types.iter().enumerate() {
        cells.push(decode_tds_value(row, idx, ty)?);
    }
    Ok(cells)
}

fn decode_tds_value(row: &tiberius::Row, idx: usize, ty: &LogicalType) -> Result<Value> {
    let err = |e: tiberius::error::Error| {
        DumpError::Query(format!("failed to decode column {}: {}", idx, e))
    };

    let value = match ty {
        LogicalType::Boolean => row.try_get::<bool, _>(idx).map_err(err)?.into(),
        LogicalType::UInt8 => row
            .try_get::<u8, _>(idx)
            .map_err(err)?
            .map(Value::U8)
            .unwrap_or(Value::Null),
        LogicalType::Int16 => row.try_get::<i16, _>(idx).map_err(err)?.into(),
        LogicalType::Int32 => row.try_get::<i32, _>(idx).map_err(err)?.into(),
        // Intn columns carry their declared width on the wire.
        LogicalType::Int64 => decode_tds_int(row, idx)?,
        LogicalType::Float32 => row
            .try_get::<f32, _>(idx)
            .map_err(err)?
            .map(Value::F32)
            .unwrap_or(Value::Null),
        LogicalType::Float64 => match row.try_get::<f64, _>(idx) {
            Ok(v) => v.into(),
            Err(_) => row
                .try_get::<f32, _>(idx)
                .map_err(err)?
                .map(|v| Value::F64(v as f64))
                .unwrap_or(Value::Null),
        },
        LogicalType::Decimal { .. } => row
            .try_get::<rust_decimal::Decimal, _>(idx)
            .map_err(err)?
            .into(),
        LogicalType::Uuid => row
            .try_get::<uuid::Uuid, _>(idx)
            .map_err(err)?
            .into(),
        LogicalType::Date => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .map_err(err)?
            .into(),
        LogicalType::Time => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .map_err(err)?
            .into(),
        LogicalType::Timestamp => match row.try_get::<chrono::NaiveDateTime, _>(idx) {
            Ok(v) => v.into(),
            // datetimeoffset decodes as an offset-aware value; normalize.
            Err(_) => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
                .map_err(err)?
                .map(|dt| Value::Timestamp(dt.naive_utc()))
                .unwrap_or(Value::Null),
        },
        LogicalType::Bytes => row
            .try_get::<&[u8], _>(idx)
            .map_err(err)?
            .map(|b| Value::Bytes(b.to_vec()))
            .unwrap_or(Value::Null),
        _ => match row.try_get::<&str, _>(idx) {
            Ok(v) => v.map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null),
            Err(_) => Value::Null,
        },
    };
    Ok(value)
}

/// Integer decode that accepts any wire width.
fn decode_tds_int(row: &tiberius::Row, idx: usize) -> Result<Value> {
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Ok(v.into());
    }
    if let Ok(v) = row.try_get::<i32, _>(idx) {
        return Ok(v.map(|v| Value::I64(v as i64)).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<i16, _>(idx) {
        return Ok(v.map(|v| Value::I64(v as i64)).unwrap_or(Value::Null));
    }
    row.try_get::<u8, _>(idx)
        .map(|v| v.map(|v| Value::I64(v as i64)).unwrap_or(Value::Null))
        .map_err(|e| DumpError::Query(format!("failed to decode column {}: {}", idx, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_handle() {
        assert!(MssqlReader::can_handle(
            "Server=tcp:localhost,1433;Database=db;User Id=sa;Password=p"
        ));
        assert!(MssqlReader::can_handle("jdbc:sqlserver://localhost:1433"));
        assert!(MssqlReader::can_handle(
            "Data Source=localhost;Initial Catalog=db"
        ));
        assert!(!MssqlReader::can_handle("postgres://localhost/db"));
        assert!(!MssqlReader::can_handle("host=localhost dbname=db"));
    }

    #[test]
    fn test_map_tds_type() {
        assert_eq!(map_tds_type(ColumnType::Bit), LogicalType::Boolean);
        assert_eq!(map_tds_type(ColumnType::Int1), LogicalType::UInt8);
        assert_eq!(map_tds_type(ColumnType::Int8), LogicalType::Int64);
        assert_eq!(map_tds_type(ColumnType::NVarchar), LogicalType::String);
        assert_eq!(map_tds_type(ColumnType::Daten), LogicalType::Date);
        assert_eq!(map_tds_type(ColumnType::Image), LogicalType::Bytes);
        assert!(matches!(
            map_tds_type(ColumnType::Decimaln),
            LogicalType::Decimal { .. }
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_non_select_before_connecting() {
        let options = DumpOptions {
            connection: "Server=tcp:198.51.100.1,1433;Database=db".to_string(),
            query: "DROP TABLE users".to_string(),
            ..Default::default()
        };
        let mut reader = MssqlReader::new(&options);
        let err = reader.open().await.unwrap_err();
        assert!(matches!(err, DumpError::Security(_)));
    }
}
