//! PostgreSQL reader.
//!
//! Connects with `tokio-postgres`, prepares the query to materialize the
//! column schema without executing it, then streams the result set with
//! `query_raw` so rows are fetched lazily under backpressure.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use rustls::ClientConfig;
use tokio_postgres::config::SslMode;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Config as PgConfig, RowStream, Statement};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};

use crate::core::schema::{ColumnInfo, LogicalType, Schema};
use crate::core::value::{Batch, Row, Value};
use crate::core::StreamReader;
use crate::error::{DumpError, Result};
use crate::options::DumpOptions;
use crate::readers::guard::ensure_read_only;
use crate::readers::redact_connection_string;

/// PostgreSQL implementation of [`StreamReader`].
pub struct PostgresReader {
    connection: String,
    query: String,
    connect_timeout: std::time::Duration,
    query_timeout: std::time::Duration,
    client: Option<tokio_postgres::Client>,
    statement: Option<Statement>,
    stream: Option<Pin<Box<RowStream>>>,
    schema: Schema,
}

impl PostgresReader {
    /// Create a reader bound to the run options. No I/O happens until
    /// [`open`](StreamReader::open).
    pub fn new(options: &DumpOptions) -> Self {
        Self {
            connection: options.connection.clone(),
            query: options.query.clone(),
            connect_timeout: options.connect_timeout,
            query_timeout: options.query_timeout,
            client: None,
            statement: None,
            stream: None,
            schema: Schema::default(),
        }
    }

    /// Whether a connection string looks like a PostgreSQL one.
    pub fn can_handle(conn: &str) -> bool {
        let lower = conn.to_ascii_lowercase();
        lower.starts_with("postgres://")
            || lower.starts_with("postgresql://")
            || (lower.contains("host=") && !lower.contains("server="))
    }

    async fn connect(&self) -> Result<tokio_postgres::Client> {
        let pg_config: PgConfig = self
            .connection
            .parse()
            .map_err(|e| DumpError::Config(format!("invalid connection string: {}", e)))?;

        let connect = async {
            match pg_config.get_ssl_mode() {
                SslMode::Disable => {
                    let (client, connection) =
                        pg_config.connect(tokio_postgres::NoTls).await.map_err(map_connect_err)?;
                    tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            warn!("PostgreSQL connection task ended: {}", e);
                        }
                    });
                    Ok::<_, DumpError>(client)
                }
                _ => {
                    let tls = MakeRustlsConnect::new(build_tls_config());
                    let (client, connection) =
                        pg_config.connect(tls).await.map_err(map_connect_err)?;
                    tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            warn!("PostgreSQL connection task ended: {}", e);
                        }
                    });
                    Ok::<_, DumpError>(client)
                }
            }
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

    async fn fetch_row(
        stream: &mut Pin<Box<RowStream>>,
        query_timeout: std::time::Duration,
    ) -> Result<Option<tokio_postgres::Row>> {
        let next = stream.next();
        let item = if query_timeout.is_zero() {
            next.await
        } else {
            tokio::time::timeout(query_timeout, next)
                .await
                .map_err(|_| {
                    DumpError::Query(format!("fetch timed out after {:?}", query_timeout))
                })?
        };
        item.transpose().map_err(map_query_err)
    }
}

#[async_trait]
impl StreamReader for PostgresReader {
    async fn open(&mut self) -> Result<()> {
        ensure_read_only(&self.query)?;

        let client = self.connect().await?;
        info!(
            "Connected to PostgreSQL source: {}",
            redact_connection_string(&self.connection)
        );

        let statement = client.prepare(&self.query).await.map_err(map_query_err)?;

        let columns: Vec<ColumnInfo> = statement
            .columns()
            .iter()
            .map(|c| ColumnInfo::new(c.name(), map_pg_type(c.type_())))
            .collect();
        self.schema = Schema::new(columns)?;

        debug!("Prepared query with {} columns", self.schema.len());

        self.client = Some(client);
        self.statement = Some(statement);
        Ok(())
    }

    fn columns(&self) -> &Schema {
        &self.schema
    }

    async fn next_batch(&mut self, batch_size: usize) -> Result<Option<Batch>> {
        if self.stream.is_none() {
            let client = self
                .client
                .as_ref()
                .ok_or_else(|| DumpError::Internal("reader not opened".to_string()))?;
            let statement = self
                .statement
                .as_ref()
                .ok_or_else(|| DumpError::Internal("reader not opened".to_string()))?;
            let stream = client
                .query_raw(statement, slice_iter(&[]))
                .await
                .map_err(map_query_err)?;
            self.stream = Some(Box::pin(stream));
        }

        let stream = self.stream.as_mut().expect("stream just installed");
        let types = self.schema.columns().to_vec();

        let mut rows = Vec::with_capacity(batch_size.min(1024));
        while rows.len() < batch_size {
            match Self::fetch_row(stream, self.query_timeout).await? {
                Some(row) => rows.push(decode_pg_row(&row, &types)?),
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
        self.stream = None;
        self.statement = None;
        // Dropping the client terminates the spawned connection task.
        self.client = None;
    }
}

/// Canonical empty-parameter iterator for `query_raw`.
fn slice_iter<'a>(
    s: &'a [&'a (dyn ToSql + Sync)],
) -> impl ExactSizeIterator<Item = &'a dyn ToSql> + 'a {
    s.iter().map(|s| *s as _)
}

fn map_connect_err(e: tokio_postgres::Error) -> DumpError {
    DumpError::Connection(e.to_string())
}

fn map_query_err(e: tokio_postgres::Error) -> DumpError {
    match e.code() {
        Some(code) if *code == SqlState::INSUFFICIENT_PRIVILEGE => {
            DumpError::Permission(e.to_string())
        }
        _ => DumpError::Query(e.to_string()),
    }
}

/// TLS setup for `sslmode` other than `disable`.
///
/// Server certificates are accepted without verification, matching the
/// semantics of libpq's `sslmode=require`.
fn build_tls_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth()
}

/// Map a PostgreSQL wire type to the closed logical type set.
fn map_pg_type(ty: &Type) -> LogicalType {
    if *ty == Type::BOOL {
        LogicalType::Boolean
    } else if *ty == Type::INT2 {
        LogicalType::Int16
    } else if *ty == Type::INT4 {
        LogicalType::Int32
    } else if *ty == Type::INT8 {
        LogicalType::Int64
    } else if *ty == Type::OID {
        LogicalType::UInt32
    } else if *ty == Type::FLOAT4 {
        LogicalType::Float32
    } else if *ty == Type::FLOAT8 {
        LogicalType::Float64
    } else if *ty == Type::NUMERIC {
        LogicalType::Decimal {
            precision: 38,
            scale: 10,
        }
    } else if *ty == Type::BYTEA {
        LogicalType::Bytes
    } else if *ty == Type::DATE {
        LogicalType::Date
    } else if *ty == Type::TIME {
        LogicalType::Time
    } else if *ty == Type::TIMESTAMP || *ty == Type::TIMESTAMPTZ {
        LogicalType::Timestamp
    } else if *ty == Type::UUID {
        LogicalType::Uuid
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        LogicalType::Json
    } else {
        LogicalType::String
    }
}

/// Decode one wire row into cell values, positionally aligned with the
/// schema.
fn decode_pg_row(row: &tokio_postgres::Row, columns: &[ColumnInfo]) -> Result<Row> {
    let mut cells = Vec::with_capacity(columns.len());
    for (idx, col) in columns.iter().enumerate() {
        cells.push(decode_pg_value(row, idx, &col.logical_type)?);
    }
    Ok(cells)
}

fn decode_pg_value(row: &tokio_postgres::Row, idx: usize, ty: &LogicalType) -> Result<Value> {
    let err = |e: tokio_postgres::Error| {
        DumpError::Query(format!("failed to decode column {}: {}", idx, e))
    };

    let value = match ty {
        LogicalType::Boolean => row.try_get::<_, Option<bool>>(idx).map_err(err)?.into(),
        LogicalType::Int16 => row.try_get::<_, Option<i16>>(idx).map_err(err)?.into(),
        LogicalType::Int32 => row.try_get::<_, Option<i32>>(idx).map_err(err)?.into(),
        LogicalType::Int64 => row.try_get::<_, Option<i64>>(idx).map_err(err)?.into(),
        LogicalType::UInt32 => row
            .try_get::<_, Option<u32>>(idx)
            .map_err(err)?
            .map(Value::U32)
            .unwrap_or(Value::Null),
        LogicalType::Float32 => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(err)?
            .map(Value::F32)
            .unwrap_or(Value::Null),
        LogicalType::Float64 => row.try_get::<_, Option<f64>>(idx).map_err(err)?.into(),
        LogicalType::Decimal { .. } => row
            .try_get::<_, Option<rust_decimal::Decimal>>(idx)
            .map_err(err)?
            .into(),
        LogicalType::Bytes => row.try_get::<_, Option<Vec<u8>>>(idx).map_err(err)?.into(),
        LogicalType::Date => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map_err(err)?
            .into(),
        LogicalType::Time => row
            .try_get::<_, Option<chrono::NaiveTime>>(idx)
            .map_err(err)?
            .into(),
        LogicalType::Timestamp => match row.try_get::<_, Option<chrono::NaiveDateTime>>(idx) {
            Ok(v) => v.into(),
            // timestamptz decodes as an offset-aware value; normalize to UTC.
            Err(_) => row
                .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .map_err(err)?
                .map(|dt| Value::Timestamp(dt.naive_utc()))
                .unwrap_or(Value::Null),
        },
        LogicalType::Uuid => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map_err(err)?
            .into(),
        LogicalType::Json => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map_err(err)?
            .map(Value::Json)
            .unwrap_or(Value::Null),
        // Catch-all string mapping: types without a text decoding are
        // nulled rather than failing the whole export.
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.into(),
            Err(_) => Value::Null,
        },
    };
    Ok(value)
}

/// Certificate verifier that accepts any server certificate.
///
/// Used for `sslmode=require` where the channel is encrypted but the
/// certificate chain is not validated.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_handle() {
        assert!(PostgresReader::can_handle("postgres://u:p@localhost/db"));
        assert!(PostgresReader::can_handle("postgresql://localhost/db"));
        assert!(PostgresReader::can_handle("host=localhost user=u dbname=db"));
        assert!(!PostgresReader::can_handle("Server=localhost;Database=db"));
        assert!(!PostgresReader::can_handle("sqlite://file.db"));
    }

    #[test]
    fn test_map_pg_type() {
        assert_eq!(map_pg_type(&Type::BOOL), LogicalType::Boolean);
        assert_eq!(map_pg_type(&Type::INT8), LogicalType::Int64);
        assert_eq!(map_pg_type(&Type::TEXT), LogicalType::String);
        assert_eq!(map_pg_type(&Type::VARCHAR), LogicalType::String);
        assert_eq!(map_pg_type(&Type::TIMESTAMPTZ), LogicalType::Timestamp);
        assert_eq!(map_pg_type(&Type::JSONB), LogicalType::Json);
        assert!(matches!(
            map_pg_type(&Type::NUMERIC),
            LogicalType::Decimal { .. }
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_non_select_before_connecting() {
        // A write statement must be rejected before any network I/O, so an
        // unreachable connection string never comes into play.
        let options = DumpOptions {
            connection: "host=198.51.100.1 user=u dbname=db".to_string(),
            query: "DELETE FROM t".to_string(),
            ..Default::default()
        };
        let mut reader = PostgresReader::new(&options);
        let err = reader.open().await.unwrap_err();
        assert!(matches!(err, DumpError::Security(_)));
    }
}
