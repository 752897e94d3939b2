//! Export orchestration.
//!
//! [`ExportService`] resolves the reader, writer and transformer list
//! from the provider catalog, threads the schema through the transformer
//! chain, and runs the three-stage pipeline: a producer unbatches reader
//! output into a bounded channel, a single transform stage rewrites rows,
//! and a consumer rebatches and hands batches to the writer. Two bounded
//! channels propagate backpressure end to end; a slow writer stalls the
//! transformer, which stalls the producer, which stalls the cursor.

pub mod dryrun;
pub mod progress;

pub use progress::{ProgressReporter, ProgressSnapshot};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::value::Row;
use crate::core::{DataTransformer, DataWriter, StreamReader};
use crate::error::{DumpError, Result};
use crate::options::{DumpOptions, OptionsRegistry};
use crate::providers::{ProviderCatalog, ReaderDescriptor};
use crate::transform::initialize_chain;

/// Capacity of each pipeline channel, in rows.
const CHANNEL_CAPACITY: usize = 1000;

/// Result of an export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: `completed`, `no-columns` or `dry-run`.
    pub status: String,

    /// When the export started.
    pub started_at: DateTime<Utc>,

    /// When the export completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Rows read from the source.
    pub rows_read: u64,

    /// Rows handed to the writer.
    pub rows_written: u64,

    /// Bytes written to the output.
    pub bytes_written: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Rendered preview table, present only for dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run_report: Option<String>,
}

impl ExportSummary {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| DumpError::Internal(e.to_string()))
    }
}

/// The export orchestrator.
pub struct ExportService {
    catalog: ProviderCatalog,
    registry: OptionsRegistry,
    options: DumpOptions,
    progress: Arc<ProgressReporter>,
    log_progress: bool,
}

impl ExportService {
    /// Create a service over a populated catalog and options registry.
    pub fn new(catalog: ProviderCatalog, registry: OptionsRegistry, options: DumpOptions) -> Self {
        Self {
            catalog,
            registry,
            options,
            progress: Arc::new(ProgressReporter::new()),
            log_progress: false,
        }
    }

    /// Enable periodic progress logging.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.log_progress = enabled;
        self
    }

    /// Shared progress counters for external observers.
    pub fn progress(&self) -> Arc<ProgressReporter> {
        Arc::clone(&self.progress)
    }

    /// Run the export to completion, cancellation or first error.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ExportSummary> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        let descriptor = resolve_connection_and_reader(&mut self.options, &self.catalog)?;
        info!("Using provider '{}'", descriptor.name);

        let mut reader = (descriptor.build)(&self.options, &self.registry);
        if let Err(e) = reader.open().await {
            reader.close().await;
            return Err(e);
        }

        let input_schema = reader.columns().clone();
        if input_schema.is_empty() {
            info!("Query returned no columns; nothing to export");
            reader.close().await;
            return Ok(self.summary(run_id, "no-columns", started_at, None));
        }
        debug!("Source schema has {} columns", input_schema.len());

        let mut transformers = self.catalog.build_transformers(&self.registry);
        let final_schema = match initialize_chain(&mut transformers, &input_schema) {
            Ok(schema) => schema,
            Err(e) => {
                reader.close().await;
                return Err(e);
            }
        };
        let writer_schema = final_schema.without_virtual();
        if writer_schema.is_empty() {
            info!("All output columns are virtual; nothing to export");
            reader.close().await;
            return Ok(self.summary(run_id, "no-columns", started_at, None));
        }

        if self.options.dry_run {
            let report = run_dry_run(&mut reader, &mut transformers, &input_schema, &final_schema)
                .await;
            reader.close().await;
            return report
                .map(|report| self.summary(run_id, "dry-run", started_at, Some(report)));
        }

        let writer_descriptor = match self.catalog.writer_for_path(&self.options.output) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                reader.close().await;
                return Err(e);
            }
        };
        let mut writer = (writer_descriptor.build)(&self.options, &self.registry);
        if let Err(e) = writer.initialize(&writer_schema).await {
            reader.close().await;
            return Err(e);
        }

        let outcome = self
            .run_pipeline(reader, transformers, writer, &final_schema, cancel)
            .await;

        match outcome {
            Ok(()) => {
                let snapshot = self.progress.snapshot();
                info!(
                    "Export completed: {} rows, {} bytes",
                    snapshot.rows_written, snapshot.bytes_written
                );
                Ok(self.summary(run_id, "completed", started_at, None))
            }
            Err(e) => {
                warn!(
                    "Export did not complete; {} may be partial",
                    self.options.output.display()
                );
                Err(e)
            }
        }
    }

    /// Run the three concurrent stages and join them.
    async fn run_pipeline(
        &self,
        reader: Box<dyn StreamReader>,
        transformers: Vec<Box<dyn DataTransformer>>,
        writer: Box<dyn DataWriter>,
        final_schema: &crate::core::Schema,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (transform_tx, transform_rx) = mpsc::channel::<Row>(CHANNEL_CAPACITY);
        let (write_tx, write_rx) = mpsc::channel::<Row>(CHANNEL_CAPACITY);

        let done = CancellationToken::new();
        let logger = self.spawn_progress_logger(done.clone());

        let producer = spawn_producer(
            reader,
            transform_tx,
            cancel.clone(),
            Arc::clone(&self.progress),
            self.options.batch_size,
            self.options.limit,
        );
        let transformer = spawn_transformer(
            transformers,
            transform_rx,
            write_tx,
            cancel.clone(),
            Arc::clone(&self.progress),
            final_schema.non_virtual_positions(),
            final_schema.has_virtual(),
        );
        let consumer = spawn_consumer(
            writer,
            write_rx,
            cancel.clone(),
            Arc::clone(&self.progress),
            self.options.batch_size,
        );

        let (produced, transformed, written) = tokio::join!(producer, transformer, consumer);
        done.cancel();
        if let Some(logger) = logger {
            let _ = logger.await;
        }

        let results = [
            flatten_stage(produced, "producer"),
            flatten_stage(transformed, "transformer"),
            flatten_stage(written, "consumer"),
        ];

        // The stage that failed cancelled the others; report its error,
        // not the Cancelled cascade.
        let mut cancelled = false;
        for result in results {
            match result {
                Err(DumpError::Cancelled) => cancelled = true,
                Err(e) => return Err(e),
                Ok(_) => {}
            }
        }
        if cancelled {
            return Err(DumpError::Cancelled);
        }
        Ok(())
    }

    fn spawn_progress_logger(&self, done: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.log_progress {
            return None;
        }
        let progress = Arc::clone(&self.progress);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = done.cancelled() => break,
                    _ = interval.tick() => {
                        let s = progress.snapshot();
                        info!(
                            "progress: {} read, {} transformed, {} written, {} bytes",
                            s.rows_read, s.rows_transformed, s.rows_written, s.bytes_written
                        );
                    }
                }
            }
        }))
    }

    fn summary(
        &self,
        run_id: String,
        status: &str,
        started_at: DateTime<Utc>,
        dry_run_report: Option<String>,
    ) -> ExportSummary {
        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let snapshot = self.progress.snapshot();
        let rows_per_second = if duration > 0.0 {
            (snapshot.rows_written as f64 / duration) as u64
        } else {
            0
        };
        ExportSummary {
            run_id,
            status: status.to_string(),
            started_at,
            completed_at,
            duration_seconds: duration,
            rows_read: snapshot.rows_read,
            rows_written: snapshot.rows_written,
            bytes_written: snapshot.bytes_written,
            rows_per_second,
            dry_run_report,
        }
    }
}

/// Apply the environment fallback for an empty connection flag, then
/// resolve the reader descriptor.
fn resolve_connection_and_reader<'a>(
    options: &mut DumpOptions,
    catalog: &'a ProviderCatalog,
) -> Result<&'a ReaderDescriptor> {
    if options.connection.is_empty() {
        if options.provider.eq_ignore_ascii_case("auto") {
            for descriptor in catalog.readers() {
                if let Some(var) = descriptor.env_var {
                    if let Ok(value) = std::env::var(var) {
                        if !value.is_empty() {
                            info!("Using connection string from ${}", var);
                            options.connection = value;
                            options.provider = descriptor.name.to_string();
                            break;
                        }
                    }
                }
            }
        } else if let Some(descriptor) = catalog.reader(&options.provider) {
            if let Some(var) = descriptor.env_var {
                if let Ok(value) = std::env::var(var) {
                    if !value.is_empty() {
                        info!("Using connection string from ${}", var);
                        options.connection = value;
                    }
                }
            }
        }
        if options.connection.is_empty() {
            return Err(DumpError::Config(
                "no connection string given; pass --connection or set the provider's \
                 environment variable"
                    .to_string(),
            ));
        }
    }
    catalog.resolve_reader(options)
}

/// Fetch one row, run it through the chain and render the diff table.
async fn run_dry_run(
    reader: &mut Box<dyn StreamReader>,
    transformers: &mut [Box<dyn DataTransformer>],
    input_schema: &crate::core::Schema,
    final_schema: &crate::core::Schema,
) -> Result<String> {
    let batch = reader.next_batch(1).await?;
    let Some(row) = batch.and_then(|b| b.rows.into_iter().next()) else {
        return Ok("query returned no rows; nothing to preview\n".to_string());
    };

    let input_row = row.clone();
    let mut output_row = row;
    for transformer in transformers.iter_mut() {
        output_row = transformer.transform(output_row)?;
    }
    Ok(dryrun::render_diff(
        input_schema,
        &input_row,
        final_schema,
        &output_row,
    ))
}

fn spawn_producer(
    mut reader: Box<dyn StreamReader>,
    tx: mpsc::Sender<Row>,
    cancel: CancellationToken,
    progress: Arc<ProgressReporter>,
    batch_size: usize,
    limit: u64,
) -> JoinHandle<Result<u64>> {
    tokio::spawn(async move {
        let mut sent: u64 = 0;
        let result: Result<()> = async {
            'read: loop {
                let batch = tokio::select! {
                    _ = cancel.cancelled() => return Err(DumpError::Cancelled),
                    batch = reader.next_batch(batch_size) => batch?,
                };
                let Some(batch) = batch else { break };

                for row in batch.rows {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(DumpError::Cancelled),
                        sent_row = tx.send(row) => {
                            if sent_row.is_err() {
                                // Downstream is gone; its error is reported there.
                                break 'read;
                            }
                        }
                    }
                    sent += 1;
                    progress.add_read(1);
                    if limit > 0 && sent >= limit {
                        info!("Row limit of {} reached", limit);
                        break 'read;
                    }
                }
            }
            Ok(())
        }
        .await;

        reader.close().await;
        match result {
            Ok(()) => Ok(sent),
            Err(e) => {
                cancel.cancel();
                Err(e)
            }
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_transformer(
    mut transformers: Vec<Box<dyn DataTransformer>>,
    mut rx: mpsc::Receiver<Row>,
    tx: mpsc::Sender<Row>,
    cancel: CancellationToken,
    progress: Arc<ProgressReporter>,
    keep_positions: Vec<usize>,
    has_virtual: bool,
) -> JoinHandle<Result<u64>> {
    tokio::spawn(async move {
        let mut transformed: u64 = 0;
        let result: Result<()> = async {
            loop {
                let row = tokio::select! {
                    _ = cancel.cancelled() => return Err(DumpError::Cancelled),
                    row = rx.recv() => row,
                };
                let Some(mut row) = row else { break };

                for transformer in transformers.iter_mut() {
                    row = transformer.transform(row)?;
                }
                // Virtual columns exist only between transformers; elide
                // them before the writer.
                if has_virtual {
                    row = keep_positions
                        .iter()
                        .map(|pos| std::mem::replace(&mut row[*pos], crate::core::Value::Null))
                        .collect();
                }

                transformed += 1;
                progress.add_transformed(1);

                tokio::select! {
                    _ = cancel.cancelled() => return Err(DumpError::Cancelled),
                    sent = tx.send(row) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Ok(transformed),
            Err(e) => {
                cancel.cancel();
                Err(e)
            }
        }
    })
}

fn spawn_consumer(
    mut writer: Box<dyn DataWriter>,
    mut rx: mpsc::Receiver<Row>,
    cancel: CancellationToken,
    progress: Arc<ProgressReporter>,
    batch_size: usize,
) -> JoinHandle<Result<u64>> {
    tokio::spawn(async move {
        let mut written: u64 = 0;
        let result: Result<()> = async {
            let mut buffer: Vec<Row> = Vec::with_capacity(batch_size.min(CHANNEL_CAPACITY));
            loop {
                let row = tokio::select! {
                    _ = cancel.cancelled() => return Err(DumpError::Cancelled),
                    row = rx.recv() => row,
                };
                match row {
                    Some(row) => {
                        buffer.push(row);
                        if buffer.len() >= batch_size {
                            let rows = std::mem::take(&mut buffer);
                            let count = rows.len() as u64;
                            writer.write_batch(rows).await?;
                            written += count;
                            progress.add_written(count);
                            progress.record_bytes(writer.bytes_written());
                        }
                    }
                    None => break,
                }
            }
            if !buffer.is_empty() {
                let count = buffer.len() as u64;
                writer.write_batch(buffer).await?;
                written += count;
                progress.add_written(count);
            }

            // The writer is finalized only on a clean drain. A cancelled
            // or failed run leaves the file unfinalized.
            if cancel.is_cancelled() {
                return Err(DumpError::Cancelled);
            }
            writer.complete().await?;
            progress.record_bytes(writer.bytes_written());
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Ok(written),
            Err(e) => {
                cancel.cancel();
                Err(e)
            }
        }
    })
}

fn flatten_stage(
    joined: std::result::Result<Result<u64>, tokio::task::JoinError>,
    stage: &str,
) -> Result<u64> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(DumpError::Internal(format!("{} task failed: {}", stage, e))),
    }
}
