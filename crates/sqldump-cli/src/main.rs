//! sqldump CLI - stream SQL query results into Parquet or CSV files.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use sqldump::{
    CsvOptions, DumpError, DumpOptions, ExportService, FakeOptions, FakerRegistry, FormatOptions,
    OptionsRegistry, ParquetCompression, ParquetOptions, ProviderCatalog,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "sqldump")]
#[command(about = "Export a read-only SQL query to Parquet or CSV")]
#[command(version)]
struct Cli {
    /// Source connection string. Falls back to the provider's environment
    /// variable when empty.
    #[arg(short, long, default_value = "")]
    connection: String,

    /// Provider: auto, postgres or mssql
    #[arg(long, default_value = "auto")]
    provider: String,

    /// Query text. Must be a SELECT (or WITH) statement.
    #[arg(short, long)]
    query: Option<String>,

    /// Output file path; the extension selects the format (.csv, .parquet)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Connection timeout in seconds
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Query timeout in seconds (0 = none)
    #[arg(long, default_value = "0")]
    query_timeout: u64,

    /// Rows per batch (DB fetch unit and writer append unit)
    #[arg(long, default_value = "50000")]
    batch_size: usize,

    /// Stop after this many rows (0 = no limit)
    #[arg(long, default_value = "0")]
    limit: u64,

    /// Preview: run one row through the pipeline and show the effect
    #[arg(long)]
    dry_run: bool,

    /// List available faker datasets and methods, then exit
    #[arg(long)]
    list_fakers: bool,

    /// Anonymize a column: COLUMN:dataset.method, COLUMN:literal or a
    /// template with {{OTHER_COLUMN}} references. Repeatable.
    #[arg(long = "fake", value_name = "COLUMN:SPEC")]
    fake: Vec<String>,

    /// Overwrite a column with NULL. Repeatable.
    #[arg(long = "null", value_name = "COLUMN")]
    null: Vec<String>,

    /// Reformat a column: COLUMN:template with {NAME} or {NAME:format}
    /// placeholders. Repeatable.
    #[arg(long = "format", value_name = "COLUMN:TEMPLATE")]
    format: Vec<String>,

    /// Locale for generated data
    #[arg(long, default_value = "en")]
    fake_locale: String,

    /// Seed for reproducible generated data
    #[arg(long)]
    fake_seed: Option<u64>,

    /// CSV field delimiter
    #[arg(long, default_value = ",")]
    csv_delimiter: String,

    /// Omit the CSV header row
    #[arg(long)]
    csv_no_header: bool,

    /// Parquet compression: none, snappy, gzip, lz4, zstd
    #[arg(long, default_value = "snappy")]
    parquet_compression: String,

    /// Output the run summary as JSON to stdout
    #[arg(long)]
    output_json: bool,

    /// Log progress counters while the export runs
    #[arg(long)]
    progress: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "warn")]
    verbosity: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if matches!(e, DumpError::Security(_)) {
                eprintln!("SECURITY VIOLATION: {}", e);
            } else {
                eprintln!("{}", e.format_detailed());
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), DumpError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(DumpError::Config)?;

    if cli.list_fakers {
        print_fakers();
        return Ok(());
    }

    let options = build_options(&cli)?;
    let registry = build_registry(&cli)?;
    let catalog = ProviderCatalog::with_builtins();

    let cancel = setup_signal_handler();

    let service = ExportService::new(catalog, registry, options).with_progress(cli.progress);
    let summary = service.run(cancel).await?;

    if let Some(ref report) = summary.dry_run_report {
        print!("{}", report);
    }

    if cli.output_json {
        println!("{}", summary.to_json()?);
    } else if summary.status == "no-columns" {
        println!("The query returned no columns; nothing was exported.");
    } else if summary.status == "completed" {
        println!("Export completed");
        println!("  Rows: {}", summary.rows_written);
        println!("  Bytes: {}", summary.bytes_written);
        println!("  Duration: {:.2}s", summary.duration_seconds);
        println!("  Throughput: {} rows/sec", summary.rows_per_second);
    }

    Ok(())
}

fn build_options(cli: &Cli) -> Result<DumpOptions, DumpError> {
    let query = cli
        .query
        .clone()
        .ok_or_else(|| DumpError::Config("--query is required".to_string()))?;
    let output = if cli.dry_run {
        cli.output.clone().unwrap_or_default()
    } else {
        cli.output
            .clone()
            .ok_or_else(|| DumpError::Config("--output is required".to_string()))?
    };
    if cli.batch_size == 0 {
        return Err(DumpError::Config("--batch-size must be positive".to_string()));
    }

    Ok(DumpOptions {
        provider: cli.provider.clone(),
        connection: cli.connection.clone(),
        query,
        output,
        connect_timeout: Duration::from_secs(cli.connect_timeout),
        query_timeout: Duration::from_secs(cli.query_timeout),
        batch_size: cli.batch_size,
        limit: cli.limit,
        dry_run: cli.dry_run,
    })
}

fn build_registry(cli: &Cli) -> Result<OptionsRegistry, DumpError> {
    let mut registry = OptionsRegistry::new();

    let mut delimiter_chars = cli.csv_delimiter.chars();
    let delimiter = match (delimiter_chars.next(), delimiter_chars.next()) {
        (Some(c), None) => c,
        _ => {
            return Err(DumpError::Config(format!(
                "--csv-delimiter must be a single character, got '{}'",
                cli.csv_delimiter
            )))
        }
    };
    registry.bind(CsvOptions {
        delimiter,
        header: !cli.csv_no_header,
    });

    let compression: ParquetCompression = cli
        .parquet_compression
        .parse()
        .map_err(DumpError::Config)?;
    registry.bind(ParquetOptions { compression });

    registry.bind(FakeOptions {
        mappings: cli.fake.clone(),
        locale: cli.fake_locale.clone(),
        seed: cli.fake_seed,
        null_columns: cli.null.clone(),
    });

    registry.bind(FormatOptions {
        mappings: cli.format.clone(),
    });

    Ok(registry)
}

fn print_fakers() {
    let registry = FakerRegistry::with_builtins();
    let mut width = 0;
    for dataset in registry.datasets() {
        for method in dataset.methods() {
            width = width.max(dataset.name.len() + 1 + method.name.len());
        }
    }
    println!("{:w$}  returns", "method", w = width);
    for dataset in registry.datasets() {
        for method in dataset.methods() {
            println!(
                "{:w$}  {}",
                format!("{}.{}", dataset.name, method.name),
                method.returns.name(),
                w = width
            );
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Cancel the export on SIGINT (Ctrl-C) or SIGTERM; the run then ends
/// with exit code 130.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to set up SIGINT handler");
        sigint.recv().await;
        info!("Received SIGINT, shutting down");
        token.cancel();
    });

    let token = cancel.clone();
    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to set up SIGTERM handler");
        sigterm.recv().await;
        info!("Received SIGTERM, shutting down");
        token.cancel();
    });

    cancel
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to set up Ctrl-C handler");
        info!("Received Ctrl-C, shutting down");
        token.cancel();
    });
    cancel
}
