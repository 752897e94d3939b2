//! Run options and the typed options registry.
//!
//! The front-end populates one [`DumpOptions`] plus one instance of each
//! component options type it has flags for, binds them into an
//! [`OptionsRegistry`], and hands the registry to the export service. The
//! registry is read-only from then on; every component retrieves its own
//! typed slice during construction.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The per-run invariant context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpOptions {
    /// Reader provider key, or `auto` to probe connection predicates.
    pub provider: String,

    /// Source connection string.
    pub connection: String,

    /// Query text. Must be a read-only statement.
    pub query: String,

    /// Output file path; the extension selects the writer.
    pub output: PathBuf,

    /// Timeout for establishing the source connection.
    pub connect_timeout: Duration,

    /// Timeout for each result-set fetch. Zero means no timeout.
    pub query_timeout: Duration,

    /// Rows per batch: the DB fetch unit and the writer append unit.
    pub batch_size: usize,

    /// Upper bound on rows written. Zero means no limit; reaching the
    /// limit is a normal termination, not an error.
    pub limit: u64,

    /// Preview mode: run one row through the pipeline and report the
    /// effect without opening the writer.
    pub dry_run: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            provider: "auto".to_string(),
            connection: String::new(),
            query: String::new(),
            output: PathBuf::new(),
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::ZERO,
            batch_size: 50_000,
            limit: 0,
            dry_run: false,
        }
    }
}

/// Options types bound into the registry.
///
/// Each type declares a stable string prefix; the front-end derives flag
/// names from it (`csv` → `--csv-delimiter`) and diagnostics reference it.
pub trait ComponentOptions: Any + Send + Sync {
    /// The declared flag prefix for this options type.
    fn prefix() -> &'static str
    where
        Self: Sized;
}

/// A mapping from options-type identity to a single bound instance per run.
///
/// Populated by the CLI layer before the orchestrator starts; shared
/// read-only by all components afterwards.
#[derive(Default)]
pub struct OptionsRegistry {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl OptionsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an instance, replacing any previous binding of the same type.
    pub fn bind<T: ComponentOptions>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieve the bound instance of `T`, if any.
    pub fn get<T: ComponentOptions>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }

    /// Retrieve the bound instance of `T`, or its default when unbound.
    pub fn get_or_default<T: ComponentOptions + Default + Clone>(&self) -> T {
        self.get::<T>().cloned().unwrap_or_default()
    }
}

/// CSV writer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvOptions {
    /// Field delimiter.
    pub delimiter: char,

    /// Whether to emit the header row.
    pub header: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            header: true,
        }
    }
}

impl ComponentOptions for CsvOptions {
    fn prefix() -> &'static str {
        "csv"
    }
}

/// Compression codec for Parquet output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParquetCompression {
    None,
    #[default]
    Snappy,
    Gzip,
    Lz4,
    Zstd,
}

impl FromStr for ParquetCompression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ParquetCompression::None),
            "snappy" => Ok(ParquetCompression::Snappy),
            "gzip" => Ok(ParquetCompression::Gzip),
            "lz4" => Ok(ParquetCompression::Lz4),
            "zstd" => Ok(ParquetCompression::Zstd),
            other => Err(format!(
                "unknown compression '{}'. Valid options: none, snappy, gzip, lz4, zstd",
                other
            )),
        }
    }
}

/// Parquet writer options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParquetOptions {
    /// Compression codec for all columns.
    pub compression: ParquetCompression,
}

impl ComponentOptions for ParquetOptions {
    fn prefix() -> &'static str {
        "parquet"
    }
}

/// Anonymization transformer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeOptions {
    /// `COLUMN:spec` mappings, applied in dependency order.
    pub mappings: Vec<String>,

    /// Locale code for generated data.
    pub locale: String,

    /// RNG seed; a fixed seed makes the generated sequence reproducible.
    pub seed: Option<u64>,

    /// Columns overwritten with NULL regardless of any mapping.
    pub null_columns: Vec<String>,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            mappings: Vec::new(),
            locale: "en".to_string(),
            seed: None,
            null_columns: Vec::new(),
        }
    }
}

impl FakeOptions {
    /// Whether the transformer has anything to do.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.mappings.is_empty() || !self.null_columns.is_empty()
    }
}

impl ComponentOptions for FakeOptions {
    fn prefix() -> &'static str {
        "fake"
    }
}

/// Formatting transformer options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatOptions {
    /// `COLUMN:template` mappings, applied in dependency order.
    pub mappings: Vec<String>,
}

impl FormatOptions {
    /// Whether the transformer has anything to do.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.mappings.is_empty()
    }
}

impl ComponentOptions for FormatOptions {
    fn prefix() -> &'static str {
        "format"
    }
}
