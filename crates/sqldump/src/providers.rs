//! Provider descriptors and the startup catalog.
//!
//! A descriptor is the passive record for one pluggable reader, writer or
//! transformer kind: its name, a predicate, and a constructor. The
//! catalog is a fixed list populated at process start; lookups are by
//! case-insensitive provider name or output-path extension. No dynamic
//! loading.

use std::path::Path;

use crate::core::{DataTransformer, DataWriter, StreamReader};
use crate::error::{DumpError, Result};
use crate::options::{
    CsvOptions, DumpOptions, FakeOptions, FormatOptions, OptionsRegistry, ParquetOptions,
};
use crate::readers::{MssqlReader, PostgresReader};
use crate::transform::{FakeDataTransformer, FormatDataTransformer};
use crate::writers::{CsvWriter, ParquetWriter};

/// Descriptor for a source reader kind.
pub struct ReaderDescriptor {
    /// Provider name used with `--provider`.
    pub name: &'static str,

    /// Environment variable consulted when the connection flag is empty.
    pub env_var: Option<&'static str>,

    /// Whether a connection string looks like this provider's.
    pub can_handle: fn(&str) -> bool,

    /// Construct the reader with its bound options.
    pub build: fn(&DumpOptions, &OptionsRegistry) -> Box<dyn StreamReader>,
}

/// Descriptor for an output writer kind.
pub struct WriterDescriptor {
    /// Writer name, for diagnostics.
    pub name: &'static str,

    /// Output-path extension this writer claims (lowercase, no dot).
    pub extension: &'static str,

    /// Construct the writer with its bound options.
    pub build: fn(&DumpOptions, &OptionsRegistry) -> Box<dyn DataWriter>,
}

/// Descriptor for a row transformer kind.
pub struct TransformerDescriptor {
    /// Transformer name, for diagnostics.
    pub name: &'static str,

    /// Whether the bound options give this transformer any work.
    pub is_active: fn(&OptionsRegistry) -> bool,

    /// Construct the transformer with its bound options.
    pub build: fn(&OptionsRegistry) -> Box<dyn DataTransformer>,
}

/// The fixed set of providers registered at startup.
pub struct ProviderCatalog {
    readers: Vec<ReaderDescriptor>,
    writers: Vec<WriterDescriptor>,
    transformers: Vec<TransformerDescriptor>,
}

impl ProviderCatalog {
    /// Build the catalog with every builtin provider.
    pub fn with_builtins() -> Self {
        Self {
            readers: vec![
                ReaderDescriptor {
                    name: "postgres",
                    env_var: Some("SQLDUMP_POSTGRES_CONNECTION"),
                    can_handle: PostgresReader::can_handle,
                    build: |options, _| Box::new(PostgresReader::new(options)),
                },
                ReaderDescriptor {
                    name: "mssql",
                    env_var: Some("SQLDUMP_MSSQL_CONNECTION"),
                    can_handle: MssqlReader::can_handle,
                    build: |options, _| Box::new(MssqlReader::new(options)),
                },
            ],
            writers: vec![
                WriterDescriptor {
                    name: "csv",
                    extension: "csv",
                    build: |options, registry| {
                        Box::new(CsvWriter::new(
                            &options.output,
                            &registry.get_or_default::<CsvOptions>(),
                        ))
                    },
                },
                WriterDescriptor {
                    name: "parquet",
                    extension: "parquet",
                    build: |options, registry| {
                        Box::new(ParquetWriter::new(
                            &options.output,
                            &registry.get_or_default::<ParquetOptions>(),
                            options.batch_size,
                        ))
                    },
                },
            ],
            transformers: vec![
                TransformerDescriptor {
                    name: "fake",
                    is_active: |registry| {
                        registry
                            .get::<FakeOptions>()
                            .map(FakeOptions::is_active)
                            .unwrap_or(false)
                    },
                    build: |registry| {
                        Box::new(FakeDataTransformer::new(
                            &registry.get_or_default::<FakeOptions>(),
                        ))
                    },
                },
                TransformerDescriptor {
                    name: "format",
                    is_active: |registry| {
                        registry
                            .get::<FormatOptions>()
                            .map(FormatOptions::is_active)
                            .unwrap_or(false)
                    },
                    build: |registry| {
                        Box::new(FormatDataTransformer::new(
                            &registry.get_or_default::<FormatOptions>(),
                        ))
                    },
                },
            ],
        }
    }

    /// Register a third-party reader descriptor.
    pub fn register_reader(&mut self, descriptor: ReaderDescriptor) {
        self.readers.push(descriptor);
    }

    /// Register a third-party writer descriptor.
    pub fn register_writer(&mut self, descriptor: WriterDescriptor) {
        self.writers.push(descriptor);
    }

    /// Register a third-party transformer descriptor.
    pub fn register_transformer(&mut self, descriptor: TransformerDescriptor) {
        self.transformers.push(descriptor);
    }

    /// Case-insensitive reader lookup by provider name.
    pub fn reader(&self, name: &str) -> Option<&ReaderDescriptor> {
        self.readers
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Probe connection predicates in registration order.
    pub fn detect_reader(&self, connection: &str) -> Option<&ReaderDescriptor> {
        self.readers.iter().find(|d| (d.can_handle)(connection))
    }

    /// Resolve the reader for a run: by name, or by probing when the
    /// provider is `auto`.
    pub fn resolve_reader(&self, options: &DumpOptions) -> Result<&ReaderDescriptor> {
        if options.provider.eq_ignore_ascii_case("auto") {
            self.detect_reader(&options.connection).ok_or_else(|| {
                DumpError::Config(
                    "could not detect a provider from the connection string; \
                     pass --provider explicitly"
                        .to_string(),
                )
            })
        } else {
            self.reader(&options.provider).ok_or_else(|| {
                DumpError::Config(format!(
                    "unknown provider '{}'. Known providers: {}",
                    options.provider,
                    self.readers
                        .iter()
                        .map(|d| d.name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
        }
    }

    /// Select the writer by the output path's extension.
    pub fn writer_for_path(&self, path: &Path) -> Result<&WriterDescriptor> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        self.writers
            .iter()
            .find(|d| d.extension == extension)
            .ok_or_else(|| {
                DumpError::Config(format!(
                    "no writer for output '{}'. Known extensions: {}",
                    path.display(),
                    self.writers
                        .iter()
                        .map(|d| d.extension)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }

    /// Construct the transformer list for a run, in registration order.
    pub fn build_transformers(&self, registry: &OptionsRegistry) -> Vec<Box<dyn DataTransformer>> {
        self.transformers
            .iter()
            .filter(|d| (d.is_active)(registry))
            .map(|d| (d.build)(registry))
            .collect()
    }

    /// The registered readers.
    pub fn readers(&self) -> &[ReaderDescriptor] {
        &self.readers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_reader_lookup_is_case_insensitive() {
        let catalog = ProviderCatalog::with_builtins();
        assert!(catalog.reader("POSTGRES").is_some());
        assert!(catalog.reader("MsSql").is_some());
        assert!(catalog.reader("oracle").is_none());
    }

    #[test]
    fn test_resolve_reader_by_name_and_auto() {
        let catalog = ProviderCatalog::with_builtins();

        let named = DumpOptions {
            provider: "mssql".to_string(),
            ..Default::default()
        };
        assert_eq!(catalog.resolve_reader(&named).unwrap().name, "mssql");

        let auto = DumpOptions {
            connection: "postgres://localhost/db".to_string(),
            ..Default::default()
        };
        assert_eq!(catalog.resolve_reader(&auto).unwrap().name, "postgres");

        let unknown = DumpOptions {
            provider: "sybase".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            catalog.resolve_reader(&unknown),
            Err(DumpError::Config(_))
        ));

        let undetectable = DumpOptions {
            connection: "???".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            catalog.resolve_reader(&undetectable),
            Err(DumpError::Config(_))
        ));
    }

    #[test]
    fn test_writer_lookup_by_extension() {
        let catalog = ProviderCatalog::with_builtins();
        assert_eq!(
            catalog
                .writer_for_path(&PathBuf::from("out.csv"))
                .unwrap()
                .name,
            "csv"
        );
        assert_eq!(
            catalog
                .writer_for_path(&PathBuf::from("dir/OUT.PARQUET"))
                .unwrap()
                .name,
            "parquet"
        );
        assert!(catalog.writer_for_path(&PathBuf::from("out.xlsx")).is_err());
        assert!(catalog.writer_for_path(&PathBuf::from("noext")).is_err());
    }

    #[test]
    fn test_transformer_activation() {
        let catalog = ProviderCatalog::with_builtins();

        let empty = OptionsRegistry::new();
        assert!(catalog.build_transformers(&empty).is_empty());

        let mut registry = OptionsRegistry::new();
        registry.bind(FakeOptions {
            mappings: vec!["NAME:name.firstname".to_string()],
            ..Default::default()
        });
        registry.bind(FormatOptions::default());
        assert_eq!(catalog.build_transformers(&registry).len(), 1);

        registry.bind(FormatOptions {
            mappings: vec!["A:{A}".to_string()],
        });
        assert_eq!(catalog.build_transformers(&registry).len(), 2);
    }

    #[test]
    fn test_env_vars_declared() {
        let catalog = ProviderCatalog::with_builtins();
        for reader in catalog.readers() {
            assert!(reader.env_var.is_some());
        }
    }
}
