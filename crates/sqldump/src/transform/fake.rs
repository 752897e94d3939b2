//! Anonymization transformer.
//!
//! Rewrites configured columns with synthetic data, literal text or
//! templates referencing other columns, and forces listed columns to
//! NULL. Stateful within its RNG stream: a seeded run generates the same
//! sequence for the same spec list.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::core::schema::{ColumnInfo, LogicalType, Schema};
use crate::core::value::{Row, Value};
use crate::core::DataTransformer;
use crate::error::{DumpError, Result};
use crate::options::FakeOptions;
use crate::transform::faker::{default_locale, resolve_locale, FakerRegistry, LocaleData};
use crate::transform::template::{generation_order, parse_double_brace, referenced_names, Segment};

enum FakeAction {
    /// Invoke a registered faker method.
    Method { dataset: String, method: String },
    /// Replace with literal text, expanding `{{NAME}}` references.
    Literal { segments: Vec<Segment> },
    /// Unknown method in a known dataset: keep the original value.
    Keep,
}

struct FakeTarget {
    column: String,
    position: usize,
    action: FakeAction,
}

/// Anonymization implementation of [`DataTransformer`].
pub struct FakeDataTransformer {
    registry: FakerRegistry,
    locale: &'static LocaleData,
    rng: StdRng,
    mappings: Vec<String>,
    null_columns: Vec<String>,
    targets: Vec<FakeTarget>,
    null_positions: Vec<usize>,
    schema: Schema,
}

impl FakeDataTransformer {
    /// Create the transformer from its bound options.
    pub fn new(options: &FakeOptions) -> Self {
        let locale = match resolve_locale(&options.locale) {
            Some(locale) => locale,
            None => {
                warn!(
                    "unknown locale '{}', falling back to '{}'",
                    options.locale,
                    default_locale().code
                );
                default_locale()
            }
        };
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            registry: FakerRegistry::with_builtins(),
            locale,
            rng,
            mappings: options.mappings.clone(),
            null_columns: options.null_columns.clone(),
            targets: Vec::new(),
            null_positions: Vec::new(),
            schema: Schema::default(),
        }
    }

    fn parse_mapping(&self, mapping: &str) -> Result<(String, FakeAction, Vec<String>)> {
        let (column, spec) = mapping.split_once(':').ok_or_else(|| {
            DumpError::Config(format!(
                "invalid --fake mapping '{}', expected COLUMN:spec",
                mapping
            ))
        })?;
        if column.is_empty() {
            return Err(DumpError::Config(format!(
                "invalid --fake mapping '{}', column name is empty",
                mapping
            )));
        }

        // A spec with a dot whose prefix names a dataset is a method call;
        // everything else is literal text.
        if let Some((dataset, method)) = spec.split_once('.') {
            if let Some(ds) = self.registry.dataset(dataset) {
                return if ds.method(method).is_some() {
                    Ok((
                        column.to_string(),
                        FakeAction::Method {
                            dataset: dataset.to_string(),
                            method: method.to_string(),
                        },
                        Vec::new(),
                    ))
                } else {
                    warn!(
                        "unknown faker method '{}.{}' for column {}, keeping original values",
                        dataset, method, column
                    );
                    Ok((column.to_string(), FakeAction::Keep, Vec::new()))
                };
            }
        }

        let segments = parse_double_brace(spec);
        let refs = referenced_names(&segments)
            .into_iter()
            .map(str::to_string)
            .collect();
        Ok((
            column.to_string(),
            FakeAction::Literal { segments },
            refs,
        ))
    }

    fn expand_literal(
        &self,
        segments: &[Segment],
        row: &Row,
        target: &str,
        original: &Value,
    ) -> String {
        let mut out = String::new();
        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { name, .. } => {
                    if name.eq_ignore_ascii_case(target) {
                        // Self-reference resolves to the pre-transform value.
                        out.push_str(&original.render());
                    } else if let Some(pos) = self.schema.position(name) {
                        out.push_str(&row[pos].render());
                    } else {
                        out.push_str("{{");
                        out.push_str(name);
                        out.push_str("}}");
                    }
                }
            }
        }
        out
    }
}

impl DataTransformer for FakeDataTransformer {
    fn initialize(&mut self, input: &Schema) -> Result<Schema> {
        let mut columns: Vec<ColumnInfo> = input.columns().to_vec();
        let mut parsed: Vec<(String, FakeAction, Vec<String>)> = Vec::new();

        for mapping in &self.mappings.clone() {
            let entry = self.parse_mapping(mapping)?;
            if let Some(existing) = parsed
                .iter()
                .position(|(col, _, _)| col.eq_ignore_ascii_case(&entry.0))
            {
                warn!("column {} mapped more than once, last mapping wins", entry.0);
                parsed.remove(existing);
            }
            parsed.push(entry);
        }

        // Resolve target positions, appending virtual columns for targets
        // absent from the input schema, and retype mapped columns.
        let mut targets = Vec::with_capacity(parsed.len());
        for (column, action, refs) in parsed {
            let new_type = match &action {
                FakeAction::Method { dataset, method } => Some(
                    self.registry
                        .method(dataset, method)
                        .map(|m| m.returns)
                        .unwrap_or(LogicalType::String),
                ),
                FakeAction::Literal { .. } => Some(LogicalType::String),
                FakeAction::Keep => None,
            };

            let position = match columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(&column))
            {
                Some(pos) => {
                    if let Some(ty) = new_type {
                        columns[pos].logical_type = ty;
                    }
                    pos
                }
                None => {
                    columns.push(ColumnInfo::virtual_column(
                        column.clone(),
                        new_type.unwrap_or(LogicalType::String),
                    ));
                    columns.len() - 1
                }
            };

            targets.push((column, position, action, refs));
        }

        // Topological generation order over the targets; cycles fail here,
        // before the first row is read.
        let graph: Vec<(String, Vec<String>)> = targets
            .iter()
            .map(|(column, _, _, refs)| (column.clone(), refs.clone()))
            .collect();
        let order = generation_order(&graph)?;

        let mut ordered = Vec::with_capacity(targets.len());
        let mut remaining: Vec<Option<(String, usize, FakeAction, Vec<String>)>> =
            targets.into_iter().map(Some).collect();
        for idx in order {
            let (column, position, action, _) =
                remaining[idx].take().expect("each target ordered once");
            ordered.push(FakeTarget {
                column,
                position,
                action,
            });
        }

        self.null_positions = Vec::with_capacity(self.null_columns.len());
        for column in &self.null_columns {
            match columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(column))
            {
                Some(pos) => self.null_positions.push(pos),
                None => warn!("--null column {} not found in schema, ignored", column),
            }
        }

        self.targets = ordered;
        self.schema = Schema::new(columns)?;
        debug!(
            "fake transformer: {} targets, {} null overrides",
            self.targets.len(),
            self.null_positions.len()
        );
        Ok(self.schema.clone())
    }

    fn transform(&mut self, mut row: Row) -> Result<Row> {
        // Cells for appended virtual columns.
        while row.len() < self.schema.len() {
            row.push(Value::Null);
        }

        for i in 0..self.targets.len() {
            let position = self.targets[i].position;
            let original = row[position].clone();
            let value = match &self.targets[i].action {
                FakeAction::Method { dataset, method } => {
                    let method = self
                        .registry
                        .method(dataset, method)
                        .ok_or_else(|| {
                            DumpError::Internal(format!(
                                "faker method {}.{} vanished after initialization",
                                dataset, method
                            ))
                        })?;
                    method.generate(&mut self.rng, self.locale)
                }
                FakeAction::Literal { segments } => Value::Text(self.expand_literal(
                    segments,
                    &row,
                    &self.targets[i].column,
                    &original,
                )),
                FakeAction::Keep => continue,
            };
            row[position] = value;
        }

        for pos in &self.null_positions {
            row[*pos] = Value::Null;
        }

        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_schema(names: &[&str]) -> Schema {
        Schema::new(
            names
                .iter()
                .map(|n| ColumnInfo::new(*n, LogicalType::String))
                .collect(),
        )
        .unwrap()
    }

    fn options(mappings: &[&str]) -> FakeOptions {
        FakeOptions {
            mappings: mappings.iter().map(|s| s.to_string()).collect(),
            seed: Some(42),
            ..Default::default()
        }
    }

    #[test]
    fn test_literal_and_template_reference() {
        let mut t = FakeDataTransformer::new(&options(&[
            "FIRSTNAME:John",
            "LASTNAME:Doe",
            "FULLNAME:{{FIRSTNAME}} {{LASTNAME}}",
        ]));
        t.initialize(&input_schema(&["FIRSTNAME", "LASTNAME", "FULLNAME"]))
            .unwrap();

        let row = t
            .transform(vec!["a".into(), "b".into(), "c".into()])
            .unwrap();
        assert_eq!(row[0], Value::Text("John".into()));
        assert_eq!(row[1], Value::Text("Doe".into()));
        assert_eq!(row[2], Value::Text("John Doe".into()));
    }

    #[test]
    fn test_generation_order_independent_of_mapping_order() {
        // FULLNAME is declared before the columns it references.
        let mut t = FakeDataTransformer::new(&options(&[
            "FULLNAME:{{FIRSTNAME}} {{LASTNAME}}",
            "FIRSTNAME:John",
            "LASTNAME:Doe",
        ]));
        t.initialize(&input_schema(&["FIRSTNAME", "LASTNAME", "FULLNAME"]))
            .unwrap();

        let row = t
            .transform(vec!["a".into(), "b".into(), "c".into()])
            .unwrap();
        assert_eq!(row[2], Value::Text("John Doe".into()));
    }

    #[test]
    fn test_cycle_fails_initialization() {
        let mut t = FakeDataTransformer::new(&options(&["A:{{B}}", "B:{{A}}"]));
        let err = t.initialize(&input_schema(&["A", "B"])).unwrap_err();
        assert!(matches!(err, DumpError::Config(_)));
    }

    #[test]
    fn test_self_reference_uses_pre_transform_value() {
        let mut t = FakeDataTransformer::new(&options(&["EMAIL:{{EMAIL}}.invalid"]));
        t.initialize(&input_schema(&["EMAIL"])).unwrap();
        let row = t.transform(vec!["bob@example.com".into()]).unwrap();
        assert_eq!(row[0], Value::Text("bob@example.com.invalid".into()));
    }

    #[test]
    fn test_null_override_wins_over_mapping() {
        let mut t = FakeDataTransformer::new(&FakeOptions {
            mappings: vec!["SSN:name.firstname".to_string()],
            null_columns: vec!["ssn".to_string()],
            seed: Some(1),
            ..Default::default()
        });
        t.initialize(&input_schema(&["ID", "SSN", "NAME"])).unwrap();
        let row = t
            .transform(vec!["1".into(), "123-45-6789".into(), "Jane".into()])
            .unwrap();
        assert_eq!(row[0], Value::Text("1".into()));
        assert!(row[1].is_null());
        assert_eq!(row[2], Value::Text("Jane".into()));
    }

    #[test]
    fn test_seeded_runs_are_identical_and_rewrite_values() {
        let make = || {
            let mut t = FakeDataTransformer::new(&options(&["NAME:name.firstname"]));
            t.initialize(&input_schema(&["NAME"])).unwrap();
            (0..50)
                .map(|i| t.transform(vec![format!("orig{}", i).into()]).unwrap())
                .collect::<Vec<_>>()
        };

        let a = make();
        let b = make();
        assert_eq!(a, b);
        for (i, row) in a.iter().enumerate() {
            assert_ne!(row[0], Value::Text(format!("orig{}", i)));
        }
    }

    #[test]
    fn test_unknown_dataset_is_literal() {
        let mut t = FakeDataTransformer::new(&options(&["HOST:db.internal"]));
        t.initialize(&input_schema(&["HOST"])).unwrap();
        let row = t.transform(vec!["prod-7".into()]).unwrap();
        assert_eq!(row[0], Value::Text("db.internal".into()));
    }

    #[test]
    fn test_unknown_method_keeps_original() {
        let mut t = FakeDataTransformer::new(&options(&["NAME:name.no_such_method"]));
        let schema = t.initialize(&input_schema(&["NAME"])).unwrap();
        // Schema type unchanged for kept columns.
        assert_eq!(schema.column("NAME").unwrap().logical_type, LogicalType::String);
        let row = t.transform(vec!["keep-me".into()]).unwrap();
        assert_eq!(row[0], Value::Text("keep-me".into()));
    }

    #[test]
    fn test_unknown_target_becomes_virtual_column() {
        let mut t = FakeDataTransformer::new(&options(&["PRICE_TAG:commerce.price"]));
        let schema = t.initialize(&input_schema(&["ID"])).unwrap();

        let col = schema.column("PRICE_TAG").unwrap();
        assert!(col.is_virtual);
        assert!(matches!(col.logical_type, LogicalType::Decimal { .. }));

        let row = t.transform(vec!["1".into()]).unwrap();
        assert_eq!(row.len(), 2);
        assert!(matches!(row[1], Value::Decimal(_)));
    }

    #[test]
    fn test_method_retypes_column() {
        let mut t = FakeDataTransformer::new(&options(&["BORN:date.birthdate"]));
        let schema = t.initialize(&input_schema(&["BORN"])).unwrap();
        assert_eq!(schema.column("BORN").unwrap().logical_type, LogicalType::Date);
    }

    #[test]
    fn test_case_preserved_for_literals() {
        let mut t = FakeDataTransformer::new(&options(&["CODE:MiXeD CaSe"]));
        t.initialize(&input_schema(&["CODE"])).unwrap();
        let row = t.transform(vec!["x".into()]).unwrap();
        assert_eq!(row[0], Value::Text("MiXeD CaSe".into()));
    }
}
