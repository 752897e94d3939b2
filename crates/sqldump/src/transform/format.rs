//! Formatting transformer.
//!
//! Rewrites target columns from `{NAME}` / `{NAME:format}` templates over
//! the current row. Format hints are applied with invariant rendering; a
//! hint that does not fit the value falls back to the raw rendering.

use tracing::{debug, warn};

use crate::core::schema::{LogicalType, Schema};
use crate::core::value::{Row, Value};
use crate::core::DataTransformer;
use crate::error::{DumpError, Result};
use crate::options::FormatOptions;
use crate::transform::template::{
    generation_order, parse_single_brace, referenced_names, Segment,
};

struct FormatTarget {
    column: String,
    position: usize,
    segments: Vec<Segment>,
}

/// Formatting implementation of [`DataTransformer`].
pub struct FormatDataTransformer {
    mappings: Vec<String>,
    targets: Vec<FormatTarget>,
    schema: Schema,
}

impl FormatDataTransformer {
    /// Create the transformer from its bound options.
    pub fn new(options: &FormatOptions) -> Self {
        Self {
            mappings: options.mappings.clone(),
            targets: Vec::new(),
            schema: Schema::default(),
        }
    }

    fn expand(&self, target: &FormatTarget, row: &Row, original: &Value) -> String {
        let mut out = String::new();
        for segment in &target.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { name, format } => {
                    let value = if name.eq_ignore_ascii_case(&target.column) {
                        Some(original)
                    } else {
                        self.schema.position(name).map(|pos| &row[pos])
                    };
                    match value {
                        Some(value) => match format {
                            Some(hint) => match apply_format(value, hint) {
                                Some(formatted) => out.push_str(&formatted),
                                // Hint failed: append the raw value.
                                None => out.push_str(&value.render()),
                            },
                            None => out.push_str(&value.render()),
                        },
                        // Unresolved names stay literal, braces preserved.
                        None => {
                            out.push('{');
                            out.push_str(name);
                            if let Some(hint) = format {
                                out.push(':');
                                out.push_str(hint);
                            }
                            out.push('}');
                        }
                    }
                }
            }
        }
        out
    }
}

impl DataTransformer for FormatDataTransformer {
    fn initialize(&mut self, input: &Schema) -> Result<Schema> {
        let mut columns = input.columns().to_vec();
        let mut parsed: Vec<(String, Vec<Segment>, Vec<String>)> = Vec::new();

        for mapping in &self.mappings {
            let (column, template) = mapping.split_once(':').ok_or_else(|| {
                DumpError::Config(format!(
                    "invalid --format mapping '{}', expected COLUMN:template",
                    mapping
                ))
            })?;
            if input.position(column).is_none() {
                return Err(DumpError::Config(format!(
                    "--format column {} not found in schema",
                    column
                )));
            }

            let segments = parse_single_brace(template);
            let refs = referenced_names(&segments)
                .into_iter()
                .map(str::to_string)
                .collect();

            if let Some(existing) = parsed
                .iter()
                .position(|(col, _, _)| col.eq_ignore_ascii_case(column))
            {
                warn!("column {} formatted more than once, last mapping wins", column);
                parsed.remove(existing);
            }
            parsed.push((column.to_string(), segments, refs));
        }

        let graph: Vec<(String, Vec<String>)> = parsed
            .iter()
            .map(|(column, _, refs)| (column.clone(), refs.clone()))
            .collect();
        let order = generation_order(&graph)?;

        let mut remaining: Vec<Option<(String, Vec<Segment>, Vec<String>)>> =
            parsed.into_iter().map(Some).collect();
        let mut targets = Vec::with_capacity(remaining.len());
        for idx in order {
            let (column, segments, _) = remaining[idx].take().expect("each target ordered once");
            let position = input.position(&column).expect("checked above");
            columns[position].logical_type = LogicalType::String;
            targets.push(FormatTarget {
                column,
                position,
                segments,
            });
        }

        self.targets = targets;
        self.schema = Schema::new(columns)?;
        debug!("format transformer: {} targets", self.targets.len());
        Ok(self.schema.clone())
    }

    fn transform(&mut self, mut row: Row) -> Result<Row> {
        for i in 0..self.targets.len() {
            let target = &self.targets[i];
            let original = row[target.position].clone();
            let expanded = self.expand(target, &row, &original);
            row[target.position] = Value::Text(expanded);
        }
        Ok(row)
    }
}

/// Apply an implementation-neutral format hint. Returns `None` when the
/// hint does not fit the value.
fn apply_format(value: &Value, hint: &str) -> Option<String> {
    if let Some(decimals) = numeric_hint_decimals(hint) {
        return format_numeric(value, decimals);
    }
    if looks_like_date_pattern(hint) {
        return format_temporal(value, hint);
    }
    None
}

/// `0`, `0.00`, `#,##0.00` style patterns: the digits after the decimal
/// point decide the rendered precision.
fn numeric_hint_decimals(hint: &str) -> Option<usize> {
    if hint.is_empty() || !hint.chars().all(|c| matches!(c, '0' | '#' | '.' | ',')) {
        return None;
    }
    match hint.split_once('.') {
        Some((_, frac)) => Some(frac.len()),
        None => Some(0),
    }
}

fn format_numeric(value: &Value, decimals: usize) -> Option<String> {
    match value {
        Value::I8(v) => Some(format!("{:.*}", decimals, *v as f64)),
        Value::I16(v) => Some(format!("{:.*}", decimals, *v as f64)),
        Value::I32(v) => Some(format!("{:.*}", decimals, *v as f64)),
        Value::I64(v) => Some(format!("{:.*}", decimals, *v as f64)),
        Value::U8(v) => Some(format!("{:.*}", decimals, *v as f64)),
        Value::U16(v) => Some(format!("{:.*}", decimals, *v as f64)),
        Value::U32(v) => Some(format!("{:.*}", decimals, *v as f64)),
        Value::U64(v) => Some(format!("{:.*}", decimals, *v as f64)),
        Value::F32(v) => Some(format!("{:.*}", decimals, *v as f64)),
        Value::F64(v) => Some(format!("{:.*}", decimals, v)),
        Value::Decimal(v) => {
            let mut scaled = *v;
            scaled.rescale(decimals as u32);
            Some(scaled.to_string())
        }
        _ => None,
    }
}

fn looks_like_date_pattern(hint: &str) -> bool {
    ["yyyy", "MM", "dd", "HH", "mm", "ss"]
        .iter()
        .any(|token| hint.contains(token))
}

/// Translate `yyyy-MM-dd HH:mm:ss` style tokens into a chrono format
/// string. Unrecognized characters pass through verbatim.
fn translate_date_pattern(hint: &str) -> String {
    let tokens = [
        ("yyyy", "%Y"),
        ("MM", "%m"),
        ("dd", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
    ];
    let mut out = String::with_capacity(hint.len());
    let mut rest = hint;
    'outer: while !rest.is_empty() {
        for (token, replacement) in tokens {
            if rest.starts_with(token) {
                out.push_str(replacement);
                rest = &rest[token.len()..];
                continue 'outer;
            }
        }
        let c = rest.chars().next().expect("non-empty");
        if c == '%' {
            out.push_str("%%");
        } else {
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn format_temporal(value: &Value, hint: &str) -> Option<String> {
    let pattern = translate_date_pattern(hint);
    match value {
        Value::Date(v) => Some(v.format(&pattern).to_string()),
        Value::Time(v) => Some(v.format(&pattern).to_string()),
        Value::Timestamp(v) => Some(v.format(&pattern).to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnInfo;
    use rust_decimal::Decimal;

    fn schema(columns: &[(&str, LogicalType)]) -> Schema {
        Schema::new(
            columns
                .iter()
                .map(|(n, t)| ColumnInfo::new(*n, *t))
                .collect(),
        )
        .unwrap()
    }

    fn options(mappings: &[&str]) -> FormatOptions {
        FormatOptions {
            mappings: mappings.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_template_expansion_and_retype() {
        let mut t = FormatDataTransformer::new(&options(&["LABEL:{NAME} ({ID})"]));
        let out = t
            .initialize(&schema(&[
                ("ID", LogicalType::Int32),
                ("NAME", LogicalType::String),
                ("LABEL", LogicalType::String),
            ]))
            .unwrap();
        assert_eq!(out.column("LABEL").unwrap().logical_type, LogicalType::String);

        let row = t
            .transform(vec![Value::I32(7), Value::Text("Widget".into()), Value::Null])
            .unwrap();
        assert_eq!(row[2], Value::Text("Widget (7)".into()));
    }

    #[test]
    fn test_numeric_hint() {
        let mut t = FormatDataTransformer::new(&options(&["PRICE:{PRICE:0.00} EUR"]));
        t.initialize(&schema(&[("PRICE", LogicalType::Float64)]))
            .unwrap();
        let row = t.transform(vec![Value::F64(12.5)]).unwrap();
        assert_eq!(row[0], Value::Text("12.50 EUR".into()));
    }

    #[test]
    fn test_decimal_hint_rescales() {
        let mut t = FormatDataTransformer::new(&options(&["AMT:{AMT:0.00}"]));
        t.initialize(&schema(&[(
            "AMT",
            LogicalType::Decimal { precision: 10, scale: 4 },
        )]))
        .unwrap();
        let row = t
            .transform(vec![Value::Decimal(Decimal::new(95_5000, 4))])
            .unwrap();
        assert_eq!(row[0], Value::Text("95.50".into()));
    }

    #[test]
    fn test_date_hint() {
        let mut t = FormatDataTransformer::new(&options(&["DAY:{DAY:yyyy-MM-dd}"]));
        t.initialize(&schema(&[("DAY", LogicalType::Date)])).unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let row = t.transform(vec![Value::Date(date)]).unwrap();
        assert_eq!(row[0], Value::Text("2024-03-09".into()));
    }

    #[test]
    fn test_hint_failure_appends_raw_value() {
        // Numeric hint over a text value: the raw rendering is appended.
        let mut t = FormatDataTransformer::new(&options(&["N:{N:0.00}"]));
        t.initialize(&schema(&[("N", LogicalType::String)])).unwrap();
        let row = t.transform(vec![Value::Text("abc".into())]).unwrap();
        assert_eq!(row[0], Value::Text("abc".into()));
    }

    #[test]
    fn test_unresolved_name_stays_literal() {
        let mut t = FormatDataTransformer::new(&options(&["A:{MISSING} and {MISSING:0.0}"]));
        t.initialize(&schema(&[("A", LogicalType::String)])).unwrap();
        let row = t.transform(vec![Value::Text("x".into())]).unwrap();
        assert_eq!(row[0], Value::Text("{MISSING} and {MISSING:0.0}".into()));
    }

    #[test]
    fn test_self_reference_uses_pre_transform_value() {
        let mut t = FormatDataTransformer::new(&options(&["A:<{A}>"]));
        t.initialize(&schema(&[("A", LogicalType::String)])).unwrap();
        let row = t.transform(vec![Value::Text("x".into())]).unwrap();
        assert_eq!(row[0], Value::Text("<x>".into()));
    }

    #[test]
    fn test_formatting_is_idempotent_on_matching_content() {
        let mut t = FormatDataTransformer::new(&options(&["A:{A}"]));
        t.initialize(&schema(&[("A", LogicalType::String)])).unwrap();
        let once = t.transform(vec![Value::Text("stable".into())]).unwrap();
        let twice = t.transform(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unknown_target_is_config_error() {
        let mut t = FormatDataTransformer::new(&options(&["NOPE:{A}"]));
        let err = t.initialize(&schema(&[("A", LogicalType::String)])).unwrap_err();
        assert!(matches!(err, DumpError::Config(_)));
    }

    #[test]
    fn test_cycle_fails_initialization() {
        let mut t = FormatDataTransformer::new(&options(&["A:{B}", "B:{A}"]));
        let err = t
            .initialize(&schema(&[("A", LogicalType::String), ("B", LogicalType::String)]))
            .unwrap_err();
        assert!(matches!(err, DumpError::Config(_)));
    }

    #[test]
    fn test_dependency_order() {
        let mut t = FormatDataTransformer::new(&options(&["B:[{A}]", "A:{A}!"]));
        t.initialize(&schema(&[("A", LogicalType::String), ("B", LogicalType::String)]))
            .unwrap();
        let row = t
            .transform(vec![Value::Text("x".into()), Value::Null])
            .unwrap();
        // A is formatted first, then B sees the formatted A.
        assert_eq!(row[0], Value::Text("x!".into()));
        assert_eq!(row[1], Value::Text("[x!]".into()));
    }

    #[test]
    fn test_translate_date_pattern() {
        assert_eq!(translate_date_pattern("yyyy-MM-dd"), "%Y-%m-%d");
        assert_eq!(translate_date_pattern("HH:mm:ss"), "%H:%M:%S");
        assert_eq!(translate_date_pattern("dd.MM.yyyy"), "%d.%m.%Y");
    }
}
