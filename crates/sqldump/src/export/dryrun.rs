//! Dry-run preview rendering.
//!
//! One row is fetched and run through the transformer chain; the result
//! is a plain-text table of every output column with its input and output
//! type and value. Changed cells are marked in the first column.

use crate::core::schema::Schema;
use crate::core::value::{Row, Value};

/// Render the dry-run diff table.
///
/// `input_schema`/`input_row` describe the row as read; `output_schema`/
/// `output_row` describe it after the transformer chain. Columns are
/// matched by case-insensitive name; columns absent from the input are
/// shown with empty input cells.
pub fn render_diff(
    input_schema: &Schema,
    input_row: &Row,
    output_schema: &Schema,
    output_row: &Row,
) -> String {
    let header = ["", "column", "in type", "in value", "out type", "out value"];
    let mut rows: Vec<[String; 6]> = Vec::with_capacity(output_schema.len());

    for (idx, col) in output_schema.columns().iter().enumerate() {
        let out_value = &output_row[idx];
        let input = input_schema.position(&col.name);

        let (in_type, in_value) = match input {
            Some(pos) => (
                input_schema.columns()[pos].logical_type.name(),
                display_value(&input_row[pos]),
            ),
            None => (String::new(), String::new()),
        };

        let changed = match input {
            Some(pos) => {
                input_row[pos] != *out_value
                    || input_schema.columns()[pos].logical_type != col.logical_type
            }
            None => true,
        };

        let mut name = col.name.clone();
        if col.is_virtual {
            name.push_str(" (virtual)");
        }

        rows.push([
            if changed { "*".to_string() } else { String::new() },
            name,
            in_type,
            in_value,
            col.logical_type.name(),
            display_value(out_value),
        ]);
    }

    let mut widths = [0usize; 6];
    for (i, h) in header.iter().enumerate() {
        widths[i] = h.chars().count();
    }
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &header.map(str::to_string), &widths);
    push_separator(&mut out, &widths);
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn display_value(value: &Value) -> String {
    if value.is_null() {
        "NULL".to_string()
    } else {
        value.render()
    }
}

fn push_row(out: &mut String, cells: &[String; 6], widths: &[usize; 6]) {
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(cell);
        let pad = widths[i].saturating_sub(cell.chars().count());
        out.extend(std::iter::repeat(' ').take(pad));
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out.push('\n');
}

fn push_separator(out: &mut String, widths: &[usize; 6]) {
    for (i, width) in widths.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.extend(std::iter::repeat('-').take(*width));
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnInfo, LogicalType};

    #[test]
    fn test_diff_marks_changes_and_virtuals() {
        let input_schema = Schema::new(vec![
            ColumnInfo::new("ID", LogicalType::Int32),
            ColumnInfo::new("NAME", LogicalType::String),
        ])
        .unwrap();
        let output_schema = Schema::new(vec![
            ColumnInfo::new("ID", LogicalType::Int32),
            ColumnInfo::new("NAME", LogicalType::String),
            ColumnInfo::virtual_column("SCRATCH", LogicalType::String),
        ])
        .unwrap();

        let input_row = vec![Value::I32(1), Value::Text("Alice".into())];
        let output_row = vec![
            Value::I32(1),
            Value::Text("Nancy".into()),
            Value::Text("tmp".into()),
        ];

        let table = render_diff(&input_schema, &input_row, &output_schema, &output_row);
        let lines: Vec<&str> = table.lines().collect();
        // Header + separator + three columns.
        assert_eq!(lines.len(), 5);
        // Unchanged ID row carries no marker.
        assert!(lines[2].starts_with(' '));
        assert!(lines[2].contains("ID"));
        // Changed NAME row is marked.
        assert!(lines[3].starts_with('*'));
        assert!(lines[3].contains("Nancy"));
        // Virtual column flagged and marked (no input counterpart).
        assert!(lines[4].starts_with('*'));
        assert!(lines[4].contains("SCRATCH (virtual)"));
    }

    #[test]
    fn test_nulls_render_distinctly() {
        let schema = Schema::new(vec![ColumnInfo::new("A", LogicalType::String)]).unwrap();
        let table = render_diff(
            &schema,
            &vec![Value::Text("x".into())],
            &schema,
            &vec![Value::Null],
        );
        assert!(table.contains("NULL"));
    }
}
