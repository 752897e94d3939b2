//! Template parsing and dependency ordering shared by the row
//! transformers.
//!
//! Two placeholder grammars exist: the formatting transformer uses
//! `{NAME}` / `{NAME:format}`, the anonymization transformer uses
//! `{{NAME}}` inside literal specs. Both feed the same ordering machinery:
//! targets are generated in an order where every referenced target column
//! is produced before its referrer, and reference cycles are rejected
//! before the first row is read.

use crate::error::{DumpError, Result};

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text, emitted verbatim.
    Literal(String),
    /// A column reference, with an optional format hint.
    Placeholder {
        name: String,
        format: Option<String>,
    },
}

/// Parse a `{NAME}` / `{NAME:format}` template.
///
/// Brace pairs whose content is empty stay literal; anything else between
/// a `{` and the next `}` becomes a placeholder. Unresolvable names are
/// put back verbatim at substitution time, so parsing never fails.
pub fn parse_single_brace(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        literal.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        match after_open.find('}') {
            Some(close) if close > 0 => {
                flush_literal(&mut segments, &mut literal);
                let content = &after_open[..close];
                let (name, format) = match content.split_once(':') {
                    Some((name, fmt)) => (name, Some(fmt.to_string())),
                    None => (content, None),
                };
                segments.push(Segment::Placeholder {
                    name: name.to_string(),
                    format,
                });
                rest = &after_open[close + 1..];
            }
            Some(close) => {
                // "{}" carries no name; keep it literal.
                literal.push_str("{}");
                rest = &after_open[close + 1..];
            }
            None => {
                literal.push('{');
                rest = after_open;
            }
        }
    }
    literal.push_str(rest);
    flush_literal(&mut segments, &mut literal);
    segments
}

/// Parse a literal spec with `{{NAME}}` references.
pub fn parse_double_brace(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        literal.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) if close > 0 => {
                flush_literal(&mut segments, &mut literal);
                segments.push(Segment::Placeholder {
                    name: after_open[..close].to_string(),
                    format: None,
                });
                rest = &after_open[close + 2..];
            }
            Some(close) => {
                literal.push_str("{{}}");
                rest = &after_open[close + 2..];
            }
            None => {
                literal.push_str("{{");
                rest = after_open;
            }
        }
    }
    literal.push_str(rest);
    flush_literal(&mut segments, &mut literal);
    segments
}

fn flush_literal(segments: &mut Vec<Segment>, literal: &mut String) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

/// Names referenced by a parsed template.
pub fn referenced_names(segments: &[Segment]) -> Vec<&str> {
    segments
        .iter()
        .filter_map(|s| match s {
            Segment::Placeholder { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// Compute a generation order over target columns.
///
/// `targets` pairs each target column name with the names it references.
/// Edges only exist between targets; references to non-target columns are
/// read from the row as-is, and a self-reference resolves to the column's
/// pre-transform value, so neither contributes an edge. Returns indices
/// into `targets` such that every referenced target precedes its referrer;
/// a cycle fails with a configuration error.
pub fn generation_order(targets: &[(String, Vec<String>)]) -> Result<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }

    fn visit(
        idx: usize,
        targets: &[(String, Vec<String>)],
        marks: &mut [Mark],
        order: &mut Vec<usize>,
        trail: &mut Vec<usize>,
    ) -> Result<()> {
        match marks[idx] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                let cycle: Vec<&str> = trail
                    .iter()
                    .skip_while(|i| **i != idx)
                    .map(|i| targets[*i].0.as_str())
                    .chain(std::iter::once(targets[idx].0.as_str()))
                    .collect();
                return Err(DumpError::Config(format!(
                    "cyclic column references: {}",
                    cycle.join(" -> ")
                )));
            }
            Mark::Unvisited => {}
        }

        marks[idx] = Mark::Visiting;
        trail.push(idx);
        for reference in &targets[idx].1 {
            if reference.eq_ignore_ascii_case(&targets[idx].0) {
                continue;
            }
            if let Some(dep) = targets
                .iter()
                .position(|(name, _)| name.eq_ignore_ascii_case(reference))
            {
                visit(dep, targets, marks, order, trail)?;
            }
        }
        trail.pop();
        marks[idx] = Mark::Done;
        order.push(idx);
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; targets.len()];
    let mut order = Vec::with_capacity(targets.len());
    let mut trail = Vec::new();
    for idx in 0..targets.len() {
        visit(idx, targets, &mut marks, &mut order, &mut trail)?;
    }
    Ok(order)
}
