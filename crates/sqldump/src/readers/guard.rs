//! Read-only statement guard shared by all readers.
//!
//! The export core never writes to the source. Readers call
//! [`ensure_read_only`] before submitting the query; anything that is not
//! a plain `SELECT` (or a `WITH` common table expression, which can only
//! wrap a SELECT in a read context) is rejected up front.
//!
//! Tokenizer rules: leading whitespace, `--` line comments and `/* */`
//! block comments are skipped; the first remaining word decides. This
//! deliberately rejects `EXPLAIN`, `SHOW` and vendor-specific read
//! statements; the allow-list is exactly {SELECT, WITH}.

use crate::error::{DumpError, Result};

/// Reject any statement whose first significant token is not `SELECT` or
/// `WITH`.
pub fn ensure_read_only(query: &str) -> Result<()> {
    let token = first_significant_token(query);
    match token.as_deref() {
        Some("SELECT") | Some("WITH") => Ok(()),
        Some(other) => Err(DumpError::Security(format!(
            "only SELECT statements are allowed, query starts with '{}'",
            other
        ))),
        None => Err(DumpError::Security(
            "query is empty or contains only comments".to_string(),
        )),
    }
}

/// The first word of the statement after whitespace and comments,
/// uppercased.
fn first_significant_token(query: &str) -> Option<String> {
    let mut rest = query;

    loop {
        rest = rest.trim_start();
        if let Some(stripped) = rest.strip_prefix("--") {
            rest = match stripped.find('\n') {
                Some(pos) => &stripped[pos + 1..],
                None => "",
            };
        } else if let Some(stripped) = rest.strip_prefix("/*") {
            rest = match stripped.find("*/") {
                Some(pos) => &stripped[pos + 2..],
                // Unterminated block comment: nothing significant follows.
                None => "",
            };
        } else {
            break;
        }
    }

    let token: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();

    if token.is_empty() {
        None
    } else {
        Some(token.to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_allowed() {
        assert!(ensure_read_only("SELECT * FROM t").is_ok());
        assert!(ensure_read_only("select id from t").is_ok());
        assert!(ensure_read_only("  \n\tSELECT 1").is_ok());
    }

    #[test]
    fn test_cte_allowed() {
        assert!(ensure_read_only("WITH x AS (SELECT 1) SELECT * FROM x").is_ok());
        assert!(ensure_read_only("with recursive r as (select 1) select * from r").is_ok());
    }

    #[test]
    fn test_comments_skipped() {
        assert!(ensure_read_only("-- header\nSELECT 1").is_ok());
        assert!(ensure_read_only("/* multi\nline */ SELECT 1").is_ok());
        assert!(ensure_read_only("-- a\n-- b\n/* c */SELECT 1").is_ok());
    }

    #[test]
    fn test_writes_rejected() {
        for query in [
            "DELETE FROM t",
            "UPDATE t SET a = 1",
            "INSERT INTO t VALUES (1)",
            "DROP TABLE t",
            "TRUNCATE t",
            "CREATE TABLE t (a int)",
        ] {
            let err = ensure_read_only(query).unwrap_err();
            assert!(matches!(err, DumpError::Security(_)), "{}", query);
        }
    }

    #[test]
    fn test_explain_rejected() {
        assert!(matches!(
            ensure_read_only("EXPLAIN SELECT 1"),
            Err(DumpError::Security(_))
        ));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(ensure_read_only("").is_err());
        assert!(ensure_read_only("   ").is_err());
        assert!(ensure_read_only("-- only a comment").is_err());
        assert!(ensure_read_only("/* unterminated").is_err());
    }
}
