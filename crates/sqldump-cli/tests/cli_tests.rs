//! CLI integration tests for sqldump.
//!
//! These tests verify command-line argument parsing, help output,
//! the faker listing and exit codes for error conditions that do not
//! need a reachable database.

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a command for the sqldump binary.
fn cmd() -> Command {
    Command::cargo_bin("sqldump").unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_core_flags() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--connection"))
        .stdout(predicate::str::contains("--provider"))
        .stdout(predicate::str::contains("--query"))
        .stdout(predicate::str::contains("--output"))
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--list-fakers"));
}

#[test]
fn test_help_shows_transformer_flags() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--fake"))
        .stdout(predicate::str::contains("--null"))
        .stdout(predicate::str::contains("--format"));
}

#[test]
fn test_help_shows_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: 10]"))
        .stdout(predicate::str::contains("[default: 50000]"))
        .stdout(predicate::str::contains("[default: auto]"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sqldump"));
}

// =============================================================================
// Faker Listing
// =============================================================================

#[test]
fn test_list_fakers_walks_the_registry() {
    cmd()
        .arg("--list-fakers")
        .assert()
        .success()
        .stdout(predicate::str::contains("name.firstname"))
        .stdout(predicate::str::contains("address.city"))
        .stdout(predicate::str::contains("commerce.price"))
        .stdout(predicate::str::contains("lorem.sentence"));
}

// =============================================================================
// Exit Codes
// =============================================================================

#[test]
fn test_missing_query_is_config_failure() {
    cmd()
        .args(["--connection", "postgres://localhost/db", "--output", "out.csv"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--query"));
}

#[test]
fn test_missing_connection_is_config_failure() {
    cmd()
        .args(["--query", "SELECT 1", "--output", "out.csv"])
        .env_remove("SQLDUMP_POSTGRES_CONNECTION")
        .env_remove("SQLDUMP_MSSQL_CONNECTION")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("connection"));
}

#[test]
fn test_unknown_provider_is_config_failure() {
    cmd()
        .args([
            "--connection",
            "postgres://localhost/db",
            "--provider",
            "oracle",
            "--query",
            "SELECT 1",
            "--output",
            "out.csv",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("oracle"));
}

#[test]
fn test_non_select_query_exits_2_before_connecting() {
    // The statement guard runs before any network I/O, so an unreachable
    // host never comes into play.
    cmd()
        .args([
            "--connection",
            "postgres://198.51.100.1/db",
            "--query",
            "DELETE FROM users",
            "--output",
            "out.csv",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("SECURITY"));
}

#[test]
fn test_invalid_csv_delimiter_is_config_failure() {
    cmd()
        .args([
            "--connection",
            "postgres://localhost/db",
            "--query",
            "SELECT 1",
            "--output",
            "out.csv",
            "--csv-delimiter",
            "ab",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("csv-delimiter"));
}

#[test]
fn test_invalid_parquet_compression_is_config_failure() {
    cmd()
        .args([
            "--connection",
            "postgres://localhost/db",
            "--query",
            "SELECT 1",
            "--output",
            "out.parquet",
            "--parquet-compression",
            "brotli",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("brotli"));
}
