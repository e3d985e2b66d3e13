// crates/tuplevault-cli/tests/config_load.rs
// ============================================================================
// Module: Config Load Tests
// Description: Validate config loading guards (path, size, encoding).
// Purpose: Ensure config input handling is strict and fails closed.
// Dependencies: tuplevault-cli, tempfile
// ============================================================================

//! ## Overview
//! Loads configuration files from disk and checks each rejection path of
//! [`TuplevaultConfig::load`].

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tempfile::TempDir;
use tuplevault_cli::ConfigError;
use tuplevault_cli::LogSinkKind;
use tuplevault_cli::TuplevaultConfig;
use tuplevault_cli::config::MAX_CONFIG_FILE_SIZE;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<TuplevaultConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config load".to_string()),
    }
}

#[test]
fn load_reads_every_section() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let path = dir.path().join("tuplevault.toml");
    let log = dir.path().join("events.jsonl");
    let text = format!(
        "[store]\npath = {:?}\ntable_prefix = \"tv_\"\nread_pool_size = 2\nauto_migrate = true\n\n\
         [migrations]\ntimeout_ms = 5000\n\n[logging]\nsink = \"file\"\npath = {:?}\n",
        dir.path().join("store.db").display().to_string(),
        log.display().to_string()
    );
    std::fs::write(&path, text).map_err(|err| err.to_string())?;

    let config = TuplevaultConfig::load(Some(&path)).map_err(|err| err.to_string())?;
    assert_eq!(config.store.table_prefix, "tv_");
    assert_eq!(config.store.read_pool_size, 2);
    assert!(config.store.auto_migrate);
    assert_eq!(config.migrations.timeout_ms, 5_000);
    assert_eq!(config.migrations.backfill_batch_size, 1_000);
    assert_eq!(config.logging.sink, LogSinkKind::File);
    config.logging.event_sink().map_err(|err| err.to_string())?;
    assert!(log.exists());
    Ok(())
}

#[test]
fn load_rejects_missing_file() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let path = dir.path().join("absent.toml");
    assert!(matches!(TuplevaultConfig::load(Some(&path)), Err(ConfigError::Io(_))));
    Ok(())
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    let path = Path::new(&long_component);
    assert_invalid(TuplevaultConfig::load(Some(path)), "config path component too long")
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    let payload = vec![b'a'; MAX_CONFIG_FILE_SIZE + 1];
    file.write_all(&payload).map_err(|err| err.to_string())?;
    assert_invalid(TuplevaultConfig::load(Some(file.path())), "config file exceeds size limit")
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(TuplevaultConfig::load(Some(file.path())), "config file must be utf-8")
}

#[test]
fn load_requires_store_section() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(b"[logging]\nsink = \"none\"\n").map_err(|err| err.to_string())?;
    assert!(matches!(TuplevaultConfig::load(Some(file.path())), Err(ConfigError::Parse(_))));
    Ok(())
}
