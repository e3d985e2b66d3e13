// crates/tuplevault-cli/src/lib.rs
// ============================================================================
// Module: Tuplevault CLI Library
// Description: Shared building blocks for the `tuplevault` binary.
// Purpose: Expose configuration loading so it can be tested in isolation.
// Dependencies: serde, thiserror, toml, tuplevault-store-sqlite
// ============================================================================

//! ## Overview
//! The `tuplevault` binary administers a `SQLite` relationship datastore.
//! This library holds the pieces that do not depend on argument parsing,
//! chiefly the TOML configuration loader in [`config`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::LogSinkKind;
pub use config::LoggingConfig;
pub use config::MigrationsConfig;
pub use config::TuplevaultConfig;
