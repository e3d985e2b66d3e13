// crates/tuplevault-store-sqlite/src/datastore.rs
// ============================================================================
// Module: SQLite Datastore
// Description: Connection lifecycle, bootstrap, and the datastore facade.
// Purpose: Expose snapshot readers and read-write transactions over SQLite.
// Dependencies: rusqlite, tuplevault-core
// ============================================================================

//! ## Overview
//! [`SqliteDatastore`] owns (or borrows) the `SQLite` connections behind a
//! Tuplevault datastore. Owned datastores open one writer plus a reader pool
//! with durability pragmas applied, optionally migrate to head, and seed the
//! base revision and database identifier once the schema is current.
//! Borrowed datastores run on a caller-supplied connection and hand it back
//! through a close handler.
//!
//! Every write runs in a `BEGIN IMMEDIATE` transaction: the revision is
//! allocated first, the caller's function runs against a
//! [`SqliteReadWriteTransaction`], and the whole unit commits or rolls back.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use std::time::Instant;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use tuplevault_core::CancellationToken;
use tuplevault_core::Datastore;
use tuplevault_core::DatastoreError;
use tuplevault_core::Feature;
use tuplevault_core::Features;
use tuplevault_core::ObjectTypeStat;
use tuplevault_core::Reader;
use tuplevault_core::ReadyState;
use tuplevault_core::Revision;
use tuplevault_core::RevisionChanges;
use tuplevault_core::Stats;
use tuplevault_core::TxUserFn;

use crate::config::DEFAULT_BULK_LOAD_BATCH_SIZE;
use crate::config::SqliteDatastoreConfig;
use crate::config::ensure_parent_dir;
use crate::errors::ERR_CLOSE;
use crate::errors::ERR_STATISTICS;
use crate::errors::ERR_TRANSACTION;
use crate::errors::db_error;
use crate::errors::poisoned;
use crate::events::DatastoreEventSink;
use crate::events::LifecycleEvent;
use crate::events::TransactionEvent;
use crate::executor::SqlBackend;
use crate::migrations::HEAD;
use crate::migrations::MigrateOptions;
use crate::migrations::MigrationManager;
use crate::migrations::RunMode;
use crate::migrations::SqliteMigrationDriver;
use crate::migrations::driver::read_version;
use crate::migrations::migrate_to_version;
use crate::pool::ConnectionPool;
use crate::pool::PoolState;
use crate::queries::SchemaContext;
use crate::reader::ReadScope;
use crate::reader::SqliteReader;
use crate::reader::Visibility;
use crate::readwrite::SqliteReadWriteTransaction;
use crate::revision::check_revision;
use crate::revision::create_transaction;
use crate::revision::load_head_revision;
use crate::seed::SeedStatus;
use crate::seed::read_database_ident;
use crate::seed::seed_database;
use crate::seed::seed_status;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Reason reported for the unsupported watch feature.
const WATCH_UNSUPPORTED: &str = "watch is not supported by the sqlite datastore";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Receives a borrowed connection when its datastore closes.
pub type CloseHandler = Box<dyn FnOnce(Connection) -> Result<(), DatastoreError> + Send>;

/// `SQLite`-backed Tuplevault datastore.
///
/// # Invariants
/// - Write transactions are serialized on the single writer connection.
/// - After [`Datastore::close`] every operation fails with
///   [`DatastoreError::Closed`].
pub struct SqliteDatastore {
    /// Table names, statement skeletons, and column metadata.
    context: SchemaContext,
    /// Writer and reader connections.
    pool: ConnectionPool,
    /// True when the datastore opened its own connections.
    owned: bool,
    /// Database path for owned datastores.
    path: Option<PathBuf>,
    /// Hand-back for borrowed connections.
    close_handler: Mutex<Option<CloseHandler>>,
    /// Rows per bulk-load insert.
    bulk_load_batch_size: usize,
    /// Registered schema migrations, shared process-wide.
    migrations: &'static MigrationManager,
    /// Operational event sink.
    sink: Arc<dyn DatastoreEventSink>,
}

impl SqliteDatastore {
    /// Opens a datastore that owns its connections.
    ///
    /// Migrates to head first when `auto_migrate` is set. Seeding runs only
    /// when the schema is at head; otherwise the datastore opens and
    /// [`Datastore::ready_state`] reports that migrations are pending.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Invalid`] for bad configuration, or another
    /// [`DatastoreError`] when the database cannot be opened, migrated, or
    /// seeded.
    pub fn open(
        config: &SqliteDatastoreConfig,
        sink: Arc<dyn DatastoreEventSink>,
    ) -> Result<Self, DatastoreError> {
        config.validate()?;
        ensure_parent_dir(&config.path)?;
        let context = SchemaContext::new(&config.table_prefix)?;
        let migrations = MigrationManager::sqlite()?;
        let mut writer = open_connection(config)?;
        if config.auto_migrate {
            let mut driver = SqliteMigrationDriver::new(&mut writer, context.tables().clone());
            let options = MigrateOptions {
                target: HEAD,
                timeout_ms: config.migration_timeout_ms,
                backfill_batch_size: config.backfill_batch_size,
                mode: RunMode::LiveRun,
            };
            migrate_to_version(migrations, &mut driver, options, sink.as_ref())?;
        }
        if read_version(&writer, context.tables())? == migrations.head_revision()? {
            seed_database(&mut writer, &context, sink.as_ref())?;
        }
        let mut readers = Vec::with_capacity(config.read_pool_size);
        for _ in 0 .. config.read_pool_size {
            readers.push(open_connection(config)?);
        }
        let datastore = Self {
            context,
            pool: ConnectionPool::new(writer, readers),
            owned: true,
            path: Some(config.path.clone()),
            close_handler: Mutex::new(None),
            bulk_load_batch_size: config.bulk_load_batch_size,
            migrations,
            sink,
        };
        datastore.record_opened();
        Ok(datastore)
    }

    /// Wraps a caller-supplied connection.
    ///
    /// The connection serves reads and writes. Nothing is migrated or seeded;
    /// call [`SqliteDatastore::migrate`] and [`SqliteDatastore::seed`] as
    /// needed. On close the connection is passed to `close_handler`.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Invalid`] for an unsafe table prefix.
    pub fn with_connection(
        connection: Connection,
        close_handler: CloseHandler,
        table_prefix: &str,
        sink: Arc<dyn DatastoreEventSink>,
    ) -> Result<Self, DatastoreError> {
        let datastore = Self {
            context: SchemaContext::new(table_prefix)?,
            pool: ConnectionPool::new(connection, Vec::new()),
            owned: false,
            path: None,
            close_handler: Mutex::new(Some(close_handler)),
            bulk_load_batch_size: DEFAULT_BULK_LOAD_BATCH_SIZE,
            migrations: MigrationManager::sqlite()?,
            sink,
        };
        datastore.record_opened();
        Ok(datastore)
    }

    /// Emits the lifecycle event for a new datastore.
    fn record_opened(&self) {
        self.sink.record_lifecycle(&LifecycleEvent::opened(
            self.context.tables().prefix(),
            self.owned,
            self.path.as_deref(),
        ));
    }

    /// Returns the table prefix.
    #[must_use]
    pub fn table_prefix(&self) -> &str {
        self.context.tables().prefix()
    }

    /// Returns the registered migrations.
    #[must_use]
    pub const fn migrations(&self) -> &MigrationManager {
        self.migrations
    }

    /// Returns the current schema version (empty before the first migration).
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the version cannot be read.
    pub fn schema_version(&self) -> Result<String, DatastoreError> {
        self.pool.with_reader(|connection| read_version(connection, self.context.tables()))
    }

    /// Runs migrations on the writer connection.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::MigrationUnknownVersion`] for unknown
    /// targets, [`DatastoreError::Canceled`] on timeout, or the failing
    /// step's error.
    pub fn migrate(&self, options: MigrateOptions<'_>) -> Result<Vec<String>, DatastoreError> {
        self.pool.with_writer(|connection| {
            let mut driver = SqliteMigrationDriver::new(connection, self.context.tables().clone());
            migrate_to_version(self.migrations, &mut driver, options, self.sink.as_ref())
        })
    }

    /// Seeds the base revision and database identifier if absent.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the schema is missing or an insert fails.
    pub fn seed(&self) -> Result<SeedStatus, DatastoreError> {
        self.pool.with_writer(|connection| {
            seed_database(connection, &self.context, self.sink.as_ref())
        })
    }

    /// Allocates the revision and runs the caller's function inside `tx`.
    fn apply(
        &self,
        tx: &Connection,
        cancel: &CancellationToken,
        f: &mut TxUserFn<'_>,
        revision: &mut Revision,
    ) -> Result<(), DatastoreError> {
        *revision = create_transaction(tx, &self.context, cancel)?;
        let mut rwt = SqliteReadWriteTransaction::new(
            tx,
            &self.context,
            cancel,
            *revision,
            self.bulk_load_batch_size,
        );
        f(&mut rwt)?;
        cancel.check(ERR_TRANSACTION)
    }

    /// Computes statistics on one connection.
    fn load_statistics(&self, connection: &Connection) -> Result<Stats, DatastoreError> {
        let cancel = CancellationToken::new();
        let unique_id = read_database_ident(connection, &self.context)?.ok_or_else(|| {
            DatastoreError::Storage(format!("{ERR_STATISTICS}: database identifier not found"))
        })?;
        let count_query = self.context.queries().select_live_tuple_count();
        let estimated_relationship_count = connection
            .execute_query(count_query, &cancel, ERR_STATISTICS, |row| row.get::<_, i64>(0))?
            .into_iter()
            .next()
            .map_or(0, stored_count);
        let counts_query = self.context.queries().select_namespace_counts();
        let counts: BTreeMap<String, (u64, u64)> = connection
            .execute_query(counts_query, &cancel, ERR_STATISTICS, |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })?
            .into_iter()
            .map(|(name, relationships, objects)| {
                (name, (stored_count(relationships), stored_count(objects)))
            })
            .collect();
        let scope = ReadScope {
            context: &self.context,
            cancel: &cancel,
            visibility: Visibility::Live,
        };
        let object_type_statistics = scope
            .namespaces(connection, None)?
            .into_iter()
            .map(|namespace| {
                let name = namespace.definition.name;
                let (relationship_count, object_count) =
                    counts.get(&name).copied().unwrap_or_default();
                ObjectTypeStat {
                    name,
                    relationship_count,
                    object_count,
                }
            })
            .collect();
        Ok(Stats {
            unique_id,
            estimated_relationship_count,
            object_type_statistics,
        })
    }

    /// Computes readiness on one connection.
    fn load_ready_state(&self, connection: &Connection) -> Result<ReadyState, DatastoreError> {
        let current = read_version(connection, self.context.tables())?;
        let head = self.migrations.head_revision()?;
        if current != head {
            return Ok(ReadyState::not_ready(format!(
                "datastore is not migrated: currently at revision `{current}`, but requires \
                 `{head}`; run `tuplevault migrate`"
            )));
        }
        let status = seed_status(connection, &self.context)?;
        if !status.has_revision {
            return Ok(ReadyState::not_ready("datastore is not seeded: no head revision"));
        }
        if !status.has_database_ident {
            return Ok(ReadyState::not_ready("datastore is not seeded: no database identifier"));
        }
        Ok(ReadyState::ready())
    }

    /// Releases closed-pool connections.
    fn release(&self, state: PoolState) -> Result<(), DatastoreError> {
        let writer = state.writer.into_inner().map_err(|_| poisoned("write connection"))?;
        if !self.owned {
            let handler = self.close_handler.lock().map_err(|_| poisoned("close handler"))?.take();
            return handler.map_or(Ok(()), |handler| handler(writer));
        }
        for reader in state.readers {
            let reader = reader.into_inner().map_err(|_| poisoned("read connection"))?;
            reader.close().map_err(|(_, err)| db_error(ERR_CLOSE, &err))?;
        }
        writer.close().map_err(|(_, err)| db_error(ERR_CLOSE, &err))
    }
}

/// Converts a stored count to `u64`, clamping negatives to zero.
fn stored_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

// ============================================================================
// SECTION: Datastore Trait
// ============================================================================

impl Datastore for SqliteDatastore {
    fn snapshot_reader<'a>(
        &'a self,
        revision: Revision,
        cancel: &CancellationToken,
    ) -> Box<dyn Reader + 'a> {
        Box::new(SqliteReader::new(&self.pool, &self.context, cancel.clone(), revision))
    }

    fn read_write_tx(
        &self,
        cancel: &CancellationToken,
        f: &mut TxUserFn<'_>,
    ) -> Result<Revision, DatastoreError> {
        cancel.check(ERR_TRANSACTION)?;
        let started = Instant::now();
        let mut revision = Revision::NONE;
        let result = self.pool.with_writer(|connection| {
            let tx = connection.begin_write()?;
            match self.apply(&tx, cancel, f, &mut revision) {
                Ok(()) => Connection::commit(tx),
                Err(err) => {
                    let _ = tx.rollback();
                    Err(err)
                }
            }
        });
        let duration_ms = started.elapsed().as_millis();
        match result {
            Ok(()) => {
                self.sink.record_transaction(&TransactionEvent::committed(revision, duration_ms));
                Ok(revision)
            }
            Err(err) => {
                self.sink.record_transaction(&TransactionEvent::rolled_back(
                    revision,
                    duration_ms,
                    &err,
                ));
                Err(err)
            }
        }
    }

    fn head_revision(&self) -> Result<Revision, DatastoreError> {
        self.pool.with_reader(|connection| load_head_revision(connection, &self.context))
    }

    fn check_revision(&self, revision: Revision) -> Result<(), DatastoreError> {
        self.pool.with_reader(|connection| check_revision(connection, &self.context, revision))
    }

    fn watch(&self, _after: Revision) -> (Receiver<RevisionChanges>, Receiver<DatastoreError>) {
        let (changes_sender, changes) = mpsc::channel();
        let (errors_sender, errors) = mpsc::channel();
        drop(changes_sender);
        drop(errors_sender);
        (changes, errors)
    }

    fn ready_state(&self) -> Result<ReadyState, DatastoreError> {
        self.pool.with_reader(|connection| self.load_ready_state(connection))
    }

    fn features(&self) -> Result<Features, DatastoreError> {
        Ok(Features {
            watch: Feature {
                enabled: false,
                reason: WATCH_UNSUPPORTED.to_string(),
            },
        })
    }

    fn statistics(&self) -> Result<Stats, DatastoreError> {
        self.pool.with_reader(|connection| self.load_statistics(connection))
    }

    fn close(&self) -> Result<(), DatastoreError> {
        let Some(state) = self.pool.take()? else {
            return Ok(());
        };
        let result = self.release(state);
        self.sink.record_lifecycle(&LifecycleEvent::closed(self.table_prefix(), self.owned));
        result
    }
}

// ============================================================================
// SECTION: Connections
// ============================================================================

/// Opens a `SQLite` connection with the configured pragmas applied.
fn open_connection(config: &SqliteDatastoreConfig) -> Result<Connection, DatastoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| db_error("unable to open datastore", &err))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies durability and locking pragmas.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteDatastoreConfig,
) -> Result<(), DatastoreError> {
    let map = |err: rusqlite::Error| db_error("unable to configure datastore", &err);
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(map)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(map)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(map)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(map)?;
    Ok(())
}
