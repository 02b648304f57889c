// crates/stmt-cache-sqlite/src/engine.rs
// ============================================================================
// Module: SQLite Execution Engine
// Description: ExecutionEngine backed by a single rusqlite connection.
// Purpose: Run cached programs against a real SQLite database.
// Dependencies: stmt-cache-core, rusqlite, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! [`SqliteEngine`] maps each [`NativeStatement`] to a slot holding the SQL
//! text and its bound values. Compilation prepares the SQL once to validate
//! it and record the parameter count; binds are range-checked against that
//! count. Execution goes through rusqlite's prepared-statement cache, binds
//! the slot's values and collects column names, rows and change counts.
//!
//! The database connection is guarded by a mutex, so one engine serializes
//! every native call. Paths are validated against length limits before the
//! database is opened.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::types::Value;
use serde::Deserialize;
use stmt_cache_core::EngineError;
use stmt_cache_core::ExecutionEngine;
use stmt_cache_core::NativeStatement;
use stmt_cache_core::SqlValue;
use stmt_cache_core::StatementOutput;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default capacity of rusqlite's prepared-statement cache.
const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 16;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode.
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode.
    #[default]
    Full,
    /// Normal synchronous mode.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for a file-backed [`SqliteEngine`].
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteEngineConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Capacity of rusqlite's prepared-statement cache used at execution.
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,
}

impl SqliteEngineConfig {
    /// Builds a configuration for `path` with default settings.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default prepared-statement cache capacity.
const fn default_statement_cache_capacity() -> usize {
    DEFAULT_STATEMENT_CACHE_CAPACITY
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` engine construction errors.
#[derive(Debug, Error)]
pub enum SqliteEngineError {
    /// Engine I/O error.
    #[error("sqlite engine io error: {0}")]
    Io(String),
    /// `SQLite` error.
    #[error("sqlite engine db error: {0}")]
    Db(String),
    /// Invalid engine configuration.
    #[error("sqlite engine invalid config: {0}")]
    Invalid(String),
}

impl From<SqliteEngineError> for EngineError {
    fn from(error: SqliteEngineError) -> Self {
        Self::Native(error.to_string())
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Native statement slot.
#[derive(Debug)]
struct StatementSlot {
    /// SQL text the statement was compiled from.
    sql: String,
    /// Bound values indexed by position minus one; unbound positions are `NULL`.
    parameters: Vec<SqlValue>,
}

/// Mutable engine state behind the connection mutex.
struct SqliteEngineState {
    /// Underlying `SQLite` connection.
    connection: Connection,
    /// Live statement slots.
    statements: HashMap<NativeStatement, StatementSlot>,
    /// Last identifier handed out.
    last_id: u64,
}

impl SqliteEngineState {
    /// Returns the slot for a live statement.
    fn slot_mut(&mut self, statement: NativeStatement) -> Result<&mut StatementSlot, EngineError> {
        self.statements.get_mut(&statement).ok_or(EngineError::UnknownStatement(statement.get()))
    }
}

/// `SQLite`-backed [`ExecutionEngine`].
pub struct SqliteEngine {
    /// Engine state guarded by a mutex.
    state: Mutex<SqliteEngineState>,
}

impl SqliteEngine {
    /// Opens a file-backed engine.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteEngineError`] when the path is invalid or the database
    /// cannot be opened or configured.
    pub fn open(config: &SqliteEngineConfig) -> Result<Self, SqliteEngineError> {
        validate_engine_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let connection = open_connection(config)?;
        tracing::debug!(path = %config.path.display(), "stmt_cache.sqlite.opened");
        Ok(Self::from_connection(connection))
    }

    /// Opens an engine over a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteEngineError::Db`] when the database cannot be opened.
    pub fn open_in_memory() -> Result<Self, SqliteEngineError> {
        let connection =
            Connection::open_in_memory().map_err(|err| SqliteEngineError::Db(err.to_string()))?;
        connection
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|err| SqliteEngineError::Db(err.to_string()))?;
        connection.set_prepared_statement_cache_capacity(DEFAULT_STATEMENT_CACHE_CAPACITY);
        Ok(Self::from_connection(connection))
    }

    /// Wraps an opened connection.
    fn from_connection(connection: Connection) -> Self {
        Self {
            state: Mutex::new(SqliteEngineState {
                connection,
                statements: HashMap::new(),
                last_id: 0,
            }),
        }
    }

    /// Locks the engine state, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, SqliteEngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of live native statements.
    #[must_use]
    pub fn live_statement_count(&self) -> usize {
        self.lock().statements.len()
    }

    /// Stores a value at a 1-based position after range-checking it.
    fn bind(
        &self,
        statement: NativeStatement,
        position: u32,
        value: SqlValue,
    ) -> Result<(), EngineError> {
        let mut state = self.lock();
        let slot = state.slot_mut(statement)?;
        let index = usize::try_from(position)
            .ok()
            .and_then(|position| position.checked_sub(1))
            .filter(|index| *index < slot.parameters.len())
            .ok_or_else(|| {
                EngineError::Bind(format!(
                    "bind position {position} out of range (statement has {} parameters)",
                    slot.parameters.len()
                ))
            })?;
        slot.parameters[index] = value;
        Ok(())
    }
}

impl ExecutionEngine for SqliteEngine {
    fn compile(&self, sql: &str) -> Result<NativeStatement, EngineError> {
        let mut state = self.lock();
        let parameter_count = {
            let prepared = state
                .connection
                .prepare(sql)
                .map_err(|err| EngineError::Compile(err.to_string()))?;
            prepared.parameter_count()
        };
        let next = state.last_id + 1;
        let statement = NativeStatement::from_raw(next)
            .ok_or_else(|| EngineError::Native("statement identifier overflow".to_string()))?;
        state.last_id = next;
        state.statements.insert(
            statement,
            StatementSlot {
                sql: sql.to_string(),
                parameters: vec![SqlValue::Null; parameter_count],
            },
        );
        Ok(statement)
    }

    fn destroy(&self, statement: NativeStatement) -> Result<(), EngineError> {
        match self.lock().statements.remove(&statement) {
            Some(_) => Ok(()),
            None => Err(EngineError::UnknownStatement(statement.get())),
        }
    }

    fn bind_null(&self, statement: NativeStatement, position: u32) -> Result<(), EngineError> {
        self.bind(statement, position, SqlValue::Null)
    }

    fn bind_integer(
        &self,
        statement: NativeStatement,
        position: u32,
        value: i64,
    ) -> Result<(), EngineError> {
        self.bind(statement, position, SqlValue::Integer(value))
    }

    fn bind_real(
        &self,
        statement: NativeStatement,
        position: u32,
        value: f64,
    ) -> Result<(), EngineError> {
        self.bind(statement, position, SqlValue::Real(value))
    }

    fn bind_text(
        &self,
        statement: NativeStatement,
        position: u32,
        value: &str,
    ) -> Result<(), EngineError> {
        self.bind(statement, position, SqlValue::Text(value.to_string()))
    }

    fn bind_binary(
        &self,
        statement: NativeStatement,
        position: u32,
        value: &[u8],
    ) -> Result<(), EngineError> {
        self.bind(statement, position, SqlValue::Binary(value.to_vec()))
    }

    fn clear_bindings(&self, statement: NativeStatement) -> Result<(), EngineError> {
        let mut state = self.lock();
        let slot = state.slot_mut(statement)?;
        slot.parameters.fill(SqlValue::Null);
        Ok(())
    }

    fn execute(&self, statement: NativeStatement) -> Result<StatementOutput, EngineError> {
        let state = self.lock();
        let slot = state
            .statements
            .get(&statement)
            .ok_or(EngineError::UnknownStatement(statement.get()))?;
        run_statement(&state.connection, slot)
    }
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Executes a slot through rusqlite's prepared-statement cache.
fn run_statement(
    connection: &Connection,
    slot: &StatementSlot,
) -> Result<StatementOutput, EngineError> {
    let mut prepared = connection
        .prepare_cached(&slot.sql)
        .map_err(|err| EngineError::Execute(err.to_string()))?;
    for (index, value) in slot.parameters.iter().enumerate() {
        prepared
            .raw_bind_parameter(index + 1, to_sqlite_value(value))
            .map_err(|err| EngineError::Bind(err.to_string()))?;
    }

    let column_count = prepared.column_count();
    if column_count == 0 {
        let changes =
            prepared.raw_execute().map_err(|err| EngineError::Execute(err.to_string()))?;
        return Ok(StatementOutput {
            columns: Vec::new(),
            rows: Vec::new(),
            changes: u64::try_from(changes).unwrap_or(u64::MAX),
        });
    }

    let columns: Vec<String> =
        prepared.column_names().into_iter().map(ToString::to_string).collect();
    let mut rows = Vec::new();
    let mut cursor = prepared.raw_query();
    while let Some(row) = cursor.next().map_err(|err| EngineError::Execute(err.to_string()))? {
        let mut values = Vec::with_capacity(column_count);
        for index in 0 .. column_count {
            let value: Value =
                row.get(index).map_err(|err| EngineError::Execute(err.to_string()))?;
            values.push(from_sqlite_value(value));
        }
        rows.push(values);
    }
    Ok(StatementOutput {
        columns,
        rows,
        changes: 0,
    })
}

/// Converts a bound value into a rusqlite value.
fn to_sqlite_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(value) => Value::Integer(*value),
        SqlValue::Real(value) => Value::Real(*value),
        SqlValue::Text(value) => Value::Text(value.clone()),
        SqlValue::Binary(value) => Value::Blob(value.clone()),
    }
}

/// Converts a rusqlite column value into a tagged value.
fn from_sqlite_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(value) => SqlValue::Integer(value),
        Value::Real(value) => SqlValue::Real(value),
        Value::Text(value) => SqlValue::Text(value),
        Value::Blob(value) => SqlValue::Binary(value),
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the database exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteEngineError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteEngineError::Io("database path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteEngineError::Io(err.to_string()))
}

/// Validates database paths for safety limits.
fn validate_engine_path(path: &Path) -> Result<(), SqliteEngineError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteEngineError::Invalid("database path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteEngineError::Invalid(
                "database path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteEngineError::Invalid(
            "database path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection and applies the configured pragmas.
fn open_connection(config: &SqliteEngineConfig) -> Result<Connection, SqliteEngineError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteEngineError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    connection.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
    Ok(connection)
}

/// Applies journal, sync and busy-timeout settings.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteEngineConfig,
) -> Result<(), SqliteEngineError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteEngineError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteEngineError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteEngineError::Db(err.to_string()))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteEngineError::Db(err.to_string()))?;
    Ok(())
}
