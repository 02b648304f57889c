// crates/stmt-cache-core/src/engine/recording.rs
// ============================================================================
// Module: Recording Engine
// Description: In-memory reference engine that records native calls.
// Purpose: Observe the exact primitive sequence driven by programs.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`RecordingEngine`] hands out sequential statement identifiers, tracks
//! which statements are live, and appends every successful primitive call to
//! an ordered log. Calls against unknown or destroyed statements fail with
//! [`EngineError::UnknownStatement`], so double destroys surface as errors.
//! Compile failures can be injected per SQL text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use super::EngineError;
use super::ExecutionEngine;
use super::NativeStatement;
use super::StatementOutput;
use crate::value::SqlValue;

// ============================================================================
// SECTION: Call Log
// ============================================================================

/// Native primitive call observed by a [`RecordingEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    /// A statement was compiled.
    Compile {
        /// Identifier assigned to the statement.
        statement: NativeStatement,
        /// Compiled SQL text.
        sql: String,
    },
    /// A statement was destroyed.
    Destroy {
        /// Destroyed statement.
        statement: NativeStatement,
    },
    /// A value was bound.
    Bind {
        /// Target statement.
        statement: NativeStatement,
        /// 1-based parameter position.
        position: u32,
        /// Bound value.
        value: SqlValue,
    },
    /// All bindings were cleared.
    ClearBindings {
        /// Target statement.
        statement: NativeStatement,
    },
    /// The statement was executed.
    Execute {
        /// Executed statement.
        statement: NativeStatement,
    },
}

impl EngineCall {
    /// Returns the statement the call targeted.
    #[must_use]
    pub const fn statement(&self) -> NativeStatement {
        match self {
            Self::Compile { statement, .. }
            | Self::Destroy { statement }
            | Self::Bind { statement, .. }
            | Self::ClearBindings { statement }
            | Self::Execute { statement } => *statement,
        }
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Mutable state behind the recording engine lock.
#[derive(Debug, Default)]
struct RecordingState {
    /// Last identifier handed out.
    last_id: u64,
    /// Live statements and their SQL text.
    live: HashMap<NativeStatement, String>,
    /// Ordered log of successful calls.
    calls: Vec<EngineCall>,
    /// SQL texts whose compilation fails.
    failing_sql: HashSet<String>,
    /// Canned execution output keyed by SQL text.
    outputs: HashMap<String, StatementOutput>,
}

impl RecordingState {
    /// Returns an error unless the statement is live.
    fn ensure_live(&self, statement: NativeStatement) -> Result<(), EngineError> {
        if self.live.contains_key(&statement) {
            Ok(())
        } else {
            Err(EngineError::UnknownStatement(statement.get()))
        }
    }
}

/// In-memory [`ExecutionEngine`] that records every native call.
///
/// # Invariants
/// - Statement identifiers are never reused.
/// - Only successful calls are appended to the log.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    /// Engine state guarded by a mutex.
    state: Mutex<RecordingState>,
}

impl RecordingEngine {
    /// Creates an empty recording engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the engine state, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every later compile of `sql` fail.
    pub fn fail_compile(&self, sql: impl Into<String>) {
        self.lock().failing_sql.insert(sql.into());
    }

    /// Sets the output returned when statements compiled from `sql` execute.
    pub fn set_output(&self, sql: impl Into<String>, output: StatementOutput) {
        self.lock().outputs.insert(sql.into(), output);
    }

    /// Returns a copy of the call log.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Returns and clears the call log.
    pub fn take_calls(&self) -> Vec<EngineCall> {
        std::mem::take(&mut self.lock().calls)
    }

    /// Returns the calls that targeted one statement.
    #[must_use]
    pub fn calls_for(&self, statement: NativeStatement) -> Vec<EngineCall> {
        self.lock().calls.iter().filter(|call| call.statement() == statement).cloned().collect()
    }

    /// Returns the number of statements compiled so far.
    #[must_use]
    pub fn compile_count(&self) -> usize {
        self.lock().calls.iter().filter(|call| matches!(call, EngineCall::Compile { .. })).count()
    }

    /// Returns how many times a statement was destroyed.
    #[must_use]
    pub fn destroy_count(&self, statement: NativeStatement) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, EngineCall::Destroy { statement: s } if *s == statement))
            .count()
    }

    /// Returns the number of live statements.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Returns true when the statement has been compiled and not destroyed.
    #[must_use]
    pub fn is_live(&self, statement: NativeStatement) -> bool {
        self.lock().live.contains_key(&statement)
    }

    /// Validates the statement and records a bind.
    fn record_bind(
        &self,
        statement: NativeStatement,
        position: u32,
        value: SqlValue,
    ) -> Result<(), EngineError> {
        if position == 0 {
            return Err(EngineError::Bind("bind position must be 1-based".to_string()));
        }
        let mut state = self.lock();
        state.ensure_live(statement)?;
        state.calls.push(EngineCall::Bind {
            statement,
            position,
            value,
        });
        Ok(())
    }
}

impl ExecutionEngine for RecordingEngine {
    fn compile(&self, sql: &str) -> Result<NativeStatement, EngineError> {
        let mut state = self.lock();
        if state.failing_sql.contains(sql) {
            return Err(EngineError::Compile(format!("injected failure for: {sql}")));
        }
        let next = state.last_id + 1;
        let statement = NativeStatement::from_raw(next)
            .ok_or_else(|| EngineError::Native("statement identifier overflow".to_string()))?;
        state.last_id = next;
        state.live.insert(statement, sql.to_string());
        state.calls.push(EngineCall::Compile {
            statement,
            sql: sql.to_string(),
        });
        Ok(statement)
    }

    fn destroy(&self, statement: NativeStatement) -> Result<(), EngineError> {
        let mut state = self.lock();
        if state.live.remove(&statement).is_none() {
            return Err(EngineError::UnknownStatement(statement.get()));
        }
        state.calls.push(EngineCall::Destroy {
            statement,
        });
        Ok(())
    }

    fn bind_null(&self, statement: NativeStatement, position: u32) -> Result<(), EngineError> {
        self.record_bind(statement, position, SqlValue::Null)
    }

    fn bind_integer(
        &self,
        statement: NativeStatement,
        position: u32,
        value: i64,
    ) -> Result<(), EngineError> {
        self.record_bind(statement, position, SqlValue::Integer(value))
    }

    fn bind_real(
        &self,
        statement: NativeStatement,
        position: u32,
        value: f64,
    ) -> Result<(), EngineError> {
        self.record_bind(statement, position, SqlValue::Real(value))
    }

    fn bind_text(
        &self,
        statement: NativeStatement,
        position: u32,
        value: &str,
    ) -> Result<(), EngineError> {
        self.record_bind(statement, position, SqlValue::Text(value.to_string()))
    }

    fn bind_binary(
        &self,
        statement: NativeStatement,
        position: u32,
        value: &[u8],
    ) -> Result<(), EngineError> {
        self.record_bind(statement, position, SqlValue::Binary(value.to_vec()))
    }

    fn clear_bindings(&self, statement: NativeStatement) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.ensure_live(statement)?;
        state.calls.push(EngineCall::ClearBindings {
            statement,
        });
        Ok(())
    }

    fn execute(&self, statement: NativeStatement) -> Result<StatementOutput, EngineError> {
        let mut state = self.lock();
        let output = match state.live.get(&statement) {
            Some(sql) => state.outputs.get(sql).cloned().unwrap_or_default(),
            None => return Err(EngineError::UnknownStatement(statement.get())),
        };
        state.calls.push(EngineCall::Execute {
            statement,
        });
        Ok(output)
    }
}
