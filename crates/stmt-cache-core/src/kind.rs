// crates/stmt-cache-core/src/kind.rs
// ============================================================================
// Module: Statement Classification
// Description: Prefix-based statement kind detection and cacheability policy.
// Purpose: Decide which SQL texts may share a cached compiled handle.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! SQL text is classified from its first three characters, compared
//! case-insensitively, after trimming. Classification never parses SQL; text
//! shorter than three characters is [`StatementKind::Other`].
//!
//! Cacheability is a fixed partition: every kind except
//! [`StatementKind::Select`] and [`StatementKind::Update`] shares compiled
//! handles through the connection cache.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Statement Kind
// ============================================================================

/// Statement classification derived from the leading keyword.
///
/// # Invariants
/// - Variants are stable for programmatic handling and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// `SELECT` query.
    Select,
    /// `INSERT` statement.
    Insert,
    /// `UPDATE` statement.
    Update,
    /// `DELETE` statement.
    Delete,
    /// `REPLACE` statement.
    Replace,
    /// `ATTACH` statement.
    Attach,
    /// `BEGIN` transaction.
    Begin,
    /// `COMMIT` or `END` transaction.
    Commit,
    /// `ROLLBACK` transaction.
    Abort,
    /// `PRAGMA` statement.
    Pragma,
    /// `CREATE`, `DROP` or `ALTER` statement.
    Ddl,
    /// `ANALYZE` or `DETACH`, which the engine runs unprepared.
    Unprepared,
    /// Anything else.
    Other,
}

impl StatementKind {
    /// Classifies trimmed SQL text by its leading keyword prefix.
    #[must_use]
    pub fn classify(sql: &str) -> Self {
        let sql = sql.trim_start();
        let Some(prefix) = sql.get(.. 3) else {
            return Self::Other;
        };
        match prefix.to_ascii_uppercase().as_str() {
            "SEL" => Self::Select,
            "INS" => Self::Insert,
            "UPD" => Self::Update,
            "DEL" => Self::Delete,
            "REP" => Self::Replace,
            "ATT" => Self::Attach,
            "BEG" => Self::Begin,
            "COM" | "END" => Self::Commit,
            "ROL" => Self::Abort,
            "PRA" => Self::Pragma,
            "CRE" | "DRO" | "ALT" => Self::Ddl,
            "ANA" | "DET" => Self::Unprepared,
            _ => Self::Other,
        }
    }

    /// Returns true when statements of this kind share cached handles.
    #[must_use]
    pub const fn is_cacheable(self) -> bool {
        !matches!(self, Self::Select | Self::Update)
    }

    /// Returns a stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
            Self::Attach => "attach",
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Abort => "abort",
            Self::Pragma => "pragma",
            Self::Ddl => "ddl",
            Self::Unprepared => "unprepared",
            Self::Other => "other",
        }
    }
}
