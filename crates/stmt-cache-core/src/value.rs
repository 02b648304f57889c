// crates/stmt-cache-core/src/value.rs
// ============================================================================
// Module: Bind Values
// Description: Tagged SQL values and queued bind records.
// Purpose: Keep deferred bind replay type-safe.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`SqlValue`] is the tagged union used for both parameter binds and result
//! cells. [`PendingBind`] records a bind issued before a program owns a
//! compiled handle; replay matches on the tag to pick the native bind call.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Values
// ============================================================================

/// SQL value carried by binds and result rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point value.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl SqlValue {
    /// Returns a stable label for the value tag.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ============================================================================
// SECTION: Pending Binds
// ============================================================================

/// Bind recorded while a program has no compiled handle.
///
/// # Invariants
/// - `position` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBind {
    /// 1-based parameter position.
    pub position: u32,
    /// Value to bind at replay time.
    pub value: SqlValue,
}
