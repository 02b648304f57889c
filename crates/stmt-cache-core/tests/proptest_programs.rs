//! Statement cache property-based tests.
//!
//! ## Purpose
//! Randomized checks for statement classification and deferred bind replay.
//!
//! ## What is covered
//! - Classification depends only on the case-folded three-character prefix.
//! - SELECT and UPDATE never become cache-resident.
//! - Arbitrary queued binds replay exactly and in order.
// crates/stmt-cache-core/tests/proptest_programs.rs
// ============================================================================
// Module: Statement Cache Property-Based Tests
// Description: Fuzz-like checks for classification and bind replay.
// Purpose: Ensure classification is total and replay preserves bind order.
// ============================================================================

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

use proptest::prelude::*;
use stmt_cache_core::EngineCall;
use stmt_cache_core::PendingBind;
use stmt_cache_core::Program;
use stmt_cache_core::SqlValue;
use stmt_cache_core::StatementKind;

mod common;
use crate::common::native;
use crate::common::recording_connection;

fn sql_value() -> impl Strategy<Value = SqlValue> {
    prop_oneof![
        Just(SqlValue::Null),
        any::<i64>().prop_map(SqlValue::Integer),
        (-1.0e9_f64 .. 1.0e9).prop_map(SqlValue::Real),
        "[a-z ]{0,16}".prop_map(SqlValue::Text),
        proptest::collection::vec(any::<u8>(), 0 .. 16).prop_map(SqlValue::Binary),
    ]
}

fn mixed_case(keywords: &'static [&'static str]) -> impl Strategy<Value = String> {
    (proptest::sample::select(keywords), proptest::collection::vec(any::<bool>(), 8)).prop_map(
        |(keyword, upper)| {
            keyword
                .chars()
                .zip(upper)
                .map(|(ch, upper)| if upper { ch.to_ascii_uppercase() } else { ch })
                .collect()
        },
    )
}

fn pending_bind() -> impl Strategy<Value = PendingBind> {
    (1_u32 .. 16, sql_value()).prop_map(|(position, value)| PendingBind {
        position,
        value,
    })
}

proptest! {
    #[test]
    fn classification_ignores_case_and_suffix(prefix in mixed_case(&["sel", "ins", "upd", "del", "rep", "att", "beg", "com", "end", "rol", "pra", "cre", "dro", "alt", "ana", "det"]), rest in "[ a-zA-Z0-9_]{0,24}") {
        let sql = format!("{prefix}{rest}");
        let upper = format!("{}{rest}", prefix.to_ascii_uppercase());
        prop_assert_eq!(StatementKind::classify(&sql), StatementKind::classify(&upper));
        prop_assert_ne!(StatementKind::classify(&sql), StatementKind::Other);
    }

    #[test]
    fn classification_ignores_text_past_prefix(sql in ".{0,32}", suffix in ".{0,8}") {
        let kind = StatementKind::classify(&sql);
        if sql.trim_start().chars().count() >= 3 {
            prop_assert_eq!(StatementKind::classify(&format!("{sql}{suffix}")), kind);
        }
        prop_assert_eq!(kind.is_cacheable(), !matches!(kind, StatementKind::Select | StatementKind::Update));
    }

    #[test]
    fn short_text_is_other(sql in "[a-zA-Z]{0,2}") {
        prop_assert_eq!(StatementKind::classify(&sql), StatementKind::Other);
    }

    #[test]
    fn uncached_kinds_never_enter_cache(keyword in mixed_case(&["select", "update"]), rest in "[ a-z0-9_]{0,24}") {
        let (_engine, connection) = recording_connection();
        let sql = format!("{keyword}{rest}");
        let program = Program::new(&connection, &sql).unwrap();
        prop_assert!(program.is_compiled());
        prop_assert_eq!(connection.cached_statement_count(), 0);
    }

    #[test]
    fn deferred_binds_replay_exactly_in_order(binds in proptest::collection::vec(pending_bind(), 0 .. 24)) {
        let (engine, connection) = recording_connection();
        let program = Program::deferred(&connection, "INSERT INTO t VALUES (?)").unwrap();
        for bind in &binds {
            program.bind_value(bind.position, bind.value.clone()).unwrap();
        }
        prop_assert_eq!(program.pending_binds(), binds.clone());

        program.compile().unwrap();
        let replayed: Vec<PendingBind> = engine
            .calls_for(native(program.statement_id()))
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Bind { position, value, .. } => Some(PendingBind { position, value }),
                _ => None,
            })
            .collect();
        prop_assert_eq!(replayed, binds);
        prop_assert!(program.pending_binds().is_empty());
    }
}
