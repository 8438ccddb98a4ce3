//! Provider sinks.
//!
//! A sink runs a [`TranslatedPlan`](crate::query::TranslatedPlan) against a
//! concrete store and returns raw records for the materializer.

/// Scripted in-memory sink for tests and dry runs.
pub mod scripted;

/// Embedded relational store backed by SQLite.
pub mod sqlite;

pub use scripted::ScriptedSink;
pub use sqlite::SqliteSink;
