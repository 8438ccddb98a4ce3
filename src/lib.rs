//! Refract: capability-aware query translation over heterogeneous stores.
//!
//! Queries are composed with [`query::QueryBuilder`], validated against a
//! provider's [`query::CapabilityProfile`], lowered to provider text, and run
//! through a [`query::ProviderSink`]. Sources that cannot be composed on the
//! server can be materialized and finished with [`query::ClientEvaluator`].

#![warn(missing_docs)]

pub mod config;
pub mod provider;
pub mod query;

pub use query::{QueryBuilder, QueryError, Value};
