#![forbid(unsafe_code)]

//! Query composition, translation, and execution.
//!
//! A query is an immutable operator tree over entity sources and raw
//! fragments. It is validated against the provider's capability profile,
//! lowered to a provider-native plan, sent through a [`ProviderSink`], and the
//! raw records are shaped back into typed values.

/// Operator tree and expression IR.
///
/// Defines sources, relational operators, expressions, and parameter values.
pub mod ast;

/// Fluent builder for the operator tree.
pub mod builder;

/// Provider capability flags and profiles.
pub mod capability;

/// Client-side evaluation over materialized sources.
pub mod client;

/// Error taxonomy surfaced to callers.
pub mod errors;

/// Dispatch of translated plans to a provider sink.
///
/// Owns the shared pipeline behind the blocking and suspending entry points.
pub mod executor;

/// Result shaping and type coercion.
pub mod materialize;

/// Entity metadata: declared types and column mappings.
pub mod metadata;

/// Translated plan representation.
pub mod plan;

/// Performance profiling for query operations.
///
/// Collects timing and count statistics for each pipeline phase.
pub mod profile;

/// Lowering of the operator tree to provider text.
pub mod translate;

/// Composability validation.
pub mod validate;

/// Scalar values.
pub mod value;

pub use builder::QueryBuilder;
pub use capability::{CapabilityFlag, CapabilityProfile, CapabilityValue};
pub use client::ClientEvaluator;
pub use errors::{ProviderError, QueryError};
pub use executor::{CancelToken, Dispatcher, ProviderSink, RoundTrip};
pub use materialize::{RawRecord, RawResult, Rows, ShapedResult};
pub use plan::TranslatedPlan;
pub use value::Value;

/// Result alias for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
