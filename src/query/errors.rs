#![forbid(unsafe_code)]

use std::fmt;

use thiserror::Error;

use crate::query::ast::OperatorKind;

/// Failures surfaced by the translation core.
///
/// Each kind stays distinguishable all the way to the caller: conformance
/// checks assert on which kind occurred and, for
/// [`QueryError::TranslationFailed`], on the exact message text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    /// A relational operator was composed on top of an opaque command.
    #[error("{}", non_composable_message(.command, .operator, .repeated))]
    NonComposableSource {
        /// Command identifier of the opaque source.
        command: String,
        /// Operator that attempted the composition.
        operator: OperatorKind,
        /// The same opaque source appears more than once under the operator.
        repeated: bool,
    },
    /// A correlated or cross-source shape the provider cannot express.
    #[error("provider '{provider}' does not support {shape}")]
    UnsupportedShape {
        /// Provider the profile was declared for.
        provider: String,
        /// Description of the rejected shape.
        shape: String,
    },
    /// An expression fragment has no provider-native lowering.
    #[error(
        "The query expression '{expression}' could not be translated. Either rewrite the query \
         in a form that can be translated, or materialize the source and evaluate the \
         expression on the client."
    )]
    TranslationFailed {
        /// Human-readable form of the unresolved expression.
        expression: String,
    },
    /// A raw row or document disagrees with the expected result shape.
    #[error("row {row} does not match the expected result shape: {detail}")]
    ShapeMismatch {
        /// Zero-based index of the offending record.
        row: usize,
        /// What disagreed.
        detail: String,
    },
    /// Failure reported by the provider execution sink, passed through as-is.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Entity or member could not be resolved.
    #[error("{0}")]
    Metadata(String),
    /// The composed query is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// Cancellation was requested before the provider round-trip.
    #[error("query execution was cancelled")]
    Cancelled,
}

fn non_composable_message(command: &str, operator: &OperatorKind, repeated: &bool) -> String {
    if *repeated {
        format!(
            "'{command}' is referenced more than once under {operator}; an opaque command \
             cannot be invoked twice within one provider command. Materialize each \
             invocation and compose the results on the client."
        )
    } else {
        format!(
            "{operator} cannot be composed over '{command}' because it is not composable. \
             Materialize the results and apply {operator} on the client."
        )
    }
}

impl QueryError {
    /// Builds a [`QueryError::TranslationFailed`] echoing `expression`.
    pub fn translation_failed(expression: impl Into<String>) -> Self {
        QueryError::TranslationFailed {
            expression: expression.into(),
        }
    }

    /// Builds a [`QueryError::ShapeMismatch`] for a record.
    pub fn shape_mismatch(row: usize, detail: impl Into<String>) -> Self {
        QueryError::ShapeMismatch {
            row,
            detail: detail.into(),
        }
    }

    /// Builds a [`QueryError::Metadata`] for an unknown entity.
    pub fn unknown_entity(name: &str) -> Self {
        QueryError::Metadata(format!("unknown entity '{name}'"))
    }

    /// Builds a [`QueryError::Metadata`] for an unknown member of a binding.
    pub fn unknown_member(var: &str, member: &str) -> Self {
        QueryError::Metadata(format!("'{var}' has no member '{member}'"))
    }

    /// Builds a [`QueryError::InvalidQuery`].
    pub fn invalid(message: impl Into<String>) -> Self {
        QueryError::InvalidQuery(message.into())
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::NonComposableSource { .. } => "NonComposableSource",
            QueryError::UnsupportedShape { .. } => "UnsupportedShape",
            QueryError::TranslationFailed { .. } => "TranslationFailed",
            QueryError::ShapeMismatch { .. } => "ShapeMismatch",
            QueryError::Provider(_) => "Provider",
            QueryError::Metadata(_) => "Metadata",
            QueryError::InvalidQuery(_) => "InvalidQuery",
            QueryError::Cancelled => "Cancelled",
        }
    }
}

/// Convenience wrapper that formats query errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}

/// Failures raised by a provider execution sink.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The round-trip did not complete in time.
    #[error("provider timed out after {after_ms} ms")]
    Timeout {
        /// Elapsed milliseconds before giving up.
        after_ms: u64,
    },
    /// The transport could not reach the store.
    #[error("provider connection failed: {0}")]
    Connection(String),
    /// The store rejected the command.
    #[error("provider rejected command '{command}': {message}")]
    Command {
        /// Command text or identifier.
        command: String,
        /// Provider diagnostic.
        message: String,
    },
}
