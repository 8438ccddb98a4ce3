//! Shaping raw provider records into typed results.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, warn};

use crate::query::{
    ast::Var,
    capability::CapabilityProfile,
    errors::QueryError,
    metadata::DeclaredType,
    plan::{ResultShape, ShapeColumn},
    Result, Value,
};

/// One record as returned by a provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RawRecord {
    /// Positional row from a relational provider.
    Row(Vec<Value>),
    /// Field-keyed document from a document provider.
    Document(BTreeMap<String, Value>),
}

/// Raw records of one round-trip.
pub type RawResult = Vec<RawRecord>;

/// Identity of a shaped column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnKey {
    /// Binding the member belongs to.
    pub var: Var,
    /// Member name.
    pub name: String,
}

/// Materialized sequence of typed rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Rows {
    /// Column identities in row order.
    pub columns: Vec<ColumnKey>,
    /// Coerced values.
    pub rows: Vec<Vec<Value>>,
}

impl Rows {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` when no rows were produced.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first column named `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    /// Index of the column `var.name`.
    pub fn index_of_member(&self, var: &Var, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|col| col.var == *var && col.name == name)
    }

    /// Values of the first column named `name`, one per row.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.index_of(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Rebinds every column to `var`.
    pub fn rebind(mut self, var: &Var) -> Self {
        for column in &mut self.columns {
            column.var = var.clone();
        }
        self
    }
}

/// Final result of one execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ShapedResult {
    /// Single scalar (aggregate).
    Scalar(Value),
    /// Sequence of typed rows.
    Rows(Rows),
}

impl ShapedResult {
    /// Unwraps a row sequence.
    pub fn into_rows(self) -> Result<Rows> {
        match self {
            ShapedResult::Rows(rows) => Ok(rows),
            ShapedResult::Scalar(_) => Err(QueryError::invalid("expected rows, found a scalar")),
        }
    }

    /// Unwraps a scalar.
    pub fn into_scalar(self) -> Result<Value> {
        match self {
            ShapedResult::Scalar(value) => Ok(value),
            ShapedResult::Rows(_) => Err(QueryError::invalid("expected a scalar, found rows")),
        }
    }
}

/// Applies declared-type coercions under a capability profile.
pub struct Materializer<'a> {
    profile: &'a CapabilityProfile,
}

impl<'a> Materializer<'a> {
    /// Creates a materializer for one provider.
    pub fn new(profile: &'a CapabilityProfile) -> Self {
        Self { profile }
    }

    /// Shapes `raw` according to `shape`.
    pub fn materialize(&self, shape: &ResultShape, raw: RawResult) -> Result<ShapedResult> {
        let mut coerced = Vec::with_capacity(raw.len());
        for (idx, record) in raw.into_iter().enumerate() {
            let values = self.align(idx, &shape.columns, record)?;
            let row = values
                .into_iter()
                .zip(&shape.columns)
                .map(|(value, column)| self.coerce(idx, column, value))
                .collect::<Result<Vec<_>>>()?;
            coerced.push(row);
        }
        debug!(rows = coerced.len(), scalar = shape.scalar, "records materialized");

        if shape.scalar {
            return match coerced.len() {
                0 => Ok(ShapedResult::Scalar(Value::Null)),
                1 => Ok(ShapedResult::Scalar(
                    coerced.pop().and_then(|row| row.into_iter().next()).unwrap_or(Value::Null),
                )),
                n => Err(QueryError::shape_mismatch(
                    1,
                    format!("scalar result returned {n} records"),
                )),
            };
        }

        let rows = match &shape.projection {
            None => Rows {
                columns: shape
                    .columns
                    .iter()
                    .map(|col| ColumnKey {
                        var: col.var.clone(),
                        name: col.name.clone(),
                    })
                    .collect(),
                rows: coerced,
            },
            Some(picks) => Rows {
                columns: picks
                    .iter()
                    .map(|pick| ColumnKey {
                        var: pick.var.clone(),
                        name: pick.alias.clone(),
                    })
                    .collect(),
                rows: coerced
                    .into_iter()
                    .map(|row| picks.iter().map(|pick| row[pick.index].clone()).collect())
                    .collect(),
            },
        };
        Ok(ShapedResult::Rows(rows))
    }

    /// Orders a record's values like the shape, rejecting any disagreement.
    fn align(&self, idx: usize, columns: &[ShapeColumn], record: RawRecord) -> Result<Vec<Value>> {
        match record {
            RawRecord::Row(values) => {
                if values.len() != columns.len() {
                    return Err(QueryError::shape_mismatch(
                        idx,
                        format!(
                            "expected {} columns, found {}",
                            columns.len(),
                            values.len()
                        ),
                    ));
                }
                Ok(values)
            }
            RawRecord::Document(mut fields) => {
                if fields.len() != columns.len() {
                    return Err(QueryError::shape_mismatch(
                        idx,
                        format!(
                            "expected {} fields, found {}",
                            columns.len(),
                            fields.len()
                        ),
                    ));
                }
                columns
                    .iter()
                    .map(|col| {
                        fields.remove(&col.column).ok_or_else(|| {
                            QueryError::shape_mismatch(
                                idx,
                                format!("document has no field '{}'", col.column),
                            )
                        })
                    })
                    .collect()
            }
        }
    }

    fn coerce(&self, idx: usize, column: &ShapeColumn, value: Value) -> Result<Value> {
        let mismatch = |value: &Value| {
            QueryError::shape_mismatch(
                idx,
                format!(
                    "column '{}' declared {} cannot hold {} value {value}",
                    column.name,
                    column.ty,
                    value.kind()
                ),
            )
        };
        if value.is_null() {
            return match column.ty {
                _ if column.nullable => Ok(Value::Null),
                DeclaredType::DateTime => Ok(Value::DateTime(self.profile.default_date_time())),
                DeclaredType::DateTimeOffset => Ok(Value::DateTimeOffset(
                    self.profile.default_date_time().assume_utc(),
                )),
                _ => Err(QueryError::shape_mismatch(
                    idx,
                    format!("column '{}' is not nullable but the provider returned null", column.name),
                )),
            };
        }
        match (column.ty, value) {
            (DeclaredType::Bool, Value::Bool(v)) => Ok(Value::Bool(v)),
            (DeclaredType::Bool, Value::Int(v @ (0 | 1))) => Ok(Value::Bool(v == 1)),
            (DeclaredType::Int32, Value::Int(v)) if i32::try_from(v).is_ok() => Ok(Value::Int(v)),
            (DeclaredType::Int64, Value::Int(v)) => Ok(Value::Int(v)),
            (DeclaredType::Float64, Value::Float(v)) => Ok(Value::Float(v)),
            (DeclaredType::Float64, Value::Int(v)) => Ok(Value::Float(v as f64)),
            (DeclaredType::Decimal { scale }, value) => {
                let decimal = match &value {
                    Value::Decimal(d) => Some(*d),
                    Value::Int(v) => Some(Decimal::from(*v)),
                    Value::Float(v) => Decimal::try_from(*v).ok(),
                    Value::String(text) => Decimal::from_str(text).ok(),
                    _ => None,
                };
                let Some(decimal) = decimal else {
                    return Err(mismatch(&value));
                };
                let mut rounded =
                    decimal.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
                rounded.rescale(scale);
                Ok(Value::Decimal(rounded))
            }
            (DeclaredType::String { ansi, .. }, Value::String(text)) => {
                if ansi && !text.is_ascii() {
                    if self.profile.supports_unicode_to_ansi_conversion() {
                        let converted = text
                            .chars()
                            .map(|ch| if ch.is_ascii() { ch } else { '?' })
                            .collect();
                        return Ok(Value::String(converted));
                    }
                    warn!(
                        column = column.name.as_str(),
                        "unicode data in ANSI column returned unmodified"
                    );
                }
                Ok(Value::String(text))
            }
            (DeclaredType::Bytes, Value::Bytes(bytes)) => Ok(Value::Bytes(bytes)),
            (DeclaredType::DateTime, Value::DateTime(v)) => Ok(Value::DateTime(v)),
            (DeclaredType::DateTime, Value::String(text)) => {
                parse_datetime(&text).map(Value::DateTime).ok_or_else(|| mismatch(&Value::String(text)))
            }
            (DeclaredType::DateTimeOffset, Value::DateTimeOffset(v)) => {
                Ok(Value::DateTimeOffset(v))
            }
            (DeclaredType::DateTimeOffset, Value::String(text)) => OffsetDateTime::parse(&text, &Rfc3339)
                .map(Value::DateTimeOffset)
                .map_err(|_| mismatch(&Value::String(text))),
            (_, value) => Err(mismatch(&value)),
        }
    }
}

fn parse_datetime(text: &str) -> Option<PrimitiveDateTime> {
    let seconds = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let fractional =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");
    PrimitiveDateTime::parse(text, seconds)
        .or_else(|_| PrimitiveDateTime::parse(text, fractional))
        .or_else(|_| PrimitiveDateTime::parse(text, &Iso8601::DEFAULT))
        .ok()
}
