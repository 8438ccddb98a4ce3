//! Translated plans: provider command, ordered parameter bindings, and the
//! expected result shape.

use std::fmt::{self, Write as _};
use std::hash::Hasher;

use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::query::{ast::Var, metadata::DeclaredType, Value};

/// Seed for plan fingerprints.
const PLAN_HASH_SEED: u64 = 0x7265_6672_6163_7421;

/// Provider command produced by translation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Command {
    /// Relational text with `@pN` placeholders.
    Text {
        /// Generated statement.
        sql: String,
    },
    /// Opaque invocation (stored procedure or non-composable raw text).
    Opaque {
        /// Command identifier, passed to the provider unchanged.
        command: String,
    },
}

/// One entry of the Parameter Binding Set.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParamBinding {
    /// Zero-based position; matches the `@pN` placeholder and the textual order.
    pub position: usize,
    /// Bound value.
    pub value: Value,
    /// Declared provider type of the parameter.
    #[serde(serialize_with = "serialize_display")]
    pub ty: DeclaredType,
}

/// Column the provider must return.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShapeColumn {
    /// Binding the column belongs to.
    pub var: Var,
    /// Member name.
    pub name: String,
    /// Provider column or document property name.
    pub column: String,
    /// Declared target type.
    #[serde(serialize_with = "serialize_display")]
    pub ty: DeclaredType,
    /// Whether `NULL` is acceptable.
    pub nullable: bool,
}

/// Member pick applied after coercion.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectionPick {
    /// Index into [`ResultShape::columns`].
    pub index: usize,
    /// Binding of the projected row.
    pub var: Var,
    /// Output member name.
    pub alias: String,
}

/// Result-shape descriptor.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultShape {
    /// Physical columns, in provider order.
    pub columns: Vec<ShapeColumn>,
    /// Optional client-side member pick over `columns`.
    pub projection: Option<Vec<ProjectionPick>>,
    /// The result is a single scalar (aggregate).
    pub scalar: bool,
}

impl ResultShape {
    /// Names of the shaped output members, after any projection pick.
    pub fn output_names(&self) -> Vec<&str> {
        match &self.projection {
            Some(picks) => picks.iter().map(|pick| pick.alias.as_str()).collect(),
            None => self.columns.iter().map(|col| col.name.as_str()).collect(),
        }
    }
}

/// Non-fatal finding recorded during translation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum PlanWarning {
    /// A string literal outside the ANSI range is compared with an ANSI member.
    AnsiLiteral {
        /// Member compared against.
        member: String,
        /// Offending literal.
        literal: String,
    },
}

impl fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanWarning::AnsiLiteral { member, literal } => write!(
                f,
                "literal \"{literal}\" compared with ANSI member '{member}' requires ANSI truncation"
            ),
        }
    }
}

/// Provider-native plan for one execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TranslatedPlan {
    /// Provider command.
    pub command: Command,
    /// Ordered Parameter Binding Set.
    pub parameters: Vec<ParamBinding>,
    /// Expected result shape.
    pub shape: ResultShape,
    /// Non-fatal translation findings.
    pub warnings: Vec<PlanWarning>,
    /// Deterministic fingerprint of command, bindings, and shape.
    pub plan_hash: u64,
}

impl TranslatedPlan {
    pub(crate) fn new(
        command: Command,
        parameters: Vec<ParamBinding>,
        shape: ResultShape,
        warnings: Vec<PlanWarning>,
    ) -> Self {
        let mut plan = Self {
            command,
            parameters,
            shape,
            warnings,
            plan_hash: 0,
        };
        plan.plan_hash = plan.fingerprint();
        plan
    }

    /// Generated text, or `None` for opaque commands.
    pub fn sql(&self) -> Option<&str> {
        match &self.command {
            Command::Text { sql } => Some(sql),
            Command::Opaque { .. } => None,
        }
    }

    /// Human-readable rendering of the command and its bindings.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        match &self.command {
            Command::Text { sql } => {
                let _ = writeln!(out, "{sql}");
            }
            Command::Opaque { command } => {
                let _ = writeln!(out, "EXEC {command}");
            }
        }
        for binding in &self.parameters {
            let _ = writeln!(
                out,
                "  @p{} = {} ({})",
                binding.position, binding.value, binding.ty
            );
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "  warning: {warning}");
        }
        let _ = write!(out, "  hash: {:016x}", self.plan_hash);
        out
    }

    fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh64::new(PLAN_HASH_SEED);
        match &self.command {
            Command::Text { sql } => {
                hasher.write_u8(0);
                write_str(&mut hasher, sql);
            }
            Command::Opaque { command } => {
                hasher.write_u8(1);
                write_str(&mut hasher, command);
            }
        }
        hasher.write_u64(self.parameters.len() as u64);
        for binding in &self.parameters {
            hasher.write_u64(binding.position as u64);
            hash_value(&binding.value, &mut hasher);
            write_str(&mut hasher, &binding.ty.to_string());
        }
        hash_shape(&self.shape, &mut hasher);
        hasher.finish()
    }
}

fn hash_shape(shape: &ResultShape, hasher: &mut Xxh64) {
    hasher.write_u64(shape.columns.len() as u64);
    for col in &shape.columns {
        write_str(hasher, col.var.as_str());
        write_str(hasher, &col.name);
        write_str(hasher, &col.column);
        write_str(hasher, &col.ty.to_string());
        hasher.write_u8(col.nullable as u8);
    }
    match &shape.projection {
        Some(picks) => {
            hasher.write_u64(picks.len() as u64 + 1);
            for pick in picks {
                hasher.write_u64(pick.index as u64);
                write_str(hasher, pick.var.as_str());
                write_str(hasher, &pick.alias);
            }
        }
        None => hasher.write_u64(0),
    }
    hasher.write_u8(shape.scalar as u8);
}

fn hash_value(value: &Value, hasher: &mut Xxh64) {
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(v) => {
            hasher.write_u8(1);
            hasher.write_u8(*v as u8);
        }
        Value::Int(v) => {
            hasher.write_u8(2);
            hasher.write_i64(*v);
        }
        Value::Float(v) => {
            hasher.write_u8(3);
            hasher.write_u64(v.to_bits());
        }
        Value::Decimal(v) => {
            hasher.write_u8(4);
            hasher.write(&v.serialize());
        }
        Value::String(v) => {
            hasher.write_u8(5);
            write_str(hasher, v);
        }
        Value::Bytes(v) => {
            hasher.write_u8(6);
            hasher.write_u64(v.len() as u64);
            hasher.write(v);
        }
        Value::DateTime(v) => {
            hasher.write_u8(7);
            let (hour, minute, second, nanos) = v.time().as_hms_nano();
            hasher.write_i32(v.date().to_julian_day());
            hasher.write(&[hour, minute, second]);
            hasher.write_u32(nanos);
        }
        Value::DateTimeOffset(v) => {
            hasher.write_u8(8);
            hasher.write_i128(v.unix_timestamp_nanos());
            hasher.write_i32(v.offset().whole_seconds());
        }
    }
}

fn write_str(hasher: &mut Xxh64, text: &str) {
    hasher.write_u64(text.len() as u64);
    hasher.write(text.as_bytes());
}

fn serialize_display<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
    T: fmt::Display,
{
    serializer.collect_str(value)
}
