//! Client-side evaluation of the query IR over materialized sources.
//!
//! Leaves resolve to rows bound by variable, so a query that cannot be
//! composed server-side (opaque sources, self-joins of one procedure) can be
//! answered by materializing each source first and running the same IR here.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use time::{OffsetDateTime, PrimitiveDateTime, Time};

use crate::query::{
    ast::{AggregateFn, BinaryOp, DatePart, Expr, JoinKind, ListSource, ParamValue, Query, QueryNode, Var},
    errors::QueryError,
    materialize::{ColumnKey, Rows, ShapedResult},
    metadata::DeclaredType,
    Result, Value,
};

/// Evaluates queries over rows that were already materialized.
#[derive(Debug, Default)]
pub struct ClientEvaluator {
    sources: FxHashMap<Var, Rows>,
}

/// Member lookup context: the current row plus any correlated outer rows.
struct Env<'a> {
    columns: &'a [ColumnKey],
    row: &'a [Value],
    outer: Option<&'a Env<'a>>,
}

impl Env<'_> {
    fn lookup(&self, var: &Var, member: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|col| col.var == *var && col.name == member)
            .map(|idx| &self.row[idx])
            .or_else(|| self.outer.and_then(|outer| outer.lookup(var, member)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum HashKey {
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

fn hash_key(value: &Value) -> Option<HashKey> {
    match value {
        Value::Bool(v) => Some(HashKey::Bool(*v)),
        Value::Int(v) => Some(HashKey::Int(*v)),
        Value::String(v) => Some(HashKey::Str(v.clone())),
        Value::Bytes(v) => Some(HashKey::Bytes(v.clone())),
        _ => None,
    }
}

impl ClientEvaluator {
    /// Creates an evaluator with no bound sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds materialized rows to the leaf variable `var`.
    pub fn bind(mut self, var: impl Into<String>, rows: Rows) -> Self {
        let var = Var(var.into());
        let rows = rows.rebind(&var);
        self.sources.insert(var, rows);
        self
    }

    /// Evaluates `query` over the bound sources.
    pub fn evaluate(&self, query: &Query) -> Result<ShapedResult> {
        let ctx = Ctx {
            sources: &self.sources,
            parameters: &query.parameters,
        };
        match &query.root {
            QueryNode::Aggregate { input, func, arg } => {
                let rows = ctx.node(input, None)?;
                ctx.aggregate(&rows, *func, arg.as_ref()).map(ShapedResult::Scalar)
            }
            root => ctx.node(root, None).map(ShapedResult::Rows),
        }
    }
}

struct Ctx<'a> {
    sources: &'a FxHashMap<Var, Rows>,
    parameters: &'a BTreeMap<String, ParamValue>,
}

impl Ctx<'_> {
    fn node(&self, node: &QueryNode, outer: Option<&Env<'_>>) -> Result<Rows> {
        match node {
            QueryNode::Source { var, .. } => self.source(var),
            QueryNode::RawFragment(raw) => self.source(&raw.var),
            QueryNode::Filter { input, predicate } => {
                let mut rows = self.node(input, outer)?;
                let mut kept = Vec::with_capacity(rows.rows.len());
                for row in std::mem::take(&mut rows.rows) {
                    let env = Env {
                        columns: &rows.columns,
                        row: &row,
                        outer,
                    };
                    if truthy(&self.expr(predicate, &env)?) {
                        kept.push(row);
                    }
                }
                rows.rows = kept;
                Ok(rows)
            }
            QueryNode::Project { input, items, var } => {
                let input = self.node(input, outer)?;
                let columns = items
                    .iter()
                    .map(|item| ColumnKey {
                        var: var.clone(),
                        name: item.alias.clone(),
                    })
                    .collect();
                let mut rows = Vec::with_capacity(input.rows.len());
                for row in &input.rows {
                    let env = Env {
                        columns: &input.columns,
                        row,
                        outer,
                    };
                    rows.push(
                        items
                            .iter()
                            .map(|item| self.expr(&item.expr, &env))
                            .collect::<Result<Vec<_>>>()?,
                    );
                }
                Ok(Rows { columns, rows })
            }
            QueryNode::OrderBy { input, keys } => {
                let input = self.node(input, outer)?;
                let mut keyed = Vec::with_capacity(input.rows.len());
                for row in input.rows {
                    let env = Env {
                        columns: &input.columns,
                        row: &row,
                        outer,
                    };
                    let values = keys
                        .iter()
                        .map(|key| self.expr(&key.expr, &env))
                        .collect::<Result<Vec<_>>>()?;
                    keyed.push((values, row));
                }
                keyed.sort_by(|(a, _), (b, _)| {
                    for ((left, right), key) in a.iter().zip(b).zip(keys) {
                        let ord = left.compare(right).unwrap_or(Ordering::Equal);
                        let ord = if key.descending { ord.reverse() } else { ord };
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    Ordering::Equal
                });
                Ok(Rows {
                    columns: input.columns,
                    rows: keyed.into_iter().map(|(_, row)| row).collect(),
                })
            }
            QueryNode::Take { input, count } => {
                let mut rows = self.node(input, outer)?;
                rows.rows.truncate(usize::try_from(*count).unwrap_or(usize::MAX));
                Ok(rows)
            }
            QueryNode::Join {
                left,
                right,
                kind,
                on,
            } => self.join(left, right, *kind, on.as_ref(), outer),
            QueryNode::Aggregate { func, .. } => Err(QueryError::invalid(format!(
                "{} can only be evaluated at the root of a query",
                func.name()
            ))),
        }
    }

    fn source(&self, var: &Var) -> Result<Rows> {
        self.sources
            .get(var)
            .cloned()
            .ok_or_else(|| QueryError::invalid(format!("no materialized rows are bound to '{var}'")))
    }

    fn join(
        &self,
        left: &QueryNode,
        right: &QueryNode,
        kind: JoinKind,
        on: Option<&Expr>,
        outer: Option<&Env<'_>>,
    ) -> Result<Rows> {
        let left_rows = self.node(left, outer)?;
        let left_vars = left.bound_vars();
        let mut referenced = std::collections::BTreeSet::new();
        right.referenced_vars(&mut referenced);
        let dependent = left_vars.iter().any(|var| referenced.contains(var));

        let mut right_columns: Option<Vec<ColumnKey>> = None;
        let shared = if dependent {
            None
        } else {
            let rows = self.node(right, outer)?;
            right_columns = Some(rows.columns.clone());
            Some(rows)
        };
        let index = match (&shared, on) {
            (Some(rows), Some(on)) => self.equi_index(&left_rows.columns, rows, on),
            _ => None,
        };

        let mut out = Vec::new();
        for left_row in &left_rows.rows {
            let left_env = Env {
                columns: &left_rows.columns,
                row: left_row,
                outer,
            };
            let correlated;
            let candidates = match &shared {
                Some(rows) => rows,
                None => {
                    correlated = self.node(right, Some(&left_env))?;
                    if right_columns.is_none() {
                        right_columns = Some(correlated.columns.clone());
                    }
                    &correlated
                }
            };
            let mut columns = left_rows.columns.clone();
            columns.extend(candidates.columns.iter().cloned());

            let positions: Vec<usize> = match &index {
                Some((left_key, map)) => match (&left_row[*left_key], hash_key(&left_row[*left_key])) {
                    (_, Some(key)) => map.get(&key).cloned().unwrap_or_default(),
                    (Value::Null, None) => Vec::new(),
                    _ => (0..candidates.rows.len()).collect(),
                },
                None => (0..candidates.rows.len()).collect(),
            };
            let mut matched = false;
            for pos in positions {
                let right_row = &candidates.rows[pos];
                let mut combined = left_row.clone();
                combined.extend(right_row.iter().cloned());
                let keep = match on {
                    Some(on) => {
                        let env = Env {
                            columns: &columns,
                            row: &combined,
                            outer,
                        };
                        truthy(&self.expr(on, &env)?)
                    }
                    None => true,
                };
                if keep {
                    matched = true;
                    out.push(combined);
                }
            }
            if !matched && kind == JoinKind::LeftOuter {
                let mut combined = left_row.clone();
                combined.extend(std::iter::repeat(Value::Null).take(candidates.columns.len()));
                out.push(combined);
            }
        }

        let mut columns = left_rows.columns;
        match right_columns {
            Some(right) => columns.extend(right),
            None => {
                let mut declared = std::collections::BTreeSet::new();
                right.declared_vars(&mut declared);
                if let Some(var) = declared.into_iter().next() {
                    if let Some(rows) = self.sources.get(&var) {
                        columns.extend(rows.columns.iter().cloned());
                    }
                }
            }
        }
        Ok(Rows { columns, rows: out })
    }

    /// Builds a hash index for `left.member == right.member` conditions.
    fn equi_index(
        &self,
        left_columns: &[ColumnKey],
        right: &Rows,
        on: &Expr,
    ) -> Option<(usize, FxHashMap<HashKey, Vec<usize>>)> {
        let Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right: other,
        } = on
        else {
            return None;
        };
        let (Expr::Member { var: a, member: ma }, Expr::Member { var: b, member: mb }) =
            (left.as_ref(), other.as_ref())
        else {
            return None;
        };
        let find = |columns: &[ColumnKey], var: &Var, member: &str| {
            columns
                .iter()
                .position(|col| col.var == *var && col.name == member)
        };
        let (left_key, right_key) = match (
            find(left_columns, a, ma),
            find(&right.columns, b, mb),
            find(left_columns, b, mb),
            find(&right.columns, a, ma),
        ) {
            (Some(l), Some(r), _, _) | (_, _, Some(l), Some(r)) => (l, r),
            _ => return None,
        };
        let mut map: FxHashMap<HashKey, Vec<usize>> = FxHashMap::default();
        for (pos, row) in right.rows.iter().enumerate() {
            match &row[right_key] {
                Value::Null => {}
                value => map.entry(hash_key(value)?).or_default().push(pos),
            }
        }
        Some((left_key, map))
    }

    fn aggregate(&self, rows: &Rows, func: AggregateFn, arg: Option<&Expr>) -> Result<Value> {
        if func == AggregateFn::Count {
            return Ok(Value::Int(i64::try_from(rows.rows.len()).unwrap_or(i64::MAX)));
        }
        let Some(arg) = arg else {
            return Err(QueryError::invalid(format!("{} requires an argument", func.name())));
        };
        let mut values = Vec::with_capacity(rows.rows.len());
        for row in &rows.rows {
            let env = Env {
                columns: &rows.columns,
                row,
                outer: None,
            };
            let value = self.expr(arg, &env)?;
            if !value.is_null() {
                values.push(value);
            }
        }
        match func {
            AggregateFn::Min | AggregateFn::Max => {
                let want = if func == AggregateFn::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let mut best: Option<Value> = None;
                for value in values {
                    best = match best {
                        Some(current) if value.compare(&current) != Some(want) => Some(current),
                        _ => Some(value),
                    };
                }
                Ok(best.unwrap_or(Value::Null))
            }
            AggregateFn::Sum => values
                .iter()
                .try_fold(Value::Int(0), |acc, value| arithmetic(BinaryOp::Add, &acc, value)),
            AggregateFn::Average => {
                if values.is_empty() {
                    return Ok(Value::Null);
                }
                let count = values.len();
                let total = values
                    .iter()
                    .try_fold(Value::Int(0), |acc, value| arithmetic(BinaryOp::Add, &acc, value))?;
                Ok(match total {
                    Value::Decimal(sum) => Value::Decimal(sum / Decimal::from(count)),
                    Value::Int(sum) => Value::Float(sum as f64 / count as f64),
                    Value::Float(sum) => Value::Float(sum / count as f64),
                    other => other,
                })
            }
            AggregateFn::Count => Ok(Value::Int(0)),
        }
    }

    fn expr(&self, expr: &Expr, env: &Env<'_>) -> Result<Value> {
        match expr {
            Expr::Member { var, member } => env
                .lookup(var, member)
                .cloned()
                .ok_or_else(|| QueryError::unknown_member(var.as_str(), member)),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Param(name) => match self.parameters.get(name) {
                Some(ParamValue::Scalar(value)) => Ok(value.clone()),
                _ => Err(QueryError::invalid(format!("parameter '{name}' is not bound"))),
            },
            Expr::Binary { op, left, right } if op.is_logical() => {
                let l = truth(&self.expr(left, env)?);
                match (op, l) {
                    (BinaryOp::And, Some(false)) => return Ok(Value::Bool(false)),
                    (BinaryOp::Or, Some(true)) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let r = truth(&self.expr(right, env)?);
                Ok(match (op, l, r) {
                    (BinaryOp::And, _, Some(false)) => Value::Bool(false),
                    (BinaryOp::Or, _, Some(true)) => Value::Bool(true),
                    (_, Some(_), Some(r)) => Value::Bool(r),
                    _ => Value::Null,
                })
            }
            Expr::Binary { op, left, right } if op.is_comparison() => {
                let l = self.expr(left, env)?;
                let r = self.expr(right, env)?;
                if self.is_null_constant(left) || self.is_null_constant(right) {
                    Ok(Value::Bool(null_test(*op, &l, &r)))
                } else if l.is_null() || r.is_null() {
                    Ok(Value::Null)
                } else {
                    compare(*op, &l, &r).map(Value::Bool)
                }
            }
            Expr::Binary { op, left, right } => {
                arithmetic(*op, &self.expr(left, env)?, &self.expr(right, env)?)
            }
            Expr::Not(inner) => Ok(match truth(&self.expr(inner, env)?) {
                Some(value) => Value::Bool(!value),
                None => Value::Null,
            }),
            Expr::Contains { haystack, needle } => {
                match (self.expr(haystack, env)?, self.expr(needle, env)?) {
                    (Value::String(h), Value::String(n)) => Ok(Value::Bool(h.contains(&n))),
                    (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                    (h, n) => Err(QueryError::invalid(format!(
                        "cannot search {} for {}",
                        h.kind(),
                        n.kind()
                    ))),
                }
            }
            Expr::InList { item, list } => {
                let item = self.expr(item, env)?;
                let values = match list {
                    ListSource::Literals(values) => values,
                    ListSource::Param(name) => match self.parameters.get(name) {
                        Some(ParamValue::List(values)) => values,
                        _ => {
                            return Err(QueryError::invalid(format!(
                                "list parameter '{name}' is not bound"
                            )))
                        }
                    },
                };
                if values.is_empty() {
                    return Ok(Value::Bool(false));
                }
                if item.is_null() {
                    return Ok(Value::Null);
                }
                let found = values
                    .iter()
                    .any(|value| !value.is_null() && item.compare(value) == Some(Ordering::Equal));
                if found {
                    Ok(Value::Bool(true))
                } else if values.iter().any(Value::is_null) {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Expr::DatePart { expr, part } => date_part(self.expr(expr, env)?, *part),
            Expr::Clock { .. } => Ok(Value::DateTimeOffset(OffsetDateTime::now_utc())),
            Expr::Cast { expr, ty } => cast(self.expr(expr, env)?, *ty),
        }
    }

    /// A `NULL` literal or a parameter bound to `NULL`, which the translator
    /// lowers to an `IS NULL` test rather than a three-valued comparison.
    fn is_null_constant(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Literal(value) => value.is_null(),
            Expr::Param(name) => matches!(
                self.parameters.get(name),
                Some(ParamValue::Scalar(Value::Null))
            ),
            _ => false,
        }
    }
}

/// Only `true` passes a filter or join condition.
fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// Truth value under three-valued logic; `None` is unknown.
fn truth(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Bool(v) => Some(*v),
        _ => Some(false),
    }
}

fn null_test(op: BinaryOp, l: &Value, r: &Value) -> bool {
    let both = l.is_null() && r.is_null();
    match op {
        BinaryOp::Eq => both,
        BinaryOp::Ne => !both,
        _ => false,
    }
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<bool> {
    let ord = l.compare(r).ok_or_else(|| {
        QueryError::invalid(format!("cannot compare {} with {}", l.kind(), r.kind()))
    })?;
    Ok(match op {
        BinaryOp::Eq => ord == Ordering::Equal,
        BinaryOp::Ne => ord != Ordering::Equal,
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::Le => ord != Ordering::Greater,
        BinaryOp::Gt => ord == Ordering::Greater,
        _ => ord != Ordering::Less,
    })
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let overflow = || QueryError::invalid(format!("integer overflow evaluating {l} {} {r}", op.token()));
    match (l, r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            _ => a.checked_mul(*b),
        }
        .map(Value::Int)
        .ok_or_else(overflow),
        (Value::Decimal(_) | Value::Int(_), Value::Decimal(_) | Value::Int(_)) => {
            let (a, b) = (as_decimal(l), as_decimal(r));
            match (a, b) {
                (Some(a), Some(b)) => match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    _ => a.checked_mul(b),
                }
                .map(Value::Decimal)
                .ok_or_else(overflow),
                _ => Err(overflow()),
            }
        }
        _ => match (as_float(l), as_float(r)) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                _ => a * b,
            })),
            _ => Err(QueryError::invalid(format!(
                "cannot apply {} to {} and {}",
                op.token(),
                l.kind(),
                r.kind()
            ))),
        },
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Decimal(d) => Some(*d),
        Value::Int(v) => Some(Decimal::from(*v)),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(v) => Some(*v),
        Value::Int(v) => Some(*v as f64),
        Value::Decimal(d) => d.to_f64(),
        _ => None,
    }
}

fn date_part(value: Value, part: DatePart) -> Result<Value> {
    let datetime = match value {
        Value::Null => return Ok(Value::Null),
        Value::DateTime(v) => v,
        Value::DateTimeOffset(v) => PrimitiveDateTime::new(v.date(), v.time()),
        other => {
            return Err(QueryError::invalid(format!(
                "cannot take {} of a {} value",
                part.name(),
                other.kind()
            )))
        }
    };
    Ok(match part {
        DatePart::Year => Value::Int(i64::from(datetime.year())),
        DatePart::Month => Value::Int(i64::from(u8::from(datetime.month()))),
        DatePart::Day => Value::Int(i64::from(datetime.day())),
        DatePart::DayOfYear => Value::Int(i64::from(datetime.ordinal())),
        DatePart::Hour => Value::Int(i64::from(datetime.hour())),
        DatePart::Minute => Value::Int(i64::from(datetime.minute())),
        DatePart::Second => Value::Int(i64::from(datetime.second())),
        DatePart::Millisecond => Value::Int(i64::from(datetime.millisecond())),
        DatePart::Date => Value::DateTime(PrimitiveDateTime::new(datetime.date(), Time::MIDNIGHT)),
    })
}

fn cast(value: Value, ty: DeclaredType) -> Result<Value> {
    let fail = |value: &Value| {
        QueryError::invalid(format!("cannot convert {} value {value} to {ty}", value.kind()))
    };
    match (ty, value) {
        (_, Value::Null) => Ok(Value::Null),
        (DeclaredType::Int32 | DeclaredType::Int64, Value::Int(v)) => Ok(Value::Int(v)),
        (DeclaredType::Int32 | DeclaredType::Int64, Value::Float(v)) => Ok(Value::Int(v.trunc() as i64)),
        (DeclaredType::Int32 | DeclaredType::Int64, Value::Decimal(d)) => {
            d.trunc().to_i64().map(Value::Int).ok_or_else(|| fail(&Value::Decimal(d)))
        }
        (DeclaredType::Float64, value) => as_float(&value).map(Value::Float).ok_or_else(|| fail(&value)),
        (DeclaredType::Decimal { .. }, Value::Float(v)) => {
            Decimal::try_from(v).map(Value::Decimal).map_err(|_| fail(&Value::Float(v)))
        }
        (DeclaredType::Decimal { .. }, value) => as_decimal(&value).map(Value::Decimal).ok_or_else(|| fail(&value)),
        (DeclaredType::String { .. }, Value::String(v)) => Ok(Value::String(v)),
        (DeclaredType::String { .. }, value @ (Value::Int(_) | Value::Float(_) | Value::Bool(_))) => {
            Ok(Value::String(value.to_string()))
        }
        (DeclaredType::DateTime, Value::DateTime(v)) => Ok(Value::DateTime(v)),
        (DeclaredType::DateTime, Value::DateTimeOffset(v)) => {
            Ok(Value::DateTime(PrimitiveDateTime::new(v.date(), v.time())))
        }
        (DeclaredType::DateTimeOffset, Value::DateTimeOffset(v)) => Ok(Value::DateTimeOffset(v)),
        (DeclaredType::DateTimeOffset, Value::DateTime(v)) => Ok(Value::DateTimeOffset(v.assume_utc())),
        (DeclaredType::Bool, Value::Bool(v)) => Ok(Value::Bool(v)),
        (DeclaredType::Bytes, Value::Bytes(v)) => Ok(Value::Bytes(v)),
        (_, value) => Err(fail(&value)),
    }
}
