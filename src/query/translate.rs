//! Lowering of validated IR into provider plans.
//!
//! Each IR node lowers into a select model (`Select`) whose fields form the
//! scope of the operator above it. Operators that cannot extend a model in
//! place (anything over a limit, non-trivial join inputs) wrap it as a
//! derived table first. Placeholders are emitted as unique tokens and
//! renumbered to `@p0..@pN` in textual order once the final text exists, so
//! the binding set always follows placeholder order.
//!
//! Capability gates fail with [`QueryError::TranslationFailed`] echoing the
//! whole lambda that contained the unsupported fragment.

use std::collections::BTreeSet;

use tracing::{debug, trace, warn};

use crate::query::{
    ast::{
        render_lambda_with, AggregateFn, BinaryOp, DatePart, Expr, JoinKind, ListSource, ParamValue,
        OperatorKind, Query, QueryNode, RawFragment, Var,
    },
    capability::CapabilityProfile,
    errors::QueryError,
    metadata::{DeclaredType, EntityShape, MetadataProvider},
    plan::{
        Command, ParamBinding, PlanWarning, ProjectionPick, ResultShape, ShapeColumn,
        TranslatedPlan,
    },
    Result, Value,
};

const TOKEN_MARK: char = '\u{1f}';

/// Naming options for generated text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslatorOptions {
    /// Prefix of table aliases (`t0`, `t1`, ...).
    pub alias_prefix: String,
    /// Prefix of parameter placeholders (`@p0`, `@p1`, ...).
    pub param_prefix: String,
}

impl Default for TranslatorOptions {
    fn default() -> Self {
        Self {
            alias_prefix: "t".into(),
            param_prefix: "@p".into(),
        }
    }
}

/// Lowers validated queries into [`TranslatedPlan`]s.
pub struct Translator<'a> {
    profile: &'a CapabilityProfile,
    metadata: &'a dyn MetadataProvider,
    options: &'a TranslatorOptions,
}

#[derive(Clone, Debug)]
struct Field {
    var: Var,
    name: String,
    sql: String,
    ty: DeclaredType,
    nullable: bool,
}

#[derive(Debug)]
struct Select {
    fields: Vec<Field>,
    from: String,
    filters: Vec<String>,
    order: Vec<String>,
    limit: Option<String>,
    aggregate: bool,
    simple: bool,
}

impl Select {
    fn over(from: String, fields: Vec<Field>) -> Self {
        Self {
            fields,
            from,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            aggregate: false,
            simple: true,
        }
    }

    fn is_trivial(&self) -> bool {
        self.simple
            && self.filters.is_empty()
            && self.order.is_empty()
            && self.limit.is_none()
            && !self.aggregate
    }

    fn render(&self, aliases: &[String]) -> String {
        let columns = self
            .fields
            .iter()
            .zip(aliases)
            .map(|(field, alias)| format!("{} AS {}", field.sql, quote(alias)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {columns} FROM {}", self.from);
        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filters.join(" AND "));
        }
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order.join(", "));
        }
        if let Some(limit) = &self.limit {
            sql.push_str(" LIMIT ");
            sql.push_str(limit);
        }
        sql
    }

    fn top_level_aliases(&self) -> Vec<String> {
        self.fields.iter().map(|field| field.name.clone()).collect()
    }

    fn derived_aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = Vec::with_capacity(self.fields.len());
        for (idx, field) in self.fields.iter().enumerate() {
            let alias = if aliases.iter().any(|seen| *seen == field.name) {
                format!("{}_{idx}", field.name)
            } else {
                field.name.clone()
            };
            aliases.push(alias);
        }
        aliases
    }
}

/// Variables and fields visible to an expression.
struct Scope<'s> {
    fields: &'s [Field],
    outer: &'s [Field],
}

impl Scope<'_> {
    fn lookup(&self, var: &Var, member: &str) -> Option<&Field> {
        self.fields
            .iter()
            .chain(self.outer.iter())
            .find(|field| field.var == *var && field.name == member)
    }

    fn vars(&self) -> Vec<Var> {
        let mut vars: Vec<Var> = Vec::new();
        for field in self.fields {
            if !vars.contains(&field.var) {
                vars.push(field.var.clone());
            }
        }
        vars
    }
}

#[derive(Debug)]
enum Operand {
    Member(String),
    StringLiteral(String),
    Null,
    Other,
}

#[derive(Debug)]
struct Lowered {
    sql: String,
    ty: Option<DeclaredType>,
    nullable: bool,
    operand: Operand,
}

impl Lowered {
    fn typed(sql: String, ty: DeclaredType, nullable: bool) -> Self {
        Self {
            sql,
            ty: Some(ty),
            nullable,
            operand: Operand::Other,
        }
    }

    fn is_null(&self) -> bool {
        matches!(self.operand, Operand::Null)
    }
}

enum LowerError {
    Untranslatable,
    Query(QueryError),
}

impl From<QueryError> for LowerError {
    fn from(err: QueryError) -> Self {
        LowerError::Query(err)
    }
}

type Lowering<T> = std::result::Result<T, LowerError>;

struct State<'q> {
    query: &'q Query,
    next_alias: usize,
    bindings: Vec<(Value, DeclaredType)>,
    warnings: Vec<PlanWarning>,
}

impl State<'_> {
    fn bind(&mut self, value: Value, ty: DeclaredType) -> String {
        let id = self.bindings.len();
        self.bindings.push((value, ty));
        format!("{TOKEN_MARK}{id}{TOKEN_MARK}")
    }

    /// Renumbers tokens in textual order and emits the binding set.
    fn finish(&self, text: &str, prefix: &str) -> Result<(String, Vec<ParamBinding>)> {
        let mut sql = String::with_capacity(text.len());
        let mut parameters = Vec::new();
        for (idx, part) in text.split(TOKEN_MARK).enumerate() {
            if idx % 2 == 0 {
                sql.push_str(part);
                continue;
            }
            let (value, ty) = part
                .parse::<usize>()
                .ok()
                .and_then(|id| self.bindings.get(id))
                .ok_or_else(|| QueryError::invalid("raw text contains a reserved control character"))?;
            let position = parameters.len();
            sql.push_str(prefix);
            sql.push_str(&position.to_string());
            parameters.push(ParamBinding {
                position,
                value: value.clone(),
                ty: *ty,
            });
        }
        Ok((sql, parameters))
    }
}

impl<'a> Translator<'a> {
    /// Creates a translator for one provider.
    pub fn new(
        profile: &'a CapabilityProfile,
        metadata: &'a dyn MetadataProvider,
        options: &'a TranslatorOptions,
    ) -> Self {
        Self {
            profile,
            metadata,
            options,
        }
    }

    /// Lowers a validated query.
    pub fn translate(&self, query: &Query) -> Result<TranslatedPlan> {
        let mut state = State {
            query,
            next_alias: 0,
            bindings: Vec::new(),
            warnings: Vec::new(),
        };
        let plan = match opaque_root(&query.root) {
            Some((raw, projections)) => self.translate_opaque(raw, &projections, &mut state)?,
            None => {
                let select = self.lower_node(&query.root, &[], &mut state)?;
                let text = select.render(&select.top_level_aliases());
                let (sql, parameters) = state.finish(&text, &self.options.param_prefix)?;
                let shape = ResultShape {
                    columns: select
                        .fields
                        .iter()
                        .map(|field| ShapeColumn {
                            var: field.var.clone(),
                            name: field.name.clone(),
                            column: field.name.clone(),
                            ty: field.ty,
                            nullable: field.nullable,
                        })
                        .collect(),
                    projection: None,
                    scalar: select.aggregate,
                };
                TranslatedPlan::new(
                    Command::Text { sql },
                    parameters,
                    shape,
                    std::mem::take(&mut state.warnings),
                )
            }
        };
        for warning in &plan.warnings {
            warn!(plan_hash = plan.plan_hash, %warning, "plan warning");
        }
        debug!(
            provider = self.profile.name(),
            plan_hash = plan.plan_hash,
            params = plan.parameters.len(),
            "query translated"
        );
        if let Some(sql) = plan.sql() {
            trace!(plan_hash = plan.plan_hash, sql, "generated text");
        }
        Ok(plan)
    }

    fn translate_opaque(
        &self,
        raw: &RawFragment,
        projections: &[&QueryNode],
        state: &mut State<'_>,
    ) -> Result<TranslatedPlan> {
        let shape = self.metadata.entity(&raw.entity)?;
        let columns: Vec<ShapeColumn> = shape
            .fields
            .iter()
            .map(|field| ShapeColumn {
                var: raw.var.clone(),
                name: field.name.clone(),
                column: field.column.clone(),
                ty: field.ty,
                nullable: field.nullable,
            })
            .collect();

        let mut picks: Option<Vec<ProjectionPick>> = None;
        for node in projections.iter().rev() {
            let QueryNode::Project { items, var, .. } = node else {
                continue;
            };
            let mut next = Vec::with_capacity(items.len());
            for item in items {
                let Expr::Member {
                    var: source,
                    member,
                } = &item.expr
                else {
                    return Err(QueryError::NonComposableSource {
                        command: raw.command.clone(),
                        operator: OperatorKind::Project,
                        repeated: false,
                    });
                };
                let index = match &picks {
                    None => columns
                        .iter()
                        .position(|col| col.var == *source && col.name == *member),
                    Some(previous) => previous
                        .iter()
                        .find(|pick| pick.var == *source && pick.alias == *member)
                        .map(|pick| pick.index),
                }
                .ok_or_else(|| QueryError::unknown_member(source.as_str(), member))?;
                next.push(ProjectionPick {
                    index,
                    var: var.clone(),
                    alias: item.alias.clone(),
                });
            }
            picks = Some(next);
        }

        let parameters = raw
            .parameters
            .iter()
            .enumerate()
            .map(|(position, value)| ParamBinding {
                position,
                value: value.clone(),
                ty: value_type(value, None),
            })
            .collect();
        Ok(TranslatedPlan::new(
            Command::Opaque {
                command: raw.command.clone(),
            },
            parameters,
            ResultShape {
                columns,
                projection: picks,
                scalar: false,
            },
            std::mem::take(&mut state.warnings),
        ))
    }

    fn next_alias(&self, state: &mut State<'_>) -> String {
        let alias = format!("{}{}", self.options.alias_prefix, state.next_alias);
        state.next_alias += 1;
        alias
    }

    fn wrap(&self, select: Select, state: &mut State<'_>) -> Select {
        let alias = self.next_alias(state);
        let aliases = select.derived_aliases();
        let inner = select.render(&aliases);
        let fields = select
            .fields
            .into_iter()
            .zip(aliases)
            .map(|(field, column)| Field {
                sql: format!("{alias}.{}", quote(&column)),
                ..field
            })
            .collect();
        Select::over(format!("({inner}) AS {alias}"), fields)
    }

    fn entity_fields(&self, shape: &EntityShape, var: &Var, alias: &str) -> Vec<Field> {
        shape
            .fields
            .iter()
            .map(|field| Field {
                var: var.clone(),
                name: field.name.clone(),
                sql: format!("{alias}.{}", quote(&field.column)),
                ty: field.ty,
                nullable: field.nullable,
            })
            .collect()
    }

    fn lower_node(&self, node: &QueryNode, outer: &[Field], state: &mut State<'_>) -> Result<Select> {
        match node {
            QueryNode::Source { entity, var } => {
                let shape = self.metadata.entity(entity)?;
                let alias = self.next_alias(state);
                let fields = self.entity_fields(&shape, var, &alias);
                Ok(Select::over(
                    format!("{} AS {alias}", quote(&shape.table)),
                    fields,
                ))
            }
            QueryNode::RawFragment(raw) => {
                if !raw.composable {
                    return Err(QueryError::invalid(format!(
                        "opaque command '{}' cannot be lowered into relational text",
                        raw.command
                    )));
                }
                let shape = self.metadata.entity(&raw.entity)?;
                let text = substitute_placeholders(raw, state)?;
                let alias = self.next_alias(state);
                let fields = self.entity_fields(&shape, &raw.var, &alias);
                Ok(Select::over(format!("({text}) AS {alias}"), fields))
            }
            QueryNode::Filter { input, predicate } => {
                let mut select = self.lower_node(input, outer, state)?;
                if select.limit.is_some() {
                    select = self.wrap(select, state);
                }
                let scope = Scope {
                    fields: &select.fields,
                    outer,
                };
                let lowered = self.lower_lambda(&scope, predicate, state)?;
                if lowered.ty != Some(DeclaredType::Bool) {
                    return Err(QueryError::invalid(format!(
                        "filter predicate '{predicate}' is not boolean"
                    )));
                }
                select.filters.push(lowered.sql);
                Ok(select)
            }
            QueryNode::Project { input, items, var } => {
                let mut select = self.lower_node(input, outer, state)?;
                let scope = Scope {
                    fields: &select.fields,
                    outer,
                };
                let mut fields = Vec::with_capacity(items.len());
                for item in items {
                    let lowered = self.lower_lambda(&scope, &item.expr, state)?;
                    let Some(ty) = lowered.ty else {
                        return Err(QueryError::invalid(format!(
                            "projected member '{}' has no type",
                            item.alias
                        )));
                    };
                    fields.push(Field {
                        var: var.clone(),
                        name: item.alias.clone(),
                        sql: lowered.sql,
                        ty,
                        nullable: lowered.nullable,
                    });
                }
                select.fields = fields;
                Ok(select)
            }
            QueryNode::OrderBy { input, keys } => {
                let mut select = self.lower_node(input, outer, state)?;
                if select.limit.is_some() {
                    select = self.wrap(select, state);
                }
                let scope = Scope {
                    fields: &select.fields,
                    outer,
                };
                let mut order = Vec::with_capacity(keys.len());
                for key in keys {
                    let lowered = self.lower_lambda(&scope, &key.expr, state)?;
                    let direction = if key.descending { "DESC" } else { "ASC" };
                    order.push(format!("{} {direction}", lowered.sql));
                }
                select.order = order;
                Ok(select)
            }
            QueryNode::Take { input, count } => {
                let mut select = self.lower_node(input, outer, state)?;
                if select.limit.is_some() {
                    select = self.wrap(select, state);
                }
                let (_, max) = self.profile.integer_range();
                let count = i64::try_from(*count)
                    .ok()
                    .filter(|count| *count <= max)
                    .ok_or_else(|| QueryError::translation_failed(format!("Take({count})")))?;
                select.limit = Some(state.bind(Value::Int(count), DeclaredType::Int64));
                Ok(select)
            }
            QueryNode::Join {
                left,
                right,
                kind,
                on,
            } => self.lower_join(left, right, *kind, on.as_ref(), outer, state),
            QueryNode::Aggregate { input, func, arg } => {
                let mut select = self.lower_node(input, outer, state)?;
                if select.limit.is_some() {
                    select = self.wrap(select, state);
                }
                select.order.clear();
                let field = self.lower_aggregate(&select, *func, arg.as_ref(), outer, state)?;
                select.fields = vec![field];
                select.aggregate = true;
                Ok(select)
            }
        }
    }

    fn lower_join(
        &self,
        left: &QueryNode,
        right: &QueryNode,
        kind: JoinKind,
        on: Option<&Expr>,
        outer: &[Field],
        state: &mut State<'_>,
    ) -> Result<Select> {
        let mut select = self.lower_node(left, outer, state)?;
        if select.limit.is_some() || select.aggregate {
            select = self.wrap(select, state);
        }

        let left_vars: Vec<Var> = left.bound_vars();
        let mut referenced = BTreeSet::new();
        right.referenced_vars(&mut referenced);
        let dependent = left_vars.iter().any(|var| referenced.contains(var));

        let right_select = if dependent {
            let mut visible = select.fields.clone();
            visible.extend(outer.iter().cloned());
            let inner = self.lower_node(right, &visible, state)?;
            self.wrap(inner, state)
        } else {
            let inner = self.lower_node(right, outer, state)?;
            if inner.is_trivial() {
                inner
            } else {
                self.wrap(inner, state)
            }
        };

        let nullable_right = kind == JoinKind::LeftOuter;
        let right_fields: Vec<Field> = right_select
            .fields
            .iter()
            .cloned()
            .map(|field| Field {
                nullable: field.nullable || nullable_right,
                ..field
            })
            .collect();
        let mut combined = select.fields.clone();
        combined.extend(right_fields.iter().cloned());

        let condition = match on {
            Some(expr) => {
                let scope = Scope {
                    fields: &combined,
                    outer,
                };
                let lowered = self.lower_lambda(&scope, expr, state)?;
                if lowered.ty != Some(DeclaredType::Bool) {
                    return Err(QueryError::invalid(format!(
                        "join condition '{expr}' is not boolean"
                    )));
                }
                Some(lowered.sql)
            }
            None => None,
        };

        let clause = if dependent {
            match (kind, condition) {
                (JoinKind::LeftOuter, Some(_)) => {
                    return Err(QueryError::invalid(
                        "a correlated left join cannot carry a join condition",
                    ));
                }
                (JoinKind::LeftOuter, None) => format!("OUTER APPLY {}", right_select.from),
                (_, condition) => {
                    if let Some(condition) = condition {
                        select.filters.push(condition);
                    }
                    format!("CROSS APPLY {}", right_select.from)
                }
            }
        } else {
            match (kind, condition) {
                (JoinKind::LeftOuter, condition) => format!(
                    "LEFT JOIN {} ON {}",
                    right_select.from,
                    condition.unwrap_or_else(|| "1 = 1".into())
                ),
                (_, Some(condition)) => {
                    format!("INNER JOIN {} ON {condition}", right_select.from)
                }
                (_, None) => format!("CROSS JOIN {}", right_select.from),
            }
        };
        select.from = format!("{} {clause}", select.from);
        select.fields = combined;
        select.simple = false;
        Ok(select)
    }

    fn lower_aggregate(
        &self,
        select: &Select,
        func: AggregateFn,
        arg: Option<&Expr>,
        outer: &[Field],
        state: &mut State<'_>,
    ) -> Result<Field> {
        let name = func.name().to_owned();
        let (sql, ty, nullable) = match (func, arg) {
            (AggregateFn::Count, _) => ("COUNT(*)".to_owned(), DeclaredType::Int64, false),
            (_, None) => return Err(QueryError::invalid(format!("{name} requires an argument"))),
            (_, Some(arg)) => {
                let scope = Scope {
                    fields: &select.fields,
                    outer,
                };
                let ordered = matches!(func, AggregateFn::Min | AggregateFn::Max);
                let lowered = self.with_lambda(&scope, arg, |this| {
                    let lowered = this.lower_expr(&scope, arg, None, state)?;
                    if ordered {
                        this.check_comparable(lowered.ty)?;
                    }
                    Ok(lowered)
                })?;
                let ty = match lowered.ty {
                    Some(ty) if ty.is_numeric() || ordered => ty,
                    _ => {
                        return Err(QueryError::invalid(format!(
                            "{name} over '{arg}' needs a numeric argument"
                        )))
                    }
                };
                match func {
                    AggregateFn::Sum => (
                        format!("COALESCE(SUM({}), 0)", lowered.sql),
                        match ty {
                            DeclaredType::Int32 | DeclaredType::Int64 => DeclaredType::Int64,
                            other => other,
                        },
                        false,
                    ),
                    AggregateFn::Average => (
                        format!("AVG({})", lowered.sql),
                        match ty {
                            DeclaredType::Decimal { .. } => ty,
                            _ => DeclaredType::Float64,
                        },
                        true,
                    ),
                    _ => (
                        format!("{}({})", name.to_uppercase(), lowered.sql),
                        ty,
                        true,
                    ),
                }
            }
        };
        Ok(Field {
            var: Var::new(""),
            name,
            sql,
            ty,
            nullable,
        })
    }

    fn lower_lambda(&self, scope: &Scope<'_>, expr: &Expr, state: &mut State<'_>) -> Result<Lowered> {
        self.with_lambda(scope, expr, |this| this.lower_expr(scope, expr, None, state))
    }

    fn with_lambda<T, F>(&self, scope: &Scope<'_>, expr: &Expr, lower: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Lowering<T>,
    {
        match lower(self) {
            Ok(value) => Ok(value),
            Err(LowerError::Untranslatable) => {
                let members =
                    |var: &Var, member: &str| scope.lookup(var, member).map(|field| field.ty);
                Err(QueryError::translation_failed(render_lambda_with(
                    &scope.vars(),
                    expr,
                    &members,
                )))
            }
            Err(LowerError::Query(err)) => Err(err),
        }
    }

    fn check_comparable(&self, ty: Option<DeclaredType>) -> Lowering<()> {
        let Some(ty) = ty else {
            return Ok(());
        };
        let supported = match ty {
            DeclaredType::Decimal { .. } => self.profile.supports_decimal_comparisons(),
            DeclaredType::String {
                max_length: None, ..
            } => self.profile.supports_large_string_comparisons(),
            DeclaredType::Bytes => self.profile.supports_binary_keys(),
            DeclaredType::DateTimeOffset => self.profile.supports_date_time_offset(),
            _ => true,
        };
        if supported {
            Ok(())
        } else {
            Err(LowerError::Untranslatable)
        }
    }

    fn check_integer(&self, value: i64) -> Lowering<()> {
        let (min, max) = self.profile.integer_range();
        if value < min || value > max {
            Err(LowerError::Untranslatable)
        } else {
            Ok(())
        }
    }

    /// Rejects `operand op constant` when the result can leave the provider's
    /// integer range. The operand is bounded by its declared type.
    fn check_integer_arithmetic(
        &self,
        op: BinaryOp,
        operand: Option<DeclaredType>,
        constant: i64,
        constant_first: bool,
    ) -> Lowering<()> {
        let (min, max) = self.profile.integer_range();
        if (min, max) == (i64::MIN, i64::MAX) {
            return Ok(());
        }
        let (ty_min, ty_max) = match operand {
            Some(DeclaredType::Int32) => (i64::from(i32::MIN), i64::from(i32::MAX)),
            Some(DeclaredType::Int64) => (i64::MIN, i64::MAX),
            _ => return Ok(()),
        };
        let (lo, hi) = (i128::from(ty_min.max(min)), i128::from(ty_max.min(max)));
        let c = i128::from(constant);
        let (low, high) = match (op, constant_first) {
            (BinaryOp::Add, _) => (lo + c, hi + c),
            (BinaryOp::Sub, false) => (lo - c, hi - c),
            (BinaryOp::Sub, true) => (c - hi, c - lo),
            _ => ((lo * c).min(hi * c), (lo * c).max(hi * c)),
        };
        if low < i128::from(min) || high > i128::from(max) {
            trace!(op = op.token(), constant, "integer arithmetic exceeds provider precision");
            Err(LowerError::Untranslatable)
        } else {
            Ok(())
        }
    }

    fn lower_expr(
        &self,
        scope: &Scope<'_>,
        expr: &Expr,
        hint: Option<DeclaredType>,
        state: &mut State<'_>,
    ) -> Lowering<Lowered> {
        match expr {
            Expr::Member { var, member } => {
                let field = scope
                    .lookup(var, member)
                    .ok_or_else(|| QueryError::unknown_member(var.as_str(), member))?;
                Ok(Lowered {
                    sql: field.sql.clone(),
                    ty: Some(field.ty),
                    nullable: field.nullable,
                    operand: Operand::Member(field.name.clone()),
                })
            }
            Expr::Literal(value) => self.lower_value(value, hint, true, state),
            Expr::Param(name) => match state.query.parameters.get(name) {
                Some(ParamValue::Scalar(value)) => {
                    let value = value.clone();
                    self.lower_value(&value, hint, false, state)
                }
                _ => Err(LowerError::Untranslatable),
            },
            Expr::Binary { op, left, right } if op.is_comparison() => {
                self.lower_comparison(scope, *op, left, right, state)
            }
            Expr::Binary { op, left, right } if op.is_logical() => {
                let l = self.lower_expr(scope, left, None, state)?;
                let r = self.lower_expr(scope, right, None, state)?;
                let keyword = if *op == BinaryOp::And { "AND" } else { "OR" };
                Ok(Lowered::typed(
                    format!("({} {keyword} {})", l.sql, r.sql),
                    DeclaredType::Bool,
                    false,
                ))
            }
            Expr::Binary { op, left, right } => {
                match fold_integer(expr) {
                    Some(Some(value)) => {
                        self.check_integer(value)?;
                        return Ok(Lowered::typed(
                            value.to_string(),
                            integer_type(value, hint),
                            false,
                        ));
                    }
                    Some(None) => return Err(LowerError::Untranslatable),
                    None => {}
                }
                let l = self.lower_expr(scope, left, None, state)?;
                let r = self.lower_expr(scope, right, l.ty, state)?;
                let ty = match (l.ty, r.ty) {
                    (Some(a), Some(b)) if a.is_numeric() && b.is_numeric() => wider(a, b),
                    _ => return Err(LowerError::Untranslatable),
                };
                match (constant_integer(left, state), constant_integer(right, state)) {
                    (Some(c), None) => self.check_integer_arithmetic(*op, r.ty, c, true)?,
                    (None, Some(c)) => self.check_integer_arithmetic(*op, l.ty, c, false)?,
                    _ => {}
                }
                Ok(Lowered::typed(
                    format!("({} {} {})", l.sql, arithmetic_token(*op), r.sql),
                    ty,
                    l.nullable || r.nullable,
                ))
            }
            Expr::Not(inner) => {
                let inner = self.lower_expr(scope, inner, None, state)?;
                Ok(Lowered::typed(
                    format!("NOT ({})", inner.sql),
                    DeclaredType::Bool,
                    inner.nullable,
                ))
            }
            Expr::Contains { haystack, needle } => {
                let h = self.lower_expr(scope, haystack, None, state)?;
                let n = self.lower_expr(scope, needle, h.ty, state)?;
                for side in [&h, &n] {
                    if !matches!(side.ty, Some(DeclaredType::String { .. }) | None) {
                        return Err(LowerError::Untranslatable);
                    }
                }
                self.note_ansi_literal(&h, &n, state);
                Ok(Lowered::typed(
                    format!("(instr({}, {}) > 0)", h.sql, n.sql),
                    DeclaredType::Bool,
                    false,
                ))
            }
            Expr::InList { item, list } => {
                let item = self.lower_expr(scope, item, None, state)?;
                self.check_comparable(item.ty)?;
                let values = match list {
                    ListSource::Literals(values) => values.clone(),
                    ListSource::Param(name) => match state.query.parameters.get(name) {
                        Some(ParamValue::List(values)) => values.clone(),
                        _ => return Err(LowerError::Untranslatable),
                    },
                };
                if values.is_empty() {
                    return Ok(Lowered::typed("(1 = 0)".into(), DeclaredType::Bool, false));
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for value in &values {
                    let lowered = self.lower_value(value, item.ty, false, state)?;
                    self.note_ansi_literal(&item, &lowered, state);
                    placeholders.push(lowered.sql);
                }
                Ok(Lowered::typed(
                    format!("({} IN ({}))", item.sql, placeholders.join(", ")),
                    DeclaredType::Bool,
                    false,
                ))
            }
            Expr::DatePart { expr, part } => {
                let inner = self.lower_expr(scope, expr, None, state)?;
                match inner.ty {
                    Some(DeclaredType::DateTime) => {}
                    Some(DeclaredType::DateTimeOffset)
                        if self.profile.supports_date_time_offset() => {}
                    _ => return Err(LowerError::Untranslatable),
                }
                let (sql, ty) = date_part_sql(&inner.sql, *part);
                Ok(Lowered::typed(sql, ty, inner.nullable))
            }
            Expr::Clock { utc } => {
                if !self.profile.supports_date_time_offset() {
                    return Err(LowerError::Untranslatable);
                }
                let sql = if *utc {
                    "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')"
                } else {
                    "strftime('%Y-%m-%dT%H:%M:%f', 'now', 'localtime')"
                };
                Ok(Lowered::typed(sql.into(), DeclaredType::DateTimeOffset, false))
            }
            Expr::Cast { expr, ty } => {
                if *ty == DeclaredType::DateTimeOffset && !self.profile.supports_date_time_offset()
                {
                    return Err(LowerError::Untranslatable);
                }
                let inner = self.lower_expr(scope, expr, None, state)?;
                let sql = match ty {
                    DeclaredType::DateTime => format!("datetime({})", inner.sql),
                    other => format!("CAST({} AS {})", inner.sql, other.type_name()),
                };
                Ok(Lowered::typed(sql, *ty, inner.nullable))
            }
        }
    }

    fn lower_comparison(
        &self,
        scope: &Scope<'_>,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        state: &mut State<'_>,
    ) -> Lowering<Lowered> {
        let (l, r) = if is_constant(left) && !is_constant(right) {
            let r = self.lower_expr(scope, right, None, state)?;
            let l = self.lower_expr(scope, left, r.ty, state)?;
            (l, r)
        } else {
            let l = self.lower_expr(scope, left, None, state)?;
            let r = self.lower_expr(scope, right, l.ty, state)?;
            (l, r)
        };

        if l.is_null() || r.is_null() {
            return self.lower_null_comparison(op, &l, &r, state);
        }

        self.check_comparable(l.ty)?;
        self.check_comparable(r.ty)?;
        self.note_ansi_literal(&l, &r, state);

        let (mut left_sql, mut right_sql) = (l.sql, r.sql);
        if let (Some(a), Some(b)) = (l.ty, r.ty) {
            if self.profile.strict_equality() {
                match (a.numeric_rank(), b.numeric_rank()) {
                    (Some(ra), Some(rb)) if ra < rb => {
                        left_sql = format!("CAST({left_sql} AS {})", b.type_name());
                    }
                    (Some(ra), Some(rb)) if rb < ra => {
                        right_sql = format!("CAST({right_sql} AS {})", a.type_name());
                    }
                    _ => {}
                }
            }
        }
        Ok(Lowered::typed(
            format!("({left_sql} {} {right_sql})", comparison_token(op)),
            DeclaredType::Bool,
            false,
        ))
    }

    fn lower_null_comparison(
        &self,
        op: BinaryOp,
        l: &Lowered,
        r: &Lowered,
        state: &mut State<'_>,
    ) -> Lowering<Lowered> {
        let other = if l.is_null() { r } else { l };
        if other.is_null() {
            let sql = if op == BinaryOp::Eq { "(1 = 1)" } else { "(1 = 0)" };
            return Ok(Lowered::typed(sql.into(), DeclaredType::Bool, false));
        }
        let sql = match (op, other.ty) {
            (BinaryOp::Eq | BinaryOp::Ne, Some(ty)) if ty.is_temporal() => {
                self.check_comparable(Some(ty))?;
                let sentinel = self.profile.default_date_time();
                let value = match ty {
                    DeclaredType::DateTimeOffset => Value::DateTimeOffset(sentinel.assume_utc()),
                    _ => Value::DateTime(sentinel),
                };
                let token = state.bind(value, ty);
                if op == BinaryOp::Eq {
                    format!("({0} IS NULL OR {0} = {token})", other.sql)
                } else {
                    format!("({0} IS NOT NULL AND {0} <> {token})", other.sql)
                }
            }
            (BinaryOp::Eq, _) => format!("({} IS NULL)", other.sql),
            (BinaryOp::Ne, _) => format!("({} IS NOT NULL)", other.sql),
            _ => "(1 = 0)".into(),
        };
        Ok(Lowered::typed(sql, DeclaredType::Bool, false))
    }

    fn lower_value(
        &self,
        value: &Value,
        hint: Option<DeclaredType>,
        inline: bool,
        state: &mut State<'_>,
    ) -> Lowering<Lowered> {
        let hint = hint.map(|ty| match ty {
            DeclaredType::String {
                ansi: true,
                max_length,
            } if !self.profile.supports_ansi() => DeclaredType::String {
                ansi: false,
                max_length,
            },
            other => other,
        });
        let ty = value_type(value, hint);
        let operand = match value {
            Value::Null => {
                return Ok(Lowered {
                    sql: "NULL".into(),
                    ty: None,
                    nullable: true,
                    operand: Operand::Null,
                })
            }
            Value::String(text) => Operand::StringLiteral(text.clone()),
            _ => Operand::Other,
        };
        let sql = match value {
            Value::Int(v) => {
                self.check_integer(*v)?;
                if inline {
                    v.to_string()
                } else {
                    state.bind(value.clone(), ty)
                }
            }
            Value::Bool(v) if inline => (if *v { "1" } else { "0" }).to_owned(),
            Value::DateTimeOffset(_) if !self.profile.supports_date_time_offset() => {
                return Err(LowerError::Untranslatable)
            }
            _ => state.bind(value.clone(), ty),
        };
        Ok(Lowered {
            sql,
            ty: Some(ty),
            nullable: false,
            operand,
        })
    }

    fn note_ansi_literal(&self, a: &Lowered, b: &Lowered, state: &mut State<'_>) {
        for (member, literal) in [(a, b), (b, a)] {
            let (Operand::Member(name), Operand::StringLiteral(text)) = (&member.operand, &literal.operand)
            else {
                continue;
            };
            if matches!(member.ty, Some(DeclaredType::String { ansi: true, .. })) && !text.is_ascii() {
                state.warnings.push(PlanWarning::AnsiLiteral {
                    member: name.clone(),
                    literal: text.clone(),
                });
            }
        }
    }
}

/// Finds an opaque source at the root, possibly under member picks.
fn opaque_root(node: &QueryNode) -> Option<(&RawFragment, Vec<&QueryNode>)> {
    let mut projections = Vec::new();
    let mut current = node;
    loop {
        match current {
            QueryNode::RawFragment(raw) if !raw.composable => return Some((raw, projections)),
            QueryNode::Project { input, .. } => {
                projections.push(current);
                current = input;
            }
            _ => return None,
        }
    }
}

fn substitute_placeholders(raw: &RawFragment, state: &mut State<'_>) -> Result<String> {
    let text = &raw.command;
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let Some(end) = tail.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        match tail[..end].parse::<usize>() {
            Ok(index) => {
                let value = raw.parameters.get(index).ok_or_else(|| {
                    QueryError::invalid(format!(
                        "raw text references placeholder {{{index}}} but only {} parameters were supplied",
                        raw.parameters.len()
                    ))
                })?;
                let ty = value_type(value, None);
                out.push_str(&state.bind(value.clone(), ty));
            }
            Err(_) => {
                out.push('{');
                out.push_str(&tail[..=end]);
            }
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Folds integer-only arithmetic. `Some(None)` marks an overflow.
fn fold_integer(expr: &Expr) -> Option<Option<i64>> {
    match expr {
        Expr::Literal(Value::Int(v)) => Some(Some(*v)),
        Expr::Binary { op, left, right } if op.is_arithmetic() => {
            let l = fold_integer(left)?;
            let r = fold_integer(right)?;
            Some(match (l, r) {
                (Some(l), Some(r)) => match op {
                    BinaryOp::Add => l.checked_add(r),
                    BinaryOp::Sub => l.checked_sub(r),
                    _ => l.checked_mul(r),
                },
                _ => None,
            })
        }
        _ => None,
    }
}

/// Integer value of a literal, folded literal arithmetic, or bound parameter.
fn constant_integer(expr: &Expr, state: &State<'_>) -> Option<i64> {
    match expr {
        Expr::Param(name) => match state.query.parameters.get(name) {
            Some(ParamValue::Scalar(Value::Int(v))) => Some(*v),
            _ => None,
        },
        _ => fold_integer(expr).flatten(),
    }
}

fn is_constant(expr: &Expr) -> bool {
    matches!(expr, Expr::Literal(_) | Expr::Param(_))
}

fn integer_type(value: i64, hint: Option<DeclaredType>) -> DeclaredType {
    match hint {
        Some(ty @ (DeclaredType::Int32 | DeclaredType::Int64)) => ty,
        _ if i32::try_from(value).is_ok() => DeclaredType::Int32,
        _ => DeclaredType::Int64,
    }
}

/// Declared type of a bound value, adopting the partner's string flavour.
fn value_type(value: &Value, hint: Option<DeclaredType>) -> DeclaredType {
    match value {
        Value::Null => hint.unwrap_or(DeclaredType::text()),
        Value::Bool(_) => DeclaredType::Bool,
        Value::Int(v) => integer_type(*v, hint),
        Value::Float(_) => DeclaredType::Float64,
        Value::Decimal(d) => DeclaredType::Decimal { scale: d.scale() },
        Value::String(text) => match hint {
            Some(ty @ DeclaredType::String { .. }) => ty,
            _ => DeclaredType::unicode(u32::try_from(text.chars().count()).unwrap_or(u32::MAX).max(1)),
        },
        Value::Bytes(_) => DeclaredType::Bytes,
        Value::DateTime(_) => DeclaredType::DateTime,
        Value::DateTimeOffset(_) => DeclaredType::DateTimeOffset,
    }
}

fn wider(a: DeclaredType, b: DeclaredType) -> DeclaredType {
    match (a.numeric_rank(), b.numeric_rank()) {
        (Some(ra), Some(rb)) if rb > ra => b,
        _ => a,
    }
}

fn comparison_token(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "<>",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        _ => ">=",
    }
}

fn arithmetic_token(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        _ => "*",
    }
}

fn date_part_sql(operand: &str, part: DatePart) -> (String, DeclaredType) {
    let component = |format: &str| format!("CAST(strftime('{format}', {operand}) AS INTEGER)");
    let sql = match part {
        DatePart::Year => component("%Y"),
        DatePart::Month => component("%m"),
        DatePart::Day => component("%d"),
        DatePart::DayOfYear => component("%j"),
        DatePart::Hour => component("%H"),
        DatePart::Minute => component("%M"),
        DatePart::Second => component("%S"),
        DatePart::Millisecond => {
            format!("(CAST(strftime('%f', {operand}) * 1000 AS INTEGER) % 1000)")
        }
        DatePart::Date => return (format!("datetime(date({operand}))"), DeclaredType::DateTime),
    };
    (sql, DeclaredType::Int32)
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
