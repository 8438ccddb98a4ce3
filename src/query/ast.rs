//! Provider-agnostic query expression IR.
//!
//! A [`Query`] owns a tree of [`QueryNode`]s; every non-leaf node owns its
//! children exclusively. Leaves are either entity sources or raw fragments
//! carrying an explicit `composable` tag, so composability is decided by the
//! tag alone and never by inspecting command text.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::query::metadata::DeclaredType;
use crate::query::Value;

/// Identifier bound by a source or projection (the lambda parameter).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct Var(pub String);

impl Var {
    /// Creates a variable from any string-like name.
    pub fn new(name: impl Into<String>) -> Self {
        Var(name.into())
    }

    /// Returns the variable name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Var {
    fn from(value: &str) -> Self {
        Var(value.to_owned())
    }
}

/// Relational operators that can be layered over a source.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OperatorKind {
    /// Row filter.
    Filter,
    /// Projection.
    Project,
    /// Ordering.
    OrderBy,
    /// Row limit.
    Take,
    /// Two-source combination.
    Join,
    /// Scalar aggregate.
    Aggregate,
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperatorKind::Filter => "Filter",
            OperatorKind::Project => "Project",
            OperatorKind::OrderBy => "OrderBy",
            OperatorKind::Take => "Take",
            OperatorKind::Join => "Join",
            OperatorKind::Aggregate => "Aggregate",
        })
    }
}

/// Binary operators available in expressions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BinaryOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
}

impl BinaryOp {
    /// Source-level token.
    pub fn token(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
        }
    }

    /// Returns `true` for the six comparison operators.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Returns `true` for `&&` and `||`.
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Returns `true` for arithmetic operators.
    pub fn is_arithmetic(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul)
    }

    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul => 6,
        }
    }
}

/// Temporal components that can be extracted from a date-time member.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DatePart {
    /// Calendar year.
    Year,
    /// Month of year.
    Month,
    /// Day of month.
    Day,
    /// Day of year.
    DayOfYear,
    /// Hour of day.
    Hour,
    /// Minute of hour.
    Minute,
    /// Second of minute.
    Second,
    /// Millisecond of second.
    Millisecond,
    /// Date with the time truncated.
    Date,
}

impl DatePart {
    /// Member name used when rendering.
    pub fn name(self) -> &'static str {
        match self {
            DatePart::Year => "Year",
            DatePart::Month => "Month",
            DatePart::Day => "Day",
            DatePart::DayOfYear => "DayOfYear",
            DatePart::Hour => "Hour",
            DatePart::Minute => "Minute",
            DatePart::Second => "Second",
            DatePart::Millisecond => "Millisecond",
            DatePart::Date => "Date",
        }
    }
}

/// Source of an `InList` membership test.
#[derive(Clone, Debug, PartialEq)]
pub enum ListSource {
    /// Inline literal values.
    Literals(Vec<Value>),
    /// Captured list parameter.
    Param(String),
}

/// Expression tree used by predicates, projections, keys, and aggregates.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Member of a bound variable (`m.UnitPrice`).
    Member {
        /// Binding that owns the member.
        var: Var,
        /// Member name.
        member: String,
    },
    /// Inline constant.
    Literal(Value),
    /// Captured parameter resolved from [`Query::parameters`].
    Param(String),
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Logical negation.
    Not(Box<Expr>),
    /// String containment (`haystack.Contains(needle)`).
    Contains {
        /// String searched.
        haystack: Box<Expr>,
        /// Substring searched for.
        needle: Box<Expr>,
    },
    /// Membership in a list.
    InList {
        /// Value tested.
        item: Box<Expr>,
        /// Candidate values.
        list: ListSource,
    },
    /// Temporal component extraction.
    DatePart {
        /// Temporal operand.
        expr: Box<Expr>,
        /// Extracted component.
        part: DatePart,
    },
    /// Current offset-aware time on the server.
    Clock {
        /// `UtcNow` instead of `Now`.
        utc: bool,
    },
    /// Explicit conversion.
    Cast {
        /// Converted operand.
        expr: Box<Expr>,
        /// Target type.
        ty: DeclaredType,
    },
}

impl Expr {
    /// Member reference.
    pub fn member(var: impl Into<String>, member: impl Into<String>) -> Self {
        Expr::Member {
            var: Var(var.into()),
            member: member.into(),
        }
    }

    /// Literal constant.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Captured parameter reference.
    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    /// Server clock (`DateTimeOffset.Now`).
    pub fn now() -> Self {
        Expr::Clock { utc: false }
    }

    /// Server clock in UTC (`DateTimeOffset.UtcNow`).
    pub fn utc_now() -> Self {
        Expr::Clock { utc: true }
    }

    /// Builds a binary node.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `self == other`
    pub fn eq(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Eq, self, other)
    }

    /// `self != other`
    pub fn ne(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Ne, self, other)
    }

    /// `self < other`
    pub fn lt(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Lt, self, other)
    }

    /// `self <= other`
    pub fn le(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Le, self, other)
    }

    /// `self > other`
    pub fn gt(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Gt, self, other)
    }

    /// `self >= other`
    pub fn ge(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Ge, self, other)
    }

    /// `self && other`
    pub fn and(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::And, self, other)
    }

    /// `self || other`
    pub fn or(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Or, self, other)
    }

    /// `self + other`
    pub fn add(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Add, self, other)
    }

    /// `self - other`
    pub fn sub(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Sub, self, other)
    }

    /// `self * other`
    pub fn mul(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Mul, self, other)
    }

    /// `!self`
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// `self.Contains(needle)`
    pub fn contains(self, needle: Expr) -> Self {
        Expr::Contains {
            haystack: Box::new(self),
            needle: Box::new(needle),
        }
    }

    /// Membership of `self` in a literal list.
    pub fn in_list<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::InList {
            item: Box::new(self),
            list: ListSource::Literals(values.into_iter().map(Into::into).collect()),
        }
    }

    /// Membership of `self` in a captured list parameter.
    pub fn in_param(self, name: impl Into<String>) -> Self {
        Expr::InList {
            item: Box::new(self),
            list: ListSource::Param(name.into()),
        }
    }

    /// `self.<part>`
    pub fn part(self, part: DatePart) -> Self {
        Expr::DatePart {
            expr: Box::new(self),
            part,
        }
    }

    /// `(ty)self`
    pub fn cast(self, ty: DeclaredType) -> Self {
        Expr::Cast {
            expr: Box::new(self),
            ty,
        }
    }

    /// Collects every variable the expression references.
    pub fn referenced_vars(&self, out: &mut BTreeSet<Var>) {
        match self {
            Expr::Member { var, .. } => {
                out.insert(var.clone());
            }
            Expr::Literal(_) | Expr::Param(_) | Expr::Clock { .. } => {}
            Expr::Binary { left, right, .. } => {
                left.referenced_vars(out);
                right.referenced_vars(out);
            }
            Expr::Not(inner) => inner.referenced_vars(out),
            Expr::Contains { haystack, needle } => {
                haystack.referenced_vars(out);
                needle.referenced_vars(out);
            }
            Expr::InList { item, .. } => item.referenced_vars(out),
            Expr::DatePart { expr, .. } | Expr::Cast { expr, .. } => expr.referenced_vars(out),
        }
    }

    /// Returns `true` when the expression is a bare member reference.
    pub fn is_member(&self) -> bool {
        matches!(self, Expr::Member { .. })
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            _ => u8::MAX,
        }
    }
}

/// Renders the expression in the form echoed by translation failures.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let echo = Echo {
            expr: self,
            members: &untyped,
        };
        fmt::Display::fmt(&echo, f)
    }
}

/// Declared type of a member, as seen where the expression is bound.
pub type MemberTypes<'a> = dyn Fn(&Var, &str) -> Option<DeclaredType> + 'a;

fn untyped(_: &Var, _: &str) -> Option<DeclaredType> {
    None
}

struct Echo<'a> {
    expr: &'a Expr,
    members: &'a MemberTypes<'a>,
}

impl<'a> Echo<'a> {
    fn child(&self, expr: &'a Expr) -> Echo<'a> {
        Echo {
            expr,
            members: self.members,
        }
    }

    fn static_type(&self, expr: &Expr) -> Option<DeclaredType> {
        match expr {
            Expr::Member { var, member } => (self.members)(var, member),
            Expr::Cast { ty, .. } => Some(*ty),
            Expr::DatePart {
                expr,
                part: DatePart::Date,
            } => self.static_type(expr),
            Expr::DatePart { .. } => Some(DeclaredType::Int32),
            Expr::Clock { .. } => Some(DeclaredType::DateTimeOffset),
            Expr::Literal(value) => match value {
                Value::Bool(_) => Some(DeclaredType::Bool),
                Value::Int(v) if i32::try_from(*v).is_ok() => Some(DeclaredType::Int32),
                Value::Int(_) => Some(DeclaredType::Int64),
                Value::Float(_) => Some(DeclaredType::Float64),
                Value::Decimal(d) => Some(DeclaredType::Decimal { scale: d.scale() }),
                Value::String(_) => Some(DeclaredType::String {
                    ansi: false,
                    max_length: None,
                }),
                Value::Bytes(_) => Some(DeclaredType::Bytes),
                Value::DateTime(_) => Some(DeclaredType::DateTime),
                Value::DateTimeOffset(_) => Some(DeclaredType::DateTimeOffset),
                Value::Null => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Echo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expr {
            Expr::Member { var, member } => write!(f, "{var}.{member}"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Param(name) => write!(f, "(Unhandled parameter: {name})"),
            Expr::Binary { op, left, right } => {
                let prec = op.precedence();
                if left.precedence() < prec {
                    write!(f, "({})", self.child(left))?;
                } else {
                    write!(f, "{}", self.child(left))?;
                }
                write!(f, " {} ", op.token())?;
                if right.precedence() <= prec {
                    write!(f, "({})", self.child(right))
                } else {
                    write!(f, "{}", self.child(right))
                }
            }
            Expr::Not(inner) => {
                if inner.precedence() == u8::MAX {
                    write!(f, "!{}", self.child(inner))
                } else {
                    write!(f, "!({})", self.child(inner))
                }
            }
            Expr::Contains { haystack, needle } => {
                write!(f, "{}.Contains({})", self.child(haystack), self.child(needle))
            }
            Expr::InList { item, list } => match list {
                ListSource::Literals(values) => {
                    f.write_str("new[] { ")?;
                    for (idx, value) in values.iter().enumerate() {
                        if idx > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{value}")?;
                    }
                    write!(f, " }}.Contains({})", self.child(item))
                }
                ListSource::Param(name) => {
                    f.write_str("Contains")?;
                    if let Some(ty) = self.static_type(item) {
                        write!(f, "<{}>", ty.element_name())?;
                    }
                    write!(
                        f,
                        "(    source: (Unhandled parameter: {name}),     value: {})",
                        self.child(item)
                    )
                }
            },
            Expr::DatePart { expr, part } => write!(f, "{}.{}", self.child(expr), part.name()),
            Expr::Clock { utc: false } => f.write_str("DateTimeOffset.Now"),
            Expr::Clock { utc: true } => f.write_str("DateTimeOffset.UtcNow"),
            Expr::Cast { expr, ty } => {
                if expr.precedence() == u8::MAX {
                    write!(f, "({ty}){}", self.child(expr))
                } else {
                    write!(f, "({ty})({})", self.child(expr))
                }
            }
        }
    }
}

/// Renders `expr` as a lambda over the variables bound at that point.
pub fn render_lambda(vars: &[Var], expr: &Expr) -> String {
    render_lambda_with(vars, expr, &untyped)
}

/// Like [`render_lambda`], naming element types of captured lists from the
/// declared types of the members they are matched against.
pub fn render_lambda_with(vars: &[Var], expr: &Expr, members: &MemberTypes<'_>) -> String {
    let params = vars
        .iter()
        .map(Var::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!("({params}) => {}", Echo { expr, members })
}

/// Projection item.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    /// Output member name.
    pub alias: String,
    /// Projected expression.
    pub expr: Expr,
}

impl Projection {
    /// Creates a projection item.
    pub fn new(alias: impl Into<String>, expr: Expr) -> Self {
        Self {
            alias: alias.into(),
            expr,
        }
    }
}

/// Ordering key.
#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    /// Key expression.
    pub expr: Expr,
    /// Descending order.
    pub descending: bool,
}

/// Join flavours.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum JoinKind {
    /// Matched pairs only.
    Inner,
    /// Every left row, with nulls for unmatched right rows.
    LeftOuter,
    /// Cartesian product (optionally filtered by the join condition).
    Cross,
}

/// Aggregate functions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AggregateFn {
    /// Row count.
    Count,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Sum.
    Sum,
    /// Arithmetic mean.
    Average,
}

impl AggregateFn {
    /// Name used in diagnostics and explain output.
    pub fn name(self) -> &'static str {
        match self {
            AggregateFn::Count => "Count",
            AggregateFn::Min => "Min",
            AggregateFn::Max => "Max",
            AggregateFn::Sum => "Sum",
            AggregateFn::Average => "Average",
        }
    }
}

/// Raw text or stored-procedure source.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFragment {
    /// Raw text (with `{0}`-style placeholders) or command identifier.
    pub command: String,
    /// Positional parameters.
    pub parameters: Vec<Value>,
    /// `false` for stored-procedure invocation, `true` for ad-hoc relational text.
    pub composable: bool,
    /// Entity shape of the rows the fragment returns.
    pub entity: String,
    /// Variable bound to each returned row.
    pub var: Var,
}

/// Node of the query tree.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryNode {
    /// Ordinary entity source.
    Source {
        /// Entity name resolved through metadata.
        entity: String,
        /// Variable bound to each row.
        var: Var,
    },
    /// Raw text or stored-procedure source.
    RawFragment(RawFragment),
    /// Row filter.
    Filter {
        /// Filtered input.
        input: Box<QueryNode>,
        /// Boolean predicate.
        predicate: Expr,
    },
    /// Projection into a new binding.
    Project {
        /// Projected input.
        input: Box<QueryNode>,
        /// Output members.
        items: Vec<Projection>,
        /// Variable bound to each projected row.
        var: Var,
    },
    /// Ordering (replaces any earlier ordering).
    OrderBy {
        /// Ordered input.
        input: Box<QueryNode>,
        /// Keys in significance order.
        keys: Vec<SortKey>,
    },
    /// Row limit.
    Take {
        /// Limited input.
        input: Box<QueryNode>,
        /// Maximum rows.
        count: u64,
    },
    /// Two-source combination.
    Join {
        /// Outer input.
        left: Box<QueryNode>,
        /// Inner input; may reference variables bound by `left`.
        right: Box<QueryNode>,
        /// Join flavour.
        kind: JoinKind,
        /// Join condition; `None` for a plain cartesian product.
        on: Option<Expr>,
    },
    /// Scalar aggregate.
    Aggregate {
        /// Aggregated input.
        input: Box<QueryNode>,
        /// Aggregate function.
        func: AggregateFn,
        /// Aggregated expression; `None` for `Count`.
        arg: Option<Expr>,
    },
}

impl QueryNode {
    /// Operator this node applies, `None` for leaves.
    pub fn operator(&self) -> Option<OperatorKind> {
        match self {
            QueryNode::Source { .. } | QueryNode::RawFragment(_) => None,
            QueryNode::Filter { .. } => Some(OperatorKind::Filter),
            QueryNode::Project { .. } => Some(OperatorKind::Project),
            QueryNode::OrderBy { .. } => Some(OperatorKind::OrderBy),
            QueryNode::Take { .. } => Some(OperatorKind::Take),
            QueryNode::Join { .. } => Some(OperatorKind::Join),
            QueryNode::Aggregate { .. } => Some(OperatorKind::Aggregate),
        }
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&QueryNode> {
        match self {
            QueryNode::Source { .. } | QueryNode::RawFragment(_) => Vec::new(),
            QueryNode::Filter { input, .. }
            | QueryNode::Project { input, .. }
            | QueryNode::OrderBy { input, .. }
            | QueryNode::Take { input, .. }
            | QueryNode::Aggregate { input, .. } => vec![input],
            QueryNode::Join { left, right, .. } => vec![left, right],
        }
    }

    /// Variables visible to an operator placed directly above this node.
    pub fn bound_vars(&self) -> Vec<Var> {
        match self {
            QueryNode::Source { var, .. } => vec![var.clone()],
            QueryNode::RawFragment(raw) => vec![raw.var.clone()],
            QueryNode::Project { var, .. } => vec![var.clone()],
            QueryNode::Filter { input, .. }
            | QueryNode::OrderBy { input, .. }
            | QueryNode::Take { input, .. } => input.bound_vars(),
            QueryNode::Join { left, right, .. } => {
                let mut vars = left.bound_vars();
                vars.extend(right.bound_vars());
                vars
            }
            QueryNode::Aggregate { .. } => Vec::new(),
        }
    }

    /// Collects every variable referenced by expressions in this subtree.
    pub fn referenced_vars(&self, out: &mut BTreeSet<Var>) {
        match self {
            QueryNode::Source { .. } | QueryNode::RawFragment(_) => {}
            QueryNode::Filter { input, predicate } => {
                predicate.referenced_vars(out);
                input.referenced_vars(out);
            }
            QueryNode::Project { input, items, .. } => {
                for item in items {
                    item.expr.referenced_vars(out);
                }
                input.referenced_vars(out);
            }
            QueryNode::OrderBy { input, keys } => {
                for key in keys {
                    key.expr.referenced_vars(out);
                }
                input.referenced_vars(out);
            }
            QueryNode::Take { input, .. } => input.referenced_vars(out),
            QueryNode::Join {
                left, right, on, ..
            } => {
                if let Some(on) = on {
                    on.referenced_vars(out);
                }
                left.referenced_vars(out);
                right.referenced_vars(out);
            }
            QueryNode::Aggregate { input, arg, .. } => {
                if let Some(arg) = arg {
                    arg.referenced_vars(out);
                }
                input.referenced_vars(out);
            }
        }
    }

    /// Variables bound anywhere in this subtree.
    pub fn declared_vars(&self, out: &mut BTreeSet<Var>) {
        match self {
            QueryNode::Source { var, .. } | QueryNode::Project { var, .. } => {
                out.insert(var.clone());
            }
            QueryNode::RawFragment(raw) => {
                out.insert(raw.var.clone());
            }
            _ => {}
        }
        for child in self.children() {
            child.declared_vars(out);
        }
    }

    /// Raw fragments reachable from this node, left to right.
    pub fn raw_fragments(&self) -> Vec<&RawFragment> {
        let mut out = Vec::new();
        self.collect_raw(&mut out);
        out
    }

    fn collect_raw<'a>(&'a self, out: &mut Vec<&'a RawFragment>) {
        if let QueryNode::RawFragment(raw) = self {
            out.push(raw);
        }
        for child in self.children() {
            child.collect_raw(out);
        }
    }
}

/// Parameter value captured by a query.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    /// Single value.
    Scalar(Value),
    /// List used by `InList` membership tests.
    List(Vec<Value>),
}

/// Top-level query: the IR root plus captured parameter values.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Root of the IR tree.
    pub root: QueryNode,
    /// Captured parameters referenced by [`Expr::Param`] and [`ListSource::Param`].
    pub parameters: BTreeMap<String, ParamValue>,
}

impl Query {
    /// Wraps a root node without parameters.
    pub fn new(root: QueryNode) -> Self {
        Self {
            root,
            parameters: BTreeMap::new(),
        }
    }
}
