//! Fluent query composition surface.
//!
//! Each method layers one operator over the tree built so far. Errors are
//! accumulated and reported by [`QueryBuilder::build`], so a chain never
//! panics half-way.

use std::collections::BTreeMap;

use crate::query::{
    ast::{
        AggregateFn, Expr, JoinKind, ParamValue, Projection, Query, QueryNode, RawFragment,
        SortKey, Var,
    },
    executor::{CancelToken, Dispatcher},
    errors::QueryError,
    materialize::ShapedResult,
    plan::TranslatedPlan,
    Result, Value,
};

/// Fluent builder producing a [`Query`].
#[derive(Debug)]
pub struct QueryBuilder {
    root: QueryNode,
    parameters: BTreeMap<String, ParamValue>,
    error: Option<QueryError>,
}

impl QueryBuilder {
    fn from_node(root: QueryNode) -> Self {
        Self {
            root,
            parameters: BTreeMap::new(),
            error: None,
        }
    }

    /// Starts from an ordinary entity source bound to `var`.
    pub fn from_entity(entity: impl Into<String>, var: impl Into<String>) -> Self {
        Self::from_node(QueryNode::Source {
            entity: entity.into(),
            var: Var(var.into()),
        })
    }

    /// Starts from ad-hoc relational text with `{0}`-style placeholders.
    ///
    /// The text is composable: further operators wrap it as a subquery.
    pub fn from_sql<I, V>(
        entity: impl Into<String>,
        var: impl Into<String>,
        text: impl Into<String>,
        parameters: I,
    ) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::from_raw(entity, var, text, parameters, true)
    }

    /// Starts from a stored-procedure invocation.
    ///
    /// The command is opaque: only member picks may be layered on top.
    pub fn from_procedure<I, V>(
        entity: impl Into<String>,
        var: impl Into<String>,
        command: impl Into<String>,
        parameters: I,
    ) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::from_raw(entity, var, command, parameters, false)
    }

    /// Starts from a raw fragment with an explicit composability tag.
    pub fn from_raw<I, V>(
        entity: impl Into<String>,
        var: impl Into<String>,
        command: impl Into<String>,
        parameters: I,
        composable: bool,
    ) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::from_node(QueryNode::RawFragment(RawFragment {
            command: command.into(),
            parameters: parameters.into_iter().map(Into::into).collect(),
            composable,
            entity: entity.into(),
            var: Var(var.into()),
        }))
    }

    /// Captures a scalar parameter referenced by [`Expr::Param`].
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        self.capture(name, ParamValue::Scalar(value.into()));
        self
    }

    /// Captures a list parameter referenced by [`Expr::in_param`].
    pub fn list_param<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.capture(name.into(), ParamValue::List(values));
        self
    }

    /// Filters rows by `predicate`.
    pub fn filter(self, predicate: Expr) -> Self {
        self.wrap(|input| QueryNode::Filter {
            input: Box::new(input),
            predicate,
        })
    }

    /// Projects each row into a new binding `var` with the given members.
    pub fn select<I, S>(mut self, var: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = (S, Expr)>,
        S: Into<String>,
    {
        if self.error.is_some() {
            return self;
        }
        let items: Vec<Projection> = items
            .into_iter()
            .map(|(alias, expr)| Projection::new(alias, expr))
            .collect();
        if items.is_empty() {
            self.error = Some(QueryError::invalid("select requires at least one member"));
            return self;
        }
        for (idx, item) in items.iter().enumerate() {
            if items[..idx].iter().any(|prev| prev.alias == item.alias) {
                self.error = Some(QueryError::invalid(format!(
                    "select member '{}' is declared twice",
                    item.alias
                )));
                return self;
            }
        }
        let var = Var(var.into());
        self.wrap(|input| QueryNode::Project {
            input: Box::new(input),
            items,
            var,
        })
    }

    /// Orders ascending by `key`, replacing any earlier ordering.
    pub fn order_by(self, key: Expr) -> Self {
        self.order(key, false)
    }

    /// Orders descending by `key`, replacing any earlier ordering.
    pub fn order_by_desc(self, key: Expr) -> Self {
        self.order(key, true)
    }

    /// Adds an ascending tie-breaker to the current ordering.
    pub fn then_by(self, key: Expr) -> Self {
        self.then(key, false)
    }

    /// Adds a descending tie-breaker to the current ordering.
    pub fn then_by_desc(self, key: Expr) -> Self {
        self.then(key, true)
    }

    /// Keeps at most `count` rows.
    pub fn take(self, count: u64) -> Self {
        self.wrap(|input| QueryNode::Take {
            input: Box::new(input),
            count,
        })
    }

    /// Inner join with `other` on `on`.
    pub fn join(self, other: QueryBuilder, on: Expr) -> Self {
        self.combine(other, JoinKind::Inner, Some(on))
    }

    /// Left outer join with `other` on `on`.
    pub fn left_join(self, other: QueryBuilder, on: Expr) -> Self {
        self.combine(other, JoinKind::LeftOuter, Some(on))
    }

    /// Cartesian product with `other`.
    ///
    /// When `other` references variables bound here the join is correlated
    /// and needs provider cross-apply support.
    pub fn cross_join(self, other: QueryBuilder) -> Self {
        self.combine(other, JoinKind::Cross, None)
    }

    /// Row count.
    pub fn count(self) -> Self {
        self.aggregate(AggregateFn::Count, None)
    }

    /// Minimum of `arg`.
    pub fn min(self, arg: Expr) -> Self {
        self.aggregate(AggregateFn::Min, Some(arg))
    }

    /// Maximum of `arg`.
    pub fn max(self, arg: Expr) -> Self {
        self.aggregate(AggregateFn::Max, Some(arg))
    }

    /// Sum of `arg`.
    pub fn sum(self, arg: Expr) -> Self {
        self.aggregate(AggregateFn::Sum, Some(arg))
    }

    /// Mean of `arg`.
    pub fn average(self, arg: Expr) -> Self {
        self.aggregate(AggregateFn::Average, Some(arg))
    }

    /// Builds the query.
    pub fn build(self) -> Result<Query> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(Query {
            root: self.root,
            parameters: self.parameters,
        })
    }

    /// Validates and translates through `dispatcher` without executing.
    pub fn prepare(self, dispatcher: &Dispatcher) -> Result<TranslatedPlan> {
        dispatcher.prepare(&self.build()?)
    }

    /// Executes on the blocking path.
    pub fn execute(self, dispatcher: &Dispatcher) -> Result<ShapedResult> {
        dispatcher.execute(&self.build()?, None)
    }

    /// Executes on the suspendable path.
    pub async fn execute_async(
        self,
        dispatcher: &Dispatcher,
        cancel: Option<CancelToken>,
    ) -> Result<ShapedResult> {
        let query = self.build()?;
        dispatcher.execute_async(&query, cancel).await
    }

    fn wrap<F>(mut self, build: F) -> Self
    where
        F: FnOnce(QueryNode) -> QueryNode,
    {
        if self.error.is_some() {
            return self;
        }
        let placeholder = QueryNode::Source {
            entity: String::new(),
            var: Var(String::new()),
        };
        let input = std::mem::replace(&mut self.root, placeholder);
        self.root = build(input);
        self
    }

    fn order(self, key: Expr, descending: bool) -> Self {
        self.wrap(|input| QueryNode::OrderBy {
            input: Box::new(input),
            keys: vec![SortKey {
                expr: key,
                descending,
            }],
        })
    }

    fn then(mut self, key: Expr, descending: bool) -> Self {
        if self.error.is_some() {
            return self;
        }
        match &mut self.root {
            QueryNode::OrderBy { keys, .. } => keys.push(SortKey {
                expr: key,
                descending,
            }),
            _ => {
                self.error = Some(QueryError::invalid(
                    "then_by requires a preceding order_by",
                ));
            }
        }
        self
    }

    fn combine(mut self, other: QueryBuilder, kind: JoinKind, on: Option<Expr>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Some(err) = other.error {
            self.error = Some(err);
            return self;
        }
        for (name, value) in other.parameters {
            self.capture(name, value);
        }
        let right = other.root;
        self.wrap(|left| QueryNode::Join {
            left: Box::new(left),
            right: Box::new(right),
            kind,
            on,
        })
    }

    fn aggregate(self, func: AggregateFn, arg: Option<Expr>) -> Self {
        self.wrap(|input| QueryNode::Aggregate {
            input: Box::new(input),
            func,
            arg,
        })
    }

    fn capture(&mut self, name: String, value: ParamValue) {
        if self.error.is_some() {
            return;
        }
        match self.parameters.get(&name) {
            Some(existing) if *existing != value => {
                self.error = Some(QueryError::invalid(format!(
                    "parameter '{name}' is bound to two different values"
                )));
            }
            _ => {
                self.parameters.insert(name, value);
            }
        }
    }
}
