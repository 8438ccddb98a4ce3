//! Composability validation.
//!
//! Runs before any provider text exists. The opaque-source rule is a total
//! function over the `composable` tag of raw fragments; the shape rules
//! depend on the capability profile.

use std::collections::BTreeSet;

use tracing::debug;

use crate::query::{
    ast::{Expr, OperatorKind, Projection, Query, QueryNode, RawFragment, Var},
    capability::CapabilityProfile,
    errors::QueryError,
    Result,
};

/// Checks that `query` is a legal composition for `profile`.
pub fn validate(query: &Query, profile: &CapabilityProfile) -> Result<()> {
    let mut ancestors = Vec::new();
    check_opaque_sources(&query.root, &mut ancestors)?;
    check_shapes(&query.root, profile, true)?;
    check_scoping(&query.root)?;
    debug!(provider = profile.name(), "query composition validated");
    Ok(())
}

fn check_opaque_sources<'a>(node: &'a QueryNode, ancestors: &mut Vec<&'a QueryNode>) -> Result<()> {
    if let QueryNode::RawFragment(raw) = node {
        if !raw.composable {
            return check_ancestors(raw, ancestors);
        }
        return Ok(());
    }
    ancestors.push(node);
    for child in node.children() {
        check_opaque_sources(child, ancestors)?;
    }
    ancestors.pop();
    Ok(())
}

/// Walks outwards from an opaque source; only member picks may wrap it.
fn check_ancestors(raw: &RawFragment, ancestors: &[&QueryNode]) -> Result<()> {
    let mut visible = raw.var.clone();
    for ancestor in ancestors.iter().rev() {
        match ancestor {
            QueryNode::Project { items, var, .. } if is_member_pick(items, &visible) => {
                visible = var.clone();
            }
            other => {
                let Some(operator) = other.operator() else {
                    continue;
                };
                let repeated = operator == OperatorKind::Join && invoked_twice(other, &raw.command);
                return Err(QueryError::NonComposableSource {
                    command: raw.command.clone(),
                    operator,
                    repeated,
                });
            }
        }
    }
    Ok(())
}

fn is_member_pick(items: &[Projection], visible: &Var) -> bool {
    items.iter().all(|item| match &item.expr {
        Expr::Member { var, .. } => var == visible,
        _ => false,
    })
}

fn invoked_twice(join: &QueryNode, command: &str) -> bool {
    join.raw_fragments()
        .into_iter()
        .filter(|raw| !raw.composable && raw.command == command)
        .count()
        > 1
}

fn check_shapes(node: &QueryNode, profile: &CapabilityProfile, is_root: bool) -> Result<()> {
    match node {
        QueryNode::Aggregate { func, .. } if !is_root => {
            return Err(QueryError::UnsupportedShape {
                provider: profile.name().to_owned(),
                shape: format!("composition over the scalar result of {}", func.name()),
            });
        }
        QueryNode::Join { left, right, .. } if !profile.supports_cross_apply() => {
            let outer: BTreeSet<Var> = left.bound_vars().into_iter().collect();
            let mut inner = BTreeSet::new();
            right.referenced_vars(&mut inner);
            if let Some(var) = inner.intersection(&outer).next() {
                return Err(QueryError::UnsupportedShape {
                    provider: profile.name().to_owned(),
                    shape: format!(
                        "a correlated join whose inner source references the outer binding '{var}'"
                    ),
                });
            }
        }
        _ => {}
    }
    for child in node.children() {
        check_shapes(child, profile, false)?;
    }
    Ok(())
}

fn check_scoping(node: &QueryNode) -> Result<()> {
    if let QueryNode::Join { left, right, .. } = node {
        let mut left_vars = BTreeSet::new();
        left.declared_vars(&mut left_vars);
        let mut right_vars = BTreeSet::new();
        right.declared_vars(&mut right_vars);
        if let Some(var) = left_vars.intersection(&right_vars).next() {
            return Err(QueryError::invalid(format!(
                "binding '{var}' is declared on both sides of a join"
            )));
        }
    }
    for child in node.children() {
        check_scoping(child)?;
    }
    Ok(())
}
