//! Query refinement
//!
//! A query may refine an earlier named query instead of starting from a
//! source: `query: top_carriers is by_carrier + { limit: 5 }`. Refinement
//! merges the new ops into the base query's final stage. Gathering ops
//! (group_by, aggregate, project, nest, where, having) accumulate; limit
//! and order_by replace whatever the base set.

use std::collections::HashSet;

use crate::ast::{OpAst, QueryDef, StageAst};
use crate::diagnostics::{DiagnosticCode, DiagnosticLog};
use crate::model::Model;

/// Resolve a query's refinement chain into a plain query over a source.
/// None (after reporting) when the chain is broken or cyclic.
pub fn resolve_refinement(
    query: &QueryDef,
    model: &Model,
    log: &mut DiagnosticLog,
) -> Option<QueryDef> {
    let mut visited = HashSet::new();
    resolve_inner(query, model, &mut visited, log)
}

fn resolve_inner(
    query: &QueryDef,
    model: &Model,
    visited: &mut HashSet<String>,
    log: &mut DiagnosticLog,
) -> Option<QueryDef> {
    let base_name = match &query.refines {
        None => return Some(query.clone()),
        Some(name) => name,
    };

    if !visited.insert(query.name.clone()) || base_name == &query.name {
        log.error(
            DiagnosticCode::CircularSourceDefinition,
            format!("Query '{}' refines itself", query.name),
            query.range,
        );
        return None;
    }

    let base = match model.get_query(base_name) {
        Some(base) => base,
        None => {
            log.error(
                DiagnosticCode::NameNotFound,
                format!("Query '{}' refines unknown query '{}'", query.name, base_name),
                query.range,
            );
            return None;
        }
    };

    let mut merged = resolve_inner(base, model, visited, log)?;
    merged.name = query.name.clone();
    merged.refines = None;
    merged.range = query.range;

    let mut stages = query.stages.iter();
    if let Some(first) = stages.next() {
        match merged.stages.last_mut() {
            Some(last) => merge_ops(last, &first.ops),
            None => merged.stages.push(first.clone()),
        }
    }
    // Stages past the first extend the pipeline
    merged.stages.extend(stages.cloned());
    Some(merged)
}

/// Merge refinement ops into a stage: limit and order_by replace, the
/// rest append.
fn merge_ops(stage: &mut StageAst, ops: &[OpAst]) {
    for op in ops {
        match op {
            OpAst::Limit(_) => {
                stage.ops.retain(|existing| !matches!(existing, OpAst::Limit(_)));
                stage.ops.push(op.clone());
            }
            OpAst::OrderBy(_) => {
                stage.ops.retain(|existing| !matches!(existing, OpAst::OrderBy(_)));
                stage.ops.push(op.clone());
            }
            other => stage.ops.push(other.clone()),
        }
    }
}
