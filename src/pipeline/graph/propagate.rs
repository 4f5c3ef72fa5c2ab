// SPDX-License-Identifier: MIT

//! Effective run conditions of resolved steps

use std::collections::HashMap;

use super::types::JobGraph;
use crate::pipeline::expression::{simplify_or_conditions, Condition};
use crate::pipeline::step::StepKey;

/// Condition of each step in `order`, `None` for steps that always run.
///
/// Declared leaves keep their declared condition. Other steps run when any
/// of their collected contexts holds, AND'ed with their own `if`.
pub fn effective_conditions(graph: &JobGraph, order: &[StepKey]) -> Vec<Option<Condition>> {
    let position: HashMap<StepKey, usize> =
        order.iter().enumerate().map(|(p, &key)| (key, p)).collect();
    let mut conditions = vec![None; order.len()];

    for (p, &key) in order.iter().enumerate().rev() {
        let Some(node) = graph.node(key) else {
            continue;
        };
        if let Some(leaf) = graph.leaf(key) {
            conditions[p] = leaf.condition.clone();
            continue;
        }

        let context = if node.entry.unconditional {
            None
        } else {
            context_condition(&node.entry.contexts, p, &position)
        };
        conditions[p] = match (context, node.step.intrinsic_condition()) {
            (Some(context), Some(own)) => Some(context.and(own).dedup_and_terms()),
            (Some(context), None) => Some(context),
            (None, own) => own.cloned(),
        };
    }
    conditions
}

/// OR of the contexts, minus operands reading steps that do not run earlier
fn context_condition(
    contexts: &[Condition],
    at: usize,
    position: &HashMap<StepKey, usize>,
) -> Option<Condition> {
    let mut terms = Vec::with_capacity(contexts.len());
    for context in contexts {
        let kept = context
            .and_terms()
            .into_iter()
            .filter(|operand| runs_before(operand, at, position));
        match Condition::all_of(kept) {
            Some(term) => terms.push(term),
            None => return None,
        }
    }
    simplify_or_conditions(&terms)
}

fn runs_before(condition: &Condition, at: usize, position: &HashMap<StepKey, usize>) -> bool {
    condition
        .sources()
        .iter()
        .filter_map(|source| source.as_step())
        .flat_map(|step| step.leaf_steps())
        .all(|step| position.get(&step.key()).is_some_and(|&p| p < at))
}
