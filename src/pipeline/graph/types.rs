// SPDX-License-Identifier: MIT

//! Per-job step graph
//!
//! The graph is an arena: nodes live in a `Vec` in discovery order and are
//! addressed by index, with a key index for lookups by step identity.

use std::collections::HashMap;

use crate::pipeline::expression::Condition;
use crate::pipeline::step::{Step, StepKey};

/// Edges and collected contexts of one node
#[derive(Debug, Clone, Default)]
pub struct GraphEntry {
    /// Steps that must run first and are pulled into the job
    pub dependencies: Vec<StepKey>,
    /// Steps that must run first only if they are in the job anyway
    pub after_dependencies: Vec<StepKey>,
    /// One condition per conditional encounter while flattening
    pub contexts: Vec<Condition>,
    /// Set once any encounter carried no context; overrides `contexts`
    pub unconditional: bool,
}

impl GraphEntry {
    pub(crate) fn add_dependency(&mut self, key: StepKey) -> bool {
        if self.dependencies.contains(&key) {
            return false;
        }
        self.dependencies.push(key);
        true
    }

    pub(crate) fn add_after_dependency(&mut self, key: StepKey) {
        if !self.after_dependencies.contains(&key) {
            self.after_dependencies.push(key);
        }
    }

    pub(crate) fn add_context(&mut self, context: Option<Condition>) {
        match context {
            Some(condition) => {
                let rendered = condition.to_expression();
                if !self.contexts.iter().any(|c| c.to_expression() == rendered) {
                    self.contexts.push(condition);
                }
            }
            None => self.unconditional = true,
        }
    }

    /// Every predecessor, hard and ordering-only, without repeats
    pub fn predecessors(&self) -> Vec<StepKey> {
        let mut keys = self.dependencies.clone();
        for key in &self.after_dependencies {
            if !keys.contains(key) {
                keys.push(*key);
            }
        }
        keys
    }
}

/// A flattened action step and its entry
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub step: Step,
    pub entry: GraphEntry,
}

/// A step the caller placed directly in the job
#[derive(Debug, Clone)]
pub struct DeclaredLeaf {
    pub key: StepKey,
    /// Reference condition AND'ed with the step's own `if`
    pub condition: Option<Condition>,
}

/// Flattened graph of one job
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    pub(crate) nodes: Vec<GraphNode>,
    pub(crate) index: HashMap<StepKey, usize>,
    /// Action steps of each top-level item, in declaration order
    pub(crate) roots: Vec<Vec<StepKey>>,
    pub(crate) leaves: Vec<DeclaredLeaf>,
}

impl JobGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, key: StepKey) -> Option<&GraphNode> {
        self.index.get(&key).map(|&i| &self.nodes[i])
    }

    pub fn entry(&self, key: StepKey) -> Option<&GraphEntry> {
        self.node(key).map(|node| &node.entry)
    }

    pub fn contains(&self, key: StepKey) -> bool {
        self.index.contains_key(&key)
    }

    pub fn leaves(&self) -> &[DeclaredLeaf] {
        &self.leaves
    }

    pub fn leaf(&self, key: StepKey) -> Option<&DeclaredLeaf> {
        self.leaves.iter().find(|leaf| leaf.key == key)
    }

    pub(crate) fn arena_index(&self, key: StepKey) -> Option<usize> {
        self.index.get(&key).copied()
    }

    /// Arena index of the node, adding it if absent. The flag is true when added.
    pub(crate) fn ensure_node(&mut self, step: &Step) -> (usize, bool) {
        if let Some(&i) = self.index.get(&step.key()) {
            return (i, false);
        }
        let i = self.nodes.len();
        self.nodes.push(GraphNode {
            step: step.clone(),
            entry: GraphEntry::default(),
        });
        self.index.insert(step.key(), i);
        (i, true)
    }
}
