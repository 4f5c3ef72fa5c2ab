// SPDX-License-Identifier: MIT

//! Per-job step graphs
//!
//! This module flattens a job's steps into a graph, orders it and computes
//! the condition each step runs under.

mod normalizer;
mod propagate;
mod resolver;
pub mod types;

pub use normalizer::normalize_to_graph;
pub use propagate::effective_conditions;
pub use resolver::resolve_order;
pub use types::{DeclaredLeaf, GraphEntry, GraphNode, JobGraph};
