// SPDX-License-Identifier: MIT

//! Condition expressions for steps and jobs
//!
//! This module provides the condition algebra the resolver works with.
//! Conditions are expressions like:
//! - `matrix.os == 'linux'`
//! - `github.event_name != 'pull_request' && !cancelled()`
//! - `steps.detect.outputs.changed == 'true'`
//!
//! Every condition tracks the steps and jobs it reads so the resolver can
//! keep step-output conditions from flowing backward.

mod ast;
mod parser;
mod simplify;
mod value;

pub use ast::{CompareOp, Condition, Literal, LogicalOp, Sources};
pub use parser::{parse, parse_value, referenced_step_ids, SourceScope, Unscoped};
pub use simplify::simplify_or_conditions;
pub use value::{ExpressionSource, ExpressionValue};

/// `success()`
pub fn success() -> Condition {
    Condition::call("success", Vec::new(), Sources::new())
}

/// `failure()`
pub fn failure() -> Condition {
    Condition::call("failure", Vec::new(), Sources::new())
}

/// `always()`
pub fn always() -> Condition {
    Condition::call("always", Vec::new(), Sources::new())
}

/// `cancelled()`
pub fn cancelled() -> Condition {
    Condition::call("cancelled", Vec::new(), Sources::new())
}
