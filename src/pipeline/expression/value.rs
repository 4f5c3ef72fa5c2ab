// SPDX-License-Identifier: MIT

//! Expression values and the entities they reference

use std::fmt;

use super::ast::{CompareOp, Condition, Literal, Sources};
use crate::pipeline::step::Step;

/// An entity an expression can reference.
///
/// Only identity matters here: the algebra never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExpressionSource {
    /// A step whose outputs or outcome are read
    Step(Step),
    /// A job whose outputs or result are read, by job id
    Job(String),
}

impl ExpressionSource {
    pub fn is_step(&self) -> bool {
        matches!(self, ExpressionSource::Step(_))
    }

    pub fn as_step(&self) -> Option<&Step> {
        match self {
            ExpressionSource::Step(step) => Some(step),
            ExpressionSource::Job(_) => None,
        }
    }

    pub fn as_job(&self) -> Option<&str> {
        match self {
            ExpressionSource::Job(name) => Some(name),
            ExpressionSource::Step(_) => None,
        }
    }
}

/// An immutable expression such as `matrix.os` or
/// `steps.build.outputs.version`, with the sources it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionValue {
    expression: String,
    sources: Sources,
}

impl ExpressionValue {
    /// Expression that reads no step or job (contexts like `matrix`, `github`)
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            sources: Sources::new(),
        }
    }

    pub fn with_sources(expression: impl Into<String>, sources: Sources) -> Self {
        Self {
            expression: expression.into(),
            sources,
        }
    }

    pub fn from_source(expression: impl Into<String>, source: ExpressionSource) -> Self {
        Self::with_sources(expression, Sources::from([source]))
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    /// `${{ expression }}`, for use in string-valued fields
    pub fn to_template(&self) -> String {
        format!("${{{{ {} }}}}", self.expression)
    }

    /// Nested property access: `needs.build.outputs` → `needs.build.outputs.tag`
    pub fn property(&self, name: &str) -> ExpressionValue {
        let expression = format!("{}.{}", self.expression, name);
        Self::with_sources(expression, self.sources.clone())
    }

    pub fn compare(&self, op: CompareOp, value: impl Into<Literal>) -> Condition {
        Condition::compare(self.expression.clone(), op, value, self.sources.clone())
    }

    pub fn equals(&self, value: impl Into<Literal>) -> Condition {
        self.compare(CompareOp::Eq, value)
    }

    pub fn not_equals(&self, value: impl Into<Literal>) -> Condition {
        self.compare(CompareOp::NotEq, value)
    }

    pub fn starts_with(&self, prefix: impl Into<Literal>) -> Condition {
        self.call("startsWith", prefix.into())
    }

    pub fn ends_with(&self, suffix: impl Into<Literal>) -> Condition {
        self.call("endsWith", suffix.into())
    }

    pub fn contains(&self, item: impl Into<Literal>) -> Condition {
        self.call("contains", item.into())
    }

    /// The value itself used as a boolean
    pub fn is_truthy(&self) -> Condition {
        Condition::raw_with_sources(self.expression.clone(), self.sources.clone())
    }

    /// `!value`
    pub fn not(&self) -> Condition {
        self.is_truthy().not()
    }

    fn call(&self, name: &str, argument: Literal) -> Condition {
        Condition::call(
            name,
            vec![self.expression.clone(), argument.to_string()],
            self.sources.clone(),
        )
    }
}

impl fmt::Display for ExpressionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_conditions_render() {
        let os = ExpressionValue::new("matrix.os");
        assert_eq!(os.equals("linux").to_expression(), "matrix.os == 'linux'");
        assert_eq!(
            os.not_equals("linux").to_expression(),
            "matrix.os != 'linux'"
        );
        assert_eq!(
            os.starts_with("ubuntu").to_expression(),
            "startsWith(matrix.os, 'ubuntu')"
        );
        assert_eq!(
            os.ends_with("-arm").to_expression(),
            "endsWith(matrix.os, '-arm')"
        );
        assert_eq!(
            os.contains("win").to_expression(),
            "contains(matrix.os, 'win')"
        );
        assert_eq!(os.not().to_expression(), "!matrix.os");
    }

    #[test]
    fn test_template() {
        let value = ExpressionValue::new("github.sha");
        assert_eq!(value.to_template(), "${{ github.sha }}");
    }

    #[test]
    fn test_sources_carry_through_derivations() {
        let build = ExpressionSource::Job("build".into());
        let value = ExpressionValue::from_source("needs.build.outputs", build);
        let tag = value.property("tag");
        assert_eq!(tag.expression(), "needs.build.outputs.tag");
        let condition = tag.equals("latest");
        assert_eq!(condition.sources().len(), 1);
        assert!(!condition.references_step());
        assert!(condition.is_propagatable());
    }

    #[test]
    fn test_derivation_does_not_mutate() {
        let value = ExpressionValue::new("matrix.os");
        let _ = value.property("arch");
        assert_eq!(value.expression(), "matrix.os");
    }
}
