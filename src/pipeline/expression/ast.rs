// SPDX-License-Identifier: MIT

//! Abstract Syntax Tree for condition expressions
//!
//! Conditions are immutable. Every combinator builds a new value and folds
//! the literal `true`/`false` identities eagerly, so the rendered form never
//! carries `x && true` style residue.

use std::collections::BTreeSet;
use std::fmt;

use super::value::ExpressionSource;

/// Set of entities an expression references
pub type Sources = BTreeSet<ExpressionSource>;

/// A boolean condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Comparison expression: left op literal
    Comparison {
        left: String,
        op: CompareOp,
        right: Literal,
        sources: Sources,
    },
    /// Function call: name(arg, ...)
    FunctionCall {
        name: String,
        args: Vec<String>,
        sources: Sources,
    },
    /// Logical AND / OR
    Logical {
        op: LogicalOp,
        left: Box<Condition>,
        right: Box<Condition>,
    },
    /// Logical NOT
    Not(Box<Condition>),
    /// Opaque expression text, including the literals `true` and `false`
    Raw {
        expression: String,
        sources: Sources,
    },
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// ==
    Eq,
    /// !=
    NotEq,
    /// <
    Lt,
    /// <=
    Lte,
    /// >
    Gt,
    /// >=
    Gte,
}

/// Logical connectives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

/// Literal values in comparisons
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}

impl CompareOp {
    /// The operator producing the exact complement of this one.
    ///
    /// Ordering operators have none: the expression language coerces
    /// mismatched types to NaN, where both `a < b` and `a >= b` are false.
    pub fn negated(self) -> Option<CompareOp> {
        match self {
            CompareOp::Eq => Some(CompareOp::NotEq),
            CompareOp::NotEq => Some(CompareOp::Eq),
            _ => None,
        }
    }
}

impl LogicalOp {
    /// Operator token as written in expressions
    pub fn token(self) -> &'static str {
        match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
        }
    }

    fn other(self) -> LogicalOp {
        match self {
            LogicalOp::And => LogicalOp::Or,
            LogicalOp::Or => LogicalOp::And,
        }
    }
}

impl Condition {
    /// Opaque expression with no tracked sources
    pub fn raw(expression: impl Into<String>) -> Self {
        Self::Raw {
            expression: expression.into(),
            sources: Sources::new(),
        }
    }

    /// Opaque expression referencing the given sources
    pub fn raw_with_sources(expression: impl Into<String>, sources: Sources) -> Self {
        Self::Raw {
            expression: expression.into(),
            sources,
        }
    }

    /// The literal `true` or `false`
    pub fn literal(value: bool) -> Self {
        Self::raw(if value { "true" } else { "false" })
    }

    /// `left op right`
    pub fn compare(
        left: impl Into<String>,
        op: CompareOp,
        right: impl Into<Literal>,
        sources: Sources,
    ) -> Self {
        Self::Comparison {
            left: left.into(),
            op,
            right: right.into(),
            sources,
        }
    }

    /// `name(args...)`, arguments already rendered
    pub fn call(name: impl Into<String>, args: Vec<String>, sources: Sources) -> Self {
        Self::FunctionCall {
            name: name.into(),
            args,
            sources,
        }
    }

    /// AND of all conditions, `None` when there are none
    pub fn all_of<I>(conditions: I) -> Option<Condition>
    where
        I: IntoIterator<Item = Condition>,
    {
        conditions.into_iter().reduce(|acc, next| acc.and(&next))
    }

    /// OR of all conditions, `None` when there are none
    pub fn any_of<I>(conditions: I) -> Option<Condition>
    where
        I: IntoIterator<Item = Condition>,
    {
        conditions.into_iter().reduce(|acc, next| acc.or(&next))
    }

    /// Entities referenced anywhere in this expression
    pub fn sources(&self) -> Sources {
        match self {
            Condition::Comparison { sources, .. }
            | Condition::FunctionCall { sources, .. }
            | Condition::Raw { sources, .. } => sources.clone(),
            Condition::Logical { left, right, .. } => {
                let mut sources = left.sources();
                sources.extend(right.sources());
                sources
            }
            Condition::Not(inner) => inner.sources(),
        }
    }

    /// Whether any referenced source is a step
    pub fn references_step(&self) -> bool {
        self.sources().iter().any(ExpressionSource::is_step)
    }

    /// A condition may be pushed onto a dependency only if it does not read
    /// step outputs; those must flow forward, never backward.
    pub fn is_propagatable(&self) -> bool {
        !self.references_step()
    }

    pub fn is_literal_true(&self) -> bool {
        matches!(self, Condition::Raw { expression, .. } if expression.trim() == "true")
    }

    pub fn is_literal_false(&self) -> bool {
        matches!(self, Condition::Raw { expression, .. } if expression.trim() == "false")
    }

    /// `self && other`
    pub fn and(&self, other: &Condition) -> Condition {
        if self.is_literal_true() {
            return other.clone();
        }
        if other.is_literal_true() {
            return self.clone();
        }
        if self.is_literal_false() || other.is_literal_false() {
            return self.collapse_with(other, false);
        }
        Condition::Logical {
            op: LogicalOp::And,
            left: Box::new(self.clone()),
            right: Box::new(other.clone()),
        }
    }

    /// `self || other`
    pub fn or(&self, other: &Condition) -> Condition {
        if self.is_literal_true() || other.is_literal_true() {
            return self.collapse_with(other, true);
        }
        if self.is_literal_false() {
            return other.clone();
        }
        if other.is_literal_false() {
            return self.clone();
        }
        Condition::Logical {
            op: LogicalOp::Or,
            left: Box::new(self.clone()),
            right: Box::new(other.clone()),
        }
    }

    /// `!self`, flipping comparisons instead of wrapping them
    pub fn not(&self) -> Condition {
        match self {
            Condition::Comparison {
                left,
                op,
                right,
                sources,
            } => match op.negated() {
                Some(flipped) => Condition::Comparison {
                    left: left.clone(),
                    op: flipped,
                    right: right.clone(),
                    sources: sources.clone(),
                },
                None => Condition::Not(Box::new(self.clone())),
            },
            Condition::Not(inner) => (**inner).clone(),
            Condition::Raw { sources, .. } if self.is_literal_true() => {
                Condition::raw_with_sources("false", sources.clone())
            }
            Condition::Raw { sources, .. } if self.is_literal_false() => {
                Condition::raw_with_sources("true", sources.clone())
            }
            _ => Condition::Not(Box::new(self.clone())),
        }
    }

    fn collapse_with(&self, other: &Condition, value: bool) -> Condition {
        let mut sources = self.sources();
        sources.extend(other.sources());
        Condition::raw_with_sources(if value { "true" } else { "false" }, sources)
    }

    /// Operands of a top-level `&&` chain (the condition itself otherwise)
    pub fn flatten_and(&self) -> Vec<Condition> {
        let mut operands = Vec::new();
        self.collect_operands(LogicalOp::And, &mut operands);
        operands
    }

    /// Operands of a top-level `||` chain (the condition itself otherwise)
    pub fn flatten_or(&self) -> Vec<Condition> {
        let mut operands = Vec::new();
        self.collect_operands(LogicalOp::Or, &mut operands);
        operands
    }

    /// AND-operands used as the unit of comparison when simplifying
    pub fn and_terms(&self) -> Vec<Condition> {
        self.flatten_and()
    }

    fn collect_operands(&self, wanted: LogicalOp, out: &mut Vec<Condition>) {
        match self {
            Condition::Logical { op, left, right } if *op == wanted => {
                left.collect_operands(wanted, out);
                right.collect_operands(wanted, out);
            }
            _ => out.push(self.clone()),
        }
    }

    /// Rebuild with repeated AND-operands removed: `A && B && A` → `A && B`
    pub fn dedup_and_terms(&self) -> Condition {
        let mut seen = Vec::new();
        let mut kept = Vec::new();
        for term in self.flatten_and() {
            let key = term.to_expression();
            if !seen.contains(&key) {
                seen.push(key);
                kept.push(term);
            }
        }
        Condition::all_of(kept).unwrap_or_else(|| self.clone())
    }

    /// Whether `self` and `other` can never both be true or both be false
    pub fn is_complement_of(&self, other: &Condition) -> bool {
        if let (
            Condition::Comparison {
                left: l1,
                op: o1,
                right: r1,
                ..
            },
            Condition::Comparison {
                left: l2,
                op: o2,
                right: r2,
                ..
            },
        ) = (self, other)
        {
            return l1 == l2 && r1 == r2 && o1.negated() == Some(*o2);
        }

        let (mine, theirs) = (self.to_expression(), other.to_expression());
        if let Condition::Not(inner) = self {
            if inner.to_expression() == theirs {
                return true;
            }
        }
        if let Condition::Not(inner) = other {
            if inner.to_expression() == mine {
                return true;
            }
        }
        is_negated_text(&mine, &theirs) || is_negated_text(&theirs, &mine)
    }

    /// Canonical expression text with minimal parentheses
    pub fn to_expression(&self) -> String {
        match self {
            Condition::Comparison {
                left, op, right, ..
            } => format!("{} {} {}", left, op, right),
            Condition::FunctionCall { name, args, .. } => {
                format!("{}({})", name, args.join(", "))
            }
            Condition::Raw { expression, .. } => expression.clone(),
            Condition::Not(inner) => {
                let text = inner.to_expression();
                if inner.needs_parens_under_not() {
                    format!("!({})", text)
                } else {
                    format!("!{}", text)
                }
            }
            Condition::Logical { op, left, right } => format!(
                "{} {} {}",
                left.render_operand(*op),
                op.token(),
                right.render_operand(*op)
            ),
        }
    }

    fn render_operand(&self, parent: LogicalOp) -> String {
        let text = self.to_expression();
        let wrap = match self {
            Condition::Logical { op, .. } => *op != parent,
            Condition::Raw { expression, .. } => expression.contains(parent.other().token()),
            _ => false,
        };
        if wrap {
            format!("({})", text)
        } else {
            text
        }
    }

    fn needs_parens_under_not(&self) -> bool {
        match self {
            Condition::Comparison { .. } | Condition::Logical { .. } => true,
            Condition::Raw { expression, .. } => ["&&", "||", "==", "!=", "<", ">"]
                .iter()
                .any(|token| expression.contains(token)),
            _ => false,
        }
    }
}

fn is_negated_text(negated: &str, base: &str) -> bool {
    match negated.strip_prefix('!') {
        Some(rest) => {
            rest == base
                || rest
                    .strip_prefix('(')
                    .and_then(|r| r.strip_suffix(')'))
                    .is_some_and(|inner| inner == base)
        }
        None => false,
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_expression())
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::NotEq => write!(f, "!="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::String(s)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Boolean(b)
    }
}

impl From<i64> for Literal {
    fn from(n: i64) -> Self {
        Literal::Number(n as f64)
    }
}

impl From<f64> for Literal {
    fn from(n: f64) -> Self {
        Literal::Number(n)
    }
}
