//! Condition expression parser
//!
//! Parses the expression syntax used in `if:` fields into [`Condition`]s so
//! the simplifier can reason about their structure:
//! - `matrix.os == 'linux'`
//! - `github.event_name != 'pull_request' && !cancelled()`
//! - `startsWith(github.ref, 'refs/tags/') || inputs.force`
//!
//! Operands the parser does not understand are kept verbatim as raw text.

use std::collections::HashMap;

use super::ast::{CompareOp, Condition, Literal, Sources};
use super::value::{ExpressionSource, ExpressionValue};
use crate::error::DefinitionError;
use crate::pipeline::step::Step;

/// Resolves `steps.<id>` references while parsing
pub trait SourceScope {
    /// The step declared with this id, if known
    fn step(&self, id: &str) -> Option<Step>;
}

impl SourceScope for HashMap<String, Step> {
    fn step(&self, id: &str) -> Option<Step> {
        self.get(id).cloned()
    }
}

/// Scope without steps. `needs.<job>` references still resolve to jobs.
pub struct Unscoped;

impl SourceScope for Unscoped {
    fn step(&self, _id: &str) -> Option<Step> {
        None
    }
}

/// Parse a condition expression, with or without the `${{ }}` wrapper
pub fn parse(input: &str, scope: &dyn SourceScope) -> Result<Condition, DefinitionError> {
    let body = strip_template(input);
    if body.is_empty() {
        return Err(invalid(input, "empty expression"));
    }
    if let Err(reason) = check_balanced(body) {
        return Err(invalid(input, reason));
    }
    Ok(parse_or(body, scope))
}

/// Parse a value expression such as a job output
pub fn parse_value(
    input: &str,
    scope: &dyn SourceScope,
) -> Result<ExpressionValue, DefinitionError> {
    let body = strip_template(input);
    if body.is_empty() {
        return Err(invalid(input, "empty expression"));
    }
    let sources = scan_sources(body, scope);
    Ok(ExpressionValue::with_sources(body, sources))
}

/// Step ids read through `steps.<id>` anywhere in the expression
pub fn referenced_step_ids(input: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for (root, name) in references(input) {
        if root == Root::Steps && !ids.iter().any(|id| id == name) {
            ids.push(name.to_string());
        }
    }
    ids
}

fn invalid(expression: &str, reason: &str) -> DefinitionError {
    DefinitionError::InvalidExpression {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

fn strip_template(input: &str) -> &str {
    let input = input.trim();
    input
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(input)
}

fn check_balanced(input: &str) -> Result<(), &'static str> {
    let mut depth = 0i32;
    let mut in_string = false;
    for c in input.bytes() {
        match c {
            b'\'' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced parentheses");
                }
            }
            _ => {}
        }
    }
    if in_string {
        return Err("unterminated string literal");
    }
    if depth != 0 {
        return Err("unbalanced parentheses");
    }
    Ok(())
}

fn parse_or(input: &str, scope: &dyn SourceScope) -> Condition {
    split_top_level(input, "||")
        .into_iter()
        .map(|part| parse_and(part.trim(), scope))
        .reduce(|acc, next| acc.or(&next))
        .unwrap_or_else(|| Condition::raw(input))
}

fn parse_and(input: &str, scope: &dyn SourceScope) -> Condition {
    split_top_level(input, "&&")
        .into_iter()
        .map(|part| parse_unary(part.trim(), scope))
        .reduce(|acc, next| acc.and(&next))
        .unwrap_or_else(|| Condition::raw(input))
}

fn parse_unary(input: &str, scope: &dyn SourceScope) -> Condition {
    let input = input.trim();

    if is_wrapped(input) {
        return parse_or(input[1..input.len() - 1].trim(), scope);
    }

    if let Some(rest) = input.strip_prefix('!') {
        let rest = rest.trim();
        if !rest.starts_with('=') && (is_wrapped(rest) || find_comparison(rest).is_none()) {
            return parse_unary(rest, scope).not();
        }
    }

    if let Some(condition) = parse_comparison(input, scope) {
        return condition;
    }
    if let Some(condition) = parse_call(input, scope) {
        return condition;
    }
    Condition::raw_with_sources(input, scan_sources(input, scope))
}

const OPERATORS: [(&str, CompareOp); 6] = [
    ("==", CompareOp::Eq),
    ("!=", CompareOp::NotEq),
    ("<=", CompareOp::Lte),
    (">=", CompareOp::Gte),
    ("<", CompareOp::Lt),
    (">", CompareOp::Gt),
];

fn find_comparison(input: &str) -> Option<(usize, &'static str, CompareOp)> {
    OPERATORS
        .iter()
        .find_map(|(token, op)| find_operator(input, token).map(|pos| (pos, *token, *op)))
}

fn parse_comparison(input: &str, scope: &dyn SourceScope) -> Option<Condition> {
    let (pos, token, op) = find_comparison(input)?;
    let left = input[..pos].trim();
    let right = input[pos + token.len()..].trim();
    if left.is_empty() || right.is_empty() {
        return None;
    }

    if let Some(literal) = parse_literal(right) {
        let sources = scan_sources(left, scope);
        return Some(Condition::compare(left, op, literal, sources));
    }
    // `'linux' == matrix.os` is normalised to `matrix.os == 'linux'`
    if let Some(literal) = parse_literal(left) {
        let mirrored = match op {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Lte => CompareOp::Gte,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Gte => CompareOp::Lte,
            other => other,
        };
        let sources = scan_sources(right, scope);
        return Some(Condition::compare(right, mirrored, literal, sources));
    }
    None
}

fn parse_call(input: &str, scope: &dyn SourceScope) -> Option<Condition> {
    let open = input.find('(')?;
    let name = &input[..open];
    if name.is_empty() || !name.bytes().all(is_ident_byte) {
        return None;
    }
    if !input.ends_with(')') || matching_paren(input, open) != Some(input.len() - 1) {
        return None;
    }

    let inner = input[open + 1..input.len() - 1].trim();
    let args: Vec<String> = if inner.is_empty() {
        Vec::new()
    } else {
        split_top_level(inner, ",")
            .into_iter()
            .map(|arg| arg.trim().to_string())
            .collect()
    };
    let mut sources = Sources::new();
    for arg in &args {
        sources.extend(scan_sources(arg, scope));
    }
    Some(Condition::call(name, args, sources))
}

fn parse_literal(input: &str) -> Option<Literal> {
    let input = input.trim();

    match input {
        "null" => return Some(Literal::Null),
        "true" => return Some(Literal::Boolean(true)),
        "false" => return Some(Literal::Boolean(false)),
        _ => {}
    }

    // Single-quoted string, quotes escaped by doubling
    if input.len() >= 2 && input.starts_with('\'') && input.ends_with('\'') {
        let inner = &input[1..input.len() - 1];
        if inner.replace("''", "").contains('\'') {
            return None;
        }
        return Some(Literal::String(inner.replace("''", "'")));
    }

    if input.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.') {
        if let Ok(n) = input.parse::<f64>() {
            return Some(Literal::Number(n));
        }
    }

    None
}

/// Split on `token` outside string literals and parentheses
fn split_top_level<'a>(input: &'a str, token: &str) -> Vec<&'a str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' {
            in_string = !in_string;
        } else if !in_string {
            if c == b'(' {
                depth += 1;
            } else if c == b')' {
                depth -= 1;
            } else if depth == 0 && bytes[i..].starts_with(token.as_bytes()) {
                parts.push(&input[start..i]);
                i += token.len();
                start = i;
                continue;
            }
        }
        i += 1;
    }
    parts.push(&input[start..]);
    parts
}

fn find_operator(input: &str, op: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;

    for i in 0..bytes.len() {
        let c = bytes[i];
        if c == b'\'' {
            in_string = !in_string;
        } else if !in_string {
            if c == b'(' {
                depth += 1;
            } else if c == b')' {
                depth -= 1;
            } else if depth == 0 && bytes[i..].starts_with(op.as_bytes()) {
                return Some(i);
            }
        }
    }
    None
}

fn matching_paren(input: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    for (i, c) in input.bytes().enumerate().skip(open) {
        match c {
            b'\'' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_wrapped(input: &str) -> bool {
    input.starts_with('(') && matching_paren(input, 0) == Some(input.len() - 1)
}

fn is_ident_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Steps,
    Needs,
}

/// `steps.<id>` and `needs.<job>` references outside string literals
fn references(input: &str) -> Vec<(Root, &str)> {
    let bytes = input.as_bytes();
    let mut found = Vec::new();
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\'' {
            in_string = !in_string;
            i += 1;
            continue;
        }
        let at_boundary = i == 0 || !(is_ident_byte(bytes[i - 1]) || bytes[i - 1] == b'.');
        if !in_string && at_boundary {
            if let Some((root, start, end)) = reference_at(bytes, i) {
                found.push((root, &input[start..end]));
                i = end;
                continue;
            }
        }
        i += 1;
    }
    found
}

fn reference_at(bytes: &[u8], at: usize) -> Option<(Root, usize, usize)> {
    let (root, prefix) = [(Root::Steps, "steps."), (Root::Needs, "needs.")]
        .into_iter()
        .find(|(_, prefix)| bytes[at..].starts_with(prefix.as_bytes()))?;
    let start = at + prefix.len();
    let mut end = start;
    while end < bytes.len() && (is_ident_byte(bytes[end]) || bytes[end] == b'-') {
        end += 1;
    }
    (end > start).then_some((root, start, end))
}

fn scan_sources(input: &str, scope: &dyn SourceScope) -> Sources {
    references(input)
        .into_iter()
        .filter_map(|(root, name)| match root {
            Root::Steps => scope.step(name).map(ExpressionSource::Step),
            Root::Needs => Some(ExpressionSource::Job(name.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::step::{Step, StepBuilder, StepConfig};

    fn parse_unscoped(input: &str) -> Condition {
        parse(input, &Unscoped).unwrap()
    }

    fn render(input: &str) -> String {
        parse_unscoped(input).to_expression()
    }

    #[test]
    fn test_parse_simple_equality() {
        let expr = parse_unscoped("matrix.os == 'linux'");
        assert_eq!(
            expr,
            Condition::compare("matrix.os", CompareOp::Eq, "linux", Sources::new())
        );
    }

    #[test]
    fn test_parse_not_equal() {
        let expr = parse_unscoped("github.event_name != 'pull_request'");
        assert_eq!(
            expr,
            Condition::compare(
                "github.event_name",
                CompareOp::NotEq,
                "pull_request",
                Sources::new(),
            )
        );
    }

    #[test]
    fn test_parse_numeric_comparison() {
        let expr = parse_unscoped("github.run_attempt >= 2");
        assert_eq!(
            expr,
            Condition::compare("github.run_attempt", CompareOp::Gte, 2_i64, Sources::new())
        );
    }

    #[test]
    fn test_parse_mirrored_comparison() {
        assert_eq!(render("'linux' == matrix.os"), "matrix.os == 'linux'");
        assert_eq!(render("1 < github.run_attempt"), "github.run_attempt > 1");
    }

    #[test]
    fn test_parse_and_or_precedence() {
        let expr = parse_unscoped("a == 'x' || b == 'y' && c == 'z'");
        assert_eq!(expr.flatten_or().len(), 2);
        assert_eq!(expr.to_expression(), "a == 'x' || (b == 'y' && c == 'z')");
    }

    #[test]
    fn test_parse_parentheses() {
        let expr = parse_unscoped("(a == 'x' || b == 'y') && c == 'z'");
        assert_eq!(expr.flatten_and().len(), 2);
        assert_eq!(expr.to_expression(), "(a == 'x' || b == 'y') && c == 'z'");
    }

    #[test]
    fn test_parse_negation() {
        assert_eq!(render("!(matrix.os == 'linux')"), "matrix.os != 'linux'");
        assert_eq!(render("!cancelled()"), "!cancelled()");
        assert_eq!(render("!inputs.dry_run"), "!inputs.dry_run");
    }

    #[test]
    fn test_parse_function_call() {
        let expr = parse_unscoped("startsWith(github.ref, 'refs/tags/')");
        match expr {
            Condition::FunctionCall { name, args, .. } => {
                assert_eq!(name, "startsWith");
                assert_eq!(args, vec!["github.ref", "'refs/tags/'"]);
            }
            other => panic!("Expected function call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_status_function() {
        let expr = parse_unscoped("success()");
        assert_eq!(expr, Condition::call("success", vec![], Sources::new()));
    }

    #[test]
    fn test_parse_template_wrapper() {
        assert_eq!(
            render("${{ matrix.os == 'linux' }}"),
            "matrix.os == 'linux'"
        );
    }

    #[test]
    fn test_parse_string_with_escaped_quote() {
        let expr = parse_unscoped("github.actor == 'o''brien'");
        assert_eq!(
            expr,
            Condition::compare("github.actor", CompareOp::Eq, "o'brien", Sources::new())
        );
    }

    #[test]
    fn test_parse_operator_inside_string_is_ignored() {
        let expr = parse_unscoped("github.head_ref == 'a && b'");
        assert_eq!(expr.flatten_and().len(), 1);
    }

    #[test]
    fn test_parse_raw_fallback() {
        let force = Condition::raw("inputs.force");
        assert_eq!(parse_unscoped("inputs.force"), force);
        assert_eq!(parse_unscoped("true"), Condition::raw("true"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse("(a == 'b'", &Unscoped).is_err());
        assert!(parse("a == 'b", &Unscoped).is_err());
        assert!(parse("   ", &Unscoped).is_err());
    }

    #[test]
    fn test_needs_reference_becomes_job_source() {
        let expr = parse_unscoped("needs.build.outputs.changed == 'true'");
        let sources = expr.sources();
        assert_eq!(sources.len(), 1);
        let job = sources.iter().next().and_then(|s| s.as_job());
        assert_eq!(job, Some("build"));
    }

    #[test]
    fn test_steps_reference_resolves_through_scope() {
        let step = StepBuilder::new(StepConfig::run("echo ok"))
            .id("detect")
            .output("changed")
            .build()
            .unwrap();
        let mut scope: HashMap<String, Step> = HashMap::new();
        scope.insert("detect".to_string(), step.clone());

        let expr = parse("steps.detect.outputs.changed == 'true'", &scope).unwrap();
        assert!(expr.references_step());
        assert_eq!(
            expr.sources().iter().next().and_then(|s| s.as_step()),
            Some(&step)
        );

        let unknown = parse("steps.other.outputs.changed == 'true'", &scope).unwrap();
        assert!(unknown.sources().is_empty());
    }

    #[test]
    fn test_referenced_step_ids() {
        let input = "steps.a.outputs.x == 'steps.fake' || steps.b-2.outcome || steps.a.outcome";
        let ids = referenced_step_ids(input);
        assert_eq!(ids, vec!["a".to_string(), "b-2".to_string()]);
        assert!(referenced_step_ids("mysteps.a.outputs.x").is_empty());
    }

    #[test]
    fn test_parse_value() {
        let value = parse_value("${{ needs.build.outputs.tag }}", &Unscoped).unwrap();
        assert_eq!(value.expression(), "needs.build.outputs.tag");
        assert_eq!(value.sources().len(), 1);
    }
}
