//! Simplification of OR'd condition sets
//!
//! When several dependents each need a step under different circumstances,
//! the step runs if any of them does. The disjunction is reduced with a fixed
//! pipeline of rewrites; the pipeline order defines the output shape.

use std::collections::HashSet;

use super::ast::Condition;

/// One OR-term: a conjunction with AND-operands deduplicated by rendering
#[derive(Debug, Clone)]
struct Conjunction {
    operands: Vec<Condition>,
    keys: Vec<String>,
}

impl Conjunction {
    fn new(condition: &Condition) -> Self {
        Self::from_operands(condition.and_terms())
    }

    fn from_operands(operands: Vec<Condition>) -> Self {
        let mut conjunction = Self {
            operands: Vec::new(),
            keys: Vec::new(),
        };
        for operand in operands {
            let key = operand.to_expression();
            if !conjunction.keys.contains(&key) {
                conjunction.keys.push(key);
                conjunction.operands.push(operand);
            }
        }
        conjunction
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    fn is_subset_of(&self, other: &Conjunction) -> bool {
        self.keys.iter().all(|k| other.contains(k))
    }

    /// Operands shared with `other`, then the ones only this term has
    fn split_by(&self, other: &Conjunction) -> (Vec<Condition>, Vec<Condition>) {
        let mut shared = Vec::new();
        let mut unique = Vec::new();
        for (operand, key) in self.operands.iter().zip(&self.keys) {
            if other.contains(key) {
                shared.push(operand.clone());
            } else {
                unique.push(operand.clone());
            }
        }
        (shared, unique)
    }

    /// Strictly fewer operands, all of them shared
    fn absorbs(&self, other: &Conjunction) -> bool {
        self.len() < other.len() && self.is_subset_of(other)
    }

    fn same_operands(&self, other: &Conjunction) -> bool {
        self.len() == other.len() && self.is_subset_of(other)
    }

    fn to_condition(&self) -> Option<Condition> {
        Condition::all_of(self.operands.iter().cloned())
    }
}

/// Reduce OR'd conditions to an equivalent (or wider, never narrower) one.
///
/// `None` means no condition at all: the disjunction is always true.
///
/// The result is not a canonical form. Terms no rewrite applies to keep
/// their input order, so `[a, b]` and `[b, a]` render differently.
pub fn simplify_or_conditions(conditions: &[Condition]) -> Option<Condition> {
    let mut seen = HashSet::new();
    let unique: Vec<&Condition> = conditions
        .iter()
        .filter(|c| seen.insert(c.to_expression()))
        .collect();

    match unique.as_slice() {
        [] => return None,
        [only] if only.is_literal_true() => return None,
        [only] => return Some((*only).clone()),
        _ => {}
    }

    let mut terms = Vec::new();
    for condition in unique {
        for term in condition.flatten_or() {
            if term.is_literal_true() {
                return None;
            }
            if !term.is_literal_false() {
                terms.push(Conjunction::new(&term));
            }
        }
    }
    if terms.is_empty() {
        return Some(Condition::literal(false));
    }

    if !eliminate_complements(&mut terms) {
        log::trace!("Complementary terms cover every case");
        return None;
    }
    dedup_terms(&mut terms);
    absorb(&mut terms);

    if let [only] = terms.as_slice() {
        return only.to_condition();
    }
    if let Some(factored) = extract_common_factors(&terms) {
        return Some(factored);
    }
    Condition::any_of(terms.iter().filter_map(Conjunction::to_condition))
}

/// Merge term pairs whose differing operands complement each other until
/// none remain: a lone operand on one side must negate the AND of the other
/// side's. Returns `false` when a merge leaves no operands (a tautology).
fn eliminate_complements(terms: &mut Vec<Conjunction>) -> bool {
    while let Some((i, j, merged)) = find_complementary_pair(terms) {
        if merged.operands.is_empty() {
            return false;
        }
        log::trace!(
            "Merged complementary terms into '{}'",
            merged.keys.join(" && ")
        );
        terms.remove(j);
        let replacement: Vec<Conjunction> = match merged.operands.as_slice() {
            [single] => single.flatten_or().iter().map(Conjunction::new).collect(),
            _ => vec![merged],
        };
        terms.splice(i..=i, replacement);
    }
    true
}

fn find_complementary_pair(terms: &[Conjunction]) -> Option<(usize, usize, Conjunction)> {
    for i in 0..terms.len() {
        for j in (i + 1)..terms.len() {
            let (shared, only_a) = terms[i].split_by(&terms[j]);
            let (_, only_b) = terms[j].split_by(&terms[i]);
            if negates(&only_a, &only_b) || negates(&only_b, &only_a) {
                return Some((i, j, Conjunction::from_operands(shared)));
            }
        }
    }
    None
}

/// `single` is one operand that negates the AND of `others`
fn negates(single: &[Condition], others: &[Condition]) -> bool {
    let ([operand], Some(rest)) = (single, Condition::all_of(others.iter().cloned())) else {
        return false;
    };
    operand.is_complement_of(&rest)
}

fn dedup_terms(terms: &mut Vec<Conjunction>) {
    let mut kept: Vec<Conjunction> = Vec::with_capacity(terms.len());
    for term in terms.drain(..) {
        if !kept.iter().any(|k| k.same_operands(&term)) {
            kept.push(term);
        }
    }
    *terms = kept;
}

/// `A || (A && B)` → `A`
fn absorb(terms: &mut Vec<Conjunction>) {
    let n = terms.len();
    let absorbed: Vec<bool> = (0..n)
        .map(|j| (0..n).any(|i| i != j && terms[i].absorbs(&terms[j])))
        .collect();
    let mut index = 0;
    terms.retain(|_| {
        let keep = !absorbed[index];
        index += 1;
        keep
    });
}

/// `(A && B) || (A && C)` → `A && (B || C)`
fn extract_common_factors(terms: &[Conjunction]) -> Option<Condition> {
    let first = terms.first()?;
    let common: Vec<usize> = (0..first.len())
        .filter(|&k| terms[1..].iter().all(|t| t.contains(&first.keys[k])))
        .collect();
    if common.is_empty() {
        return None;
    }

    let common_keys: Vec<&str> = common.iter().map(|&k| first.keys[k].as_str()).collect();
    let factor = Condition::all_of(common.iter().map(|&k| first.operands[k].clone()))?;

    let mut remainders = Vec::with_capacity(terms.len());
    for term in terms {
        let rest: Vec<Condition> = term
            .operands
            .iter()
            .zip(&term.keys)
            .filter(|(_, key)| !common_keys.contains(&key.as_str()))
            .map(|(operand, _)| operand.clone())
            .collect();
        match Condition::all_of(rest) {
            Some(remainder) => remainders.push(remainder),
            None => return Some(factor),
        }
    }

    let alternatives = Condition::any_of(remainders)?;
    Some(factor.and(&alternatives))
}
