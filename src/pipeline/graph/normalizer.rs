//! Job flattening - converts nested steps, refs and composites to a graph
//!
//! The walk is top-down with an inherited context: the AND factors collected
//! from enclosing step references. Ordering-only edges are deferred until the
//! walk is done, then the steps read by conditions are pulled in to fixpoint.

use super::types::{DeclaredLeaf, JobGraph};
use crate::pipeline::expression::{simplify_or_conditions, Condition};
use crate::pipeline::step::{Step, StepBody, StepKey, StepLike};

/// Flatten a job's top-level items into its step graph
pub fn normalize_to_graph(items: &[StepLike]) -> JobGraph {
    let mut normalizer = Normalizer::default();
    for item in items {
        normalizer.declare(item);
        normalizer.visit(item, &[]);
    }
    normalizer.apply_after_edges();
    normalizer.close_over_sources();

    log::debug!(
        "Flattened {} top-level items into {} steps",
        items.len(),
        normalizer.graph.len()
    );
    normalizer.graph
}

#[derive(Default)]
struct Normalizer {
    graph: JobGraph,
    /// (dependent, target) pairs for ordering-only edges
    deferred_after: Vec<(Step, Step)>,
}

impl Normalizer {
    fn declare(&mut self, item: &StepLike) {
        let step = item.step();
        self.graph
            .roots
            .push(step.leaf_steps().iter().map(Step::key).collect());
        if step.is_composite() {
            return;
        }

        let condition = match (item.condition(), step.intrinsic_condition()) {
            (Some(declared), Some(own)) => Some(declared.and(own).dedup_and_terms()),
            (declared, own) => declared.or(own).cloned(),
        };
        match self.graph.leaves.iter().position(|l| l.key == step.key()) {
            // Declared twice: runs when either declaration would
            Some(i) => {
                let existing = &mut self.graph.leaves[i];
                existing.condition = match (existing.condition.take(), condition) {
                    (Some(a), Some(b)) => simplify_or_conditions(&[a, b]),
                    _ => None,
                };
            }
            None => self.graph.leaves.push(DeclaredLeaf {
                key: step.key(),
                condition,
            }),
        }
    }

    fn visit(&mut self, item: &StepLike, context: &[Condition]) {
        let step = item.step();
        let mut scope = context.to_vec();
        if let Some(condition) = item.condition() {
            scope.push(condition.clone());
        }

        match step.body() {
            StepBody::Action(_) => {
                let (i, _) = self.graph.ensure_node(step);
                let context = Condition::all_of(scope.iter().cloned());
                self.graph.nodes[i].entry.add_context(context);
            }
            StepBody::Composite { children, .. } => {
                for child in children {
                    self.visit(child, &scope);
                }
            }
        }

        if !item.dependencies().is_empty() {
            let dependency_scope = dependency_context(step, &scope);
            let dependents = step.leaf_steps();
            for dependency in item.dependencies() {
                self.visit(dependency, &dependency_scope);
                for target in dependency.step().leaf_steps() {
                    for dependent in &dependents {
                        self.add_dependency(dependent, target.key());
                    }
                }
            }
        }

        for after in item.after_dependencies() {
            for target in after.step().leaf_steps() {
                for dependent in step.leaf_steps() {
                    self.deferred_after.push((dependent, target.clone()));
                }
            }
        }
    }

    fn add_dependency(&mut self, dependent: &Step, target: StepKey) {
        if let Some(i) = self.graph.arena_index(dependent.key()) {
            self.graph.nodes[i].entry.add_dependency(target);
        }
    }

    fn apply_after_edges(&mut self) {
        for (dependent, target) in std::mem::take(&mut self.deferred_after) {
            let Some(i) = self.graph.arena_index(dependent.key()) else {
                continue;
            };
            if self.graph.contains(target.key()) {
                self.graph.nodes[i].entry.add_after_dependency(target.key());
            } else {
                log::debug!(
                    "Ordering constraint '{}' after '{}' dropped: target is not in the job",
                    dependent.label(),
                    target.label()
                );
            }
        }
    }

    /// Pull in every step a collected condition reads, until nothing changes
    fn close_over_sources(&mut self) {
        loop {
            let mut changed = false;
            let mut i = 0;
            while i < self.graph.nodes.len() {
                for source in self.referenced_steps(i) {
                    let (j, added) = self.graph.ensure_node(&source);
                    if added {
                        log::debug!(
                            "Pulled in '{}', read by the condition of '{}'",
                            source.label(),
                            self.graph.nodes[i].step.label()
                        );
                        self.graph.nodes[j].entry.unconditional = true;
                    }
                    if self.graph.nodes[i].entry.add_dependency(source.key()) {
                        changed = true;
                    }
                }
                i += 1;
            }
            if !changed {
                break;
            }
        }
    }

    fn referenced_steps(&self, i: usize) -> Vec<Step> {
        let node = &self.graph.nodes[i];
        let mut referenced: Vec<Step> = Vec::new();
        let own = node.step.intrinsic_condition();
        let conditions = node.entry.contexts.iter().chain(own);
        for condition in conditions {
            for source in condition.sources() {
                let Some(step) = source.as_step() else {
                    continue;
                };
                for leaf in step.leaf_steps() {
                    if leaf != node.step && !referenced.contains(&leaf) {
                        referenced.push(leaf);
                    }
                }
            }
        }
        referenced
    }
}

/// Context handed to the dependencies of `step`
///
/// Only propagatable factors survive. When every direct child of a composite
/// is conditional, their simplified disjunction is added as a factor.
fn dependency_context(step: &Step, scope: &[Condition]) -> Vec<Condition> {
    let mut factors: Vec<Condition> = scope
        .iter()
        .flat_map(Condition::and_terms)
        .filter(Condition::is_propagatable)
        .collect();

    let children = step.children();
    if !children.is_empty() {
        let conditions: Option<Vec<Condition>> = children
            .iter()
            .map(|child| child.condition().filter(|c| c.is_propagatable()).cloned())
            .collect();
        if let Some(alternatives) = conditions.and_then(|c| simplify_or_conditions(&c)) {
            factors.push(alternatives);
        }
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::expression::ExpressionValue;
    use crate::pipeline::step::{StepBuilder, StepConfig};

    fn step(name: &str) -> Step {
        Step::new(StepConfig::run(format!("echo {}", name)).name(name))
    }

    fn matrix(key: &str, value: &str) -> Condition {
        let name = format!("matrix.{}", key);
        ExpressionValue::new(name).equals(value)
    }

    #[test]
    fn test_dependencies_are_pulled_in() {
        let setup = step("setup");
        let test = step("test");
        let graph = normalize_to_graph(&[test.depends_on(&setup).into()]);

        assert_eq!(graph.len(), 2);
        assert_eq!(
            graph.entry(test.key()).unwrap().dependencies,
            vec![setup.key()]
        );
        assert_eq!(graph.leaves().len(), 1);
        assert_eq!(graph.leaves()[0].key, test.key());
    }

    #[test]
    fn test_ordering_only_edge_never_pulls_in() {
        let lint = step("lint");
        let test = step("test");
        let graph = normalize_to_graph(&[test.comes_after(&lint).into()]);

        assert_eq!(graph.len(), 1);
        let entry = graph.entry(test.key()).unwrap();
        assert!(entry.after_dependencies.is_empty());
    }

    #[test]
    fn test_ordering_only_edge_applies_when_present() {
        let lint = step("lint");
        let test = step("test");
        let graph = normalize_to_graph(&[
            test.comes_after(&lint).into(),
            lint.clone().into(),
        ]);

        assert_eq!(graph.len(), 2);
        assert_eq!(
            graph.entry(test.key()).unwrap().after_dependencies,
            vec![lint.key()]
        );
    }

    #[test]
    fn test_contexts_accumulate_per_encounter() {
        let setup = step("setup");
        let test = step("test");
        let bench = step("bench");
        let graph = normalize_to_graph(&[
            test.when(matrix("job", "test")).depends_on(&setup).into(),
            bench.when(matrix("job", "bench")).depends_on(&setup).into(),
        ]);

        let entry = graph.entry(setup.key()).unwrap();
        assert!(!entry.unconditional);
        let rendered: Vec<String> = entry.contexts.iter().map(|c| c.to_expression()).collect();
        assert_eq!(
            rendered,
            vec!["matrix.job == 'test'", "matrix.job == 'bench'"]
        );
    }

    #[test]
    fn test_unconditional_encounter_dominates() {
        let setup = step("setup");
        let test = step("test");
        let graph = normalize_to_graph(&[
            test.when(matrix("job", "test")).depends_on(&setup).into(),
            setup.clone().into(),
        ]);
        assert!(graph.entry(setup.key()).unwrap().unconditional);
    }

    #[test]
    fn test_composite_children_inherit_context() {
        let a = step("a");
        let b = step("b");
        let group = Step::named_composite("group", vec![a.clone().into(), b.clone().into()]);
        let graph = normalize_to_graph(&[group.when(matrix("os", "linux")).into()]);

        assert_eq!(graph.len(), 2);
        assert!(graph.leaves().is_empty());
        for key in [a.key(), b.key()] {
            let entry = graph.entry(key).unwrap();
            assert_eq!(entry.contexts.len(), 1);
            assert_eq!(entry.contexts[0].to_expression(), "matrix.os == 'linux'");
        }
    }

    #[test]
    fn test_composite_dependency_gets_children_disjunction() {
        let setup = step("setup");
        let test = step("test");
        let bench = step("bench");
        let group = Step::composite(vec![
            test.when(matrix("job", "test")).into(),
            bench.when(matrix("job", "bench")).into(),
        ]);
        let graph = normalize_to_graph(&[group.depends_on(&setup).into()]);

        let entry = graph.entry(setup.key()).unwrap();
        assert_eq!(entry.contexts.len(), 1);
        assert_eq!(
            entry.contexts[0].to_expression(),
            "matrix.job == 'test' || matrix.job == 'bench'"
        );
        for key in [test.key(), bench.key()] {
            assert_eq!(graph.entry(key).unwrap().dependencies, vec![setup.key()]);
        }
    }

    #[test]
    fn test_step_output_conditions_do_not_propagate_to_dependencies() {
        let detect = StepBuilder::new(StepConfig::run("detect"))
            .id("detect")
            .output("changed")
            .build()
            .unwrap();
        let setup = step("setup");
        let deploy = step("deploy");
        let changed = detect.output("changed").unwrap().equals("true");
        let graph = normalize_to_graph(&[
            detect.clone().into(),
            deploy.when(changed).depends_on(&setup).into(),
        ]);

        assert!(graph.entry(setup.key()).unwrap().unconditional);
    }

    #[test]
    fn test_condition_sources_are_closed_over() {
        let detect = StepBuilder::new(StepConfig::run("detect"))
            .id("detect")
            .output("changed")
            .build()
            .unwrap();
        let changed = detect.output("changed").unwrap().equals("true");
        let deploy = step("deploy");
        let graph = normalize_to_graph(&[deploy.when(changed).into()]);

        assert_eq!(graph.len(), 2);
        assert!(graph.entry(detect.key()).unwrap().unconditional);
        assert_eq!(
            graph.entry(deploy.key()).unwrap().dependencies,
            vec![detect.key()]
        );
    }

    #[test]
    fn test_source_closure_cascades() {
        let first = StepBuilder::new(StepConfig::run("first"))
            .id("first")
            .output("ok")
            .build()
            .unwrap();
        let first_ok = first.output("ok").unwrap().equals("true");
        let second = StepBuilder::new(StepConfig::run("second").condition(first_ok))
            .id("second")
            .output("ok")
            .build()
            .unwrap();
        let third = step("third");
        let second_ok = second.output("ok").unwrap().equals("true");
        let graph = normalize_to_graph(&[third.when(second_ok).into()]);

        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.entry(second.key()).unwrap().dependencies,
            vec![first.key()]
        );
    }

    #[test]
    fn test_declared_leaf_condition_includes_intrinsic_if() {
        let on_main = ExpressionValue::new("github.ref").equals("refs/heads/main");
        let deploy = Step::new(StepConfig::run("deploy").condition(on_main));
        let graph = normalize_to_graph(&[deploy.when(matrix("os", "linux")).into()]);
        let leaf = graph.leaf(deploy.key()).unwrap();
        let expected = "matrix.os == 'linux' && github.ref == 'refs/heads/main'";
        assert_eq!(
            leaf.condition.as_ref().map(|c| c.to_expression()),
            Some(expected.to_string())
        );
    }
}
