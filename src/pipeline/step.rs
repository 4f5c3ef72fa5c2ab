// SPDX-License-Identifier: MIT

//! Steps, step references and composite groups
//!
//! A [`Step`] is immutable and cheap to clone. Adding a condition or an edge
//! never touches the step itself: [`Step::when`], [`Step::depends_on`] and
//! [`Step::comes_after`] return a [`StepRef`] wrapping it, so one step can be
//! reused across jobs with different conditions.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use crate::error::GraphError;
use crate::pipeline::expression::{Condition, ExpressionSource, ExpressionValue};

static NEXT_STEP_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-wide identity of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepKey(u64);

impl StepKey {
    fn next() -> Self {
        StepKey(NEXT_STEP_KEY.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step-{}", self.0)
    }
}

/// Everything the renderer needs to emit an action step
#[derive(Debug, Clone, Default)]
pub struct StepConfig {
    pub name: Option<String>,
    pub uses: Option<String>,
    pub run: Option<String>,
    pub with: Mapping,
    pub env: Mapping,
    pub shell: Option<String>,
    pub working_directory: Option<String>,
    pub continue_on_error: Option<bool>,
    pub timeout_minutes: Option<u64>,
    /// The step's own `if`
    pub condition: Option<Condition>,
    /// Pass-through fields emitted verbatim
    pub extra: Mapping,
}

impl StepConfig {
    /// Step running a shell command
    pub fn run(command: impl Into<String>) -> Self {
        Self {
            run: Some(command.into()),
            ..Default::default()
        }
    }

    /// Step invoking an action
    pub fn uses(action: impl Into<String>) -> Self {
        Self {
            uses: Some(action.into()),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with.insert(Value::String(key.into()), value.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.env.insert(Value::String(key.into()), value.into());
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn continue_on_error(mut self, value: bool) -> Self {
        self.continue_on_error = Some(value);
        self
    }

    pub fn timeout_minutes(mut self, minutes: u64) -> Self {
        self.timeout_minutes = Some(minutes);
        self
    }

    /// Set the intrinsic `if`, AND'ed with any existing one
    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => existing.and(&condition),
            None => condition,
        });
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(Value::String(key.into()), value.into());
        self
    }
}

/// What a step does
#[derive(Debug, Clone)]
pub enum StepBody {
    /// A single action or command
    Action(StepConfig),
    /// A group flattened into its children
    Composite {
        name: Option<String>,
        children: Vec<StepLike>,
    },
}

#[derive(Debug)]
struct StepInner {
    key: StepKey,
    id: Option<String>,
    body: StepBody,
    outputs: Vec<String>,
    cross_job_deps: Vec<Step>,
}

/// A unit of work. Equality, hashing and ordering go by identity.
#[derive(Clone)]
pub struct Step {
    inner: Arc<StepInner>,
}

impl Step {
    /// Anonymous action step
    pub fn new(config: StepConfig) -> Self {
        Self::from_parts(None, StepBody::Action(config), Vec::new(), Vec::new())
    }

    /// Action step with an explicit id
    pub fn with_id(id: impl Into<String>, config: StepConfig) -> Self {
        Self::from_parts(
            Some(id.into()),
            StepBody::Action(config),
            Vec::new(),
            Vec::new(),
        )
    }

    /// Group of steps that flattens into its children
    pub fn composite(children: Vec<StepLike>) -> Self {
        Self::from_parts(
            None,
            StepBody::Composite {
                name: None,
                children,
            },
            Vec::new(),
            Vec::new(),
        )
    }

    pub fn named_composite(name: impl Into<String>, children: Vec<StepLike>) -> Self {
        Self::from_parts(
            None,
            StepBody::Composite {
                name: Some(name.into()),
                children,
            },
            Vec::new(),
            Vec::new(),
        )
    }

    fn from_parts(
        id: Option<String>,
        body: StepBody,
        outputs: Vec<String>,
        cross_job_deps: Vec<Step>,
    ) -> Self {
        Self {
            inner: Arc::new(StepInner {
                key: StepKey::next(),
                id,
                body,
                outputs,
                cross_job_deps,
            }),
        }
    }

    pub fn key(&self) -> StepKey {
        self.inner.key
    }

    pub fn id(&self) -> Option<&str> {
        self.inner.id.as_deref()
    }

    pub fn body(&self) -> &StepBody {
        &self.inner.body
    }

    /// Config of an action step
    pub fn config(&self) -> Option<&StepConfig> {
        match &self.inner.body {
            StepBody::Action(config) => Some(config),
            StepBody::Composite { .. } => None,
        }
    }

    /// Children of a composite step
    pub fn children(&self) -> &[StepLike] {
        match &self.inner.body {
            StepBody::Composite { children, .. } => children,
            StepBody::Action(_) => &[],
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.inner.body, StepBody::Composite { .. })
    }

    /// The step's own `if`, never set on composites
    pub fn intrinsic_condition(&self) -> Option<&Condition> {
        self.config().and_then(|config| config.condition.as_ref())
    }

    pub fn outputs(&self) -> &[String] {
        &self.inner.outputs
    }

    /// Steps in other jobs whose artifacts this step consumes
    pub fn cross_job_deps(&self) -> &[Step] {
        &self.inner.cross_job_deps
    }

    /// `steps.<id>.outputs.<name>`, if the output is declared
    pub fn output(&self, name: &str) -> Option<ExpressionValue> {
        let id = self.id()?;
        if !self.inner.outputs.iter().any(|o| o == name) {
            return None;
        }
        let expression = format!("steps.{}.outputs.{}", id, name);
        Some(ExpressionValue::from_source(expression, self.source()))
    }

    /// `steps.<id>.outcome`
    pub fn outcome(&self) -> Option<ExpressionValue> {
        let id = self.id()?;
        let expression = format!("steps.{}.outcome", id);
        Some(ExpressionValue::from_source(expression, self.source()))
    }

    pub fn source(&self) -> ExpressionSource {
        ExpressionSource::Step(self.clone())
    }

    /// Human-readable label: name, then uses-reference, then id
    pub fn label(&self) -> String {
        let (name, uses) = match &self.inner.body {
            StepBody::Action(config) => (config.name.as_deref(), config.uses.as_deref()),
            StepBody::Composite { name, .. } => (name.as_deref(), None),
        };
        name.or(uses)
            .or(self.id())
            .map(str::to_string)
            .unwrap_or_else(|| self.key().to_string())
    }

    /// The action steps this step flattens to, in declaration order
    pub fn leaf_steps(&self) -> Vec<Step> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves(&self, out: &mut Vec<Step>) {
        match &self.inner.body {
            StepBody::Action(_) => {
                if !out.contains(self) {
                    out.push(self.clone());
                }
            }
            StepBody::Composite { children, .. } => {
                for child in children {
                    child.step().collect_leaves(out);
                }
            }
        }
    }

    /// Reference to this step that only runs when `condition` holds
    pub fn when(&self, condition: Condition) -> StepRef {
        StepRef::new(self.clone()).when(condition)
    }

    /// Reference to this step that pulls in and runs after `dependency`
    pub fn depends_on(&self, dependency: impl Into<StepLike>) -> StepRef {
        StepRef::new(self.clone()).depends_on(dependency)
    }

    /// Reference to this step ordered after `other` if it is present
    pub fn comes_after(&self, other: impl Into<StepLike>) -> StepRef {
        StepRef::new(self.clone()).comes_after(other)
    }
}

impl PartialEq for Step {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Step {}

impl Hash for Step {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Step {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Step {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step({} {:?})", self.key(), self.label())
    }
}

/// Builder for steps with ids, outputs or cross-job dependencies
#[derive(Debug, Clone)]
pub struct StepBuilder {
    id: Option<String>,
    body: StepBody,
    outputs: Vec<String>,
    cross_job_deps: Vec<Step>,
}

impl StepBuilder {
    pub fn new(config: StepConfig) -> Self {
        Self {
            id: None,
            body: StepBody::Action(config),
            outputs: Vec::new(),
            cross_job_deps: Vec::new(),
        }
    }

    pub fn composite(name: Option<String>, children: Vec<StepLike>) -> Self {
        Self {
            id: None,
            body: StepBody::Composite { name, children },
            outputs: Vec::new(),
            cross_job_deps: Vec::new(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.outputs.contains(&name) {
            self.outputs.push(name);
        }
        self
    }

    pub fn cross_job_dep(mut self, step: Step) -> Self {
        if !self.cross_job_deps.contains(&step) {
            self.cross_job_deps.push(step);
        }
        self
    }

    /// Fails when outputs are declared without an id
    pub fn build(self) -> Result<Step, GraphError> {
        if !self.outputs.is_empty() && self.id.is_none() {
            return Err(GraphError::MissingStepId {
                outputs: self.outputs,
            });
        }
        let step = Step::from_parts(self.id, self.body, self.outputs, self.cross_job_deps);
        Ok(step)
    }
}

/// A step plus a condition and edges, without touching the step itself
#[derive(Debug, Clone)]
pub struct StepRef {
    step: Step,
    condition: Option<Condition>,
    dependencies: Vec<StepLike>,
    after_dependencies: Vec<StepLike>,
}

impl StepRef {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            condition: None,
            dependencies: Vec::new(),
            after_dependencies: Vec::new(),
        }
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub fn dependencies(&self) -> &[StepLike] {
        &self.dependencies
    }

    pub fn after_dependencies(&self) -> &[StepLike] {
        &self.after_dependencies
    }

    /// Repeated calls AND the conditions together
    pub fn when(&self, condition: Condition) -> StepRef {
        let mut next = self.clone();
        next.condition = Some(match &self.condition {
            Some(existing) => existing.and(&condition),
            None => condition,
        });
        next
    }

    pub fn depends_on(&self, dependency: impl Into<StepLike>) -> StepRef {
        let mut next = self.clone();
        next.dependencies.push(dependency.into());
        next
    }

    pub fn comes_after(&self, other: impl Into<StepLike>) -> StepRef {
        let mut next = self.clone();
        next.after_dependencies.push(other.into());
        next
    }
}

/// Anything that can be placed in a job or a composite
#[derive(Debug, Clone)]
pub enum StepLike {
    Step(Step),
    Ref(StepRef),
}

impl StepLike {
    pub fn step(&self) -> &Step {
        match self {
            StepLike::Step(step) => step,
            StepLike::Ref(step_ref) => step_ref.step(),
        }
    }

    pub fn key(&self) -> StepKey {
        self.step().key()
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            StepLike::Step(_) => None,
            StepLike::Ref(step_ref) => step_ref.condition(),
        }
    }

    pub fn dependencies(&self) -> &[StepLike] {
        match self {
            StepLike::Step(_) => &[],
            StepLike::Ref(step_ref) => step_ref.dependencies(),
        }
    }

    pub fn after_dependencies(&self) -> &[StepLike] {
        match self {
            StepLike::Step(_) => &[],
            StepLike::Ref(step_ref) => step_ref.after_dependencies(),
        }
    }

    fn to_ref(&self) -> StepRef {
        match self {
            StepLike::Step(step) => StepRef::new(step.clone()),
            StepLike::Ref(step_ref) => step_ref.clone(),
        }
    }

    pub fn when(&self, condition: Condition) -> StepRef {
        self.to_ref().when(condition)
    }

    pub fn depends_on(&self, dependency: impl Into<StepLike>) -> StepRef {
        self.to_ref().depends_on(dependency)
    }

    pub fn comes_after(&self, other: impl Into<StepLike>) -> StepRef {
        self.to_ref().comes_after(other)
    }
}

impl From<Step> for StepLike {
    fn from(step: Step) -> Self {
        StepLike::Step(step)
    }
}

impl From<&Step> for StepLike {
    fn from(step: &Step) -> Self {
        StepLike::Step(step.clone())
    }
}

impl From<StepRef> for StepLike {
    fn from(step_ref: StepRef) -> Self {
        StepLike::Ref(step_ref)
    }
}

impl From<&StepRef> for StepLike {
    fn from(step_ref: &StepRef) -> Self {
        StepLike::Ref(step_ref.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::expression::ExpressionValue;

    #[test]
    fn test_outputs_require_id() {
        let err = StepBuilder::new(StepConfig::run("echo hi"))
            .output("version")
            .build()
            .unwrap_err();
        let outputs = vec!["version".to_string()];
        assert_eq!(err, GraphError::MissingStepId { outputs });
    }

    #[test]
    fn test_output_expression() {
        let step = StepBuilder::new(StepConfig::run("echo hi"))
            .id("meta")
            .output("version")
            .build()
            .unwrap();
        let version = step.output("version").unwrap();
        assert_eq!(version.expression(), "steps.meta.outputs.version");
        assert!(version.sources().contains(&step.source()));
        assert!(step.output("missing").is_none());
    }

    #[test]
    fn test_identity_is_per_instance() {
        let a = Step::new(StepConfig::run("make"));
        let b = Step::new(StepConfig::run("make"));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert!(a.key() < b.key());
    }

    #[test]
    fn test_label_preference() {
        let checkout = StepConfig::uses("actions/checkout@v4").name("Checkout");
        let named = Step::with_id("build", checkout);
        assert_eq!(named.label(), "Checkout");
        let uses = Step::with_id("build", StepConfig::uses("actions/checkout@v4"));
        assert_eq!(uses.label(), "actions/checkout@v4");
        let id_only = Step::with_id("build", StepConfig::run("make"));
        assert_eq!(id_only.label(), "build");
        let anonymous = Step::new(StepConfig::run("make"));
        assert_eq!(anonymous.label(), anonymous.key().to_string());
    }

    #[test]
    fn test_refs_do_not_mutate_step() {
        let setup = Step::new(StepConfig::run("setup"));
        let test = Step::new(StepConfig::run("test"));
        let conditional = test
            .when(ExpressionValue::new("matrix.os").equals("linux"))
            .depends_on(&setup);

        assert_eq!(conditional.step(), &test);
        assert_eq!(conditional.dependencies().len(), 1);
        assert!(conditional.condition().is_some());

        let plain = StepLike::from(&test);
        assert!(plain.condition().is_none());
        assert!(plain.dependencies().is_empty());
    }

    #[test]
    fn test_repeated_when_is_conjunction() {
        let step = Step::new(StepConfig::run("deploy"));
        let step_ref = step
            .when(ExpressionValue::new("matrix.os").equals("linux"))
            .when(ExpressionValue::new("github.ref").equals("refs/heads/main"));
        let expected = "matrix.os == 'linux' && github.ref == 'refs/heads/main'";
        assert_eq!(
            step_ref.condition().map(|c| c.to_expression()),
            Some(expected.to_string())
        );
    }

    #[test]
    fn test_leaf_steps_of_nested_composite() {
        let a = Step::new(StepConfig::run("a"));
        let b = Step::new(StepConfig::run("b"));
        let c = Step::new(StepConfig::run("c"));
        let inner = Step::composite(vec![b.clone().into(), a.clone().into()]);
        let children = vec![a.clone().into(), inner.into(), c.clone().into()];
        let outer = Step::named_composite("all", children);
        assert_eq!(outer.leaf_steps(), vec![a, b, c]);
        assert_eq!(outer.label(), "all");
    }

    #[test]
    fn test_config_builder() {
        let config = StepConfig::uses("actions/setup-node@v4")
            .name("Setup node")
            .with_input("node-version", "20")
            .env("CI", true)
            .timeout_minutes(5);
        assert_eq!(config.with.len(), 1);
        assert_eq!(config.env.get("CI"), Some(&Value::Bool(true)));
        assert_eq!(config.timeout_minutes, Some(5));
    }
}
