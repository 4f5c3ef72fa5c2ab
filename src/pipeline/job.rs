// SPDX-License-Identifier: MIT

//! Jobs: ordered steps, outputs and explicit needs
//!
//! A job builds its step graph on first use and keeps it. Resolution reads
//! the cached graph and recomputes order and conditions every time.

use once_cell::sync::OnceCell;
use serde_yaml::{Mapping, Value};

use crate::error::GraphError;
use crate::pipeline::expression::{Condition, ExpressionSource, ExpressionValue};
use crate::pipeline::graph::{effective_conditions, normalize_to_graph, resolve_order, JobGraph};
use crate::pipeline::step::{Step, StepLike};

/// Job-level settings, passed through to the document verbatim
#[derive(Debug, Clone, Default)]
pub struct JobConfig {
    pub name: Option<String>,
    pub runs_on: Option<Value>,
    /// Job-level `if`
    pub condition: Option<Condition>,
    pub permissions: Option<Value>,
    pub environment: Option<Value>,
    pub strategy: Option<Value>,
    pub services: Option<Value>,
    pub container: Option<Value>,
    pub env: Mapping,
    pub timeout_minutes: Option<u64>,
    pub extra: Mapping,
}

impl JobConfig {
    pub fn runs_on(mut self, runner: impl Into<Value>) -> Self {
        self.runs_on = Some(runner.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn strategy(mut self, strategy: impl Into<Value>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.env.insert(Value::String(key.into()), value.into());
        self
    }

    pub fn timeout_minutes(mut self, minutes: u64) -> Self {
        self.timeout_minutes = Some(minutes);
        self
    }
}

/// A named container of steps
#[derive(Debug, Clone)]
pub struct Job {
    id: String,
    config: JobConfig,
    steps: Vec<StepLike>,
    outputs: Vec<(String, ExpressionValue)>,
    needs: Vec<String>,
    graph: OnceCell<JobGraph>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: JobConfig::default(),
            steps: Vec::new(),
            outputs: Vec::new(),
            needs: Vec::new(),
            graph: OnceCell::new(),
        }
    }

    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_step(mut self, step: impl Into<StepLike>) -> Self {
        self.steps.push(step.into());
        self.graph = OnceCell::new();
        self
    }

    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepLike>,
    {
        self.steps.extend(steps.into_iter().map(Into::into));
        self.graph = OnceCell::new();
        self
    }

    /// Declare a job output, replacing one with the same name
    pub fn with_output(mut self, name: impl Into<String>, value: ExpressionValue) -> Self {
        let name = name.into();
        self.outputs.retain(|(existing, _)| *existing != name);
        self.outputs.push((name, value));
        self
    }

    pub fn with_needs(mut self, job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        if !self.needs.contains(&job_id) {
            self.needs.push(job_id);
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn steps(&self) -> &[StepLike] {
        &self.steps
    }

    pub fn outputs(&self) -> &[(String, ExpressionValue)] {
        &self.outputs
    }

    /// Explicitly declared needs
    pub fn needs(&self) -> &[String] {
        &self.needs
    }

    pub fn source(&self) -> ExpressionSource {
        ExpressionSource::Job(self.id.clone())
    }

    /// `needs.<job>.outputs.<name>`, if the output is declared
    pub fn output(&self, name: &str) -> Option<ExpressionValue> {
        if !self.outputs.iter().any(|(existing, _)| existing == name) {
            return None;
        }
        let expression = format!("needs.{}.outputs.{}", self.id, name);
        Some(ExpressionValue::from_source(expression, self.source()))
    }

    /// `needs.<job>.result`
    pub fn result(&self) -> ExpressionValue {
        ExpressionValue::from_source(format!("needs.{}.result", self.id), self.source())
    }

    /// The flattened step graph, built on first use
    pub fn graph(&self) -> &JobGraph {
        self.graph.get_or_init(|| {
            log::debug!("Building step graph for job '{}'", self.id);
            normalize_to_graph(&self.steps)
        })
    }

    /// Order the job's steps and compute their effective conditions
    pub fn resolve(&self) -> Result<ResolvedJob, GraphError> {
        let graph = self.graph();
        let order = resolve_order(graph)?;
        let conditions = effective_conditions(graph, &order);

        let steps = order
            .iter()
            .zip(conditions)
            .filter_map(|(&key, condition)| {
                graph.node(key).map(|node| ResolvedStep {
                    step: node.step.clone(),
                    condition,
                    job: self.id.clone(),
                })
            })
            .collect::<Vec<_>>();

        log::debug!("Resolved job '{}' to {} steps", self.id, steps.len());
        Ok(ResolvedJob {
            id: self.id.clone(),
            needs: self.needs.clone(),
            steps,
        })
    }
}

/// A job after resolution
#[derive(Debug, Clone)]
pub struct ResolvedJob {
    pub id: String,
    /// Explicit needs first, then inferred ones once the workflow resolves
    pub needs: Vec<String>,
    pub steps: Vec<ResolvedStep>,
}

impl ResolvedJob {
    pub fn step(&self, step: &Step) -> Option<&ResolvedStep> {
        self.steps.iter().find(|resolved| resolved.step == *step)
    }
}

/// A step in its final position
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    pub step: Step,
    /// Effective condition, `None` when the step always runs
    pub condition: Option<Condition>,
    /// Owning job
    pub job: String,
}
