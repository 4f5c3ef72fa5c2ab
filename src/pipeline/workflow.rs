// SPDX-License-Identifier: MIT

//! Workflows and cross-job `needs` inference
//!
//! Resolution runs in two phases: every job is resolved on its own, then
//! needs are inferred from what each resolved job reads from the others.

use std::collections::{BTreeSet, HashMap};

use serde_yaml::{Mapping, Value};

use crate::error::GraphError;
use crate::pipeline::expression::{Condition, ExpressionSource};
use crate::pipeline::job::{Job, ResolvedJob};
use crate::pipeline::step::{Step, StepKey};

/// Workflow-level settings, passed through to the document verbatim
#[derive(Debug, Clone, Default)]
pub struct WorkflowConfig {
    pub name: Option<String>,
    pub on: Option<Value>,
    pub permissions: Option<Value>,
    pub env: Mapping,
    pub concurrency: Option<Value>,
    pub defaults: Option<Value>,
}

/// Jobs in declaration order
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    config: WorkflowConfig,
    jobs: Vec<Job>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id() == id)
    }

    /// Resolve every job, then infer the needs between them
    pub fn resolve(&self) -> Result<ResolvedWorkflow, GraphError> {
        let mut resolved = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            resolved.push(job.resolve()?);
        }

        let mut owners: HashMap<StepKey, String> = HashMap::new();
        for job in &resolved {
            for step in &job.steps {
                owners
                    .entry(step.step.key())
                    .or_insert_with(|| job.id.clone());
            }
        }
        for job in &mut resolved {
            for step in &mut job.steps {
                if let Some(owner) = owners.get(&step.step.key()) {
                    step.job = owner.clone();
                }
            }
        }

        let inferred: Vec<Vec<String>> = self
            .jobs
            .iter()
            .zip(&resolved)
            .map(|(job, resolved_job)| self.infer_needs(job, resolved_job, &owners))
            .collect();
        for (resolved_job, needs) in resolved.iter_mut().zip(inferred) {
            for need in needs {
                if !resolved_job.needs.contains(&need) {
                    resolved_job.needs.push(need);
                }
            }
        }

        Ok(ResolvedWorkflow { jobs: resolved })
    }

    /// Jobs `job` reads from, in declaration order
    fn infer_needs(
        &self,
        job: &Job,
        resolved: &ResolvedJob,
        owners: &HashMap<StepKey, String>,
    ) -> Vec<String> {
        let mut referenced: BTreeSet<String> = BTreeSet::new();
        let mut note = |condition: &Condition| {
            referenced.extend(job_sources(condition.sources().iter()));
        };

        if let Some(condition) = &job.config().condition {
            note(condition);
        }
        for node in job.graph().nodes() {
            node.entry.contexts.iter().for_each(&mut note);
        }
        for step in &resolved.steps {
            if let Some(condition) = &step.condition {
                note(condition);
            }
            if let Some(condition) = step.step.intrinsic_condition() {
                note(condition);
            }
        }
        for (_, value) in job.outputs() {
            referenced.extend(job_sources(value.sources().iter()));
        }

        for step in &resolved.steps {
            for dependency in step.step.cross_job_deps().iter().flat_map(Step::leaf_steps) {
                match owners.get(&dependency.key()) {
                    Some(owner) => {
                        referenced.insert(owner.clone());
                    }
                    None => log::warn!(
                        "Step '{}' in job '{}' consumes '{}', which no job runs",
                        step.step.label(),
                        job.id(),
                        dependency.label()
                    ),
                }
            }
        }

        for name in &referenced {
            if self.job(name).is_none() {
                log::warn!("Job '{}' references unknown job '{}'", job.id(), name);
            }
        }

        let needs: Vec<String> = self
            .jobs
            .iter()
            .map(Job::id)
            .filter(|id| *id != job.id() && referenced.contains(*id))
            .map(str::to_string)
            .collect();
        if !needs.is_empty() {
            log::debug!("Job '{}' inferred needs: {}", job.id(), needs.join(", "));
        }
        needs
    }
}

fn job_sources<'a>(sources: impl Iterator<Item = &'a ExpressionSource>) -> Vec<String> {
    sources
        .filter_map(ExpressionSource::as_job)
        .map(str::to_string)
        .collect()
}

/// All jobs after resolution, in declaration order
#[derive(Debug, Clone)]
pub struct ResolvedWorkflow {
    pub jobs: Vec<ResolvedJob>,
}

impl ResolvedWorkflow {
    pub fn job(&self, id: &str) -> Option<&ResolvedJob> {
        self.jobs.iter().find(|job| job.id == id)
    }

    /// Job that runs `step`, the first one in declaration order
    pub fn owner(&self, step: &Step) -> Option<&str> {
        self.jobs
            .iter()
            .find(|job| job.step(step).is_some())
            .map(|job| job.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::expression::ExpressionValue;
    use crate::pipeline::job::JobConfig;
    use crate::pipeline::step::{StepBuilder, StepConfig};

    fn step(name: &str) -> Step {
        Step::new(StepConfig::run(format!("echo {}", name)).name(name))
    }

    #[test]
    fn test_needs_from_job_output_condition() {
        let build = Job::new("build")
            .with_step(step("compile"))
            .with_output("tag", ExpressionValue::new("steps.meta.outputs.tag"));
        let tag = build.output("tag").unwrap();
        let deploy = Job::new("deploy").with_step(step("ship").when(tag.not_equals("")));

        let resolved = Workflow::new()
            .with_job(build)
            .with_job(deploy)
            .resolve()
            .unwrap();
        assert!(resolved.job("build").unwrap().needs.is_empty());
        assert_eq!(
            resolved.job("deploy").unwrap().needs,
            vec!["build".to_string()]
        );
    }

    #[test]
    fn test_needs_from_job_level_if_and_outputs() {
        let lint = Job::new("lint").with_step(step("lint"));
        let build = Job::new("build")
            .with_step(step("compile"))
            .with_output("tag", ExpressionValue::new("steps.meta.outputs.tag"));
        let lint_passed = lint.result().equals("success");
        let release = Job::new("release")
            .with_config(JobConfig::default().condition(lint_passed))
            .with_output("tag", build.output("tag").unwrap())
            .with_step(step("publish"));

        let resolved = Workflow::new()
            .with_job(lint)
            .with_job(build)
            .with_job(release)
            .resolve()
            .unwrap();
        assert_eq!(
            resolved.job("release").unwrap().needs,
            vec!["lint".to_string(), "build".to_string()]
        );
    }

    #[test]
    fn test_needs_from_cross_job_artifacts() {
        let compile = step("compile");
        let upload = StepBuilder::new(StepConfig::run("upload"))
            .cross_job_dep(compile.clone())
            .build()
            .unwrap();
        let workflow = Workflow::new()
            .with_job(Job::new("test").with_step(upload))
            .with_job(Job::new("build").with_step(compile.clone()));

        let resolved = workflow.resolve().unwrap();
        assert_eq!(
            resolved.job("test").unwrap().needs,
            vec!["build".to_string()]
        );
        assert_eq!(resolved.owner(&compile), Some("build"));
    }

    #[test]
    fn test_explicit_needs_come_first_and_self_is_ignored() {
        let build = Job::new("build")
            .with_step(step("compile"))
            .with_output("tag", ExpressionValue::new("steps.meta.outputs.tag"));
        let tag = build.output("tag").unwrap();
        let lint = Job::new("lint").with_step(step("lint"));
        let own = ExpressionSource::Job("deploy".into());
        let own_result = ExpressionValue::from_source("needs.deploy.result", own);
        let deploy = Job::new("deploy")
            .with_needs("lint")
            .with_output("self", own_result)
            .with_step(step("ship").when(tag.equals("latest")));

        let resolved = Workflow::new()
            .with_job(build)
            .with_job(lint)
            .with_job(deploy)
            .resolve()
            .unwrap();
        assert_eq!(
            resolved.job("deploy").unwrap().needs,
            vec!["lint".to_string(), "build".to_string()]
        );
    }

    #[test]
    fn test_shared_step_is_owned_by_first_job() {
        let checkout = step("checkout");
        let workflow = Workflow::new()
            .with_job(Job::new("a").with_step(checkout.clone()))
            .with_job(Job::new("b").with_step(checkout.clone()));
        let resolved = workflow.resolve().unwrap();
        assert_eq!(resolved.job("b").unwrap().steps[0].job, "a");
        assert!(resolved.job("b").unwrap().needs.is_empty());
    }

    #[test]
    fn test_cycle_in_any_job_fails_workflow() {
        let a = step("A");
        let b = step("B");
        let bad = Job::new("bad").with_steps([a.comes_after(&b), b.comes_after(&a)]);
        let workflow = Workflow::new()
            .with_job(Job::new("ok").with_step(step("fine")))
            .with_job(bad);
        assert!(workflow.resolve().is_err());
    }
}
