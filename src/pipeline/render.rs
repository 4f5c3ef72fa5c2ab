// SPDX-License-Identifier: MIT

//! Rendering of resolved workflows into workflow documents
//!
//! Keys are emitted in a fixed order; YAML text formatting is left to
//! `serde_yaml`.

use serde_yaml::{Mapping, Value};

use crate::error::PipewrightError;
use crate::pipeline::expression::Condition;
use crate::pipeline::job::{Job, ResolvedJob, ResolvedStep};
use crate::pipeline::workflow::{ResolvedWorkflow, Workflow};

/// Build the document for a resolved workflow
pub fn to_document(workflow: &Workflow, resolved: &ResolvedWorkflow) -> Value {
    let config = workflow.config();
    let mut document = Mapping::new();
    insert(&mut document, "name", string(&config.name));
    insert(&mut document, "on", config.on.clone());
    insert(&mut document, "permissions", config.permissions.clone());
    insert_mapping(&mut document, "env", &config.env);
    insert(&mut document, "concurrency", config.concurrency.clone());
    insert(&mut document, "defaults", config.defaults.clone());

    let mut jobs = Mapping::new();
    for resolved_job in &resolved.jobs {
        if let Some(job) = workflow.job(&resolved_job.id) {
            jobs.insert(key(&resolved_job.id), render_job(job, resolved_job));
        }
    }
    document.insert(key("jobs"), Value::Mapping(jobs));
    Value::Mapping(document)
}

/// Resolve a workflow and render it as YAML text
pub fn to_yaml_string(workflow: &Workflow) -> Result<String, PipewrightError> {
    let resolved = workflow.resolve()?;
    let document = to_document(workflow, &resolved);
    Ok(serde_yaml::to_string(&document)?)
}

fn render_job(job: &Job, resolved: &ResolvedJob) -> Value {
    let config = job.config();
    let mut map = Mapping::new();
    insert(&mut map, "name", string(&config.name));
    insert(&mut map, "runs-on", config.runs_on.clone());
    let needs = match resolved.needs.as_slice() {
        [] => None,
        [only] => Some(Value::String(only.clone())),
        many => {
            let names = many.iter().cloned().map(Value::String).collect();
            Some(Value::Sequence(names))
        }
    };
    insert(&mut map, "needs", needs);
    insert(&mut map, "if", condition(config.condition.as_ref()));
    insert(&mut map, "permissions", config.permissions.clone());
    insert(&mut map, "environment", config.environment.clone());
    insert(&mut map, "strategy", config.strategy.clone());
    insert(&mut map, "services", config.services.clone());
    insert(&mut map, "container", config.container.clone());
    insert_mapping(&mut map, "env", &config.env);
    insert(
        &mut map,
        "timeout-minutes",
        config.timeout_minutes.map(Value::from),
    );

    if !job.outputs().is_empty() {
        let outputs: Mapping = job
            .outputs()
            .iter()
            .map(|(name, value)| (key(name), Value::String(value.to_template())))
            .collect();
        map.insert(key("outputs"), Value::Mapping(outputs));
    }
    extend(&mut map, &config.extra);

    let steps: Vec<Value> = resolved.steps.iter().map(render_step).collect();
    map.insert(key("steps"), Value::Sequence(steps));
    Value::Mapping(map)
}

fn render_step(resolved: &ResolvedStep) -> Value {
    let step = &resolved.step;
    let mut map = Mapping::new();
    insert(&mut map, "id", step.id().map(Value::from));

    let Some(config) = step.config() else {
        return Value::Mapping(map);
    };
    insert(&mut map, "name", string(&config.name));
    insert(&mut map, "if", condition(resolved.condition.as_ref()));
    insert(&mut map, "uses", string(&config.uses));
    insert_mapping(&mut map, "with", &config.with);
    insert(&mut map, "run", string(&config.run));
    insert(&mut map, "shell", string(&config.shell));
    insert(
        &mut map,
        "working-directory",
        string(&config.working_directory),
    );
    insert_mapping(&mut map, "env", &config.env);
    insert(
        &mut map,
        "continue-on-error",
        config.continue_on_error.map(Value::Bool),
    );
    insert(
        &mut map,
        "timeout-minutes",
        config.timeout_minutes.map(Value::from),
    );
    extend(&mut map, &config.extra);
    Value::Mapping(map)
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn string(value: &Option<String>) -> Option<Value> {
    value.clone().map(Value::String)
}

fn condition(value: Option<&Condition>) -> Option<Value> {
    value.map(|c| Value::String(c.to_expression()))
}

fn insert(map: &mut Mapping, name: &str, value: Option<Value>) {
    if let Some(value) = value {
        map.insert(key(name), value);
    }
}

fn insert_mapping(map: &mut Mapping, name: &str, value: &Mapping) {
    if !value.is_empty() {
        map.insert(key(name), Value::Mapping(value.clone()));
    }
}

/// Pass-through fields, never overriding rendered ones
fn extend(map: &mut Mapping, extra: &Mapping) {
    for (key, value) in extra {
        if !map.contains_key(key) {
            map.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::expression::ExpressionValue;
    use crate::pipeline::job::JobConfig;
    use crate::pipeline::step::{Step, StepBuilder, StepConfig};
    use crate::pipeline::workflow::WorkflowConfig;

    fn keys(value: &Value) -> Vec<String> {
        value
            .as_mapping()
            .unwrap()
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_document_layout() {
        let setup = Step::new(StepConfig::uses("actions/checkout@v4"));
        let test = Step::new(StepConfig::run("cargo test").name("Test"));
        let linux = ExpressionValue::new("matrix.os").equals("linux");
        let job = Job::new("test")
            .with_config(JobConfig::default().runs_on("ubuntu-latest"))
            .with_step(test.when(linux).depends_on(&setup));
        let workflow = Workflow::new()
            .with_config(WorkflowConfig {
                name: Some("CI".to_string()),
                on: Some(Value::from("push")),
                ..Default::default()
            })
            .with_job(job);

        let resolved = workflow.resolve().unwrap();
        let document = to_document(&workflow, &resolved);
        assert_eq!(keys(&document), vec!["name", "on", "jobs"]);

        let job = &document["jobs"]["test"];
        assert_eq!(keys(job), vec!["runs-on", "steps"]);
        let steps = job["steps"].as_sequence().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0]["uses"], Value::from("actions/checkout@v4"));
        assert_eq!(steps[0]["if"], Value::from("matrix.os == 'linux'"));
        assert_eq!(keys(&steps[1]), vec!["name", "if", "run"]);
    }

    #[test]
    fn test_needs_scalar_and_list() {
        let job = |id: &str| Job::new(id).with_step(Step::new(StepConfig::run(id)));
        let workflow = Workflow::new()
            .with_job(job("lint"))
            .with_job(job("build"))
            .with_job(job("deploy").with_needs("lint"))
            .with_job(job("release").with_needs("lint").with_needs("build"));

        let resolved = workflow.resolve().unwrap();
        let document = to_document(&workflow, &resolved);
        assert_eq!(document["jobs"]["deploy"]["needs"], Value::from("lint"));
        assert_eq!(
            document["jobs"]["release"]["needs"],
            Value::Sequence(vec![Value::from("lint"), Value::from("build")])
        );
        assert!(document["jobs"]["lint"].get("needs").is_none());
    }

    #[test]
    fn test_outputs_render_as_templates() {
        let meta = StepBuilder::new(StepConfig::run("./meta.sh"))
            .id("meta")
            .output("tag")
            .build()
            .unwrap();
        let job = Job::new("build")
            .with_step(meta.clone())
            .with_output("tag", meta.output("tag").unwrap());
        let workflow = Workflow::new().with_job(job);

        let resolved = workflow.resolve().unwrap();
        let document = to_document(&workflow, &resolved);
        assert_eq!(
            document["jobs"]["build"]["outputs"]["tag"],
            Value::from("${{ steps.meta.outputs.tag }}")
        );
        assert_eq!(
            document["jobs"]["build"]["steps"][0]["id"],
            Value::from("meta")
        );
    }

    #[test]
    fn test_yaml_string() {
        let job = Job::new("build")
            .with_config(JobConfig::default().runs_on("ubuntu-latest"))
            .with_step(Step::new(StepConfig::run("make")));
        let workflow = Workflow::new().with_job(job);
        let yaml = to_yaml_string(&workflow).unwrap();
        assert!(yaml.contains("runs-on: ubuntu-latest"));
        assert!(yaml.contains("- run: make"));
    }
}
