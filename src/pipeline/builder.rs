// SPDX-License-Identifier: MIT

//! Pipeline builder - turns definitions into jobs and steps
//!
//! Reusable steps are built once and shared, so a library step used in two
//! jobs is the same step in both. An `if` on a job item or a group becomes a
//! reference condition; the `if` of a reusable action step is its own.
//!
//! Items are built lazily and memoized, so `depends_on`, `after` and
//! `steps.<id>` references may point forward.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::{DefinitionError, PipewrightError};
use crate::pipeline::expression::{self, Condition, Unscoped};
use crate::pipeline::job::{Job, JobConfig};
use crate::pipeline::loader::WorkflowLoader;
use crate::pipeline::step::{Step, StepBuilder, StepConfig, StepLike};
use crate::pipeline::types::{JobDefinition, StepDefinition, WorkflowDefinition};
use crate::pipeline::workflow::{Workflow, WorkflowConfig};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Scope {
    Library(String),
    Job(usize),
}

/// Position of a step definition: its scope plus child indices
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ItemKey {
    scope: Scope,
    path: Vec<usize>,
}

impl ItemKey {
    fn library(name: &str) -> Self {
        Self {
            scope: Scope::Library(name.to_string()),
            path: Vec::new(),
        }
    }

    fn job(job: usize, position: usize) -> Self {
        Self {
            scope: Scope::Job(job),
            path: vec![position],
        }
    }

    fn child(&self, index: usize) -> Self {
        let mut path = self.path.clone();
        path.push(index);
        Self {
            scope: self.scope.clone(),
            path,
        }
    }

    fn is_library_root(&self) -> bool {
        matches!(self.scope, Scope::Library(_)) && self.path.is_empty()
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Library(name) => write!(f, "{}", name)?,
            Scope::Job(job) => write!(f, "jobs[{}]", job)?,
        }
        for index in &self.path {
            write!(f, ".steps[{}]", index)?;
        }
        Ok(())
    }
}

/// High-level builder for constructing workflows from YAML definitions
pub struct Builder<'a> {
    def: &'a WorkflowDefinition,
    bases: HashMap<ItemKey, Step>,
    /// Bases under construction, for cycle detection
    building: Vec<ItemKey>,
    /// Items under construction, for cycle detection
    expanding: Vec<ItemKey>,
    job_ids: Vec<HashMap<String, ItemKey>>,
    library_ids: HashMap<String, ItemKey>,
}

impl<'a> Builder<'a> {
    pub fn new(def: &'a WorkflowDefinition) -> Self {
        let mut library_ids = HashMap::new();
        for (name, step) in &def.steps {
            let key = ItemKey::library(name);
            library_ids.insert(name.clone(), key.clone());
            if let Some(id) = &step.id {
                library_ids.entry(id.clone()).or_insert_with(|| key.clone());
            }
            if let Some(children) = &step.steps {
                index_items(children, &key, def, &mut library_ids);
            }
        }

        let job_ids = def
            .jobs
            .iter()
            .enumerate()
            .map(|(j, (_, job))| {
                let mut ids = HashMap::new();
                let root = ItemKey {
                    scope: Scope::Job(j),
                    path: Vec::new(),
                };
                index_items(&job.steps, &root, def, &mut ids);
                ids
            })
            .collect();

        Self {
            def,
            bases: HashMap::new(),
            building: Vec::new(),
            expanding: Vec::new(),
            job_ids,
            library_ids,
        }
    }

    /// Load a definition file and build its workflow
    pub fn build_file<P: AsRef<Path>>(path: P) -> Result<Workflow, PipewrightError> {
        let def = WorkflowLoader::new().load_workflow(path)?;
        Builder::new(&def).build()
    }

    /// Build the workflow described by the definition
    pub fn build(mut self) -> Result<Workflow, PipewrightError> {
        let def = self.def;
        let mut workflow = Workflow::new().with_config(WorkflowConfig {
            name: def.name.clone(),
            on: def.on.clone(),
            permissions: def.permissions.clone(),
            env: def.env.clone(),
            concurrency: def.concurrency.clone(),
            defaults: def.defaults.clone(),
        });

        for (j, (id, job_def)) in def.jobs.iter().enumerate() {
            let mut job = Job::new(id).with_config(job_config(job_def)?);
            for need in job_def.needs.names() {
                if def.job(need).is_none() {
                    return Err(DefinitionError::UnknownJob(need.to_string()).into());
                }
                job = job.with_needs(need);
            }
            for position in 0..job_def.steps.len() {
                job = job.with_step(self.item(&ItemKey::job(j, position))?);
            }
            for (name, text) in &job_def.outputs {
                let scope = self.expression_scope(text, &Scope::Job(j), None)?;
                job = job.with_output(name, expression::parse_value(text, &scope)?);
            }

            log::debug!("Built job '{}' with {} items", id, job_def.steps.len());
            workflow = workflow.with_job(job);
        }

        log::info!(
            "Built workflow '{}' with {} jobs",
            def.name.as_deref().unwrap_or("unnamed"),
            def.jobs.len()
        );
        Ok(workflow)
    }

    fn def_at(&self, key: &ItemKey) -> Result<&'a StepDefinition, DefinitionError> {
        let def = self.def;
        let missing = || DefinitionError::UnknownStep(key.to_string());
        let (mut current, rest) = match &key.scope {
            Scope::Library(name) => (
                def.library_step(name)
                    .ok_or_else(|| DefinitionError::UnknownStep(name.clone()))?,
                key.path.as_slice(),
            ),
            Scope::Job(j) => {
                let (first, rest) = key.path.split_first().ok_or_else(missing)?;
                let job = def.jobs.get(*j).ok_or_else(missing)?;
                (job.1.steps.get(*first).ok_or_else(missing)?, rest)
            }
        };
        for &index in rest {
            current = current
                .steps
                .as_ref()
                .and_then(|children| children.get(index))
                .ok_or_else(missing)?;
        }
        Ok(current)
    }

    fn label(&self, key: &ItemKey) -> String {
        self.def_at(key)
            .ok()
            .and_then(StepDefinition::label)
            .map(str::to_string)
            .unwrap_or_else(|| key.to_string())
    }

    fn cycle(&self, stack: &[ItemKey], key: &ItemKey) -> Option<DefinitionError> {
        let start = stack.iter().position(|k| k == key)?;
        let mut path: Vec<String> = stack[start..].iter().map(|k| self.label(k)).collect();
        path.push(self.label(key));
        Some(DefinitionError::CircularDefinition(path))
    }

    /// The step a definition builds, without reference conditions or edges
    fn base(&mut self, key: &ItemKey) -> Result<Step, PipewrightError> {
        if let Some(step) = self.bases.get(key) {
            return Ok(step.clone());
        }
        if let Some(err) = self.cycle(&self.building, key) {
            return Err(err.into());
        }

        let def = self.def_at(key)?;
        self.building.push(key.clone());
        let result = self.build_base(key, def);
        self.building.pop();

        let step = result?;
        self.bases.insert(key.clone(), step.clone());
        Ok(step)
    }

    fn build_base(&mut self, key: &ItemKey, def: &StepDefinition) -> Result<Step, PipewrightError> {
        if let Some(name) = &def.step {
            return self.base(&self.library_key(name)?);
        }

        if let Some(children) = &def.steps {
            let mut items = Vec::with_capacity(children.len());
            for index in 0..children.len() {
                items.push(self.item(&key.child(index))?);
            }
            let mut builder = StepBuilder::composite(def.name.clone(), items);
            if let Some(id) = &def.id {
                builder = builder.id(id);
            }
            for output in &def.outputs {
                builder = builder.output(output);
            }
            return Ok(builder.build()?);
        }

        let mut config = StepConfig {
            name: def.name.clone(),
            uses: def.uses.clone(),
            run: def.run.clone(),
            with: def.with.clone(),
            env: def.env.clone(),
            shell: def.shell.clone(),
            working_directory: def.working_directory.clone(),
            continue_on_error: def.continue_on_error,
            timeout_minutes: def.timeout_minutes,
            condition: None,
            extra: def.extra.clone(),
        };
        if key.is_library_root() {
            if let Some(text) = &def.condition {
                config.condition = Some(self.condition(text, key)?);
            }
        }

        let mut builder = StepBuilder::new(config);
        if let Some(id) = &def.id {
            builder = builder.id(id);
        }
        for output in &def.outputs {
            builder = builder.output(output);
        }
        for reference in def.needs_steps.names() {
            let target = self.cross_job_key(reference)?;
            builder = builder.cross_job_dep(self.base(&target)?);
        }
        Ok(builder.build()?)
    }

    /// The step a definition places in its job or group, with its condition and edges
    fn item(&mut self, key: &ItemKey) -> Result<StepLike, PipewrightError> {
        if let Some(err) = self.cycle(&self.expanding, key) {
            return Err(err.into());
        }

        let def = self.def_at(key)?;
        self.expanding.push(key.clone());
        let result = self.build_item(key, def);
        self.expanding.pop();
        result
    }

    fn build_item(
        &mut self,
        key: &ItemKey,
        def: &StepDefinition,
    ) -> Result<StepLike, PipewrightError> {
        let mut item: StepLike = match &def.step {
            Some(name) => self.item(&self.library_key(name)?)?,
            None => self.base(key)?.into(),
        };

        let own_if = key.is_library_root() && def.step.is_none() && def.steps.is_none();
        if let (Some(text), false) = (&def.condition, own_if) {
            item = item.when(self.condition(text, key)?).into();
        }
        for name in def.depends_on.names() {
            let dependency = self.dependency(name, &key.scope)?;
            item = item.depends_on(dependency).into();
        }
        for name in def.after.names() {
            let target = self.lookup(name, &key.scope)?;
            item = item.comes_after(self.base(&target)?).into();
        }
        Ok(item)
    }

    fn library_key(&self, name: &str) -> Result<ItemKey, DefinitionError> {
        match self.def.library_step(name) {
            Some(_) => Ok(ItemKey::library(name)),
            None => Err(DefinitionError::UnknownStep(name.to_string())),
        }
    }

    /// Step ids in the job first, then reusable step names and ids
    fn find(&self, name: &str, scope: &Scope) -> Option<ItemKey> {
        let local = match scope {
            Scope::Job(j) => self.job_ids.get(*j).and_then(|ids| ids.get(name)),
            Scope::Library(_) => None,
        };
        local.or_else(|| self.library_ids.get(name)).cloned()
    }

    fn lookup(&self, name: &str, scope: &Scope) -> Result<ItemKey, DefinitionError> {
        self.find(name, scope)
            .ok_or_else(|| DefinitionError::UnknownStep(name.to_string()))
    }

    /// A reusable step comes with its own condition and edges; a step in the
    /// job is already placed there and is depended on as is
    fn dependency(&mut self, name: &str, scope: &Scope) -> Result<StepLike, PipewrightError> {
        let key = self.lookup(name, scope)?;
        if key.is_library_root() {
            self.item(&key)
        } else {
            Ok(self.base(&key)?.into())
        }
    }

    fn cross_job_key(&self, reference: &str) -> Result<ItemKey, DefinitionError> {
        let (job, id) = reference
            .split_once('.')
            .ok_or_else(|| DefinitionError::InvalidCrossJobRef(reference.to_string()))?;
        let index = self
            .def
            .jobs
            .iter()
            .position(|(name, _)| name == job)
            .ok_or_else(|| DefinitionError::UnknownJob(job.to_string()))?;
        let ids = &self.job_ids[index];
        ids.get(id)
            .cloned()
            .ok_or_else(|| DefinitionError::UnknownStep(reference.to_string()))
    }

    fn condition(&mut self, text: &str, key: &ItemKey) -> Result<Condition, PipewrightError> {
        let scope = self.expression_scope(text, &key.scope, Some(key))?;
        Ok(expression::parse(text, &scope)?)
    }

    /// Steps read through `steps.<id>`, keyed by id
    fn expression_scope(
        &mut self,
        text: &str,
        scope: &Scope,
        current: Option<&ItemKey>,
    ) -> Result<HashMap<String, Step>, PipewrightError> {
        let mut steps = HashMap::new();
        for id in expression::referenced_step_ids(text) {
            match self.find(&id, scope) {
                Some(target) if Some(&target) == current => {}
                Some(target) => {
                    let step = self.base(&target)?;
                    steps.insert(id, step);
                }
                None => log::warn!("Expression '{}' reads unknown step '{}'", text, id),
            }
        }
        Ok(steps)
    }
}

fn index_items(
    steps: &[StepDefinition],
    parent: &ItemKey,
    def: &WorkflowDefinition,
    ids: &mut HashMap<String, ItemKey>,
) {
    for (index, step) in steps.iter().enumerate() {
        let key = parent.child(index);
        let id = step.id.clone().or_else(|| {
            step.step
                .as_deref()
                .and_then(|name| def.library_step(name))
                .and_then(|library| library.id.clone())
        });
        if let Some(id) = id {
            ids.entry(id).or_insert_with(|| key.clone());
        }
        if let Some(children) = &step.steps {
            index_items(children, &key, def, ids);
        }
    }
}

fn job_config(def: &JobDefinition) -> Result<JobConfig, PipewrightError> {
    let condition = match &def.condition {
        Some(text) => Some(expression::parse(text, &Unscoped)?),
        None => None,
    };
    Ok(JobConfig {
        name: def.name.clone(),
        runs_on: def.runs_on.clone(),
        condition,
        permissions: def.permissions.clone(),
        environment: def.environment.clone(),
        strategy: def.strategy.clone(),
        services: def.services.clone(),
        container: def.container.clone(),
        env: def.env.clone(),
        timeout_minutes: def.timeout_minutes,
        extra: def.extra.clone(),
    })
}
