// SPDX-License-Identifier: MIT

//! YAML schema types for pipeline definitions
//!
//! This module contains the data structures a pipeline definition file is
//! parsed into before the builder turns it into steps and jobs.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::{Mapping, Value};

/// Top-level pipeline definition
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WorkflowDefinition {
    pub name: Option<String>,
    /// Trigger block, emitted verbatim
    pub on: Option<Value>,
    pub permissions: Option<Value>,
    #[serde(default)]
    pub env: Mapping,
    pub concurrency: Option<Value>,
    pub defaults: Option<Value>,
    /// Reusable steps, referenced from jobs with `step: <name>`
    #[serde(
        default,
        deserialize_with = "ordered_entries",
        serialize_with = "serialize_entries"
    )]
    pub steps: Vec<(String, StepDefinition)>,
    /// Jobs in declaration order
    #[serde(
        default,
        deserialize_with = "ordered_entries",
        serialize_with = "serialize_entries"
    )]
    pub jobs: Vec<(String, JobDefinition)>,
}

impl WorkflowDefinition {
    pub fn library_step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, def)| def)
    }

    pub fn job(&self, id: &str) -> Option<&JobDefinition> {
        self.jobs
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, def)| def)
    }
}

/// A job in a pipeline definition
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct JobDefinition {
    pub name: Option<String>,
    #[serde(alias = "runs_on")]
    pub runs_on: Option<Value>,
    /// Job-level condition
    #[serde(rename = "if")]
    pub condition: Option<String>,
    /// Explicit needs (single job id or list)
    #[serde(default)]
    pub needs: NameList,
    pub permissions: Option<Value>,
    pub environment: Option<Value>,
    pub strategy: Option<Value>,
    pub services: Option<Value>,
    pub container: Option<Value>,
    #[serde(default)]
    pub env: Mapping,
    #[serde(alias = "timeout_minutes")]
    pub timeout_minutes: Option<u64>,
    /// Output name to expression
    #[serde(
        default,
        deserialize_with = "ordered_entries",
        serialize_with = "serialize_entries"
    )]
    pub outputs: Vec<(String, String)>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    /// Any other job field, emitted verbatim
    #[serde(flatten)]
    pub extra: Mapping,
}

/// A step: an action, a group of steps, or a reference to a reusable step
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct StepDefinition {
    pub id: Option<String>,
    pub name: Option<String>,
    pub uses: Option<String>,
    pub run: Option<String>,
    #[serde(default)]
    pub with: Mapping,
    #[serde(default)]
    pub env: Mapping,
    pub shell: Option<String>,
    #[serde(alias = "working_directory")]
    pub working_directory: Option<String>,
    #[serde(alias = "continue_on_error")]
    pub continue_on_error: Option<bool>,
    #[serde(alias = "timeout_minutes")]
    pub timeout_minutes: Option<u64>,
    #[serde(rename = "if")]
    pub condition: Option<String>,
    /// Output names; requires `id`
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Steps to pull in and run first
    #[serde(default, rename = "depends_on", alias = "depends-on")]
    pub depends_on: NameList,
    /// Steps to run after, if the job has them anyway
    #[serde(default)]
    pub after: NameList,
    /// Steps in other jobs this one consumes, as `job.step-id`
    #[serde(default, rename = "needs_steps", alias = "needs-steps")]
    pub needs_steps: NameList,
    /// Children of a group
    pub steps: Option<Vec<StepDefinition>>,
    /// Name of a reusable step
    pub step: Option<String>,
    /// Any other step field, emitted verbatim
    #[serde(flatten)]
    pub extra: Mapping,
}

impl StepDefinition {
    /// Human-readable label for error messages
    pub fn label(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.name.as_deref())
            .or(self.step.as_deref())
            .or(self.uses.as_deref())
    }
}

/// One name or a list of names
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(untagged)]
pub enum NameList {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl NameList {
    pub fn names(&self) -> Vec<&str> {
        match self {
            NameList::None => Vec::new(),
            NameList::Single(name) => vec![name.as_str()],
            NameList::Multiple(names) => names.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }
}

/// Mapping entries in document order
fn ordered_entries<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let mapping = Option::<Mapping>::deserialize(deserializer)?;
    mapping
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let Some(key) = key.as_str().map(str::to_string) else {
                let message = format!("expected a string key, found {:?}", key);
                return Err(D::Error::custom(message));
            };
            let value = serde_yaml::from_value(value).map_err(D::Error::custom)?;
            Ok((key, value))
        })
        .collect()
}

fn serialize_entries<S, T>(entries: &[(String, T)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    serializer.collect_map(entries.iter().map(|(key, value)| (key, value)))
}
