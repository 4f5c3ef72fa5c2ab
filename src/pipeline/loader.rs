//! Pipeline loader - YAML file loading and parsing
//!
//! This module handles loading pipeline definitions from YAML files.

use super::types::WorkflowDefinition;
use crate::error::PipewrightError;
use std::fs;
use std::path::Path;

/// Loads pipeline definitions from YAML files
pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a pipeline definition from a YAML file
    pub fn load_workflow<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<WorkflowDefinition, PipewrightError> {
        let path = path.as_ref();
        log::debug!("Loading pipeline definition from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse a pipeline definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<WorkflowDefinition, PipewrightError> {
        let def: WorkflowDefinition = serde_yaml::from_str(content)?;
        Ok(def)
    }
}

impl Default for WorkflowLoader {
    fn default() -> Self {
        Self::new()
    }
}
