// SPDX-License-Identifier: MIT

//! Typed error handling for pipewright
//!
//! The resolution engine only ever fails in two ways (see [`GraphError`]).
//! Everything else belongs to the definition layer and the CLI.

use thiserror::Error;

/// Top-level error type for pipewright
#[derive(Debug, Error)]
pub enum PipewrightError {
    /// Errors raised by the step graph engine
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Errors in a pipeline definition file
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors raised while building or resolving a step graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A step declares outputs but has no explicit id to key them off
    #[error("Step declares outputs [{}] but has no id", .outputs.join(", "))]
    MissingStepId { outputs: Vec<String> },

    /// The dependency graph of a job is not a DAG
    #[error("Circular dependency detected: {}", .path.join(" → "))]
    Cycle { path: Vec<String> },
}

/// Errors in a YAML pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// A `step:`, `depends_on`, `after` or `needs_steps` entry names nothing
    #[error("Unknown step reference '{0}'")]
    UnknownStep(String),

    /// A `needs` entry or cross-job reference names no job
    #[error("Unknown job '{0}'")]
    UnknownJob(String),

    /// A cross-job step reference is not of the form `job.step`
    #[error("Invalid cross-job step reference '{0}', expected 'job.step'")]
    InvalidCrossJobRef(String),

    /// Step definitions reference each other in a loop
    #[error("Circular step definition: {}", .0.join(" → "))]
    CircularDefinition(Vec<String>),

    /// An expression could not be parsed
    #[error("Could not parse expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_uses_arrows() {
        let err = GraphError::Cycle {
            path: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: A → B → A");
    }

    #[test]
    fn test_missing_id_display() {
        let err = GraphError::MissingStepId {
            outputs: vec!["version".to_string(), "sha".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Step declares outputs [version, sha] but has no id"
        );
    }

    #[test]
    fn test_graph_error_converts_transparently() {
        let err: PipewrightError = GraphError::Cycle {
            path: vec!["x".to_string(), "x".to_string()],
        }
        .into();
        assert_eq!(err.to_string(), "Circular dependency detected: x → x");
    }

    #[test]
    fn test_definition_error_is_prefixed() {
        let err = PipewrightError::from(DefinitionError::UnknownJob("deploy".to_string()));
        assert!(matches!(err, PipewrightError::Definition(_)));
        assert_eq!(err.to_string(), "Definition error: Unknown job 'deploy'");
    }
}
