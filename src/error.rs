//! Typed errors for fork resolution, fixture filling and fixture collection.

use std::{path::PathBuf, time::Duration};
use thiserror::Error;

/// Errors raised while building or querying the [crate::forks::ForkChain].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ForkError {
    /// No fork with the given name exists in the chain.
    #[error("unknown fork: {0}")]
    UnknownFork(String),
    /// A relative lookup walked off either end of the chain.
    #[error("fork {steps} step(s) away from {fork} is out of range (chain length {len})")]
    OutOfRange {
        fork: String,
        steps: usize,
        len: usize,
    },
    /// Two definitions share a name.
    #[error("fork {0} is defined more than once")]
    DuplicateFork(String),
    /// A definition un-sets a requirement or lowers a version inherited from its predecessor.
    #[error("fork {fork} breaks monotonicity of {rule}")]
    NonMonotonic { fork: String, rule: &'static str },
    /// The root fork does not define a value every other fork inherits.
    #[error("root fork {fork} does not define {field}")]
    MissingBaseValue { fork: String, field: &'static str },
    /// A transition fork does not move forward along the chain.
    #[error("invalid transition {name}: {reason}")]
    InvalidTransition { name: String, reason: String },
    /// The definitions file could not be parsed.
    #[error("malformed fork definitions: {0}")]
    Definition(String),
}

/// Errors that abort a single scenario instance.
#[derive(Error, Debug)]
pub(crate) enum FillError {
    /// The fork could not be resolved.
    #[error(transparent)]
    Fork(#[from] ForkError),
    /// The transition tool could not be run, crashed, or produced unreadable output.
    #[error("transition tool failed: {0}")]
    ToolInvocation(String),
    /// The transition tool did not return within the configured bound.
    #[error("transition tool timed out after {0:?}")]
    ToolTimeout(Duration),
    /// The tool output does not match what the fork or scenario demands.
    #[error("fixture validation failed: {0}")]
    FixtureValidation(String),
}

impl From<std::io::Error> for FillError {
    fn from(e: std::io::Error) -> Self {
        Self::ToolInvocation(e.to_string())
    }
}

impl From<serde_json::Error> for FillError {
    fn from(e: serde_json::Error) -> Self {
        Self::ToolInvocation(e.to_string())
    }
}

/// Errors raised by the [crate::collector::FixtureCollector].
#[derive(Error, Debug)]
pub(crate) enum CollectError {
    /// Two records collapsed onto the same document key.
    #[error("duplicate fixture name {name} in module {module}")]
    DuplicateFixtureName { module: String, name: String },
    /// Two modules resolve to the same fixture file.
    #[error("module {module} would overwrite {path}, already written for module {other}")]
    PathCollision {
        module: String,
        other: String,
        path: PathBuf,
    },
    /// Nothing has been collected for the module.
    #[error("no fixtures collected for module {0}")]
    UnknownModule(String),
    /// The fixture file could not be written.
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The fixture document could not be serialized.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}
