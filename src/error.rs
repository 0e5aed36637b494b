use thiserror::Error;

/// Structural errors surfaced while loading or registering definitions.
///
/// These are the only fatal errors in the system: they fire before any step
/// executes. Per-step failures during a run are recorded on the
/// [`StepOutcome`](crate::flow::StepOutcome) instead and never propagate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("flow '{flow}' has an empty step list")]
    EmptyFlow { flow: String },

    #[error("flow '{flow}' step {index}: unknown capability '{id}'")]
    UnknownCapability {
        flow: String,
        index: usize,
        id: String,
    },

    #[error("duplicate flow name '{0}'")]
    DuplicateFlow(String),

    #[error("duplicate capability id '{0}'")]
    DuplicateCapability(String),

    #[error("unknown capability '{0}'")]
    CapabilityNotFound(String),

    #[error("flow not found: {0}")]
    FlowNotFound(String),

    #[error("invalid flow definition '{flow}': {message}")]
    InvalidDefinition { flow: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
