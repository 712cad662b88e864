//! Error types surfaced by the detection core.
//!
//! Only [`PipelineError::InvalidInput`], [`PipelineError::OutOfRange`] and
//! [`PipelineError::ResourceExhausted`] are meant to reach a caller as a hard
//! `Err`. Everything else (a single sensor timing out, a stage raising, the
//! neural branch failing to load) is recovered locally by the stage or
//! sensor that hit it and surfaced instead as a `confidence_factors` entry or
//! a `success=false` stage result.

use uuid::Uuid;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("duration/size out of configured range: {0}")]
    OutOfRange(String),

    #[error("worker pool exhausted")]
    ResourceExhausted,

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("job {0} was cancelled")]
    Cancelled(Uuid),

    #[error("audio decode failed: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse environment overrides: {0}")]
    Env(#[from] envy::Error),
}
