//! Error types for fleet-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse registry at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.fleet/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The registry YAML file did not exist at the expected path.
    #[error("registry not found at {path}")]
    RegistryNotFound { path: PathBuf },

    /// A repository name failed validation.
    #[error("invalid repository name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Another repository already uses this name (compared case-insensitively).
    #[error("a repository named '{name}' is already registered")]
    DuplicateName { name: String },

    /// Another repository already points at this path.
    #[error("path {path} is already tracked as '{existing}'")]
    DuplicatePath { path: PathBuf, existing: String },

    /// No repository with this name is registered.
    #[error("no repository named '{name}' is registered")]
    RepoNotFound { name: String },

    /// The repository path does not exist or is not a directory.
    #[error("invalid repository path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: &'static str },
}
