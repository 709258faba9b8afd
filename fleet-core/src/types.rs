//! Domain types for the Fleet registry.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde + serde_yaml.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Longest accepted repository name, in characters.
pub const MAX_NAME_LEN: usize = 100;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A validated repository name: non-empty, at most [`MAX_NAME_LEN`] characters.
///
/// Names are displayed as entered but compared case-insensitively through
/// [`RepoName::matches`]; the registry is what keeps them unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName(String);

impl RepoName {
    /// Trim and validate `raw`.
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RegistryError::InvalidName {
                name: raw.to_owned(),
                reason: "name must not be empty",
            });
        }
        if trimmed.chars().count() > MAX_NAME_LEN {
            return Err(RegistryError::InvalidName {
                name: raw.to_owned(),
                reason: "name must be at most 100 characters",
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a user-supplied name.
    pub fn matches(&self, other: &str) -> bool {
        self.0.to_lowercase() == other.trim().to_lowercase()
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for RepoName {
    type Error = RegistryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RepoName> for String {
    fn from(name: RepoName) -> Self {
        name.0
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One tracked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub name: RepoName,
    /// Absolute path to the repository root on disk.
    pub path: PathBuf,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl RepositoryDescriptor {
    pub fn new(name: RepoName, path: impl Into<PathBuf>) -> Self {
        Self {
            name,
            path: path.into(),
            enabled: true,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Fleet-wide knobs. Every field falls back to its default when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of repositories worked on at once.
    pub concurrency: usize,
    /// Per-command timeout for sync steps (pull and push talk to the network).
    pub command_timeout_secs: u64,
    /// Per-command timeout for read-only probe commands.
    pub probe_timeout_secs: u64,
    pub commit_message: String,
    /// `git pull --rebase` when true, `git pull --no-rebase` otherwise.
    pub pull_rebase: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            command_timeout_secs: 300,
            probe_timeout_secs: 30,
            commit_message: "fleet: automatic sync".to_string(),
            pull_rebase: true,
        }
    }
}

/// Root of the Fleet YAML registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fleet {
    pub version: u32,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub repos: Vec<RepositoryDescriptor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fleet {
    pub const CURRENT_VERSION: u32 = 1;

    /// An empty fleet stamped with the current time.
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            version: Self::CURRENT_VERSION,
            settings: Settings::default(),
            repos: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Case-insensitive lookup by name.
    pub fn find(&self, name: &str) -> Option<&RepositoryDescriptor> {
        self.repos.iter().find(|r| r.name.matches(name))
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.repos.iter().position(|r| r.name.matches(name))
    }

    /// Enabled descriptors, in registration order.
    pub fn enabled(&self) -> Vec<RepositoryDescriptor> {
        self.repos.iter().filter(|r| r.enabled).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
