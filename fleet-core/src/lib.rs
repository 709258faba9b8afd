//! Fleet core library: repository descriptors, settings, registry persistence.
//!
//! - [`types`]: `RepoName`, `RepositoryDescriptor`, `Settings`, `Fleet`
//! - [`error`]: [`RegistryError`]
//! - [`registry`]: load / save / init / add / remove / edit

pub mod error;
pub mod registry;
pub mod types;

pub use error::RegistryError;
pub use types::{Fleet, RepoName, RepositoryDescriptor, Settings};
