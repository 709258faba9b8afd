//! Single-file YAML registry of tracked repositories.
//!
//! # Storage layout
//!
//! ```text
//! ~/.fleet/            (mode 0700)
//!   fleet.yaml         (settings + repository list: mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::RegistryError;
use crate::types::{Fleet, RepoName, RepositoryDescriptor};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.fleet/`
pub fn fleet_dir_at(home: &Path) -> PathBuf {
    home.join(".fleet")
}

/// `<home>/.fleet/fleet.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    fleet_dir_at(home).join("fleet.yaml")
}

/// `config_path_at` convenience wrapper.
pub fn config_path() -> Result<PathBuf, RegistryError> {
    Ok(config_path_at(&home()?))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load the registry from `<home>/.fleet/fleet.yaml`.
///
/// Returns `RegistryError::RegistryNotFound` if absent,
/// `RegistryError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Fleet, RegistryError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(RegistryError::RegistryNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Fleet, RegistryError> {
    load_at(&home()?)
}

/// Like [`load_at`], but a missing registry yields an empty fleet.
pub fn load_or_default_at(home: &Path) -> Result<Fleet, RegistryError> {
    match load_at(home) {
        Err(RegistryError::RegistryNotFound { .. }) => Ok(Fleet::empty()),
        other => other,
    }
}

/// `load_or_default_at` convenience wrapper.
pub fn load_or_default() -> Result<Fleet, RegistryError> {
    load_or_default_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the registry to `<home>/.fleet/fleet.yaml`.
///
/// Write flow: serialize → `fleet.yaml.tmp` sibling → `chmod 0600` → `rename`.
/// `updated_at` is bumped before serializing.
pub fn save_at(home: &Path, fleet: &mut Fleet) -> Result<(), RegistryError> {
    let dir = fleet_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("fleet.yaml.tmp");

    fleet.updated_at = Utc::now();
    let yaml = serde_yaml::to_string(fleet)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(fleet: &mut Fleet) -> Result<(), RegistryError> {
    save_at(&home()?, fleet)
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Create an empty registry if none exists.
///
/// Idempotent: an existing registry is loaded and returned unchanged.
/// The boolean is `true` when a new file was written.
pub fn init_at(home: &Path) -> Result<(Fleet, bool), RegistryError> {
    if config_path_at(home).exists() {
        return Ok((load_at(home)?, false));
    }
    let mut fleet = Fleet::empty();
    save_at(home, &mut fleet)?;
    Ok((fleet, true))
}

/// `init_at` convenience wrapper.
pub fn init() -> Result<(Fleet, bool), RegistryError> {
    init_at(&home()?)
}

// ---------------------------------------------------------------------------
// 5. Add / remove / edit
// ---------------------------------------------------------------------------

/// Register a repository under `name`.
///
/// `path` must be an existing directory; it is stored canonicalized. Names are
/// unique case-insensitively and each path may be tracked only once.
pub fn add_repo_at(
    home: &Path,
    name: &str,
    path: &Path,
) -> Result<RepositoryDescriptor, RegistryError> {
    let name = RepoName::parse(name)?;
    let path = resolve_dir(path)?;
    let mut fleet = load_or_default_at(home)?;

    if fleet.find(name.as_str()).is_some() {
        return Err(RegistryError::DuplicateName {
            name: name.to_string(),
        });
    }
    if let Some(existing) = fleet.repos.iter().find(|r| r.path == path) {
        return Err(RegistryError::DuplicatePath {
            path,
            existing: existing.name.to_string(),
        });
    }

    let descriptor = RepositoryDescriptor::new(name, path);
    fleet.repos.push(descriptor.clone());
    save_at(home, &mut fleet)?;
    Ok(descriptor)
}

/// `add_repo_at` convenience wrapper.
pub fn add_repo(name: &str, path: &Path) -> Result<RepositoryDescriptor, RegistryError> {
    add_repo_at(&home()?, name, path)
}

/// Stop tracking a repository. Lookup is case-insensitive.
pub fn remove_repo_at(home: &Path, name: &str) -> Result<RepositoryDescriptor, RegistryError> {
    let mut fleet = load_at(home)?;
    let index = fleet.position(name).ok_or_else(|| RegistryError::RepoNotFound {
        name: name.to_owned(),
    })?;
    let removed = fleet.repos.remove(index);
    save_at(home, &mut fleet)?;
    Ok(removed)
}

/// `remove_repo_at` convenience wrapper.
pub fn remove_repo(name: &str) -> Result<RepositoryDescriptor, RegistryError> {
    remove_repo_at(&home()?, name)
}

/// Changes applied by [`edit_repo_at`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct RepoEdit {
    pub new_name: Option<String>,
    pub path: Option<PathBuf>,
    pub enabled: Option<bool>,
    /// Accept a path that does not exist (yet).
    pub force: bool,
}

/// Rename, move, enable or disable a registered repository.
pub fn edit_repo_at(
    home: &Path,
    name: &str,
    edit: RepoEdit,
) -> Result<RepositoryDescriptor, RegistryError> {
    let mut fleet = load_at(home)?;
    let index = fleet.position(name).ok_or_else(|| RegistryError::RepoNotFound {
        name: name.to_owned(),
    })?;

    if let Some(new_name) = edit.new_name.as_deref() {
        let new_name = RepoName::parse(new_name)?;
        let clash = fleet
            .repos
            .iter()
            .enumerate()
            .any(|(i, r)| i != index && r.name.matches(new_name.as_str()));
        if clash {
            return Err(RegistryError::DuplicateName {
                name: new_name.to_string(),
            });
        }
        fleet.repos[index].name = new_name;
    }

    if let Some(path) = edit.path.as_deref() {
        let path = if edit.force {
            std::path::absolute(path)?
        } else {
            resolve_dir(path)?
        };
        if let Some(existing) = fleet
            .repos
            .iter()
            .enumerate()
            .find(|(i, r)| *i != index && r.path == path)
            .map(|(_, r)| r.name.to_string())
        {
            return Err(RegistryError::DuplicatePath { path, existing });
        }
        fleet.repos[index].path = path;
    }

    if let Some(enabled) = edit.enabled {
        fleet.repos[index].enabled = enabled;
    }

    let updated = fleet.repos[index].clone();
    save_at(home, &mut fleet)?;
    Ok(updated)
}

/// `edit_repo_at` convenience wrapper.
pub fn edit_repo(name: &str, edit: RepoEdit) -> Result<RepositoryDescriptor, RegistryError> {
    edit_repo_at(&home()?, name, edit)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

fn resolve_dir(path: &Path) -> Result<PathBuf, RegistryError> {
    let canonical = path.canonicalize().map_err(|_| RegistryError::InvalidPath {
        path: path.to_path_buf(),
        reason: "path does not exist",
    })?;
    if !canonical.is_dir() {
        return Err(RegistryError::InvalidPath {
            path: canonical,
            reason: "not a directory",
        });
    }
    Ok(canonical)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
