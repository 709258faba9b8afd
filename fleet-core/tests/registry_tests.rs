//! Registry error-message, atomic-write-safety, and add/remove/edit integration tests.
//! Storage: ~/.fleet/fleet.yaml

use std::fs;

use assert_fs::prelude::*;
use fleet_core::{
    registry::{self, RepoEdit},
    types::Fleet,
    RegistryError,
};
use predicates::prelude::predicate;
use rstest::rstest;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_registry_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, RegistryError::RegistryNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("registry not found"));
    assert!(err.to_string().contains("fleet.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".fleet/fleet.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("fleet.yaml"));
}

#[test]
fn load_rejects_overlong_repo_name() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let yaml = format!(
        "version: 1\ncreated_at: 2024-01-01T00:00:00Z\nupdated_at: 2024-01-01T00:00:00Z\n\
         repos:\n  - name: {}\n    path: /code/x\n",
        "n".repeat(101)
    );
    home.child(".fleet/fleet.yaml").write_str(&yaml).expect("write");

    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn mid_write_crash_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut fleet = Fleet::empty();
    registry::save_at(home.path(), &mut fleet).expect("save");

    let yaml_path = registry::config_path_at(home.path());
    let original_bytes = fs::read(&yaml_path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = yaml_path.with_file_name("fleet.yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    assert_eq!(original_bytes, fs::read(&yaml_path).expect("read after crash"));
    assert!(registry::load_at(home.path()).is_ok(), "registry must still load");
}

// ---------------------------------------------------------------------------
// 3. Add / remove / edit
// ---------------------------------------------------------------------------

#[test]
fn add_stores_canonical_path_and_creates_registry() {
    let home = assert_fs::TempDir::new().expect("home");
    let repo = assert_fs::TempDir::new().expect("repo");

    let desc = registry::add_repo_at(home.path(), "dotfiles", repo.path()).expect("add");
    home.child(".fleet/fleet.yaml").assert(predicate::path::exists());
    assert_eq!(desc.path, repo.path().canonicalize().unwrap());
    assert!(desc.enabled);

    let fleet = registry::load_at(home.path()).expect("load");
    assert_eq!(fleet.repos.len(), 1);
    assert_eq!(fleet.repos[0].name.as_str(), "dotfiles");
}

#[rstest]
#[case("dotfiles")]
#[case("DotFiles")]
#[case("  DOTFILES ")]
fn add_rejects_duplicate_names_case_insensitively(#[case] second: &str) {
    let home = assert_fs::TempDir::new().expect("home");
    let a = assert_fs::TempDir::new().expect("a");
    let b = assert_fs::TempDir::new().expect("b");

    registry::add_repo_at(home.path(), "dotfiles", a.path()).expect("first");
    let err = registry::add_repo_at(home.path(), second, b.path()).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateName { .. }), "got: {err}");
}

#[test]
fn add_rejects_already_tracked_path() {
    let home = assert_fs::TempDir::new().expect("home");
    let repo = assert_fs::TempDir::new().expect("repo");

    registry::add_repo_at(home.path(), "one", repo.path()).expect("first");
    let err = registry::add_repo_at(home.path(), "two", repo.path()).unwrap_err();
    match err {
        RegistryError::DuplicatePath { existing, .. } => assert_eq!(existing, "one"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn add_rejects_missing_and_non_directory_paths() {
    let home = assert_fs::TempDir::new().expect("home");
    let scratch = assert_fs::TempDir::new().expect("scratch");

    let missing = scratch.path().join("nope");
    let err = registry::add_repo_at(home.path(), "missing", &missing).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPath { .. }), "got: {err}");

    let file = scratch.child("file.txt");
    file.write_str("x").expect("write");
    let err = registry::add_repo_at(home.path(), "file", file.path()).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPath { .. }), "got: {err}");
}

#[test]
fn remove_unknown_repo_errors() {
    let home = assert_fs::TempDir::new().expect("home");
    registry::init_at(home.path()).expect("init");
    let err = registry::remove_repo_at(home.path(), "ghost").unwrap_err();
    assert!(matches!(err, RegistryError::RepoNotFound { .. }), "got: {err}");
}

#[test]
fn edit_renames_and_disables() {
    let home = assert_fs::TempDir::new().expect("home");
    let repo = assert_fs::TempDir::new().expect("repo");
    registry::add_repo_at(home.path(), "notes", repo.path()).expect("add");

    let edited = registry::edit_repo_at(
        home.path(),
        "NOTES",
        RepoEdit {
            new_name: Some("journal".to_string()),
            enabled: Some(false),
            ..RepoEdit::default()
        },
    )
    .expect("edit");
    assert_eq!(edited.name.as_str(), "journal");
    assert!(!edited.enabled);

    let fleet = registry::load_at(home.path()).expect("load");
    assert!(fleet.find("notes").is_none());
    assert!(fleet.enabled().is_empty());
}

#[test]
fn edit_rename_may_change_only_case() {
    let home = assert_fs::TempDir::new().expect("home");
    let repo = assert_fs::TempDir::new().expect("repo");
    registry::add_repo_at(home.path(), "notes", repo.path()).expect("add");

    let edited = registry::edit_repo_at(
        home.path(),
        "notes",
        RepoEdit {
            new_name: Some("Notes".to_string()),
            ..RepoEdit::default()
        },
    )
    .expect("rename to same name with different case");
    assert_eq!(edited.name.as_str(), "Notes");
}

#[test]
fn edit_rename_onto_other_repo_errors() {
    let home = assert_fs::TempDir::new().expect("home");
    let a = assert_fs::TempDir::new().expect("a");
    let b = assert_fs::TempDir::new().expect("b");
    registry::add_repo_at(home.path(), "a", a.path()).expect("add a");
    registry::add_repo_at(home.path(), "b", b.path()).expect("add b");

    let err = registry::edit_repo_at(
        home.path(),
        "a",
        RepoEdit {
            new_name: Some("B".to_string()),
            ..RepoEdit::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateName { .. }), "got: {err}");
}

#[test]
fn edit_path_requires_force_for_missing_directory() {
    let home = assert_fs::TempDir::new().expect("home");
    let repo = assert_fs::TempDir::new().expect("repo");
    registry::add_repo_at(home.path(), "notes", repo.path()).expect("add");
    let moved = repo.path().join("not-yet-cloned");

    let err = registry::edit_repo_at(
        home.path(),
        "notes",
        RepoEdit {
            path: Some(moved.clone()),
            ..RepoEdit::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPath { .. }), "got: {err}");

    let edited = registry::edit_repo_at(
        home.path(),
        "notes",
        RepoEdit {
            path: Some(moved.clone()),
            force: true,
            ..RepoEdit::default()
        },
    )
    .expect("forced edit");
    assert_eq!(edited.path, moved);
}
