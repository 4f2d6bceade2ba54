//! First-launch seeding of the default roster.
//!
//! Whether seeding already happened is recorded in a small TOML state file
//! so that deleting every default person does not bring them back.

use fame_core::{ImageRef, PersonRepository, RepositoryError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// Default people and the bundled asset each one points at.
pub const DEFAULT_PEOPLE: [(&str, &str); 5] = [
    ("Alice", "alice"),
    ("Bob", "bob"),
    ("Charlie", "charlie"),
    ("Daisy", "daisy"),
    ("Emma", "emma"),
];

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("state file encode: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Durable application state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchState {
    #[serde(default)]
    pub has_launched_before: bool,
}

impl LaunchState {
    /// Read the state file; a missing file means a first launch.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        match std::fs::read_to_string(path) {
            Ok(src) => Ok(toml::from_str(&src)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string(self)?)?;
        Ok(())
    }
}

/// Insert the default roster unless `state` says it was done before.
///
/// Defaults whose bundled image is already referenced by a stored person are
/// skipped, so a run interrupted before `state` was persisted never inserts
/// duplicates when repeated. Returns whether `state` changed; the caller
/// persists it.
pub fn seed_defaults(
    repo: &mut dyn PersonRepository,
    state: &mut LaunchState,
) -> Result<bool, RepositoryError> {
    if state.has_launched_before {
        return Ok(false);
    }

    let present: HashSet<ImageRef> = repo
        .list()?
        .into_iter()
        .filter_map(|person| person.image)
        .collect();

    let mut inserted = 0;
    for (name, asset) in DEFAULT_PEOPLE {
        let image = ImageRef::new(asset);
        if present.contains(&image) {
            tracing::debug!(name, "default person already present");
            continue;
        }
        repo.create(Uuid::new_v4(), name, Some(image))?;
        inserted += 1;
    }
    state.has_launched_before = true;
    tracing::info!(count = inserted, "seeded default people");
    Ok(true)
}
