//! fame-store — concrete storage behind the fame-core traits.
//!
//! Person records live in SQLite, face crops as files on disk, and the
//! first-launch flag in a small TOML state file.

pub mod images;
pub mod people;
pub mod seed;

pub use images::FsImageStore;
pub use people::SqlitePersonRepository;
pub use seed::{seed_defaults, LaunchState, StateError};
