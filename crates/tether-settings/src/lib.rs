//! # tether-settings
//!
//! Environment configuration and the `projects.json` file. Settings come
//! from the process environment with compiled defaults; the project list is
//! a JSON array validated on load and applied to the store as a
//! delete-then-upsert diff.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_projects, load_settings, load_settings_from};
pub use types::Settings;
