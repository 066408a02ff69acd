//! # pointing-settings
//!
//! Configuration with layered sources for the pointing server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PointingSettings::default()`]
//! 2. **User file**: `~/.pointing/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables**: `PORT`, `FRONTEND_URL` and `POINTING_*` overrides (highest priority)
//!
//! There is no global instance: the binary loads settings once and hands
//! the pieces to the components that need them.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, load_settings_with_env,
    settings_path,
};
pub use types::*;
