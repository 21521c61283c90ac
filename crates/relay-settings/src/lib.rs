//! # relay-settings
//!
//! Layered configuration for the relay server, lowest priority first:
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.relay/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment**: `RELAY_*` overrides
//!
//! Settings are plain values passed down explicitly; there is no global.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_env_overrides_from, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::{LoggingSettings, RelaySettings, ServerSettings};
