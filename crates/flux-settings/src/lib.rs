//! # flux-settings
//!
//! Layered configuration for the Flux gateway.
//!
//! Sources, lowest priority first:
//! 1. **Compiled defaults**: [`FluxSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `FLUX_*` overrides
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings,
    load_settings_from_path,
};
pub use types::*;
