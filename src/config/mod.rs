//! Station configuration
//!
//! Three layers, later layers winning:
//! 1. Built-in defaults
//! 2. Station config file (`station.toml`)
//! 3. CLI overrides
//!
//! Layers are merged as JSON values and then deserialized into the typed
//! [`StationConfig`], which is validated before use.

mod defaults;
mod effective;
mod merge;

pub use defaults::BuiltinDefaults;
pub use effective::{
    ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, LogConfig, ScriptConfig,
    StationConfig, VerifierConfig, WatchdogConfig,
};
pub use merge::{deep_merge, merge_layers};
