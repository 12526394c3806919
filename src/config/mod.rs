// Configuration - YAML settings file
pub mod settings;

pub use settings::{FlagConfig, LoggingConfig, Settings, StorageConfig};
