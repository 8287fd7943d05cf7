//! Configuration for the `schema-cli` binary: where its on-disk storage
//! lives and how it logs. Mirrors the teacher's own `ConfigLoad` shape (a
//! small `serde`-derived struct loaded with a default-on-error fallback)
//! but carries only the fields a thin administrative CLI over
//! [`schema_kv::manager::SchemaManager`] actually needs.

use std::path::PathBuf;

use schema_kv::config::StorageBackend;
use serde_derive::{Deserialize, Serialize};

const DEFAULT_STORAGE_PATH: &str = "storage/schema-cli.db";
const DEFAULT_LOG_DIR: &str = ".schema-cli";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLoad {
    /// Path of the append-only `LogCask` file backing the schema manager.
    /// Shared by every invocation of the CLI so state persists across
    /// separate process runs (spec.md §8 scenario S3).
    pub storage_path: PathBuf,

    /// Defaults to `LogCask` -- an administrative tool invoked as a new
    /// process per command needs its state to survive between those
    /// invocations, unlike the library's own default.
    pub storage_backend: StorageBackend,

    /// See [`schema_kv::config::SchemaManagerConfig::clear_incompatible_data`].
    pub clear_incompatible_data: bool,

    pub log_dir: String,

    pub log_level: String,
}

impl Default for ConfigLoad {
    fn default() -> Self {
        ConfigLoad {
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            storage_backend: StorageBackend::LogCask,
            clear_incompatible_data: false,
            log_dir: DEFAULT_LOG_DIR.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ConfigLoad {
    /// Loads configuration from `path`, falling back to defaults (and
    /// logging nothing -- logging isn't initialized yet at this point) if
    /// the file is absent or malformed.
    pub fn load(path: &str) -> Self {
        confy::load_path(path).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disallow_clearing() {
        let config = ConfigLoad::default();
        assert!(!config.clear_incompatible_data);
        assert_eq!(config.log_level, "info");
    }
}
