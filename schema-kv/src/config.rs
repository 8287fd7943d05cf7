//! Configuration for the schema manager (spec.md §6: "Configuration
//! options recognized"). Mirrors the teacher's own `ConfigLoad` shape
//! (`server::config::ConfigLoad`): a small `serde`-derived struct with
//! `Default`, loaded by the CLI from a config file and overridable from
//! the command line.

use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};

const DEFAULT_STORAGE_PATH: &str = "storage/schema-manager";

/// Which concrete [`crate::kv::engine::Engine`] backs the schema manager's
/// [`crate::kv::facade::KvFacade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackend {
    /// `BTreeMap`-backed, non-persistent. Default; convenient for tests
    /// and the `demo` walkthrough.
    Memory,
    /// Append-only log file, persistent across restarts (spec.md §8
    /// scenario S3: "crash/restart round-trip").
    LogCask,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaManagerConfig {
    /// Authorizes wiping and reinitializing the schema-manager directory
    /// when `dataVersion`/`metaDataVersion` disagree with this build's
    /// constants (spec.md §6, §7 `Incompatible`). Defaults to `false`:
    /// version mismatches fail startup unless explicitly authorized.
    pub clear_incompatible_data: bool,

    /// Root directory path the schema manager's own subspace is rooted
    /// under (spec.md §6: "Under the user-chosen root directory").
    pub root_path: Vec<String>,

    pub storage_backend: StorageBackend,

    /// Where `StorageBackend::LogCask` keeps its append-only log file.
    pub storage_path: PathBuf,
}

impl Default for SchemaManagerConfig {
    fn default() -> Self {
        Self {
            clear_incompatible_data: false,
            root_path: vec!["schemaManager".to_string()],
            storage_backend: StorageBackend::default(),
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_disallows_clearing() {
        let config = SchemaManagerConfig::default();
        assert!(!config.clear_incompatible_data);
        assert_eq!(config.root_path, vec!["schemaManager".to_string()]);
    }
}
