use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{TransferError, TransferResult};

/// System-wide transfer limits (loaded from sealdrop.toml).
///
/// Settings paths clamp to these maxima; the archive add path rejects
/// outright. Defaults match the public service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum size of a single file in bytes (default: 2 GiB)
    pub max_file_size: u64,
    /// Maximum number of files in one archive (default: 64)
    pub max_files_per_archive: usize,
    /// Maximum download limit a bundle may be given (default: 300)
    pub max_download_limit: u32,
    /// Maximum time-to-live in seconds (default: 604800 = 7 days)
    pub max_time_limit_secs: u64,
    /// Download limit applied to new archives (default: 1)
    pub default_download_limit: u32,
    /// Time-to-live applied to new archives (default: 86400 = 1 day)
    pub default_time_limit_secs: u64,
    /// Plaintext bytes per encrypted record (default: 65536)
    pub record_size: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size: 2 * 1024 * 1024 * 1024,
            max_files_per_archive: 64,
            max_download_limit: 300,
            max_time_limit_secs: 604_800,
            default_download_limit: 1,
            default_time_limit_secs: 86_400,
            record_size: 65_536,
        }
    }
}

impl Limits {
    /// Load limits from a TOML file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> TransferResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| TransferError::Config(format!("{}: {e}", path.display())))
    }

    /// Clamp a requested download limit to the configured maximum.
    /// Zero means "no limit requested" and passes through.
    pub fn clamp_download_limit(&self, requested: u32) -> u32 {
        requested.min(self.max_download_limit)
    }

    /// Clamp a requested time limit to the configured maximum.
    pub fn clamp_time_limit(&self, requested_secs: u64) -> u64 {
        requested_secs.min(self.max_time_limit_secs)
    }
}
