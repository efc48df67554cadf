use serde::{Deserialize, Serialize};

/// One file inside a bundle: relative path and plaintext size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Relative path, `/`-separated
    pub name: String,
    /// Plaintext size in bytes
    pub size: u64,
}

/// Ordered description of how to reconstruct the files of a bundle from
/// one decrypted byte stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestFile>,
}

impl Manifest {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn is_multi_file(&self) -> bool {
        self.files.len() > 1
    }
}

/// The payload of the encrypted metadata blob stored alongside the
/// ciphertext. The store only ever sees the sealed bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Display name: the single file's name, or the archive name
    pub name: String,
    /// Total plaintext size in bytes
    pub size: u64,
    pub manifest: Manifest,
}

impl Metadata {
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| anyhow::anyhow!("metadata serialization: {e}"))
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(data).map_err(|e| anyhow::anyhow!("metadata deserialization: {e}"))
    }
}

/// Runtime capability flags that pick the upload strategy.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Stream ciphertext to the transport as it is produced. When false the
    /// whole ciphertext is buffered in memory before the request opens
    /// (fallback for transports that need a known-length body).
    pub stream_upload: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            stream_upload: true,
        }
    }
}

/// Progress callback type (bytes_done, bytes_total)
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_totals() {
        let manifest = Manifest {
            files: vec![
                ManifestFile {
                    name: "a.txt".into(),
                    size: 10,
                },
                ManifestFile {
                    name: "dir/b.bin".into(),
                    size: 32,
                },
            ],
        };
        assert_eq!(manifest.total_size(), 42);
        assert!(manifest.is_multi_file());
    }

    #[test]
    fn test_metadata_roundtrip() {
        let meta = Metadata {
            name: "report.pdf".into(),
            size: 1024,
            manifest: Manifest {
                files: vec![ManifestFile {
                    name: "report.pdf".into(),
                    size: 1024,
                }],
            },
        };
        let bytes = meta.to_bytes().unwrap();
        let restored = Metadata::from_bytes(&bytes).unwrap();
        assert_eq!(restored.name, "report.pdf");
        assert_eq!(restored.manifest, meta.manifest);
        assert!(!restored.manifest.is_multi_file());
    }
}
