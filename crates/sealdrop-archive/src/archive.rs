//! In-memory model of the file set staged for one upload

use bytes::Bytes;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use sealdrop_core::types::{Manifest, ManifestFile};
use sealdrop_core::{Limits, TransferError, TransferResult};

/// Display name used for multi-file bundles.
pub const ARCHIVE_NAME: &str = "sealdrop-archive.zip";

/// Where an entry's bytes come from.
pub enum FileSource {
    /// Opened lazily at upload time
    Path(PathBuf),
    /// Held in memory (small payloads, tests)
    Bytes(Bytes),
}

/// One file staged for upload: relative path, declared size, byte source.
pub struct ArchiveEntry {
    /// Relative path, `/`-separated
    pub name: String,
    /// Plaintext size in bytes
    pub size: u64,
    source: FileSource,
}

impl ArchiveEntry {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            source: FileSource::Bytes(data),
        }
    }

    /// Stage a file from disk; the size recorded now is the size the
    /// manifest will declare.
    pub async fn from_path(path: impl AsRef<Path>) -> TransferResult<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                TransferError::Config(format!("unusable file name: {}", path.display()))
            })?
            .to_string();
        Ok(Self {
            name,
            size: meta.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Open the entry for reading, capped at the declared size so a file
    /// that grew on disk cannot desync the stream from the manifest.
    async fn open(&self) -> TransferResult<Box<dyn AsyncRead + Send + Unpin>> {
        match &self.source {
            FileSource::Path(path) => {
                let file = tokio::fs::File::open(path).await?;
                Ok(Box::new(file.take(self.size)))
            }
            FileSource::Bytes(data) => Ok(Box::new(std::io::Cursor::new(data.clone()))),
        }
    }
}

/// The set of files to send as one bundle, plus its policy settings.
///
/// Lifecycle: created empty, mutated by add/remove until upload starts,
/// cleared (sources released) once the upload completes, fails or is
/// cancelled.
pub struct Archive {
    entries: Vec<ArchiveEntry>,
    time_limit_secs: u64,
    download_limit: u32,
    has_expiry: bool,
    password: Option<SecretString>,
}

impl Archive {
    pub fn new(limits: &Limits) -> Self {
        Self {
            entries: Vec::new(),
            time_limit_secs: limits.default_time_limit_secs,
            download_limit: limits.default_download_limit,
            has_expiry: true,
            password: None,
        }
    }

    /// Append files, atomically: every entry is validated against the limits
    /// before any is added, so a failed call leaves the archive unchanged.
    pub fn add_files(
        &mut self,
        entries: Vec<ArchiveEntry>,
        limits: &Limits,
    ) -> TransferResult<()> {
        for entry in &entries {
            if entry.size > limits.max_file_size {
                return Err(TransferError::FileTooBig {
                    size: entry.size,
                    limit: limits.max_file_size,
                });
            }
        }
        let count = self.entries.len() + entries.len();
        if count > limits.max_files_per_archive {
            return Err(TransferError::TooManyFiles {
                count,
                limit: limits.max_files_per_archive,
            });
        }
        debug!(added = entries.len(), total = count, "files staged");
        self.entries.extend(entries);
        Ok(())
    }

    /// Remove one entry by name. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        self.entries.len() != before
    }

    /// Drop all entries, releasing their sources.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn num_files(&self) -> usize {
        self.entries.len()
    }

    /// Total plaintext size in bytes.
    pub fn size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Display name: the single file's name, or the archive container name.
    pub fn name(&self) -> String {
        match self.entries.as_slice() {
            [single] => single.name.clone(),
            _ => ARCHIVE_NAME.to_string(),
        }
    }

    pub fn manifest(&self) -> Manifest {
        Manifest {
            files: self
                .entries
                .iter()
                .map(|e| ManifestFile {
                    name: e.name.clone(),
                    size: e.size,
                })
                .collect(),
        }
    }

    pub fn set_password(&mut self, password: Option<SecretString>) {
        self.password = password;
    }

    pub fn password(&self) -> Option<&SecretString> {
        self.password.as_ref()
    }

    /// Clamped to the configured maximum.
    pub fn set_download_limit(&mut self, limit: u32, limits: &Limits) {
        self.download_limit = limits.clamp_download_limit(limit);
    }

    pub fn download_limit(&self) -> u32 {
        self.download_limit
    }

    /// Clamped to the configured maximum.
    pub fn set_time_limit(&mut self, secs: u64, limits: &Limits) {
        self.time_limit_secs = limits.clamp_time_limit(secs);
    }

    pub fn time_limit_secs(&self) -> u64 {
        self.time_limit_secs
    }

    pub fn set_has_expiry(&mut self, has_expiry: bool) {
        self.has_expiry = has_expiry;
    }

    pub fn has_expiry(&self) -> bool {
        self.has_expiry
    }

    /// One reader over all entries concatenated in manifest order.
    /// Buffers at most one I/O chunk at a time.
    pub async fn plaintext_reader(&self) -> TransferResult<Box<dyn AsyncRead + Send + Unpin>> {
        let mut reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(tokio::io::empty());
        for entry in &self.entries {
            reader = Box::new(reader.chain(entry.open().await?));
        }
        Ok(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limits() -> Limits {
        Limits {
            max_file_size: 100,
            max_files_per_archive: 3,
            ..Limits::default()
        }
    }

    #[test]
    fn test_add_files_atomic_on_size() {
        let limits = small_limits();
        let mut archive = Archive::new(&limits);
        archive
            .add_files(vec![ArchiveEntry::from_bytes("ok.txt", vec![0u8; 10])], &limits)
            .unwrap();

        let result = archive.add_files(
            vec![
                ArchiveEntry::from_bytes("fine.txt", vec![0u8; 20]),
                ArchiveEntry::from_bytes("huge.bin", vec![0u8; 200]),
            ],
            &limits,
        );
        assert!(matches!(
            result,
            Err(TransferError::FileTooBig { size: 200, limit: 100 })
        ));
        // nothing from the failed call landed
        assert_eq!(archive.num_files(), 1);
        assert_eq!(archive.size(), 10);
    }

    #[test]
    fn test_add_files_atomic_on_count() {
        let limits = small_limits();
        let mut archive = Archive::new(&limits);
        let result = archive.add_files(
            (0..4)
                .map(|i| ArchiveEntry::from_bytes(format!("f{i}"), vec![0u8; 1]))
                .collect(),
            &limits,
        );
        assert!(matches!(
            result,
            Err(TransferError::TooManyFiles { count: 4, limit: 3 })
        ));
        assert_eq!(archive.num_files(), 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let limits = Limits::default();
        let mut archive = Archive::new(&limits);
        archive
            .add_files(
                vec![
                    ArchiveEntry::from_bytes("a", vec![1u8; 4]),
                    ArchiveEntry::from_bytes("b", vec![2u8; 6]),
                ],
                &limits,
            )
            .unwrap();

        assert!(archive.remove("a"));
        assert!(!archive.remove("a"));
        assert_eq!(archive.size(), 6);

        archive.clear();
        assert_eq!(archive.num_files(), 0);
        assert_eq!(archive.size(), 0);
    }

    #[test]
    fn test_naming() {
        let limits = Limits::default();
        let mut archive = Archive::new(&limits);
        archive
            .add_files(vec![ArchiveEntry::from_bytes("solo.pdf", vec![0u8; 2])], &limits)
            .unwrap();
        assert_eq!(archive.name(), "solo.pdf");

        archive
            .add_files(vec![ArchiveEntry::from_bytes("two.txt", vec![0u8; 2])], &limits)
            .unwrap();
        assert_eq!(archive.name(), ARCHIVE_NAME);
    }

    #[test]
    fn test_policy_clamping() {
        let limits = Limits::default();
        let mut archive = Archive::new(&limits);
        archive.set_download_limit(9999, &limits);
        assert_eq!(archive.download_limit(), limits.max_download_limit);
        archive.set_time_limit(u64::MAX, &limits);
        assert_eq!(archive.time_limit_secs(), limits.max_time_limit_secs);
    }

    #[test]
    fn test_plaintext_reader_order() {
        let limits = Limits::default();
        let mut archive = Archive::new(&limits);
        archive
            .add_files(
                vec![
                    ArchiveEntry::from_bytes("first", &b"hello "[..]),
                    ArchiveEntry::from_bytes("second", &b"world"[..]),
                ],
                &limits,
            )
            .unwrap();

        let body = tokio_test::block_on(async {
            let mut reader = archive.plaintext_reader().await.unwrap();
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            out
        });
        assert_eq!(body, b"hello world");
    }

    #[test]
    fn test_path_entry_capped_at_declared_size() {
        use std::io::Write;

        tokio_test::block_on(async {
            let mut f = tempfile::NamedTempFile::new().unwrap();
            f.write_all(b"0123456789").unwrap();
            let entry = ArchiveEntry::from_path(f.path()).await.unwrap();
            assert_eq!(entry.size, 10);

            // file grows after staging; the reader still yields 10 bytes
            f.write_all(b"extra").unwrap();
            f.flush().unwrap();
            let mut reader = entry.open().await.unwrap();
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            assert_eq!(out, b"0123456789");
        });
    }
}
