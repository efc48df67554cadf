//! Abstract duplex transport between the engine and the remote store
//!
//! The engine treats the store as a byte channel with a result and a cancel
//! signal; connection management, retries and wire details live behind this
//! trait. Status-code-to-taxonomy mapping happens at this boundary;
//! orchestrators only ever see `TransferError`.

use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use sealdrop_core::TransferResult;
use sealdrop_crypto::NONCE_SIZE;

/// Everything the store needs to accept one upload, next to the ciphertext
/// body. The metadata blob is opaque to the store.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Sealed metadata blob (name, size, manifest)
    pub metadata: Vec<u8>,
    /// Proof-of-possession header value for later owner operations
    pub auth: String,
    /// Stream nonce; safe to transmit, echoed back on metadata fetch
    pub nonce: [u8; NONCE_SIZE],
    /// Seconds until expiry; 0 = no time limit
    pub time_limit_secs: u64,
    /// Downloads allowed; 0 = unlimited
    pub download_limit: u32,
    pub has_password: bool,
    /// Anti-abuse token, forwarded verbatim when present
    pub anti_abuse_token: Option<String>,
}

/// What the store assigns to a completed upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub id: String,
    /// Share URL without the secret fragment
    pub url: String,
    /// Owner-authorization token for delete/param operations
    pub owner_token: String,
    /// Server-measured transfer duration
    pub duration: Duration,
}

/// Unauthenticated metadata probe result.
#[derive(Debug, Clone)]
pub struct BundleInfo {
    /// Ciphertext length in bytes
    pub size: u64,
    pub requires_password: bool,
    /// Stream nonce the sender registered
    pub nonce: [u8; NONCE_SIZE],
    /// Sealed metadata blob, opaque until the keychain opens it
    pub metadata: Vec<u8>,
}

/// Owner-facing counters for a stored bundle.
#[derive(Debug, Clone)]
pub struct OwnedInfo {
    pub downloads_used: u32,
    pub download_limit: u32,
    /// Remaining lifetime: `None` = no time limit, `Some(0)` = the store
    /// considers the bundle gone.
    pub ttl_secs: Option<u64>,
}

/// An open ciphertext download.
pub struct DownloadSource {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Declared ciphertext length
    pub content_length: u64,
}

impl std::fmt::Debug for DownloadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadSource")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Cumulative bytes-transferred callback, fired per accepted chunk.
pub type TransportProgress<'a> = Option<&'a (dyn Fn(u64) + Send + Sync)>;

/// One remote store. Implementations map their status codes through
/// [`sealdrop_core::TransferError::from_status`] and must observe `cancel`
/// at every suspension point so server-side resources are released promptly.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Stream one ciphertext body to the store.
    async fn upload(
        &self,
        request: UploadRequest,
        body: Box<dyn AsyncRead + Send + Unpin>,
        progress: TransportProgress<'_>,
        cancel: &CancellationToken,
    ) -> TransferResult<UploadOutcome>;

    /// Probe a bundle without starting a content transfer.
    async fn metadata(&self, id: &str) -> TransferResult<BundleInfo>;

    /// Open the ciphertext stream. Counts against the download limit.
    async fn open_download(
        &self,
        id: &str,
        auth: &str,
        cancel: &CancellationToken,
    ) -> TransferResult<DownloadSource>;

    /// Owner operation: fetch current counters.
    async fn info(&self, id: &str, owner_token: &str) -> TransferResult<OwnedInfo>;

    /// Owner operation: update the download limit.
    async fn change_download_limit(
        &self,
        id: &str,
        owner_token: &str,
        limit: u32,
    ) -> TransferResult<()>;

    /// Owner operation: remove the bundle.
    async fn delete(&self, id: &str, owner_token: &str) -> TransferResult<()>;
}
