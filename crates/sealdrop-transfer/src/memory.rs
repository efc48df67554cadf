//! In-memory [`Transport`] backed by a shared map
//!
//! Mirrors the remote store's visible behavior closely enough for the
//! integration suite: server-side clamping of expiry parameters, download
//! accounting at stream-open time, auth checks, and cleanup of cancelled
//! uploads.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::{rngs::OsRng, RngCore};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sealdrop_core::{TransferError, TransferResult};

use crate::transport::{
    BundleInfo, DownloadSource, OwnedInfo, Transport, TransportProgress, UploadOutcome,
    UploadRequest,
};

// Same server-side ceilings the reference store enforces: anything above
// them is treated as a request for "unlimited".
const STORE_MAX_TIME_LIMIT_SECS: u64 = 60 * 60 * 24 * 7;
const STORE_MAX_DOWNLOAD_LIMIT: u32 = 300;

struct StoredBundle {
    ciphertext: Vec<u8>,
    metadata: Vec<u8>,
    nonce: [u8; sealdrop_crypto::NONCE_SIZE],
    owner_token: String,
    auth: String,
    has_password: bool,
    download_limit: u32,
    downloads_used: u32,
    /// Unix seconds; 0 = never expires
    expires_at: u64,
}

impl StoredBundle {
    fn expired(&self, now: u64) -> bool {
        (self.expires_at != 0 && now >= self.expires_at)
            || (self.download_limit != 0 && self.downloads_used >= self.download_limit)
    }
}

#[derive(Default)]
struct Store {
    bundles: HashMap<String, StoredBundle>,
    cancelled_uploads: u32,
}

/// Shared in-process store. Clones see the same bundles.
#[derive(Clone)]
pub struct MemoryTransport {
    store: Arc<Mutex<Store>>,
    base_url: String,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        MemoryTransport {
            store: Arc::new(Mutex::new(Store::default())),
            base_url: "https://send.test/download".to_string(),
        }
    }

    /// Number of uploads that were aborted before completion.
    pub fn cancelled_uploads(&self) -> u32 {
        self.store.lock().unwrap_or_else(|e| e.into_inner()).cancelled_uploads
    }

    /// Number of bundles currently stored.
    pub fn bundle_count(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .bundles
            .len()
    }

    /// Whether the store currently holds a bundle under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .bundles
            .contains_key(id)
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn random_hex(bytes: usize) -> String {
        let mut buf = vec![0u8; bytes];
        OsRng.fill_bytes(&mut buf);
        buf.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl Transport for MemoryTransport {
    async fn upload(
        &self,
        request: UploadRequest,
        mut body: Box<dyn AsyncRead + Send + Unpin>,
        progress: TransportProgress<'_>,
        cancel: &CancellationToken,
    ) -> TransferResult<UploadOutcome> {
        let started = Instant::now();
        let mut ciphertext = Vec::new();
        let mut chunk = vec![0u8; 16 * 1024];
        loop {
            // A stalled body must not outlive cancellation.
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
                    store.cancelled_uploads += 1;
                    return Err(TransferError::Cancelled);
                }
                read = body.read(&mut chunk) => read?,
            };
            if n == 0 {
                break;
            }
            ciphertext.extend_from_slice(&chunk[..n]);
            if let Some(report) = progress {
                report(ciphertext.len() as u64);
            }
        }
        // The writer half may have been dropped by a cancelled encryptor
        // after the last poll above saw data.
        if cancel.is_cancelled() {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            store.cancelled_uploads += 1;
            return Err(TransferError::Cancelled);
        }

        // Server-side clamps, independent of whatever the client asked for.
        let time_limit = if request.time_limit_secs > STORE_MAX_TIME_LIMIT_SECS {
            0
        } else {
            request.time_limit_secs
        };
        let download_limit = if request.download_limit > STORE_MAX_DOWNLOAD_LIMIT {
            0
        } else {
            request.download_limit
        };

        let id = Self::random_hex(8);
        let owner_token = Self::random_hex(10);
        let size = ciphertext.len();
        let bundle = StoredBundle {
            ciphertext,
            metadata: request.metadata,
            nonce: request.nonce,
            owner_token: owner_token.clone(),
            auth: request.auth,
            has_password: request.has_password,
            download_limit,
            downloads_used: 0,
            expires_at: if time_limit == 0 { 0 } else { Self::now() + time_limit },
        };
        let url = format!("{}/{id}", self.base_url);
        self.store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .bundles
            .insert(id.clone(), bundle);
        debug!(id = %id, size, "bundle stored");

        Ok(UploadOutcome {
            id,
            url,
            owner_token,
            duration: started.elapsed(),
        })
    }

    async fn metadata(&self, id: &str) -> TransferResult<BundleInfo> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let bundle = store.bundles.get(id).ok_or(TransferError::NotFound)?;
        if bundle.expired(Self::now()) {
            return Err(TransferError::NotFound);
        }
        Ok(BundleInfo {
            size: bundle.ciphertext.len() as u64,
            requires_password: bundle.has_password,
            nonce: bundle.nonce,
            metadata: bundle.metadata.clone(),
        })
    }

    async fn open_download(
        &self,
        id: &str,
        auth: &str,
        cancel: &CancellationToken,
    ) -> TransferResult<DownloadSource> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let now = Self::now();
        let gone = match store.bundles.get(id) {
            None => return Err(TransferError::NotFound),
            Some(bundle) => bundle.expired(now),
        };
        if gone {
            store.bundles.remove(id);
            return Err(TransferError::NotFound);
        }
        let bundle = store.bundles.get_mut(id).ok_or(TransferError::NotFound)?;
        if bundle.has_password && auth != bundle.auth {
            return Err(TransferError::Unauthorized);
        }
        bundle.downloads_used += 1;
        let content_length = bundle.ciphertext.len() as u64;
        let reader = Box::new(Cursor::new(bundle.ciphertext.clone()));
        debug!(id = %id, used = bundle.downloads_used, "download opened");
        Ok(DownloadSource {
            reader,
            content_length,
        })
    }

    async fn info(&self, id: &str, owner_token: &str) -> TransferResult<OwnedInfo> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let bundle = store.bundles.get(id).ok_or(TransferError::NotFound)?;
        if bundle.owner_token != owner_token {
            return Err(TransferError::Unauthorized);
        }
        let ttl_secs = if bundle.expires_at == 0 {
            None
        } else {
            let now = Self::now();
            Some(bundle.expires_at.saturating_sub(now))
        };
        Ok(OwnedInfo {
            downloads_used: bundle.downloads_used,
            download_limit: bundle.download_limit,
            ttl_secs,
        })
    }

    async fn change_download_limit(
        &self,
        id: &str,
        owner_token: &str,
        limit: u32,
    ) -> TransferResult<()> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let bundle = store.bundles.get_mut(id).ok_or(TransferError::NotFound)?;
        if bundle.owner_token != owner_token {
            return Err(TransferError::Unauthorized);
        }
        bundle.download_limit = if limit > STORE_MAX_DOWNLOAD_LIMIT { 0 } else { limit };
        Ok(())
    }

    async fn delete(&self, id: &str, owner_token: &str) -> TransferResult<()> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let bundle = store.bundles.get(id).ok_or(TransferError::NotFound)?;
        if bundle.owner_token != owner_token {
            return Err(TransferError::Unauthorized);
        }
        store.bundles.remove(id);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("MemoryTransport")
            .field("bundles", &store.bundles.len())
            .field("cancelled_uploads", &store.cancelled_uploads)
            .finish()
    }
}
