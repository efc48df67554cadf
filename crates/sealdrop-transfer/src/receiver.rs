//! Download orchestrator
//!
//! Mirror of the sender: probes the store for the sealed metadata, opens
//! it with the share secret (plus password when one was set), then
//! streams the ciphertext through the record codec. Multi-file bundles
//! are re-wrapped into a zip on the fly, so the decrypted payload never
//! exists as a bare concatenation outside the pipe.

use std::pin::Pin;
use std::task::{Context, Poll};

use secrecy::SecretString;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sealdrop_archive::{bundle_stream, zip_size};
use sealdrop_core::{Limits, Metadata, ProgressFn, TransferError, TransferResult};
use sealdrop_crypto::{decrypt_stream, decrypted_size, Keychain, SecretKey};

use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Nothing fetched yet, or fetched and ready to download
    Idle,
    /// Metadata fetched but sealed behind a password
    PasswordRequired,
    Downloading,
    Complete,
    Failed,
    Cancelled,
}

struct Fetched {
    keychain: Keychain,
    ciphertext_size: u64,
    requires_password: bool,
    blob: Vec<u8>,
    metadata: Option<Metadata>,
}

pub struct Receiver<T> {
    transport: T,
    limits: Limits,
    id: String,
    secret: SecretKey,
    state: ReceiverState,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
    fetched: Option<Fetched>,
}

impl<T: Transport> Receiver<T> {
    pub fn new(transport: T, limits: Limits, id: impl Into<String>, secret: SecretKey) -> Self {
        Receiver {
            transport,
            limits,
            id: id.into(),
            secret,
            state: ReceiverState::Idle,
            cancel: CancellationToken::new(),
            progress: None,
            fetched: None,
        }
    }

    /// Build a receiver from a share URL of the form
    /// `https://host/download/<id>#<secret>`.
    pub fn from_url(transport: T, limits: Limits, url: &str) -> TransferResult<Self> {
        let (base, fragment) = url
            .split_once('#')
            .ok_or_else(|| TransferError::Config("share URL has no secret fragment".into()))?;
        let id = base
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TransferError::Config("share URL has no bundle id".into()))?;
        let secret = SecretKey::from_b64(fragment)?;
        Ok(Self::new(transport, limits, id, secret))
    }

    /// `(bytes_written, bytes_total)` callback over the decrypted output.
    pub fn on_progress(&mut self, f: ProgressFn) {
        self.progress = Some(f);
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// After a cancelled download, arm a fresh token and return to a
    /// downloadable state. Fetched metadata is kept. Failures are not
    /// resettable; build a fresh receiver instead.
    pub fn reset(&mut self) {
        if self.state == ReceiverState::Cancelled {
            self.cancel = CancellationToken::new();
            self.state = match &self.fetched {
                Some(f) if f.metadata.is_none() => ReceiverState::PasswordRequired,
                _ => ReceiverState::Idle,
            };
        }
    }

    /// Opened metadata, once available.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.fetched.as_ref().and_then(|f| f.metadata.as_ref())
    }

    pub fn requires_password(&self) -> bool {
        self.state == ReceiverState::PasswordRequired
    }

    /// Size of what [`download`](Self::download) will write: the file
    /// itself, or the zip wrapping a multi-file bundle.
    pub fn download_size(&self) -> Option<u64> {
        let metadata = self.metadata()?;
        Some(if metadata.manifest.is_multi_file() {
            zip_size(&metadata.manifest)
        } else {
            metadata.size
        })
    }

    /// Probe the store and open the metadata blob. With a password-gated
    /// bundle the blob stays sealed and the state moves to
    /// `PasswordRequired`; call [`provide_password`](Self::provide_password)
    /// to finish.
    pub async fn fetch_metadata(&mut self) -> TransferResult<()> {
        let info = self.transport.metadata(&self.id).await?;
        let keychain =
            Keychain::from_parts(SecretKey::from_bytes(*self.secret.as_bytes()), info.nonce);

        let mut fetched = Fetched {
            keychain,
            ciphertext_size: info.size,
            requires_password: info.requires_password,
            blob: info.metadata,
            metadata: None,
        };
        if fetched.requires_password {
            self.state = ReceiverState::PasswordRequired;
        } else {
            fetched.metadata = Some(fetched.keychain.decrypt_metadata(&fetched.blob)?);
            self.state = ReceiverState::Idle;
        }
        debug!(
            id = %self.id,
            password = fetched.requires_password,
            ciphertext = fetched.ciphertext_size,
            "metadata fetched"
        );
        self.fetched = Some(fetched);
        Ok(())
    }

    /// Mix the password into the keychain and open the deferred metadata
    /// blob. A wrong password leaves the receiver in `PasswordRequired`
    /// so the caller can prompt again.
    pub fn provide_password(&mut self, password: &SecretString) -> TransferResult<()> {
        let fetched = self
            .fetched
            .as_mut()
            .ok_or_else(|| TransferError::Config("metadata not fetched yet".into()))?;
        fetched.keychain.set_password(password)?;
        match fetched.keychain.decrypt_metadata(&fetched.blob) {
            Ok(metadata) => {
                fetched.metadata = Some(metadata);
                self.state = ReceiverState::Idle;
                Ok(())
            }
            Err(TransferError::AuthenticationFailed) => {
                self.state = ReceiverState::PasswordRequired;
                Err(TransferError::InvalidPassword)
            }
            Err(e) => Err(e),
        }
    }

    /// Stream the decrypted payload into `writer`. Counts one download
    /// against the bundle's limit the moment the store accepts the open.
    pub async fn download<W>(&mut self, writer: W) -> TransferResult<u64>
    where
        W: AsyncWrite + Send + Unpin,
    {
        match self.run(writer).await {
            Ok(written) => {
                self.state = ReceiverState::Complete;
                info!(id = %self.id, bytes = written, "download complete");
                Ok(written)
            }
            Err(e) if e.is_cancelled() => {
                self.state = ReceiverState::Cancelled;
                Err(e)
            }
            Err(e) => {
                self.state = ReceiverState::Failed;
                Err(e)
            }
        }
    }

    async fn run<W>(&mut self, writer: W) -> TransferResult<u64>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let fetched = self
            .fetched
            .as_ref()
            .ok_or_else(|| TransferError::Config("metadata not fetched yet".into()))?;
        let metadata = match &fetched.metadata {
            Some(m) => m.clone(),
            None => return Err(TransferError::PasswordRequired),
        };
        let record_size = self.limits.record_size;
        // Cross-check the framing math before committing a download slot.
        let plaintext_size = decrypted_size(fetched.ciphertext_size, record_size)?;
        let requires_password = fetched.requires_password;
        let auth = fetched.keychain.auth_header();
        let cancel = self.cancel.clone();
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        self.state = ReceiverState::Downloading;
        let source = self
            .transport
            .open_download(&self.id, &auth, &cancel)
            .await
            .map_err(|e| match e {
                TransferError::Unauthorized if requires_password => TransferError::InvalidPassword,
                other => other,
            })?;
        debug!(id = %self.id, ciphertext = source.content_length, plaintext = plaintext_size, "download opened");

        let fetched = match &self.fetched {
            Some(f) => f,
            None => return Err(TransferError::Config("metadata not fetched yet".into())),
        };
        let progress = self.progress.as_ref();
        let total = if metadata.manifest.is_multi_file() {
            zip_size(&metadata.manifest)
        } else {
            metadata.size
        };

        let transfer = async {
            if metadata.manifest.is_multi_file() {
                // Decrypt into one end of a pipe, zip out of the other.
                let (mut seal_side, bundle_side) = tokio::io::duplex(4 * record_size as usize);
                let out = ProgressWriter::new(writer, total, progress);
                let keychain = &fetched.keychain;
                // The write half lives inside the block so a verification
                // failure closes the pipe instead of stalling the bundler.
                let decrypt = async move {
                    let crypted =
                        decrypt_stream(keychain, source.reader, &mut seal_side, record_size).await;
                    let closed = seal_side.shutdown().await;
                    crypted?;
                    closed?;
                    TransferResult::Ok(())
                };
                let bundle = bundle_stream(&metadata.manifest, bundle_side, out);
                let (decrypted, bundled) = tokio::join!(decrypt, bundle);
                // a decrypt failure also truncates the bundler; report the cause
                decrypted?;
                let written = bundled?;
                Ok(written)
            } else {
                let out = ProgressWriter::new(writer, total, progress);
                decrypt_stream(&fetched.keychain, source.reader, out, record_size).await
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            written = transfer => written,
        }
    }
}

/// AsyncWrite adapter reporting cumulative bytes against a known total.
struct ProgressWriter<'a, W> {
    inner: W,
    written: u64,
    total: u64,
    progress: Option<&'a ProgressFn>,
}

impl<'a, W> ProgressWriter<'a, W> {
    fn new(inner: W, total: u64, progress: Option<&'a ProgressFn>) -> Self {
        ProgressWriter {
            inner,
            written: 0,
            total,
            progress,
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<'_, W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.written += *n as u64;
            if let Some(p) = self.progress {
                p(self.written.min(self.total), self.total);
            }
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
