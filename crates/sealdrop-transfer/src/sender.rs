//! Upload orchestrator
//!
//! Drives one archive through key generation, metadata sealing, stream
//! encryption and transport upload. Encryption and upload run
//! concurrently over an in-process duplex pipe when the transport
//! supports streaming bodies, so ciphertext never has to land on disk.

use std::io::Cursor;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sealdrop_archive::Archive;
use sealdrop_core::{Capabilities, Limits, Metadata, ProgressFn, TransferError, TransferResult};
use sealdrop_crypto::{encrypt_stream, encrypted_size, Keychain};

use crate::record::{Expiry, TransferRecord};
use crate::transport::{Transport, UploadRequest};

/// Where an upload currently is. Terminal states stick until the next
/// [`Sender::upload`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Encrypting,
    Uploading,
    Complete,
    Failed,
    Cancelled,
}

pub struct Sender<T> {
    transport: T,
    limits: Limits,
    state: SenderState,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl<T: Transport> Sender<T> {
    pub fn new(transport: T, limits: Limits) -> Self {
        Sender {
            transport,
            limits,
            state: SenderState::Idle,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Register a `(bytes_sent, bytes_total)` callback. Totals are
    /// ciphertext sizes, known exactly before the first byte moves.
    pub fn on_progress(&mut self, f: ProgressFn) {
        self.progress = Some(f);
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Token observed by the in-flight upload. Cloneable, so a progress
    /// callback or another task can trip it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the in-flight upload, if any.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// After a cancelled or failed attempt, arm a fresh token so the
    /// sender can be reused. Tokens handed out before the reset become
    /// inert.
    pub fn reset(&mut self) {
        if self.state == SenderState::Cancelled || self.state == SenderState::Failed {
            self.cancel = CancellationToken::new();
            self.state = SenderState::Idle;
        }
    }

    /// Encrypt and upload `archive`, returning the owner's record on
    /// success.
    pub async fn upload(
        &mut self,
        archive: &Archive,
        anti_abuse_token: Option<String>,
        capabilities: &Capabilities,
    ) -> TransferResult<TransferRecord> {
        self.state = SenderState::Encrypting;
        match self.run(archive, anti_abuse_token, capabilities).await {
            Ok(record) => {
                self.state = SenderState::Complete;
                info!(id = %record.id, size = record.size, "upload complete");
                Ok(record)
            }
            Err(e) if e.is_cancelled() => {
                self.state = SenderState::Cancelled;
                Err(e)
            }
            Err(e) => {
                self.state = SenderState::Failed;
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        archive: &Archive,
        anti_abuse_token: Option<String>,
        capabilities: &Capabilities,
    ) -> TransferResult<TransferRecord> {
        if archive.num_files() == 0 {
            return Err(TransferError::Config("archive is empty".into()));
        }
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let mut keychain = Keychain::generate()?;
        if let Some(password) = archive.password() {
            keychain.set_password(password)?;
        }

        let manifest = archive.manifest();
        let name = archive.name();
        let size = archive.size();
        let metadata = Metadata {
            name: name.clone(),
            size,
            manifest: manifest.clone(),
        };
        let blob = keychain.encrypt_metadata(&metadata)?;

        let record_size = self.limits.record_size;
        let total = encrypted_size(size, record_size);
        let time_limit_secs = if archive.has_expiry() {
            archive.time_limit_secs()
        } else {
            0
        };
        let download_limit = archive.download_limit();
        let request = UploadRequest {
            metadata: blob,
            auth: keychain.auth_header(),
            nonce: *keychain.nonce(),
            time_limit_secs,
            download_limit,
            has_password: keychain.has_password(),
            anti_abuse_token,
        };
        debug!(
            files = archive.num_files(),
            size,
            ciphertext = total,
            streaming = capabilities.stream_upload,
            "starting upload"
        );

        let reader = archive.plaintext_reader().await?;
        let started = Instant::now();
        let cancel = self.cancel.clone();
        let progress = self.progress.as_ref();
        let report = |sent: u64| {
            if let Some(p) = progress {
                p(sent.min(total), total);
            }
        };

        let outcome = if capabilities.stream_upload {
            // Encrypt into one end of a duplex pipe while the transport
            // drains the other. Backpressure from the store throttles the
            // encryptor through the pipe's capacity.
            let (mut ours, theirs) = tokio::io::duplex(4 * record_size as usize);
            self.state = SenderState::Uploading;
            let kc = &keychain;
            // The write half lives inside the block so every exit closes the
            // pipe and the transport sees EOF instead of waiting forever.
            let sealer = async move {
                let sealed = encrypt_stream(kc, reader, &mut ours, record_size).await;
                let closed = ours.shutdown().await;
                sealed?;
                closed?;
                TransferResult::Ok(())
            };
            let upload =
                self.transport
                    .upload(request, Box::new(theirs), Some(&report), &cancel);
            let (sealed, uploaded) = tokio::join!(sealer, upload);
            let outcome = uploaded?;
            if let Err(e) = sealed {
                // A half-sealed bundle is useless; best effort removal.
                let _ = self.transport.delete(&outcome.id, &outcome.owner_token).await;
                return Err(e);
            }
            outcome
        } else {
            // Transport wants a sized body. Seal fully in memory first.
            let mut buf = Cursor::new(Vec::with_capacity(total as usize));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                sealed = encrypt_stream(&keychain, reader, &mut buf, record_size) => {
                    sealed?;
                }
            }
            self.state = SenderState::Uploading;
            let body = Box::new(Cursor::new(buf.into_inner()));
            self.transport
                .upload(request, body, Some(&report), &cancel)
                .await?
        };

        let created_at = TransferRecord::now();
        let elapsed = started.elapsed();
        let secs = elapsed.as_secs_f64();
        let speed = if secs > 0.0 { size as f64 / secs } else { 0.0 };
        Ok(TransferRecord {
            url: TransferRecord::share_url(&outcome.url, keychain.secret().as_bytes()),
            id: outcome.id,
            name,
            size,
            manifest,
            created_at,
            duration_ms: elapsed.as_millis() as u64,
            speed,
            secret: keychain.secret().as_bytes().to_vec(),
            nonce: keychain.nonce().to_vec(),
            owner_token: outcome.owner_token,
            download_limit,
            downloads_used: 0,
            time_limit_secs,
            has_password: keychain.has_password(),
            expiry: if time_limit_secs == 0 {
                Expiry::Never
            } else {
                Expiry::At(created_at + time_limit_secs)
            },
        })
    }
}
