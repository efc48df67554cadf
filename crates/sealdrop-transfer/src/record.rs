//! Persistent record of a completed upload
//!
//! Everything the owner needs to re-derive keys, share the link, refresh
//! counters and manage the bundle later. Serializes with serde so callers
//! can persist records however they like.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sealdrop_core::{Manifest, TransferResult};
use sealdrop_crypto::{SecretKey, NONCE_SIZE};

use crate::transport::{OwnedInfo, Transport};

/// When a bundle stops being retrievable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiry {
    /// No time limit was set
    Never,
    /// Gone at this unix timestamp, unless the download limit hits first
    At(u64),
    /// The store has already discarded it
    Spent,
}

/// One owned upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    /// Full share URL including the `#secret` fragment
    pub url: String,
    pub name: String,
    /// Plaintext payload size in bytes
    pub size: u64,
    pub manifest: Manifest,
    /// Unix seconds at upload completion
    pub created_at: u64,
    pub duration_ms: u64,
    /// Plaintext bytes per second over the upload
    pub speed: f64,
    #[serde(with = "b64")]
    pub secret: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    pub owner_token: String,
    pub download_limit: u32,
    pub downloads_used: u32,
    pub time_limit_secs: u64,
    pub has_password: bool,
    pub expiry: Expiry,
}

impl TransferRecord {
    /// Whether the record itself says the bundle is gone. The store may
    /// have discarded it earlier; [`refresh`](Self::refresh) reconciles.
    pub fn expired(&self, now: u64) -> bool {
        match self.expiry {
            Expiry::Never => self.limit_reached(),
            Expiry::At(when) => now >= when || self.limit_reached(),
            Expiry::Spent => true,
        }
    }

    fn limit_reached(&self) -> bool {
        self.download_limit != 0 && self.downloads_used >= self.download_limit
    }

    /// Secret key for re-deriving the keychain.
    pub fn secret_key(&self) -> SecretKey {
        let mut bytes = [0u8; sealdrop_crypto::SECRET_SIZE];
        let n = self.secret.len().min(bytes.len());
        bytes[..n].copy_from_slice(&self.secret[..n]);
        SecretKey::from_bytes(bytes)
    }

    pub fn nonce_bytes(&self) -> [u8; NONCE_SIZE] {
        let mut bytes = [0u8; NONCE_SIZE];
        let n = self.nonce.len().min(bytes.len());
        bytes[..n].copy_from_slice(&self.nonce[..n]);
        bytes
    }

    /// Pull current counters from the store and fold them in. Returns true
    /// when anything observable changed. A missing bundle marks the record
    /// [`Expiry::Spent`] rather than erroring.
    pub async fn refresh<T: Transport>(&mut self, transport: &T) -> TransferResult<bool> {
        let info = match transport.info(&self.id, &self.owner_token).await {
            Ok(info) => info,
            Err(e) if matches!(e, sealdrop_core::TransferError::NotFound) => {
                let changed = self.expiry != Expiry::Spent;
                self.expiry = Expiry::Spent;
                return Ok(changed);
            }
            Err(e) => return Err(e),
        };
        Ok(self.apply(info))
    }

    /// Fold externally obtained counters into the record without a store
    /// round trip. Returns true when anything observable changed.
    pub fn apply(&mut self, info: OwnedInfo) -> bool {
        let mut changed = false;
        if info.downloads_used != self.downloads_used {
            self.downloads_used = info.downloads_used;
            changed = true;
        }
        if info.download_limit != self.download_limit {
            self.download_limit = info.download_limit;
            changed = true;
        }
        if info.ttl_secs == Some(0) && self.expiry != Expiry::Spent {
            self.expiry = Expiry::Spent;
            changed = true;
        }
        if changed {
            debug!(id = %self.id, used = self.downloads_used, "record refreshed");
        }
        changed
    }

    /// Raise or lower the download limit. Local state only changes after
    /// the store has accepted the new value.
    pub async fn change_download_limit<T: Transport>(
        &mut self,
        transport: &T,
        limit: u32,
    ) -> TransferResult<()> {
        if limit == self.download_limit {
            return Ok(());
        }
        transport
            .change_download_limit(&self.id, &self.owner_token, limit)
            .await?;
        self.download_limit = limit;
        Ok(())
    }

    /// Remove the bundle from the store.
    pub async fn delete<T: Transport>(&self, transport: &T) -> TransferResult<()> {
        transport.delete(&self.id, &self.owner_token).await
    }

    pub(crate) fn share_url(base: &str, secret: &[u8]) -> String {
        format!("{base}#{}", URL_SAFE_NO_PAD.encode(secret))
    }

    pub(crate) fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

mod b64 {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        URL_SAFE_NO_PAD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        URL_SAFE_NO_PAD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
