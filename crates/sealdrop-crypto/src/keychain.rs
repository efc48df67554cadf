//! Keychain: all symmetric key material for one bundle
//!
//! The content key, the password key and the auth proof are three distinct
//! one-way derivations; none can be recovered from another. The secret and
//! nonce together fully determine the record key stream; losing either makes
//! the ciphertext permanently unrecoverable.

use argon2::Argon2;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use sealdrop_core::types::Metadata;
use sealdrop_core::{TransferError, TransferResult};

use crate::{KEY_SIZE, NONCE_SIZE, SECRET_SIZE};

/// The 128-bit bundle secret. Zeroized on drop.
///
/// Carried only in the fragment portion of the share URL; it must never be
/// logged or sent to the store.
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; SECRET_SIZE],
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECRET_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.bytes
    }

    /// Parse the url-safe base64 form carried in a share-link fragment.
    pub fn from_b64(s: &str) -> TransferResult<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| TransferError::UnsupportedFraming("bad secret encoding".into()))?;
        let bytes: [u8; SECRET_SIZE] = raw
            .try_into()
            .map_err(|_| TransferError::UnsupportedFraming("bad secret length".into()))?;
        Ok(Self { bytes })
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.bytes)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derives and holds the symmetric keys for one bundle.
///
/// Owned exclusively by one orchestrator for the life of one transfer.
pub struct Keychain {
    secret: SecretKey,
    nonce: [u8; NONCE_SIZE],
    password_key: Option<[u8; KEY_SIZE]>,
}

impl Keychain {
    /// Generate a fresh secret and stream nonce.
    ///
    /// Fails only if the OS entropy source does; that failure is fatal.
    pub fn generate() -> TransferResult<Self> {
        let mut secret = [0u8; SECRET_SIZE];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| TransferError::Entropy(e.to_string()))?;
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| TransferError::Entropy(e.to_string()))?;
        Ok(Self {
            secret: SecretKey::from_bytes(secret),
            nonce,
            password_key: None,
        })
    }

    /// Rebuild a keychain on the receiving side: the secret comes from the
    /// share-link fragment, the nonce from the bundle metadata.
    pub fn from_parts(secret: SecretKey, nonce: [u8; NONCE_SIZE]) -> Self {
        Self {
            secret,
            nonce,
            password_key: None,
        }
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Read-only export of the secret for the share-link fragment.
    pub fn secret_b64(&self) -> String {
        self.secret.to_b64()
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn has_password(&self) -> bool {
        self.password_key.is_some()
    }

    /// Derive the password key (Argon2id, salted by the stream nonce) and mix
    /// it into the authenticated-metadata material. Deterministic for a given
    /// password and nonce; rejects empty passwords.
    pub fn set_password(&mut self, password: &SecretString) -> TransferResult<()> {
        if password.expose_secret().is_empty() {
            return Err(TransferError::EmptyPassword);
        }
        let mut key = [0u8; KEY_SIZE];
        Argon2::default()
            .hash_password_into(password.expose_secret().as_bytes(), &self.nonce, &mut key)
            .map_err(|e| anyhow::anyhow!("password KDF failed: {e}"))?;
        self.password_key = Some(key);
        Ok(())
    }

    /// HKDF-SHA256 with a domain-separating info string, salted by the nonce.
    fn hkdf<const N: usize>(&self, ikm: &[u8], info: &[u8]) -> [u8; N] {
        let hkdf = Hkdf::<Sha256>::new(Some(&self.nonce), ikm);
        let mut okm = [0u8; N];
        // expand only fails for absurd output lengths; N is 12 or 32 here
        hkdf.expand(info, &mut okm)
            .unwrap_or_else(|_| unreachable!("HKDF output length"));
        okm
    }

    /// Content-encryption key for the record codec.
    pub(crate) fn record_key(&self) -> [u8; KEY_SIZE] {
        self.hkdf(self.secret.as_bytes(), b"sealdrop/record")
    }

    /// Base nonce for the record codec; per-record nonces are derived from it
    /// by XOR with the record index.
    pub(crate) fn record_base_nonce(&self) -> [u8; NONCE_SIZE] {
        self.hkdf(self.secret.as_bytes(), b"sealdrop/record-nonce")
    }

    fn metadata_key(&self) -> [u8; KEY_SIZE] {
        match &self.password_key {
            Some(pk) => {
                let mut ikm = Vec::with_capacity(SECRET_SIZE + KEY_SIZE);
                ikm.extend_from_slice(self.secret.as_bytes());
                ikm.extend_from_slice(pk);
                let key = self.hkdf(&ikm, b"sealdrop/metadata");
                ikm.zeroize();
                key
            }
            None => self.hkdf(self.secret.as_bytes(), b"sealdrop/metadata"),
        }
    }

    /// Proof-of-possession key sent with authenticated store operations.
    /// With a password set, the proof derives from the password key so the
    /// store can gate downloads without ever learning the secret.
    pub fn auth_key(&self) -> [u8; KEY_SIZE] {
        match &self.password_key {
            Some(pk) => self.hkdf(pk, b"sealdrop/auth"),
            None => self.hkdf(self.secret.as_bytes(), b"sealdrop/auth"),
        }
    }

    /// Authorization header value for store requests tied to this bundle.
    pub fn auth_header(&self) -> String {
        format!("sealdrop-v1 {}", STANDARD.encode(self.auth_key()))
    }

    /// Seal the bundle metadata (name, size, manifest) so the store only ever
    /// holds an opaque blob. The metadata key is unique per bundle, so a zero
    /// nonce is safe here.
    pub fn encrypt_metadata(&self, metadata: &Metadata) -> TransferResult<Vec<u8>> {
        let plaintext = metadata.to_bytes()?;
        let mut key = self.metadata_key();
        let cipher = ChaCha20Poly1305::new((&key).into());
        key.zeroize();
        cipher
            .encrypt(Nonce::from_slice(&[0u8; NONCE_SIZE]), plaintext.as_ref())
            .map_err(|e| anyhow::anyhow!("metadata encryption failed: {e}").into())
    }

    /// Open the sealed metadata blob.
    ///
    /// Fails with `AuthenticationFailed` on a wrong secret or wrong password;
    /// the caller decides whether that means `InvalidPassword`.
    pub fn decrypt_metadata(&self, blob: &[u8]) -> TransferResult<Metadata> {
        let mut key = self.metadata_key();
        let cipher = ChaCha20Poly1305::new((&key).into());
        key.zeroize();
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&[0u8; NONCE_SIZE]), blob)
            .map_err(|_| TransferError::AuthenticationFailed)?;
        Ok(Metadata::from_bytes(&plaintext)?)
    }
}

impl std::fmt::Debug for Keychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keychain")
            .field("secret", &self.secret)
            .field("nonce", &self.nonce)
            .field("password", &self.password_key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealdrop_core::types::{Manifest, ManifestFile};

    fn test_metadata() -> Metadata {
        Metadata {
            name: "notes.txt".into(),
            size: 64,
            manifest: Manifest {
                files: vec![ManifestFile {
                    name: "notes.txt".into(),
                    size: 64,
                }],
            },
        }
    }

    #[test]
    fn test_generate_unique() {
        let a = Keychain::generate().unwrap();
        let b = Keychain::generate().unwrap();
        assert_ne!(a.secret.as_bytes(), b.secret.as_bytes());
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_secret_b64_roundtrip() {
        let keychain = Keychain::generate().unwrap();
        let restored = SecretKey::from_b64(&keychain.secret_b64()).unwrap();
        assert_eq!(restored.as_bytes(), keychain.secret.as_bytes());
    }

    #[test]
    fn test_secret_b64_rejects_bad_input() {
        assert!(SecretKey::from_b64("not/valid/b64!!").is_err());
        assert!(SecretKey::from_b64("AAAA").is_err()); // wrong length
    }

    #[test]
    fn test_derivations_are_domain_separated() {
        let keychain = Keychain::generate().unwrap();
        let record = keychain.record_key();
        let auth = keychain.auth_key();
        let meta = keychain.metadata_key();
        assert_ne!(record, auth);
        assert_ne!(record, meta);
        assert_ne!(auth, meta);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let keychain = Keychain::generate().unwrap();
        let blob = keychain.encrypt_metadata(&test_metadata()).unwrap();
        let restored = keychain.decrypt_metadata(&blob).unwrap();
        assert_eq!(restored.name, "notes.txt");
        assert_eq!(restored.size, 64);
    }

    #[test]
    fn test_metadata_wrong_secret() {
        let sender = Keychain::generate().unwrap();
        let blob = sender.encrypt_metadata(&test_metadata()).unwrap();

        let other = Keychain::from_parts(
            SecretKey::from_bytes([7u8; SECRET_SIZE]),
            *sender.nonce(),
        );
        assert!(matches!(
            other.decrypt_metadata(&blob),
            Err(TransferError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_password_gates_metadata() {
        let mut sender = Keychain::generate().unwrap();
        sender.set_password(&SecretString::from("hunter2")).unwrap();
        let blob = sender.encrypt_metadata(&test_metadata()).unwrap();

        let secret = SecretKey::from_bytes(*sender.secret().as_bytes());
        let mut receiver = Keychain::from_parts(secret, *sender.nonce());

        // without the password the blob fails to open
        assert!(receiver.decrypt_metadata(&blob).is_err());

        // wrong password also fails
        receiver.set_password(&SecretString::from("hunter3")).unwrap();
        assert!(receiver.decrypt_metadata(&blob).is_err());

        // correct password opens it
        receiver.set_password(&SecretString::from("hunter2")).unwrap();
        assert!(receiver.decrypt_metadata(&blob).is_ok());
    }

    #[test]
    fn test_password_changes_auth_key() {
        let mut keychain = Keychain::generate().unwrap();
        let before = keychain.auth_key();
        keychain.set_password(&SecretString::from("tops3cret")).unwrap();
        let after = keychain.auth_key();
        assert_ne!(before, after);
    }

    #[test]
    fn test_password_kdf_deterministic() {
        let mut a = Keychain::generate().unwrap();
        let secret = SecretKey::from_bytes(*a.secret().as_bytes());
        let mut b = Keychain::from_parts(secret, *a.nonce());

        a.set_password(&SecretString::from("same")).unwrap();
        b.set_password(&SecretString::from("same")).unwrap();
        assert_eq!(a.auth_key(), b.auth_key());
    }

    #[test]
    fn test_empty_password_rejected() {
        let mut keychain = Keychain::generate().unwrap();
        assert!(matches!(
            keychain.set_password(&SecretString::from("")),
            Err(TransferError::EmptyPassword)
        ));
        assert!(!keychain.has_password());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let keychain = Keychain::generate().unwrap();
        let printed = format!("{keychain:?}");
        assert!(printed.contains("[REDACTED]"));
        assert!(!printed.contains(&keychain.secret_b64()));
    }
}
