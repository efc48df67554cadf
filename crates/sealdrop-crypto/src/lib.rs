//! sealdrop-crypto: keychain and streaming record codec
//!
//! Wire format: `[header][record_0][record_1]...[record_last]`
//! ```text
//! header = "sdp1" || version (1 byte) || record_size (u32 BE) || nonce (12 bytes)
//! record = ChaCha20-Poly1305( data || delimiter ), i.e. ciphertext || 16-byte tag
//! delimiter: 0x01 = more records follow, 0x02 = final record
//! ```
//!
//! Key hierarchy (all derivations HKDF-SHA256 salted by the stream nonce):
//! ```text
//! Secret Key (128-bit, random, carried only in the share-link fragment)
//!   ├── Record Key (info="sealdrop/record") + base record nonce
//!   │   └── Record AEAD: per-record nonce = base XOR record index
//!   ├── Metadata Key (info="sealdrop/metadata"; IKM mixes the Argon2id
//!   │   password key when a password is set)
//!   └── Auth Key (info="sealdrop/auth"; derived from the password key
//!       instead when a password is set)
//! ```

pub mod codec;
pub mod keychain;

pub use codec::{decrypt_stream, decrypted_size, encrypt_stream, encrypted_size};
pub use keychain::{Keychain, SecretKey};

/// Size of the bundle secret in bytes (128-bit)
pub const SECRET_SIZE: usize = 16;

/// Size of the stream nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of a derived symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Stream header: magic (4) + version (1) + record size (4) + nonce (12)
pub const HEADER_SIZE: usize = 4 + 1 + 4 + NONCE_SIZE;

/// Per-record wire overhead: finality delimiter + tag
pub const RECORD_OVERHEAD: usize = 1 + TAG_SIZE;

pub(crate) const MAGIC: [u8; 4] = *b"sdp1";
pub(crate) const VERSION: u8 = 1;

/// Smallest accepted record size (plaintext bytes per record)
pub const MIN_RECORD_SIZE: u32 = 64;

/// Largest accepted record size
pub const MAX_RECORD_SIZE: u32 = 1024 * 1024;
