//! Streaming record codec: plaintext stream → authenticated records → back
//!
//! Records are strictly ordered; the per-record nonce binds each record to
//! its index, so reordered or duplicated records cannot verify. The finality
//! delimiter lives inside the sealed plaintext, which makes truncation
//! tamper-evident: a stream that ends without an authenticated final record
//! is rejected.
//!
//! Memory use is bounded by one record regardless of payload size.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use zeroize::Zeroize;

use sealdrop_core::{TransferError, TransferResult};

use crate::keychain::Keychain;
use crate::{
    HEADER_SIZE, MAGIC, MAX_RECORD_SIZE, MIN_RECORD_SIZE, NONCE_SIZE, RECORD_OVERHEAD, VERSION,
};

/// More records follow this one.
const DELIM_MORE: u8 = 0x01;
/// This is the final record of the stream.
const DELIM_FINAL: u8 = 0x02;

/// Exact ciphertext length for `plain` plaintext bytes.
///
/// Every full record carries `record_size` data bytes; the stream always ends
/// with a final record carrying the remainder (possibly empty).
pub fn encrypted_size(plain: u64, record_size: u32) -> u64 {
    let rs = u64::from(record_size);
    let overhead = RECORD_OVERHEAD as u64;
    let full = plain / rs;
    let rem = plain % rs;
    HEADER_SIZE as u64 + full * (rs + overhead) + rem + overhead
}

/// Inverse of [`encrypted_size`]: plaintext length for a well-formed stream
/// of `cipher` total bytes. Fails if no well-formed stream has that length.
pub fn decrypted_size(cipher: u64, record_size: u32) -> TransferResult<u64> {
    let overhead = RECORD_OVERHEAD as u64;
    let body = cipher
        .checked_sub(HEADER_SIZE as u64 + overhead)
        .ok_or(TransferError::TruncatedStream)?;
    let wire = u64::from(record_size) + overhead;
    let full = body / wire;
    let rem = body % wire;
    if rem > u64::from(record_size) {
        // final record would exceed the record size
        return Err(TransferError::UnsupportedFraming(
            "ciphertext length does not frame".into(),
        ));
    }
    Ok(full * u64::from(record_size) + rem)
}

fn check_record_size(record_size: u32) -> TransferResult<()> {
    if !(MIN_RECORD_SIZE..=MAX_RECORD_SIZE).contains(&record_size) {
        return Err(TransferError::UnsupportedFraming(format!(
            "record size {record_size} outside [{MIN_RECORD_SIZE}, {MAX_RECORD_SIZE}]"
        )));
    }
    Ok(())
}

/// Per-record nonce: base nonce with the trailing 8 bytes XOR record index.
fn record_nonce(base: &[u8; NONCE_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    for (b, i) in nonce[NONCE_SIZE - 8..].iter_mut().zip(index.to_be_bytes()) {
        *b ^= i;
    }
    nonce
}

/// Fill `buf` from `r`, stopping early only at EOF. Returns bytes read.
async fn read_full<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Encrypt a plaintext stream into the sealdrop record format.
///
/// Produces output lazily as input becomes available; record N+1 is never
/// sealed before record N is fully written. Returns total ciphertext bytes.
pub async fn encrypt_stream<R, W>(
    keychain: &Keychain,
    mut reader: R,
    mut writer: W,
    record_size: u32,
) -> TransferResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    check_record_size(record_size)?;

    let mut key = keychain.record_key();
    let cipher = ChaCha20Poly1305::new((&key).into());
    key.zeroize();
    let base_nonce = keychain.record_base_nonce();

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(&MAGIC);
    header.push(VERSION);
    header.extend_from_slice(&record_size.to_be_bytes());
    header.extend_from_slice(keychain.nonce());
    writer.write_all(&header).await?;

    let rs = record_size as usize;
    let mut data = vec![0u8; rs];
    let mut record = Vec::with_capacity(rs + 1);
    let mut index: u64 = 0;
    let mut total = HEADER_SIZE as u64;

    loop {
        let n = read_full(&mut reader, &mut data).await?;
        let last = n < rs;

        record.clear();
        record.extend_from_slice(&data[..n]);
        record.push(if last { DELIM_FINAL } else { DELIM_MORE });

        let nonce = record_nonce(&base_nonce, index);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), record.as_ref())
            .map_err(|e| anyhow::anyhow!("record seal failed: {e}"))?;
        writer.write_all(&sealed).await?;
        total += sealed.len() as u64;
        index += 1;

        if last {
            break;
        }
    }

    writer.flush().await?;
    data.zeroize();
    record.zeroize();
    debug!(records = index, bytes = total, "stream sealed");
    Ok(total)
}

/// Decrypt a sealdrop record stream.
///
/// Fail-closed: no plaintext for a record is released before its tag
/// verifies, and the first failure aborts the whole stream. The header's
/// record size must match `record_size`. Returns total plaintext bytes.
pub async fn decrypt_stream<R, W>(
    keychain: &Keychain,
    mut reader: R,
    mut writer: W,
    record_size: u32,
) -> TransferResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    check_record_size(record_size)?;

    let mut header = [0u8; HEADER_SIZE];
    if read_full(&mut reader, &mut header).await? < HEADER_SIZE {
        return Err(TransferError::TruncatedStream);
    }
    if header[..4] != MAGIC {
        return Err(TransferError::UnsupportedFraming("bad magic".into()));
    }
    if header[4] != VERSION {
        return Err(TransferError::UnsupportedFraming(format!(
            "unknown version {}",
            header[4]
        )));
    }
    let stream_rs = u32::from_be_bytes(header[5..9].try_into().unwrap_or_default());
    if stream_rs != record_size {
        return Err(TransferError::UnsupportedFraming(format!(
            "record size mismatch: stream {stream_rs}, configured {record_size}"
        )));
    }
    let mut stream_nonce = [0u8; NONCE_SIZE];
    stream_nonce.copy_from_slice(&header[9..]);

    // Keys derive from the header nonce, so a receiver keychain built from
    // the bare secret verifies against whatever nonce the sender used. A
    // tampered nonce simply fails the first record's tag.
    let receiver = Keychain::from_parts(
        crate::keychain::SecretKey::from_bytes(*keychain.secret().as_bytes()),
        stream_nonce,
    );
    let mut key = receiver.record_key();
    let cipher = ChaCha20Poly1305::new((&key).into());
    key.zeroize();
    let base_nonce = receiver.record_base_nonce();

    let wire = record_size as usize + RECORD_OVERHEAD;
    let mut buf = vec![0u8; wire];
    let mut index: u64 = 0;
    let mut total: u64 = 0;

    loop {
        let n = read_full(&mut reader, &mut buf).await?;
        if n == 0 {
            // stream ended on a record boundary without a final record
            return Err(TransferError::TruncatedStream);
        }
        if n < RECORD_OVERHEAD {
            return Err(TransferError::TruncatedStream);
        }

        let nonce = record_nonce(&base_nonce, index);
        let mut plain = cipher
            .decrypt(Nonce::from_slice(&nonce), &buf[..n])
            .map_err(|_| TransferError::AuthenticationFailed)?;
        let delim = plain.pop().ok_or(TransferError::AuthenticationFailed)?;

        match delim {
            DELIM_MORE => {
                if n < wire {
                    // a short record may only be the final one
                    plain.zeroize();
                    return Err(TransferError::TruncatedStream);
                }
                writer.write_all(&plain).await?;
                total += plain.len() as u64;
                plain.zeroize();
            }
            DELIM_FINAL => {
                writer.write_all(&plain).await?;
                total += plain.len() as u64;
                plain.zeroize();

                let mut probe = [0u8; 1];
                if reader.read(&mut probe).await? != 0 {
                    return Err(TransferError::UnsupportedFraming(
                        "data after final record".into(),
                    ));
                }
                writer.flush().await?;
                debug!(records = index + 1, bytes = total, "stream opened");
                return Ok(total);
            }
            other => {
                plain.zeroize();
                return Err(TransferError::UnsupportedFraming(format!(
                    "unknown record delimiter {other:#04x}"
                )));
            }
        }
        index += 1;
    }
}
