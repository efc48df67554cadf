//! Manifest-driven streaming zip container
//!
//! Rebuilds a multi-file bundle from one decrypted byte stream. Entries are
//! stored uncompressed with data descriptors (general-purpose flag bit 3),
//! so the CRC is computed while the bytes stream through and nothing is
//! buffered beyond one copy chunk.
//!
//! Per-entry layout:
//! ```text
//! [30-byte local header + name][entry bytes][16-byte data descriptor]
//! ```
//! followed by the central directory and the end-of-central-directory record.
//! Zip64 is not supported; sizes and offsets must fit 32-bit fields.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use sealdrop_core::types::Manifest;
use sealdrop_core::{TransferError, TransferResult};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_SIG: u32 = 0x0201_4b50;
const END_SIG: u32 = 0x0605_4b50;

const LOCAL_HEADER_LEN: u64 = 30;
const DESCRIPTOR_LEN: u64 = 16;
const CENTRAL_ENTRY_LEN: u64 = 46;
const END_RECORD_LEN: u64 = 22;

/// Version needed to extract: 2.0 (data descriptors)
const VERSION_NEEDED: u16 = 20;
/// Bit 3: sizes/CRC in data descriptor. Bit 11: UTF-8 names.
const FLAGS: u16 = 0x0808;
/// DOS date 1980-01-01, time 00:00
const DOS_DATE: u16 = 0x0021;
const DOS_TIME: u16 = 0x0000;

/// Exact size of the container [`bundle_stream`] will produce for this
/// manifest, computable before any payload bytes exist.
pub fn zip_size(manifest: &Manifest) -> u64 {
    let mut size = END_RECORD_LEN;
    for file in &manifest.files {
        let name_len = file.name.len() as u64;
        size += LOCAL_HEADER_LEN + name_len + file.size + DESCRIPTOR_LEN;
        size += CENTRAL_ENTRY_LEN + name_len;
    }
    size
}

fn check_fits(manifest: &Manifest) -> TransferResult<()> {
    if manifest.files.len() > u16::MAX as usize {
        return Err(TransferError::TooManyFiles {
            count: manifest.files.len(),
            limit: u16::MAX as usize,
        });
    }
    let limit = u64::from(u32::MAX);
    for file in &manifest.files {
        if file.size >= limit {
            return Err(TransferError::FileTooBig {
                size: file.size,
                limit,
            });
        }
    }
    if zip_size(manifest) >= limit {
        return Err(TransferError::FileTooBig {
            size: zip_size(manifest),
            limit,
        });
    }
    Ok(())
}

struct EntryFacts {
    crc: u32,
    offset: u64,
}

/// Stream `reader` (the decrypted payload, entries concatenated in manifest
/// order) into `writer` as a zip container. Pull-based; copies in 64 KiB
/// chunks. Returns total container bytes written.
///
/// Input that ends before an entry's declared size is `TruncatedStream`.
pub async fn bundle_stream<R, W>(
    manifest: &Manifest,
    mut reader: R,
    mut writer: W,
) -> TransferResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    check_fits(manifest)?;

    let mut offset = 0u64;
    let mut facts = Vec::with_capacity(manifest.files.len());
    let mut chunk = vec![0u8; 64 * 1024];

    for file in &manifest.files {
        let header_offset = offset;

        let mut header = Vec::with_capacity(LOCAL_HEADER_LEN as usize + file.name.len());
        header.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        header.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
        header.extend_from_slice(&FLAGS.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        header.extend_from_slice(&DOS_TIME.to_le_bytes());
        header.extend_from_slice(&DOS_DATE.to_le_bytes());
        header.extend_from_slice(&[0u8; 12]); // crc + sizes: in descriptor
        header.extend_from_slice(&(file.name.len() as u16).to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes()); // extra length
        header.extend_from_slice(file.name.as_bytes());
        writer.write_all(&header).await?;
        offset += header.len() as u64;

        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = file.size;
        while remaining > 0 {
            let want = remaining.min(chunk.len() as u64) as usize;
            let n = reader.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err(TransferError::TruncatedStream);
            }
            hasher.update(&chunk[..n]);
            writer.write_all(&chunk[..n]).await?;
            offset += n as u64;
            remaining -= n as u64;
        }
        let crc = hasher.finalize();

        let mut descriptor = Vec::with_capacity(DESCRIPTOR_LEN as usize);
        descriptor.extend_from_slice(&DESCRIPTOR_SIG.to_le_bytes());
        descriptor.extend_from_slice(&crc.to_le_bytes());
        descriptor.extend_from_slice(&(file.size as u32).to_le_bytes());
        descriptor.extend_from_slice(&(file.size as u32).to_le_bytes());
        writer.write_all(&descriptor).await?;
        offset += descriptor.len() as u64;

        facts.push(EntryFacts {
            crc,
            offset: header_offset,
        });
    }

    let central_offset = offset;
    for (file, fact) in manifest.files.iter().zip(&facts) {
        let mut entry = Vec::with_capacity(CENTRAL_ENTRY_LEN as usize + file.name.len());
        entry.extend_from_slice(&CENTRAL_SIG.to_le_bytes());
        entry.extend_from_slice(&VERSION_NEEDED.to_le_bytes()); // made by
        entry.extend_from_slice(&VERSION_NEEDED.to_le_bytes()); // needed
        entry.extend_from_slice(&FLAGS.to_le_bytes());
        entry.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        entry.extend_from_slice(&DOS_TIME.to_le_bytes());
        entry.extend_from_slice(&DOS_DATE.to_le_bytes());
        entry.extend_from_slice(&fact.crc.to_le_bytes());
        entry.extend_from_slice(&(file.size as u32).to_le_bytes());
        entry.extend_from_slice(&(file.size as u32).to_le_bytes());
        entry.extend_from_slice(&(file.name.len() as u16).to_le_bytes());
        entry.extend_from_slice(&0u16.to_le_bytes()); // extra length
        entry.extend_from_slice(&0u16.to_le_bytes()); // comment length
        entry.extend_from_slice(&0u16.to_le_bytes()); // disk number
        entry.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        entry.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        entry.extend_from_slice(&(fact.offset as u32).to_le_bytes());
        entry.extend_from_slice(file.name.as_bytes());
        writer.write_all(&entry).await?;
        offset += entry.len() as u64;
    }
    let central_size = offset - central_offset;

    let mut end = Vec::with_capacity(END_RECORD_LEN as usize);
    end.extend_from_slice(&END_SIG.to_le_bytes());
    end.extend_from_slice(&0u16.to_le_bytes()); // this disk
    end.extend_from_slice(&0u16.to_le_bytes()); // central directory disk
    end.extend_from_slice(&(facts.len() as u16).to_le_bytes());
    end.extend_from_slice(&(facts.len() as u16).to_le_bytes());
    end.extend_from_slice(&(central_size as u32).to_le_bytes());
    end.extend_from_slice(&(central_offset as u32).to_le_bytes());
    end.extend_from_slice(&0u16.to_le_bytes()); // comment length
    writer.write_all(&end).await?;
    offset += end.len() as u64;

    writer.flush().await?;
    debug!(
        entries = facts.len(),
        bytes = offset,
        "bundle container written"
    );
    Ok(offset)
}
