//! sealdrop-archive: the set of files to send, and how to get them back
//!
//! An [`Archive`] is the mutable, in-memory staging area for one upload:
//! ordered entries, aggregate limits, bundle policy (expiry, download limit,
//! optional password). On the way back down, [`zip::bundle_stream`] rebuilds
//! a multi-file bundle from one decrypted byte stream using the manifest,
//! without ever buffering the payload.

pub mod archive;
pub mod zip;

pub use archive::{Archive, ArchiveEntry, FileSource};
pub use zip::{bundle_stream, zip_size};
