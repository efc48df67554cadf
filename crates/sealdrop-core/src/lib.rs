//! sealdrop-core: shared types, limits configuration and error taxonomy

pub mod config;
pub mod error;
pub mod types;

pub use config::Limits;
pub use error::{TransferError, TransferResult};
pub use types::{Capabilities, Manifest, ManifestFile, Metadata, ProgressFn};
