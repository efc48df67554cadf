//! sealdrop-transfer: the orchestration layer
//!
//! [`Sender`] and [`Receiver`] drive an archive through encryption and a
//! [`Transport`] implementation, with progress reporting and cooperative
//! cancellation throughout. A completed upload yields a [`TransferRecord`],
//! the owner's durable handle for sharing, refreshing counters and deleting
//! the bundle. [`MemoryTransport`] is an in-process store for tests and
//! local wiring.

pub mod memory;
pub mod receiver;
pub mod record;
pub mod sender;
pub mod transport;

pub use memory::MemoryTransport;
pub use receiver::{Receiver, ReceiverState};
pub use record::{Expiry, TransferRecord};
pub use sender::{Sender, SenderState};
pub use transport::{
    BundleInfo, DownloadSource, OwnedInfo, Transport, UploadOutcome, UploadRequest,
};
