//! Integration test: cooperative cancellation
//!
//! An upload aborted mid-stream must leave nothing in the store and a
//! reusable sender; a cancelled receiver must come back downloadable
//! after reset without burning a download slot.

use std::io::Cursor;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sealdrop_archive::{Archive, ArchiveEntry};
use sealdrop_core::{Capabilities, Limits, TransferError};
use sealdrop_crypto::NONCE_SIZE;
use sealdrop_transfer::{
    MemoryTransport, Receiver, ReceiverState, Sender, SenderState, Transport, UploadRequest,
};

fn test_limits() -> Limits {
    Limits {
        record_size: 256,
        ..Limits::default()
    }
}

fn big_archive(limits: &Limits) -> Archive {
    let data: Vec<u8> = (0..64_000).map(|i| (i % 253) as u8).collect();
    let mut archive = Archive::new(limits);
    archive
        .add_files(vec![ArchiveEntry::from_bytes("big.bin", data)], limits)
        .expect("add file");
    archive
}

#[tokio::test]
async fn cancelled_upload_stores_nothing_and_sender_recovers() {
    let limits = test_limits();
    let transport = MemoryTransport::new();
    let archive = big_archive(&limits);

    let mut sender = Sender::new(transport.clone(), limits.clone());
    // Trip the token from inside the progress stream, partway through.
    let token = sender.cancellation_token();
    sender.on_progress(Box::new(move |sent, total| {
        if sent > total / 4 {
            token.cancel();
        }
    }));

    let err = sender
        .upload(&archive, None, &Capabilities::default())
        .await
        .expect_err("upload must abort");
    assert!(matches!(err, TransferError::Cancelled));
    assert_eq!(sender.state(), SenderState::Cancelled);
    assert_eq!(transport.bundle_count(), 0, "no partial bundle kept");
    assert_eq!(transport.cancelled_uploads(), 1);

    // The progress callback still holds the old token; reset arms a fresh
    // one, so the stale cancel is inert.
    sender.reset();
    assert_eq!(sender.state(), SenderState::Idle);
    let record = sender
        .upload(&archive, None, &Capabilities::default())
        .await
        .expect("retry succeeds");
    assert_eq!(sender.state(), SenderState::Complete);
    assert!(transport.contains(&record.id));
}

#[tokio::test]
async fn cancelled_buffered_upload_never_reaches_the_store() {
    let limits = test_limits();
    let transport = MemoryTransport::new();
    let archive = big_archive(&limits);

    let mut sender = Sender::new(transport.clone(), limits);
    sender.cancel();
    let err = sender
        .upload(&archive, None, &Capabilities { stream_upload: false })
        .await
        .expect_err("pre-cancelled upload");
    assert!(matches!(err, TransferError::Cancelled));
    assert_eq!(sender.state(), SenderState::Cancelled);
    assert_eq!(transport.bundle_count(), 0);
}

#[tokio::test]
async fn cancelled_receiver_resets_without_spending_a_download() {
    let limits = test_limits();
    let transport = MemoryTransport::new();
    let mut archive = big_archive(&limits);
    archive.set_download_limit(1, &limits);

    let mut sender = Sender::new(transport.clone(), limits.clone());
    let record = sender
        .upload(&archive, None, &Capabilities::default())
        .await
        .expect("upload");

    let mut receiver =
        Receiver::from_url(transport.clone(), limits, &record.url).expect("parse url");
    receiver.fetch_metadata().await.expect("metadata");

    receiver.cancel();
    let mut out = Cursor::new(Vec::new());
    let err = receiver.download(&mut out).await.expect_err("cancelled");
    assert!(matches!(err, TransferError::Cancelled));
    assert_eq!(receiver.state(), ReceiverState::Cancelled);

    // The only download slot is still available after reset.
    receiver.reset();
    assert_eq!(receiver.state(), ReceiverState::Idle);
    assert!(receiver.metadata().is_some(), "fetched metadata survives");
    let mut out = Cursor::new(Vec::new());
    let written = receiver.download(&mut out).await.expect("download");
    assert_eq!(written, 64_000);
}

#[tokio::test]
async fn stalled_upload_body_is_abandoned_on_cancel() {
    let transport = MemoryTransport::new();
    let cancel = CancellationToken::new();

    // The write half stays open and silent, so the body never yields a
    // chunk and never reaches EOF.
    let (_keep_open, body) = tokio::io::duplex(64);
    let request = UploadRequest {
        metadata: vec![0u8; 16],
        auth: String::new(),
        nonce: [0u8; NONCE_SIZE],
        time_limit_secs: 60,
        download_limit: 1,
        has_password: false,
        anti_abuse_token: None,
    };

    let upload = tokio::time::timeout(
        Duration::from_secs(5),
        transport.upload(request, Box::new(body), None, &cancel),
    );
    let trigger = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    };
    let (result, ()) = tokio::join!(upload, trigger);
    let result = result.expect("upload must observe cancellation");
    assert!(matches!(result, Err(TransferError::Cancelled)));
    assert_eq!(transport.cancelled_uploads(), 1);
    assert_eq!(transport.bundle_count(), 0);
}

#[tokio::test]
async fn cancelled_token_blocks_download_open() {
    let limits = test_limits();
    let transport = MemoryTransport::new();
    let mut archive = big_archive(&limits);
    archive.set_download_limit(1, &limits);

    let mut sender = Sender::new(transport.clone(), limits);
    let mut record = sender
        .upload(&archive, None, &Capabilities::default())
        .await
        .expect("upload");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = transport
        .open_download(&record.id, "", &cancel)
        .await
        .expect_err("refused while cancelled");
    assert!(matches!(err, TransferError::Cancelled));

    // The refused open did not count against the download limit.
    record.refresh(&transport).await.expect("refresh");
    assert_eq!(record.downloads_used, 0);
}
