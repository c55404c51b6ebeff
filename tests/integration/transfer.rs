use crate::*;

use bytes::Bytes;
use meshtx_core::sender::plan_transfer;
use meshtx_core::wire::MAX_PAYLOAD;
use meshtx_services::{collect_replies, send_paced};

/// 500 bytes of 0xAA: three chunks, checksum 85000, two ACKs, one delivery.
#[tokio::test]
async fn test_reference_payload_end_to_end() -> Result<()> {
    let mut pair = Pair::spawn(ReceiverOptions::default()).await?;

    let payload = Bytes::from(vec![0xAA; 500]);
    let plan = plan_transfer(RECEIVER, payload.clone(), 0x1234_5678, fast_pacing())?;
    assert_eq!(plan.checksum, 0x0001_4C08);
    assert_eq!(plan.checksum, 85_000);
    assert_eq!(plan.chunk_count(), 3);

    let report = send_paced(&pair.sender, &plan).await?;
    assert_eq!(report.frames_sent, 5);
    assert_eq!(report.chunks_skipped, 0);

    let replies = collect_replies(&pair.sender, plan.transfer_id, WAIT).await;
    assert_eq!(replies.acks, 2, "replies: {replies:?}");
    assert!(replies.errors.is_empty());

    let delivery = pair.next_delivery().await?;
    assert_eq!(delivery.source, SENDER);
    assert_eq!(delivery.payload, payload);

    let stats = pair.stop().await?;
    assert_eq!(stats.started, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.checksum_failures, 0);
    Ok(())
}

/// Sizes around the chunk boundary and at the limit all arrive intact.
#[tokio::test]
async fn test_sizes_across_chunk_boundaries() -> Result<()> {
    let mut pair = Pair::spawn(ReceiverOptions::default()).await?;

    for (n, size) in [0usize, 1, 180, 181, MAX_PAYLOAD].into_iter().enumerate() {
        let payload: Vec<u8> = (0..size).map(|i| (i * 7 + n) as u8).collect();
        let transfer_id = 0x100 + n as u32;
        let plan = plan_transfer(RECEIVER, Bytes::from(payload.clone()), transfer_id, fast_pacing())?;

        send_paced(&pair.sender, &plan).await?;
        let replies = collect_replies(&pair.sender, transfer_id, WAIT).await;
        assert!(replies.confirmed(), "size {size}: {replies:?}");

        let delivery = pair.next_delivery().await?;
        assert_eq!(delivery.payload.len(), size);
        assert_eq!(&delivery.payload[..], &payload[..], "size {size}");
    }

    let stats = pair.stop().await?;
    assert_eq!(stats.completed, 5);
    Ok(())
}

/// Broadcast reaches the receiver, and its ACKs come back to the source.
#[tokio::test]
async fn test_broadcast_transfer() -> Result<()> {
    let mut pair = Pair::spawn(ReceiverOptions::default()).await?;

    let plan = plan_transfer(
        NodeId::BROADCAST,
        Bytes::from_static(b"to whoever is listening"),
        0xB0B0,
        fast_pacing(),
    )?;
    send_paced(&pair.sender, &plan).await?;

    let replies = collect_replies(&pair.sender, 0xB0B0, WAIT).await;
    assert!(replies.confirmed(), "replies: {replies:?}");
    let delivery = pair.next_delivery().await?;
    assert_eq!(&delivery.payload[..], b"to whoever is listening");

    pair.stop().await?;
    Ok(())
}

/// A second START mid-transfer discards the first; only the second delivers.
#[tokio::test]
async fn test_restart_replaces_transfer() -> Result<()> {
    use meshtx_core::transport::Transport;

    let mut pair = Pair::spawn(ReceiverOptions::default()).await?;

    let abandoned = plan_transfer(RECEIVER, Bytes::from(vec![1u8; 400]), 0xA1, fast_pacing())?;
    // START and the first CHUNK only.
    for packet in &abandoned.packets[..2] {
        pair.sender.send(RECEIVER, packet.frame.encode(), packet.want_ack)?;
    }

    let second = plan_transfer(RECEIVER, Bytes::from(vec![2u8; 250]), 0xA2, fast_pacing())?;
    send_paced(&pair.sender, &second).await?;
    let replies = collect_replies(&pair.sender, 0xA2, WAIT).await;
    assert!(replies.confirmed(), "replies: {replies:?}");

    let delivery = pair.next_delivery().await?;
    assert_eq!(&delivery.payload[..], &[2u8; 250][..]);

    // The tail of the abandoned transfer is now stale.
    for packet in &abandoned.packets[2..] {
        pair.sender.send(RECEIVER, packet.frame.encode(), packet.want_ack)?;
    }
    assert!(pair.no_delivery_within(Duration::from_millis(300)).await);

    let stats = pair.stop().await?;
    assert_eq!(stats.started, 2);
    assert_eq!(stats.completed, 1);
    assert!(stats.ignored_frames >= 2);
    Ok(())
}
