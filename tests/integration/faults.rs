use crate::*;

use bytes::Bytes;
use meshtx_core::checksum::checksum;
use meshtx_core::sender::plan_transfer;
use meshtx_core::transport::Transport;
use meshtx_core::wire::{reason, Frame, MAX_PAYLOAD};
use meshtx_services::{collect_replies, send_paced};

fn send_frame(link: &UdpMeshTransport, frame: Frame) -> Result<()> {
    link.send(RECEIVER, frame.encode(), false)?;
    Ok(())
}

/// START announcing more than the limit draws "TX too large" and nothing else.
#[tokio::test]
async fn test_oversize_start_rejected() -> Result<()> {
    let mut pair = Pair::spawn(ReceiverOptions::default()).await?;

    send_frame(
        &pair.sender,
        Frame::Start {
            transfer_id: 0xBEEF,
            total_len: (MAX_PAYLOAD + 1) as u16,
            num_chunks: 12,
        },
    )?;

    let replies = collect_replies(&pair.sender, 0xBEEF, WAIT).await;
    assert_eq!(replies.acks, 0);
    assert_eq!(replies.errors, vec![reason::TOO_LARGE.to_string()]);

    // Chunks for the refused transfer go nowhere.
    send_frame(
        &pair.sender,
        Frame::Chunk {
            transfer_id: 0xBEEF,
            index: 0,
            data: Bytes::from_static(b"ignored"),
        },
    )?;
    send_frame(
        &pair.sender,
        Frame::End {
            transfer_id: 0xBEEF,
            checksum: checksum(b"ignored"),
        },
    )?;
    assert!(pair.no_delivery_within(Duration::from_millis(300)).await);

    let stats = pair.stop().await?;
    assert_eq!(stats.rejected_oversize, 1);
    assert_eq!(stats.started, 0);
    assert_eq!(stats.completed, 0);
    Ok(())
}

/// A wrong END checksum draws "Checksum error" and the payload is dropped.
#[tokio::test]
async fn test_corrupted_end_reports_checksum_error() -> Result<()> {
    let mut pair = Pair::spawn(ReceiverOptions::default()).await?;

    let plan = plan_transfer(RECEIVER, Bytes::from(vec![0xAA; 500]), 0xC0DE, fast_pacing())?;
    let (end, body) = plan.packets.split_last().context("plan has no END")?;
    for packet in body {
        pair.sender
            .send(RECEIVER, packet.frame.encode(), packet.want_ack)?;
    }
    let Frame::End { checksum: good, .. } = end.frame else {
        anyhow::bail!("last packet is not END");
    };
    send_frame(
        &pair.sender,
        Frame::End {
            transfer_id: 0xC0DE,
            checksum: good ^ 1,
        },
    )?;

    let replies = collect_replies(&pair.sender, 0xC0DE, WAIT).await;
    assert_eq!(replies.acks, 1, "START is acknowledged: {replies:?}");
    assert_eq!(replies.errors, vec![reason::CHECKSUM.to_string()]);
    assert!(pair.no_delivery_within(Duration::from_millis(300)).await);

    let stats = pair.stop().await?;
    assert_eq!(stats.checksum_failures, 1);
    assert_eq!(stats.completed, 0);
    Ok(())
}

/// Frames from a node other than the one that sent START are ignored.
#[tokio::test]
async fn test_foreign_frames_do_not_corrupt_session() -> Result<()> {
    let mut pair = Pair::spawn(ReceiverOptions::default()).await?;
    let intruder = pair.extra_link(NodeId(0x0000_0c03)).await?;

    let payload = Bytes::from(vec![0x5A; 300]);
    let plan = plan_transfer(RECEIVER, payload.clone(), 0xF00D, fast_pacing())?;
    let (start, rest) = plan.packets.split_first().context("plan has no START")?;
    pair.sender
        .send(RECEIVER, start.frame.encode(), start.want_ack)?;

    // Same transfer id, different source.
    send_frame(
        &intruder,
        Frame::Chunk {
            transfer_id: 0xF00D,
            index: 0,
            data: Bytes::from_static(b"junk"),
        },
    )?;
    send_frame(
        &intruder,
        Frame::End {
            transfer_id: 0xF00D,
            checksum: checksum(b"junk"),
        },
    )?;

    for packet in rest {
        pair.sender
            .send(RECEIVER, packet.frame.encode(), packet.want_ack)?;
    }

    let replies = collect_replies(&pair.sender, 0xF00D, WAIT).await;
    assert!(replies.confirmed(), "replies: {replies:?}");
    let delivery = pair.next_delivery().await?;
    assert_eq!(delivery.source, SENDER);
    assert_eq!(delivery.payload, payload);

    let stats = pair.stop().await?;
    assert_eq!(stats.ignored_frames, 2);
    assert_eq!(stats.completed, 1);
    Ok(())
}

/// With strict chunk counting, END before every CHUNK draws "Missing chunks".
#[tokio::test]
async fn test_strict_mode_reports_missing_chunks() -> Result<()> {
    let options = ReceiverOptions {
        strict_chunk_count: true,
    };
    let mut pair = Pair::spawn(options).await?;

    let plan = plan_transfer(RECEIVER, Bytes::from(vec![7u8; 400]), 0x51, fast_pacing())?;
    // Drop the middle chunk.
    for (i, packet) in plan.packets.iter().enumerate() {
        if i == 2 {
            continue;
        }
        pair.sender
            .send(RECEIVER, packet.frame.encode(), packet.want_ack)?;
    }

    let replies = collect_replies(&pair.sender, 0x51, WAIT).await;
    assert_eq!(replies.errors, vec![reason::MISSING_CHUNKS.to_string()]);
    assert!(pair.no_delivery_within(Duration::from_millis(300)).await);

    let stats = pair.stop().await?;
    assert_eq!(stats.missing_chunks, 1);
    Ok(())
}

/// A truncated START is answered with "Invalid START packet" for id 0.
#[tokio::test]
async fn test_truncated_start() -> Result<()> {
    let mut pair = Pair::spawn(ReceiverOptions::default()).await?;

    pair.sender
        .send(RECEIVER, Bytes::from_static(&[0x01, 0, 0, 0]), false)?;
    let replies = collect_replies(&pair.sender, 0, WAIT).await;
    assert_eq!(replies.errors, vec![reason::INVALID_START.to_string()]);

    // The link still works afterwards.
    let plan = plan_transfer(RECEIVER, Bytes::from_static(b"after"), 0x77, fast_pacing())?;
    send_paced(&pair.sender, &plan).await?;
    let replies = collect_replies(&pair.sender, 0x77, WAIT).await;
    assert!(replies.confirmed());
    assert_eq!(&pair.next_delivery().await?.payload[..], b"after");

    let stats = pair.stop().await?;
    assert_eq!(stats.malformed_frames, 1);
    Ok(())
}
