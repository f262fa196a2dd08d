// Property tests for the delivery contract
//
// Framing must round-trip any payload at any chunk size, no frame may exceed
// the chunk size, acknowledgments are idempotent, retries are bounded, the
// store never outgrows its capacity and routing only ever shortens paths.

mod common;

use common::{connected_pair, radio_config, radio_pair};
use meshpipe_core::frame::{decode_frame, CodecConfig, Compression, FrameCodec, FrameType, Reassembler, Reassembly};
use meshpipe_core::pipe::{Pipe, PipeError, PipeState};
use meshpipe_core::routing::{RoutingConfig, RoutingEntry, RoutingTable, INFINITE_DISTANCE};
use meshpipe_core::store::{MessageStore, MessageStoreConfig};
use meshpipe_core::transport::BleAdapter;
use meshpipe_core::{Acknowledgment, NetworkMessage, ReliabilityConfig, ReliabilityCoordinator};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn compression_strategy() -> impl Strategy<Value = Compression> {
    prop_oneof![
        Just(Compression::None),
        Just(Compression::Gzip),
        Just(Compression::Lz4),
        Just(Compression::Zstd),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_frames_round_trip_in_any_order(
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
        chunk in 1usize..512,
        compression in compression_strategy(),
        reverse in any::<bool>(),
    ) {
        let config = CodecConfig {
            max_chunk_size: chunk,
            compression,
            ..Default::default()
        };
        let codec = FrameCodec::new(config.clone());
        let mut frames = codec
            .encode_frames(&payload, FrameType::Data, &BTreeMap::new())
            .unwrap();
        prop_assert_eq!(frames.len(), payload.len().div_ceil(chunk).max(1));
        if reverse {
            frames.reverse();
        }

        let mut reassembler = Reassembler::new(&config);
        let mut result = None;
        for frame in &frames {
            let wire = frame.to_bytes().unwrap();
            let decoded = decode_frame(&wire).unwrap();
            prop_assert_eq!(&decoded, frame);
            if let Reassembly::Complete(bytes) = reassembler.accept(&decoded).unwrap() {
                prop_assert!(result.is_none(), "completed twice");
                result = Some(bytes);
            }
        }
        prop_assert_eq!(result, Some(payload));
        prop_assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn prop_chunks_never_exceed_chunk_size(
        payload in proptest::collection::vec(any::<u8>(), 1..4096),
        chunk in 1usize..256,
        compression in compression_strategy(),
    ) {
        let codec = FrameCodec::new(CodecConfig {
            max_chunk_size: chunk,
            compression,
            ..Default::default()
        });
        let frames = codec
            .encode_frames(&payload, FrameType::Data, &BTreeMap::new())
            .unwrap();
        let count = frames.len() as u32;
        let id = frames[0].frame_id;
        for (i, frame) in frames.iter().enumerate() {
            prop_assert!(frame.payload.len() <= chunk);
            prop_assert_eq!(frame.chunk_index, i as u32);
            prop_assert_eq!(frame.chunk_count, count);
            prop_assert_eq!(frame.frame_id, id);
        }
    }

    #[test]
    fn prop_single_bit_flip_is_rejected(
        payload in proptest::collection::vec(any::<u8>(), 0..256),
        flip in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let codec = FrameCodec::new(CodecConfig::default());
        let frame = codec
            .encode_frames(&payload, FrameType::Data, &BTreeMap::new())
            .unwrap()
            .remove(0);
        let mut wire = frame.to_bytes().unwrap();
        let at = flip.index(wire.len());
        wire[at] ^= 1 << bit;
        prop_assert!(decode_frame(&wire).is_err());
    }

    #[test]
    fn prop_store_never_exceeds_capacity(
        capacity in 1usize..32,
        adds in 0usize..100,
    ) {
        let store = MessageStore::new(MessageStoreConfig {
            max_messages: capacity,
            ..Default::default()
        });
        let mut ids = Vec::new();
        for i in 0..adds {
            let message = NetworkMessage::new("a", "b", vec![i as u8]);
            ids.push(message.id.clone());
            store.add_at(message, i as u64);
            prop_assert!(store.len() <= capacity);
        }
        prop_assert_eq!(store.len(), adds.min(capacity));
        // The survivors are the newest ones.
        for id in ids.iter().rev().take(capacity) {
            prop_assert!(store.get(id).is_some());
        }
    }

    #[test]
    fn prop_routing_distance_only_shrinks_from_other_neighbours(
        ads in proptest::collection::vec((0usize..3, 0u32..20), 1..40),
    ) {
        let neighbours = ["n1", "n2", "n3"];
        let table = RoutingTable::new(RoutingConfig::new("me"));
        for (who, distance) in ads {
            let advertiser = neighbours[who];
            let before = table.get_route("x");
            table.update_routes_at(vec![RoutingEntry::new("x", advertiser, distance)], 0);
            let after = table.get_route("x");

            if let Some(after) = &after {
                prop_assert!(after.distance <= INFINITE_DISTANCE);
            }
            match (before, after) {
                (Some(b), Some(a)) if b.next_hop != advertiser => {
                    prop_assert!(a.distance <= b.distance);
                }
                (None, Some(a)) => {
                    prop_assert_eq!(a.next_hop.as_str(), advertiser);
                    prop_assert_eq!(a.is_reachable(), distance + 1 < INFINITE_DISTANCE);
                }
                (_, None) => prop_assert!(false, "advertised destination missing"),
                _ => {}
            }
        }
    }
}

#[test]
fn test_retry_budget_is_bounded() {
    let config = ReliabilityConfig::default();
    let total: Duration = (1..=config.max_attempts())
        .map(|n| config.timeout_for_attempt(n))
        .sum();
    assert_eq!(config.max_attempts(), 4);
    assert_eq!(total, Duration::from_millis(15_000));
}

#[test]
fn test_unknown_ack_is_ignored() {
    let coordinator = ReliabilityCoordinator::default();
    let ack = Acknowledgment::new(uuid::Uuid::new_v4(), 0);
    assert!(!coordinator.acknowledge(&ack));
    assert!(!coordinator.acknowledge(&ack));
    assert_eq!(coordinator.pending_count(), 0);
}

#[test]
fn test_store_cleanup_boundary() {
    let store = MessageStore::new(MessageStoreConfig::default());
    let old = NetworkMessage::new("a", "b", vec![1]);
    let young = NetworkMessage::new("a", "b", vec![2]);
    store.add_at(old.clone(), 0);
    store.add_at(young.clone(), 2);

    // Age 300001 is past 300000, age 299999 is not.
    assert_eq!(store.cleanup_at(300_000, 300_001), 1);
    assert!(store.get(&old.id).is_none());
    assert!(store.get(&young.id).is_some());
}

#[test]
fn test_relaxation_prefers_shorter_path() {
    let table = RoutingTable::new(RoutingConfig::new("me"));
    table.update_routes_at(vec![RoutingEntry::new("x", "n", 2)], 0);
    assert_eq!(table.get_route("x").unwrap().distance, 3);

    table.update_routes_at(vec![RoutingEntry::new("x", "m", 0)], 0);
    let route = table.get_route("x").unwrap();
    assert_eq!(route.next_hop, "m");
    assert_eq!(route.distance, 1);

    // A longer path through someone else changes nothing.
    assert_eq!(table.update_routes_at(vec![RoutingEntry::new("x", "n", 5)], 0), 0);
}

#[tokio::test]
async fn test_pipe_lifecycle_order() {
    let (radio, _peer) = radio_pair();
    let pipe = Pipe::new("p", Arc::new(BleAdapter::new(radio)));
    assert_eq!(pipe.state(), PipeState::Initializing);
    assert!(matches!(pipe.disconnect(false).await, Err(PipeError::InvalidState { .. })));

    pipe.initialize(radio_config(256), Some("q")).await.unwrap();
    assert_eq!(pipe.state(), PipeState::Ready);
    assert!(matches!(
        pipe.initialize(radio_config(256), Some("q")).await,
        Err(PipeError::InvalidState { .. })
    ));

    pipe.connect(true).await.unwrap();
    assert_eq!(pipe.state(), PipeState::Connected);
    assert!(matches!(pipe.connect(true).await, Err(PipeError::InvalidState { .. })));

    pipe.disconnect(false).await.unwrap();
    assert_eq!(pipe.state(), PipeState::Disconnected);
    // Already down is fine.
    pipe.disconnect(false).await.unwrap();
    assert_eq!(pipe.status().uptime_seconds, 0);
}

#[tokio::test(start_paused = true)]
async fn test_message_delivered_at_most_once_under_loss() {
    let (alice, bob, radio_a, radio_b) = connected_pair("alice", "bob", radio_config(512)).await;
    let mut inbox = bob.receive_messages();
    // The first ack is lost, so alice retransmits a message bob already has.
    radio_b.lose_next(1);

    let message = NetworkMessage::new("alice", "bob", b"once".to_vec());
    let report = alice.send_message(&message).await.unwrap();
    assert_eq!(report.attempts, 2);
    assert_eq!(radio_a.writes.load(Ordering::SeqCst), 2);

    use tokio_stream::StreamExt;
    assert_eq!(inbox.next().await.unwrap(), message);
    assert!(tokio::time::timeout(Duration::from_secs(5), inbox.next())
        .await
        .is_err());
}
