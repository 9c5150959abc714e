#![allow(clippy::expect_used, clippy::unwrap_used)]

use parallel_protocol::config::TransportConfig;
use parallel_protocol::core::message::{DataMessage, DataMessageType, Message, MessageType};
use parallel_protocol::protocol::dispatcher::DataChannel;
use parallel_protocol::transport::Connection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_sends_never_interleave() {
    // A small pipe forces every large frame through many partial writes
    let (a, b) = tokio::io::duplex(512);
    let config = TransportConfig::default();
    let sender = Arc::new(Connection::new(a, &config, "sender"));
    let receiver = Connection::new(b, &config, "receiver");

    let tasks_count = 8usize;
    let per_task = 200usize;
    let payload_sizes = [0usize, 7, 512, 4096];

    let mut tasks = JoinSet::new();
    for task in 0..tasks_count {
        let sender = sender.clone();
        tasks.spawn(async move {
            for i in 0..per_task {
                let size = payload_sizes[(task + i) % payload_sizes.len()];
                let mut content = vec![task as u8; size + 2];
                content[0] = task as u8;
                content[1] = (i & 0xFF) as u8;
                sender
                    .send_message(Message::new(MessageType::Data, content))
                    .await
                    .unwrap();
            }
        });
    }

    let mut last_seen = vec![None::<u8>; tasks_count];
    for _ in 0..tasks_count * per_task {
        let msg = receiver.recv().await.unwrap();
        let task = msg.content[0] as usize;
        let seq = msg.content[1];

        // Every byte after the sequence number belongs to the same sender
        assert!(msg.content[2..].iter().all(|b| *b as usize == task));

        // Per-sender order is preserved
        if let Some(prev) = last_seen[task] {
            assert_eq!(seq, prev.wrapping_add(1));
        }
        last_seen[task] = Some(seq);
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn data_channel_handles_concurrent_dispatch() {
    let channel = DataChannel::new();
    let camera = Arc::new(AtomicUsize::new(0));

    let counter = camera.clone();
    channel
        .register(DataMessageType::CameraData, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let channel = channel.clone();
        tasks.spawn(async move {
            for _ in 0..1000 {
                channel
                    .dispatch(&DataMessage::new(DataMessageType::CameraData, vec![0; 16]))
                    .unwrap();
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    assert_eq!(camera.load(Ordering::Relaxed), 8000);
}
