use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::{json, Map};
use std::sync::Arc;
use storycast_core::{EditorState, Slide, DEVICES};
use storycast_sync::{
    channel_surface, AckMessage, BroadcastMessage, MultiBroadcaster, SyncConfig, SyncEvent, WireMessage,
};

fn make_deck(slides: usize) -> EditorState {
    let slides = (0..slides)
        .map(|i| {
            Slide::with_id(format!("slide-{i}"), Map::new())
                .set("type", "image")
                .set("caption", format!("Caption {i}"))
                .set("media", json!({"url": format!("https://cdn.example/{i}.jpg"), "fit": "cover"}))
        })
        .collect();
    EditorState::new(slides, Some(0))
}

fn bench_update_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("UPDATE_STORY");

    for size in [10usize, 100] {
        let msg = BroadcastMessage::from_state(&make_deck(size), Some("pixel-7".into()), 1);
        let encoded = msg.encode().unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_function(format!("encode_{size}_slides"), |b| {
            b.iter(|| black_box(black_box(&msg).encode().unwrap()))
        });
        group.bench_function(format!("decode_{size}_slides"), |b| {
            b.iter(|| black_box(WireMessage::decode(black_box(&encoded)).unwrap()))
        });
    }

    group.finish();
}

fn bench_ack_decode(c: &mut Criterion) {
    let encoded = AckMessage::new("ipad-mini", Some(42)).encode().unwrap();

    c.bench_function("ack_decode", |b| {
        b.iter(|| black_box(WireMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_fan_out_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let deck = make_deck(20);

    let (broadcaster, mut events) = rt.block_on(async {
        let mut broadcaster = MultiBroadcaster::spawn(SyncConfig::default());
        let events = broadcaster.take_events().unwrap();
        for device in &DEVICES[..6] {
            let (surface, sandbox) = channel_surface(device.id, broadcaster.ack_sink());
            broadcaster.add_target(Arc::new(surface)).unwrap();
            tokio::spawn(sandbox.serve(|_: &BroadcastMessage| {}));
        }
        (broadcaster, events)
    });

    // Alternating active slides: every update is a navigation, sent at once.
    let mut active = 0;
    c.bench_function("fan_out_6_targets_until_all_acked", |b| {
        b.iter(|| {
            active = 1 - active;
            broadcaster.update(deck.with_active_index(Some(active))).unwrap();
            rt.block_on(async {
                while let Some(event) = events.recv().await {
                    if matches!(event, SyncEvent::AllAcknowledged { .. }) {
                        break;
                    }
                }
            });
        })
    });

    rt.block_on(broadcaster.close());
}

criterion_group!(benches, bench_update_encode, bench_ack_decode, bench_fan_out_cycle);
criterion_main!(benches);
