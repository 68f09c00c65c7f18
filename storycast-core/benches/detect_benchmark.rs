use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::{json, Map};
use storycast_core::{has_changed, EditorState, MemoryBudget, Slide};

fn make_deck(slides: usize) -> EditorState {
    let slides = (0..slides)
        .map(|i| {
            Slide::with_id(format!("slide-{i}"), Map::new())
                .set("type", "text")
                .set("title", format!("Slide {i}"))
                .set("body", json!({"blocks": ["intro", "detail", "outro"], "size": 14}))
        })
        .collect();
    EditorState::new(slides, Some(0))
}

fn bench_change_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("Change Detection");

    for size in [10usize, 100, 1000] {
        let prev = make_deck(size);
        let nav = prev.with_active_index(Some(1));
        let mut edited = prev.clone();
        edited.slides[size - 1] = edited.slides[size - 1].clone().set("title", "Edited");

        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("navigation_{size}"), |b| {
            b.iter(|| black_box(has_changed(Some(black_box(&prev)), black_box(&nav))))
        });
        group.bench_function(format!("tail_edit_{size}"), |b| {
            b.iter(|| black_box(has_changed(Some(black_box(&prev)), black_box(&edited))))
        });
    }

    group.finish();
}

fn bench_admission(c: &mut Criterion) {
    let budget = MemoryBudget::default();
    let deck = make_deck(200);

    c.bench_function("content_char_count_200", |b| {
        b.iter(|| black_box(black_box(&deck).content_char_count()))
    });
    c.bench_function("max_admissible", |b| {
        b.iter(|| black_box(budget.max_admissible(black_box(12_345))))
    });
}

criterion_group!(benches, bench_change_detection, bench_admission);
criterion_main!(benches);
