use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lingo_checkpoint::{
    AsyncCheckpointSaver, CheckpointSaver, InMemoryCache, InMemoryCheckpointSaver,
    SqliteCheckpointSaver, ThreadKey, TtlCheckpointSaver,
};
use serde_json::json;
use std::time::Duration;

fn payload() -> serde_json::Value {
    json!({
        "messages": [
            {"role": "user", "content": "Give me a grammar exercise"},
            {"role": "assistant", "content": "Fill in the blank: She ___ to school every day."}
        ],
        "intent": "exercise",
        "current_agent": "tutor"
    })
}

fn checkpoint_save_benchmark(c: &mut Criterion) {
    let key = ThreadKey::thread("bench-thread");

    let memory = InMemoryCheckpointSaver::new();
    c.bench_function("memory put", |b| {
        b.iter(|| CheckpointSaver::put(&memory, &key, black_box(payload()), None).unwrap());
    });

    let sqlite = SqliteCheckpointSaver::open_in_memory().unwrap();
    sqlite.setup().unwrap();
    c.bench_function("sqlite put", |b| {
        b.iter(|| sqlite.put(&key, black_box(payload()), None).unwrap());
    });

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let ttl = TtlCheckpointSaver::new(InMemoryCache::new(), Duration::from_secs(3600));
    c.bench_function("ttl put", |b| {
        b.to_async(&runtime)
            .iter(|| async { ttl.put(&key, black_box(payload()), None).await.unwrap() });
    });
}

fn checkpoint_load_benchmark(c: &mut Criterion) {
    let key = ThreadKey::thread("bench-thread");

    let memory = InMemoryCheckpointSaver::new();
    for _ in 0..100 {
        CheckpointSaver::put(&memory, &key, payload(), None).unwrap();
    }
    c.bench_function("memory get_latest", |b| {
        b.iter(|| CheckpointSaver::get_latest(&memory, black_box(&key)).unwrap());
    });

    let sqlite = SqliteCheckpointSaver::open_in_memory().unwrap();
    sqlite.setup().unwrap();
    for _ in 0..100 {
        sqlite.put(&key, payload(), None).unwrap();
    }
    c.bench_function("sqlite get_latest", |b| {
        b.iter(|| sqlite.get_latest(black_box(&key)).unwrap());
    });
}

criterion_group!(benches, checkpoint_save_benchmark, checkpoint_load_benchmark);
criterion_main!(benches);
