use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use folio_collab::broadcast::EventChannel;
use folio_collab::protocol::{ClientFrame, ClientMessage};
use folio_collab::session::{NewSession, SessionConfig, SessionManager, SessionSettings};
use folio_collab::storage::{RocksRepository, StoreConfig};
use folio_collab::version::{merge_contents, MergeStrategy, NewVersion, VersionStore};
use folio_collab::{PresenceTracker, SessionEvent};
use folio_core::{Cursor, Operation, Role, User};
use std::hint::black_box;
use std::sync::Arc;
use uuid::Uuid;

fn sample_document(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("Paragraph {i}: quarterly figures and commentary."))
        .collect::<Vec<_>>()
        .join("\n")
}

fn bench_frame_encode(c: &mut Criterion) {
    let op = Operation::insert(Uuid::new_v4(), 120, "inserted text").with_base_revision(42);
    let frame = ClientFrame::new(1, ClientMessage::ApplyOperation { operation: op });

    c.bench_function("frame_encode_operation", |b| {
        b.iter(|| black_box(black_box(&frame).encode().unwrap()))
    });

    let encoded = frame.encode().unwrap();
    c.bench_function("frame_decode_operation", |b| {
        b.iter(|| black_box(ClientFrame::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_event_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("EventChannel");
    group.throughput(Throughput::Elements(1000));

    let channel = EventChannel::new(1024);
    let mut receivers: Vec<_> = (0..100).map(|_| channel.subscribe()).collect();
    let session_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    group.bench_function("publish_1k_to_100_subscribers", |b| {
        b.iter(|| {
            for i in 0..1000 {
                channel.publish(SessionEvent::CursorUpdate {
                    session_id,
                    user_id,
                    cursor: Cursor::at(i),
                });
            }
            for rx in &mut receivers {
                while rx.try_recv().is_ok() {}
            }
        })
    });
    group.finish();
}

fn bench_apply_operation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = SessionManager::new(
        SessionConfig::default(),
        Arc::new(PresenceTracker::default()),
        Arc::new(VersionStore::in_memory()),
    );
    let alice = User::new(Uuid::new_v4(), "alice", "alice@example.com", Role::Editor);
    let session = rt
        .block_on(
            manager.create_session(
                NewSession::new(Uuid::new_v4(), alice.clone())
                    .with_content(sample_document(200))
                    .with_settings(SessionSettings {
                        auto_save: false,
                        ..SessionSettings::default()
                    }),
            ),
        )
        .unwrap();

    c.bench_function("session_apply_insert", |b| {
        b.iter(|| {
            rt.block_on(manager.apply_operation(session.id, Operation::insert(alice.id, 0, "x")))
                .unwrap()
        })
    });
}

fn bench_merge_contents(c: &mut Criterion) {
    let ours = sample_document(1000);
    let theirs = ours.replace("commentary", "notes");

    c.bench_function("merge_auto_1000_lines", |b| {
        b.iter(|| black_box(merge_contents(black_box(&ours), black_box(&theirs), MergeStrategy::Auto)))
    });
}

fn bench_rocks_create_version(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::for_testing(dir.path().join("bench"));
    config.sync_writes = false;
    let store = VersionStore::new(Arc::new(RocksRepository::open(config).unwrap()));
    let report = Uuid::new_v4();
    let author = Uuid::new_v4();
    let content = sample_document(100);

    c.bench_function("rocksdb_create_version", |b| {
        b.iter(|| {
            rt.block_on(store.create_version(report, NewVersion::new(author, content.clone())))
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_event_fanout,
    bench_apply_operation,
    bench_merge_contents,
    bench_rocks_create_version,
);
criterion_main!(benches);
