use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::fs;
use tempfile::tempdir;
use twinsync_lib::core::{ReconcileInput, Reconciler, TimeTable};
use twinsync_lib::{ContentFingerprint, FileScanner, PathKey, Snapshot, TombstoneSet};

fn compute_snapshot_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("scanner::compute_snapshot (200 files)", |b| {
        let dir = tempdir().unwrap();
        for i in 0..200 {
            let sub = dir.path().join(format!("dir{}", i % 10));
            fs::create_dir_all(&sub).unwrap();
            fs::write(sub.join(format!("file{}.bin", i)), vec![i as u8; 16 * 1024]).unwrap();
        }
        let scanner = FileScanner::default();

        b.iter(|| {
            let result = runtime
                .block_on(scanner.compute_snapshot(black_box(dir.path())))
                .unwrap();
            assert_eq!(result.snapshot.len(), 200);
        })
    });
}

fn reconcile_benchmark(c: &mut Criterion) {
    let snapshot = |prefix: &str| -> Snapshot {
        (0..10_000)
            .map(|i| {
                (
                    PathKey::new(&format!("d{}/f{}.txt", i % 100, i)).unwrap(),
                    ContentFingerprint::of(format!("{}{}", prefix, i % 3).as_bytes()),
                )
            })
            .collect()
    };
    let local = snapshot("l");
    let remote = snapshot("r");
    let tombstones = TombstoneSet::new();

    c.bench_function("reconciler::reconcile (10k paths)", |b| {
        let reconciler = Reconciler::default();
        let times = TimeTable::default();
        b.iter(|| {
            let actions = reconciler.reconcile(
                black_box(&ReconcileInput {
                    local: &local,
                    local_tombstones: &tombstones,
                    remote: &remote,
                    remote_tombstones: &tombstones,
                }),
                &times,
            );
            assert_eq!(actions.len(), 10_000);
        })
    });
}

criterion_group!(benches, compute_snapshot_benchmark, reconcile_benchmark);
criterion_main!(benches);
