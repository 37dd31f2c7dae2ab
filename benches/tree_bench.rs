//! Benchmarks for nfs-store
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn benchmark_build_file_tree(c: &mut Criterion) {
    use nfs_store::config::FileStoreConfig;
    use nfs_store::nfs::{build_file_tree, DateFormatter, OrderType, RemoteEntry};

    let entries: Vec<RemoteEntry> = (0..1000)
        .map(|i| {
            if i % 10 == 0 {
                RemoteEntry::directory(format!("dir_{:04}", i), Some(1_600_000_000_000 + i))
            } else {
                RemoteEntry::file(format!("File_{:04}.dat", i), 4096 * i as u64, Some(1_700_000_000_000 - i))
            }
        })
        .collect();
    let anchor = FileStoreConfig::new(4, "/data/projects");
    let formatter = DateFormatter::default();

    c.bench_function("build_file_tree_byname", |b| {
        b.iter(|| {
            let tree = build_file_tree(
                "/data/projects/run",
                "/data/projects/run",
                black_box(&entries),
                OrderType::ByName,
                Some(&anchor),
                &formatter,
            );
            black_box(tree);
        })
    });

    c.bench_function("build_file_tree_bydate", |b| {
        b.iter(|| {
            let tree = build_file_tree(
                "/data/projects/run",
                "/data/projects/run",
                black_box(&entries),
                OrderType::ByDate,
                None,
                &formatter,
            );
            black_box(tree);
        })
    });
}

fn benchmark_path_helpers(c: &mut Criterion) {
    use nfs_store::config::FileStoreConfig;
    use nfs_store::nfs::path::{logic_path, sanitize};
    use nfs_store::nfs::SmbLocation;

    c.bench_function("sanitize_path", |b| {
        b.iter(|| black_box(sanitize(black_box("//data///projects/run//results/"))))
    });

    let anchor = FileStoreConfig::new(4, "/data/projects");
    c.bench_function("logic_path", |b| {
        b.iter(|| black_box(logic_path(black_box("/data/projects/run/results/a.csv"), Some(&anchor))))
    });

    if let Ok(location) = SmbLocation::parse("smb://nas.example.org/lab/projects/", None) {
        c.bench_function("smb_url_for", |b| {
            b.iter(|| black_box(location.url_for(black_box("run/results/a.csv"), false)))
        });
    }
}

criterion_group!(benches, benchmark_build_file_tree, benchmark_path_helpers);
criterion_main!(benches);
