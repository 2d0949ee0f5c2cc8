use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tiercache::{
    canonicalize, trigram_similarity, CacheConfig, CacheEngine, Compression, InMemoryBackend,
    ZstdCompression,
};
use tokio::runtime::Runtime;

fn bench_config() -> CacheConfig {
    CacheConfig {
        enable_background_tasks: false,
        ..CacheConfig::default()
    }
}

fn engine<V: tiercache::CacheValue>(config: CacheConfig) -> CacheEngine<V> {
    CacheEngine::init(config, Arc::new(InMemoryBackend::new())).unwrap()
}

fn tier_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("tiers");

    // Small values stay in Hot, medium ones come from Distributed, large ones from Compressed
    for value_size in [256usize, 4 * 1024, 64 * 1024].iter() {
        group.throughput(Throughput::Bytes(*value_size as u64));
        group.bench_with_input(
            BenchmarkId::new("set_get", format!("{}B", value_size)),
            value_size,
            |b, &size| {
                let engine: CacheEngine<String> = rt.block_on(async { engine(bench_config()) });
                let value = "a".repeat(size);
                b.iter(|| {
                    rt.block_on(async {
                        engine.set("bench_key", value.clone(), None).await.unwrap();
                        let result = engine.try_get("bench_key").await;
                        black_box(result);
                    })
                })
            },
        );
    }

    group.bench_function("hot_hit", |b| {
        let engine: CacheEngine<u64> = rt.block_on(async {
            let engine = engine(bench_config());
            engine.set("counter", 7, None).await.unwrap();
            engine
        });
        b.iter(|| rt.block_on(async { black_box(engine.get("counter", 0).await) }))
    });

    group.bench_function("miss_with_fuzzy_scan", |b| {
        let engine: CacheEngine<u64> = rt.block_on(async {
            let engine = engine(bench_config());
            for i in 0..200 {
                engine
                    .set(&format!("llm_response:prompt {}", i), i, None)
                    .await
                    .unwrap();
            }
            engine
        });
        b.iter(|| {
            rt.block_on(async { black_box(engine.try_get("llm_response:unrelated prompt").await) })
        })
    });

    group.finish();
}

fn normalization_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalization");

    group.bench_function("canonicalize", |b| {
        b.iter(|| black_box(canonicalize("  User Profile - Settings?tab=privacy&b=2&a=1 ")))
    });

    group.bench_function("trigram_similarity", |b| {
        b.iter(|| {
            black_box(trigram_similarity(
                "llm_response:summarize_quarterly_report",
                "llm_response:summarize_quarterly_reports",
            ))
        })
    });

    group.finish();
}

fn compression_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    let zstd = ZstdCompression::default();

    // Highly compressible data (repeated pattern)
    let repeated = vec![42u8; 64 * 1024];
    // Less compressible data
    let mut mixed = vec![0u8; 64 * 1024];
    for (i, byte) in mixed.iter_mut().enumerate() {
        *byte = ((i * 7919) % 251) as u8;
    }

    group.throughput(Throughput::Bytes(64 * 1024));
    for (name, data) in [("compressible_data", &repeated), ("mixed_data", &mixed)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let packed = zstd.compress(data).unwrap();
                black_box(zstd.decompress(&packed).unwrap());
            })
        });
    }

    group.finish();
}

fn concurrent_access_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("concurrent_access");
    group.sample_size(20);

    group.bench_function("engine_concurrent", |b| {
        let engine: Arc<CacheEngine<u64>> = Arc::new(rt.block_on(async { engine(bench_config()) }));
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::new();

                for i in 0..10u64 {
                    let engine = engine.clone();
                    handles.push(tokio::spawn(async move {
                        let key = format!("key_{}", i);
                        engine.set(&key, i, None).await.unwrap();
                        black_box(engine.get(&key, 0).await);
                    }));
                }

                for handle in handles {
                    handle.await.unwrap();
                }
            })
        })
    });

    group.finish();
}

fn cache_eviction_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("cache_eviction");
    group.sample_size(20);

    group.bench_function("hot_lru_eviction", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut config = bench_config();
                config.hot.capacity = 1000;
                let engine: CacheEngine<u64> = engine(config);

                // Fill beyond capacity to trigger evictions
                for i in 0..2000u64 {
                    engine.set(&format!("key_{}", i), i, None).await.unwrap();
                }

                for i in 1500..1600u64 {
                    black_box(engine.get(&format!("key_{}", i), 0).await);
                }
            })
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    tier_benchmarks,
    normalization_benchmarks,
    compression_benchmarks,
    concurrent_access_benchmarks,
    cache_eviction_benchmarks
);
criterion_main!(benches);
