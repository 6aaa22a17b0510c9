//! Benchmarks for basic cache operations
//!
//! This benchmark suite measures the performance of:
//! - L1 cache read/write operations
//! - L2 cache read/write operations
//! - Combined L1+L2 operations
//! - Cache hit vs miss latency
//! - Different data sizes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::time::Duration;
use tiercache::{CacheConfig, CacheService, CacheServiceBuilder, GetOrSetOptions, KeyOptions, SetOptions};
use tokio::runtime::Runtime;

/// Setup a cache backed by a live Redis reachable via `REDIS_URL` (defaults
/// to `redis://127.0.0.1:6379`), mirroring how the service is wired in
/// production.
fn setup_cache() -> (CacheService, Runtime) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let cache = rt.block_on(async {
        CacheServiceBuilder::new()
            .build()
            .await
            .unwrap_or_else(|_| panic!("Failed to create cache service"))
    });
    (cache, rt)
}

/// Like `setup_cache`, but with L1 disabled so every `get` is forced through
/// the L2 tier.
fn setup_l2_only_cache() -> (CacheService, Runtime) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let cache = rt.block_on(async {
        let mut config = CacheConfig::default();
        config.l1.enabled = false;
        CacheServiceBuilder::new()
            .with_config(config)
            .build()
            .await
            .unwrap_or_else(|_| panic!("Failed to create cache service"))
    });
    (cache, rt)
}

/// Generate test data of specified size
fn test_data(size_bytes: usize) -> serde_json::Value {
    let data_string = "x".repeat(size_bytes);
    json!({
        "data": data_string,
        "size": size_bytes,
        "timestamp": "2025-01-01T00:00:00Z"
    })
}

/// Benchmark L1 + L2 cache write operations
fn bench_cache_set(c: &mut Criterion) {
    let (cache, rt) = setup_cache();

    let mut group = c.benchmark_group("cache_set");
    group.measurement_time(Duration::from_secs(10));

    for size in &[100, 1024, 10240, 102_400] {
        let data = test_data(*size);

        group.bench_with_input(BenchmarkId::new("short_term", size), size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let key = format!("bench:set:{}", rand::random::<u32>());
                    let opts = SetOptions {
                        ttl_secs: Some(60),
                        ..SetOptions::default()
                    };
                    cache
                        .set(&key, black_box(data.clone()), &opts)
                        .await
                        .unwrap_or_else(|_| panic!("Failed to set cache"));
                });
            });
        });

        group.bench_with_input(BenchmarkId::new("long_term", size), size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let key = format!("bench:set:{}", rand::random::<u32>());
                    let opts = SetOptions {
                        ttl_secs: Some(86_400),
                        ..SetOptions::default()
                    };
                    cache
                        .set(&key, black_box(data.clone()), &opts)
                        .await
                        .unwrap_or_else(|_| panic!("Failed to set cache"));
                });
            });
        });
    }

    group.finish();
}

/// Benchmark L1 cache hit performance
fn bench_l1_hit(c: &mut Criterion) {
    let (cache, rt) = setup_cache();

    rt.block_on(async {
        for i in 0..100 {
            let key = format!("bench:l1:{i}");
            cache
                .set(&key, test_data(1024), &SetOptions::default())
                .await
                .unwrap_or_else(|_| panic!("Failed to set cache"));
            let _ = cache
                .get::<serde_json::Value>(&key, &KeyOptions::default())
                .await
                .unwrap_or_else(|_| panic!("Failed to get cache"));
        }
    });

    c.bench_function("l1_cache_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:l1:{}", rand::random::<u8>() % 100);
                black_box(
                    cache
                        .get::<serde_json::Value>(&key, &KeyOptions::default())
                        .await
                        .unwrap_or_else(|_| panic!("Failed to get cache")),
                );
            });
        });
    });
}

/// Benchmark L2 cache hit performance (L1 disabled)
fn bench_l2_hit(c: &mut Criterion) {
    let (cache, rt) = setup_l2_only_cache();

    rt.block_on(async {
        for i in 0..100 {
            let key = format!("bench:l2:{i}");
            cache
                .set(&key, test_data(1024), &SetOptions::default())
                .await
                .unwrap_or_else(|_| panic!("Failed to set cache"));
        }
    });

    c.bench_function("l2_cache_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:l2:{}", rand::random::<u8>() % 100);
                black_box(
                    cache
                        .get::<serde_json::Value>(&key, &KeyOptions::default())
                        .await
                        .unwrap_or_else(|_| panic!("Failed to get cache")),
                );
            });
        });
    });
}

/// Benchmark cache miss performance
fn bench_cache_miss(c: &mut Criterion) {
    let (cache, rt) = setup_cache();

    c.bench_function("cache_miss", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:miss:{}", rand::random::<u32>());
                black_box(
                    cache
                        .get::<serde_json::Value>(&key, &KeyOptions::default())
                        .await
                        .unwrap_or_else(|_| panic!("Failed to get cache")),
                );
            });
        });
    });
}

/// Benchmark cache-aside (`get_or_set`) pattern
fn bench_compute_on_miss(c: &mut Criterion) {
    let (cache, rt) = setup_cache();

    let mut group = c.benchmark_group("compute_on_miss");

    for delay_ms in &[1, 10, 50] {
        let delay = Duration::from_millis(*delay_ms);

        group.bench_with_input(BenchmarkId::from_parameter(delay_ms), delay_ms, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let key = format!("bench:compute:{}", rand::random::<u32>());
                    let data = test_data(1024);

                    cache
                        .get_or_set(
                            &key,
                            move || async move {
                                tokio::time::sleep(delay).await;
                                Ok::<_, anyhow::Error>(data)
                            },
                            GetOrSetOptions::default(),
                        )
                        .await
                        .unwrap_or_else(|_| panic!("Failed to get/compute"));
                });
            });
        });
    }

    group.finish();
}

/// Benchmark type-safe caching with serialization
fn bench_typed_cache(c: &mut Criterion) {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
        email: String,
        profile: String,
    }

    let (cache, rt) = setup_cache();

    c.bench_function("typed_cache_set_get", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:typed:{}", rand::random::<u32>());
                let user = User {
                    id: 123,
                    name: "Test User".to_string(),
                    email: "test@example.com".to_string(),
                    profile: "x".repeat(1024),
                };

                cache
                    .get_or_set(
                        &key,
                        {
                            let user = user.clone();
                            move || async move { Ok::<_, anyhow::Error>(user) }
                        },
                        GetOrSetOptions::default(),
                    )
                    .await
                    .unwrap_or_else(|_| panic!("Failed to get/compute typed"));

                black_box(
                    cache
                        .get_or_set(
                            &key,
                            || async { panic!("Should not compute") },
                            GetOrSetOptions::<User>::default(),
                        )
                        .await
                        .unwrap_or_else(|_| panic!("Failed to get/compute typed")),
                );
            });
        });
    });
}

/// Benchmark different TTL/SWR configurations
fn bench_cache_strategies(c: &mut Criterion) {
    let (cache, rt) = setup_cache();

    let mut group = c.benchmark_group("cache_strategies");
    let data = test_data(1024);

    let strategies: Vec<(&str, SetOptions)> = vec![
        (
            "realtime",
            SetOptions {
                ttl_secs: Some(5),
                ..SetOptions::default()
            },
        ),
        (
            "short_term",
            SetOptions {
                ttl_secs: Some(60),
                ..SetOptions::default()
            },
        ),
        (
            "medium_term",
            SetOptions {
                ttl_secs: Some(900),
                ..SetOptions::default()
            },
        ),
        (
            "long_term",
            SetOptions {
                ttl_secs: Some(86_400),
                ..SetOptions::default()
            },
        ),
        (
            "swr",
            SetOptions {
                ttl_secs: Some(60),
                swr_stale_secs: Some(300),
                ..SetOptions::default()
            },
        ),
    ];

    for (name, opts) in &strategies {
        group.bench_function(*name, |b| {
            b.iter(|| {
                rt.block_on(async {
                    let key = format!("bench:strategy:{}", rand::random::<u32>());
                    cache
                        .set(&key, black_box(data.clone()), opts)
                        .await
                        .unwrap_or_else(|_| panic!("Failed to set cache"));
                });
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cache_set,
    bench_l1_hit,
    bench_l2_hit,
    bench_cache_miss,
    bench_compute_on_miss,
    bench_typed_cache,
    bench_cache_strategies
);
criterion_main!(benches);
