//! Benchmarks for cache stampede protection

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tiercache::{CacheService, CacheServiceBuilder, GetOrSetOptions};
use tokio::runtime::Runtime;

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

/// Benchmark stampede protection: 100 concurrent callers racing a cold key.
fn bench_stampede_protection(c: &mut Criterion) {
    let (cache, rt) = setup_cache();
    let cache = Arc::new(cache);

    c.bench_function("stampede_100_concurrent", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:stampede:{}", rand::random::<u32>());
                let mut handles = vec![];

                for _ in 0..100 {
                    let cache = cache.clone();
                    let key = key.clone();
                    let handle = tokio::spawn(async move {
                        cache
                            .get_or_set(
                                &key,
                                || async {
                                    tokio::time::sleep(Duration::from_millis(10)).await;
                                    Ok::<_, anyhow::Error>(json!({"computed": true}))
                                },
                                GetOrSetOptions::default(),
                            )
                            .await
                            .unwrap_or_else(|_| panic!("Failed to compute"))
                    });
                    handles.push(handle);
                }

                for handle in handles {
                    black_box(handle.await.unwrap_or_else(|_| panic!("Task failed")));
                }
            });
        });
    });
}

criterion_group!(benches, bench_stampede_protection);
criterion_main!(benches);
