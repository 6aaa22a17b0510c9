//! TTL validation on writes, graceful degradation of read paths on a bad
//! key, and the pipelined multi-key operations.

mod common;

use tiercache::{CacheError, CacheServiceBuilder, KeyOptions, SetOptions};

use common::fake_driver;

#[tokio::test]
async fn set_rejects_zero_ttl() {
    let driver = fake_driver();
    let cache = CacheServiceBuilder::new()
        .with_driver(driver)
        .build()
        .await
        .expect("build cache service");

    let opts = SetOptions {
        ttl_secs: Some(0),
        ..SetOptions::default()
    };
    let err = cache.set("k", "v", &opts).await.expect_err("zero ttl must be rejected");
    assert!(matches!(err, CacheError::ValidationFailed { .. }));
}

#[tokio::test]
async fn set_rejects_ttl_over_max() {
    let driver = fake_driver();
    let cache = CacheServiceBuilder::new()
        .with_driver(driver)
        .build()
        .await
        .expect("build cache service");

    // Default max_ttl_secs is 86400.
    let opts = SetOptions {
        ttl_secs: Some(999_999),
        ..SetOptions::default()
    };
    let err = cache
        .set("k", "v", &opts)
        .await
        .expect_err("ttl over max_ttl_secs must be rejected");
    assert!(matches!(err, CacheError::ValidationFailed { .. }));
}

#[tokio::test]
async fn get_has_ttl_degrade_on_invalid_key_instead_of_erroring() {
    let driver = fake_driver();
    let cache = CacheServiceBuilder::new()
        .with_driver(driver)
        .build()
        .await
        .expect("build cache service");

    let bad_key = "bad key with space";
    let opts = KeyOptions::default();

    let got: Option<String> = cache.get(bad_key, &opts).await.expect("get must not error on a bad key");
    assert_eq!(got, None);

    let has = cache.has(bad_key, &opts).await.expect("has must not error on a bad key");
    assert!(!has);

    let ttl = cache.ttl(bad_key, &opts).await.expect("ttl must not error on a bad key");
    assert_eq!(ttl, -2);
}

#[tokio::test]
async fn get_many_degrades_one_bad_key_without_aborting_the_batch() {
    let driver = fake_driver();
    let cache = CacheServiceBuilder::new()
        .with_driver(driver)
        .build()
        .await
        .expect("build cache service");

    cache.set("good:1", "a", &SetOptions::default()).await.expect("set good:1");
    cache.set("good:2", "b", &SetOptions::default()).await.expect("set good:2");

    let keys = vec!["good:1".to_string(), "bad key".to_string(), "good:2".to_string()];
    let results: Vec<Option<String>> = cache
        .get_many(&keys, &KeyOptions::default())
        .await
        .expect("get_many must not abort on a bad key");

    assert_eq!(results, vec![Some("a".to_string()), None, Some("b".to_string())]);
}

#[tokio::test]
async fn set_many_get_many_delete_many_round_trip_through_the_pipelined_path() {
    let driver = fake_driver();
    let cache = CacheServiceBuilder::new()
        .with_driver(driver)
        .build()
        .await
        .expect("build cache service");

    let items = vec![
        ("batch:1".to_string(), 1),
        ("batch:2".to_string(), 2),
        ("batch:3".to_string(), 3),
    ];
    cache.set_many(items, &SetOptions::default()).await.expect("set_many");

    let keys = vec!["batch:1".to_string(), "batch:2".to_string(), "batch:3".to_string()];
    let values: Vec<Option<i32>> = cache.get_many(&keys, &KeyOptions::default()).await.expect("get_many");
    assert_eq!(values, vec![Some(1), Some(2), Some(3)]);

    let deleted = cache.delete_many(&keys, &KeyOptions::default()).await.expect("delete_many");
    assert_eq!(deleted, 3);

    for key in &keys {
        assert!(!cache.has(key, &KeyOptions::default()).await.unwrap());
    }
}
