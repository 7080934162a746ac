//! Provider and paging tests against a real Redis started with testcontainers.
//!
//! Marked `#[ignore]` because they need a Docker daemon:
//! `cargo test --test live_redis -- --ignored`.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use mintcache::cache::{CacheProvider, CompoundProvider, MemoryProvider, RedisProvider, Ttl};
use mintcache::config::RedisSettings;
use mintcache::infra::redis::connect;
use mintcache::paging::{BoxError, PagingService};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let port = container
                .get_host_port_ipv4(6379)
                .await
                .expect("mapped redis port");
            (container, format!("redis://127.0.0.1:{port}"))
        })
        .await;
    url.clone()
}

async fn provider() -> RedisProvider {
    let settings = RedisSettings {
        url: redis_url().await,
        pool_size: NonZeroU32::new(4).expect("non-zero"),
        timeout: Duration::from_secs(2),
    };
    connect(&settings).await.expect("redis should answer PING")
}

fn unique(name: &str) -> String {
    format!("{name}:{}", mintcache::paging::now_nanos())
}

#[tokio::test]
#[ignore]
async fn set_get_reports_millisecond_ttl() {
    let redis = provider().await;
    let key = unique("ttl");

    redis
        .set(&key, b"v", Ttl::from_secs(10))
        .await
        .expect("set");
    let value = redis.get(&key).await.expect("get");
    assert_eq!(value.data, b"v");
    let remaining = value.ttl.remaining().expect("expiring key");
    assert!(remaining > Duration::from_secs(9) && remaining <= Duration::from_secs(10));

    redis.set(&key, b"w", Ttl::Forever).await.expect("persist");
    assert_eq!(redis.get(&key).await.expect("get").ttl, Ttl::Forever);
}

#[tokio::test]
#[ignore]
async fn missing_keys_and_deletes() {
    let redis = provider().await;
    let key = unique("missing");

    assert!(redis.get(&key).await.expect_err("absent").is_not_found());
    assert!(redis.incr(&key, 1).await.expect_err("absent").is_not_found());

    redis.set(&key, b"v", Ttl::from_secs(10)).await.expect("set");
    redis.del(&key).await.expect("del");
    redis.del(&key).await.expect("del is idempotent");
    assert!(redis.get(&key).await.expect_err("deleted").is_not_found());
}

#[tokio::test]
#[ignore]
async fn incr_keeps_the_existing_expiry() {
    let redis = provider().await;
    let key = unique("counter");

    redis.set(&key, b"7", Ttl::from_secs(30)).await.expect("set");
    let (value, ttl) = redis.incr(&key, 3).await.expect("incr");
    assert_eq!(value, 10);
    assert!(ttl.remaining().is_some_and(|left| left > Duration::from_secs(25)));
}

#[tokio::test]
#[ignore]
async fn set_nx_only_succeeds_once() {
    let redis = provider().await;
    let key = unique("lock");

    assert!(redis.set_nx(&key, b"1", Ttl::from_secs(5)).await.expect("first"));
    assert!(!redis.set_nx(&key, b"1", Ttl::from_secs(5)).await.expect("second"));
    redis.del(&key).await.expect("release");
    assert!(redis.set_nx(&key, b"1", Ttl::from_secs(5)).await.expect("after release"));
}

#[tokio::test]
#[ignore]
async fn memory_over_redis_incr_is_anchored_in_redis() {
    let redis: Arc<dyn CacheProvider> = Arc::new(provider().await);
    let memory: Arc<dyn CacheProvider> = Arc::new(MemoryProvider::new(1));
    let compound =
        CompoundProvider::new(vec![Arc::clone(&memory), Arc::clone(&redis)]).expect("layers");
    let key = unique("compound");

    redis.set(&key, b"7", Ttl::from_secs(10)).await.expect("seed redis");
    let (value, _) = compound.incr(&key, 3).await.expect("incr");
    assert_eq!(value, 10);
    assert_eq!(memory.get(&key).await.expect("mirrored").data, b"10");
    assert_eq!(redis.get(&key).await.expect("anchor").data, b"10");
}

#[tokio::test]
#[ignore]
async fn paging_snapshot_round_trips_through_redis() {
    let redis: Arc<dyn CacheProvider> = Arc::new(provider().await);
    let service = PagingService::builder(redis, "live", |_key: String| async {
        Ok::<_, BoxError>((1..=250u32).collect::<Vec<_>>())
    })
    .renew_after(Duration::from_secs(10))
    .expire_after(Duration::from_secs(10))
    .build()
    .expect("valid");
    let key = unique("collection");

    let mut seen = Vec::new();
    let mut cursor = String::new();
    loop {
        let page = service.page(&key, &cursor, 40).await.expect("page");
        assert_eq!(page.total, 250);
        let done = !page.has_next();
        seen.extend(page.items);
        if done {
            break;
        }
        cursor = page.next;
    }
    assert_eq!(seen, (1..=250u32).collect::<Vec<_>>());
}
