use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mintcache::cache::{
    CacheError, CacheProvider, CacheService, CompoundProvider, CompoundService, MemoryProvider,
    Ttl,
};
use mintcache::config::Settings;
use mintcache::infra::{CacheStack, InfraError};
use mintcache::paging::{BoxError, PagingService};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Collection {
    slug: String,
    floor: u64,
}

fn tiers() -> (Arc<dyn CacheProvider>, Arc<dyn CacheProvider>, CompoundProvider) {
    let l0: Arc<dyn CacheProvider> = Arc::new(MemoryProvider::new(1));
    let l1: Arc<dyn CacheProvider> = Arc::new(MemoryProvider::new(1));
    let compound = CompoundProvider::new(vec![Arc::clone(&l0), Arc::clone(&l1)]).expect("layers");
    (l0, l1, compound)
}

fn about_ten_seconds(ttl: Ttl) -> bool {
    ttl.remaining()
        .is_some_and(|left| left > Duration::from_secs(8) && left <= Duration::from_secs(10))
}

#[tokio::test]
async fn deep_value_is_returned_and_filled_upwards() {
    let (l0, l1, compound) = tiers();
    l1.set("k", b"v", Ttl::from_secs(10)).await.expect("seed");

    let value = compound.get("k").await.expect("hit");
    assert_eq!(value.data, b"v");
    assert!(about_ten_seconds(value.ttl));

    let filled = l0.get("k").await.expect("filled");
    assert_eq!(filled.data, b"v");
    assert!(about_ten_seconds(filled.ttl));
}

#[tokio::test]
async fn incr_on_deepest_layer_is_mirrored() {
    let (l0, l1, compound) = tiers();
    l1.set("k", b"7", Ttl::from_secs(10)).await.expect("seed");

    let (value, _) = compound.incr("k", 3).await.expect("incr");
    assert_eq!(value, 10);
    assert_eq!(l0.get("k").await.expect("upper").data, b"10");
    assert_eq!(l1.get("k").await.expect("deepest").data, b"10");
}

#[tokio::test]
async fn typed_layers_run_the_producer_once() {
    let (l0, l1, _) = tiers();
    let service = CompoundService::new(vec![
        CacheService::new(Ttl::from_secs(5), "nft", l0),
        CacheService::new(Ttl::from_secs(60), "nft", Arc::clone(&l1)),
    ])
    .expect("layers");
    let counter = AtomicUsize::new(0);
    let calls = &counter;

    for _ in 0..3 {
        let collection = service
            .get_by_func("apes", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(Collection {
                    slug: "apes".to_string(),
                    floor: 42,
                })
            })
            .await
            .expect("collection");
        assert_eq!(collection.floor, 42);
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let stored = l1.get("nft:apes").await.expect("deep copy");
    let decoded: Collection = serde_json::from_slice(&stored.data).expect("json by default");
    assert_eq!(decoded.slug, "apes");
}

#[tokio::test]
async fn stack_defaults_keep_the_memory_tier_off() {
    let shared: Arc<dyn CacheProvider> = Arc::new(MemoryProvider::new(1));
    let stack = CacheStack::assemble(shared, &Settings::default()).expect("stack");

    assert!(stack.local().is_none());
    assert_eq!(stack.cache_set().prefix(), "cacheHttp");
    assert_eq!(stack.http_cache().cache().layers().len(), 1);
    assert_eq!(stack.workers().size(), Settings::default().paging.worker_pool_size);
}

#[tokio::test]
async fn stack_with_memory_tier_layers_http_cache() {
    let mut settings = Settings::default();
    settings.memory.enabled = true;
    settings.memory.capacity_mib = 2;
    settings.http_cache.memory_tier = true;
    settings.http_cache.prefix = "edge".to_string();

    let shared: Arc<dyn CacheProvider> = Arc::new(MemoryProvider::new(1));
    let stack = CacheStack::assemble(shared, &settings).expect("stack");

    let local = stack.local().expect("memory tier");
    assert_eq!(local.capacity_bytes(), 2 * 1024 * 1024);
    let layers = stack.http_cache();
    assert_eq!(layers.cache().layers().len(), 2);
    assert!(layers.cache().layers().iter().all(|layer| layer.prefix() == "edge"));
}

#[test]
fn memory_tier_without_memory_is_rejected() {
    let mut settings = Settings::default();
    settings.http_cache.memory_tier = true;

    let shared: Arc<dyn CacheProvider> = Arc::new(MemoryProvider::new(1));
    let err = CacheStack::assemble(shared, &settings)
        .err()
        .expect("inconsistent settings");
    assert!(matches!(err, InfraError::Configuration { .. }));
}

#[tokio::test]
async fn paging_services_share_the_stack_pool() {
    let mut settings = Settings::default();
    settings.paging.shard_size = 2;
    settings.paging.worker_pool_size = 3;

    let shared: Arc<dyn CacheProvider> = Arc::new(MemoryProvider::new(1));
    let stack = CacheStack::assemble(Arc::clone(&shared), &settings).expect("stack");

    let service = PagingService::builder(Arc::clone(stack.shared()), "owners", |key: String| async move {
        Ok::<_, BoxError>((0..5u32).map(|n| format!("{key}-{n}")).collect::<Vec<_>>())
    })
    .settings(&settings.paging)
    .worker_pool(stack.workers().clone())
    .build()
    .expect("valid");

    let page = service.page("apes", "", 3).await.expect("page");
    assert_eq!(page.items, vec!["apes-0", "apes-1", "apes-2"]);
    assert_eq!(stack.workers().available(), 3);
    assert!(shared.get(&service.latest_key("apes")).await.is_ok());
}
