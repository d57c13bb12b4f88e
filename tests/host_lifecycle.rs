//! Whole-host behavior: cache system wiring, the automatic cleanup task,
//! scheduler integration, and shutdown ordering under load.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use servicekit::{BusClient, InitConfig, MemoryBus, ServiceHost};

fn host_on(bus: &Arc<MemoryBus>, uid: &str) -> Arc<ServiceHost> {
    ServiceHost::builder(uid, "LifecycleDemo")
        .bus(Arc::clone(bus) as Arc<dyn BusClient>)
        .worker_threads(2)
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn auto_cache_cleanup_sweeps_expired_entries() {
    let bus = Arc::new(MemoryBus::new());
    let host = host_on(&bus, "svc-cache");

    let config = InitConfig {
        enable_permanent_tasks: false,
        cache_cleanup_interval: Duration::from_millis(60),
        default_cache_size: 100,
        default_cache_ttl: Some(Duration::from_millis(40)),
        ..InitConfig::default()
    };
    host.start(config).await.unwrap();

    let cache = host.create_cache::<String, String>("sessions").unwrap();
    cache.put("a".to_string(), "1".to_string());
    cache.put("b".to_string(), "2".to_string());
    assert_eq!(cache.size(), 2);

    // TTL elapses, then the scheduled sweep fires without any access.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.stats().expirations, 2);

    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cache_eviction_scenario_through_the_host() {
    let bus = Arc::new(MemoryBus::new());
    let host = host_on(&bus, "svc-evict");
    let config = InitConfig {
        enable_permanent_tasks: false,
        enable_auto_cache_cleanup: false,
        ..InitConfig::default()
    };
    host.start(config).await.unwrap();

    let cache = host.create_cache_sized::<u32, String>("lru", 3, None).unwrap();
    cache.put(1, "a".to_string());
    cache.put(2, "b".to_string());
    cache.put(3, "c".to_string());
    assert_eq!(cache.get(&1), Some("a".to_string()));
    cache.put(4, "d".to_string());

    assert_eq!(cache.keys_snapshot(), vec![4, 1, 3]);
    assert_eq!(cache.stats().evictions, 1);

    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scheduler_tasks_survive_until_shutdown_and_stop_after() {
    let bus = Arc::new(MemoryBus::new());
    let host = host_on(&bus, "svc-sched");
    let config = InitConfig {
        enable_permanent_tasks: false,
        enable_auto_cache_cleanup: false,
        ..InitConfig::default()
    };
    host.start(config).await.unwrap();

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks);
    host.scheduler().schedule_interval("tick", Duration::from_millis(30), move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let before = ticks.load(Ordering::SeqCst);
    assert!(before >= 3, "expected several ticks, got {before}");

    host.shutdown().await;
    let at_shutdown = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), at_shutdown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_under_load_completes_all_accepted_work() {
    let bus = Arc::new(MemoryBus::new());
    let host = host_on(&bus, "svc-load");
    let config = InitConfig {
        enable_permanent_tasks: false,
        enable_auto_cache_cleanup: false,
        ..InitConfig::default()
    };
    host.start(config).await.unwrap();

    let done = Arc::new(AtomicUsize::new(0));
    let mut accepted = 0;
    for _ in 0..100 {
        let done = Arc::clone(&done);
        if host.submit_task(async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            done.fetch_add(1, Ordering::SeqCst);
        }) {
            accepted += 1;
        }
    }

    host.shutdown().await;
    assert_eq!(done.load(Ordering::SeqCst), accepted);
    assert_eq!(accepted, 100);
}
