//! End-to-end messaging over a shared in-process bus: broadcast fan-out
//! and point-to-point isolation between independently started hosts.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use servicekit::{
    BusClient, BusMessage, InitConfig, MemoryBus, Registrations, Routing, ServiceHost,
};

#[derive(Serialize, Deserialize)]
struct Ping {
    text: String,
}

impl BusMessage for Ping {
    fn type_name() -> &'static str {
        "itest.Ping"
    }
}

#[derive(Serialize, Deserialize)]
struct Work {
    id: u32,
}

impl BusMessage for Work {
    fn type_name() -> &'static str {
        "itest.Work"
    }
}

fn quiet_config() -> InitConfig {
    InitConfig {
        enable_permanent_tasks: false,
        enable_auto_cache_cleanup: false,
        ..InitConfig::default()
    }
}

fn host_on(bus: &Arc<MemoryBus>, uid: &str, name: &str) -> Arc<ServiceHost> {
    ServiceHost::builder(uid, name)
        .bus(Arc::clone(bus) as Arc<dyn BusClient>)
        .worker_threads(2)
        .build()
}

async fn settle(counter: &AtomicUsize, at_least: usize) {
    for _ in 0..400 {
        if counter.load(Ordering::SeqCst) >= at_least {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Extra window so late duplicates would be observed by the caller.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_reaches_every_subscriber_exactly_once() {
    let bus = Arc::new(MemoryBus::new());
    let host_a = host_on(&bus, "svc-a", "ServiceA");
    let host_b = host_on(&bus, "svc-b", "ServiceB");
    let host_c = host_on(&bus, "svc-c", "ServiceC");

    let seen_a = Arc::new(AtomicUsize::new(0));
    let seen_b = Arc::new(AtomicUsize::new(0));

    let a_counter = Arc::clone(&seen_a);
    host_a
        .register_handlers(Registrations::new().on::<Ping, _, _>(
            Routing::Broadcast,
            move |ping: Ping| {
                let counter = Arc::clone(&a_counter);
                async move {
                    assert_eq!(ping.text, "hi");
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ))
        .await
        .unwrap();

    let b_counter = Arc::clone(&seen_b);
    host_b
        .register_handlers(Registrations::new().on::<Ping, _, _>(
            Routing::Broadcast,
            move |ping: Ping| {
                let counter = Arc::clone(&b_counter);
                async move {
                    assert_eq!(ping.text, "hi");
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ))
        .await
        .unwrap();

    host_a.start(quiet_config()).await.unwrap();
    host_b.start(quiet_config()).await.unwrap();
    host_c.start(quiet_config()).await.unwrap();

    host_c
        .publish_broadcast(&Ping {
            text: "hi".to_string(),
        })
        .await;

    settle(&seen_a, 1).await;
    settle(&seen_b, 1).await;
    assert_eq!(seen_a.load(Ordering::SeqCst), 1);
    assert_eq!(seen_b.load(Ordering::SeqCst), 1);

    host_a.shutdown().await;
    host_b.shutdown().await;
    host_c.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn point_to_point_reaches_only_the_addressed_service() {
    let bus = Arc::new(MemoryBus::new());
    let host_a = host_on(&bus, "svc-a", "ServiceA");
    let host_b = host_on(&bus, "svc-b", "ServiceB");
    let host_c = host_on(&bus, "svc-c", "ServiceC");

    let b_hits = Arc::new(AtomicUsize::new(0));
    let b_last_id = Arc::new(AtomicU32::new(0));
    let c_hits = Arc::new(AtomicUsize::new(0));

    let (hits, last_id) = (Arc::clone(&b_hits), Arc::clone(&b_last_id));
    host_b
        .register_handlers(Registrations::new().on::<Work, _, _>(
            Routing::PointToPoint,
            move |work: Work| {
                let (hits, last_id) = (Arc::clone(&hits), Arc::clone(&last_id));
                async move {
                    last_id.store(work.id, Ordering::SeqCst);
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            },
        ))
        .await
        .unwrap();

    let c_counter = Arc::clone(&c_hits);
    host_c
        .register_handlers(Registrations::new().on::<Work, _, _>(
            Routing::PointToPoint,
            move |_work: Work| {
                let counter = Arc::clone(&c_counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ))
        .await
        .unwrap();

    host_a.start(quiet_config()).await.unwrap();
    host_b.start(quiet_config()).await.unwrap();
    host_c.start(quiet_config()).await.unwrap();

    host_a.publish_point_to_point("svc-b", &Work { id: 7 }).await;

    settle(&b_hits, 1).await;
    assert_eq!(b_hits.load(Ordering::SeqCst), 1);
    assert_eq!(b_last_id.load(Ordering::SeqCst), 7);
    assert_eq!(c_hits.load(Ordering::SeqCst), 0);

    host_a.shutdown().await;
    host_b.shutdown().await;
    host_c.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn staged_startup_services_still_exchange_messages() {
    let bus = Arc::new(MemoryBus::new());
    let host = host_on(&bus, "svc-staged", "Staged");

    let infra = host.start_infrastructure_async(quiet_config());

    // Handler registration may overlap infrastructure startup.
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    host.register_handlers(Registrations::new().on::<Ping, _, _>(
        Routing::Broadcast,
        move |_ping: Ping| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        },
    ))
    .await
    .unwrap();

    infra.await.expect("join").expect("infrastructure up");
    host.complete_startup_async(quiet_config()).await.unwrap();

    host.publish_broadcast(&Ping {
        text: "self".to_string(),
    })
    .await;

    settle(&seen, 1).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    host.shutdown().await;
}
