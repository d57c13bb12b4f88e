//! Publish-path comparison: the same message stream through the fast path
//! and the traced path, with wall-clock numbers for both, plus a rapid
//! toggling pass.
//!
//! ```text
//! cargo run --release --example publish_modes
//! ```
//!
//! Set `SKIP_PERFORMANCE_DEMO=1` to skip the timed batches.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use servicekit::{
    logging, BusClient, BusMessage, InitConfig, MemoryBus, RuntimeTracer, ServiceHost, Tracer,
};

#[derive(Serialize, Deserialize)]
struct Tick {
    n: u64,
}

impl BusMessage for Tick {
    fn type_name() -> &'static str {
        "demo.Tick"
    }
}

const BATCH: u64 = 100_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let bus = Arc::new(MemoryBus::new());
    let tracer = Arc::new(RuntimeTracer::new());
    let host = ServiceHost::builder("svc-perf-001", "PublishModes")
        .bus(Arc::clone(&bus) as Arc<dyn BusClient>)
        .tracer(Arc::clone(&tracer) as Arc<dyn Tracer>)
        .build();

    let mut init = InitConfig::performance();
    init.bus_url = "memory://local".to_string();
    init.enable_permanent_tasks = false;
    if let Err(e) = host.start(init).await {
        eprintln!("failed to start: {e}");
        std::process::exit(1);
    }

    if std::env::var("SKIP_PERFORMANCE_DEMO").is_ok() {
        println!("SKIP_PERFORMANCE_DEMO set, skipping timed batches");
        host.shutdown().await;
        return Ok(());
    }

    println!("fast path: {BATCH} publishes");
    let started = Instant::now();
    for n in 0..BATCH {
        host.publish_broadcast(&Tick { n }).await;
    }
    let fast = started.elapsed();
    println!(
        "  {fast:?} total, {:.0} ns/publish, spans created: {}",
        fast.as_nanos() as f64 / BATCH as f64,
        tracer.spans_started()
    );

    host.enable_tracing();
    println!("traced path: {BATCH} publishes");
    let started = Instant::now();
    for n in 0..BATCH {
        host.publish_broadcast(&Tick { n }).await;
    }
    let traced = started.elapsed();
    println!(
        "  {traced:?} total, {:.0} ns/publish, spans created: {}",
        traced.as_nanos() as f64 / BATCH as f64,
        tracer.spans_started()
    );

    println!(
        "overhead ratio: {:.2}x",
        traced.as_secs_f64() / fast.as_secs_f64().max(f64::EPSILON)
    );

    // Rapid switching: the toggle is cheap and takes effect on the next
    // call, so alternating per message works.
    let started = Instant::now();
    for n in 0..1000 {
        host.disable_tracing();
        host.publish_broadcast(&Tick { n }).await;
        host.enable_tracing();
        host.publish_broadcast(&Tick { n }).await;
    }
    println!("2000 publishes with 1000 toggles: {:?}", started.elapsed());

    host.shutdown().await;
    Ok(())
}
