//! A complete service on the runtime: typed handlers, caching, scheduled
//! work, maintenance probes, and signal-driven graceful shutdown.
//!
//! ```text
//! cargo run --example service_demo [config_file]
//! ```
//!
//! The optional config file holds `key=value` lines (`threads=4`). The
//! environment is honored the usual way: `LOG_LEVEL`, `NATS_URL`,
//! `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`. Send SIGINT or
//! SIGTERM for graceful shutdown; SIGHUP re-reads `LOG_LEVEL`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use servicekit::{
    logging, BusClient, BusMessage, InitConfig, MapSettings, MemoryBus, Registrations, Routing,
    ServiceHost, Settings,
};

#[derive(Serialize, Deserialize)]
struct HealthCheckRequest {
    requester_uid: String,
}

impl BusMessage for HealthCheckRequest {
    fn type_name() -> &'static str {
        "demo.HealthCheckRequest"
    }
}

#[derive(Serialize, Deserialize)]
struct HealthCheckResponse {
    uid: String,
    status: String,
}

impl BusMessage for HealthCheckResponse {
    fn type_name() -> &'static str {
        "demo.HealthCheckResponse"
    }
}

#[derive(Serialize, Deserialize)]
struct MarketDataUpdate {
    symbol: String,
    price: f64,
}

impl BusMessage for MarketDataUpdate {
    fn type_name() -> &'static str {
        "demo.MarketDataUpdate"
    }
}

/// Loads `key=value` lines; missing file means empty settings.
fn load_settings(path: Option<&str>) -> MapSettings {
    let settings = MapSettings::new();
    if let Some(path) = path {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                for line in contents.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((key, value)) = line.split_once('=') {
                        settings.set(key.trim(), value.trim());
                    }
                }
            }
            Err(e) => eprintln!("warning: could not read {path}: {e}"),
        }
    }
    settings
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config_path = std::env::args().nth(1);
    let settings = Arc::new(load_settings(config_path.as_deref()));
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "DemoService".to_string());

    let bus = Arc::new(MemoryBus::new());
    let host = ServiceHost::builder("svc-demo-001", service_name)
        .bus(Arc::clone(&bus) as Arc<dyn BusClient>)
        .settings(settings as Arc<dyn Settings>)
        .build();

    // Handlers first; subscriptions are created during startup.
    let responder = Arc::clone(&host);
    let market_host = Arc::clone(&host);
    host.register_handlers(
        Registrations::new()
            .on::<HealthCheckRequest, _, _>(Routing::PointToPoint, move |req| {
                let host = Arc::clone(&responder);
                async move {
                    let response = HealthCheckResponse {
                        uid: host.uid().to_string(),
                        status: host.status().to_string(),
                    };
                    host.publish_point_to_point(&req.requester_uid, &response).await;
                }
            })
            .on::<MarketDataUpdate, _, _>(Routing::Broadcast, move |update| {
                let host = Arc::clone(&market_host);
                async move {
                    let cache = match host.get_cache::<String, f64>("prices") {
                        Some(cache) => cache,
                        None => return,
                    };
                    cache.put(update.symbol.clone(), update.price);
                    host.logger()
                        .debug(format!("cached {} at {}", update.symbol, update.price));
                }
            }),
    )
    .await?;

    let mut init = InitConfig::development();
    init.bus_url = "memory://local".to_string();
    if let Err(e) = host.start(init).await {
        eprintln!("service failed to start: {e}");
        std::process::exit(1);
    }

    host.create_cache_sized::<String, f64>("prices", 1000, Some(Duration::from_secs(300)))?;

    // A little self-traffic so the demo has something to chew on.
    let feeder = Arc::clone(&host);
    host.scheduler().schedule_interval("feed", Duration::from_secs(2), move || {
        let host = Arc::clone(&feeder);
        async move {
            host.publish_broadcast(&MarketDataUpdate {
                symbol: "ACME".to_string(),
                price: 42.0,
            })
            .await;
            Ok(())
        }
    });

    let stats_host = Arc::clone(&host);
    host.scheduler().schedule_interval("stats", Duration::from_secs(10), move || {
        let host = Arc::clone(&stats_host);
        async move {
            host.logger().info(host.caches().stats_summary());
            Ok(())
        }
    });

    host.logger().info(format!(
        "{} running as {} — Ctrl-C to stop",
        host.service_name(),
        host.uid()
    ));

    host.wait_until_stopped().await;
    host.shutdown().await;
    Ok(())
}
