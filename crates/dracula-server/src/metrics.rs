//! Prometheus metrics for the dracula server
//!
//! Exposes metrics at /metrics for Prometheus scraping. Only the store
//! cleanup records gauges today; request counters belong to whatever proxy
//! fronts the server.

use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body::Incoming};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{register_gauge, Encoder, Gauge, TextEncoder};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::store::CleanupReport;

lazy_static! {
    pub static ref GC_DENOMINATOR: Gauge = register_gauge!(
        "dracula_gc_namespaces_denominator",
        "Fraction denominator of namespaces swept per cleanup pass"
    )
    .unwrap();

    pub static ref GC_NAMESPACES_TOTAL: Gauge = register_gauge!(
        "dracula_gc_namespaces_total",
        "Namespaces present when the last cleanup pass started"
    )
    .unwrap();

    pub static ref GC_NAMESPACES_COLLECTED: Gauge = register_gauge!(
        "dracula_gc_namespaces_collected",
        "Empty namespaces removed by the last cleanup pass"
    )
    .unwrap();

    pub static ref GC_KEYS_REMAINING: Gauge = register_gauge!(
        "dracula_gc_keys_remaining",
        "Live keys left in the namespaces swept by the last cleanup pass"
    )
    .unwrap();

    pub static ref GC_ENTRIES_REMAINING: Gauge = register_gauge!(
        "dracula_gc_entries_remaining",
        "Live occurrences left in the namespaces swept by the last cleanup pass"
    )
    .unwrap();

    pub static ref GC_PAUSE_SECONDS: Gauge = register_gauge!(
        "dracula_gc_pause_seconds",
        "Wall time of the last cleanup pass"
    )
    .unwrap();
}

/// Record the outcome of one store cleanup pass.
pub fn record_gc(denominator: usize, report: &CleanupReport) {
    GC_DENOMINATOR.set(denominator as f64);
    GC_NAMESPACES_TOTAL.set(report.namespaces_total as f64);
    GC_NAMESPACES_COLLECTED.set(report.removed as f64);
    GC_KEYS_REMAINING.set(report.keys_remaining as f64);
    GC_ENTRIES_REMAINING.set(report.entries_remaining as f64);
    GC_PAUSE_SECONDS.set(report.elapsed.as_secs_f64());
}

/// Serve /metrics and /health until the task is dropped.
pub async fn start_metrics_server(bind_addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("metrics server listening on {}", bind_addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_metrics))
                .await
            {
                error!("metrics server error: {}", e);
            }
        });
    }
}

async fn handle_metrics(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    match req.uri().path() {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let metric_families = prometheus::gather();
            let mut buffer = Vec::new();

            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                error!("failed to encode metrics: {}", e);
                return Ok(Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Full::new(Bytes::from("failed to encode metrics")))
                    .unwrap());
            }

            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", encoder.format_type())
                .body(Full::new(Bytes::from(buffer)))
                .unwrap())
        }
        "/health" => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("OK")))
            .unwrap()),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .unwrap()),
    }
}
