use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::MatchedPath;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use splitcache_lib::{PollError, Stream, Update};

/// Global metrics registry
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// All application metrics
pub struct Metrics {
    // Sync metrics
    pub sync_total: IntCounterVec,
    pub splits_total: IntGauge,
    pub segments_total: IntGauge,
    pub since: IntGauge,

    // HTTP request metrics
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    fn new(registry: &Registry) -> Self {
        // ── Sync metrics ─────────────────────────────────────────────
        let sync_total = IntCounterVec::new(
            Opts::new("splitcache_sync_total", "Total number of stream syncs by result"),
            &["stream", "result"],
        )
        .expect("failed to create sync_total metric");

        let splits_total = IntGauge::new("splitcache_splits_total", "Number of cached splits")
            .expect("failed to create splits_total metric");

        let segments_total =
            IntGauge::new("splitcache_segments_total", "Number of cached segments")
                .expect("failed to create segments_total metric");

        let since = IntGauge::new("splitcache_since", "Current split feed cursor")
            .expect("failed to create since metric");

        // ── HTTP request metrics ─────────────────────────────────────
        let http_requests_total = IntCounterVec::new(
            Opts::new("splitcache_http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )
        .expect("failed to create http_requests_total metric");

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "splitcache_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["method", "path"],
        )
        .expect("failed to create http_request_duration metric");

        registry.register(Box::new(sync_total.clone())).expect("register sync_total");
        registry.register(Box::new(splits_total.clone())).expect("register splits_total");
        registry.register(Box::new(segments_total.clone())).expect("register segments_total");
        registry.register(Box::new(since.clone())).expect("register since");
        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("register http_requests_total");
        registry
            .register(Box::new(http_request_duration.clone()))
            .expect("register http_request_duration");

        Self {
            sync_total,
            splits_total,
            segments_total,
            since,
            http_requests_total,
            http_request_duration,
        }
    }
}

/// Get the global metrics instance, initializing on first call
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = REGISTRY.get_or_init(Registry::new);
        Metrics::new(registry)
    })
}

fn stream_label(stream: Stream) -> &'static str {
    match stream {
        Stream::Splits => "splits",
        Stream::Segments => "segments",
    }
}

/// Poller update hook.
pub fn record_update(update: &Update) {
    let m = metrics();
    m.sync_total
        .with_label_values(&[stream_label(update.stream), "ok"])
        .inc();
    match update.stream {
        Stream::Splits => m.splits_total.set(update.count as i64),
        Stream::Segments => m.segments_total.set(update.count as i64),
    }
    if let Some(since) = update.since {
        m.since.set(since);
    }
}

/// Poller error hook.
pub fn record_error(error: &PollError) {
    metrics()
        .sync_total
        .with_label_values(&[stream_label(error.stream), "error"])
        .inc();
}

/// Axum handler for GET /metrics, returns Prometheus text format
pub async fn handle_metrics() -> Response {
    // Ensure all metric collectors are registered on first call.
    let _ = metrics();
    let registry = REGISTRY.get_or_init(Registry::new);
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Axum middleware that records HTTP request count and duration.
pub async fn track_metrics(request: Request<axum::body::Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let m = metrics();
    m.http_requests_total
        .with_label_values(&[&method, &path, &status])
        .inc();
    m.http_request_duration
        .with_label_values(&[&method, &path])
        .observe(elapsed);

    response
}
