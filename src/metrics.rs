use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::sync::OnceLock;

use crate::state::{AppState, RelayJobStatus};

#[derive(Debug, Clone, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct CircuitLabel {
    pub circuit: &'static str, // "deposit" | "withdrawal"
}

pub struct Metrics {
    registry: Registry,
    pub ready: Gauge<i64>,
    pub tracker_size: Gauge<i64>,
    pub jobs_queued: Gauge<i64>,
    pub jobs_running: Gauge<i64>,
    pub jobs_succeeded: Gauge<i64>,
    pub jobs_failed: Gauge<i64>,
    pub events_accepted_total: Counter,
    pub bad_event_total: Counter,
    pub duplicate_nullifier_total: Counter,
    pub withdrawals_confirmed_total: Counter,
    pub witness_ms: Family<CircuitLabel, Histogram>,
    pub prove_ms: Family<CircuitLabel, Histogram>,
    pub confirm_ms: Histogram,
}

fn buckets_ms() -> Vec<f64> {
    vec![
        50.0, 100.0, 200.0, 300.0, 500.0, 750.0, 1000.0, 1500.0, 2000.0, 3000.0, 5000.0, 10_000.0,
        20_000.0, 45_000.0, 60_000.0, 90_000.0, 120_000.0,
    ]
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let mut registry = Registry::default();

        let ready = Gauge::<i64>::default();
        registry.register("relayer_ready", "Relayer ready (artifacts present)", ready.clone());

        let tracker_size = Gauge::<i64>::default();
        registry.register(
            "relayer_tracker_size",
            "Spent nullifiers in the indexed tracker",
            tracker_size.clone(),
        );

        let jobs_queued = Gauge::<i64>::default();
        registry.register("relayer_jobs_queued", "Jobs queued", jobs_queued.clone());
        let jobs_running = Gauge::<i64>::default();
        registry.register("relayer_jobs_running", "Jobs running", jobs_running.clone());
        let jobs_succeeded = Gauge::<i64>::default();
        registry.register(
            "relayer_jobs_succeeded",
            "Jobs succeeded",
            jobs_succeeded.clone(),
        );
        let jobs_failed = Gauge::<i64>::default();
        registry.register("relayer_jobs_failed", "Jobs failed", jobs_failed.clone());

        let events_accepted_total = Counter::default();
        registry.register(
            "relayer_events_accepted_total",
            "Deposit events accepted into the pipeline",
            events_accepted_total.clone(),
        );
        let bad_event_total = Counter::default();
        registry.register(
            "relayer_bad_event_total",
            "Events rejected before proving (encoding/witness errors)",
            bad_event_total.clone(),
        );
        let duplicate_nullifier_total = Counter::default();
        registry.register(
            "relayer_duplicate_nullifier_total",
            "Withdrawals short-circuited because the nullifier was already present",
            duplicate_nullifier_total.clone(),
        );
        let withdrawals_confirmed_total = Counter::default();
        registry.register(
            "relayer_withdrawals_confirmed_total",
            "Withdrawal transactions confirmed on the destination chain",
            withdrawals_confirmed_total.clone(),
        );

        let witness_ms: Family<CircuitLabel, Histogram> =
            Family::new_with_constructor(|| Histogram::new(buckets_ms().into_iter()));
        registry.register(
            "relayer_witness_ms",
            "Witness generation time (ms)",
            witness_ms.clone(),
        );
        let prove_ms: Family<CircuitLabel, Histogram> =
            Family::new_with_constructor(|| Histogram::new(buckets_ms().into_iter()));
        registry.register(
            "relayer_prove_ms",
            "Groth16 proving time (ms)",
            prove_ms.clone(),
        );
        let confirm_ms = Histogram::new(buckets_ms().into_iter());
        registry.register(
            "relayer_confirm_ms",
            "Destination-chain confirmation wait (ms)",
            confirm_ms.clone(),
        );

        Metrics {
            registry,
            ready,
            tracker_size,
            jobs_queued,
            jobs_running,
            jobs_succeeded,
            jobs_failed,
            events_accepted_total,
            bad_event_total,
            duplicate_nullifier_total,
            withdrawals_confirmed_total,
            witness_ms,
            prove_ms,
            confirm_ms,
        }
    })
}

pub fn observe_prove_timings(circuit: &'static str, witness_ms: u128, prove_ms: u128) {
    let m = metrics();
    let label = CircuitLabel { circuit };
    m.witness_ms
        .get_or_create(&label)
        .observe(witness_ms as f64);
    m.prove_ms.get_or_create(&label).observe(prove_ms as f64);
}

pub async fn metrics_handler(State(state): State<std::sync::Arc<AppState>>) -> impl IntoResponse {
    // Update gauges on scrape (cheap + always current).
    let mut q = 0i64;
    let mut r = 0i64;
    let mut s = 0i64;
    let mut f = 0i64;
    {
        let jobs = state.jobs.read().await;
        for j in jobs.values() {
            match j.status {
                RelayJobStatus::Queued => q += 1,
                RelayJobStatus::Running => r += 1,
                RelayJobStatus::Succeeded => s += 1,
                RelayJobStatus::Failed => f += 1,
            }
        }
    }
    let m = metrics();
    m.jobs_queued.set(q);
    m.jobs_running.set(r);
    m.jobs_succeeded.set(s);
    m.jobs_failed.set(f);
    m.tracker_size
        .set(state.tracker.lock().await.tree().len() as i64);

    let mut out = String::new();
    if let Err(e) = encode(&mut out, &m.registry) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encode metrics failed: {e}"),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        out,
    )
        .into_response()
}
