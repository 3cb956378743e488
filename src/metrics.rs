//! Lightweight runtime metrics aggregation for the qrserve daemon

use crate::config::MetricsFormat;
use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

static METRICS: OnceLock<Arc<MetricsInner>> = OnceLock::new();
static LAST_SNAPSHOT: OnceLock<Mutex<Option<Snapshot>>> = OnceLock::new();

/// How a generate request was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateMode {
    /// PNG streamed back in the response body
    Direct,
    /// PNG written to the save directory
    Saved,
}

impl GenerateMode {
    fn as_str(self) -> &'static str {
        match self {
            GenerateMode::Direct => "direct",
            GenerateMode::Saved => "saved",
        }
    }
}

/// Outcome of an open-folder request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    /// File manager launched
    Opened,
    /// Path was missing or outside the save directory
    Rejected,
    /// File manager could not be launched
    Failed,
}

/// Enable periodic metrics emission with the provided interval in seconds.
///
/// Must be called from within a Tokio runtime.
pub fn enable(interval_secs: u64) {
    let interval = interval_secs.max(5);
    let inner = Arc::clone(METRICS.get_or_init(|| Arc::new(MetricsInner::new(interval))));
    inner.update_interval(interval);
    inner.ensure_task();
}

/// Record the outcome of a generate request.
pub fn record_generate(duration: Duration, mode: GenerateMode, success: bool, bytes: usize) {
    if let Some(inner) = METRICS.get() {
        inner.record_generate(duration, mode, success, bytes);
    }
}

/// Record the outcome of an open-folder request.
pub fn record_reveal(outcome: RevealOutcome) {
    if let Some(inner) = METRICS.get() {
        inner.record_reveal(outcome);
    }
}

/// Render the latest snapshot as `(content type, body)`.
///
/// Returns `None` while metrics are disabled.
pub fn export(format: MetricsFormat) -> Result<Option<(&'static str, Vec<u8>)>> {
    let snapshot = latest_snapshot().or_else(|| METRICS.get().map(|inner| inner.snapshot_current()));

    let Some(snapshot) = snapshot else {
        return Ok(None);
    };

    match format {
        MetricsFormat::Json => {
            let body = serde_json::to_vec(&snapshot_to_http(&snapshot))?;
            Ok(Some(("application/json", body)))
        }
        MetricsFormat::Prometheus => Ok(Some((
            "text/plain; version=0.0.4",
            render_prometheus(&snapshot).into_bytes(),
        ))),
    }
}

struct MetricsInner {
    state: Mutex<MetricsState>,
    interval_secs: AtomicU64,
    task_spawned: AtomicBool,
}

impl MetricsInner {
    fn new(interval_secs: u64) -> Self {
        Self {
            state: Mutex::new(MetricsState::new()),
            interval_secs: AtomicU64::new(interval_secs.max(5)),
            task_spawned: AtomicBool::new(false),
        }
    }

    fn update_interval(&self, interval_secs: u64) {
        self.interval_secs
            .store(interval_secs.max(5), Ordering::Relaxed);
    }

    fn ensure_task(self: &Arc<Self>) {
        if self
            .task_spawned
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let runner = Arc::clone(self);
            tokio::spawn(async move {
                runner.run().await;
            });
        }
    }

    fn record_generate(&self, duration: Duration, mode: GenerateMode, success: bool, bytes: usize) {
        let mut guard = self.state.lock().expect("metrics mutex poisoned");
        let state = &mut *guard;
        state.total_requests += 1;
        let entry = state.per_mode.entry(mode.as_str()).or_default();
        if success {
            entry.successes += 1;
            entry.success_duration += duration;
            entry.bytes += bytes as u64;
            state.successes += 1;
            state.success_duration += duration;
        } else {
            entry.failures += 1;
            state.failures += 1;
        }
    }

    fn record_reveal(&self, outcome: RevealOutcome) {
        let mut state = self.state.lock().expect("metrics mutex poisoned");
        match outcome {
            RevealOutcome::Opened => state.reveals.opened += 1,
            RevealOutcome::Rejected => state.reveals.rejected += 1,
            RevealOutcome::Failed => state.reveals.failed += 1,
        }
    }

    fn snapshot_current(&self) -> Snapshot {
        let state = self.state.lock().expect("metrics mutex poisoned");
        state.snapshot()
    }

    async fn run(self: Arc<Self>) {
        let mut current_secs = self.interval_secs.load(Ordering::Relaxed).max(5);
        loop {
            let mut ticker = time::interval(Duration::from_secs(current_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the first report comes a full interval later.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let snapshot = self.snapshot_and_reset();
                store_snapshot(&snapshot);
                log_snapshot(&snapshot);

                let next_secs = self.interval_secs.load(Ordering::Relaxed).max(5);
                if next_secs != current_secs {
                    current_secs = next_secs;
                    break;
                }
            }
        }
    }

    fn snapshot_and_reset(&self) -> Snapshot {
        let mut state = self.state.lock().expect("metrics mutex poisoned");
        let snapshot = state.snapshot();
        *state = MetricsState::new();
        snapshot
    }
}

struct MetricsState {
    total_requests: u64,
    successes: u64,
    failures: u64,
    success_duration: Duration,
    per_mode: BTreeMap<&'static str, ModeCounters>,
    reveals: RevealCounters,
    last_reset: Instant,
}

impl MetricsState {
    fn new() -> Self {
        Self {
            total_requests: 0,
            successes: 0,
            failures: 0,
            success_duration: Duration::ZERO,
            per_mode: BTreeMap::new(),
            reveals: RevealCounters::default(),
            last_reset: Instant::now(),
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            total_requests: self.total_requests,
            successes: self.successes,
            failures: self.failures,
            success_duration: self.success_duration,
            elapsed: self.last_reset.elapsed(),
            per_mode: self
                .per_mode
                .iter()
                .map(|(mode, counters)| ModeSnapshot {
                    mode: *mode,
                    counters: counters.clone(),
                })
                .collect(),
            reveals: self.reveals.clone(),
        }
    }
}

#[derive(Default, Clone)]
struct ModeCounters {
    successes: u64,
    failures: u64,
    success_duration: Duration,
    bytes: u64,
}

#[derive(Default, Clone, Serialize)]
struct RevealCounters {
    opened: u64,
    rejected: u64,
    failed: u64,
}

#[derive(Clone)]
struct Snapshot {
    total_requests: u64,
    successes: u64,
    failures: u64,
    success_duration: Duration,
    elapsed: Duration,
    per_mode: Vec<ModeSnapshot>,
    reveals: RevealCounters,
}

impl Snapshot {
    fn avg_latency_ms(&self) -> f64 {
        avg_ms(self.success_duration, self.successes)
    }

    fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successes as f64 / self.total_requests as f64
        }
    }
}

#[derive(Clone)]
struct ModeSnapshot {
    mode: &'static str,
    counters: ModeCounters,
}

fn avg_ms(total: Duration, samples: u64) -> f64 {
    if samples == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1_000.0 / samples as f64
    }
}

fn log_snapshot(snapshot: &Snapshot) {
    info!(
        target: "qrserve::metrics",
        interval_secs = snapshot.elapsed.as_secs(),
        total_requests = snapshot.total_requests,
        success_count = snapshot.successes,
        failure_count = snapshot.failures,
        avg_latency_ms = snapshot.avg_latency_ms(),
        success_rate = format_args!("{:.1}%", snapshot.success_rate() * 100.0),
        reveals_opened = snapshot.reveals.opened,
        reveals_rejected = snapshot.reveals.rejected,
        reveals_failed = snapshot.reveals.failed,
        "Generation metrics window"
    );

    if !snapshot.per_mode.is_empty() {
        let breakdown = snapshot
            .per_mode
            .iter()
            .map(|entry| {
                format!(
                    "{}: {} ok / {} err (avg {:.1} ms, {} bytes)",
                    entry.mode,
                    entry.counters.successes,
                    entry.counters.failures,
                    avg_ms(entry.counters.success_duration, entry.counters.successes),
                    entry.counters.bytes
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        info!(target: "qrserve::metrics", breakdown, "Per-mode metrics");
    }
}

fn store_snapshot(snapshot: &Snapshot) {
    let lock = LAST_SNAPSHOT.get_or_init(|| Mutex::new(None));
    if let Ok(mut guard) = lock.lock() {
        *guard = Some(snapshot.clone());
    }
}

fn latest_snapshot() -> Option<Snapshot> {
    let lock = LAST_SNAPSHOT.get_or_init(|| Mutex::new(None));
    match lock.lock() {
        Ok(guard) => (*guard).clone(),
        Err(_) => None,
    }
}

#[derive(Serialize)]
struct HttpMetrics {
    window_secs: u64,
    total_requests: u64,
    successes: u64,
    failures: u64,
    success_rate: f64,
    avg_latency_ms: f64,
    per_mode: Vec<HttpModeMetrics>,
    reveals: RevealCounters,
}

#[derive(Serialize)]
struct HttpModeMetrics {
    mode: &'static str,
    successes: u64,
    failures: u64,
    avg_latency_ms: f64,
    bytes: u64,
}

fn snapshot_to_http(snapshot: &Snapshot) -> HttpMetrics {
    HttpMetrics {
        window_secs: snapshot.elapsed.as_secs(),
        total_requests: snapshot.total_requests,
        successes: snapshot.successes,
        failures: snapshot.failures,
        success_rate: snapshot.success_rate() * 100.0,
        avg_latency_ms: snapshot.avg_latency_ms(),
        per_mode: snapshot
            .per_mode
            .iter()
            .map(|entry| HttpModeMetrics {
                mode: entry.mode,
                successes: entry.counters.successes,
                failures: entry.counters.failures,
                avg_latency_ms: avg_ms(entry.counters.success_duration, entry.counters.successes),
                bytes: entry.counters.bytes,
            })
            .collect(),
        reveals: snapshot.reveals.clone(),
    }
}

fn render_prometheus(snapshot: &Snapshot) -> String {
    let mut output = String::new();

    let mut metric = |name: &str, help: &str, kind: &str, value: String| {
        let _ = writeln!(&mut output, "# HELP {name} {help}");
        let _ = writeln!(&mut output, "# TYPE {name} {kind}");
        let _ = writeln!(&mut output, "{name} {value}");
    };

    metric(
        "qrserve_window_seconds",
        "Duration of the aggregation window in seconds",
        "gauge",
        snapshot.elapsed.as_secs().to_string(),
    );
    metric(
        "qrserve_generate_requests_total",
        "Generate requests observed during the window",
        "counter",
        snapshot.total_requests.to_string(),
    );
    metric(
        "qrserve_generate_successes",
        "Successful generate requests in the window",
        "counter",
        snapshot.successes.to_string(),
    );
    metric(
        "qrserve_generate_failures",
        "Failed generate requests in the window",
        "counter",
        snapshot.failures.to_string(),
    );
    metric(
        "qrserve_generate_latency_avg_seconds",
        "Average latency of successful generate requests",
        "gauge",
        format!("{:.6}", snapshot.avg_latency_ms() / 1_000.0),
    );

    if !snapshot.per_mode.is_empty() {
        let _ = writeln!(
            &mut output,
            "# HELP qrserve_generate_by_mode_total Generate requests by response mode"
        );
        let _ = writeln!(&mut output, "# TYPE qrserve_generate_by_mode_total counter");
        for entry in &snapshot.per_mode {
            let _ = writeln!(
                &mut output,
                "qrserve_generate_by_mode_total{{mode=\"{}\",result=\"success\"}} {}",
                entry.mode, entry.counters.successes
            );
            let _ = writeln!(
                &mut output,
                "qrserve_generate_by_mode_total{{mode=\"{}\",result=\"failure\"}} {}",
                entry.mode, entry.counters.failures
            );
            let _ = writeln!(
                &mut output,
                "qrserve_png_bytes_total{{mode=\"{}\"}} {}",
                entry.mode, entry.counters.bytes
            );
        }
    }

    let _ = writeln!(
        &mut output,
        "# HELP qrserve_reveal_total Open-folder requests by outcome"
    );
    let _ = writeln!(&mut output, "# TYPE qrserve_reveal_total counter");
    for (outcome, value) in [
        ("opened", snapshot.reveals.opened),
        ("rejected", snapshot.reveals.rejected),
        ("failed", snapshot.reveals.failed),
    ] {
        let _ = writeln!(
            &mut output,
            "qrserve_reveal_total{{outcome=\"{outcome}\"}} {value}"
        );
    }

    output
}
