//! C6 — `MetricsCollector`: counters, histograms, and per-model gauges,
//! exposed as Prometheus text exposition format.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A fixed-bucket histogram good enough for p50/p95/p99 approximations
/// without pulling in a full metrics crate — this subsystem only needs to
/// expose sums/counts/buckets in Prometheus text format.
#[derive(Debug, Default)]
struct Histogram {
    sum: f64,
    count: u64,
    samples: Vec<f64>,
}

impl Histogram {
    fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.samples.push(value);
        if self.samples.len() > 1000 {
            self.samples.remove(0);
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx]
    }
}

#[derive(Default)]
struct ModelSeries {
    queue_wait: Histogram,
    load_duration: Histogram,
    tokens_per_second: Histogram,
    error_count: u64,
    request_count: u64,
}

/// Process-wide metrics registry for the orchestration core.
pub struct MetricsCollector {
    requests_total: AtomicU64,
    evictions_total: AtomicU64,
    queued_requests: AtomicU64,
    loaded_models: AtomicU64,
    request_latency: Mutex<Histogram>,
    per_model: Mutex<HashMap<(String, String), ModelSeries>>,
    agent_runs_total: Mutex<HashMap<String, u64>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            evictions_total: AtomicU64::new(0),
            queued_requests: AtomicU64::new(0),
            loaded_models: AtomicU64::new(0),
            request_latency: Mutex::new(Histogram::default()),
            per_model: Mutex::new(HashMap::new()),
            agent_runs_total: Mutex::new(HashMap::new()),
        }
    }

    pub fn incr_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_evictions_total(&self) {
        self.evictions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queued_requests(&self, n: u64) {
        self.queued_requests.store(n, Ordering::Relaxed);
    }

    pub fn set_loaded_models(&self, n: u64) {
        self.loaded_models.store(n, Ordering::Relaxed);
    }

    pub fn observe_request_latency(&self, seconds: f64) {
        self.request_latency
            .lock()
            .expect("metrics mutex poisoned")
            .observe(seconds);
    }

    pub fn observe_queue_wait(&self, model_id: &str, backend: &str, seconds: f64) {
        let mut map = self.per_model.lock().expect("metrics mutex poisoned");
        map.entry((model_id.to_string(), backend.to_string()))
            .or_default()
            .queue_wait
            .observe(seconds);
    }

    pub fn observe_load_duration(&self, model_id: &str, backend: &str, seconds: f64) {
        let mut map = self.per_model.lock().expect("metrics mutex poisoned");
        map.entry((model_id.to_string(), backend.to_string()))
            .or_default()
            .load_duration
            .observe(seconds);
    }

    pub fn observe_tokens_per_second(&self, model_id: &str, backend: &str, tps: f64) {
        let mut map = self.per_model.lock().expect("metrics mutex poisoned");
        map.entry((model_id.to_string(), backend.to_string()))
            .or_default()
            .tokens_per_second
            .observe(tps);
    }

    pub fn record_generation(&self, model_id: &str, backend: &str, succeeded: bool) {
        let mut map = self.per_model.lock().expect("metrics mutex poisoned");
        let series = map
            .entry((model_id.to_string(), backend.to_string()))
            .or_default();
        series.request_count += 1;
        if !succeeded {
            series.error_count += 1;
        }
    }

    pub fn incr_agent_runs_total(&self, status: &str) {
        let mut map = self.agent_runs_total.lock().expect("metrics mutex poisoned");
        *map.entry(status.to_string()).or_insert(0) += 1;
    }

    /// Render all series in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# TYPE lmx_requests_total counter\n");
        out.push_str(&format!(
            "lmx_requests_total {}\n",
            self.requests_total.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE lmx_queued_requests gauge\n");
        out.push_str(&format!(
            "lmx_queued_requests {}\n",
            self.queued_requests.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE lmx_loaded_models gauge\n");
        out.push_str(&format!(
            "lmx_loaded_models {}\n",
            self.loaded_models.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE lmx_model_evictions_total counter\n");
        out.push_str(&format!(
            "lmx_model_evictions_total {}\n",
            self.evictions_total.load(Ordering::Relaxed)
        ));

        {
            let hist = self.request_latency.lock().expect("metrics mutex poisoned");
            out.push_str("# TYPE lmx_request_latency_p95_seconds gauge\n");
            out.push_str(&format!(
                "lmx_request_latency_p95_seconds {}\n",
                hist.percentile(0.95)
            ));
        }

        {
            let map = self.per_model.lock().expect("metrics mutex poisoned");
            for ((model_id, backend), series) in map.iter() {
                let labels = format!("model_id=\"{model_id}\",backend=\"{backend}\"");
                out.push_str(&format!(
                    "lmx_model_queue_wait_seconds{{{labels}}} {}\n",
                    series.queue_wait.percentile(0.95)
                ));
                out.push_str(&format!(
                    "lmx_model_load_duration_seconds{{{labels}}} {}\n",
                    series.load_duration.percentile(0.95)
                ));
                out.push_str(&format!(
                    "lmx_model_tokens_per_second{{{labels}}} {}\n",
                    series.tokens_per_second.percentile(0.5)
                ));
                let error_rate = if series.request_count > 0 {
                    series.error_count as f64 / series.request_count as f64
                } else {
                    0.0
                };
                out.push_str(&format!(
                    "lmx_model_error_rate{{{labels}}} {error_rate}\n"
                ));
            }
        }

        {
            let map = self.agent_runs_total.lock().expect("metrics mutex poisoned");
            for (status, count) in map.iter() {
                out.push_str(&format!(
                    "lmx_agent_runs_total{{status=\"{status}\"}} {count}\n"
                ));
            }
        }

        out
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_all_declared_series() {
        let metrics = MetricsCollector::new();
        metrics.incr_requests_total();
        metrics.observe_queue_wait("model-a", "gguf", 0.5);
        metrics.incr_agent_runs_total("completed");
        let rendered = metrics.render();
        assert!(rendered.contains("lmx_requests_total 1"));
        assert!(rendered.contains("lmx_model_queue_wait_seconds"));
        assert!(rendered.contains("lmx_agent_runs_total{status=\"completed\"} 1"));
    }

    #[test]
    fn error_rate_is_computed_per_model() {
        let metrics = MetricsCollector::new();
        metrics.record_generation("model-a", "gguf", true);
        metrics.record_generation("model-a", "gguf", false);
        let rendered = metrics.render();
        assert!(rendered.contains("lmx_model_error_rate{model_id=\"model-a\",backend=\"gguf\"} 0.5"));
    }
}
