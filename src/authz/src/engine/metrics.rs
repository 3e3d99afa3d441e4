//! Prometheus metrics collection for engine observability

use parking_lot::RwLock;
use std::time::Duration;

/// Engine metrics
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Total number of decisions
    pub total_decisions: u64,

    /// Number of allowed decisions
    pub allowed_decisions: u64,

    /// Number of denied decisions (including defects)
    pub denied_decisions: u64,

    /// Decisions denied because the caller passed an unknown name or region
    pub config_defects: u64,

    /// Cache hits
    pub cache_hits: u64,

    /// Cache misses
    pub cache_misses: u64,

    /// Rule refreshes
    pub refresh_successes: u64,
    pub refresh_failures: u64,

    /// Latency percentiles
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    /// Calculate cache hit rate
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Calculate allow rate
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }
}

/// Metrics collector with Prometheus-compatible export
pub struct MetricsCollector {
    metrics: RwLock<EngineMetrics>,

    /// Latency samples for percentile calculation
    latency_samples: RwLock<Vec<f64>>,

    /// Maximum samples to keep
    max_samples: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(EngineMetrics::default()),
            latency_samples: RwLock::new(Vec::with_capacity(1_024)),
            max_samples: 10_000,
        }
    }

    pub fn record_cache_hit(&self) {
        self.metrics.write().cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.metrics.write().cache_misses += 1;
    }

    /// Record a decision outcome
    pub fn record_decision(&self, allowed: bool) {
        let mut metrics = self.metrics.write();
        metrics.total_decisions += 1;

        if allowed {
            metrics.allowed_decisions += 1;
        } else {
            metrics.denied_decisions += 1;
        }
    }

    /// Record a deny caused by a caller-side defect
    pub fn record_config_defect(&self) {
        self.metrics.write().config_defects += 1;
    }

    /// Copy refresh counters from the rule source
    pub fn record_refresh_stats(&self, successes: u64, failures: u64) {
        let mut metrics = self.metrics.write();
        metrics.refresh_successes = successes;
        metrics.refresh_failures = failures;
    }

    /// Record decision latency
    pub fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write();
        samples.push(latency_ms);
        if samples.len() > self.max_samples {
            samples.drain(0..self.max_samples / 10);
        }
    }

    /// Current metrics with percentiles computed from the retained samples
    pub fn get_metrics(&self) -> EngineMetrics {
        let mut sorted = self.latency_samples.read().clone();
        sorted.sort_by(f64::total_cmp);

        let mut metrics = self.metrics.read().clone();
        if !sorted.is_empty() {
            metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        }
        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
        metrics
    }

    /// Reset all metrics
    pub fn reset(&self) {
        *self.metrics.write() = EngineMetrics::default();
        self.latency_samples.write().clear();
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics();

        format!(
            r#"# HELP authz_decisions_total Total number of authorization decisions
# TYPE authz_decisions_total counter
authz_decisions_total {}

# HELP authz_allowed_total Number of allowed decisions
# TYPE authz_allowed_total counter
authz_allowed_total {}

# HELP authz_denied_total Number of denied decisions
# TYPE authz_denied_total counter
authz_denied_total {}

# HELP authz_config_defects_total Denies caused by unknown names or regions
# TYPE authz_config_defects_total counter
authz_config_defects_total {}

# HELP authz_cache_hits_total Cache hits
# TYPE authz_cache_hits_total counter
authz_cache_hits_total {}

# HELP authz_cache_misses_total Cache misses
# TYPE authz_cache_misses_total counter
authz_cache_misses_total {}

# HELP authz_rule_refresh_total Rule refresh attempts by outcome
# TYPE authz_rule_refresh_total counter
authz_rule_refresh_total{{outcome="success"}} {}
authz_rule_refresh_total{{outcome="failure"}} {}

# HELP authz_latency_seconds Decision latency percentiles
# TYPE authz_latency_seconds summary
authz_latency_seconds{{quantile="0.5"}} {}
authz_latency_seconds{{quantile="0.9"}} {}
authz_latency_seconds{{quantile="0.99"}} {}
"#,
            metrics.total_decisions,
            metrics.allowed_decisions,
            metrics.denied_decisions,
            metrics.config_defects,
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.refresh_successes,
            metrics.refresh_failures,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
        )
    }

    /// Calculate percentile from sorted data
    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        let idx = idx.min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
