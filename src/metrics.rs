//! Prometheus registry and the instruments shared across the service. One
//! `Metrics` instance is created per process and owned by the application.

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::cache::CacheCounters;

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    cache_hits: IntCounterVec,
    cache_misses: IntCounterVec,
    cache_evictions: IntCounterVec,

    pub queue_depth: IntGauge,
    pub job_duration_seconds: HistogramVec,
    pub job_errors: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let cache_hits = register_int_counter_vec_with_registry!(
            Opts::new("cache_hits_total", "Cache hits"),
            &["cache"],
            registry
        )
        .unwrap();
        let cache_misses = register_int_counter_vec_with_registry!(
            Opts::new("cache_misses_total", "Cache misses"),
            &["cache"],
            registry
        )
        .unwrap();
        let cache_evictions = register_int_counter_vec_with_registry!(
            Opts::new("cache_evictions_total", "Cache evictions"),
            &["cache"],
            registry
        )
        .unwrap();

        let queue_depth = register_int_gauge_with_registry!(
            Opts::new("queue_depth", "Queued jobs, sampled at each worker poll"),
            registry
        )
        .unwrap();
        let job_duration_seconds = register_histogram_vec_with_registry!(
            "job_duration_seconds",
            "Job execution time by kind",
            &["kind"],
            registry
        )
        .unwrap();
        let job_errors = register_int_counter_vec_with_registry!(
            Opts::new("job_errors_total", "Failed job executions by kind"),
            &["kind"],
            registry
        )
        .unwrap();

        Metrics {
            registry,
            cache_hits,
            cache_misses,
            cache_evictions,
            queue_depth,
            job_duration_seconds,
            job_errors,
        }
    }

    pub fn cache_counters(&self, cache: &str) -> CacheCounters {
        CacheCounters {
            hits: self.cache_hits.with_label_values(&[cache]),
            misses: self.cache_misses.with_label_values(&[cache]),
            evictions: self.cache_evictions.with_label_values(&[cache]),
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn export(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = prometheus::Encoder::encode(&encoder, &self.registry.gather(), &mut buffer)
        {
            tracing::error!(?err, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}
