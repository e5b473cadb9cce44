use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub dispatch_queue_depth: IntGauge,
    pub contention_retries_total: IntCounter,
    pub ride_transitions_total: IntCounterVec,
    pub rides_reclaimed_total: IntCounterVec,
    pub pending_driver_releases: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_total = IntCounterVec::new(
            Opts::new("dispatch_total", "Dispatch calls by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of a dispatch call in seconds, contention retries included",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let dispatch_queue_depth =
            IntGauge::new("dispatch_queue_depth", "Ride ids waiting for a dispatch worker")
                .expect("valid dispatch_queue_depth metric");

        let contention_retries_total = IntCounter::new(
            "contention_retries_total",
            "Dispatch retries caused by a held driver lock or stale availability",
        )
        .expect("valid contention_retries_total metric");

        let ride_transitions_total = IntCounterVec::new(
            Opts::new("ride_transitions_total", "Committed ride state transitions"),
            &["transition"],
        )
        .expect("valid ride_transitions_total metric");

        let rides_reclaimed_total = IntCounterVec::new(
            Opts::new("rides_reclaimed_total", "Rides processed by the reclamation sweep"),
            &["result"],
        )
        .expect("valid rides_reclaimed_total metric");

        let pending_driver_releases = IntGauge::new(
            "pending_driver_releases",
            "Drivers whose return to available failed and awaits a retry",
        )
        .expect("valid pending_driver_releases metric");

        registry
            .register(Box::new(dispatch_total.clone()))
            .expect("register dispatch_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(dispatch_queue_depth.clone()))
            .expect("register dispatch_queue_depth");
        registry
            .register(Box::new(contention_retries_total.clone()))
            .expect("register contention_retries_total");
        registry
            .register(Box::new(ride_transitions_total.clone()))
            .expect("register ride_transitions_total");
        registry
            .register(Box::new(rides_reclaimed_total.clone()))
            .expect("register rides_reclaimed_total");
        registry
            .register(Box::new(pending_driver_releases.clone()))
            .expect("register pending_driver_releases");

        Self {
            registry,
            dispatch_total,
            dispatch_latency_seconds,
            dispatch_queue_depth,
            contention_retries_total,
            ride_transitions_total,
            rides_reclaimed_total,
            pending_driver_releases,
        }
    }

    pub fn record_dispatch(&self, outcome: &str, elapsed_secs: f64) {
        self.dispatch_total.with_label_values(&[outcome]).inc();
        self.dispatch_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed_secs);
    }

    pub fn record_transition(&self, transition: &str) {
        self.ride_transitions_total
            .with_label_values(&[transition])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
