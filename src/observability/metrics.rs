use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub tasks_total: IntCounterVec,
    pub task_transitions_total: IntCounterVec,
    pub location_reports_total: IntCounterVec,
    pub reconciliation_repairs_total: IntCounterVec,
    pub drift_detected_total: IntCounterVec,
    pub retry_queue_depth: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let tasks_total = IntCounterVec::new(
            Opts::new("tasks_total", "Task assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid tasks_total metric");

        let task_transitions_total = IntCounterVec::new(
            Opts::new("task_transitions_total", "Task lifecycle transitions"),
            &["to"],
        )
        .expect("valid task_transitions_total metric");

        let location_reports_total = IntCounterVec::new(
            Opts::new("location_reports_total", "Accepted location reports"),
            &["flag"],
        )
        .expect("valid location_reports_total metric");

        let reconciliation_repairs_total = IntCounterVec::new(
            Opts::new(
                "reconciliation_repairs_total",
                "Corrective ledger writes by action",
            ),
            &["action"],
        )
        .expect("valid reconciliation_repairs_total metric");

        let drift_detected_total = IntCounterVec::new(
            Opts::new("drift_detected_total", "Ledger drift found by audit"),
            &["kind"],
        )
        .expect("valid drift_detected_total metric");

        let retry_queue_depth = IntGauge::new(
            "retry_queue_depth",
            "Delivery completions waiting for ledger retry",
        )
        .expect("valid retry_queue_depth metric");

        registry
            .register(Box::new(tasks_total.clone()))
            .expect("register tasks_total");
        registry
            .register(Box::new(task_transitions_total.clone()))
            .expect("register task_transitions_total");
        registry
            .register(Box::new(location_reports_total.clone()))
            .expect("register location_reports_total");
        registry
            .register(Box::new(reconciliation_repairs_total.clone()))
            .expect("register reconciliation_repairs_total");
        registry
            .register(Box::new(drift_detected_total.clone()))
            .expect("register drift_detected_total");
        registry
            .register(Box::new(retry_queue_depth.clone()))
            .expect("register retry_queue_depth");

        Self {
            registry,
            tasks_total,
            task_transitions_total,
            location_reports_total,
            reconciliation_repairs_total,
            drift_detected_total,
            retry_queue_depth,
        }
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
