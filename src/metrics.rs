use tracing::trace;

// Trace-level metric events; the Prometheus recorder in main serves /metrics.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "reel.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "reel.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn pages_captured(count: usize) {
    trace!(
        target = "reel.metrics",
        count = count as u64,
        "pages_captured"
    );
}

pub fn job_finished(outcome: &'static str) {
    trace!(
        target = "reel.metrics",
        outcome = outcome,
        "jobs_total_inc"
    );
}
