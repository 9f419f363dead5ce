//! Request counters exported through the Prometheus recorder.

use metrics::{counter, histogram};
use std::time::Duration;

pub fn record_tile_request(process: &str) {
    counter!("tile_requests_total", "process" => process.to_string()).increment(1);
}

pub fn record_tile_failure(process: &str) {
    counter!("tile_failures_total", "process" => process.to_string()).increment(1);
}

pub fn record_tile_duration(process: &str, elapsed: Duration) {
    histogram!("tile_duration_ms", "process" => process.to_string())
        .record(elapsed.as_secs_f64() * 1000.0);
}
