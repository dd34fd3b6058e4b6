//! Metrics instrumentation for instance-dns.
//!
//! All metrics are prefixed with `instance_dns.`

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: Duration) {
    let result_str = match result {
        QueryResult::Answered => "answered",
        QueryResult::NoData => "no_data",
        QueryResult::Malformed => "malformed",
        QueryResult::OutsideZone => "outside_zone",
    };

    counter!("instance_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("instance_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query outcome for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// At least one answer record was produced.
    Answered,
    /// Well-formed name with nothing to return (unknown key, ordinal
    /// overflow, or no record of the requested type).
    NoData,
    /// Name under the served domain that does not fit the name grammar.
    Malformed,
    /// Name outside the served domain.
    OutsideZone,
}

/// Record the number of answers returned for a query.
pub fn record_answers_returned(count: usize) {
    histogram!("instance_dns.query.answers_returned").record(count as f64);
}

/// Record a cache refresh attempt.
pub fn record_refresh(result: RefreshResult, duration: Duration) {
    let result_str = match result {
        RefreshResult::Success => "success",
        RefreshResult::Failure => "failure",
    };

    counter!("instance_dns.cache.refresh.count", "result" => result_str).increment(1);
    histogram!("instance_dns.cache.refresh.duration.seconds").record(duration.as_secs_f64());
}

/// Refresh outcome for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshResult {
    /// A new snapshot was installed.
    Success,
    /// The instance listing failed; the previous snapshot was kept.
    Failure,
}

/// Record cache size (call periodically or after a refresh).
pub fn record_cache_counts(keys: usize, instances: usize) {
    gauge!("instance_dns.cache.keys.count").set(keys as f64);
    gauge!("instance_dns.cache.instances.count").set(instances as f64);
}

/// Record how old the live snapshot is.
pub fn record_snapshot_age(age: Option<Duration>) {
    // -1 until the first successful refresh.
    let value = age.map(|a| a.as_secs_f64()).unwrap_or(-1.0);
    gauge!("instance_dns.cache.snapshot.age.seconds").set(value);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

    /// Run `f` with a thread-local debugging recorder and return a
    /// snapshotter for what it recorded.
    pub(crate) fn capture(f: impl FnOnce()) -> Snapshotter {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, f);
        snapshotter
    }

    /// Sum of all counters named `name` carrying every label in `labels`.
    pub(crate) fn counter_value(snapshotter: &Snapshotter, name: &str, labels: &[(&str, &str)]) -> u64 {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, _, _, _)| {
                let key = key.key();
                key.name() == name
                    && labels.iter().all(|(k, v)| {
                        key.labels().any(|label| label.key() == *k && label.value() == *v)
                    })
            })
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(n) => n,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_record_refresh_counts_by_result() {
        let snapshotter = capture(|| {
            record_refresh(RefreshResult::Success, Duration::from_millis(5));
            record_refresh(RefreshResult::Failure, Duration::from_millis(5));
            record_refresh(RefreshResult::Failure, Duration::from_millis(5));
        });

        assert_eq!(
            counter_value(&snapshotter, "instance_dns.cache.refresh.count", &[("result", "failure")]),
            2
        );
        assert_eq!(
            counter_value(&snapshotter, "instance_dns.cache.refresh.count", &[("result", "success")]),
            1
        );
    }
}
