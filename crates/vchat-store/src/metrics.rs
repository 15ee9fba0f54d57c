//! Store metrics collection.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    /// Total store operations by operation and result.
    pub const OPERATIONS_TOTAL: &str = "vchat_store_operations_total";
}

/// Record a store operation.
pub fn record_operation(operation: &'static str, ok: bool) {
    counter!(
        names::OPERATIONS_TOTAL,
        "operation" => operation,
        "result" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::OPERATIONS_TOTAL.starts_with("vchat_store"));
    }

    #[test]
    fn test_record_without_recorder_is_noop() {
        record_operation("get", true);
        record_operation("update", false);
    }
}
