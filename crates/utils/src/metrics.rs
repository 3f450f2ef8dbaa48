//! Per-operation latency accounting.
//!
//! Every remote call records `(component, operation, ms)` here. The registry
//! is an in-process aggregate only; an external exporter scrapes the JSON
//! snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use ts_rs::TS;

/// Calls slower than this are logged as warnings.
pub const SLOW_CALL_THRESHOLD_MS: u64 = 5_000;

#[derive(Debug, Clone, Default, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStat {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct LatencySnapshot {
    pub component: String,
    pub operation: String,
    #[serde(flatten)]
    pub stat: LatencyStat,
}

/// Process-lifetime latency registry. Cheap to clone; injected rather than
/// imported as a global.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<Mutex<HashMap<(String, String), LatencyStat>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_latency(&self, component: &str, operation: &str, ms: u64) {
        if ms > SLOW_CALL_THRESHOLD_MS {
            tracing::warn!(component, operation, ms, "slow remote call");
        }

        let mut map = self.inner.lock().expect("metrics registry poisoned");
        let stat = map
            .entry((component.to_string(), operation.to_string()))
            .or_default();
        stat.count += 1;
        stat.total_ms += ms;
        stat.max_ms = stat.max_ms.max(ms);
    }

    pub fn snapshot(&self) -> Vec<LatencySnapshot> {
        let map = self.inner.lock().expect("metrics registry poisoned");
        let mut out: Vec<LatencySnapshot> = map
            .iter()
            .map(|((component, operation), stat)| LatencySnapshot {
                component: component.clone(),
                operation: operation.clone(),
                stat: stat.clone(),
            })
            .collect();
        out.sort_by(|a, b| {
            (&a.component, &a.operation).cmp(&(&b.component, &b.operation))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = MetricsRegistry::new();
        metrics.record_latency("huly", "listIssues", 120);
        metrics.record_latency("huly", "listIssues", 80);
        metrics.record_latency("vibe", "createTask", 40);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 2);

        let huly = snapshot
            .iter()
            .find(|s| s.component == "huly")
            .expect("huly entry");
        assert_eq!(huly.stat.count, 2);
        assert_eq!(huly.stat.total_ms, 200);
        assert_eq!(huly.stat.max_ms, 120);
    }

    #[test]
    fn test_clone_shares_state() {
        let metrics = MetricsRegistry::new();
        let clone = metrics.clone();
        clone.record_latency("beads", "createIssue", 10);
        assert_eq!(metrics.snapshot().len(), 1);
    }
}
