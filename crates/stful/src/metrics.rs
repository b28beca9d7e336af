//! Metrics collection and reporting using metrics-rs.
//!
//! The manager records instruction, read and sync counts through the global
//! `metrics` facade. [`CliRecorder`] keeps them in memory for a terminal
//! summary.

use std::sync::Arc;

use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter,
    describe_counter, describe_gauge, gauge,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{DevId, TableHandle};

// ============================================================================
// Metric descriptions
// ============================================================================

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!(
        "stful_instructions_total",
        Unit::Count,
        "Instructions enqueued to the transport"
    );
    describe_counter!(
        "stful_block_writes_total",
        Unit::Count,
        "Block writes enqueued to the transport"
    );
    describe_counter!(
        "stful_block_rows_total",
        Unit::Count,
        "Rows carried by block writes"
    );
    describe_counter!(
        "stful_reads_total",
        Unit::Count,
        "Row reads enqueued to the transport"
    );
    describe_counter!(
        "stful_syncs_total",
        Unit::Count,
        "Shadow syncs started"
    );
    describe_gauge!(
        "stful_fifo_occupancy",
        Unit::Count,
        "Entries in a FIFO table after the last FIFO operation"
    );
}

// ============================================================================
// Metric recording functions
// ============================================================================

pub(crate) fn record_instruction(kind: &'static str) {
    counter!("stful_instructions_total", "kind" => kind).increment(1);
}

pub(crate) fn record_block_write(rows: u64) {
    counter!("stful_block_writes_total").increment(1);
    counter!("stful_block_rows_total").increment(rows);
}

pub(crate) fn record_reads(count: u64) {
    counter!("stful_reads_total").increment(count);
}

pub(crate) fn record_sync(kind: &'static str) {
    counter!("stful_syncs_total", "kind" => kind).increment(1);
}

pub(crate) fn record_fifo_occupancy(dev: DevId, handle: TableHandle, occupancy: u32) {
    let labels = [("dev", dev.to_string()), ("tbl", handle.to_string())];
    gauge!("stful_fifo_occupancy", &labels).set(f64::from(occupancy));
}

// ============================================================================
// CLI Recorder for terminal output
// ============================================================================

/// Shared map from rendered metric key to its latest value.
type Values<V> = Arc<RwLock<FxHashMap<String, V>>>;

/// One registered counter or gauge, writing into the recorder's map.
struct Cell<V> {
    key: String,
    values: Values<V>,
}

impl<V: Default> Cell<V> {
    fn update(&self, f: impl FnOnce(&mut V)) {
        f(self.values.write().entry(self.key.clone()).or_default());
    }
}

impl metrics::CounterFn for Cell<u64> {
    fn increment(&self, value: u64) {
        self.update(|v| *v += value);
    }

    fn absolute(&self, value: u64) {
        self.update(|v| *v = value);
    }
}

impl metrics::GaugeFn for Cell<f64> {
    fn increment(&self, value: f64) {
        self.update(|v| *v += value);
    }

    fn decrement(&self, value: f64) {
        self.update(|v| *v -= value);
    }

    fn set(&self, value: f64) {
        self.update(|v| *v = value);
    }
}

/// Render `name{k=v,...}`, or just `name` when unlabeled.
fn render_key(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

/// Recorder that keeps counters and gauges in memory for terminal output.
/// Histograms are not recorded.
#[derive(Default)]
pub struct CliRecorder {
    counters: Values<u64>,
    gauges: Values<f64>,
}

impl CliRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self) -> CliRecorderHandle {
        CliRecorderHandle {
            counters: Arc::clone(&self.counters),
            gauges: Arc::clone(&self.gauges),
        }
    }

    /// Install as the global recorder. `None` if one is already installed.
    #[must_use]
    pub fn install(self) -> Option<CliRecorderHandle> {
        let handle = self.handle();
        metrics::set_global_recorder(self).ok()?;
        Some(handle)
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(Cell {
            key: render_key(key),
            values: Arc::clone(&self.counters),
        }))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(Cell {
            key: render_key(key),
            values: Arc::clone(&self.gauges),
        }))
    }

    fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

/// Read side of an installed [`CliRecorder`].
pub struct CliRecorderHandle {
    counters: Values<u64>,
    gauges: Values<f64>,
}

impl CliRecorderHandle {
    #[must_use]
    pub fn counter_value(&self, key: &str) -> Option<u64> {
        self.counters.read().get(key).copied()
    }

    #[must_use]
    pub fn gauge_value(&self, key: &str) -> Option<f64> {
        self.gauges.read().get(key).copied()
    }

    /// Every metric as `(key, rendered value)`, sorted by key.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<(String, String)> {
        let mut lines: Vec<(String, String)> = self
            .counters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        lines.extend(self.gauges.read().iter().map(|(k, v)| (k.clone(), v.to_string())));
        lines.sort();
        lines
    }

    pub fn print_summary(&self) {
        let lines = self.summary_lines();
        if lines.is_empty() {
            println!("No metrics collected.");
            return;
        }
        println!();
        println!("## Table manager metrics");
        for (key, value) in lines {
            println!("  {key:<48} {value}");
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::{CounterFn, GaugeFn, Label};

    #[test]
    fn test_render_key() {
        assert_eq!(
            render_key(&Key::from_name("stful_reads_total")),
            "stful_reads_total"
        );
        let key = Key::from_parts(
            "stful_instructions_total",
            vec![Label::new("kind", "virtual_write")],
        );
        assert_eq!(render_key(&key), "stful_instructions_total{kind=virtual_write}");
    }

    #[test]
    fn test_cells_accumulate() {
        let recorder = CliRecorder::new();
        let handle = recorder.handle();

        let reads = Cell {
            key: "stful_reads_total".to_string(),
            values: Arc::clone(&recorder.counters),
        };
        reads.increment(3);
        reads.increment(2);
        assert_eq!(handle.counter_value("stful_reads_total"), Some(5));
        reads.absolute(1);
        assert_eq!(handle.counter_value("stful_reads_total"), Some(1));

        let occupancy = Cell {
            key: "stful_fifo_occupancy".to_string(),
            values: Arc::clone(&recorder.gauges),
        };
        occupancy.set(8.0);
        occupancy.decrement(3.0);
        assert_eq!(handle.gauge_value("stful_fifo_occupancy"), Some(5.0));
        assert_eq!(handle.gauge_value("missing"), None);
    }

    #[test]
    fn test_summary_sorted_across_kinds() {
        let recorder = CliRecorder::new();
        recorder.counters.write().insert("b_total".to_string(), 2);
        recorder.gauges.write().insert("a".to_string(), 1.5);
        assert_eq!(
            recorder.handle().summary_lines(),
            vec![
                ("a".to_string(), "1.5".to_string()),
                ("b_total".to_string(), "2".to_string())
            ]
        );
    }
}
