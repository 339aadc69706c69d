//! Exporter — a bounded queue between the instrumented hot path and the
//! telemetry sinks.
//!
//! Enqueueing never blocks on a sink. Items are drained either by the
//! background task started with [`Exporter::spawn_drain`] or synchronously
//! by [`Exporter::flush`]. Delivery is best-effort: when the queue is full
//! one item is dropped according to [`QueueFullPolicy`] and counted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use genops_core::error::SinkError;
use genops_core::sink::{ExportItem, TelemetrySink};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to drop when the queue is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// Evict the oldest queued item to make room.
    #[default]
    DropOldest,
    /// Discard the incoming item.
    DropNewest,
}

impl QueueFullPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "drop_oldest" => Some(Self::DropOldest),
            "drop_newest" => Some(Self::DropNewest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExporterSettings {
    pub capacity: usize,
    pub on_full: QueueFullPolicy,
    /// Upper bound between background drains when nothing wakes the task.
    pub drain_interval: Duration,
}

impl Default for ExporterSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            on_full: QueueFullPolicy::DropOldest,
            drain_interval: Duration::from_millis(250),
        }
    }
}

/// Exporter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    pub enqueued: u64,
    /// Item deliveries that succeeded, counted once per sink.
    pub exported: u64,
    /// Items lost to a full queue.
    pub dropped: u64,
    /// Item deliveries a sink refused.
    pub failed: u64,
    pub pending: usize,
}

/// Bounded, best-effort fan-out to telemetry sinks.
pub struct Exporter {
    queue: Mutex<VecDeque<ExportItem>>,
    sinks: RwLock<Vec<Arc<dyn TelemetrySink>>>,
    /// Serializes drains so items reach sinks in enqueue order.
    drain: Mutex<()>,
    notify: Notify,
    settings: ExporterSettings,
    enqueued: AtomicU64,
    exported: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl Exporter {
    pub fn new(settings: ExporterSettings) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            sinks: RwLock::new(Vec::new()),
            drain: Mutex::new(()),
            notify: Notify::new(),
            settings,
            enqueued: AtomicU64::new(0),
            exported: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn TelemetrySink>) {
        debug!(sink = sink.name(), "Added telemetry sink");
        self.sinks.write().push(sink);
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Queue an item for export. Returns `false` if it was dropped.
    pub fn enqueue(&self, item: ExportItem) -> bool {
        let capacity = self.settings.capacity.max(1);
        let (accepted, evicted) = {
            let mut queue = self.queue.lock();
            if queue.len() < capacity {
                queue.push_back(item);
                (true, false)
            } else {
                match self.settings.on_full {
                    QueueFullPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(item);
                        (true, true)
                    }
                    QueueFullPolicy::DropNewest => (false, true),
                }
            }
        };

        if evicted {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            // Sampled so a saturated queue does not flood the log.
            if dropped.is_power_of_two() {
                warn!(dropped, policy = ?self.settings.on_full, "Export queue full, dropping telemetry");
            }
        }
        if accepted {
            self.enqueued.fetch_add(1, Ordering::Relaxed);
            self.notify.notify_one();
        }
        accepted
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drain everything queued to every sink on the calling thread.
    /// Returns the number of items drained.
    pub fn flush(&self) -> usize {
        let _drain = self.drain.lock();
        let mut drained = 0;
        loop {
            let batch: Vec<ExportItem> = self.queue.lock().drain(..).collect();
            if batch.is_empty() {
                return drained;
            }
            drained += batch.len();

            let sinks = self.sinks.read().clone();
            for item in &batch {
                for sink in &sinks {
                    self.deliver(sink.as_ref(), item);
                }
            }
        }
    }

    /// Start the background drain. The task drains once more after
    /// `cancel` fires and then exits.
    pub fn spawn_drain(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let exporter = Arc::clone(self);
        tokio::spawn(async move {
            debug!("Export drain started");
            let period = exporter.settings.drain_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = exporter.notify.notified() => {}
                    _ = interval.tick() => {}
                }
                exporter.flush();
            }
            let drained = exporter.flush();
            info!(drained, "Export drain stopped");
        })
    }

    pub fn stats(&self) -> ExportStats {
        ExportStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            exported: self.exported.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    fn deliver(&self, sink: &dyn TelemetrySink, item: &ExportItem) {
        match sink.export(item) {
            Ok(()) => {
                self.exported.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let failed = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(sink = sink.name(), kind = item.kind(), failed, error = %e, "Sink export failed");
            }
        }
    }
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(ExporterSettings::default())
    }
}

// ── Built-in sinks ───────────────────────────────────────────────────────

/// Emits every item as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn export(&self, item: &ExportItem) -> Result<(), SinkError> {
        let payload =
            serde_json::to_string(item).map_err(|e| SinkError::Rejected(e.to_string()))?;
        info!(target: "genops::export", kind = item.kind(), %payload, "telemetry");
        Ok(())
    }
}

/// Keeps exported items in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    items: Mutex<Vec<ExportItem>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<ExportItem> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn records(&self) -> Vec<genops_core::TelemetryRecord> {
        self.collect(|item| match item {
            ExportItem::Record(r) => Some(r.clone()),
            _ => None,
        })
    }

    pub fn alerts(&self) -> Vec<genops_core::BudgetAlert> {
        self.collect(|item| match item {
            ExportItem::Alert(a) => Some(a.clone()),
            _ => None,
        })
    }

    pub fn summaries(&self) -> Vec<genops_core::RagPipelineSummary> {
        self.collect(|item| match item {
            ExportItem::Summary(s) => Some(s.as_ref().clone()),
            _ => None,
        })
    }

    pub fn totals(&self) -> Vec<genops_core::ScopeTotals> {
        self.collect(|item| match item {
            ExportItem::Totals(t) => Some(t.clone()),
            _ => None,
        })
    }

    fn collect<T>(&self, f: impl Fn(&ExportItem) -> Option<T>) -> Vec<T> {
        self.items.lock().iter().filter_map(f).collect()
    }
}

impl TelemetrySink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn export(&self, item: &ExportItem) -> Result<(), SinkError> {
        self.items.lock().push(item.clone());
        Ok(())
    }
}
