use crate::app::session::{FanOutReport, SessionRegistry};
use crate::domain::context::{OpenFileState, SnapshotLimits, WorkspaceSnapshot};
use crate::telemetry::BridgeMetrics;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    Unchanged,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Empty => "empty",
            SkipReason::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Skipped(SkipReason),
    Broadcast(FanOutReport),
}

/// Turns editor view state into `ide/contextUpdate` notifications for every session.
pub struct ContextBroadcaster {
    registry: Arc<SessionRegistry>,
    roots: Vec<PathBuf>,
    limits: SnapshotLimits,
    last_fingerprint: Mutex<Option<String>>,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl ContextBroadcaster {
    pub fn new(
        registry: Arc<SessionRegistry>,
        roots: Vec<PathBuf>,
        limits: SnapshotLimits,
        metrics: Option<Arc<BridgeMetrics>>,
    ) -> Self {
        Self {
            registry,
            roots,
            limits,
            last_fingerprint: Mutex::new(None),
            metrics,
        }
    }

    pub fn publish(&self, files: Vec<OpenFileState>, force: bool) -> BroadcastOutcome {
        self.publish_at(files, force, Utc::now().timestamp_millis())
    }

    pub fn publish_at(&self, files: Vec<OpenFileState>, force: bool, now_ms: i64) -> BroadcastOutcome {
        let snapshot = WorkspaceSnapshot::build(files, &self.roots, now_ms, self.limits);
        if snapshot.is_empty() {
            return self.skip(SkipReason::Empty);
        }
        let fingerprint = snapshot.fingerprint();
        {
            let mut last = self
                .last_fingerprint
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !force && last.as_deref() == Some(fingerprint.as_str()) {
                drop(last);
                return self.skip(SkipReason::Unchanged);
            }
            *last = Some(fingerprint);
        }
        let report = self.registry.broadcast(&snapshot.to_notification());
        if let Some(metrics) = &self.metrics {
            metrics.record_context_broadcast(report.delivered);
        }
        debug!(
            files = snapshot.open_files().len(),
            delivered = report.delivered,
            evicted = report.evicted.len(),
            force,
            "context update broadcast"
        );
        BroadcastOutcome::Broadcast(report)
    }

    fn skip(&self, reason: SkipReason) -> BroadcastOutcome {
        if let Some(metrics) = &self.metrics {
            metrics.record_context_skip(reason.as_str());
        }
        BroadcastOutcome::Skipped(reason)
    }
}
