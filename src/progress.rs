//! Progress reporting for long-running operations.
//!
//! Ingest, sync, and query pipelines emit [`ProgressEvent`]s to an optional
//! sink. The sink is a plain callback so transports can forward events
//! however they like; the CLI prints them.

use serde::Serialize;
use std::sync::Arc;

/// One progress observation.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub phase: String,
    pub current: u64,
    pub total: u64,
    pub percentage: f32,
    pub detail: String,
}

/// Callback receiving progress events.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Emit an event to the sink, if any. Percentage is computed from
/// current/total unless total is zero.
pub fn emit(
    sink: Option<&ProgressSink>,
    phase: &str,
    current: u64,
    total: u64,
    detail: impl Into<String>,
) {
    if let Some(sink) = sink {
        let percentage = if total > 0 {
            (current as f32 / total as f32) * 100.0
        } else {
            0.0
        };
        sink(ProgressEvent {
            phase: phase.to_string(),
            current,
            total,
            percentage,
            detail: detail.into(),
        });
    }
}

/// Emit a terminal event at 100%.
pub fn emit_done(sink: Option<&ProgressSink>, phase: &str, detail: impl Into<String>) {
    if let Some(sink) = sink {
        sink(ProgressEvent {
            phase: phase.to_string(),
            current: 1,
            total: 1,
            percentage: 100.0,
            detail: detail.into(),
        });
    }
}
