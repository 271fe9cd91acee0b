//! Nested method-call tracing with a bounded per-connection history.
//!
//! One logical connection is never invoked concurrently by the transport, so
//! the call stack models re-entrant server-side calls, not parallel ones.
//! Enable/disable still synchronizes against recording through the tracer's
//! mutex so a toggle cannot clear the buffer mid-append.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{ServerError, ServerResult};

/// One recorded method invocation, possibly containing nested child calls
/// made while this one was still open.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub method: String,
    pub args: String,
    pub entered_at: DateTime<Utc>,
    #[serde(skip)]
    entered_instant: Instant,
    pub exited_at: Option<DateTime<Utc>>,
    /// Monotonic duration in microseconds, set on exit.
    pub duration_micros: Option<u64>,
    pub error: Option<String>,
    pub children: Vec<TraceEntry>,
}

impl TraceEntry {
    fn open(method: &str, args: &str) -> Self {
        Self {
            method: method.to_string(),
            args: args.to_string(),
            entered_at: Utc::now(),
            entered_instant: Instant::now(),
            exited_at: None,
            duration_micros: None,
            error: None,
            children: Vec::new(),
        }
    }

    fn close(&mut self, error: Option<&str>) {
        self.exited_at = Some(Utc::now());
        self.duration_micros = Some(self.entered_instant.elapsed().as_micros() as u64);
        self.error = error.map(str::to_string);
    }

    pub fn complete(&self) -> bool {
        self.exited_at.is_some()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_micros.map(Duration::from_micros)
    }

    /// Indented multi-line rendering of this entry and its children, for
    /// operator display.
    pub fn render(&self, indent: usize, out: &mut String) {
        let pad = "\t".repeat(indent);
        out.push_str(&pad);
        out.push_str(&self.entered_at.format("%H:%M:%S%.6f").to_string());
        out.push_str(" @ ");
        out.push_str(&self.method);
        if !self.args.is_empty() {
            out.push_str(": ");
            out.push_str(&self.args);
        }
        if let Some(micros) = self.duration_micros {
            out.push_str(&format!(" > {micros} us"));
        }
        if let Some(err) = &self.error {
            out.push_str(&format!(" ! {err}"));
        }
        out.push('\n');
        for child in &self.children {
            child.render(indent + 1, out);
        }
    }
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        self.render(0, &mut out);
        f.write_str(out.trim_end_matches('\n'))
    }
}

#[derive(Debug)]
struct TracerState {
    enabled: bool,
    max_entries: usize,
    stack: Vec<TraceEntry>,
    entries: VecDeque<TraceEntry>,
}

/// Per-connection call tracer. Clones share state, so a handle held by the
/// admin surface toggles the same tracer the connection records through.
#[derive(Debug, Clone)]
pub struct MethodTracer {
    inner: Arc<Mutex<TracerState>>,
}

impl MethodTracer {
    pub fn new(max_entries: usize, enabled: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TracerState {
                enabled,
                max_entries: max_entries.max(1),
                stack: Vec::new(),
                entries: VecDeque::new(),
            })),
        }
    }

    /// Record entry into a method. No-op while disabled.
    pub fn enter(&self, method: &str, args: &str) {
        let mut state = self.inner.lock();
        if state.enabled {
            state.stack.push(TraceEntry::open(method, args));
        }
    }

    /// Record exit from a method. The completed entry lands in the bounded
    /// top-level buffer (evicting the oldest) or, when a caller is still
    /// open, as a child of the new stack top. Exiting a method that is not
    /// on top of the stack, or exiting with an empty stack, is a usage error
    /// and never resynced by guessing.
    pub fn exit(&self, method: &str, error: Option<&str>) -> ServerResult<Option<TraceEntry>> {
        let mut state = self.inner.lock();
        if !state.enabled {
            return Ok(None);
        }
        let Some(top) = state.stack.last() else {
            return Err(ServerError::configuration(format!(
                "call stack is empty when exiting method '{method}'"
            )));
        };
        if top.method != method {
            return Err(ServerError::configuration(format!(
                "expecting method '{}' but got '{method}' when recording exit",
                top.method
            )));
        }
        let mut entry = state.stack.pop().unwrap();
        entry.close(error);
        let state = &mut *state;
        match state.stack.last_mut() {
            Some(parent) => parent.children.push(entry.clone()),
            None => {
                if state.entries.len() >= state.max_entries {
                    state.entries.pop_front();
                }
                state.entries.push_back(entry.clone());
            }
        }
        Ok(Some(entry))
    }

    /// Toggling clears both the stack and the buffer: switching tracing on
    /// mid-session starts from empty history, and no stale nested state from
    /// a disabled period can leak into the next enabled one.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.inner.lock();
        state.enabled = enabled;
        state.stack.clear();
        state.entries.clear();
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// Snapshot of the completed top-level entries, oldest first. A copy,
    /// not a live view.
    pub fn entries(&self) -> Vec<TraceEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
