use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A single timed span: `[start_ns, end_ns)` nested under `parent_id` (`0`
/// for a top-level span). Spans are recorded flat in push order; the tree
/// structure is reconstructed by following `parent_id` when a caller wants
/// to render it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PerfSpan {
    pub id: u64,
    pub parent_id: u64,
    pub start_ns: u64,
    pub end_ns: u64,
}

/// Nested timing spans collected over one `process_block` call. Pushed onto
/// the out-message queue as a [`crate::message::MessageBody::PerfStats`] so
/// it never outlives the block it measured.
///
/// Carries an explicit name table keyed by span id rather than inlining
/// fixed-size name buffers, since Rust has no reason to pay the original's
/// `NAME_LENGTH` byte budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerfStats {
    spans: Vec<PerfSpan>,
    names: Vec<String>,
    #[serde(skip)]
    stack: Vec<usize>,
    next_id: u64,
}

impl PerfStats {
    pub fn new() -> Self {
        PerfStats::default()
    }

    pub fn reset(&mut self) {
        self.spans.clear();
        self.names.clear();
        self.stack.clear();
        self.next_id = 0;
    }

    /// Opens a span named `name`, nested under whatever span is currently
    /// open (or top-level if none is). Returns the span's id.
    pub fn start_span(&mut self, name: &str, now_ns: u64) -> u64 {
        let parent_id = self
            .stack
            .last()
            .map(|&idx| self.spans[idx].id)
            .unwrap_or(0);
        self.next_id += 1;
        let id = self.next_id;
        let index = self.spans.len();
        self.spans.push(PerfSpan {
            id,
            parent_id,
            start_ns: now_ns,
            end_ns: now_ns,
        });
        self.names.push(name.to_string());
        self.stack.push(index);
        id
    }

    /// Closes the most recently opened, still-open span.
    pub fn end_span(&mut self, now_ns: u64) {
        if let Some(index) = self.stack.pop() {
            self.spans[index].end_ns = now_ns;
        }
    }

    pub fn current_span_id(&self) -> u64 {
        self.stack
            .last()
            .map(|&idx| self.spans[idx].id)
            .unwrap_or(0)
    }

    pub fn append_span(&mut self, span: PerfSpan, name: &str) {
        self.spans.push(span);
        self.names.push(name.to_string());
    }

    pub fn num_spans(&self) -> usize {
        self.spans.len()
    }

    pub fn span(&self, idx: usize) -> (PerfSpan, &str) {
        (self.spans[idx], self.names[idx].as_str())
    }

    pub fn spans(&self) -> &[PerfSpan] {
        &self.spans
    }
}

/// Monotonic nanosecond clock. A trait rather than a raw function pointer so
/// tests can substitute a deterministic fake, matching the original's
/// injectable `clock_func_t`.
pub trait Clock {
    fn now_ns(&self) -> u64;
}

pub struct MonotonicClock {
    epoch: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock {
            epoch: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// RAII guard that opens a span on construction and closes it on drop,
/// mirroring the original's `PerfTracker`.
pub struct PerfScope<'a> {
    stats: &'a mut PerfStats,
    clock: &'a dyn Clock,
}

impl<'a> PerfScope<'a> {
    pub fn new(stats: &'a mut PerfStats, clock: &'a dyn Clock, name: &str) -> Self {
        let now = clock.now_ns();
        stats.start_span(name, now);
        PerfScope { stats, clock }
    }
}

impl Drop for PerfScope<'_> {
    fn drop(&mut self) {
        let now = self.clock.now_ns();
        self.stats.end_span(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClock {
        ns: std::cell::Cell<u64>,
    }

    impl Clock for FakeClock {
        fn now_ns(&self) -> u64 {
            let current = self.ns.get();
            self.ns.set(current + 10);
            current
        }
    }

    #[test]
    fn nested_spans_get_correct_parent() {
        let mut stats = PerfStats::new();
        let outer = stats.start_span("block", 0);
        let inner = stats.start_span("opcode", 1);
        assert_eq!(stats.span(1).0.parent_id, outer);
        stats.end_span(2);
        stats.end_span(3);
        assert_eq!(stats.num_spans(), 2);
        assert_ne!(outer, inner);
    }

    #[test]
    fn reset_clears_everything() {
        let mut stats = PerfStats::new();
        stats.start_span("a", 0);
        stats.end_span(1);
        stats.reset();
        assert_eq!(stats.num_spans(), 0);
        assert_eq!(stats.current_span_id(), 0);
    }

    #[test]
    fn scope_closes_span_on_drop() {
        let clock = FakeClock {
            ns: std::cell::Cell::new(100),
        };
        let mut stats = PerfStats::new();
        {
            let _scope = PerfScope::new(&mut stats, &clock, "render");
        }
        assert_eq!(stats.num_spans(), 1);
        let (span, name) = stats.span(0);
        assert_eq!(name, "render");
        assert!(span.end_ns > span.start_ns);
    }
}
