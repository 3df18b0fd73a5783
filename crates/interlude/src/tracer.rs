//! Line-level execution tracing.
//!
//! The sandbox reports trace events in its natural execution order while a
//! script runs under [`Sandbox::trace`](crate::Sandbox::trace). A tracer
//! observes each event and, for line events only, decides whether execution
//! should stop before the line runs.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Never stops, records nothing |
//! | [`RecordingTracer`] | Records every event, never stops |
//! | `ReplayTracer` (in [`debugger`](crate::debugger)) | Drives the step debugger |

/// A line is about to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEvent<'a> {
    /// 1-based line in the script.
    pub line: u32,
    /// Call depth, 0 for module level.
    pub depth: usize,
    /// Name of the executing function, `<module>` at top level.
    pub function: &'a str,
}

/// Decision returned from [`LineTracer::on_line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceControl {
    /// Execute the line.
    Continue,
    /// Stop before the line and hand the frame back to the caller.
    Suspend,
}

/// Hooks invoked by the sandbox while tracing.
///
/// Only [`on_line`](Self::on_line) is required; call and return hooks default
/// to no-ops.
pub trait LineTracer: std::fmt::Debug {
    fn on_line(&mut self, event: LineEvent<'_>) -> TraceControl;

    /// A new frame was pushed.
    ///
    /// # Arguments
    /// * `function` - Name of the called function
    /// * `depth` - Call depth after the push
    #[inline]
    fn on_call(&mut self, _function: &str, _depth: usize) {}

    /// A frame was popped.
    ///
    /// # Arguments
    /// * `depth` - Call depth after the pop
    #[inline]
    fn on_return(&mut self, _depth: usize) {}
}

/// Tracer that lets everything run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl LineTracer for NoopTracer {
    #[inline]
    fn on_line(&mut self, _event: LineEvent<'_>) -> TraceControl {
        TraceControl::Continue
    }
}

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Line { line: u32, depth: usize, function: String },
    Call { function: String, depth: usize },
    Return { depth: usize },
}

/// Records the full event stream, useful to check event ordering.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Just the line numbers of line events, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Line { line, .. } => Some(*line),
                _ => None,
            })
            .collect()
    }
}

impl LineTracer for RecordingTracer {
    fn on_line(&mut self, event: LineEvent<'_>) -> TraceControl {
        self.events.push(TraceEvent::Line {
            line: event.line,
            depth: event.depth,
            function: event.function.to_owned(),
        });
        TraceControl::Continue
    }

    fn on_call(&mut self, function: &str, depth: usize) {
        self.events.push(TraceEvent::Call {
            function: function.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.events.push(TraceEvent::Return { depth });
    }
}
