//! The boundary between the engine and the sandboxed interpreter.
//!
//! The interpreter itself lives outside this crate. It plugs in through
//! [`Sandbox`], and gets access to engine services (output, the import hook,
//! virtual files) through the [`Host`] handed to every call.
//!
//! Execution is cooperative: every method runs synchronously on the calling
//! task and returns once the script completes, fails or reaches an explicit
//! suspension point. The one asynchronous operation is
//! [`Sandbox::fetch_capability`]. A script that never reaches such a point is
//! stopped through an [`Interrupt`], which the sandbox polls via
//! [`Host::check_interrupt`].

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    environment::Environment,
    error::{FetchError, FileError, SandboxError},
    fs::VirtualFile,
    io::OutputStream,
    tracer::LineTracer,
    transform::Continuation,
    value::Value,
};

/// Engine services available to a running script.
pub trait Host {
    /// Appends script output.
    fn write(&mut self, stream: OutputStream, text: &str);

    /// Import hook: called for every module the sandbox cannot resolve itself.
    fn request_capability(&mut self, name: &str);

    /// Opens a virtual file; backs the sandbox's `open()`.
    fn open_file(&mut self, path: &str, mode: &str) -> Result<VirtualFile, FileError>;

    /// Closes a virtual file, writing it back and marking it dirty unless read-only.
    fn close_file(&mut self, file: &mut VirtualFile) -> Result<(), FileError>;

    /// Names of the stored files; backs the sandbox's directory listing.
    fn list_files(&self) -> Result<Vec<String>, FileError>;

    /// Called periodically (at statement boundaries) to check for an interrupt.
    ///
    /// Returns `Err(SandboxError::Interrupted)` once the engine's [`Interrupt`]
    /// was triggered; the sandbox should unwind and return that error.
    fn check_interrupt(&self) -> Result<(), SandboxError> {
        Ok(())
    }
}

/// Shared flag asking a running script to stop at its next statement boundary.
///
/// Clones share the flag, so a handle can be triggered from another thread
/// while the engine's thread is busy inside the sandbox.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Result of driving a continuation one step.
#[derive(Debug)]
pub enum Progress<P> {
    /// The script called the suspension primitive.
    Suspended {
        /// Arguments of the call: `(done, prompt)`.
        args: Vec<Value>,
        /// Top-level bindings at the moment of suspension.
        bindings: Environment,
        /// Sandbox state needed to resume.
        paused: P,
    },
    /// The continuation ran off its end without a final suspension.
    Exhausted { bindings: Environment },
}

/// One level of the call chain of a suspended frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub function: String,
    pub line: u32,
    pub depth: usize,
}

/// A frame the tracer stopped in.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendedFrame {
    /// The innermost frame: where execution stopped.
    pub record: FrameRecord,
    /// Bindings visible in that frame (locals inside functions, globals at top level).
    pub bindings: Environment,
    /// Call chain, outermost first, ending with `record`.
    pub chain: Vec<FrameRecord>,
}

/// How a traced run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceExit {
    Completed,
    Suspended(SuspendedFrame),
}

/// A sandboxed interpreter.
pub trait Sandbox: Send {
    /// Opaque state of a paused continuation.
    type Paused: Send;

    /// Runs `source` to completion against `env`.
    fn execute(&mut self, source: &str, env: &mut Environment, host: &mut dyn Host) -> Result<(), SandboxError>;

    /// Starts a continuation with its parameters bound from `env`.
    fn start(
        &mut self,
        continuation: &Continuation,
        env: &Environment,
        host: &mut dyn Host,
    ) -> Result<Progress<Self::Paused>, SandboxError>;

    /// Resumes a paused continuation; the pending suspension call evaluates to `value`.
    fn resume(
        &mut self,
        paused: Self::Paused,
        value: Value,
        host: &mut dyn Host,
    ) -> Result<Progress<Self::Paused>, SandboxError>;

    /// Runs `source` against `env`, reporting trace events to `tracer`.
    ///
    /// When the tracer answers [`TraceControl::Suspend`](crate::TraceControl::Suspend)
    /// the run is abandoned before the line executes and the frame is returned.
    fn trace(
        &mut self,
        source: &str,
        env: &mut Environment,
        host: &mut dyn Host,
        tracer: &mut dyn LineTracer,
    ) -> Result<TraceExit, SandboxError>;

    /// Runs one interactive command against `bindings`, displaying the value of a
    /// bare expression the way an interactive shell would.
    fn evaluate(&mut self, code: &str, bindings: &mut Environment, host: &mut dyn Host) -> Result<(), SandboxError>;

    /// Makes the capability `name` importable.
    fn fetch_capability(&mut self, name: &str) -> impl Future<Output = Result<(), FetchError>> + Send;

    /// Renders the current figure, if any, as a data URL.
    fn capture_figure(&mut self) -> Result<Option<String>, SandboxError>;

    /// Discards the current figure.
    fn clear_figure(&mut self);

    /// Loads the interpreter ahead of the first run.
    fn preload(&mut self) -> Result<(), SandboxError> {
        Ok(())
    }
}
