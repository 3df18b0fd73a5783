//! The execution controller.
//!
//! [`Engine`] owns the sandbox, the virtual file store and the current
//! [`Session`], and drives one script at a time to a stable stopping point:
//! completion, an input request, a debugger break or a failure.
//!
//! # Capability retries
//!
//! When the sandbox fails on an import it cannot satisfy, the engine fetches
//! the oldest requested capability and, on success, re-runs the whole script
//! from the top. Side effects performed before the failing import happen again
//! on the retry; in particular output printed before it appears twice in the
//! session output. Fetches are strictly serial.

use std::cell::Cell;

use tracing::{debug, info, warn};

use crate::{
    capability::CapabilityResolver,
    config::EngineConfig,
    debugger::{CommandOutcome, DebugStop, StepDebugger},
    environment::Environment,
    error::{EngineError, FileError, SandboxError},
    fs::{DirtyFiles, FileStore, MemoryStore, VirtualFile},
    io::{EngineObserver, NoopObserver, OutputStream},
    sandbox::{Host, Interrupt, Progress, Sandbox},
    session::{RunMode, Session, SessionState, SuspensionPoint},
    transform::{prepare_plain, transform},
    value::Value,
};

/// Transparent 1×1 PNG sent in place of a figure to mean "no figure".
pub const PLACEHOLDER_FIGURE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// Stable stopping point of a run, submit or debug command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    AwaitingInput { prompt: Option<String> },
    SuspendedAtBreakpoint { line: u32 },
    Failed { message: String },
}

/// What the next attempt does.
#[derive(Debug)]
enum Step {
    /// Run the session's script from the top.
    Start,
    /// Resume the paused continuation with a submitted value.
    Resume(Value),
    /// Run the next traced pass of the existing debugger.
    Debug,
}

/// Where an attempt settled, before outcome bookkeeping.
enum Settled<P> {
    Completed,
    Input { prompt: Option<String>, paused: P },
    Break { line: u32 },
}

enum Attempt {
    Finished(RunOutcome),
    /// The sandbox reported a missing capability.
    Missing(SandboxError),
}

/// Builds the per-attempt [`Host`] from disjoint engine fields.
macro_rules! attempt_host {
    ($engine:ident, $buffer:expr, $muted:expr) => {
        AttemptHost {
            output: $buffer,
            observer: &mut $engine.observer,
            muted: $muted,
            capabilities: &mut $engine.session.capabilities,
            store: &mut *$engine.store,
            dirty: &mut $engine.dirty,
            interrupt: &$engine.interrupt,
        }
    };
}

/// Interactive execution engine for one sandbox.
pub struct Engine<S: Sandbox, O: EngineObserver = NoopObserver> {
    sandbox: S,
    observer: O,
    config: EngineConfig,
    store: Box<dyn FileStore>,
    dirty: DirtyFiles,
    interrupt: Interrupt,
    session: Session<S::Paused>,
}

impl<S: Sandbox> Engine<S> {
    /// Engine with default configuration, an in-memory file store and no observer.
    #[must_use]
    pub fn with_defaults(sandbox: S) -> Self {
        Self::new(sandbox, NoopObserver, EngineConfig::default())
    }
}

impl<S: Sandbox, O: EngineObserver> Engine<S, O> {
    /// Creates an engine backed by an in-memory file store.
    #[must_use]
    pub fn new(sandbox: S, observer: O, config: EngineConfig) -> Self {
        Self {
            sandbox,
            observer,
            config,
            store: Box::new(MemoryStore::new()),
            dirty: DirtyFiles::new(),
            interrupt: Interrupt::new(),
            session: Session::default(),
        }
    }

    /// Replaces the file store backend.
    #[must_use]
    pub fn with_store(mut self, store: impl FileStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Runs `script` to its first stable stopping point.
    ///
    /// A non-empty `breakpoints` list runs the script under the step debugger;
    /// otherwise it runs as a continuation when input handling is enabled, or
    /// directly. Whitespace-only scripts complete immediately.
    pub async fn run(&mut self, script: &str, breakpoints: &[u32]) -> RunOutcome {
        let mode = if !breakpoints.is_empty() {
            RunMode::Debug
        } else if self.config.handle_input {
            RunMode::Interactive
        } else {
            RunMode::Plain
        };
        self.interrupt.reset();
        self.session.restart(script, mode, breakpoints);
        if script.trim().is_empty() {
            self.session.state = SessionState::Done;
            return RunOutcome::Completed;
        }
        info!(%mode, breakpoints = breakpoints.len(), "starting run");
        self.drive(Step::Start).await
    }

    /// Answers a pending input request.
    pub async fn submit(&mut self, value: &str) -> Result<RunOutcome, EngineError> {
        self.expect_state("submit", SessionState::AwaitingInput)?;
        Ok(self.drive(Step::Resume(Value::from(value))).await)
    }

    /// Abandons a pending input request or debug session.
    ///
    /// Returns `false` when there was nothing to cancel.
    pub fn cancel(&mut self) -> bool {
        match self.session.state {
            SessionState::AwaitingInput | SessionState::Suspended => {
                info!(state = %self.session.state, "cancelling session");
                self.session.abandon(SessionState::Failed);
                true
            }
            _ => false,
        }
    }

    /// Applies one debugger command while suspended at a break.
    ///
    /// `breakpoints`, when given, replaces the breakpoint set before the
    /// command runs.
    pub async fn continue_debug(
        &mut self,
        command: &str,
        breakpoints: Option<&[u32]>,
    ) -> Result<RunOutcome, EngineError> {
        self.expect_state("continue debugging", SessionState::Suspended)?;
        let muted = Cell::new(false);
        let mut buffer = String::new();
        let outcome = match self.session.debugger.as_mut() {
            Some(debugger) => {
                if let Some(lines) = breakpoints {
                    debugger.set_breakpoints(lines);
                }
                let mut host = attempt_host!(self, &mut buffer, &muted);
                Some(debugger.command(command, &mut self.sandbox, &mut host))
            }
            None => None,
        };
        let Some(outcome) = outcome else {
            return Err(self.invalid_state("continue debugging"));
        };
        self.session.output.push_str(&buffer);
        debug!(command, ?outcome, "debugger command");

        match outcome {
            CommandOutcome::Resume => Ok(self.drive(Step::Debug).await),
            CommandOutcome::Stay => Ok(RunOutcome::SuspendedAtBreakpoint {
                line: self.session.debug_line.unwrap_or_default(),
            }),
            CommandOutcome::Quit => {
                self.session.abandon(SessionState::Done);
                Ok(RunOutcome::Completed)
            }
        }
    }

    /// Content of a virtual file, `None` when absent.
    pub fn get_file(&self, path: &str) -> Result<Option<String>, EngineError> {
        Ok(self.store.read(path)?)
    }

    /// Writes a virtual file on behalf of the host. Host writes are not marked dirty.
    pub fn put_file(&mut self, path: &str, content: &str) -> Result<(), EngineError> {
        Ok(self.store.write(path, content)?)
    }

    /// Clears the current figure and sends the placeholder.
    ///
    /// Does nothing, and returns `false`, unless the figure capability was loaded.
    pub fn clear_figure(&mut self) -> bool {
        if !self.session.capabilities.is_loaded(&self.config.figure_capability) {
            return false;
        }
        self.sandbox.clear_figure();
        self.observer.on_figure(PLACEHOLDER_FIGURE);
        true
    }

    /// Clears the accumulated output and the figure.
    pub fn clear(&mut self) {
        self.session.output.clear();
        self.observer.on_clear();
        self.clear_figure();
    }

    /// Loads the sandbox without running anything.
    pub fn preload(&mut self) -> Result<(), EngineError> {
        info!("preloading sandbox");
        Ok(self.sandbox.preload()?)
    }

    /// Handle that stops the running script at its next statement boundary.
    ///
    /// The flag is cleared when the next [`run`](Self::run) starts; an
    /// interrupted command fails with [`SandboxError::Interrupted`].
    #[must_use]
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Returns the files modified since the last call, and resets the set.
    pub fn take_dirty_files(&mut self) -> Vec<String> {
        self.dirty.drain()
    }

    #[must_use]
    pub fn session(&self) -> &Session<S::Paused> {
        &self.session
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.session.output
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.session.environment
    }

    #[must_use]
    pub fn capabilities(&self) -> &CapabilityResolver {
        &self.session.capabilities
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    pub fn sandbox_mut(&mut self) -> &mut S {
        &mut self.sandbox
    }

    #[must_use]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Runs attempts until one settles, fetching one missing capability between attempts.
    async fn drive(&mut self, mut step: Step) -> RunOutcome {
        let mut attempt = 0_usize;
        loop {
            attempt += 1;
            debug!(attempt, mode = %self.session.mode, "starting attempt");
            let error = match self.attempt(step) {
                Attempt::Finished(outcome) => return outcome,
                Attempt::Missing(error) => error,
            };
            let Some(name) = self.session.capabilities.next_to_fetch().map(str::to_owned) else {
                return self.fail(error.into());
            };

            self.session.state = SessionState::AwaitingCapability;
            info!(capability = %name, "fetching capability");
            self.observer.on_fetch(&name);
            let fetched = self.sandbox.fetch_capability(&name).await;
            let loaded = fetched.is_ok();
            self.session.capabilities.resolve(&name, loaded);
            self.observer.on_capability(&name, loaded);
            if let Err(fetch_error) = fetched {
                warn!(capability = %name, error = %fetch_error, "capability fetch failed");
                return self.fail(error.into());
            }
            if self.interrupt.is_triggered() {
                return self.fail(SandboxError::Interrupted.into());
            }

            step = match self.session.mode {
                RunMode::Debug if self.session.debugger.is_some() => Step::Debug,
                _ => Step::Start,
            };
            debug!(capability = %name, "restarting after capability load");
        }
    }

    /// One synchronous pass through the sandbox.
    fn attempt(&mut self, step: Step) -> Attempt {
        self.session.capabilities.begin_attempt();
        self.session.state = SessionState::Running;
        let muted = Cell::new(false);
        let mut buffer = String::new();

        let result = {
            let mut host = attempt_host!(self, &mut buffer, &muted);
            match step {
                Step::Start => match self.session.mode {
                    RunMode::Plain => prepare_plain(&self.session.script)
                        .map_err(|error| EngineError::Sandbox(error.into()))
                        .and_then(|source| {
                            self.sandbox
                                .execute(&source, &mut self.session.environment, &mut host)
                                .map_err(EngineError::from)
                        })
                        .map(|()| Settled::Completed),
                    RunMode::Interactive => match transform(&self.session.script, &self.session.environment) {
                        Ok(continuation) => self
                            .sandbox
                            .start(&continuation, &self.session.environment, &mut host)
                            .map_err(EngineError::from)
                            .map(|progress| settle(progress, &mut self.session.environment)),
                        Err(error) => Err(EngineError::Transform(error)),
                    },
                    RunMode::Debug => match prepare_plain(&self.session.script) {
                        Ok(source) => {
                            let debugger = self.session.debugger.insert(StepDebugger::new(
                                source,
                                self.session.environment.clone(),
                                &self.session.breakpoints,
                                self.config.stop_on_entry,
                            ));
                            debugger
                                .drive(&mut self.sandbox, &mut self.session.environment, &mut host, &muted)
                                .map(Settled::from)
                                .map_err(EngineError::from)
                        }
                        Err(error) => Err(EngineError::Sandbox(error.into())),
                    },
                },
                Step::Resume(value) => match self.session.pending.take() {
                    Some(paused) => self
                        .sandbox
                        .resume(paused, value, &mut host)
                        .map_err(EngineError::from)
                        .map(|progress| settle(progress, &mut self.session.environment)),
                    None => Err(EngineError::InvalidState {
                        operation: "resume",
                        state: self.session.state,
                    }),
                },
                Step::Debug => match self.session.debugger.as_mut() {
                    Some(debugger) => debugger
                        .drive(&mut self.sandbox, &mut self.session.environment, &mut host, &muted)
                        .map(Settled::from)
                        .map_err(EngineError::from),
                    None => Err(EngineError::InvalidState {
                        operation: "resume debugging",
                        state: self.session.state,
                    }),
                },
            }
        };
        self.session.output.push_str(&buffer);

        match result {
            Ok(settled) => Attempt::Finished(self.conclude(settled)),
            Err(EngineError::Sandbox(error @ SandboxError::MissingCapability { .. })) => {
                debug!(%error, "attempt needs a capability");
                Attempt::Missing(error)
            }
            Err(error) => Attempt::Finished(self.fail(error)),
        }
    }

    fn conclude(&mut self, settled: Settled<S::Paused>) -> RunOutcome {
        let outcome = match settled {
            Settled::Completed => {
                self.session.abandon(SessionState::Done);
                RunOutcome::Completed
            }
            Settled::Input { prompt, paused } => {
                info!(prompt = prompt.as_deref().unwrap_or_default(), "awaiting input");
                self.session.state = SessionState::AwaitingInput;
                self.session.prompt.clone_from(&prompt);
                self.session.pending = Some(paused);
                RunOutcome::AwaitingInput { prompt }
            }
            Settled::Break { line } => {
                info!(line, "suspended at breakpoint");
                self.session.state = SessionState::Suspended;
                self.session.debug_line = Some(line);
                RunOutcome::SuspendedAtBreakpoint { line }
            }
        };
        self.capture_figure();
        outcome
    }

    /// Reports a failure as output and ends the session.
    fn fail(&mut self, error: EngineError) -> RunOutcome {
        let message = error.to_string();
        warn!(%message, "run failed");
        self.session.output.push_str(&message);
        self.session.output.push('\n');
        self.observer.on_failure(&message);
        self.session.abandon(SessionState::Failed);
        RunOutcome::Failed { message }
    }

    fn capture_figure(&mut self) {
        if !self.session.capabilities.is_loaded(&self.config.figure_capability) {
            return;
        }
        match self.sandbox.capture_figure() {
            Ok(Some(data_url)) => self.observer.on_figure(&data_url),
            Ok(None) => {}
            Err(error) => warn!(%error, "figure capture failed"),
        }
    }

    fn expect_state(&self, operation: &'static str, state: SessionState) -> Result<(), EngineError> {
        if self.session.state == state {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> EngineError {
        EngineError::InvalidState {
            operation,
            state: self.session.state,
        }
    }
}

/// Merges the suspension snapshot and decides whether the script is done.
fn settle<P>(progress: Progress<P>, environment: &mut Environment) -> Settled<P> {
    match progress {
        Progress::Suspended { args, bindings, paused } => {
            let point = SuspensionPoint::from_args(args, bindings);
            let prompt = point.prompt_text();
            environment.merge(point.snapshot);
            if point.done {
                Settled::Completed
            } else {
                Settled::Input { prompt, paused }
            }
        }
        Progress::Exhausted { bindings } => {
            environment.merge(bindings);
            Settled::Completed
        }
    }
}

impl<P> From<DebugStop> for Settled<P> {
    fn from(stop: DebugStop) -> Self {
        match stop {
            DebugStop::Suspended { line } => Self::Break { line },
            DebugStop::Completed => Self::Completed,
        }
    }
}

/// [`Host`] view of the engine for the duration of one attempt.
struct AttemptHost<'e, O> {
    output: &'e mut String,
    observer: &'e mut O,
    /// Set while the debugger replays already-seen execution.
    muted: &'e Cell<bool>,
    capabilities: &'e mut CapabilityResolver,
    store: &'e mut dyn FileStore,
    dirty: &'e mut DirtyFiles,
    interrupt: &'e Interrupt,
}

impl<O: EngineObserver> Host for AttemptHost<'_, O> {
    fn write(&mut self, stream: OutputStream, text: &str) {
        if self.muted.get() || text.is_empty() {
            return;
        }
        self.output.push_str(text);
        self.observer.on_output(stream, text);
    }

    fn request_capability(&mut self, name: &str) {
        if self.capabilities.note(name) {
            debug!(capability = name, "capability requested");
        }
    }

    fn open_file(&mut self, path: &str, mode: &str) -> Result<VirtualFile, FileError> {
        VirtualFile::open(&*self.store, path, mode)
    }

    fn close_file(&mut self, file: &mut VirtualFile) -> Result<(), FileError> {
        if file.close(&mut *self.store)? && self.dirty.mark(file.name()) {
            self.observer.on_dirty(file.name());
        }
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>, FileError> {
        Ok(self.store.list_names()?)
    }

    fn check_interrupt(&self) -> Result<(), SandboxError> {
        if self.interrupt.is_triggered() {
            Err(SandboxError::Interrupted)
        } else {
            Ok(())
        }
    }
}
