//! Line-level step debugger built on replayed tracing.
//!
//! The sandbox cannot keep a traced frame alive between host messages, so a
//! debug session is a sequence of traced passes over the same script, each
//! starting from the same base bindings. A pass fast-forwards to the line event
//! at which the previous pass stopped, with output muted, and from there applies
//! the action chosen by the latest command until a break condition holds.
//!
//! Line events are counted per pass; since every pass replays the same
//! deterministic execution, the ordinal of an event identifies it across passes.
//!
//! Bindings changed by an evaluated command (`x = 5` at a break) live only in
//! the suspended frame. The next pass starts again from the base bindings, so
//! such changes are lost once execution resumes.
//!
//! Break conditions, evaluated before a line executes:
//!
//! | Action | Breaks when |
//! |--------|-------------|
//! | step | on the next line event |
//! | next | the depth is at most the depth of the previous break |
//! | return | the depth is below the depth of the previous break |
//! | continue | only at breakpoints |
//!
//! Breakpoints fire under every action, except that `next` and `return` never
//! stop deeper than the previous break.

use std::cell::Cell;

use ahash::AHashSet;

use crate::{
    environment::Environment,
    error::SandboxError,
    io::OutputStream,
    sandbox::{Host, Sandbox, SuspendedFrame, TraceExit},
    tracer::{LineEvent, LineTracer, TraceControl},
};

const HELP: &str = "\
Commands:
  c, continue     run until the next breakpoint
  s, step         run until the next line, entering calls
  n, next         run until the next line at the same or an outer level
  r, return       run until the current function returns
  b, break N      set a breakpoint at line N
  cl, clear [N]   clear the breakpoint at line N, or all breakpoints
  w, where        show the call chain
  q, quit         abandon the debug session
  h, help         show this help
Anything else is evaluated in the current frame. An empty command repeats the last one.
";

/// How execution proceeds after a break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DebugAction {
    Continue,
    Step,
    Next,
    Return,
}

/// A parsed debugger command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugCommand {
    Resume(DebugAction),
    Break(u32),
    Clear(Option<u32>),
    Where,
    Quit,
    Help,
    /// Code evaluated in the suspended frame's bindings.
    Evaluate(String),
}

impl DebugCommand {
    /// Parses one command line. Returns `None` for an empty line.
    ///
    /// Keywords only match as whole commands, so `c = 5` is evaluated rather
    /// than taken as `continue`.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        let mut words = input.split_whitespace();
        let keyword = words.next().unwrap_or_default();
        let argument = words.next();
        let line = argument.and_then(|arg| arg.parse::<u32>().ok());
        let extra = words.next().is_some();

        let command = match (keyword, argument, line, extra) {
            ("c" | "cont" | "continue", None, _, false) => Self::Resume(DebugAction::Continue),
            ("s" | "step", None, _, false) => Self::Resume(DebugAction::Step),
            ("n" | "next", None, _, false) => Self::Resume(DebugAction::Next),
            ("r" | "return", None, _, false) => Self::Resume(DebugAction::Return),
            ("b" | "break", Some(_), Some(line), false) => Self::Break(line),
            ("cl" | "clear", None, _, false) => Self::Clear(None),
            ("cl" | "clear", Some(_), Some(line), false) => Self::Clear(Some(line)),
            ("w" | "where" | "bt", None, _, false) => Self::Where,
            ("q" | "quit", None, _, false) => Self::Quit,
            ("h" | "help", None, _, false) => Self::Help,
            _ => Self::Evaluate(input.to_owned()),
        };
        Some(command)
    }
}

/// Lifecycle of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DebuggerState {
    NotStarted,
    Running,
    Suspended,
    Completed,
}

/// Where a traced pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugStop {
    Suspended { line: u32 },
    Completed,
}

/// Effect of a command on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Execution should resume with another traced pass.
    Resume,
    /// The session stays suspended at the same frame.
    Stay,
    /// The session was abandoned.
    Quit,
}

/// Line event at which a pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BreakMark {
    ordinal: usize,
    depth: usize,
}

/// Replay debugger for one script.
#[derive(Debug)]
pub struct StepDebugger {
    source: String,
    base: Environment,
    breakpoints: AHashSet<u32>,
    action: DebugAction,
    last_break: Option<BreakMark>,
    frame: Option<SuspendedFrame>,
    last_command: Option<DebugCommand>,
    state: DebuggerState,
}

impl StepDebugger {
    /// Creates a debugger for `source`; every pass starts from `base` bindings.
    ///
    /// The first pass runs to the first breakpoint, or stops on the first line
    /// when `stop_on_entry` is set.
    #[must_use]
    pub fn new(source: String, base: Environment, breakpoints: &[u32], stop_on_entry: bool) -> Self {
        Self {
            source,
            base,
            breakpoints: breakpoints.iter().copied().collect(),
            action: if stop_on_entry {
                DebugAction::Step
            } else {
                DebugAction::Continue
            },
            last_break: None,
            frame: None,
            last_command: None,
            state: DebuggerState::NotStarted,
        }
    }

    #[must_use]
    pub fn state(&self) -> DebuggerState {
        self.state
    }

    /// The frame the session is suspended in.
    #[must_use]
    pub fn frame(&self) -> Option<&SuspendedFrame> {
        self.frame.as_ref()
    }

    #[must_use]
    pub fn current_line(&self) -> Option<u32> {
        self.frame.as_ref().map(|frame| frame.record.line)
    }

    /// Breakpoints in ascending order.
    #[must_use]
    pub fn breakpoints(&self) -> Vec<u32> {
        let mut lines: Vec<u32> = self.breakpoints.iter().copied().collect();
        lines.sort_unstable();
        lines
    }

    /// Replaces the breakpoint set wholesale.
    pub fn set_breakpoints(&mut self, lines: &[u32]) {
        self.breakpoints = lines.iter().copied().collect();
    }

    /// Runs one traced pass, stopping at the next break or at the end of the script.
    ///
    /// Output produced while replaying up to the previous break is suppressed
    /// through `muted`, which the host consults before forwarding output.
    /// Final bindings are merged into `env` when the script completes.
    pub fn drive<S: Sandbox>(
        &mut self,
        sandbox: &mut S,
        env: &mut Environment,
        host: &mut dyn Host,
        muted: &Cell<bool>,
    ) -> Result<DebugStop, SandboxError> {
        self.state = DebuggerState::Running;
        self.frame = None;
        let mut bindings = self.base.clone();
        let mut tracer = ReplayTracer {
            breakpoints: &self.breakpoints,
            action: self.action,
            resume_at: self.last_break,
            ordinal: 0,
            muted,
            stopped: None,
        };
        muted.set(self.last_break.is_some());
        let exit = sandbox.trace(&self.source, &mut bindings, host, &mut tracer);
        muted.set(false);
        let stopped = tracer.stopped;

        match exit {
            Ok(TraceExit::Completed) => {
                self.state = DebuggerState::Completed;
                env.merge(bindings);
                Ok(DebugStop::Completed)
            }
            Ok(TraceExit::Suspended(frame)) => {
                let Some(mark) = stopped else {
                    self.state = DebuggerState::Completed;
                    return Err(SandboxError::Crashed("trace suspended without a break request".to_owned()));
                };
                let line = frame.record.line;
                tracing::debug!(line, depth = mark.depth, ordinal = mark.ordinal, "debugger suspended");
                self.last_break = Some(mark);
                self.frame = Some(frame);
                self.state = DebuggerState::Suspended;
                Ok(DebugStop::Suspended { line })
            }
            Err(error) => {
                self.state = DebuggerState::Completed;
                Err(error)
            }
        }
    }

    /// Applies one command while suspended.
    ///
    /// Stepping commands only record the action; the caller then calls
    /// [`drive`](Self::drive) for the next pass. Everything else is answered
    /// through `host` output and leaves the session suspended.
    pub fn command<S: Sandbox>(&mut self, input: &str, sandbox: &mut S, host: &mut dyn Host) -> CommandOutcome {
        if self.state != DebuggerState::Suspended {
            host.write(OutputStream::Stderr, "*** not suspended\n");
            return CommandOutcome::Stay;
        }
        let command = match DebugCommand::parse(input) {
            Some(command) => command,
            None => match self.last_command.clone() {
                Some(command) => command,
                None => return CommandOutcome::Stay,
            },
        };
        self.last_command = Some(command.clone());

        match command {
            DebugCommand::Resume(action) => {
                self.action = action;
                CommandOutcome::Resume
            }
            DebugCommand::Break(line) => {
                self.breakpoints.insert(line);
                host.write(OutputStream::Stdout, &format!("Breakpoint at line {line}\n"));
                CommandOutcome::Stay
            }
            DebugCommand::Clear(Some(line)) => {
                if self.breakpoints.remove(&line) {
                    host.write(OutputStream::Stdout, &format!("Deleted breakpoint at line {line}\n"));
                } else {
                    host.write(OutputStream::Stderr, &format!("*** no breakpoint at line {line}\n"));
                }
                CommandOutcome::Stay
            }
            DebugCommand::Clear(None) => {
                self.breakpoints.clear();
                host.write(OutputStream::Stdout, "Deleted all breakpoints\n");
                CommandOutcome::Stay
            }
            DebugCommand::Where => {
                if let Some(frame) = &self.frame {
                    for record in frame.chain.iter().rev() {
                        host.write(
                            OutputStream::Stdout,
                            &format!("{} at line {}\n", record.function, record.line),
                        );
                    }
                }
                CommandOutcome::Stay
            }
            DebugCommand::Help => {
                host.write(OutputStream::Stdout, HELP);
                CommandOutcome::Stay
            }
            DebugCommand::Quit => {
                self.state = DebuggerState::Completed;
                self.frame = None;
                CommandOutcome::Quit
            }
            DebugCommand::Evaluate(code) => {
                if let Some(frame) = &mut self.frame
                    && let Err(error) = sandbox.evaluate(&code, &mut frame.bindings, host)
                {
                    host.write(OutputStream::Stderr, &format!("{error}\n"));
                }
                CommandOutcome::Stay
            }
        }
    }
}

/// Tracer for one pass: silent replay up to the previous break, then the current action.
#[derive(Debug)]
struct ReplayTracer<'d> {
    breakpoints: &'d AHashSet<u32>,
    action: DebugAction,
    resume_at: Option<BreakMark>,
    ordinal: usize,
    muted: &'d Cell<bool>,
    stopped: Option<BreakMark>,
}

impl ReplayTracer<'_> {
    fn should_break(&self, event: &LineEvent<'_>, anchor: usize) -> bool {
        let within_anchor = match self.action {
            DebugAction::Next => event.depth <= anchor,
            DebugAction::Return => event.depth < anchor,
            DebugAction::Step => return true,
            DebugAction::Continue => return self.breakpoints.contains(&event.line),
        };
        within_anchor || (event.depth <= anchor && self.breakpoints.contains(&event.line))
    }
}

impl LineTracer for ReplayTracer<'_> {
    fn on_line(&mut self, event: LineEvent<'_>) -> TraceControl {
        self.ordinal += 1;
        let anchor = match self.resume_at {
            Some(mark) if self.ordinal < mark.ordinal => return TraceControl::Continue,
            Some(mark) if self.ordinal == mark.ordinal => {
                // the previous pass stopped before this line ran; from here on output is new
                self.muted.set(false);
                return TraceControl::Continue;
            }
            Some(mark) => mark.depth,
            None => 0,
        };
        if self.should_break(&event, anchor) {
            self.stopped = Some(BreakMark {
                ordinal: self.ordinal,
                depth: event.depth,
            });
            TraceControl::Suspend
        } else {
            TraceControl::Continue
        }
    }
}
