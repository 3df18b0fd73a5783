use crate::{capability::CapabilityResolver, debugger::StepDebugger, environment::Environment, value::Value};

/// Suspension state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Running,
    AwaitingInput,
    AwaitingCapability,
    /// Stopped in the debugger.
    Suspended,
    Done,
    Failed,
}

/// How a script is executed, chosen per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    /// Run directly against the environment.
    Plain,
    /// Rewritten into a continuation that suspends at `input()` calls.
    Interactive,
    /// Traced under the step debugger.
    Debug,
}

/// A decoded call of the suspension primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspensionPoint {
    /// Set by the final suspension appended after the script body.
    pub done: bool,
    pub prompt: Option<Value>,
    /// Top-level bindings when the script suspended.
    pub snapshot: Environment,
}

impl SuspensionPoint {
    /// Decodes `(done, prompt)` call arguments. Missing arguments read as
    /// `done = false` and no prompt.
    #[must_use]
    pub fn from_args(args: Vec<Value>, snapshot: Environment) -> Self {
        let mut args = args.into_iter();
        let done = args.next().is_some_and(|value| value.is_truthy());
        let prompt = args.next().filter(|value| *value != Value::None);
        Self { done, prompt, snapshot }
    }

    /// Prompt as the user sees it, `str()` of the prompt value.
    #[must_use]
    pub fn prompt_text(&self) -> Option<String> {
        self.prompt.as_ref().map(ToString::to_string)
    }
}

/// Live state of one script run.
///
/// Bindings and capability sets outlive a single run: [`Session::restart`]
/// carries them into the next session, since the sandbox keeps its globals
/// and loaded modules between runs.
#[derive(Debug)]
pub struct Session<P> {
    pub(crate) script: String,
    pub(crate) mode: RunMode,
    pub(crate) breakpoints: Vec<u32>,
    pub(crate) environment: Environment,
    pub(crate) capabilities: CapabilityResolver,
    pub(crate) output: String,
    pub(crate) state: SessionState,
    pub(crate) prompt: Option<String>,
    pub(crate) debug_line: Option<u32>,
    /// Paused continuation awaiting `submit`.
    pub(crate) pending: Option<P>,
    pub(crate) debugger: Option<StepDebugger>,
}

impl<P> Default for Session<P> {
    fn default() -> Self {
        Self {
            script: String::new(),
            mode: RunMode::Plain,
            breakpoints: Vec::new(),
            environment: Environment::new(),
            capabilities: CapabilityResolver::new(),
            output: String::new(),
            state: SessionState::Idle,
            prompt: None,
            debug_line: None,
            pending: None,
            debugger: None,
        }
    }
}

impl<P> Session<P> {
    /// Replaces this session with a fresh one for `script`, keeping bindings
    /// and capability sets.
    pub(crate) fn restart(&mut self, script: &str, mode: RunMode, breakpoints: &[u32]) {
        let environment = std::mem::take(&mut self.environment);
        let capabilities = std::mem::take(&mut self.capabilities);
        *self = Self {
            script: script.to_owned(),
            mode,
            breakpoints: breakpoints.to_vec(),
            environment,
            capabilities,
            ..Self::default()
        };
    }

    /// Drops any continuation or debugger; nothing can be resumed afterwards.
    pub(crate) fn abandon(&mut self, state: SessionState) {
        self.pending = None;
        self.debugger = None;
        self.prompt = None;
        self.debug_line = None;
        self.state = state;
    }

    #[must_use]
    pub fn script(&self) -> &str {
        &self.script
    }

    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    #[must_use]
    pub fn capabilities(&self) -> &CapabilityResolver {
        &self.capabilities
    }

    /// Output accumulated over every attempt of this run, retries included.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    #[must_use]
    pub fn debug_line(&self) -> Option<u32> {
        self.debug_line
    }

    #[must_use]
    pub fn debugger(&self) -> Option<&StepDebugger> {
        self.debugger.as_ref()
    }
}
