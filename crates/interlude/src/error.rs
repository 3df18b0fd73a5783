//! Error types, separated by the stage of the pipeline that produced them.

use std::fmt;

/// A script failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    /// 1-based line of the offending token.
    pub line: u32,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyntaxError: {} (line {})", self.message, self.line)
    }
}

impl std::error::Error for CompileError {}

/// Nested scope in which an interactive input call is not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeConstruct {
    Function(String),
    Method(String),
    Class(String),
    Lambda,
    Comprehension,
}

impl fmt::Display for ScopeConstruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(name) => write!(f, "function '{name}'"),
            Self::Method(name) => write!(f, "method '{name}'"),
            Self::Class(name) => write!(f, "class '{name}'"),
            Self::Lambda => f.write_str("lambda"),
            Self::Comprehension => f.write_str("comprehension"),
        }
    }
}

/// `input()` was called somewhere other than straight-line top-level code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeViolation {
    /// Innermost construct enclosing the call.
    pub construct: ScopeConstruct,
    /// 1-based line of the call.
    pub line: u32,
}

impl fmt::Display for ScopeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ScopeViolation: input() is only supported at top level, found inside {} (line {})",
            self.construct, self.line
        )
    }
}

impl std::error::Error for ScopeViolation {}

/// Failure to turn a script into a continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    Compile(CompileError),
    Scope(ScopeViolation),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(error) => write!(f, "{error}"),
            Self::Scope(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for TransformError {}

impl From<CompileError> for TransformError {
    fn from(error: CompileError) -> Self {
        Self::Compile(error)
    }
}

impl From<ScopeViolation> for TransformError {
    fn from(error: ScopeViolation) -> Self {
        Self::Scope(error)
    }
}

/// An exception raised by script code inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    /// Exception type name, e.g. `ZeroDivisionError`.
    pub exc_type: String,
    pub message: String,
    /// Line at which the exception escaped, when known.
    pub line: Option<u32>,
}

impl Exception {
    #[must_use]
    pub fn new(exc_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exc_type: exc_type.into(),
            message: message.into(),
            line: None,
        }
    }

    #[must_use]
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.exc_type)?;
        } else {
            write!(f, "{}: {}", self.exc_type, self.message)?;
        }
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}

/// Failure reported by the sandboxed interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// The script did not compile inside the sandbox.
    Compile(CompileError),
    /// The script raised an exception.
    Runtime(Exception),
    /// An import could not be satisfied by the modules currently available.
    MissingCapability { name: String },
    /// The script was stopped through an [`Interrupt`](crate::Interrupt).
    Interrupted,
    /// The sandbox itself is unusable; the host must recreate the engine.
    Crashed(String),
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(error) => write!(f, "{error}"),
            Self::Runtime(error) => write!(f, "{error}"),
            Self::MissingCapability { name } => write!(f, "ModuleNotFoundError: No module named '{name}'"),
            Self::Interrupted => f.write_str("KeyboardInterrupt: execution interrupted"),
            Self::Crashed(reason) => write!(f, "sandbox crashed: {reason}"),
        }
    }
}

impl std::error::Error for SandboxError {}

impl From<Exception> for SandboxError {
    fn from(error: Exception) -> Self {
        Self::Runtime(error)
    }
}

impl From<CompileError> for SandboxError {
    fn from(error: CompileError) -> Self {
        Self::Compile(error)
    }
}

/// A capability could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub name: String,
    pub reason: String,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not fetch '{}': {}", self.name, self.reason)
    }
}

impl std::error::Error for FetchError {}

/// Failure of a file-store backend.
#[derive(Debug)]
pub enum StoreError {
    /// The name cannot be mapped onto the backend (empty, absolute, `..`).
    InvalidName(String),
    Io(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid file name: {name:?}"),
            Self::Io(error) => write!(f, "file store error: {error}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidName(_) => None,
            Self::Io(error) => Some(error),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

/// Failure of a virtual file operation, mapped by the sandbox onto its own exceptions.
#[derive(Debug)]
pub enum FileError {
    NotFound(String),
    AlreadyExists(String),
    InvalidMode(String),
    NotReadable,
    NotWritable,
    Closed,
    Store(StoreError),
}

impl FileError {
    /// Exception type the sandboxed language raises for this failure.
    #[must_use]
    pub fn exc_type(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "FileNotFoundError",
            Self::AlreadyExists(_) => "FileExistsError",
            Self::InvalidMode(_) | Self::Closed => "ValueError",
            Self::NotReadable | Self::NotWritable => "UnsupportedOperation",
            Self::Store(_) => "OSError",
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "No such file or directory: '{name}'"),
            Self::AlreadyExists(name) => write!(f, "File exists: '{name}'"),
            Self::InvalidMode(mode) => write!(f, "invalid mode: '{mode}'"),
            Self::NotReadable => f.write_str("not readable"),
            Self::NotWritable => f.write_str("not writable"),
            Self::Closed => f.write_str("I/O operation on closed file."),
            Self::Store(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for FileError {}

impl From<StoreError> for FileError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

impl From<FileError> for Exception {
    fn from(error: FileError) -> Self {
        Self::new(error.exc_type(), error.to_string())
    }
}

/// Errors surfaced by [`Engine`](crate::Engine) operations that are not script outcomes.
#[derive(Debug)]
pub enum EngineError {
    /// The requested operation needs a session state the engine is not in.
    InvalidState {
        operation: &'static str,
        state: crate::SessionState,
    },
    /// The script was rejected before running.
    Transform(TransformError),
    Sandbox(SandboxError),
    Store(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState { operation, state } => write!(f, "cannot {operation} while session is {state}"),
            Self::Transform(error) => write!(f, "{error}"),
            Self::Sandbox(error) => write!(f, "{error}"),
            Self::Store(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<SandboxError> for EngineError {
    fn from(error: SandboxError) -> Self {
        Self::Sandbox(error)
    }
}

impl From<TransformError> for EngineError {
    fn from(error: TransformError) -> Self {
        Self::Transform(error)
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}
