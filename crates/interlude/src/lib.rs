#![doc = include_str!("../../../README.md")]

pub mod capability;
mod config;
pub mod debugger;
mod engine;
mod environment;
mod error;
pub mod fs;
mod io;
mod sandbox;
mod session;
pub mod tracer;
pub mod transform;
mod value;

pub use crate::{
    capability::CapabilityResolver,
    config::EngineConfig,
    debugger::{CommandOutcome, DebugAction, DebugCommand, DebugStop, DebuggerState, StepDebugger},
    engine::{Engine, PLACEHOLDER_FIGURE, RunOutcome},
    environment::Environment,
    error::{
        CompileError, EngineError, Exception, FetchError, FileError, SandboxError, ScopeConstruct, ScopeViolation,
        StoreError, TransformError,
    },
    fs::{DirectoryStore, DirtyFiles, FileStore, MemoryStore, OpenMode, VirtualFile},
    io::{EngineEvent, EngineObserver, NoopObserver, OutputStream, RecordingObserver},
    sandbox::{FrameRecord, Host, Interrupt, Progress, Sandbox, SuspendedFrame, TraceExit},
    session::{RunMode, Session, SessionState, SuspensionPoint},
    tracer::{LineEvent, LineTracer, NoopTracer, RecordingTracer, TraceControl, TraceEvent},
    transform::{Continuation, prepare_plain, transform},
    value::Value,
};
