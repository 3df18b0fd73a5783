//! Messages exchanged across the worker boundary.
//!
//! Both directions are internally tagged on `cmd`, so they serialize to JSON
//! objects such as `{"cmd": "print", "text": "hello\n"}`.

use serde::{Deserialize, Serialize};

/// A command from the host to the worker.
///
/// Every command is answered by zero or more [`EngineMessage`]s followed by
/// exactly one [`EngineMessage::Done`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostCommand {
    /// Runs a script. Without code this only loads the sandbox.
    Run {
        #[serde(default)]
        code: Option<String>,
        /// A non-empty list runs the script under the debugger.
        #[serde(default)]
        breakpoints: Vec<u32>,
    },
    Submit {
        value: String,
    },
    Cancel,
    ContinueDebug {
        command: String,
        #[serde(default)]
        breakpoints: Option<Vec<u32>>,
    },
    GetFile {
        path: String,
    },
    PutFile {
        path: String,
        content: String,
    },
    ClearFigure,
    Preload,
    /// Clears the output and the figure.
    Clear,
}

impl HostCommand {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Coarse state of the worker, reported as it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    Loading,
    Running,
    AwaitingInput,
    Debugging,
    Fetching,
    Idle,
}

/// A message from the worker to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineMessage {
    Status {
        phase: Phase,
    },
    /// Coalesced script output.
    Print {
        text: String,
    },
    /// The host should empty its output view.
    Clear,
    Figure {
        data_url: String,
    },
    /// A virtual file was modified.
    Dirty {
        path: String,
    },
    Input {
        prompt: Option<String>,
    },
    DebugBreak {
        line: u32,
    },
    /// Answer to [`HostCommand::GetFile`]; `content` is `None` for a missing file.
    File {
        path: String,
        content: Option<String>,
    },
    /// A command failed. A failed run reports its message only here, not as `print`.
    Error {
        message: String,
    },
    /// The command finished.
    Done,
    /// Sent by the master handle when the worker was torn down after a timeout.
    Timeout,
}

impl EngineMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Whether this message ends the answer to a command.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Timeout)
    }
}
