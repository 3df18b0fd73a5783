use serde::{Deserialize, Serialize};

/// Stream a script wrote to. Both end up in the same session output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives engine events as they happen.
///
/// Every method has a no-op default so implementations only override the
/// events they care about. The engine calls these synchronously from inside a
/// run, so implementations must not block.
pub trait EngineObserver {
    /// Called for every chunk of visible script output.
    ///
    /// Output suppressed during debugger replay never reaches this hook.
    fn on_output(&mut self, _stream: OutputStream, _text: &str) {}

    /// The accumulated output was cleared.
    fn on_clear(&mut self) {}

    /// A figure is ready, as a data URL. The transparent placeholder means "no figure".
    fn on_figure(&mut self, _data_url: &str) {}

    /// A virtual file was modified for the first time since the last drain.
    fn on_dirty(&mut self, _path: &str) {}

    /// A capability fetch is about to start.
    fn on_fetch(&mut self, _name: &str) {}

    /// A capability fetch finished, successfully or not.
    fn on_capability(&mut self, _name: &str, _loaded: bool) {}

    /// The command failed with `message`, which the session output also records.
    ///
    /// Defaults to reporting the message as one line of stderr output.
    fn on_failure(&mut self, message: &str) {
        self.on_output(OutputStream::Stderr, &format!("{message}\n"));
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}

/// One event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Output(OutputStream, String),
    Clear,
    Figure(String),
    Dirty(String),
    Fetch(String),
    Capability { name: String, loaded: bool },
}

/// Observer that records every event in order, for inspection after a run.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Vec<EngineEvent>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[EngineEvent] {
        &self.events
    }

    /// Concatenation of all recorded output, both streams.
    #[must_use]
    pub fn output(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                EngineEvent::Output(_, text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn take(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }
}

impl EngineObserver for RecordingObserver {
    fn on_output(&mut self, stream: OutputStream, text: &str) {
        self.events.push(EngineEvent::Output(stream, text.to_owned()));
    }

    fn on_clear(&mut self) {
        self.events.push(EngineEvent::Clear);
    }

    fn on_figure(&mut self, data_url: &str) {
        self.events.push(EngineEvent::Figure(data_url.to_owned()));
    }

    fn on_dirty(&mut self, path: &str) {
        self.events.push(EngineEvent::Dirty(path.to_owned()));
    }

    fn on_fetch(&mut self, name: &str) {
        self.events.push(EngineEvent::Fetch(name.to_owned()));
    }

    fn on_capability(&mut self, name: &str, loaded: bool) {
        self.events.push(EngineEvent::Capability {
            name: name.to_owned(),
            loaded,
        });
    }
}
