//! The worker side of the transport.
//!
//! A [`Worker`] owns an [`Engine`] and serves [`HostCommand`]s from a channel,
//! answering each with [`EngineMessage`]s that end in [`EngineMessage::Done`].
//! Script output goes through an [`OutputCoalescer`] so a chatty script sends a
//! handful of `print` messages instead of one per write.
//!
//! [`spawn`] runs the worker on its own OS thread with a single-threaded
//! runtime, so a script that never yields cannot stall the host's runtime and
//! the host's timeout keeps firing.

use std::{
    thread,
    time::{Duration, Instant},
};

use interlude::{Engine, EngineConfig, EngineObserver, Interrupt, OutputStream, RunOutcome, Sandbox, SessionState};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::{
    coalesce::OutputCoalescer,
    config::WorkerConfig,
    protocol::{EngineMessage, HostCommand, Phase},
};

/// Observer forwarding engine events to the host as messages.
#[derive(Debug)]
pub struct ChannelObserver {
    messages: mpsc::UnboundedSender<EngineMessage>,
    coalescer: OutputCoalescer,
}

impl ChannelObserver {
    #[must_use]
    pub fn new(messages: mpsc::UnboundedSender<EngineMessage>, output_rate: Duration) -> Self {
        Self {
            messages,
            coalescer: OutputCoalescer::new(output_rate),
        }
    }

    pub fn send(&self, message: EngineMessage) {
        if self.messages.send(message).is_err() {
            debug!("host went away, dropping message");
        }
    }

    /// Sends any buffered output right away.
    pub fn flush(&mut self) {
        let due = self.coalescer.update(true, Instant::now());
        self.send_all(due);
    }

    fn send_all(&self, messages: Vec<EngineMessage>) {
        for message in messages {
            self.send(message);
        }
    }
}

impl EngineObserver for ChannelObserver {
    fn on_output(&mut self, _stream: OutputStream, text: &str) {
        let due = self.coalescer.push(text, Instant::now());
        self.send_all(due);
    }

    fn on_clear(&mut self) {
        let due = self.coalescer.clear(Instant::now());
        self.send_all(due);
    }

    fn on_figure(&mut self, data_url: &str) {
        self.flush();
        self.send(EngineMessage::Figure {
            data_url: data_url.to_owned(),
        });
    }

    fn on_dirty(&mut self, path: &str) {
        self.flush();
        self.send(EngineMessage::Dirty { path: path.to_owned() });
    }

    fn on_fetch(&mut self, name: &str) {
        self.flush();
        debug!(capability = name, "reporting fetch");
        self.send(EngineMessage::Status { phase: Phase::Fetching });
    }

    fn on_failure(&mut self, message: &str) {
        self.flush();
        self.send(EngineMessage::Error {
            message: message.to_owned(),
        });
    }

    fn on_capability(&mut self, name: &str, loaded: bool) {
        debug!(capability = name, loaded, "capability resolved");
        if loaded {
            self.send(EngineMessage::Status { phase: Phase::Running });
        }
    }
}

/// An engine serving host commands.
pub struct Worker<S: Sandbox> {
    engine: Engine<S, ChannelObserver>,
    loaded: bool,
}

impl<S: Sandbox> Worker<S> {
    #[must_use]
    pub fn new(engine: Engine<S, ChannelObserver>) -> Self {
        Self { engine, loaded: false }
    }

    #[must_use]
    pub fn engine(&self) -> &Engine<S, ChannelObserver> {
        &self.engine
    }

    /// Serves commands until the host drops its sender.
    pub async fn serve(mut self, mut commands: mpsc::Receiver<HostCommand>) {
        info!("worker started");
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
        info!("worker stopped");
    }

    /// Handles one command, ending with [`EngineMessage::Done`].
    pub async fn handle(&mut self, command: HostCommand) {
        debug!(?command, "handling command");
        match command {
            HostCommand::Run { code: None, .. } | HostCommand::Preload => self.ensure_loaded(),
            HostCommand::Run {
                code: Some(code),
                breakpoints,
            } => {
                self.ensure_loaded();
                self.status(Phase::Running);
                let outcome = self.engine.run(&code, &breakpoints).await;
                self.report(outcome);
                return;
            }
            HostCommand::Submit { value } => {
                self.running_if(SessionState::AwaitingInput);
                match self.engine.submit(&value).await {
                    Ok(outcome) => {
                        self.report(outcome);
                        return;
                    }
                    Err(error) => self.error(error.to_string()),
                }
            }
            HostCommand::Cancel => {
                if self.engine.cancel() {
                    self.status(Phase::Idle);
                }
            }
            HostCommand::ContinueDebug { command, breakpoints } => {
                self.running_if(SessionState::Suspended);
                match self.engine.continue_debug(&command, breakpoints.as_deref()).await {
                    Ok(outcome) => {
                        self.report(outcome);
                        return;
                    }
                    Err(error) => self.error(error.to_string()),
                }
            }
            HostCommand::GetFile { path } => match self.engine.get_file(&path) {
                Ok(content) => self.send(EngineMessage::File { path, content }),
                Err(error) => self.error(error.to_string()),
            },
            HostCommand::PutFile { path, content } => {
                if let Err(error) = self.engine.put_file(&path, &content) {
                    self.error(error.to_string());
                }
            }
            HostCommand::ClearFigure => {
                self.engine.clear_figure();
            }
            HostCommand::Clear => self.engine.clear(),
        }
        self.done();
    }

    fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.status(Phase::Loading);
        match self.engine.preload() {
            Ok(()) => self.loaded = true,
            Err(error) => self.error(error.to_string()),
        }
    }

    /// Reports where a run, submit or debug command settled.
    fn report(&mut self, outcome: RunOutcome) {
        // re-arm dirty notifications for the next command
        self.engine.take_dirty_files();
        match outcome {
            RunOutcome::Completed => self.status(Phase::Idle),
            RunOutcome::AwaitingInput { prompt } => {
                self.status(Phase::AwaitingInput);
                self.send(EngineMessage::Input { prompt });
            }
            RunOutcome::SuspendedAtBreakpoint { line } => {
                self.status(Phase::Debugging);
                self.send(EngineMessage::DebugBreak { line });
            }
            // the observer already sent the error
            RunOutcome::Failed { .. } => self.status(Phase::Idle),
        }
        self.done();
    }

    /// Reports `Running` when the session is in the state the command resumes from.
    fn running_if(&mut self, state: SessionState) {
        if self.engine.state() == state {
            self.status(Phase::Running);
        }
    }

    fn status(&mut self, phase: Phase) {
        self.send(EngineMessage::Status { phase });
    }

    fn error(&mut self, message: String) {
        self.send(EngineMessage::Error { message });
    }

    fn done(&mut self) {
        self.send(EngineMessage::Done);
    }

    /// Sends `message` after any output that precedes it.
    fn send(&mut self, message: EngineMessage) {
        let observer = self.engine.observer_mut();
        observer.flush();
        observer.send(message);
    }
}

/// Channels and thread of a spawned worker.
#[derive(Debug)]
pub struct SpawnedWorker {
    pub commands: mpsc::Sender<HostCommand>,
    pub messages: mpsc::UnboundedReceiver<EngineMessage>,
    interrupt: Interrupt,
    shutdown: oneshot::Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl SpawnedWorker {
    /// Tears the worker down without waiting for it.
    ///
    /// A script stuck in a loop is interrupted at its next statement and a
    /// worker parked at an await is dropped. The thread is detached.
    pub fn terminate(self) {
        self.interrupt.trigger();
        // dropping the sender wakes the shutdown arm of the serve loop
        drop(self.shutdown);
        if self.thread.is_finished() {
            debug!("worker thread already exited");
        }
    }
}

/// Spawns a worker for `sandbox` on a dedicated thread.
pub fn spawn<S>(sandbox: S, engine_config: EngineConfig, config: &WorkerConfig) -> SpawnedWorker
where
    S: Sandbox + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(config.channel_capacity.max(1));
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let observer = ChannelObserver::new(message_tx, config.output_rate);
    let engine = Engine::new(sandbox, observer, engine_config);
    let interrupt = engine.interrupt_handle();
    let worker = Worker::new(engine);

    let thread = thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(error = %err, "failed to build worker runtime");
                return;
            }
        };
        runtime.block_on(async move {
            tokio::select! {
                () = worker.serve(command_rx) => {}
                _ = shutdown_rx => info!("worker shut down"),
            }
        });
    });

    SpawnedWorker {
        commands: command_tx,
        messages: message_rx,
        interrupt,
        shutdown: shutdown_tx,
        thread,
    }
}
