//! The host side of the transport.
//!
//! [`WorkerHandle`] owns at most one live worker, creating it lazily from a
//! sandbox factory. Each dispatched command is bounded by the configured
//! timeout: when it expires the worker is torn down and the host receives
//! [`EngineMessage::Timeout`]. A worker whose previous command was abandoned
//! mid-flight is replaced before the next command is sent.

use std::marker::PhantomData;

use interlude::{EngineConfig, Sandbox};
use tracing::{info, warn};

use crate::{
    config::WorkerConfig,
    protocol::{EngineMessage, HostCommand},
    worker::{SpawnedWorker, spawn},
};

pub struct WorkerHandle<S, F> {
    factory: F,
    engine_config: EngineConfig,
    config: WorkerConfig,
    live: Option<SpawnedWorker>,
    /// A command was sent and its `Done` has not been seen.
    busy: bool,
    _sandbox: PhantomData<fn() -> S>,
}

impl<S, F> WorkerHandle<S, F>
where
    S: Sandbox + 'static,
    F: FnMut() -> S,
{
    #[must_use]
    pub fn new(factory: F, engine_config: EngineConfig, config: WorkerConfig) -> Self {
        Self {
            factory,
            engine_config,
            config,
            live: None,
            busy: false,
            _sandbox: PhantomData,
        }
    }

    /// Whether a worker is currently running.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Sends `command` and collects the messages answering it.
    pub async fn dispatch(&mut self, command: HostCommand) -> Vec<EngineMessage> {
        let mut messages = Vec::new();
        self.dispatch_to(command, |message| messages.push(message)).await;
        messages
    }

    /// Sends `command` and passes each answering message to `sink`, up to and
    /// including the terminal one.
    pub async fn dispatch_to(&mut self, command: HostCommand, mut sink: impl FnMut(EngineMessage)) {
        if self.busy || self.live.is_none() {
            self.restart();
        }
        self.busy = true;
        let Some(live) = self.live.as_mut() else {
            return;
        };
        if live.commands.send(command).await.is_err() {
            warn!("worker is gone, dropping command");
            self.stop();
            sink(EngineMessage::Error {
                message: "worker stopped unexpectedly".to_owned(),
            });
            sink(EngineMessage::Done);
            return;
        }

        let forward = async {
            while let Some(message) = live.messages.recv().await {
                let terminal = message.is_terminal();
                sink(message);
                if terminal {
                    return true;
                }
            }
            false
        };
        let finished = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, forward).await.ok(),
            None => Some(forward.await),
        };

        match finished {
            Some(true) => self.busy = false,
            Some(false) => {
                warn!("worker exited mid-command");
                self.stop();
                sink(EngineMessage::Error {
                    message: "worker stopped unexpectedly".to_owned(),
                });
                sink(EngineMessage::Done);
            }
            None => {
                warn!(timeout = ?self.config.timeout, "command timed out, stopping worker");
                self.stop();
                sink(EngineMessage::Timeout);
            }
        }
    }

    /// Tears down the live worker. Returns `false` when none was running.
    pub fn stop(&mut self) -> bool {
        self.busy = false;
        match self.live.take() {
            Some(live) => {
                live.terminate();
                info!("worker stopped");
                true
            }
            None => false,
        }
    }

    fn restart(&mut self) {
        self.stop();
        info!("starting worker");
        self.live = Some(spawn((self.factory)(), self.engine_config.clone(), &self.config));
    }
}
