//! Message transport for [`interlude`] engines.
//!
//! An engine runs on a worker thread and talks to its host only through
//! [`HostCommand`]s and [`EngineMessage`]s, both JSON-serializable. The host
//! side, [`WorkerHandle`], enforces a per-command timeout by tearing the worker
//! down and starting a fresh one on the next command.

mod coalesce;
mod config;
mod master;
mod protocol;
mod worker;

pub use crate::{
    coalesce::OutputCoalescer,
    config::{ConfigError, OUTPUT_RATE_VAR, TIMEOUT_VAR, WorkerConfig},
    master::WorkerHandle,
    protocol::{EngineMessage, HostCommand, Phase},
    worker::{ChannelObserver, SpawnedWorker, Worker, spawn},
};
