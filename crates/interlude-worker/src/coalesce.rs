//! Batching of script output into `print` messages.
//!
//! The first write after a flush opens a window of `rate`; writes landing
//! inside the window are appended to the same buffer and the first update after
//! the window closes sends everything as one message. A forced update flushes
//! immediately; the worker forces one whenever a command settles.

use std::time::{Duration, Instant};

use crate::protocol::EngineMessage;

#[derive(Debug, Clone)]
pub struct OutputCoalescer {
    rate: Duration,
    buffer: String,
    /// A clear is pending and goes out before any buffered text.
    clear: bool,
    /// When the current window closes; `None` when no flush is scheduled.
    deadline: Option<Instant>,
}

impl OutputCoalescer {
    #[must_use]
    pub fn new(rate: Duration) -> Self {
        Self {
            rate,
            buffer: String::new(),
            clear: false,
            deadline: None,
        }
    }

    /// Buffers `text`, returning whatever became due.
    pub fn push(&mut self, text: &str, now: Instant) -> Vec<EngineMessage> {
        self.buffer.push_str(text);
        self.update(false, now)
    }

    /// Drops buffered text and queues a clear.
    pub fn clear(&mut self, now: Instant) -> Vec<EngineMessage> {
        self.buffer.clear();
        self.clear = true;
        self.update(false, now)
    }

    /// Schedules a flush if none is pending, or flushes when the window has
    /// closed or `forced` is set.
    pub fn update(&mut self, forced: bool, now: Instant) -> Vec<EngineMessage> {
        if forced {
            self.deadline = Some(now);
        }
        match self.deadline {
            None => {
                self.deadline = Some(now + self.rate);
                Vec::new()
            }
            Some(deadline) if deadline <= now => self.flush(),
            Some(_) => Vec::new(),
        }
    }

    /// When the pending flush becomes due.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && !self.clear
    }

    fn flush(&mut self) -> Vec<EngineMessage> {
        self.deadline = None;
        let mut messages = Vec::with_capacity(2);
        if std::mem::take(&mut self.clear) {
            messages.push(EngineMessage::Clear);
        }
        if !self.buffer.is_empty() {
            messages.push(EngineMessage::Print {
                text: std::mem::take(&mut self.buffer),
            });
        }
        messages
    }
}
