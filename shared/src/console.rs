//! Display capability injected into the protocol engines

use std::sync::{Mutex, MutexGuard};

/// Something that can show a message to the local operator
pub trait Console: Send + Sync {
    fn display(&self, message: &str);
}

/// Writes every message to stdout as `> message`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn display(&self, message: &str) {
        println!("> {}", message);
    }
}

/// Keeps displayed messages in memory so they can be inspected later
#[derive(Debug, Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<String>>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything displayed so far
    pub fn lines(&self) -> Vec<String> {
        self.guard().clone()
    }

    /// Returns true if any displayed message equals `message`
    pub fn contains(&self, message: &str) -> bool {
        self.guard().iter().any(|line| line == message)
    }

    pub fn last(&self) -> Option<String> {
        self.guard().last().cloned()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }

    fn guard(&self) -> MutexGuard<'_, Vec<String>> {
        // A panic while holding the lock leaves the Vec intact
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Console for RecordingConsole {
    fn display(&self, message: &str) {
        self.guard().push(message.to_string());
    }
}
