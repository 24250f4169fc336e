//! Bounded ring buffer capturing a backend child process's recent stdout and
//! stderr lines for diagnostics, without ever exerting backpressure on the
//! process itself.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Default number of lines retained per backend.
pub const DEFAULT_TAIL_LINES: usize = 200;

/// A ring buffer of the last N lines a backend process has written.
///
/// Readers push lines from independent stdout/stderr reader tasks; pushing
/// never blocks and never grows unboundedly.
pub struct LogTail {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogTail {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Push one line, evicting the oldest if at capacity.
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Snapshot of the current tail, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Joined tail text, suitable for embedding in a start-failure message.
    #[must_use]
    pub fn snapshot_text(&self) -> String {
        self.snapshot().join("\n")
    }
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_LINES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_over_capacity() {
        let tail = LogTail::new(3);
        for i in 0..5 {
            tail.push(format!("line {i}"));
        }
        assert_eq!(tail.snapshot(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn snapshot_text_joins_with_newlines() {
        let tail = LogTail::new(10);
        tail.push("a".into());
        tail.push("b".into());
        assert_eq!(tail.snapshot_text(), "a\nb");
    }
}
