//! Bounded, order-preserving log of sent commands.
//!
//! The dispatcher appends an entry when a command goes onto the wire and
//! fills in the result when the reply terminator arrives. UI-like consumers
//! read immutable snapshots and may persist the log to a file on demand.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Completion state of a logged command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandState {
    /// Written to the wire, terminator not yet seen.
    Pending,
    /// Acknowledged by the ok tag.
    Ok,
    /// Terminated by a firmware `error:` line.
    Error,
    /// No terminator within the deadline.
    TimedOut,
    /// Connection dropped before a terminator arrived.
    Failed,
}

/// One command as recorded in the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentCommand {
    /// Command text as written to the wire.
    pub text: String,
    /// When the command was written, if it made it that far.
    pub sent_at: Option<DateTime<Local>>,
    /// Accumulated reply text.
    pub result: String,
    /// Completion state.
    pub state: CommandState,
}

/// Capacity-capped ring of [`SentCommand`] entries, oldest first.
#[derive(Debug)]
pub struct CommandHistory {
    entries: VecDeque<SentCommand>,
    limit: usize,
}

impl CommandHistory {
    pub fn new(limit: usize) -> Self {
        CommandHistory {
            entries: VecDeque::with_capacity(limit.min(256)),
            limit,
        }
    }

    /// Record a command going onto the wire.
    pub fn append(&mut self, text: &str) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(SentCommand {
            text: text.to_string(),
            sent_at: Some(Local::now()),
            result: String::new(),
            state: CommandState::Pending,
        });
    }

    /// Fill in the outcome of the most recently appended command.
    ///
    /// Commands resolve strictly in send order, so the open entry is always
    /// the newest one.
    pub fn resolve_last(&mut self, result: &str, state: CommandState) {
        if let Some(entry) = self.entries.back_mut() {
            if entry.state == CommandState::Pending {
                entry.result = result.to_string();
                entry.state = state;
            }
        }
    }

    /// Immutable copy for concurrent readers.
    pub fn snapshot(&self) -> Vec<SentCommand> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the history to a file, one tab-separated line per command.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for entry in &self.entries {
            let ts = entry
                .sent_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                .unwrap_or_default();
            writeln!(
                out,
                "{}\t{}\t{:?}\t{}",
                ts,
                entry.text,
                entry.state,
                entry.result.replace('\n', "|")
            )?;
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_preserves_order() {
        let mut history = CommandHistory::new(3);
        for text in ["a", "b", "c", "d"] {
            history.append(text);
            history.resolve_last("ok", CommandState::Ok);
        }
        let texts: Vec<_> = history.snapshot().into_iter().map(|c| c.text).collect();
        assert_eq!(texts, ["b", "c", "d"]);
    }

    #[test]
    fn resolve_only_touches_open_entry() {
        let mut history = CommandHistory::new(10);
        history.append("G0 X1");
        history.resolve_last("ok", CommandState::Ok);
        history.resolve_last("late line", CommandState::Error);
        let snap = history.snapshot();
        assert_eq!(snap[0].state, CommandState::Ok);
        assert_eq!(snap[0].result, "ok");
    }

    #[test]
    fn snapshot_is_isolated_from_clear() {
        let mut history = CommandHistory::new(10);
        history.append("M3");
        let snap = history.snapshot();
        history.clear();
        assert!(history.is_empty());
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn snapshot_serializes() {
        let mut history = CommandHistory::new(10);
        history.append("G28");
        history.resolve_last("ok", CommandState::Ok);
        let json = serde_json::to_string(&history.snapshot()).unwrap();
        assert!(json.contains("\"G28\""));
    }

    #[test]
    fn save_writes_one_line_per_command() {
        let mut history = CommandHistory::new(10);
        history.append("G0 X1");
        history.resolve_last("ok", CommandState::Ok);
        history.append("$?");
        history.resolve_last("$1=10\nok", CommandState::Ok);

        let path = std::env::temp_dir().join("cnc_link_history_test.txt");
        history.save(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("$1=10|ok"));
    }
}
