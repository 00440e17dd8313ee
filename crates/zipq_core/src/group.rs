//! Group completion bookkeeping.
//!
//! A group fires its callback once no member task is queued or running. The
//! callback closure itself lives with the caller-facing engine; the core
//! only records whether one is registered.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::TaskOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupEntry {
    pub has_callback: bool,
    pub completed: usize,
    pub failed: usize,
    pub total_elapsed: Duration,
    pub bytes: u64,
}

impl GroupEntry {
    pub fn resolved(&self) -> usize {
        self.completed + self.failed
    }
}

/// Aggregate handed to a group callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub completed: usize,
    pub failed: usize,
    pub total_elapsed: Duration,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupTable {
    entries: BTreeMap<String, GroupEntry>,
}

impl GroupTable {
    pub fn ensure(&mut self, name: &str) {
        if !self.entries.contains_key(name) {
            self.entries.insert(name.to_string(), GroupEntry::default());
        }
    }

    pub fn set_callback(&mut self, name: &str) {
        self.ensure(name);
        if let Some(entry) = self.entries.get_mut(name) {
            entry.has_callback = true;
        }
    }

    pub fn get(&self, name: &str) -> Option<&GroupEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn record(&mut self, outcome: &TaskOutcome, bytes: u64) {
        self.ensure(&outcome.group);
        if let Some(entry) = self.entries.get_mut(&outcome.group) {
            if outcome.success() {
                entry.completed += 1;
                entry.bytes = entry.bytes.saturating_add(bytes);
            } else {
                entry.failed += 1;
            }
            entry.total_elapsed += outcome.elapsed;
        }
    }

    /// Removes and summarizes the group if it has a callback and nothing of
    /// it is left in flight.
    pub fn take_if_complete(&mut self, name: &str, remaining: usize) -> Option<GroupSummary> {
        let entry = self.entries.get(name)?;
        if remaining > 0 || !entry.has_callback {
            return None;
        }
        self.entries
            .remove(name)
            .map(|entry| summarize(name.to_string(), entry))
    }

    /// Called once the scheduler is idle: summarizes every group that has a
    /// callback and resolved members, forgets groups without a callback, and
    /// keeps callbacks registered ahead of their first task.
    pub fn drain_idle(&mut self) -> Vec<GroupSummary> {
        let mut fired = Vec::new();
        let entries = std::mem::take(&mut self.entries);
        for (name, entry) in entries {
            match (entry.has_callback, entry.resolved()) {
                (true, 0) => {
                    self.entries.insert(name, entry);
                }
                (true, _) => fired.push(summarize(name, entry)),
                (false, _) => {}
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn summarize(name: String, entry: GroupEntry) -> GroupSummary {
    GroupSummary {
        name,
        completed: entry.completed,
        failed: entry.failed,
        total_elapsed: entry.total_elapsed,
        bytes: entry.bytes,
    }
}
