//! Run report written after a batch finishes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use zipq_core::{Completion, GroupSummary, TaskOutcome};
use zipq_engine::AtomicFileWriter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedTask {
    pub id: u64,
    pub kind: String,
    pub source: String,
    pub target: String,
    pub group: String,
    pub elapsed_ms: u64,
    pub status: String,
    pub error: Option<String>,
}

impl From<&TaskOutcome> for ReportedTask {
    fn from(outcome: &TaskOutcome) -> Self {
        let status = match &outcome.result {
            Ok(Completion::Archived) => "archived",
            Ok(Completion::Extracted) => "extracted",
            Ok(Completion::Skipped) => "skipped",
            Err(_) => "failed",
        };
        Self {
            id: outcome.task_id,
            kind: outcome.kind.to_string(),
            source: outcome.source.display().to_string(),
            target: outcome.target.display().to_string(),
            group: outcome.group.clone(),
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            status: status.to_string(),
            error: outcome.error().map(ToString::to_string),
        }
    }
}

impl ReportedTask {
    /// A path the scheduler refused before it was queued.
    pub fn rejected(kind: &str, path: &Path, reason: &str) -> Self {
        Self {
            id: 0,
            kind: kind.to_string(),
            source: path.display().to_string(),
            target: String::new(),
            group: String::new(),
            elapsed_ms: 0,
            status: "rejected".to_string(),
            error: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedGroup {
    pub name: String,
    pub completed: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub bytes: u64,
}

impl From<&GroupSummary> for ReportedGroup {
    fn from(summary: &GroupSummary) -> Self {
        Self {
            name: summary.name.clone(),
            completed: summary.completed,
            failed: summary.failed,
            elapsed_ms: summary.total_elapsed.as_millis() as u64,
            bytes: summary.bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub command: String,
    pub started_at: String,
    pub finished_at: String,
    pub tasks: Vec<ReportedTask>,
    pub groups: Vec<ReportedGroup>,
}

impl RunReport {
    pub fn new(
        command: &str,
        started_at: DateTime<Local>,
        outcomes: &[TaskOutcome],
        groups: &[GroupSummary],
    ) -> Self {
        let mut tasks: Vec<ReportedTask> = outcomes.iter().map(ReportedTask::from).collect();
        tasks.sort_by_key(|task| task.id);
        Self {
            command: command.to_string(),
            started_at: started_at.to_rfc3339(),
            finished_at: Local::now().to_rfc3339(),
            tasks,
            groups: groups.iter().map(ReportedGroup::from).collect(),
        }
    }

    pub fn failed(&self) -> usize {
        self.tasks.iter().filter(|task| task.error.is_some()).count()
    }

    /// JSON for a `.json` path, pretty RON otherwise.
    pub fn render(&self, path: &Path) -> Result<String> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::to_string_pretty(self)?)
        } else {
            let pretty = ron::ser::PrettyConfig::new();
            Ok(ron::ser::to_string_pretty(self, pretty)?)
        }
    }

    pub fn save(&self, path: &Path) -> Result<PathBuf> {
        let content = self.render(path)?;
        AtomicFileWriter::write_path(path, &content)
            .with_context(|| format!("writing report {}", path.display()))
    }
}
