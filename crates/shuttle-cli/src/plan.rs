//! JSON task plans: a list of labelled sleep tasks with dependencies.
//!
//! ```json
//! { "tasks": [
//!     { "label": "fetch", "duration_ms": 200 },
//!     { "label": "index", "duration_ms": 100, "deps": ["fetch"], "priority": "high" },
//!     { "label": "flaky", "duration_ms": 50, "fail": true, "steps": 5, "timeout_ms": 1000 }
//! ] }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;

use shuttle_core::{
    ActionError, DispatchError, Priority, TaskAction, TaskContext, TaskHandle, TaskId, TaskQueue,
    TaskSpec,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub tasks: Vec<PlanTask>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanTask {
    pub label: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub fail: bool,

    /// Number of sleep slices; cancellation is checked between them.
    #[serde(default = "default_steps")]
    pub steps: u32,
    pub timeout_ms: Option<u64>,
}

fn default_steps() -> u32 {
    1
}

/// Tasks submitted from a plan, by label, in plan order.
pub struct Submitted {
    pub handles: Vec<(String, TaskHandle)>,
}

impl Submitted {
    pub fn id_of(&self, label: &str) -> Option<TaskId> {
        self.handles
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, h)| h.id())
    }

    fn label_of(&self, id: TaskId) -> String {
        self.handles
            .iter()
            .find(|(_, h)| h.id() == id)
            .map(|(l, _)| l.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

impl Plan {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid plan {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let plan: Self = serde_json::from_str(raw)?;
        plan.check_labels()?;
        Ok(plan)
    }

    /// Labels are unique, non-empty and every dependency names a task.
    fn check_labels(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.label.is_empty() {
                bail!("task label must not be empty");
            }
            if !seen.insert(task.label.as_str()) {
                bail!("duplicate task label {:?}", task.label);
            }
            if task.steps == 0 {
                bail!("task {:?}: steps must be at least 1", task.label);
            }
        }
        for task in &self.tasks {
            for dep in &task.deps {
                if !seen.contains(dep.as_str()) {
                    bail!("task {:?} depends on unknown task {:?}", task.label, dep);
                }
            }
        }
        Ok(())
    }

    /// Submit every task, then wire the dependencies edge by edge so a cycle
    /// is reported with labels. The queue should be paused while this runs.
    pub fn submit_to(&self, queue: &TaskQueue) -> anyhow::Result<Submitted> {
        let mut submitted = Submitted {
            handles: Vec::with_capacity(self.tasks.len()),
        };
        for task in &self.tasks {
            let handle = queue
                .submit(task.spec())
                .with_context(|| format!("failed to submit {:?}", task.label))?;
            submitted.handles.push((task.label.clone(), handle));
        }

        let ids: HashMap<&str, TaskId> = submitted
            .handles
            .iter()
            .map(|(label, h)| (label.as_str(), h.id()))
            .collect();
        for task in &self.tasks {
            let id = ids[task.label.as_str()];
            for dep in &task.deps {
                match queue.add_dependency(id, ids[dep.as_str()]) {
                    Ok(()) => {}
                    Err(DispatchError::Cycle(cycle)) => {
                        let path: Vec<String> =
                            cycle.path.iter().map(|&id| submitted.label_of(id)).collect();
                        bail!("dependency cycle: {}", path.join(" -> "));
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(submitted)
    }
}

impl PlanTask {
    fn spec(&self) -> TaskSpec {
        let mut spec = TaskSpec::new(SleepAction {
            duration: Duration::from_millis(self.duration_ms),
            steps: self.steps.max(1),
            fail: self.fail,
        })
        .label(self.label.clone())
        .priority(self.priority);
        if let Some(ms) = self.timeout_ms {
            spec = spec.timeout(Duration::from_millis(ms));
        }
        spec
    }
}

/// Sleeps in `steps` slices, checking for cancellation between and during
/// them, then succeeds or fails as configured.
struct SleepAction {
    duration: Duration,
    steps: u32,
    fail: bool,
}

#[async_trait]
impl TaskAction for SleepAction {
    async fn execute(&self, ctx: TaskContext) -> Result<(), ActionError> {
        let slice = self.duration / self.steps;
        for _ in 0..self.steps {
            ctx.checkpoint()?;
            tokio::select! {
                _ = ctx.cancelled() => return Err(ActionError::Cancelled),
                _ = sleep(slice) => {}
            }
        }
        if self.fail {
            return Err(ActionError::failed(format!(
                "{} failed as planned",
                ctx.label().unwrap_or("task")
            )));
        }
        Ok(())
    }
}
