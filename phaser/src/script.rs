//! Scripted components: task-phase behaviour described as a list of steps.
//!
//! Scenario files build their testbench from these, and tests use them to
//! express timing scenarios without writing a component by hand.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{Component, ObjectionEvent, TaskFuture};
use crate::runtime::PhaseHandle;

fn one() -> u32 {
    1
}

/// One action of a task script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Raise {
        #[serde(default = "one")]
        count: u32,
        #[serde(default)]
        description: String,
    },
    Drop {
        #[serde(default = "one")]
        count: u32,
        #[serde(default)]
        description: String,
    },
    Wait {
        ms: u64,
    },
    /// Jump to `to`; only the first `times` executions of this step jump.
    /// A taken jump ends the script.
    Jump {
        to: String,
        #[serde(default = "one")]
        times: u32,
    },
    SetDrain {
        ms: u64,
    },
    EndPrematurely,
}

impl Step {
    pub fn raise() -> Self {
        Self::Raise {
            count: 1,
            description: String::new(),
        }
    }

    pub fn drop() -> Self {
        Self::Drop {
            count: 1,
            description: String::new(),
        }
    }

    pub fn wait(ms: u64) -> Self {
        Self::Wait { ms }
    }

    pub fn jump(to: &str, times: u32) -> Self {
        Self::Jump {
            to: to.to_string(),
            times,
        }
    }
}

/// Steps run by one component in one task phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskScript {
    pub phase: String,
    #[serde(default)]
    pub drain_ms: Option<u64>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedComponent {
    tasks: Vec<TaskScript>,
    /// Jumps already taken, keyed by (task index, step index). Survives
    /// re-execution of the phase after a jump.
    jumps_taken: Rc<RefCell<BTreeMap<(usize, usize), u32>>>,
}

impl ScriptedComponent {
    pub fn new(tasks: Vec<TaskScript>) -> Self {
        Self {
            tasks,
            jumps_taken: Rc::default(),
        }
    }

    /// Adds a script for `phase`.
    pub fn task(mut self, phase: &str, steps: Vec<Step>) -> Self {
        self.tasks.push(TaskScript {
            phase: phase.to_string(),
            drain_ms: None,
            steps,
        });
        self
    }

    /// Sets the drain time of the most recently added task.
    pub fn drain_ms(mut self, ms: u64) -> Self {
        if let Some(last) = self.tasks.last_mut() {
            last.drain_ms = Some(ms);
        }
        self
    }

    pub fn tasks(&self) -> &[TaskScript] {
        &self.tasks
    }
}

impl Component for ScriptedComponent {
    fn exec_task(&mut self, phase: PhaseHandle) -> Option<TaskFuture> {
        let name = phase.name();
        let (index, script) = self
            .tasks
            .iter()
            .enumerate()
            .find(|(_, task)| task.phase == name)?;
        Some(run_script(index, script.clone(), Rc::clone(&self.jumps_taken), phase).boxed_local())
    }

    fn all_dropped(&mut self, event: &ObjectionEvent) {
        debug!(phase = %event.phase, object = %event.object, at_ms = event.time.as_millis() as u64, "all objections dropped");
    }
}

async fn run_script(
    task_index: usize,
    script: TaskScript,
    jumps_taken: Rc<RefCell<BTreeMap<(usize, usize), u32>>>,
    phase: PhaseHandle,
) {
    let me = phase.component();
    let describe = |description: &str| {
        if description.is_empty() {
            phase.component_name()
        } else {
            description.to_string()
        }
    };
    if let Some(ms) = script.drain_ms {
        phase.set_drain_time(me, Duration::from_millis(ms));
    }
    for (step_index, step) in script.steps.iter().enumerate() {
        match step {
            Step::Raise { count, description } => {
                if phase
                    .raise_objection_for(me, &describe(description), *count)
                    .is_err()
                {
                    return;
                }
            }
            Step::Drop { count, description } => {
                phase.drop_objection_for(me, &describe(description), *count);
            }
            Step::Wait { ms } => phase.wait(Duration::from_millis(*ms)).await,
            Step::Jump { to, times } => {
                let take = {
                    let mut taken = jumps_taken.borrow_mut();
                    let count = taken.entry((task_index, step_index)).or_default();
                    if *count < *times {
                        *count += 1;
                        true
                    } else {
                        false
                    }
                };
                if take {
                    // A failed jump has already aborted the run.
                    if let Err(err) = phase.jump(to) {
                        debug!(phase = %phase.label(), target = %to, %err, "scripted jump rejected");
                    }
                    return;
                }
            }
            Step::SetDrain { ms } => phase.set_drain_time(me, Duration::from_millis(*ms)),
            Step::EndPrematurely => phase.end_prematurely(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Doc {
        steps: Vec<Step>,
    }

    #[test]
    fn steps_parse_from_inline_tables() {
        let raw = r#"
steps = [
  { op = "raise" },
  { op = "wait", ms = 10 },
  { op = "drop", count = 2, description = "done" },
  { op = "jump", to = "reset" },
  { op = "set_drain", ms = 3 },
  { op = "end_prematurely" },
]
"#;
        let doc: Doc = toml::from_str(raw).expect("parse");
        assert_eq!(
            doc.steps,
            vec![
                Step::raise(),
                Step::wait(10),
                Step::Drop {
                    count: 2,
                    description: "done".to_string()
                },
                Step::jump("reset", 1),
                Step::SetDrain { ms: 3 },
                Step::EndPrematurely,
            ]
        );
    }

    #[test]
    fn builder_sets_drain_on_last_task() {
        let scripted = ScriptedComponent::default()
            .task("run", vec![Step::raise()])
            .task("main", vec![])
            .drain_ms(2);
        assert_eq!(scripted.tasks()[0].drain_ms, None);
        assert_eq!(scripted.tasks()[1].drain_ms, Some(2));
    }
}
