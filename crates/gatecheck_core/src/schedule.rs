//! Start-before dependency resolution.
//!
//! Each process may name processes that must be running before it starts,
//! and each step names the processes it needs. Together these form a small
//! DAG; a step's launch order is the topological order of everything it
//! transitively needs, dependencies first, declaration order breaking ties.

use crate::error::{HarnessError, Result};
use crate::process::ProcessSpec;
use crate::step::{Check, Step, Target};
use std::collections::{BTreeMap, HashSet};

/// Launch plan for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    /// Processes to ensure running, in launch order.
    pub launch_order: Vec<String>,
}

/// Validated plans for every step of a run.
#[derive(Debug, Clone)]
pub struct Schedule {
    plans: Vec<StepPlan>,
}

impl Schedule {
    /// Validates references and computes each step's launch order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProcess` for references to undeclared processes,
    /// `DuplicateProcess` when a step's command shadows a declared or kept
    /// process, and `DependencyCycle` when start-before edges loop.
    pub fn build(processes: &BTreeMap<String, ProcessSpec>, steps: &[Step]) -> Result<Self> {
        for spec in processes.values() {
            for dep in &spec.start_before {
                if !processes.contains_key(dep) {
                    return Err(HarnessError::UnknownProcess(dep.clone()));
                }
            }
        }

        let mut known: HashSet<String> = processes.keys().cloned().collect();
        let mut plans = Vec::with_capacity(steps.len());

        for step in steps {
            let mut order = Vec::new();
            let mut done = HashSet::new();
            for root in &step.start_before {
                if !processes.contains_key(root) {
                    return Err(HarnessError::UnknownProcess(root.clone()));
                }
                visit(root, processes, &mut Vec::new(), &mut done, &mut order)?;
            }

            // Commands kept running become addressable by later steps.
            if let Some(command) = &step.command {
                if known.contains(&command.name) {
                    return Err(HarnessError::DuplicateProcess(command.name.clone()));
                }
                for dep in &command.start_before {
                    if !processes.contains_key(dep) {
                        return Err(HarnessError::UnknownProcess(dep.clone()));
                    }
                    visit(dep, processes, &mut Vec::new(), &mut done, &mut order)?;
                }
            }
            let command_name = step.command_name();
            if step.keep_running {
                if let Some(name) = command_name {
                    known.insert(name.to_string());
                }
            }

            for name in &step.still_running_after {
                if !known.contains(name) {
                    return Err(HarnessError::UnknownProcess(name.clone()));
                }
            }
            for check in &step.checks {
                let target = match check {
                    Check::Expect { target, .. } | Check::Golden { target, .. } => target,
                };
                if let Target::Process(name) = target {
                    if !known.contains(name) && Some(name.as_str()) != command_name {
                        return Err(HarnessError::UnknownProcess(name.clone()));
                    }
                }
            }

            plans.push(StepPlan {
                launch_order: order,
            });
        }

        Ok(Self { plans })
    }

    /// Plan for step `index`.
    pub fn plan(&self, index: usize) -> Option<&StepPlan> {
        self.plans.get(index)
    }

    /// Number of planned steps.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// True if there are no steps.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// Depth-first post-order walk; `stack` holds the current path for cycle reports.
fn visit(
    name: &str,
    processes: &BTreeMap<String, ProcessSpec>,
    stack: &mut Vec<String>,
    done: &mut HashSet<String>,
    order: &mut Vec<String>,
) -> Result<()> {
    if done.contains(name) {
        return Ok(());
    }
    if let Some(pos) = stack.iter().position(|n| n == name) {
        let mut path = stack[pos..].to_vec();
        path.push(name.to_string());
        return Err(HarnessError::DependencyCycle { path });
    }

    let spec = processes
        .get(name)
        .ok_or_else(|| HarnessError::UnknownProcess(name.to_string()))?;

    stack.push(name.to_string());
    for dep in &spec.start_before {
        visit(dep, processes, stack, done, order)?;
    }
    stack.pop();

    done.insert(name.to_string());
    order.push(name.to_string());
    Ok(())
}
