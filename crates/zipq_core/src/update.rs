use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};

use crate::admission::check_submission;
use crate::state::{QueuedTask, SessionState};
use crate::{
    format_size, Effect, FailureKind, Msg, ProcessCountStrategy, SchedulerState, StopPolicy,
    TaskOutcome, TaskSpec,
};

/// Pure update function: applies a message to the scheduler state and returns
/// the effects the engine has to carry out, in order.
pub fn update(mut state: SchedulerState, msg: Msg) -> (SchedulerState, Vec<Effect>) {
    let mut effects = Vec::new();

    match msg {
        Msg::Submit(spec) => submit(&mut state, spec, &mut effects),
        Msg::SetGroupCallback { group } => state.groups.set_callback(&group),
        Msg::TargetLocked { task_id } => {
            let Some(active) = state.release(task_id) else {
                engine_warn!("Lock report for unknown task {}", task_id);
                return (state, effects);
            };
            let mut task = active.task;
            task.attempts += 1;
            let policy = state.limits.lock_retry;
            if policy.exhausted(task.attempts) {
                engine_warn!(
                    "Target {} still locked after {} attempts, giving up",
                    task.spec.target.display(),
                    task.attempts
                );
                let outcome = TaskOutcome::new(
                    &task.spec,
                    Duration::ZERO,
                    Err(FailureKind::TargetLocked {
                        attempts: task.attempts,
                    }),
                );
                resolve(&mut state, outcome, 0, &mut effects);
            } else {
                task.not_before_tick = state.tick + policy.backoff_ticks(task.attempts);
                if state.lock_notices.hit() {
                    engine_info!(
                        "The file is in use, try again later: {} (attempt {})",
                        task.spec.target.display(),
                        task.attempts
                    );
                }
                state.queue.push_back(task);
            }
            dispatch(&mut state, &mut effects);
        }
        Msg::TaskFinished {
            task_id,
            elapsed,
            result,
        } => {
            let Some(active) = state.release(task_id) else {
                engine_warn!("Completion report for unknown task {}", task_id);
                return (state, effects);
            };
            let outcome = TaskOutcome::new(&active.task.spec, elapsed, result);
            resolve(&mut state, outcome, active.reserved_bytes, &mut effects);
            dispatch(&mut state, &mut effects);
        }
        Msg::Cancel { task_id } => cancel(&mut state, task_id, &mut effects),
        Msg::Tick => {
            state.tick += 1;
            if !state.ticking {
                return (state, effects);
            }
            match state.limits.process_count {
                ProcessCountStrategy::OwnedHandles => dispatch(&mut state, &mut effects),
                ProcessCountStrategy::ProcessTable => {
                    if pass_blocked(&mut state) || state.queue.is_empty() {
                        return (state, effects);
                    }
                    // The pass resumes when the count comes back.
                    state.pass_in_progress = true;
                    effects.push(Effect::CountProcesses);
                }
            }
        }
        Msg::ProcessCountObserved { running } => {
            state.pass_in_progress = false;
            match running {
                Some(count) => state.observed_processes = Some(count),
                None => engine_debug!("Process table unavailable; keeping internal count"),
            }
            dispatch(&mut state, &mut effects);
        }
        Msg::SetMaxProcessingBytes(bytes) => {
            state.limits.max_processing_bytes = bytes;
            engine_info!("Set maximum processing size to {}", format_size(bytes));
            dispatch(&mut state, &mut effects);
        }
        Msg::SetMultiProcess(enabled) => {
            state.limits.multi_process = enabled;
            engine_info!(
                "Multi-process execution {}",
                if enabled { "enabled" } else { "disabled" }
            );
            dispatch(&mut state, &mut effects);
        }
        Msg::SetMaxConcurrentProcesses(max) => {
            state.limits.max_concurrent_processes = max.max(1);
            dispatch(&mut state, &mut effects);
        }
        Msg::Stop { policy } => stop(&mut state, policy, &mut effects),
    }

    (state, effects)
}

fn submit(state: &mut SchedulerState, spec: TaskSpec, effects: &mut Vec<Effect>) {
    if state.session != SessionState::Accepting {
        effects.push(Effect::Resolve(TaskOutcome::new(
            &spec,
            Duration::ZERO,
            Err(FailureKind::Stopped),
        )));
        return;
    }

    if let Err(failure) = check_submission(&state.limits, spec.kind, spec.size) {
        engine_warn!("Rejected {} task {}: {}", spec.kind, spec.describe(), failure);
        effects.push(Effect::Resolve(TaskOutcome::new(
            &spec,
            Duration::ZERO,
            Err(failure),
        )));
        return;
    }

    if state.has_target(&spec.target) {
        engine_warn!("Target {} is already scheduled", spec.target.display());
        effects.push(Effect::Resolve(TaskOutcome::new(
            &spec,
            Duration::ZERO,
            Err(FailureKind::DuplicateTarget),
        )));
        return;
    }

    engine_info!(
        "Added {} task {}: {} ({}{}) group={}",
        spec.kind,
        spec.id,
        spec.describe(),
        format_size(spec.size.bytes),
        if spec.size.complete { "" } else { ", estimated" },
        spec.group
    );
    state.groups.ensure(&spec.group);
    state.queue.push_back(QueuedTask::new(spec));
    if !state.ticking {
        state.ticking = true;
        effects.push(Effect::StartTicker);
    }
    dispatch(state, effects);
}

fn cancel(state: &mut SchedulerState, task_id: crate::TaskId, effects: &mut Vec<Effect>) {
    if let Some(pos) = state.queue.iter().position(|t| t.spec.id == task_id) {
        if let Some(task) = state.queue.remove(pos) {
            engine_info!("Cancelled queued task {}", task_id);
            let outcome =
                TaskOutcome::new(&task.spec, Duration::ZERO, Err(FailureKind::Cancelled));
            resolve(state, outcome, 0, effects);
        }
        dispatch(state, effects);
    } else if state.active.contains_key(&task_id) {
        effects.push(Effect::Kill { task_id });
    } else {
        engine_debug!("Cancel for unknown task {}", task_id);
    }
}

fn stop(state: &mut SchedulerState, policy: StopPolicy, effects: &mut Vec<Effect>) {
    if state.session == SessionState::Stopped {
        return;
    }
    state.session = SessionState::Finishing;
    if policy == StopPolicy::Immediate {
        // One at a time, so later members still count as remaining.
        while let Some(task) = state.queue.pop_front() {
            let outcome =
                TaskOutcome::new(&task.spec, Duration::ZERO, Err(FailureKind::Cancelled));
            resolve(state, outcome, 0, effects);
        }
        for task_id in state.active.keys() {
            effects.push(Effect::Kill { task_id: *task_id });
        }
    }
    settle_if_idle(state, effects);
}

/// Reports a task's outcome and fires its group if nothing of it is left.
/// Budget release has already happened by the time this runs.
fn resolve(
    state: &mut SchedulerState,
    outcome: TaskOutcome,
    bytes: u64,
    effects: &mut Vec<Effect>,
) {
    state.groups.record(&outcome, bytes);
    let group = outcome.group.clone();
    effects.push(Effect::Resolve(outcome));

    let remaining = state.remaining_in_group(&group);
    if let Some(summary) = state.groups.take_if_complete(&group, remaining) {
        engine_info!(
            "Group {} complete: {} ok, {} failed",
            summary.name,
            summary.completed,
            summary.failed
        );
        effects.push(Effect::GroupCompleted(summary));
    }
}

/// Admits queue heads until one may not start.
fn dispatch(state: &mut SchedulerState, effects: &mut Vec<Effect>) {
    if pass_blocked(state) {
        return;
    }

    state.pass_in_progress = true;
    while let Some(spec) = state.admit_head() {
        engine_debug!(
            "Launching task {} ({}), active={}, size={}",
            spec.id,
            format_size(spec.size.bytes),
            state.active_count(),
            format_size(state.current_bytes)
        );
        effects.push(Effect::Launch(spec));
    }
    state.pass_in_progress = false;

    settle_if_idle(state, effects);
}

fn pass_blocked(state: &mut SchedulerState) -> bool {
    if !state.pass_in_progress {
        return false;
    }
    if state.skipped_passes.hit() {
        engine_debug!(
            "Dispatch already in progress - queued: {}, active: {}, size: {}",
            state.queue.len(),
            state.active.len(),
            format_size(state.current_bytes)
        );
    }
    true
}

fn settle_if_idle(state: &mut SchedulerState, effects: &mut Vec<Effect>) {
    if !state.is_idle() {
        return;
    }
    if state.ticking {
        state.ticking = false;
        effects.push(Effect::StopTicker);
        engine_info!("All tasks completed");
    }
    state.observed_processes = None;
    for summary in state.groups.drain_idle() {
        effects.push(Effect::GroupCompleted(summary));
    }
    if state.session == SessionState::Finishing {
        state.session = SessionState::Stopped;
        effects.push(Effect::Stopped);
    }
}
