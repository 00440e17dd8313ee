use std::path::PathBuf;
use std::sync::Once;
use std::time::Duration;

use pretty_assertions::assert_eq;
use zipq_core::{
    update, Completion, Effect, FailureKind, GroupSummary, Limits, Msg, SchedulerState,
    SessionState, SizeEstimate, StopPolicy, TaskId, TaskKind, TaskSpec,
};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

fn spec_in(id: TaskId, group: &str, bytes: u64) -> TaskSpec {
    TaskSpec {
        id,
        kind: TaskKind::Compress,
        source: PathBuf::from(format!("/work/{group}/item{id}")),
        target: PathBuf::from(format!("/work/{group}/item{id}.zip")),
        group: group.to_string(),
        size: SizeEstimate::exact(bytes),
        remove_source: false,
        existing_target: Default::default(),
    }
}

fn finished(
    state: SchedulerState,
    task_id: TaskId,
    result: Result<Completion, FailureKind>,
) -> (SchedulerState, Vec<Effect>) {
    update(
        state,
        Msg::TaskFinished {
            task_id,
            elapsed: Duration::from_millis(10),
            result,
        },
    )
}

fn groups_fired(effects: &[Effect]) -> Vec<GroupSummary> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::GroupCompleted(summary) => Some(summary.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn group_fires_once_after_last_member_resolves() {
    init_logging();
    let state = SchedulerState::new(Limits::concurrent(2, 1000));
    let (state, _) = update(
        state,
        Msg::SetGroupCallback {
            group: "batch".to_string(),
        },
    );
    let (state, _) = update(state, Msg::Submit(spec_in(1, "batch", 100)));
    let (state, _) = update(state, Msg::Submit(spec_in(2, "batch", 50)));

    let (state, effects) = finished(state, 1, Ok(Completion::Archived));
    assert!(groups_fired(&effects).is_empty());

    let (state, effects) = finished(
        state,
        2,
        Err(FailureKind::Subprocess {
            code: Some(2),
            message: "fatal".to_string(),
        }),
    );
    assert_eq!(
        effects,
        vec![
            effects[0].clone(),
            Effect::GroupCompleted(GroupSummary {
                name: "batch".to_string(),
                completed: 1,
                failed: 1,
                total_elapsed: Duration::from_millis(20),
                bytes: 100,
            }),
            Effect::StopTicker,
        ]
    );
    assert!(matches!(effects[0], Effect::Resolve(_)));
    assert!(state.groups().get("batch").is_none());
}

#[test]
fn lock_retry_does_not_complete_the_group_early() {
    init_logging();
    let state = SchedulerState::new(Limits::default());
    let (state, _) = update(
        state,
        Msg::SetGroupCallback {
            group: "g".to_string(),
        },
    );
    let (state, _) = update(state, Msg::Submit(spec_in(1, "g", 10)));

    let (state, effects) = update(state, Msg::TargetLocked { task_id: 1 });
    assert!(groups_fired(&effects).is_empty());

    let (state, _) = update(state, Msg::Tick);
    let (_, effects) = finished(state, 1, Ok(Completion::Archived));
    assert_eq!(groups_fired(&effects).len(), 1);
}

#[test]
fn callback_registered_before_any_task_survives_idle() {
    init_logging();
    let state = SchedulerState::new(Limits::default());
    let (state, _) = update(
        state,
        Msg::SetGroupCallback {
            group: "later".to_string(),
        },
    );
    let (state, _) = update(state, Msg::Submit(spec_in(1, "other", 10)));
    let (state, effects) = finished(state, 1, Ok(Completion::Archived));
    assert!(groups_fired(&effects).is_empty());
    assert!(state.groups().get("later").is_some());

    let (state, _) = update(state, Msg::Submit(spec_in(2, "later", 10)));
    let (_, effects) = finished(state, 2, Ok(Completion::Skipped));
    let fired = groups_fired(&effects);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].name, "later");
}

#[test]
fn callback_added_mid_run_fires_when_scheduler_goes_idle() {
    init_logging();
    let state = SchedulerState::new(Limits::default());
    let (state, _) = update(state, Msg::Submit(spec_in(1, "a", 10)));
    let (state, _) = update(state, Msg::Submit(spec_in(2, "b", 10)));
    let (state, effects) = finished(state, 1, Ok(Completion::Archived));
    assert!(groups_fired(&effects).is_empty());

    let (state, _) = update(
        state,
        Msg::SetGroupCallback {
            group: "a".to_string(),
        },
    );
    let (_, effects) = finished(state, 2, Ok(Completion::Archived));
    let fired = groups_fired(&effects);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].name, "a");
    assert_eq!(fired[0].completed, 1);
}

#[test]
fn stop_finish_drains_queue_and_refuses_new_work() {
    init_logging();
    let state = SchedulerState::new(Limits::default());
    let (state, _) = update(state, Msg::Submit(spec_in(1, "s", 10)));
    let (state, _) = update(state, Msg::Submit(spec_in(2, "s", 10)));

    let (state, effects) = update(
        state,
        Msg::Stop {
            policy: StopPolicy::Finish,
        },
    );
    assert!(effects.is_empty());
    assert_eq!(state.session(), SessionState::Finishing);

    let (state, effects) = update(state, Msg::Submit(spec_in(3, "s", 10)));
    assert!(matches!(
        effects.as_slice(),
        [Effect::Resolve(outcome)] if outcome.result == Err(FailureKind::Stopped)
    ));

    let (state, effects) = finished(state, 1, Ok(Completion::Archived));
    assert!(effects.iter().any(|e| matches!(e, Effect::Launch(s) if s.id == 2)));

    let (state, effects) = finished(state, 2, Ok(Completion::Archived));
    assert_eq!(effects.last(), Some(&Effect::Stopped));
    assert_eq!(state.session(), SessionState::Stopped);
}

#[test]
fn stop_immediate_cancels_queue_and_kills_running() {
    init_logging();
    let state = SchedulerState::new(Limits::default());
    let (state, _) = update(state, Msg::Submit(spec_in(1, "s", 10)));
    let (state, _) = update(state, Msg::Submit(spec_in(2, "s", 10)));

    let (state, effects) = update(
        state,
        Msg::Stop {
            policy: StopPolicy::Immediate,
        },
    );
    assert_eq!(effects.len(), 2);
    assert!(matches!(
        &effects[0],
        Effect::Resolve(outcome)
            if outcome.task_id == 2 && outcome.result == Err(FailureKind::Cancelled)
    ));
    assert_eq!(effects[1], Effect::Kill { task_id: 1 });

    let (state, effects) = finished(state, 1, Err(FailureKind::Cancelled));
    assert_eq!(effects.last(), Some(&Effect::Stopped));
    assert_eq!(state.session(), SessionState::Stopped);
}

#[test]
fn stop_on_idle_scheduler_stops_at_once() {
    init_logging();
    let (state, effects) = update(
        SchedulerState::default(),
        Msg::Stop {
            policy: StopPolicy::Finish,
        },
    );
    assert_eq!(effects, vec![Effect::Stopped]);

    let (_, effects) = update(
        state,
        Msg::Stop {
            policy: StopPolicy::Immediate,
        },
    );
    assert!(effects.is_empty());
}

#[test]
fn stop_immediate_fires_a_queued_group_once_with_every_member() {
    init_logging();
    let state = SchedulerState::new(Limits::default());
    let (state, _) = update(state, Msg::Submit(spec_in(1, "a", 10)));
    let (state, _) = update(
        state,
        Msg::SetGroupCallback {
            group: "b".to_string(),
        },
    );
    let (state, _) = update(state, Msg::Submit(spec_in(2, "b", 10)));
    let (state, _) = update(state, Msg::Submit(spec_in(3, "b", 10)));
    let (state, _) = update(state, Msg::Submit(spec_in(4, "b", 10)));

    let (state, effects) = update(
        state,
        Msg::Stop {
            policy: StopPolicy::Immediate,
        },
    );
    let fired = groups_fired(&effects);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].name, "b");
    assert_eq!(fired[0].completed, 0);
    assert_eq!(fired[0].failed, 3);

    let group_at = effects
        .iter()
        .position(|e| matches!(e, Effect::GroupCompleted(_)))
        .unwrap();
    let last_resolve = effects
        .iter()
        .rposition(|e| matches!(e, Effect::Resolve(_)))
        .unwrap();
    assert!(group_at > last_resolve);
    assert!(state.groups().get("b").is_none());

    let (_, effects) = finished(state, 1, Err(FailureKind::Cancelled));
    assert!(groups_fired(&effects).is_empty());
    assert_eq!(effects.last(), Some(&Effect::Stopped));
}
