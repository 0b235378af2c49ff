use std::cell::Cell;
use std::rc::Rc;

use phaser::core::types::PhaseState;
use phaser::diagnostics::Severity;
use phaser::io::config::RunnerConfig;
use phaser::runtime::RunOutcome;
use phaser::script::{ScriptedComponent, Step};
use phaser::test_support::{EventKind, EventLog, Recorder, ms, runner_with, scripted_runner, three_level_tree};
use phaser::tree::ComponentTree;

fn main_task(steps: Vec<Step>) -> ScriptedComponent {
    ScriptedComponent::default().task("main", steps)
}

#[test]
fn drain_time_delays_phase_end() {
    let log = EventLog::new();
    let env = main_task(vec![Step::raise(), Step::wait(10), Step::drop()]).drain_ms(2);
    let (runner, _) = scripted_runner(&log, RunnerConfig::default(), vec![("env", env)]);

    let report = runner.run().expect("run");

    assert!(report.is_completed());
    assert_eq!(report.time_of("uvm", "main", PhaseState::Ended), Some(ms(12)));
    let all_dropped = log.of("env", EventKind::AllDropped);
    assert_eq!(all_dropped.len(), 1);
    assert_eq!(all_dropped[0].phase, "uvm.main");
    assert_eq!(all_dropped[0].time, ms(12));
}

#[test]
fn default_drain_applies_without_explicit_setting() {
    let log = EventLog::new();
    let env = main_task(vec![Step::raise(), Step::wait(10), Step::drop()]);
    let config = RunnerConfig {
        default_drain_ms: 3,
        ..RunnerConfig::default()
    };
    let (runner, _) = scripted_runner(&log, config, vec![("env", env)]);

    let report = runner.run().expect("run");

    assert_eq!(report.time_of("uvm", "main", PhaseState::Ended), Some(ms(13)));
}

#[test]
fn phase_waits_for_last_of_two_raisers() {
    let log = EventLog::new();
    let env = main_task(vec![Step::raise(), Step::wait(10), Step::drop()]);
    let scoreboard = main_task(vec![Step::raise(), Step::wait(6), Step::drop()]);
    let (runner, _) = scripted_runner(
        &log,
        RunnerConfig::default(),
        vec![("env", env), ("scoreboard", scoreboard)],
    );

    let report = runner.run().expect("run");

    assert_eq!(report.time_of("uvm", "main", PhaseState::Ended), Some(ms(10)));
    for raiser in ["env", "scoreboard"] {
        let events = log.of(raiser, EventKind::AllDropped);
        assert_eq!(events.len(), 1, "{raiser}");
        assert_eq!(events[0].time, ms(10), "{raiser}");
    }
    // The root is notified of every raise through propagation but never
    // raised itself.
    assert_eq!(log.of("top", EventKind::Raised).len(), 2);
    assert!(log.of("top", EventKind::AllDropped).is_empty());
}

#[test]
fn re_raise_during_drain_cancels_it() {
    let log = EventLog::new();
    let env = main_task(vec![
        Step::raise(),
        Step::wait(10),
        Step::drop(),
        Step::wait(2),
        Step::raise(),
        Step::wait(10),
        Step::drop(),
    ])
    .drain_ms(5);
    let (runner, _) = scripted_runner(&log, RunnerConfig::default(), vec![("env", env)]);

    let report = runner.run().expect("run");

    assert_eq!(report.time_of("uvm", "main", PhaseState::Ended), Some(ms(27)));
    let all_dropped = log.of("env", EventKind::AllDropped);
    assert_eq!(all_dropped.len(), 1);
    assert_eq!(all_dropped[0].time, ms(27));
}

#[test]
fn propagation_off_keeps_notifications_local() {
    let log = EventLog::new();
    let env = main_task(vec![Step::raise(), Step::wait(4), Step::drop()]);
    let config = RunnerConfig {
        propagate_objections: false,
        ..RunnerConfig::default()
    };
    let (runner, _) = scripted_runner(&log, config, vec![("env", env)]);

    let report = runner.run().expect("run");

    assert_eq!(report.time_of("uvm", "main", PhaseState::Ended), Some(ms(4)));
    assert_eq!(log.of("env", EventKind::Raised).len(), 1);
    assert!(log.of("top", EventKind::Raised).is_empty());
}

#[test]
fn timeout_aborts_at_budget_with_bottom_up_pre_abort() {
    let log = EventLog::new();
    let mut tree = ComponentTree::with_root("top", Recorder::new("top", &log));
    let root = tree.root();
    let env = tree
        .add_child(root, "env", Recorder::new("env", &log))
        .expect("env");
    tree.add_child(
        env,
        "driver",
        Recorder::new("driver", &log).with_script(
            ScriptedComponent::default().task("run", vec![Step::raise(), Step::wait(500)]),
        ),
    )
    .expect("driver");
    tree.add_child(env, "monitor", Recorder::new("monitor", &log))
        .expect("monitor");
    let runner = runner_with(tree, RunnerConfig::default());
    runner.set_timeout(ms(100), true).expect("timeout");

    let report = runner.run().expect("run");

    assert_eq!(report.outcome, RunOutcome::TimedOut { at: ms(100) });
    assert_eq!(report.end_time, ms(100));
    let timeouts: Vec<_> = report.diagnostics_with("phase-timeout").collect();
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].severity, Severity::Fatal);
    assert_eq!(timeouts[0].time, ms(100));
    let aborted: Vec<String> = log
        .events()
        .into_iter()
        .filter(|e| e.kind == EventKind::PreAbort)
        .map(|e| e.component)
        .collect();
    assert_eq!(aborted, vec!["driver", "monitor", "env", "top"]);
    // Phases after `run` never start.
    assert_eq!(report.time_of("common", "extract", PhaseState::Started), None);
}

#[test]
fn locked_timeout_rejects_later_override() {
    let log = EventLog::new();
    let (runner, _) = scripted_runner(&log, RunnerConfig::default(), vec![]);
    runner.set_timeout(ms(100), false).expect("first");

    let err = runner.set_timeout(ms(500), true).expect_err("locked");

    assert_eq!(
        err,
        phaser::error::PhaseError::TimeoutLocked { current: ms(100) }
    );
    assert_eq!(runner.timeout(), ms(100));
    assert_eq!(runner.diagnostics().count_id("timeout-locked"), 1);
}

#[test]
fn dropping_more_than_raised_warns_and_completes() {
    let log = EventLog::new();
    let env = main_task(vec![
        Step::raise(),
        Step::wait(3),
        Step::Drop {
            count: 2,
            description: String::new(),
        },
    ]);
    let (runner, _) = scripted_runner(&log, RunnerConfig::default(), vec![("env", env)]);

    let report = runner.run().expect("run");

    assert!(report.is_completed());
    assert_eq!(report.time_of("uvm", "main", PhaseState::Ended), Some(ms(3)));
    let warnings: Vec<_> = report.diagnostics_with("objection-underflow").collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].severity, Severity::Warning);
}

#[test]
fn raising_for_unknown_component_is_fatal() {
    let log = EventLog::new();
    // Ids from a larger tree do not exist in the runner's tree.
    let (_, foreign) = three_level_tree();
    let outcome = Rc::new(Cell::new(None));
    let seen = Rc::clone(&outcome);
    let mut tree = ComponentTree::with_root("top", Recorder::new("top", &log));
    let root = tree.root();
    tree.add_child(
        root,
        "env",
        Recorder::new("env", &log).on_ready_to_end(move |phase| {
            if phase.label() == "uvm.main" {
                seen.set(Some(
                    phase
                        .raise_objection_for(foreign.scoreboard, "stray", 1)
                        .is_err(),
                ));
            }
        }),
    )
    .expect("env");
    let runner = runner_with(tree, RunnerConfig::default());

    let report = runner.run().expect("run");

    assert_eq!(outcome.get(), Some(true));
    assert!(matches!(report.outcome, RunOutcome::Aborted { .. }));
    assert_eq!(report.diagnostics_with("objection-no-owner").count(), 1);
    assert_eq!(log.of("env", EventKind::PreAbort).len(), 1);
}

#[test]
fn phase_can_shorten_the_timeout_while_running() {
    let log = EventLog::new();
    let mut tree = ComponentTree::with_root("top", Recorder::new("top", &log));
    let root = tree.root();
    tree.add_child(
        root,
        "env",
        Recorder::new("env", &log)
            .with_script(ScriptedComponent::default().task("run", vec![Step::raise(), Step::wait(500)]))
            .on_ready_to_end(|phase| {
                if phase.label() == "common.build" {
                    phase.set_timeout(ms(30), true).expect("set timeout");
                }
            }),
    )
    .expect("env");
    let runner = runner_with(tree, RunnerConfig::default());

    let report = runner.run().expect("run");

    assert_eq!(report.outcome, RunOutcome::TimedOut { at: ms(30) });
    assert_eq!(runner.timeout(), ms(30));
}
