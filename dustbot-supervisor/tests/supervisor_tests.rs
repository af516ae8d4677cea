//! tests/supervisor_tests.rs
//!
//! Worker-table invariants with stub child processes: at most one live
//! child per name, the live pid set always matches the table, offline
//! drains and the grace-then-kill stop path.

#![cfg(unix)]

use std::time::{Duration, Instant};

use tokio::process::Command;

use dustbot_supervisor::table::{Launcher, STOP_GRACE, StartOutcome, WorkerState, WorkerTable};

fn sleeper_launcher() -> Launcher {
    Box::new(|_name| {
        let mut command = Command::new("sleep");
        command.arg("60");
        Some(command)
    })
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn start_is_idempotent() {
    let mut table = WorkerTable::new(&names(&["gamble"]), sleeper_launcher());

    let first = table.start("gamble").await.unwrap();
    let StartOutcome::Started(pid) = first else {
        panic!("expected a fresh start");
    };

    let second = table.start("gamble").await.unwrap();
    assert_eq!(second, StartOutcome::AlreadyRunning(pid));

    // exactly one live child
    assert_eq!(table.live_pids(), vec![pid]);

    table.stop("gamble").await.unwrap();
}

#[tokio::test]
async fn recorded_pids_match_live_children() {
    let mut table = WorkerTable::new(&names(&["a", "b", "c"]), sleeper_launcher());
    for (_, outcome) in table.start_all().await {
        outcome.unwrap();
    }

    let mut recorded: Vec<u32> = table
        .statuses()
        .into_iter()
        .filter(|s| s.state == WorkerState::Running)
        .filter_map(|s| s.pid)
        .collect();
    recorded.sort_unstable();
    assert_eq!(recorded.len(), 3);
    assert_eq!(table.live_pids(), recorded);

    table.stop_all().await;
    assert!(table.live_pids().is_empty());
    for status in table.statuses() {
        assert_eq!(status.state, WorkerState::Stopped);
        assert!(status.pid.is_none());
    }
}

#[tokio::test]
async fn restart_changes_the_pid() {
    let mut table = WorkerTable::new(&names(&["suika"]), sleeper_launcher());

    let StartOutcome::Started(old_pid) = table.start("suika").await.unwrap() else {
        panic!("expected a fresh start");
    };
    let StartOutcome::Started(new_pid) = table.restart("suika").await.unwrap() else {
        panic!("restart must spawn a new child");
    };
    assert_ne!(old_pid, new_pid);

    table.stop("suika").await.unwrap();
}

#[tokio::test]
async fn stop_terminates_within_the_grace_period() {
    let mut table = WorkerTable::new(&names(&["gamble"]), sleeper_launcher());
    table.start("gamble").await.unwrap();

    let began = Instant::now();
    assert!(table.stop("gamble").await.unwrap());
    assert!(began.elapsed() < STOP_GRACE + Duration::from_secs(1));
    assert!(table.live_pids().is_empty());
}

#[tokio::test]
async fn stop_kills_a_worker_that_ignores_sigterm() {
    let launcher: Launcher = Box::new(|_name| {
        let mut command = Command::new("sh");
        command.arg("-c").arg("trap '' TERM; sleep 60");
        Some(command)
    });
    let mut table = WorkerTable::new(&names(&["stubborn"]), launcher);
    table.start("stubborn").await.unwrap();

    let began = Instant::now();
    assert!(table.stop("stubborn").await.unwrap());
    // grace period elapsed, then the kill fallback fired
    assert!(began.elapsed() >= STOP_GRACE);
    assert!(began.elapsed() < STOP_GRACE + Duration::from_secs(2));
    assert!(table.live_pids().is_empty());
}

#[tokio::test]
async fn unsupervised_death_is_reaped_as_exited() {
    let launcher: Launcher = Box::new(|_name| Some(Command::new("true")));
    let mut table = WorkerTable::new(&names(&["flaky"]), launcher);
    table.start("flaky").await.unwrap();

    // let the child exit on its own
    tokio::time::sleep(Duration::from_millis(200)).await;

    let dead = table.reap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0, "flaky");
    assert!(dead[0].1.success());

    let statuses = table.statuses();
    assert_eq!(statuses[0].state, WorkerState::Exited);
    assert!(statuses[0].pid.is_none());
    assert!(table.live_pids().is_empty());

    // reap is one-shot per death
    assert!(table.reap().is_empty());
}

#[tokio::test]
async fn start_after_crash_spawns_fresh() {
    let launcher: Launcher = Box::new(|name| {
        if name == "flaky" {
            Some(Command::new("true"))
        } else {
            None
        }
    });
    let mut table = WorkerTable::new(&names(&["flaky"]), launcher);
    table.start("flaky").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    table.reap();

    // the dead child never blocks a new start
    let outcome = table.start("flaky").await.unwrap();
    assert!(matches!(outcome, StartOutcome::Started(_)));
}

#[tokio::test]
async fn unconfigured_worker_is_an_error() {
    let mut table = WorkerTable::new(&names(&["gamble"]), sleeper_launcher());
    assert!(table.start("nonsense").await.is_err());
    assert!(table.stop("nonsense").await.is_err());
    assert!(!table.is_configured("nonsense"));
}

#[tokio::test]
async fn launcher_miss_is_an_error_not_a_panic() {
    let launcher: Launcher = Box::new(|_name| None);
    let mut table = WorkerTable::new(&names(&["ghost"]), launcher);
    let err = table.start("ghost").await.unwrap_err();
    assert!(err.to_string().contains("no executable"));
    let statuses = table.statuses();
    assert_eq!(statuses[0].state, WorkerState::Stopped);
}

#[tokio::test]
async fn start_all_brings_system_logger_up_first() {
    let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = order.clone();
    let launcher: Launcher = Box::new(move |name| {
        seen.lock().unwrap().push(name.to_string());
        let mut command = Command::new("sleep");
        command.arg("60");
        Some(command)
    });
    let mut table = WorkerTable::new(
        &names(&["gamble", "system_logger", "fight"]),
        launcher,
    );
    for (_, outcome) in table.start_all().await {
        outcome.unwrap();
    }
    assert_eq!(order.lock().unwrap()[0], "system_logger");
    table.stop_all().await;
}
