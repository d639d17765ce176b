//! Timed run scenarios against the in-memory relay board.
//!
//! Every test runs on paused tokio time, so sleeps advance the clock
//! exactly and dead-reckoned lengths are deterministic.

use std::time::Duration;
use windlass_rs::communication::{Action, EventLog};
use windlass_rs::config::{WindlassConfig, WindlassParameters};
use windlass_rs::hardware::RelayBoard;
use windlass_rs::hardware::gpio::MockBank;
use windlass_rs::windlass::{Direction, RunOutcome, Windlass, WindlassError};

fn params() -> WindlassParameters {
    WindlassParameters {
        chain_length: 50.0,
        min_length_up: 5.0,
        down_speed: 15.0,
        up_speed: 12.0,
        boat_length: 10.0,
    }
}

fn windlass_with_log(events: EventLog) -> (Windlass, MockBank) {
    let (board, bank) = RelayBoard::mock();
    let windlass = Windlass::new(Box::new(board), params(), &WindlassConfig::default(), events);
    (windlass, bank)
}

fn windlass() -> (Windlass, MockBank) {
    windlass_with_log(EventLog::disabled())
}

#[tokio::test(start_paused = true)]
async fn test_run_to_target_integrates_down_speed() {
    let (windlass, bank) = windlass();
    windlass.set_target_length(20.0).await;
    assert!(windlass.resume().await);

    let started = tokio::time::Instant::now();
    let outcome = windlass.run_to_target().await.unwrap();
    assert_eq!(outcome, RunOutcome::Reached);
    assert_eq!(started.elapsed(), Duration::from_secs(80));

    let status = windlass.status().await;
    assert_eq!(status.actual_length, 20.0);
    assert!(status.paused);
    assert!(!status.running);
    assert_eq!(status.direction, Direction::Idle);
    assert!(status.signal_completed);
    assert!(!bank.extend.is_active());
    assert_eq!(bank.extend.switch_count(), 1);
    assert_eq!(bank.retract.switch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pause_mid_run_keeps_position() {
    let (windlass, bank) = windlass();
    windlass.set_target_length(20.0).await;
    windlass.resume().await;

    let runner = windlass.clone();
    let run = tokio::spawn(async move { runner.run_to_target().await });
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(bank.extend.is_active());
    assert!(windlass.pause().await);

    let paused_at = tokio::time::Instant::now();
    assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Paused);
    assert!(paused_at.elapsed() <= Duration::from_millis(200));

    let status = windlass.status().await;
    assert!(status.actual_length >= 10.0 && status.actual_length <= 10.1);
    assert!(status.paused);
    assert!(!status.running);
    assert_eq!(status.direction, Direction::Idle);
    assert!(!bank.extend.is_active() && !bank.retract.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_resume_when_not_paused_is_noop() {
    let (windlass, _bank) = windlass();
    windlass.set_target_length(20.0).await;
    assert!(windlass.resume().await);
    // Already unpaused: nothing changes and the windlass stays unpaused.
    assert!(windlass.resume().await);

    let runner = windlass.clone();
    let run = tokio::spawn(async move { runner.run_to_target().await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    windlass.pause().await;
    run.await.unwrap().unwrap();
    assert!(windlass.status().await.paused);
    assert!(!windlass.pause().await);
}

#[tokio::test(start_paused = true)]
async fn test_pause_without_run_is_rejected() {
    let (windlass, _bank) = windlass();
    assert!(!windlass.pause().await);
    // Initial state is paused, so resume succeeds.
    assert!(windlass.resume().await);
}

#[tokio::test(start_paused = true)]
async fn test_completion_is_signalled_once_on_target() {
    let (windlass, _bank) = windlass();
    windlass.set_target_length(2.0).await;
    windlass.resume().await;
    assert_eq!(windlass.run_to_target().await.unwrap(), RunOutcome::Reached);
    assert!(windlass.take_completion().await);

    for _ in 0..3 {
        assert_eq!(windlass.run_to_target().await.unwrap(), RunOutcome::OnTarget);
    }
    // One raise for the first on-target check, none for the repeats.
    assert!(windlass.take_completion().await);
    assert!(!windlass.take_completion().await);
}

#[tokio::test(start_paused = true)]
async fn test_manual_moves_and_guards() {
    let (windlass, bank) = windlass();
    assert!(windlass.manual_extend(2.0).await);
    assert_eq!(windlass.run_to_target().await.unwrap(), RunOutcome::Reached);
    assert_eq!(windlass.status().await.actual_length, 2.0);

    // Below the minimum length nothing can be retrieved.
    assert!(!windlass.manual_retract(1.0).await);
    assert!(!windlass.manual_extend(0.0).await);
    assert!(matches!(
        windlass.try_manual_extend(-1.0).await,
        Err(WindlassError::InvalidCommand(_))
    ));

    windlass.set_actual_length(49.0).await.unwrap();
    assert!(!windlass.manual_extend(0.5).await);

    windlass.set_actual_length(10.0).await.unwrap();
    assert!(windlass.manual_retract(1.0).await);
    assert_eq!(windlass.run_to_target().await.unwrap(), RunOutcome::Reached);
    assert_eq!(windlass.status().await.actual_length, 9.0);
    assert_eq!(bank.retract.switch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_commands_rejected_while_running() {
    let (windlass, _bank) = windlass();
    windlass.set_target_length(10.0).await;
    windlass.resume().await;
    let runner = windlass.clone();
    let run = tokio::spawn(async move { runner.run_to_target().await });
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!windlass.manual_extend(1.0).await);
    assert!(!windlass.manual_retract(1.0).await);
    assert!(windlass.set_actual_length(3.0).await.is_err());
    assert_eq!(windlass.run_to_target().await.unwrap(), RunOutcome::Busy);

    assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Reached);
    assert_eq!(windlass.status().await.actual_length, 10.0);
}

#[tokio::test(start_paused = true)]
async fn test_outputs_never_both_active() {
    let (windlass, bank) = windlass();
    let watcher_bank = bank.clone();
    let watcher = tokio::spawn(async move {
        for _ in 0..2_000 {
            assert!(!(watcher_bank.extend.is_active() && watcher_bank.retract.is_active()));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    windlass.set_target_length(12.0).await;
    windlass.resume().await;
    windlass.run_to_target().await.unwrap();
    windlass.set_target_length(6.0).await;
    windlass.resume().await;
    windlass.run_to_target().await.unwrap();
    assert!(windlass.manual_extend(3.0).await);
    windlass.run_to_target().await.unwrap();

    assert_eq!(windlass.status().await.actual_length, 9.0);
    watcher.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hardware_fault_aborts_run() {
    let (windlass, bank) = windlass();
    windlass.set_target_length(20.0).await;
    windlass.resume().await;
    bank.extend.set_failing(true);

    let result = windlass.run_to_target().await;
    assert!(matches!(result, Err(WindlassError::Hardware(_))));
    let status = windlass.status().await;
    assert!(!status.running);
    assert!(status.paused);
    assert!(!bank.extend.is_active() && !bank.retract.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_listener_follows_commands_until_quit() {
    let (windlass, bank) = windlass();
    let listener = windlass.clone();
    let handle = tokio::spawn(async move { listener.run_listener().await });

    windlass.set_target_length(10.0).await;
    windlass.resume().await;
    tokio::time::sleep(Duration::from_secs(41)).await;
    assert_eq!(windlass.status().await.actual_length, 10.0);

    windlass.set_target_length(5.0).await;
    windlass.resume().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(bank.retract.is_active());
    windlass.quit_listener().await;
    handle.await.unwrap();

    let status = windlass.status().await;
    assert!(status.quit);
    assert!(!status.running);
    assert!(!bank.retract.is_active());
    assert!(!bank.retract.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_run_events_are_recorded() {
    let (log, mut rx) = EventLog::channel(16, 0);
    let (windlass, _bank) = windlass_with_log(log);
    windlass.set_target_length(1.0).await;
    windlass.resume().await;
    windlass.run_to_target().await.unwrap();

    let actions: Vec<Action> = std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.action).collect();
    assert_eq!(actions, vec![Action::SetTarget, Action::ExtendToTarget, Action::TargetReached]);
}

#[tokio::test(start_paused = true)]
async fn test_speed_change_mid_run_starts_new_leg() {
    let (log, mut rx) = EventLog::channel(16, 0);
    let (windlass, _bank) = windlass_with_log(log);
    windlass.set_target_length(20.0).await;
    windlass.resume().await;
    let started = tokio::time::Instant::now();
    let runner = windlass.clone();
    let run = tokio::spawn(async move { runner.run_to_target().await });

    // 40 s at 15 m/min.
    tokio::time::sleep(Duration::from_millis(40_100)).await;
    assert_eq!(windlass.status().await.actual_length, 10.0);

    windlass
        .update_parameters(WindlassParameters {
            down_speed: 30.0,
            ..params()
        })
        .await;
    assert_eq!(windlass.parameters().await.down_speed, 30.0);

    // 10 s more at 30 m/min from where the first leg ended.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let actual = windlass.status().await.actual_length;
    assert!((actual - 15.0).abs() < 1e-9, "actual {}", actual);

    assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Reached);
    assert_eq!(started.elapsed(), Duration::from_secs(60));
    assert_eq!(windlass.status().await.actual_length, 20.0);

    let mut actions = Vec::new();
    while let Ok(event) = rx.try_recv() {
        actions.push(event.action);
    }
    assert_eq!(
        actions,
        vec![Action::SetTarget, Action::ExtendToTarget, Action::BoatSettings, Action::TargetReached]
    );
}

#[tokio::test]
async fn test_non_finite_manual_distance_is_rejected() {
    let (windlass, _bank) = windlass();
    windlass.set_actual_length(20.0).await.unwrap();
    for meters in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        assert!(matches!(
            windlass.try_manual_extend(meters).await,
            Err(WindlassError::InvalidCommand(_))
        ));
        assert!(!windlass.manual_retract(meters).await);
    }
    let status = windlass.status().await;
    assert!(status.paused);
    assert_eq!(status.direction, Direction::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_resume_towards_other_side_redirects_without_completion() {
    let (windlass, bank) = windlass();
    windlass.set_target_length(20.0).await;
    windlass.resume().await;
    let runner = windlass.clone();
    let run = tokio::spawn(async move { runner.run_to_target().await });

    // Between two ticks: pause, move the target behind the chain, resume.
    tokio::time::sleep(Duration::from_millis(4_100)).await;
    assert!(windlass.pause().await);
    windlass.set_target_length(0.0).await;
    assert!(windlass.resume().await);

    assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Redirected);
    let status = windlass.status().await;
    assert!(!status.running);
    assert!(!status.paused);
    assert_eq!(status.direction, Direction::Retracting);
    assert_eq!(windlass.completion_generation(), 0);
    assert!(!bank.extend.is_active() && !bank.retract.is_active());

    // The retrieving leg signals completion once it is done.
    assert_eq!(windlass.run_to_target().await.unwrap(), RunOutcome::Reached);
    assert_eq!(windlass.completion_generation(), 1);
    assert_eq!(windlass.status().await.actual_length, 0.0);
}
