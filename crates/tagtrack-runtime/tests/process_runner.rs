//! Real trainer processes, driven through `sh -c`.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use tagtrack_core::{EventBus, JobState, TaskEvent, TrainerLaunch, TrainingBackend, TrainingConfig};
use tagtrack_runtime::{JobQueue, ProcessRunner, RunnerOptions, TrainingManager};

use common::{CapturedOutput, EventRecorder, sh_options};

fn cfg() -> TrainingConfig {
    TrainingConfig::new(TrainingBackend::MusubiQwenImage, "proc", "cats", 100)
        .with_batch_size(1)
        .with_grad_accum(1)
        .with_gpu_index(1)
}

fn manager_with(options: RunnerOptions) -> (TrainingManager, EventRecorder) {
    let bus = Arc::new(EventBus::new());
    let recorder = EventRecorder::attach(&bus);
    let mut manager = TrainingManager::new(JobQueue::new(bus, 1));
    manager.register(ProcessRunner::new(TrainingBackend::MusubiQwenImage, options));
    (manager, recorder)
}

#[tokio::test]
async fn output_is_logged_and_parsed() {
    let script = r#"
        echo "loading model"
        echo "gpu=$CUDA_VISIBLE_DEVICES"
        echo "epoch 1/1 step 10/999 ips=2.5 ETA 36s loss=0.25"
        echo "step 20/999" >&2
    "#;
    let (manager, events) = manager_with(sh_options(script));

    let id = manager.run_training(cfg()).unwrap();
    assert_eq!(events.terminal(id).await.state(), Some(JobState::Completed));

    let logs = events.logs(id);
    assert!(logs.contains(&"loading model".to_string()));
    assert!(logs.contains(&"gpu=1".to_string()));

    let progress = events.progress(id);
    assert_eq!(progress.len(), 2);
    let first = progress.iter().find(|p| p.step == 10).unwrap();
    assert_eq!(first.total_steps, 100, "trainer total must be replaced");
    assert_eq!(first.eta_secs, Some(36));
    assert_eq!(first.ips, Some(2.5));
    assert_eq!(first.loss, Some(0.25));
    assert_eq!(first.epoch, Some(1));
}

#[tokio::test]
async fn fallback_eta_when_trainer_reports_none() {
    let script = r#"
        echo "step 10/100"
        sleep 1
        echo "step 20/100"
    "#;
    let (manager, events) = manager_with(sh_options(script));

    let id = manager.run_training(cfg()).unwrap();
    events.terminal(id).await;

    let progress = events.progress(id);
    assert_eq!(progress[0].eta_secs, None);
    // 10 steps in roughly a second with 80 left.
    let eta = progress[1].eta_secs.unwrap();
    assert!((40..=80).contains(&eta), "eta was {eta}");

    manager.wait(id).await;
    assert!(manager.speed_cache().is_empty());
}

#[tokio::test]
async fn nonzero_exit_is_failed_with_code() {
    let (manager, events) = manager_with(sh_options("echo oops; exit 3"));

    let id = manager.run_training(cfg()).unwrap();

    match events.terminal(id).await {
        TaskEvent::TaskState { state, code, .. } => {
            assert_eq!(state, JobState::Failed);
            assert_eq!(code, Some(3));
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
}

#[tokio::test]
async fn missing_program_is_failed_with_error() {
    let options = RunnerOptions::simulated().with_launch(TrainerLaunch::new("/nonexistent/musubi"));
    let (manager, events) = manager_with(options);

    let id = manager.run_training(cfg()).unwrap();

    match events.terminal(id).await {
        TaskEvent::TaskState { state, error, .. } => {
            assert_eq!(state, JobState::Failed);
            assert!(error.unwrap().contains("/nonexistent/musubi"));
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
}

#[tokio::test]
async fn cancel_terminates_the_process() {
    let (manager, events) = manager_with(sh_options("echo started; sleep 30"));

    let id = manager.run_training(cfg()).unwrap();
    events.wait_until(|r| r.logs(id).contains(&"started".to_string())).await;

    assert!(manager.cancel(id));
    assert_eq!(events.terminal(id).await.state(), Some(JobState::Canceled));

    // The single worker slot frees up once the trainer is gone.
    let next = manager.run_training(cfg()).unwrap();
    events
        .wait_until(|r| r.logs(next).contains(&"started".to_string()))
        .await;
    assert!(manager.cancel(next));
    assert_eq!(events.terminal(next).await.state(), Some(JobState::Canceled));
}

#[tokio::test]
async fn stubborn_trainer_is_killed_after_grace() {
    let runner = Arc::new(ProcessRunner::new(
        TrainingBackend::MusubiQwenImage,
        sh_options("trap '' TERM; echo started; sleep 30"),
    ));
    let run = Arc::new(runner.training_run(cfg(), 100));
    let output = Arc::new(CapturedOutput::default());

    let task = {
        let run = Arc::clone(&run);
        let output = Arc::clone(&output);
        tokio::spawn(async move { run.execute(output.as_ref()).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while output.logs.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    run.cancel();
    run.cancel();

    let code = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("trainer survived the forced kill")
        .unwrap()
        .unwrap();
    assert_eq!(code, -1);
}

#[tokio::test]
async fn wait_after_cancel_returns_once_the_trainer_is_gone() {
    let script = r#"
        trap '' TERM
        echo "pid $$"
        echo "step 1/100"
        while true; do sleep 0.05; done
    "#;
    let (manager, events) = manager_with(sh_options(script));

    let id = manager.run_training(cfg()).unwrap();
    events.wait_until(|r| !r.progress(id).is_empty()).await;
    let pid = events
        .logs(id)
        .iter()
        .find_map(|line| line.strip_prefix("pid ").map(str::to_string))
        .unwrap();
    assert_eq!(manager.speed_cache().len(), 1);

    assert!(manager.cancel(id));
    // CANCELED is already out while the trainer still ignores SIGTERM.
    assert_eq!(manager.queue().state(id), Some(JobState::Canceled));

    tokio::time::timeout(Duration::from_secs(5), manager.wait(id))
        .await
        .expect("run never settled");

    let alive = std::process::Command::new("kill")
        .args(["-0", &pid])
        .status()
        .unwrap()
        .success();
    assert!(!alive, "trainer {pid} outlived wait");
    assert!(manager.speed_cache().is_empty());
}

#[tokio::test]
async fn cancel_before_start_skips_launch() {
    let runner = Arc::new(ProcessRunner::new(
        TrainingBackend::MusubiQwenImage,
        sh_options("echo should-not-run"),
    ));
    let run = runner.training_run(cfg(), 100);
    run.cancel();

    let output = CapturedOutput::default();
    let code = run.execute(&output).await.unwrap();

    assert_ne!(code, 0);
    assert!(output.logs.lock().unwrap().is_empty());
}
