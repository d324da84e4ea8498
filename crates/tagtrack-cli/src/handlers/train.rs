//! Train command handler.
//!
//! Submits the run, then follows its events until a terminal state. Ctrl+C
//! cancels the run. `CANCELED` is published before the trainer has stopped,
//! so the handler also waits for the run to settle, and the trainer is gone
//! before the process exits.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use tagtrack_core::{EventBus, JobId, JobState, SubscriptionId, TaskEvent, Topic};

use crate::bootstrap::CliContext;
use crate::commands::RunArgs;
use crate::error::CliError;
use crate::presentation::TrainingProgressPrinter;

/// Execute the train command.
///
/// With `json` every event of the run is printed as one JSON object per
/// line; otherwise output and progress are rendered for humans.
pub async fn execute(ctx: &CliContext, args: &RunArgs, json: bool) -> Result<(), CliError> {
    run_until(ctx, args, json, tokio::signal::ctrl_c()).await
}

/// Like [`execute`], with `interrupt` standing in for Ctrl+C.
async fn run_until<I>(ctx: &CliContext, args: &RunArgs, json: bool, interrupt: I) -> Result<(), CliError>
where
    I: Future<Output = io::Result<()>>,
{
    let bus = Arc::clone(ctx.manager.bus());
    // Subscribed before submitting so QUEUED is not missed.
    let (subscriptions, mut events) = subscribe_all(&bus);

    let result = match ctx.submit(args) {
        Ok(id) => {
            debug!(target: "tagtrack.manager", job_id = %id, "Following training run");
            let result = follow(ctx, id, &args.name, &mut events, json, interrupt).await;
            // A no-op once terminal; otherwise nothing may outlive the handler.
            ctx.manager.cancel(id);
            ctx.manager.wait(id).await;
            result
        }
        Err(e) => Err(e),
    };

    for subscription in subscriptions {
        bus.off(subscription);
    }
    result
}

fn subscribe_all(bus: &EventBus) -> (Vec<SubscriptionId>, mpsc::UnboundedReceiver<TaskEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscriptions = Topic::ALL
        .into_iter()
        .map(|topic| {
            let tx = tx.clone();
            bus.on(topic, move |event| {
                let _ = tx.send(event.clone());
            })
        })
        .collect();
    (subscriptions, rx)
}

async fn follow<I>(
    ctx: &CliContext,
    id: JobId,
    name: &str,
    events: &mut mpsc::UnboundedReceiver<TaskEvent>,
    json: bool,
    interrupt: I,
) -> Result<(), CliError>
where
    I: Future<Output = io::Result<()>>,
{
    tokio::pin!(interrupt);
    let mut printer = (!json).then(|| TrainingProgressPrinter::new(name));
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Err(CliError::Io("event stream closed".into()));
                };
                if event.job_id() != id {
                    continue;
                }

                if json {
                    let line = serde_json::to_string(&event).map_err(|e| CliError::Io(e.to_string()))?;
                    println!("{line}");
                } else if let Some(printer) = printer.as_mut() {
                    render(printer, &event);
                }

                if let TaskEvent::TaskState { state, code, error, .. } = event {
                    if state.is_terminal() {
                        return outcome(name, state, code, error);
                    }
                }
            }
            signal = &mut interrupt, if !interrupted => {
                signal?;
                interrupted = true;
                if let Some(printer) = printer.as_ref() {
                    printer.note("Interrupted, canceling training");
                }
                ctx.manager.cancel(id);
            }
        }
    }
}

fn render(printer: &mut TrainingProgressPrinter, event: &TaskEvent) {
    match event {
        TaskEvent::TaskLog { line, .. } => printer.log(line),
        TaskEvent::TaskProgress { progress, .. } => printer.update(progress),
        TaskEvent::TaskState { state, .. } if state.is_terminal() => printer.finish(*state),
        TaskEvent::TaskState { state, .. } => printer.note(&state.to_string()),
    }
}

fn outcome(
    name: &str,
    state: JobState,
    code: Option<i32>,
    error: Option<String>,
) -> Result<(), CliError> {
    match state {
        JobState::Failed => Err(CliError::TrainingFailed {
            name: name.to_string(),
            code,
            error,
        }),
        JobState::Canceled => Err(CliError::Canceled(name.to_string())),
        JobState::Queued | JobState::Running | JobState::Completed => Ok(()),
    }
}
