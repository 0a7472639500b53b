// src/core/tasks/driver.rs

use super::async_task::{AsyncTask, TaskOutcome, TaskState};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Polls `task` every `poll_interval` until it is done and returns its outcome.
///
/// Cancelling `cancel` wakes the driver early; the task itself decides when
/// it can settle, so polling continues at the normal pace until it does.
pub async fn drive<T: AsyncTask + ?Sized>(
    task: &mut T,
    cancel: &CancellationToken,
    poll_interval: Duration,
) -> TaskOutcome {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls = 0u64;

    loop {
        polls += 1;
        if let TaskState::Done(outcome) = task.poll(cancel) {
            debug!("Task settled after {} polls: {}", polls, outcome);
            return outcome;
        }

        if cancel.is_cancelled() {
            interval.tick().await;
        } else {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}
