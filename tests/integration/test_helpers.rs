// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use fileseal::core::tasks::{AsyncTask, TaskOutcome, TaskState};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, reload};

/// Upper bound on polls before a test task is considered stuck.
pub const MAX_POLLS: usize = 1_000;

/// Sets up minimal tracing for tests. Safe to call from every test.
pub fn init_tracing() {
    let env_filter = EnvFilter::new("warn");
    let (filter, _reload_handle) = reload::Layer::new(env_filter);

    // Ignore the error if another test already installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Polls `task` until it is done and returns its outcome.
pub fn poll_to_completion<T: AsyncTask + ?Sized>(
    task: &mut T,
    cancel: &CancellationToken,
) -> TaskOutcome {
    for _ in 0..MAX_POLLS {
        if let TaskState::Done(outcome) = task.poll(cancel) {
            return outcome;
        }
    }
    panic!("task still running after {MAX_POLLS} polls");
}

/// Polls `task` once with a token that is never cancelled.
pub fn poll_once<T: AsyncTask + ?Sized>(task: &mut T) -> TaskState {
    task.poll(&CancellationToken::new())
}
