//! Progress rendering for background tasks
//!
//! Bridges the task runner's push-based `ProgressEvent` stream to an
//! indicatif bar on the initiator's thread.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::output::OutputMode;
use crate::task::{TaskError, TaskHandle};

/// Create a spinner for indeterminate progress
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Create a 0-100 percent bar for a running task
pub fn create_task_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap()
            .progress_chars("█▓░"),
    );
    pb.set_message(msg.to_string());
    pb
}

/// Drain a task to completion, rendering its progress events.
///
/// In quiet mode the events are consumed without display; either way the
/// single terminal result is returned to the caller.
pub fn drive<T>(handle: TaskHandle<T>, mode: OutputMode, msg: &str) -> Result<T, TaskError> {
    if mode == OutputMode::Quiet {
        return handle.wait();
    }

    let bar = create_task_bar(msg);
    let result = handle.wait_with(|event| {
        bar.set_position(u64::from(event.percent));
        bar.set_message(event.message.clone());
    });
    bar.finish_and_clear();
    result
}
