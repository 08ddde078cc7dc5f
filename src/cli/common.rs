//! Shared plumbing for subcommands: output mode and operation progress.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::service::{OperationHandle, UpdaterService};
use crate::status::OperationEvent;

/// Set to any value to hide progress bars.
const NO_PROGRESS_ENV: &str = "REFORGE_NO_PROGRESS";

/// What every subcommand receives.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub service: UpdaterService,
    pub json: bool,
    pub quiet: bool,
}

impl CommandContext {
    #[must_use]
    pub const fn new(service: UpdaterService, json: bool, quiet: bool) -> Self {
        Self {
            service,
            json,
            quiet,
        }
    }

    /// Progress goes to the terminal only in text mode.
    #[must_use]
    pub fn shows_progress(&self) -> bool {
        !self.json && !self.quiet && std::env::var_os(NO_PROGRESS_ENV).is_none()
    }

    /// Prints `value` as pretty JSON.
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
        Ok(())
    }
}

fn progress_bar(visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}") {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar
}

fn render(bar: &ProgressBar, event: OperationEvent) {
    match event {
        OperationEvent::Progress {
            percent,
            step,
            ..
        } => {
            bar.set_position(u64::from(percent));
            bar.set_message(step);
        }
        OperationEvent::Log(line) => bar.println(line),
    }
}

/// Drives an operation to completion, rendering its events.
pub async fn follow<T>(ctx: &CommandContext, handle: OperationHandle<T>) -> Result<T> {
    let kind = handle.kind();
    let bar = progress_bar(ctx.shows_progress());
    let (mut events, mut task) = handle.into_parts();

    let joined = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => render(&bar, event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} progress events", skipped);
                }
                Err(RecvError::Closed) => break (&mut task).await,
            },
            joined = &mut task => break joined,
        }
    };

    while let Ok(event) = events.try_recv() {
        render(&bar, event);
    }
    bar.finish_and_clear();

    joined.with_context(|| format!("{kind} task did not complete"))?
}
