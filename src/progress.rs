//! Progress UI (spinner and per-document lines) for retrieval runs.

use std::time::Duration;

use causelist_core::RetrievalEvent;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Counts shown in the spinner.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tally {
    pub(crate) saved: usize,
    pub(crate) failed: usize,
    pub(crate) duplicates: usize,
    pub(crate) searches: usize,
}

impl Tally {
    fn apply(&mut self, event: &RetrievalEvent) {
        match event {
            RetrievalEvent::SearchStarted { .. } => self.searches += 1,
            RetrievalEvent::DocumentSaved { .. } => self.saved += 1,
            RetrievalEvent::DocumentFailed { .. } => self.failed += 1,
            RetrievalEvent::DuplicateSkipped { .. } => self.duplicates += 1,
            _ => {}
        }
    }

    fn message(&self) -> String {
        format!(
            "search {} | saved {} | failed {} | duplicates {}",
            self.searches, self.saved, self.failed, self.duplicates
        )
    }
}

/// Line printed for a saved or failed document, if any.
pub(crate) fn event_line(event: &RetrievalEvent) -> Option<String> {
    match event {
        RetrievalEvent::DocumentSaved {
            identifier,
            location,
            ..
        } => Some(format!("[SUCCESS]: Saved '{identifier}' to {location}")),
        RetrievalEvent::DocumentFailed {
            identifier, reason, ..
        } => Some(format!("[FAILED]: '{identifier}': {reason}")),
        _ => None,
    }
}

/// Spawns the task rendering job events until the job finishes.
///
/// With `use_spinner` false, lines are printed to stdout without a spinner.
/// With `quiet` true, nothing is printed.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    quiet: bool,
    mut events: broadcast::Receiver<RetrievalEvent>,
) -> JoinHandle<Tally> {
    tokio::spawn(async move {
        let spinner = use_spinner.then(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        });

        let mut tally = Tally::default();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            tally.apply(&event);
            if !quiet {
                if let Some(line) = event_line(&event) {
                    match &spinner {
                        Some(spinner) => spinner.println(line),
                        None => println!("{line}"),
                    }
                }
            }
            if let Some(spinner) = &spinner {
                spinner.set_message(tally.message());
            }
            if event.is_terminal() {
                break;
            }
        }

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        tally
    })
}
