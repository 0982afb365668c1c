//! Progress reporting for pipeline runs.
//!
//! The dispatcher reports every stage through a [`ProgressObserver`]
//! handed to it by the caller instead of printing on its own.

use crate::models::AnalysisKind;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// A pipeline stage transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<'a> {
    Fetching { kind: AnalysisKind },
    Fetched { rows: usize, skipped: usize },
    Bucketized { buckets: usize, series: usize },
    RoundStarted { name: &'a str, index: usize, total: usize, parties: usize },
    RoundFinished { name: &'a str },
    Assembled,
}

/// Receives stage transitions from the dispatcher.
pub trait ProgressObserver {
    fn on_event(&mut self, event: Event<'_>);
}

impl<O: ProgressObserver + ?Sized> ProgressObserver for Box<O> {
    fn on_event(&mut self, event: Event<'_>) {
        (**self).on_event(event);
    }
}

/// Ignores every event.
#[derive(Debug, Default)]
pub struct SilentObserver;

impl ProgressObserver for SilentObserver {
    fn on_event(&mut self, _event: Event<'_>) {}
}

/// Status lines on stderr and a spinner while a round waits for peers.
#[derive(Default)]
pub struct ConsoleObserver {
    spinner: Option<ProgressBar>,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

impl ProgressObserver for ConsoleObserver {
    fn on_event(&mut self, event: Event<'_>) {
        match event {
            Event::Fetching { kind } => eprintln!("📥 Requesting {} data...", kind),
            Event::Fetched { rows, skipped } => {
                if skipped > 0 {
                    eprintln!("   Received {} rows ({} incomplete rows skipped)", rows, skipped);
                } else {
                    eprintln!("   Received {} rows", rows);
                }
            }
            Event::Bucketized { buckets, series } => {
                eprintln!("🧮 Binned into {} series of {} buckets", series, buckets);
            }
            Event::RoundStarted {
                name,
                index,
                total,
                parties,
            } => {
                self.stop_spinner();
                let spinner = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
                    spinner.set_style(style);
                }
                spinner.set_message(format!(
                    "Calculating {} histogram with {} parties (round {}/{})",
                    name,
                    parties,
                    index + 1,
                    total
                ));
                spinner.enable_steady_tick(Duration::from_millis(120));
                self.spinner = Some(spinner);
            }
            Event::RoundFinished { name } => {
                self.stop_spinner();
                eprintln!("🔐 {} histogram aggregated", name);
            }
            Event::Assembled => {
                self.stop_spinner();
                eprintln!("📝 Report assembled\n");
            }
        }
    }
}

impl Drop for ConsoleObserver {
    fn drop(&mut self) {
        self.stop_spinner();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records events as strings for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingObserver {
        pub events: Vec<String>,
    }

    impl ProgressObserver for RecordingObserver {
        fn on_event(&mut self, event: Event<'_>) {
            self.events.push(format!("{:?}", event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_observer_handles_round_sequence() {
        let mut observer = ConsoleObserver::new();
        observer.on_event(Event::RoundStarted {
            name: "male",
            index: 0,
            total: 2,
            parties: 2,
        });
        assert!(observer.spinner.is_some());
        observer.on_event(Event::RoundFinished { name: "male" });
        assert!(observer.spinner.is_none());
    }

    #[test]
    fn test_boxed_observer_forwards() {
        let mut observer: Box<dyn ProgressObserver> = Box::new(SilentObserver);
        observer.on_event(Event::Assembled);
    }

    #[test]
    fn test_recording_observer() {
        let mut observer = testing::RecordingObserver::default();
        observer.on_event(Event::Fetched { rows: 3, skipped: 1 });
        assert_eq!(observer.events, vec!["Fetched { rows: 3, skipped: 1 }"]);
    }
}
