//! Single-threaded driver for an [`ObservationController`].
//!
//! Host events arrive as commands that mutate the page. After each command
//! the queued mutation batches are delivered to the controller, mirroring how
//! a browser runs observer callbacks once the current task settles. The
//! loop also fires the debounce deadline and the visibility-repair tick.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::debug;

use crate::config::TrackerConfig;
use crate::dom::{MutationQueue, Page};
use crate::error::SummarizeError;
use crate::indicator::Indicator;
use crate::observer::ObservationController;
use crate::settings::SettingsStore;
use crate::summarize::{SummarizationGateway, SummarizeAction};

/// A host-side change applied to the page.
pub type HostCommand<P> = Box<dyn FnOnce(&mut P) + Send>;

pub struct Runtime<P: Page + MutationQueue, I: Indicator> {
    page: P,
    controller: ObservationController<P, I>,
    repair_period: Duration,
}

impl<P: Page + MutationQueue, I: Indicator> Runtime<P, I> {
    pub fn new(page: P, controller: ObservationController<P, I>, config: &TrackerConfig) -> Self {
        Self {
            page,
            controller,
            repair_period: config.visibility_repair(),
        }
    }

    pub fn start(&mut self) {
        self.controller.start(&mut self.page);
        self.flush_mutations();
    }

    /// Deliver every queued mutation batch to the controller.
    pub fn flush_mutations(&mut self) {
        let now = Instant::now();
        for batch in self.page.take_mutations() {
            self.controller.handle_mutations(&mut self.page, batch, now);
        }
    }

    /// Run until the command channel closes.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<HostCommand<P>>) {
        self.start();
        let mut repair = interval_at(Instant::now() + self.repair_period, self.repair_period);
        repair.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.controller.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        command(&mut self.page);
                        self.flush_mutations();
                    }
                    None => {
                        debug!("host channel closed, stopping runtime");
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.controller.poll(&mut self.page, Instant::now());
                }
                _ = repair.tick() => self.controller.ensure_indicator_visible(),
            }
        }
    }

    /// Extract the current conversation and summarize it.
    pub async fn summarize<G, S>(&mut self, action: &SummarizeAction<G, S>) -> Result<String, SummarizeError>
    where
        G: SummarizationGateway,
        S: SettingsStore,
    {
        let transcript = self.controller.extract_transcript(&self.page).to_text();
        action
            .request_summary(&transcript, self.controller.indicator_mut())
            .await
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut P {
        &mut self.page
    }

    pub fn controller(&self) -> &ObservationController<P, I> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ObservationController<P, I> {
        &mut self.controller
    }

    pub fn into_parts(self) -> (P, ObservationController<P, I>) {
        (self.page, self.controller)
    }
}
