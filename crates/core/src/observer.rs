//! Two-level observation of a chat page.
//!
//! A lookout observer watches the whole body for the chat container to
//! appear or disappear. While a container is present a message observer is
//! attached to it, and its mutations trigger a debounced recount of the
//! conversation's tokens.
//!
//! ```text
//!   Idle --start--> Watching --container found--> Attached
//!                      ^                              |
//!                      +------container removed-------+
//! ```
//!
//! At most one message observer is live at a time: attaching always
//! disconnects the previous one first. Batches addressed to a disconnected
//! observer are ignored, so a removed container never triggers a recount.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::debounce::Debouncer;
use crate::dom::{MutationBatch, ObserveTarget, ObserverId, Page};
use crate::error::{DomError, SelectorError};
use crate::extractor::{ConversationExtractor, Transcript};
use crate::indicator::{Indicator, UsageSnapshot};
use crate::platform::{detect_platform, selectors_for, Platform, PlatformProfile};
use crate::report::ErrorReporter;
use crate::tokenizer::TokenEstimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Watching,
    Attached,
}

/// Current token count. Reset to zero when counting fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenState {
    pub total_tokens: usize,
    pub context_window: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObserverKind {
    Lookout,
    Message,
}

impl ObserverKind {
    fn name(self) -> &'static str {
        match self {
            ObserverKind::Lookout => "lookout",
            ObserverKind::Message => "message",
        }
    }
}

pub struct ObservationController<P: Page, I: Indicator> {
    profile: &'static PlatformProfile,
    extractor: ConversationExtractor,
    estimator: TokenEstimator,
    indicator: I,
    reporter: Arc<dyn ErrorReporter>,
    max_callback_failures: u32,
    state: ControllerState,
    lookout: Option<ObserverId>,
    message_observer: Option<ObserverId>,
    /// The container currently marked as watched.
    watched: Option<P::Node>,
    debouncer: Debouncer,
    tokens: TokenState,
    lookout_failures: u32,
    message_failures: u32,
    recounts: u64,
}

impl<P: Page, I: Indicator> ObservationController<P, I> {
    pub fn new(
        platform: Platform,
        config: &TrackerConfig,
        estimator: TokenEstimator,
        indicator: I,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, SelectorError> {
        let profile = selectors_for(platform);
        Ok(Self {
            profile,
            extractor: ConversationExtractor::new(profile)?,
            estimator,
            indicator,
            reporter,
            max_callback_failures: config.max_callback_failures.max(1),
            state: ControllerState::Idle,
            lookout: None,
            message_observer: None,
            watched: None,
            debouncer: Debouncer::new(config.debounce()),
            tokens: TokenState {
                total_tokens: 0,
                context_window: config.context_window(platform),
            },
            lookout_failures: 0,
            message_failures: 0,
            recounts: 0,
        })
    }

    /// Controller for the page at `url`, or `None` when the site is not
    /// supported.
    pub fn for_location(
        url: &str,
        config: &TrackerConfig,
        estimator: TokenEstimator,
        indicator: I,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Option<Self>, SelectorError> {
        match detect_platform(url) {
            Some(platform) => {
                info!(%platform, "initializing tracker");
                Self::new(platform, config, estimator, indicator, reporter).map(Some)
            }
            None => {
                debug!(url, "unsupported page, tracker not started");
                Ok(None)
            }
        }
    }

    /// Begin watching the page body. Calling this again while the lookout is
    /// active does nothing.
    ///
    /// A container already on the page is picked up immediately rather than
    /// on the next mutation.
    pub fn start(&mut self, page: &mut P) {
        if self.lookout.is_some() {
            debug!("lookout observer already active");
            return;
        }
        info!(platform = %self.profile.platform, "starting lookout observer");
        self.lookout = Some(page.observe(ObserveTarget::Body));
        self.lookout_failures = 0;
        self.state = ControllerState::Watching;
        self.indicator.render_usage(&self.usage());
        self.run_lookout(page);
    }

    /// Dispatch one mutation batch from the host.
    pub fn handle_mutations(&mut self, page: &mut P, batch: MutationBatch, now: Instant) {
        if Some(batch.observer) == self.lookout {
            self.run_lookout(page);
        } else if Some(batch.observer) == self.message_observer {
            self.debouncer.trigger(now);
            debug!(records = batch.records, "message mutation, recount scheduled");
        } else {
            debug!(observer = %batch.observer, "ignoring batch for disconnected observer");
        }
    }

    /// Run the pending recount if its debounce window has elapsed.
    pub fn poll(&mut self, page: &mut P, now: Instant) -> bool {
        if !self.debouncer.fire_if_due(now) {
            return false;
        }
        self.run_recount(page);
        true
    }

    /// Re-insert the indicator if the page removed it.
    pub fn ensure_indicator_visible(&mut self) {
        if !self.indicator.is_connected() {
            debug!("indicator detached by page, reattaching");
            self.indicator.reattach();
        }
    }

    /// Ordered conversation for summarization. Failures yield an empty
    /// transcript.
    pub fn extract_transcript(&self, page: &P) -> Transcript {
        self.extractor.extract(page, self.reporter.as_ref())
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn platform(&self) -> Platform {
        self.profile.platform
    }

    pub fn tokens(&self) -> TokenState {
        self.tokens
    }

    pub fn usage(&self) -> UsageSnapshot {
        UsageSnapshot {
            platform: self.profile.platform,
            total_tokens: self.tokens.total_tokens,
            context_window: self.tokens.context_window,
        }
    }

    pub fn lookout_observer(&self) -> Option<ObserverId> {
        self.lookout
    }

    pub fn message_observer(&self) -> Option<ObserverId> {
        self.message_observer
    }

    pub fn watched_container(&self) -> Option<&P::Node> {
        self.watched.as_ref()
    }

    /// When the pending recount is due, if one is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Number of recounts performed so far.
    pub fn recount_count(&self) -> u64 {
        self.recounts
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    pub fn indicator_mut(&mut self) -> &mut I {
        &mut self.indicator
    }

    pub fn reporter(&self) -> Arc<dyn ErrorReporter> {
        Arc::clone(&self.reporter)
    }

    fn run_lookout(&mut self, page: &mut P) {
        match self.lookout_pass(page) {
            Ok(()) => self.lookout_failures = 0,
            Err(e) => self.callback_failed(page, ObserverKind::Lookout, &e),
        }
    }

    fn lookout_pass(&mut self, page: &mut P) -> Result<(), DomError> {
        match self.extractor.find_container(&*page)? {
            Some(container) => {
                if self.watched.as_ref() == Some(&container) {
                    return Ok(());
                }
                info!(platform = %self.profile.platform, "chat container found, attaching message observer");
                self.attach(page, container);
                self.run_recount(page);
            }
            None => {
                if self.watched.is_some() || self.message_observer.is_some() {
                    info!(platform = %self.profile.platform, "chat container removed, disconnecting message observer");
                    self.detach(page);
                }
            }
        }
        Ok(())
    }

    fn attach(&mut self, page: &mut P, container: P::Node) {
        if let Some(previous) = self.message_observer.take() {
            debug!(observer = %previous, "disconnecting previous message observer");
            page.disconnect(previous);
        }
        self.debouncer.cancel();
        self.message_observer = Some(page.observe(ObserveTarget::Subtree(container.clone())));
        self.watched = Some(container);
        self.message_failures = 0;
        self.state = ControllerState::Attached;
    }

    fn detach(&mut self, page: &mut P) {
        if let Some(previous) = self.message_observer.take() {
            page.disconnect(previous);
        }
        self.debouncer.cancel();
        self.watched = None;
        self.state = if self.lookout.is_some() {
            ControllerState::Watching
        } else {
            ControllerState::Idle
        };
    }

    fn run_recount(&mut self, page: &mut P) {
        match self.recount(page) {
            Ok(tokens) => {
                self.message_failures = 0;
                debug!(tokens, "recount complete");
            }
            Err(e) => self.callback_failed(page, ObserverKind::Message, &e),
        }
    }

    /// Re-read the conversation and refresh the indicator. On failure the
    /// count drops to zero rather than keeping a stale value.
    fn recount(&mut self, page: &P) -> Result<usize, DomError> {
        self.recounts += 1;
        let result = self
            .extractor
            .recount_text(page)
            .map(|text| self.estimator.estimate(&text));
        self.tokens.total_tokens = *result.as_ref().unwrap_or(&0);
        self.indicator.render_usage(&self.usage());
        result
    }

    fn callback_failed(&mut self, page: &mut P, kind: ObserverKind, err: &DomError) {
        warn!(observer = kind.name(), error = %err, "observer callback failed");
        self.reporter.report(kind.name(), &err.to_string(), None);

        let failures = match kind {
            ObserverKind::Lookout => {
                self.lookout_failures += 1;
                self.lookout_failures
            }
            ObserverKind::Message => {
                self.message_failures += 1;
                self.message_failures
            }
        };
        if failures < self.max_callback_failures {
            return;
        }

        error!(observer = kind.name(), failures, "disconnecting observer after repeated failures");
        if kind == ObserverKind::Lookout {
            if let Some(id) = self.lookout.take() {
                page.disconnect(id);
            }
            self.detach(page);
            self.tokens.total_tokens = 0;
            self.indicator.render_usage(&self.usage());
        } else {
            // Unmarks the container; the next lookout pass attaches a fresh
            // observer with a fresh failure budget.
            self.detach(page);
        }
    }
}
