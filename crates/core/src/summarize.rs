//! The summarize action and its gateway boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{GatewayError, SummarizeError};
use crate::helpers::truncate_chars;
use crate::indicator::{Indicator, Progress};
use crate::report::ErrorReporter;
use crate::settings::{credentials, SettingsStore};

pub const SUCCESS_NOTIFICATION: &str = "Summary copied to clipboard!";

/// One summarization call as sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRequest {
    pub prompt: String,
    pub credential: String,
    pub installation_id: String,
}

/// Backend that turns a prompt into a summary. A single attempt, no retry.
#[async_trait]
pub trait SummarizationGateway: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, GatewayError>;
}

#[async_trait]
impl<T: SummarizationGateway + ?Sized> SummarizationGateway for Arc<T> {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, GatewayError> {
        (**self).summarize(request).await
    }
}

pub fn summary_instruction(max_chars: usize) -> String {
    format!(
        "You are a precision-focused summarization engine. Analyze the conversation below \
         and write one comprehensive, well-organized summary. Extract every key decision, \
         action item, critical data point, open question and definitive conclusion, and \
         synthesize them into a coherent narrative that is easy to read. \
         CRITICAL INSTRUCTION: The final summary must be under {max_chars} characters in total length."
    )
}

pub fn build_prompt(transcript: &str, max_chars: usize) -> String {
    format!(
        "{}\n\n---\n\nCONVERSATION TEXT:\n\n{}",
        summary_instruction(max_chars),
        transcript
    )
}

/// Clears the in-flight flag however the action ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SummarizeAction<G, S> {
    gateway: G,
    settings: S,
    reporter: Arc<dyn ErrorReporter>,
    in_flight: AtomicBool,
    step: u8,
    tick: Duration,
    ceiling: u8,
    max_chars: usize,
}

impl<G: SummarizationGateway, S: SettingsStore> SummarizeAction<G, S> {
    pub fn new(gateway: G, settings: S, reporter: Arc<dyn ErrorReporter>, config: &TrackerConfig) -> Self {
        Self {
            gateway,
            settings,
            reporter,
            in_flight: AtomicBool::new(false),
            step: config.progress_step_percent.max(1),
            tick: config.progress_tick(),
            ceiling: config.progress_ceiling_percent.min(99),
            max_chars: config.summary_max_chars,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Summarize `transcript`, driving `indicator` through the progress
    /// states. Whatever the outcome, the indicator ends up `Idle`.
    pub async fn request_summary<I: Indicator>(
        &self,
        transcript: &str,
        indicator: &mut I,
    ) -> Result<String, SummarizeError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("summary already in progress");
            return Err(SummarizeError::Busy);
        }
        let _in_flight = InFlight(&self.in_flight);

        let result = self.run(transcript, indicator).await;
        match &result {
            Ok(summary) => {
                info!(chars = summary.chars().count(), preview = truncate_chars(summary, 80), "summary ready");
                indicator.set_progress(Progress::Working(100));
                indicator.set_progress(Progress::Done);
                indicator.notify(SUCCESS_NOTIFICATION);
            }
            Err(e) => {
                warn!(error = %e, "summarization failed");
                if matches!(e, SummarizeError::Gateway(_) | SummarizeError::Settings(_)) {
                    self.reporter.report("summarize", &e.to_string(), None);
                }
                indicator.notify(&format!("Summarization failed: {e}"));
            }
        }
        indicator.set_progress(Progress::Idle);
        result
    }

    async fn run<I: Indicator>(&self, transcript: &str, indicator: &mut I) -> Result<String, SummarizeError> {
        if transcript.trim().is_empty() {
            return Err(SummarizeError::EmptyTranscript);
        }
        let credentials = credentials(&self.settings)?.ok_or(SummarizeError::MissingCredential)?;
        let request = SummaryRequest {
            prompt: build_prompt(transcript, self.max_chars),
            credential: credentials.api_key,
            installation_id: credentials.installation_id,
        };
        debug!(prompt_chars = request.prompt.chars().count(), "sending summary request");

        let call = self.gateway.summarize(&request);
        tokio::pin!(call);
        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
        let mut percent = 0u8;
        indicator.set_progress(Progress::Working(percent));

        let reply = loop {
            tokio::select! {
                biased;
                reply = &mut call => break reply,
                _ = ticker.tick() => {
                    percent = percent.saturating_add(self.step).min(self.ceiling);
                    indicator.set_progress(Progress::Working(percent));
                }
            }
        };
        Ok(reply?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::*;
    use crate::indicator::RecordingIndicator;
    use crate::report::testing::RecordingReporter;
    use crate::error::SettingsError;
    use crate::settings::{MemorySettings, INSTALLATION_ID};

    struct FakeGateway {
        delay: Duration,
        reply: Result<String, GatewayError>,
        requests: Mutex<Vec<SummaryRequest>>,
    }

    impl FakeGateway {
        fn replying(delay: Duration, reply: Result<String, GatewayError>) -> Self {
            Self {
                delay,
                reply,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SummarizationGateway for FakeGateway {
        async fn summarize(&self, request: &SummaryRequest) -> Result<String, GatewayError> {
            self.requests.lock().unwrap().push(request.clone());
            tokio::time::sleep(self.delay).await;
            self.reply.clone()
        }
    }

    fn action(
        gateway: Arc<FakeGateway>,
        settings: MemorySettings,
        reporter: Arc<RecordingReporter>,
    ) -> SummarizeAction<Arc<FakeGateway>, MemorySettings> {
        SummarizeAction::new(gateway, settings, reporter, &TrackerConfig::default())
    }

    /// Counts reads and writes against an in-memory store.
    #[derive(Default)]
    struct CountingSettings {
        inner: MemorySettings,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl SettingsStore for CountingSettings {
        fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value)
        }

        fn get_all(&self, keys: &[&str]) -> Result<Vec<Option<String>>, SettingsError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_all(keys)
        }
    }

    fn working_values(indicator: &RecordingIndicator) -> Vec<u8> {
        indicator
            .progress
            .iter()
            .filter_map(|p| match p {
                Progress::Working(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = build_prompt("User: Hello\n\n", 4000);
        assert!(prompt.contains("under 4000 characters"));
        assert!(prompt.ends_with("\n\n---\n\nCONVERSATION TEXT:\n\nUser: Hello\n\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_transcript_fails_fast() {
        let gateway = Arc::new(FakeGateway::replying(Duration::ZERO, Ok("x".into())));
        let reporter = Arc::new(RecordingReporter::default());
        let action = action(gateway.clone(), MemorySettings::with_credential("k"), reporter.clone());
        let mut indicator = RecordingIndicator::default();

        let err = action.request_summary(" \n\t", &mut indicator).await.unwrap_err();
        assert!(matches!(err, SummarizeError::EmptyTranscript));
        assert_eq!(gateway.calls(), 0);
        assert_eq!(
            indicator.notifications,
            vec!["Summarization failed: There is no text to summarize.".to_string()]
        );
        assert_eq!(indicator.last_progress(), Some(Progress::Idle));
        assert!(reporter.contexts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credential_skips_gateway() {
        let gateway = Arc::new(FakeGateway::replying(Duration::ZERO, Ok("x".into())));
        let action = action(gateway.clone(), MemorySettings::new(), Arc::new(RecordingReporter::default()));
        let mut indicator = RecordingIndicator::default();

        let err = action.request_summary("User: hi", &mut indicator).await.unwrap_err();
        assert!(matches!(err, SummarizeError::MissingCredential));
        assert_eq!(gateway.calls(), 0);
        assert!(indicator.notifications[0].contains("API key not set"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_animates_then_resets() {
        let gateway = Arc::new(FakeGateway::replying(Duration::from_millis(2_100), Ok("the summary".into())));
        let settings = MemorySettings::with_credential("sk-test");
        let action = action(gateway.clone(), settings, Arc::new(RecordingReporter::default()));
        let mut indicator = RecordingIndicator::default();

        let summary = action.request_summary("User: Hello\n\n", &mut indicator).await.unwrap();
        assert_eq!(summary, "the summary");
        assert!(!action.is_busy());

        // Four ticks fit before the reply arrives
        assert_eq!(working_values(&indicator), vec![0, 5, 10, 15, 20, 100]);
        assert_eq!(
            indicator.progress[indicator.progress.len() - 2..],
            [Progress::Done, Progress::Idle]
        );
        assert_eq!(indicator.notifications, vec![SUCCESS_NOTIFICATION.to_string()]);

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests[0].credential, "sk-test");
        assert!(requests[0].prompt.ends_with("CONVERSATION TEXT:\n\nUser: Hello\n\n"));
        assert_eq!(
            action.settings.get(INSTALLATION_ID).unwrap().as_deref(),
            Some(requests[0].installation_id.as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_read_once_per_request() {
        let gateway = Arc::new(FakeGateway::replying(Duration::ZERO, Ok("ok".into())));
        let settings = CountingSettings {
            inner: MemorySettings::with_credential("sk-test"),
            ..Default::default()
        };
        let action = SummarizeAction::new(
            gateway.clone(),
            settings,
            Arc::new(RecordingReporter::default()),
            &TrackerConfig::default(),
        );
        let mut indicator = RecordingIndicator::default();

        action.request_summary("User: one", &mut indicator).await.unwrap();
        assert_eq!(action.settings.reads.load(Ordering::SeqCst), 1);
        // First use persists the generated installation id
        assert_eq!(action.settings.writes.load(Ordering::SeqCst), 1);

        action.request_summary("User: two", &mut indicator).await.unwrap();
        assert_eq!(action.settings.reads.load(Ordering::SeqCst), 2);
        assert_eq!(action.settings.writes.load(Ordering::SeqCst), 1);

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests[0].installation_id, requests[1].installation_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_stops_at_ceiling() {
        let gateway = Arc::new(FakeGateway::replying(Duration::from_secs(60), Ok("done".into())));
        let action = action(gateway, MemorySettings::with_credential("k"), Arc::new(RecordingReporter::default()));
        let mut indicator = RecordingIndicator::default();

        action.request_summary("User: long wait", &mut indicator).await.unwrap();
        let values = working_values(&indicator);
        let (last, animated) = values.split_last().unwrap();
        assert_eq!(*last, 100);
        assert_eq!(animated.iter().max(), Some(&95));
        assert!(animated.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_failure_is_retryable() {
        let failing = Arc::new(FakeGateway::replying(
            Duration::from_millis(700),
            Err(GatewayError::Status {
                status: 500,
                message: "boom".into(),
            }),
        ));
        let reporter = Arc::new(RecordingReporter::default());
        let action = action(failing.clone(), MemorySettings::with_credential("k"), reporter.clone());
        let mut indicator = RecordingIndicator::default();

        let err = action.request_summary("User: hi", &mut indicator).await.unwrap_err();
        assert!(matches!(err, SummarizeError::Gateway(GatewayError::Status { status: 500, .. })));
        assert_eq!(
            indicator.notifications,
            vec!["Summarization failed: gateway returned HTTP 500: boom".to_string()]
        );
        assert_eq!(indicator.last_progress(), Some(Progress::Idle));
        assert_eq!(reporter.contexts(), vec!["summarize".to_string()]);

        // Not stuck: a second attempt reaches the gateway again
        assert!(!action.is_busy());
        let _ = action.request_summary("User: hi", &mut indicator).await;
        assert_eq!(failing.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_request_is_busy() {
        let gateway = Arc::new(FakeGateway::replying(Duration::from_secs(1), Ok("s".into())));
        let action = action(gateway.clone(), MemorySettings::with_credential("k"), Arc::new(RecordingReporter::default()));
        let mut first = RecordingIndicator::default();
        let mut second = RecordingIndicator::default();

        let (a, b) = tokio::join!(
            action.request_summary("User: one", &mut first),
            action.request_summary("User: two", &mut second),
        );
        assert!(a.is_ok());
        assert!(matches!(b, Err(SummarizeError::Busy)));
        assert_eq!(gateway.calls(), 1);
    }
}
