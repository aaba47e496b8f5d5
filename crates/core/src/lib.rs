//! Context-window tracking for AI chat pages.
//!
//! This crate detects the chat platform serving a page, observes the page
//! for its conversation container, keeps a debounced estimate of the tokens
//! in the visible conversation, and extracts an ordered transcript for
//! summarization.
//!
//! The page itself is abstracted behind the [`Document`] and
//! [`MutationSource`] traits. [`SnapshotPage`] is an in-memory implementation
//! used for captured pages, replay and tests.

mod batch;
mod config;
mod debounce;
mod dom;
mod error;
mod extractor;
mod helpers;
mod indicator;
mod observer;
mod platform;
mod report;
mod runtime;
mod selector;
mod settings;
mod snapshot;
mod summarize;
mod tokenizer;

pub use batch::{
    discover_capture_files, load_capture, process_all_captures, process_capture, write_jsonl_output,
    BatchMessage, BatchOutcome, BatchRecord, BatchSummary,
};
pub use config::TrackerConfig;
pub use debounce::Debouncer;
pub use dom::{Document, MutationBatch, MutationQueue, MutationSource, ObserveTarget, ObserverId, Page};
pub use error::{
    BatchError, DomError, GatewayError, SelectorError, SettingsError, SummarizeError, TokenizerError,
};
pub use extractor::{
    sort_in_document_order, ConversationExtractor, ObservedMessage, Role, Transcript, TranscriptEntry,
    UI_ARTIFACT_SELECTOR,
};
pub use helpers::{clean_text, normalize_message_text, truncate_chars, usage_percent};
pub use indicator::{Indicator, Progress, RecordingIndicator, UsageSnapshot};
pub use observer::{ControllerState, ObservationController, TokenState};
pub use platform::{detect_platform, selectors_for, Platform, PlatformProfile};
pub use report::{ErrorReporter, TracingReporter};
pub use runtime::{HostCommand, Runtime};
pub use selector::{Element, Selector};
pub use settings::{
    credential, credentials, installation_id, Credentials, JsonFileSettings, MemorySettings, SettingsStore,
};
pub use snapshot::{CaptureNode, NodeId, PageCapture, SnapshotPage};
pub use summarize::{
    build_prompt, summary_instruction, SummarizationGateway, SummarizeAction, SummaryRequest,
    SUCCESS_NOTIFICATION,
};
#[cfg(feature = "tiktoken")]
pub use tokenizer::TiktokenTokenizer;
pub use tokenizer::{CharApproxTokenizer, TokenEstimator, Tokenizer};

/// Settings keys.
pub mod keys {
    pub use crate::settings::{API_KEY, INSTALLATION_ID};
}

/// Quiet period after the last message mutation before recounting.
pub const DEBOUNCE_MS: u64 = 300;

/// Period of the indicator visibility repair tick.
pub const VISIBILITY_REPAIR_MS: u64 = 2_000;

/// Characters per token for the approximate estimate, in UTF-16 code units.
pub const CHARS_PER_TOKEN: usize = 4;

pub const MAX_CALLBACK_FAILURES: u32 = 3;

pub const PROGRESS_STEP_PERCENT: u8 = 5;
pub const PROGRESS_TICK_MS: u64 = 500;
pub const PROGRESS_CEILING_PERCENT: u8 = 95;

/// Length limit stated in the summary prompt.
pub const SUMMARY_MAX_CHARS: usize = 4_000;
