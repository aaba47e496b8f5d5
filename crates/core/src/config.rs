//! Tracker configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::platform::{selectors_for, Platform};
use crate::{
    CHARS_PER_TOKEN, DEBOUNCE_MS, MAX_CALLBACK_FAILURES, PROGRESS_CEILING_PERCENT,
    PROGRESS_STEP_PERCENT, PROGRESS_TICK_MS, SUMMARY_MAX_CHARS, VISIBILITY_REPAIR_MS,
};

/// Configuration for the ObservationController and the summarize action.
/// Every field is optional in serialized form; missing values use defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Delay after the last message mutation before recounting.
    pub debounce_ms: u64,
    /// Period of the indicator visibility repair tick.
    pub visibility_repair_ms: u64,
    /// Characters per token for the fallback estimate.
    pub chars_per_token: usize,
    /// Consecutive callback failures before an observer disconnects itself.
    pub max_callback_failures: u32,
    pub progress_step_percent: u8,
    pub progress_tick_ms: u64,
    pub progress_ceiling_percent: u8,
    /// Length limit stated in the summary prompt.
    pub summary_max_chars: usize,
    /// Context window overrides keyed by platform name.
    pub context_window_overrides: HashMap<String, usize>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEBOUNCE_MS,
            visibility_repair_ms: VISIBILITY_REPAIR_MS,
            chars_per_token: CHARS_PER_TOKEN,
            max_callback_failures: MAX_CALLBACK_FAILURES,
            progress_step_percent: PROGRESS_STEP_PERCENT,
            progress_tick_ms: PROGRESS_TICK_MS,
            progress_ceiling_percent: PROGRESS_CEILING_PERCENT,
            summary_max_chars: SUMMARY_MAX_CHARS,
            context_window_overrides: HashMap::new(),
        }
    }
}

impl TrackerConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn visibility_repair(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_millis(self.visibility_repair_ms.max(1))
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms.max(1))
    }

    /// Context window for `platform`, honoring overrides. Never zero.
    pub fn context_window(&self, platform: Platform) -> usize {
        self.context_window_overrides
            .iter()
            .find(|(name, _)| Platform::from_name(name) == Some(platform))
            .map(|(_, tokens)| *tokens)
            .filter(|tokens| *tokens > 0)
            .unwrap_or(selectors_for(platform).context_window_tokens)
    }
}
