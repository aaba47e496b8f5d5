//! The usage indicator surface.
//!
//! The controller and the summarize action drive an [`Indicator`]; how it is
//! drawn is up to the host.

use serde::Serialize;

use crate::helpers::usage_percent;
use crate::platform::Platform;

/// Token usage against the active context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub platform: Platform,
    pub total_tokens: usize,
    pub context_window: usize,
}

impl UsageSnapshot {
    pub fn percent(&self) -> f64 {
        usage_percent(self.total_tokens, self.context_window)
    }

    /// Short label, e.g. `"42%"`.
    pub fn percent_label(&self) -> String {
        format!("{}%", self.percent().round() as u64)
    }

    /// Hover detail, e.g. `"ChatGPT: 1200 Tokens / 128000"`.
    pub fn detail_label(&self) -> String {
        format!(
            "{}: {} Tokens / {}",
            self.platform, self.total_tokens, self.context_window
        )
    }
}

/// Summarize progress as shown on the indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Progress {
    Idle,
    Working(u8),
    Done,
}

pub trait Indicator {
    fn render_usage(&mut self, usage: &UsageSnapshot);

    fn set_progress(&mut self, progress: Progress);

    fn notify(&mut self, message: &str);

    /// Whether the indicator is still attached to the page.
    fn is_connected(&self) -> bool;

    /// Re-insert the indicator after the page removed it.
    fn reattach(&mut self);
}

/// Indicator that records everything it is asked to show.
///
/// Used by the CLI, where output is printed after the fact, and by tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingIndicator {
    pub usages: Vec<UsageSnapshot>,
    pub progress: Vec<Progress>,
    pub notifications: Vec<String>,
    pub connected: bool,
    pub reattach_count: usize,
}

impl Default for RecordingIndicator {
    fn default() -> Self {
        Self {
            usages: Vec::new(),
            progress: Vec::new(),
            notifications: Vec::new(),
            connected: true,
            reattach_count: 0,
        }
    }
}

impl RecordingIndicator {
    pub fn last_usage(&self) -> Option<&UsageSnapshot> {
        self.usages.last()
    }

    pub fn last_progress(&self) -> Option<Progress> {
        self.progress.last().copied()
    }
}

impl Indicator for RecordingIndicator {
    fn render_usage(&mut self, usage: &UsageSnapshot) {
        self.usages.push(*usage);
    }

    fn set_progress(&mut self, progress: Progress) {
        self.progress.push(progress);
    }

    fn notify(&mut self, message: &str) {
        self.notifications.push(message.to_string());
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reattach(&mut self) {
        self.connected = true;
        self.reattach_count += 1;
    }
}
