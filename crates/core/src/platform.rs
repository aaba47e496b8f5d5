//! Supported chat sites and the DOM selectors used to read them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A supported chat site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "ChatGPT")]
    ChatGpt,
    Gemini,
    Claude,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::ChatGpt, Platform::Gemini, Platform::Claude];

    /// Display name, also used as the key for configuration overrides.
    pub fn name(self) -> &'static str {
        match self {
            Platform::ChatGpt => "ChatGPT",
            Platform::Gemini => "Gemini",
            Platform::Claude => "Claude",
        }
    }

    /// Look up a platform by its display name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Platform> {
        Platform::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selectors and context window for one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    pub platform: Platform,
    pub url_prefix: &'static str,
    pub main_container_selector: &'static str,
    pub user_message_selector: &'static str,
    pub assistant_message_selector: &'static str,
    pub context_window_tokens: usize,
}

static PROFILES: [PlatformProfile; 3] = [
    PlatformProfile {
        platform: Platform::ChatGpt,
        url_prefix: "https://chatgpt.com/",
        main_container_selector: "#main",
        user_message_selector: r#"div[data-message-author-role="user"]"#,
        assistant_message_selector: r#"div[data-message-author-role="assistant"]"#,
        context_window_tokens: 128_000,
    },
    PlatformProfile {
        platform: Platform::Gemini,
        url_prefix: "https://gemini.google.com/",
        main_container_selector: "#chat-history",
        user_message_selector: "div.query-content",
        assistant_message_selector: "message-content.model-response-text",
        context_window_tokens: 1_000_000,
    },
    PlatformProfile {
        platform: Platform::Claude,
        url_prefix: "https://claude.ai/",
        main_container_selector: "div.flex-1.overflow-y-scroll",
        user_message_selector: r#"div[data-testid="user-message"]"#,
        assistant_message_selector: "div.font-claude-message",
        context_window_tokens: 200_000,
    },
];

/// Detect the platform serving `url`.
///
/// Matches by exact prefix. An unsupported page yields `None`, which callers
/// treat as a normal outcome.
pub fn detect_platform(url: &str) -> Option<Platform> {
    PROFILES
        .iter()
        .find(|p| url.starts_with(p.url_prefix))
        .map(|p| p.platform)
}

/// The profile for a detected platform.
pub fn selectors_for(platform: Platform) -> &'static PlatformProfile {
    match platform {
        Platform::ChatGpt => &PROFILES[0],
        Platform::Gemini => &PROFILES[1],
        Platform::Claude => &PROFILES[2],
    }
}
