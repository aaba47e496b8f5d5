//! Conversation extraction from the live page.
//!
//! User and assistant nodes are queried separately, so the two lists do not
//! interleave. Extraction tags each node with its role, restores document
//! order with a stable sort, strips UI-only descendants from a copy of each
//! node and keeps the non-empty texts.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::dom::Document;
use crate::error::{DomError, SelectorError};
use crate::helpers::normalize_message_text;
use crate::platform::PlatformProfile;
use crate::report::ErrorReporter;
use crate::selector::Selector;

/// Interactive and decorative descendants removed before reading text.
/// Code-block headers go; the code itself stays.
pub const UI_ARTIFACT_SELECTOR: &str =
    r#"img, button, svg, [aria-label*="copy"], [data-testid*="code-block-header"]"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A message node found on the page. Never cached across mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedMessage<N> {
    pub node: N,
    pub role: Role,
}

/// A single message in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Role-tagged messages in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new(entries: Vec<TranscriptEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<TranscriptEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flat text, one `Role: text` block per message.
    pub fn to_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}: {}\n\n", e.role, e.text))
            .collect()
    }
}

/// Stable sort of `messages` by `cmp` over their nodes.
pub fn sort_in_document_order<N, F>(messages: &mut [ObservedMessage<N>], cmp: F)
where
    F: Fn(&N, &N) -> Ordering,
{
    messages.sort_by(|a, b| cmp(&a.node, &b.node));
}

/// Reads conversations for one platform.
#[derive(Debug, Clone)]
pub struct ConversationExtractor {
    container: Selector,
    user: Selector,
    assistant: Selector,
    artifacts: Selector,
}

impl ConversationExtractor {
    pub fn new(profile: &PlatformProfile) -> Result<Self, SelectorError> {
        Ok(Self {
            container: Selector::parse(profile.main_container_selector)?,
            user: Selector::parse(profile.user_message_selector)?,
            assistant: Selector::parse(profile.assistant_message_selector)?,
            artifacts: Selector::parse(UI_ARTIFACT_SELECTOR)?,
        })
    }

    pub fn container_selector(&self) -> &Selector {
        &self.container
    }

    /// The chat container, if the page currently has one.
    pub fn find_container<D: Document>(&self, doc: &D) -> Result<Option<D::Node>, DomError> {
        doc.query_selector(&self.container)
    }

    /// Every user and assistant node, tagged but not yet ordered.
    pub fn collect_messages<D: Document>(
        &self,
        doc: &D,
    ) -> Result<Vec<ObservedMessage<D::Node>>, DomError> {
        let users = doc.query_selector_all(&self.user)?;
        let assistants = doc.query_selector_all(&self.assistant)?;

        let mut messages = Vec::with_capacity(users.len() + assistants.len());
        messages.extend(users.into_iter().map(|node| ObservedMessage {
            node,
            role: Role::User,
        }));
        messages.extend(assistants.into_iter().map(|node| ObservedMessage {
            node,
            role: Role::Assistant,
        }));
        Ok(messages)
    }

    /// Extraction with failures propagated.
    pub fn try_extract<D: Document>(&self, doc: &D) -> Result<Transcript, DomError> {
        if self.find_container(doc)?.is_none() {
            debug!(container = %self.container, "no chat container, empty transcript");
            return Ok(Transcript::default());
        }

        let mut messages = self.collect_messages(doc)?;
        sort_in_document_order(&mut messages, |a, b| doc.compare_document_position(a, b));

        let mut entries = Vec::with_capacity(messages.len());
        for message in &messages {
            let raw = doc.text_content(&message.node, Some(&self.artifacts))?;
            let text = normalize_message_text(&raw);
            if text.is_empty() {
                continue;
            }
            entries.push(TranscriptEntry {
                role: message.role,
                text,
            });
        }
        Ok(Transcript::new(entries))
    }

    /// Extract the conversation. Failures are reported and yield an empty
    /// transcript.
    pub fn extract<D: Document>(&self, doc: &D, reporter: &dyn ErrorReporter) -> Transcript {
        match self.try_extract(doc) {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!(error = %e, "conversation extraction failed");
                reporter.report("extract", &e.to_string(), None);
                Transcript::default()
            }
        }
    }

    /// Combined message text for token counting.
    ///
    /// Role separation and ordering do not affect the count, so this skips
    /// both. A page without a chat container counts as empty.
    pub fn recount_text<D: Document>(&self, doc: &D) -> Result<String, DomError> {
        if self.find_container(doc)?.is_none() {
            return Ok(String::new());
        }
        let mut combined = String::new();
        for message in self.collect_messages(doc)? {
            combined.push_str(&doc.text_content(&message.node, None)?);
            combined.push('\n');
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{selectors_for, Platform};
    use crate::report::testing::RecordingReporter;
    use crate::snapshot::{CaptureNode, NodeId, SnapshotPage};
    use crate::tokenizer::TokenEstimator;

    fn user(text: &str) -> CaptureNode {
        CaptureNode::element(
            "div",
            &[("data-message-author-role", "user")],
            vec![CaptureNode::text(text)],
        )
    }

    fn assistant(children: Vec<CaptureNode>) -> CaptureNode {
        CaptureNode::element("div", &[("data-message-author-role", "assistant")], children)
    }

    fn chatgpt_page(children: Vec<CaptureNode>) -> SnapshotPage {
        let mut page = SnapshotPage::new("https://chatgpt.com/c/123");
        let body = page.body();
        page.append(body, &CaptureNode::element("div", &[("id", "main")], children));
        page
    }

    fn chatgpt() -> ConversationExtractor {
        ConversationExtractor::new(selectors_for(Platform::ChatGpt)).unwrap()
    }

    #[test]
    fn test_hello_hi_there() {
        let page = chatgpt_page(vec![
            user("Hello"),
            assistant(vec![CaptureNode::text("Hi there")]),
        ]);
        let transcript = chatgpt().try_extract(&page).unwrap();
        assert_eq!(
            transcript.entries(),
            &[TranscriptEntry::user("Hello"), TranscriptEntry::assistant("Hi there")]
        );

        let joined: String = transcript.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(TokenEstimator::default().estimate(&joined), 4);
        assert_eq!(transcript.to_text(), "User: Hello\n\nAssistant: Hi there\n\n");
    }

    #[test]
    fn test_restores_document_order() {
        // Interleaved turns, nested at different depths
        let page = chatgpt_page(vec![
            user("u1"),
            assistant(vec![CaptureNode::text("a1")]),
            CaptureNode::element("article", &[], vec![user("u2")]),
            assistant(vec![CaptureNode::text("a2")]),
            user("u3"),
        ]);
        let transcript = chatgpt().try_extract(&page).unwrap();
        let texts: Vec<&str> = transcript.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["u1", "a1", "u2", "a2", "u3"]);
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        // Build the thread bottom-up: later turns inserted first
        let mut page = chatgpt_page(vec![]);
        let main = page
            .query_selector(&Selector::parse("#main").unwrap())
            .unwrap()
            .unwrap();
        let third = page.append(main, &user("third"));
        let first = page.create(&user("first"));
        let second = page.create(&assistant(vec![CaptureNode::text("second")]));
        page.append_child(main, first);
        page.append_child(main, second);
        // Move the first-inserted node to the end
        page.append_child(main, third);

        let transcript = chatgpt().try_extract(&page).unwrap();
        let texts: Vec<&str> = transcript.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_strips_ui_artifacts_and_skips_empty() {
        let page = chatgpt_page(vec![
            user("   "),
            assistant(vec![
                CaptureNode::element("button", &[("aria-label", "Copy code")], vec![CaptureNode::text("Copy")]),
                CaptureNode::element("pre", &[], vec![
                    CaptureNode::element(
                        "div",
                        &[("data-testid", "code-block-header")],
                        vec![CaptureNode::text("python")],
                    ),
                    CaptureNode::element("code", &[], vec![CaptureNode::text("print('hi')")]),
                ]),
                CaptureNode::element("svg", &[], vec![CaptureNode::text("icon")]),
            ]),
            assistant(vec![CaptureNode::element("img", &[("alt", "x")], vec![])]),
        ]);
        let transcript = chatgpt().try_extract(&page).unwrap();
        assert_eq!(transcript.entries(), &[TranscriptEntry::assistant("print('hi')")]);
    }

    #[test]
    fn test_missing_container_is_empty() {
        let mut page = SnapshotPage::new("https://chatgpt.com/");
        let body = page.body();
        // Messages outside any chat container are ignored
        page.append(body, &user("stray"));
        let reporter = RecordingReporter::default();
        assert!(chatgpt().extract(&page, &reporter).is_empty());
        assert!(reporter.contexts().is_empty());
        assert_eq!(chatgpt().recount_text(&page).unwrap(), "");
    }

    #[test]
    fn test_counts_every_message() {
        for (users, assistants) in [(0, 3), (4, 0), (5, 7)] {
            let mut children = Vec::new();
            for i in 0..users.max(assistants) {
                if i < assistants {
                    children.push(assistant(vec![CaptureNode::text(format!("a{i}"))]));
                }
                if i < users {
                    children.push(user(&format!("u{i}")));
                }
            }
            let page = chatgpt_page(children);
            assert_eq!(chatgpt().try_extract(&page).unwrap().len(), users + assistants);
        }
    }

    /// Page whose reads always fail, to exercise the reporting path.
    struct FailingPage;

    impl Document for FailingPage {
        type Node = NodeId;

        fn location(&self) -> &str {
            "https://chatgpt.com/c/1"
        }

        fn query_selector(&self, _selector: &Selector) -> Result<Option<NodeId>, DomError> {
            Err(DomError::Host("document is being replaced".to_string()))
        }

        fn query_selector_all(&self, _selector: &Selector) -> Result<Vec<NodeId>, DomError> {
            Err(DomError::Host("document is being replaced".to_string()))
        }

        fn compare_document_position(&self, _a: &NodeId, _b: &NodeId) -> Ordering {
            Ordering::Equal
        }

        fn text_content(&self, _node: &NodeId, _exclude: Option<&Selector>) -> Result<String, DomError> {
            Err(DomError::Detached)
        }
    }

    #[test]
    fn test_failure_is_reported_and_empty() {
        let reporter = RecordingReporter::default();
        let transcript = chatgpt().extract(&FailingPage, &reporter);
        assert!(transcript.is_empty());
        assert_eq!(reporter.contexts(), vec!["extract".to_string()]);
    }
}
