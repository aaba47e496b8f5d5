//! Scripted page changes replayed against a captured page.
//!
//! A script is a JSON array of steps:
//!
//! ```json
//! [
//!   {"op": "append", "parent": "#main", "node": {"tag": "div", "children": [{"text": "hi"}]}},
//!   {"op": "wait_ms", "ms": 50},
//!   {"op": "set_text", "target": "div.font-claude-message", "text": "updated"},
//!   {"op": "remove", "target": "#main"}
//! ]
//! ```
//!
//! Targets are selectors resolved against the page when the step runs; a
//! step whose target is missing is logged and skipped.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use context_gauge_core::{
    CaptureNode, Document, HostCommand, Indicator, NodeId, Runtime, Selector, SelectorError,
    SnapshotPage,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplayStep {
    Append { parent: String, node: CaptureNode },
    Remove { target: String },
    SetText { target: String, text: String },
    WaitMs { ms: u64 },
}

enum Planned {
    Command(HostCommand<SnapshotPage>),
    Wait(Duration),
}

pub fn parse_script(json: &str) -> Result<Vec<ReplayStep>, serde_json::Error> {
    serde_json::from_str(json)
}

fn first_match(page: &SnapshotPage, selector: &Selector) -> Option<NodeId> {
    match page.query_selector(selector) {
        Ok(Some(node)) => Some(node),
        Ok(None) => {
            warn!(selector = %selector, "replay target not found, step skipped");
            None
        }
        Err(e) => {
            warn!(selector = %selector, error = %e, "replay target query failed");
            None
        }
    }
}

fn plan(step: ReplayStep) -> Result<Planned, SelectorError> {
    let command: HostCommand<SnapshotPage> = match step {
        ReplayStep::WaitMs { ms } => return Ok(Planned::Wait(Duration::from_millis(ms))),
        ReplayStep::Append { parent, node } => {
            let selector = Selector::parse(&parent)?;
            Box::new(move |page: &mut SnapshotPage| {
                if let Some(parent) = first_match(page, &selector) {
                    page.append(parent, &node);
                }
            })
        }
        ReplayStep::Remove { target } => {
            let selector = Selector::parse(&target)?;
            Box::new(move |page: &mut SnapshotPage| {
                if let Some(target) = first_match(page, &selector) {
                    page.remove(target);
                }
            })
        }
        ReplayStep::SetText { target, text } => {
            let selector = Selector::parse(&target)?;
            Box::new(move |page: &mut SnapshotPage| {
                if let Some(target) = first_match(page, &selector) {
                    page.set_text(target, &text);
                }
            })
        }
    };
    Ok(Planned::Command(command))
}

/// Run `steps` through `runtime`, then wait `settle` for pending recounts.
pub async fn replay<I: Indicator>(
    runtime: &mut Runtime<SnapshotPage, I>,
    steps: Vec<ReplayStep>,
    settle: Duration,
) -> Result<(), SelectorError> {
    let planned = steps.into_iter().map(plan).collect::<Result<Vec<_>, _>>()?;
    debug!(steps = planned.len(), "replaying script");

    let (tx, rx) = mpsc::channel(16);
    let host = async move {
        for step in planned {
            match step {
                Planned::Wait(duration) => sleep(duration).await,
                Planned::Command(command) => {
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
            }
        }
        sleep(settle).await;
    };
    tokio::join!(runtime.run(rx), host);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use context_gauge_core::{
        ControllerState, ObservationController, RecordingIndicator, TokenEstimator, TracingReporter,
        TrackerConfig,
    };

    const CAPTURE: &str = r#"{
        "url": "https://claude.ai/chat/7",
        "body": {"tag": "body", "children": [
            {"tag": "div", "attrs": {"class": "flex-1 overflow-y-scroll"}, "children": [
                {"tag": "div", "attrs": {"data-testid": "user-message"}, "children": [{"text": "Explain lifetimes"}]}
            ]}
        ]}
    }"#;

    const SCRIPT: &str = r##"[
        {"op": "append", "parent": "div.flex-1", "node": {"tag": "div", "attrs": {"class": "font-claude-message"}}},
        {"op": "wait_ms", "ms": 20},
        {"op": "set_text", "target": "div.font-claude-message", "text": "Lifetimes"},
        {"op": "wait_ms", "ms": 20},
        {"op": "set_text", "target": "div.font-claude-message", "text": "Lifetimes name how long a borrow is valid."},
        {"op": "wait_ms", "ms": 500},
        {"op": "remove", "target": "div.flex-1"},
        {"op": "set_text", "target": "#missing", "text": "ignored"}
    ]"##;

    fn runtime() -> Runtime<SnapshotPage, RecordingIndicator> {
        let page = SnapshotPage::from_json(CAPTURE).unwrap();
        let config = TrackerConfig::default();
        let controller = ObservationController::for_location(
            page.location(),
            &config,
            TokenEstimator::default(),
            RecordingIndicator::default(),
            Arc::new(TracingReporter),
        )
        .unwrap()
        .unwrap();
        Runtime::new(page, controller, &config)
    }

    #[test]
    fn test_parse_script() {
        let steps = parse_script(SCRIPT).unwrap();
        assert_eq!(steps.len(), 8);
        assert!(matches!(steps[1], ReplayStep::WaitMs { ms: 20 }));
        assert!(parse_script(r#"[{"op": "scroll"}]"#).is_err());
    }

    #[test]
    fn test_bad_selector_is_rejected() {
        let steps = parse_script(r#"[{"op": "remove", "target": "div > p"}]"#).unwrap();
        assert!(plan(steps.into_iter().next().unwrap()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_streaming_then_navigation() {
        let mut runtime = runtime();
        let steps = parse_script(SCRIPT).unwrap();
        replay(&mut runtime, steps, Duration::from_secs(1)).await.unwrap();

        let controller = runtime.controller();
        assert_eq!(controller.state(), ControllerState::Watching);
        // Attach, then one debounced recount for the streamed reply
        assert_eq!(controller.recount_count(), 2);

        let usages = &controller.indicator().usages;
        let peak = usages.iter().map(|u| u.total_tokens).max().unwrap();
        assert_eq!(usages.last().unwrap().total_tokens, peak);
        assert!(peak > 0);
    }
}
