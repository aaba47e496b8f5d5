//! In-memory page used for captured DOM snapshots, replay and tests.
//!
//! A [`SnapshotPage`] is a mutable node arena rooted at `<body>`. It implements
//! [`Document`] and [`MutationSource`]: every child-list change is recorded
//! for each observer whose target contains the mutated parent, and the
//! records are handed out in coalesced batches by [`MutationQueue`].

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dom::{Document, MutationBatch, MutationQueue, MutationSource, ObserveTarget, ObserverId};
use crate::error::DomError;
use crate::selector::{Element, Selector};

/// Tags whose content starts on its own line when read as text.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "dd", "div", "dl", "dt", "figure", "footer", "form", "h1",
    "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p", "pre", "section",
    "table", "tr", "ul",
];

/// Node of a captured page, as serialized by the capture script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureNode {
    Text {
        text: String,
    },
    Element {
        tag: String,
        #[serde(default)]
        attrs: BTreeMap<String, String>,
        #[serde(default)]
        children: Vec<CaptureNode>,
    },
}

impl CaptureNode {
    pub fn text(text: impl Into<String>) -> Self {
        CaptureNode::Text { text: text.into() }
    }

    pub fn element(tag: &str, attrs: &[(&str, &str)], children: Vec<CaptureNode>) -> Self {
        CaptureNode::Element {
            tag: tag.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children,
        }
    }
}

/// A whole captured page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCapture {
    pub url: String,
    pub body: CaptureNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

pub struct SnapshotPage {
    url: String,
    nodes: Vec<NodeData>,
    body: NodeId,
    next_observer: u64,
    observers: Vec<(ObserverId, ObserveTarget<NodeId>)>,
    pending: BTreeMap<ObserverId, usize>,
}

impl SnapshotPage {
    /// An empty page with just a `<body>`.
    pub fn new(url: impl Into<String>) -> Self {
        let body = NodeData {
            kind: NodeKind::Element {
                tag: "body".to_string(),
                attrs: BTreeMap::new(),
            },
            parent: None,
            children: Vec::new(),
        };
        Self {
            url: url.into(),
            nodes: vec![body],
            body: NodeId(0),
            next_observer: 1,
            observers: Vec::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Build a page from a capture. The capture's root becomes `<body>`;
    /// a text root is appended as a text child.
    pub fn from_capture(capture: &PageCapture) -> Self {
        let mut page = SnapshotPage::new(capture.url.clone());
        match &capture.body {
            CaptureNode::Element { attrs, children, .. } => {
                if let NodeKind::Element { attrs: body_attrs, .. } = &mut page.nodes[0].kind {
                    *body_attrs = attrs.clone();
                }
                for child in children {
                    let id = page.build(child);
                    page.link(page.body, id);
                }
            }
            text @ CaptureNode::Text { .. } => {
                let id = page.build(text);
                page.link(page.body, id);
            }
        }
        page
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let capture: PageCapture = serde_json::from_str(json)?;
        Ok(Self::from_capture(&capture))
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn set_location(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    /// Create a detached subtree from a capture node.
    pub fn create(&mut self, node: &CaptureNode) -> NodeId {
        self.build(node)
    }

    pub fn create_element(&mut self, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        self.build(&CaptureNode::element(tag, attrs, Vec::new()))
    }

    /// Move `child` under `parent`, detaching it from any previous parent.
    ///
    /// Appending a node under itself or one of its descendants is ignored.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if self.is_inclusive_ancestor(child, parent) {
            return;
        }
        if let Some(old_parent) = self.nodes[child.0].parent {
            self.unlink(old_parent, child);
            self.record(old_parent);
        }
        self.link(parent, child);
        self.record(parent);
    }

    /// Build `node` and append it under `parent`.
    pub fn append(&mut self, parent: NodeId, node: &CaptureNode) -> NodeId {
        let id = self.build(node);
        self.append_child(parent, id);
        id
    }

    /// Detach `node` from its parent. Removing a detached node is a no-op.
    pub fn remove(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent {
            self.unlink(parent, node);
            self.record(parent);
        }
    }

    /// Replace the children of `node` with a single text node.
    pub fn set_text(&mut self, node: NodeId, text: &str) {
        let old: Vec<NodeId> = std::mem::take(&mut self.nodes[node.0].children);
        for child in old {
            self.nodes[child.0].parent = None;
        }
        let id = self.build(&CaptureNode::text(text));
        self.link(node, id);
        self.record(node);
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.root_of(node) == self.body
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    /// Number of live observers, for tests and diagnostics.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn build(&mut self, node: &CaptureNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        match node {
            CaptureNode::Text { text } => {
                self.nodes.push(NodeData {
                    kind: NodeKind::Text(text.clone()),
                    parent: None,
                    children: Vec::new(),
                });
            }
            CaptureNode::Element {
                tag,
                attrs,
                children,
            } => {
                self.nodes.push(NodeData {
                    kind: NodeKind::Element {
                        tag: tag.to_ascii_lowercase(),
                        attrs: attrs.clone(),
                    },
                    parent: None,
                    children: Vec::new(),
                });
                for child in children {
                    let child_id = self.build(child);
                    self.link(id, child_id);
                }
            }
        }
        id
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    fn unlink(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.retain(|c| *c != child);
        self.nodes[child.0].parent = None;
    }

    fn root_of(&self, mut node: NodeId) -> NodeId {
        while let Some(parent) = self.nodes[node.0].parent {
            node = parent;
        }
        node
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes[node.0].parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Queue one record for every observer whose target contains `parent`.
    fn record(&mut self, parent: NodeId) {
        let interested: Vec<ObserverId> = self
            .observers
            .iter()
            .filter(|(_, target)| match target {
                ObserveTarget::Body => self.is_inclusive_ancestor(self.body, parent),
                ObserveTarget::Subtree(root) => self.is_inclusive_ancestor(*root, parent),
            })
            .map(|(id, _)| *id)
            .collect();
        for id in interested {
            *self.pending.entry(id).or_insert(0) += 1;
        }
    }

    /// Child indices from the root down to `node`.
    fn path(&self, mut node: NodeId) -> (NodeId, Vec<usize>) {
        let mut path = Vec::new();
        while let Some(parent) = self.nodes[node.0].parent {
            let index = self.nodes[parent.0]
                .children
                .iter()
                .position(|c| *c == node)
                .unwrap_or(0);
            path.push(index);
            node = parent;
        }
        path.reverse();
        (node, path)
    }

    fn element_ref(&self, id: NodeId, scope: Option<NodeId>) -> Option<ElementRef<'_>> {
        matches!(self.nodes[id.0].kind, NodeKind::Element { .. }).then_some(ElementRef {
            page: self,
            id,
            scope,
        })
    }

    fn collect_matches(&self, node: NodeId, selector: &Selector, out: &mut Vec<NodeId>, first_only: bool) {
        if first_only && !out.is_empty() {
            return;
        }
        if let Some(el) = self.element_ref(node, None) {
            if selector.matches(&el) {
                out.push(node);
            }
        }
        for child in &self.nodes[node.0].children {
            self.collect_matches(*child, selector, out, first_only);
        }
    }

    fn write_text(&self, node: NodeId, scope: NodeId, exclude: Option<&Selector>, out: &mut String) {
        match &self.nodes[node.0].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element { tag, .. } => {
                if node != scope {
                    if let (Some(selector), Some(el)) = (exclude, self.element_ref(node, Some(scope))) {
                        if selector.matches(&el) {
                            return;
                        }
                    }
                }
                if tag == "br" {
                    out.push('\n');
                    return;
                }
                let block = BLOCK_TAGS.contains(&tag.as_str());
                if block {
                    break_line(out);
                }
                for child in &self.nodes[node.0].children {
                    self.write_text(*child, scope, exclude, out);
                }
                if block {
                    break_line(out);
                }
            }
        }
    }
}

fn break_line(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// Element view used for selector matching. With a `scope`, ancestry stops
/// at the scope node, as it would for a detached copy.
struct ElementRef<'a> {
    page: &'a SnapshotPage,
    id: NodeId,
    scope: Option<NodeId>,
}

impl<'a> Element for ElementRef<'a> {
    fn tag_name(&self) -> &str {
        match &self.page.nodes[self.id.0].kind {
            NodeKind::Element { tag, .. } => tag,
            NodeKind::Text(_) => "",
        }
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        match &self.page.nodes[self.id.0].kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            NodeKind::Text(_) => None,
        }
    }

    fn parent_element(&self) -> Option<Self> {
        if self.scope == Some(self.id) {
            return None;
        }
        let parent = self.page.nodes[self.id.0].parent?;
        self.page.element_ref(parent, self.scope)
    }
}

impl Document for SnapshotPage {
    type Node = NodeId;

    fn location(&self) -> &str {
        &self.url
    }

    fn query_selector(&self, selector: &Selector) -> Result<Option<NodeId>, DomError> {
        let mut out = Vec::with_capacity(1);
        self.collect_matches(self.body, selector, &mut out, true);
        Ok(out.into_iter().next())
    }

    fn query_selector_all(&self, selector: &Selector) -> Result<Vec<NodeId>, DomError> {
        let mut out = Vec::new();
        self.collect_matches(self.body, selector, &mut out, false);
        Ok(out)
    }

    fn compare_document_position(&self, a: &NodeId, b: &NodeId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        let (root_a, path_a) = self.path(*a);
        let (root_b, path_b) = self.path(*b);
        // Disconnected trees get an arbitrary but consistent order
        root_a.cmp(&root_b).then_with(|| path_a.cmp(&path_b))
    }

    fn text_content(&self, node: &NodeId, exclude: Option<&Selector>) -> Result<String, DomError> {
        if node.0 >= self.nodes.len() {
            return Err(DomError::Detached);
        }
        let mut out = String::new();
        self.write_text(*node, *node, exclude, &mut out);
        Ok(out)
    }
}

impl MutationSource for SnapshotPage {
    type Target = NodeId;

    fn observe(&mut self, target: ObserveTarget<NodeId>) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, target));
        id
    }

    fn disconnect(&mut self, id: ObserverId) {
        self.observers.retain(|(existing, _)| *existing != id);
        self.pending.remove(&id);
    }
}

impl MutationQueue for SnapshotPage {
    fn take_mutations(&mut self) -> Vec<MutationBatch> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(observer, records)| MutationBatch { observer, records })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_page() -> (SnapshotPage, NodeId) {
        let mut page = SnapshotPage::new("https://chatgpt.com/c/1");
        let body = page.body();
        let main = page.append(body, &CaptureNode::element("div", &[("id", "main")], vec![]));
        (page, main)
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "url": "https://claude.ai/chat/1",
            "body": {"tag": "body", "children": [
                {"tag": "div", "attrs": {"class": "flex-1 overflow-y-scroll"}, "children": [
                    {"tag": "div", "attrs": {"data-testid": "user-message"}, "children": [{"text": "Hi"}]}
                ]}
            ]}
        }"#;
        let page = SnapshotPage::from_json(json).unwrap();
        assert_eq!(page.location(), "https://claude.ai/chat/1");
        let selector = Selector::parse(r#"div[data-testid="user-message"]"#).unwrap();
        let found = page.query_selector(&selector).unwrap().unwrap();
        assert_eq!(page.text_content(&found, None).unwrap().trim(), "Hi");
    }

    #[test]
    fn test_document_order() {
        let (mut page, main) = chat_page();
        let first = page.append(main, &CaptureNode::element("p", &[], vec![]));
        let nested = page.append(first, &CaptureNode::element("span", &[], vec![]));
        let second = page.append(main, &CaptureNode::element("p", &[], vec![]));

        assert_eq!(page.compare_document_position(&main, &first), Ordering::Less);
        assert_eq!(page.compare_document_position(&nested, &second), Ordering::Less);
        assert_eq!(page.compare_document_position(&second, &first), Ordering::Greater);
        assert_eq!(page.compare_document_position(&first, &first), Ordering::Equal);
    }

    #[test]
    fn test_text_content_excludes_descendants() {
        let (mut page, main) = chat_page();
        let message = page.append(
            main,
            &CaptureNode::element(
                "div",
                &[],
                vec![
                    CaptureNode::element("button", &[], vec![CaptureNode::text("Copy")]),
                    CaptureNode::element("pre", &[], vec![
                        CaptureNode::element("div", &[("data-testid", "code-block-header")], vec![CaptureNode::text("rust")]),
                        CaptureNode::text("fn main() {}"),
                    ]),
                ],
            ),
        );
        let exclude = Selector::parse(r#"button, [data-testid*="code-block-header"]"#).unwrap();
        assert_eq!(page.text_content(&message, Some(&exclude)).unwrap().trim(), "fn main() {}");
        assert!(page.text_content(&message, None).unwrap().contains("Copy"));
    }

    #[test]
    fn test_exclusion_is_scoped_to_copy() {
        // "#main button" must not match inside a copy whose root is below #main
        let (mut page, main) = chat_page();
        let message = page.append(
            main,
            &CaptureNode::element("div", &[], vec![CaptureNode::element("button", &[], vec![CaptureNode::text("x")])]),
        );
        let exclude = Selector::parse("#main button").unwrap();
        assert_eq!(page.text_content(&message, Some(&exclude)).unwrap().trim(), "x");
    }

    #[test]
    fn test_mutations_are_routed_and_coalesced() {
        let (mut page, main) = chat_page();
        let lookout = page.observe(ObserveTarget::Body);
        let inner = page.observe(ObserveTarget::Subtree(main));

        page.append(main, &CaptureNode::text("a"));
        page.append(main, &CaptureNode::text("b"));
        let batches = page.take_mutations();
        assert_eq!(
            batches,
            vec![
                MutationBatch { observer: lookout, records: 2 },
                MutationBatch { observer: inner, records: 2 },
            ]
        );
        assert!(page.take_mutations().is_empty());

        // Removing the container is seen by the body observer only
        page.remove(main);
        let batches = page.take_mutations();
        assert_eq!(batches, vec![MutationBatch { observer: lookout, records: 1 }]);
        assert!(!page.is_connected(main));

        page.disconnect(inner);
        assert_eq!(page.observer_count(), 1);
    }

    #[test]
    fn test_append_under_own_descendant_is_ignored() {
        let (mut page, main) = chat_page();
        let body = page.body();
        let inner = page.append(main, &CaptureNode::element("div", &[], vec![]));
        page.observe(ObserveTarget::Body);

        page.append_child(inner, main);
        page.append_child(main, main);

        assert_eq!(page.parent(main), Some(body));
        assert_eq!(page.parent(inner), Some(main));
        assert!(page.is_connected(inner));
        assert!(page.take_mutations().is_empty());
    }
}
