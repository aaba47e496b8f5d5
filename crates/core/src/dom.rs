//! Capability seams between the tracker and the host page.
//!
//! The tracker never touches a concrete DOM. A host supplies a [`Document`]
//! for reads and a [`MutationSource`] for observer registration, and delivers
//! [`MutationBatch`]es back to the controller as they occur.

use std::cmp::Ordering;
use std::fmt;

use crate::error::DomError;
use crate::selector::Selector;

/// Handle for one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// What an observer watches. Both forms observe child-list changes over the
/// whole subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserveTarget<N> {
    Body,
    Subtree(N),
}

/// Mutations coalesced into one callback for one observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationBatch {
    pub observer: ObserverId,
    /// Number of records in the batch. Callbacks must not assume one
    /// logical change per batch.
    pub records: usize,
}

/// Read access to the page.
pub trait Document {
    type Node: Clone + PartialEq + fmt::Debug;

    /// The page URL.
    fn location(&self) -> &str;

    /// First element in document order matching `selector`.
    fn query_selector(&self, selector: &Selector) -> Result<Option<Self::Node>, DomError>;

    /// Every element matching `selector`, in document order.
    fn query_selector_all(&self, selector: &Selector) -> Result<Vec<Self::Node>, DomError>;

    /// Document order: an ancestor precedes its descendants, and earlier
    /// siblings precede later ones.
    fn compare_document_position(&self, a: &Self::Node, b: &Self::Node) -> Ordering;

    /// Text of a detached deep copy of `node`, after removing every
    /// descendant that matches `exclude`.
    fn text_content(&self, node: &Self::Node, exclude: Option<&Selector>) -> Result<String, DomError>;
}

/// Observer registration on the page.
pub trait MutationSource {
    type Target;

    fn observe(&mut self, target: ObserveTarget<Self::Target>) -> ObserverId;

    /// Stop delivering batches for `id`. Unknown ids are ignored.
    fn disconnect(&mut self, id: ObserverId);
}

/// Hosts that buffer mutation records until the next delivery point.
pub trait MutationQueue {
    fn take_mutations(&mut self) -> Vec<MutationBatch>;
}

/// A page the controller can both read and observe.
pub trait Page: Document + MutationSource<Target = <Self as Document>::Node> {}

impl<T> Page for T where T: Document + MutationSource<Target = <T as Document>::Node> {}
