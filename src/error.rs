//! Fatal error taxonomy
//!
//! There are no soft errors in the reconciler: reuse is best-effort and a
//! fresh node is always an acceptable substitute, so every error here means
//! either inconsistent upstream inputs (invariant violations) or a
//! misconfigured decoration layer. Callers discard partial state and
//! re-derive the tree from scratch.

use crate::node::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The cursor was asked to advance past the end of the previous tree;
    /// upstream length accounting is wrong.
    #[error("cursor advanced {overshoot} units past the end of the previous tree")]
    CursorOverrun { overshoot: usize },

    /// An old node was claimed for reuse twice.
    #[error("old node {0:?} claimed for reuse twice")]
    DoubleClaim(NodeId),

    /// Widget continuation was applied where the last built node is not a
    /// widget.
    #[error("widget continuation target is not a widget node")]
    BadContinuation,

    /// The text stream ended before the expected new document length.
    #[error("text stream exhausted {missing} units before the expected end")]
    TextExhausted { missing: usize },

    /// A restricted decoration layer supplied a block effect.
    #[error("restricted decoration layer {layer} supplied a block effect")]
    RestrictedBlock { layer: usize },

    /// A restricted decoration layer supplied a decoration replacing a line
    /// break.
    #[error("restricted decoration layer {layer} replaced a line break")]
    RestrictedBreak { layer: usize },

    /// Closing found composite state that cannot be unwound consistently.
    #[error("inconsistent composite nesting at close")]
    UnbalancedNesting,

    /// A structural operation tried to move above the root.
    #[error("attempted to leave the root composite")]
    LeftRoot,

    /// Changed ranges were not sorted and non-overlapping.
    #[error("changed ranges are not sorted and non-overlapping")]
    UnorderedChanges,

    /// The composition's new range contains a line break.
    #[error("composition range contains a line break")]
    CompositionBreak,
}
