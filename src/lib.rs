//! Incremental reconciliation of a document render tree.
//!
//! Given the previous tree, the changed ranges of an edit, layered
//! decoration sets and a forward stream of the new document's text, the
//! engine produces the next tree while relocating as many host resources as
//! possible. The host applies the result by syncing nodes the returned
//! ledger marks as resource-only reuse.

mod builder;

pub mod cursor;
pub mod decoration;
pub mod error;
pub mod node;
pub mod reuse;
pub mod spans;
pub mod text;
pub mod update;
pub mod widget;

// Re-export core types
pub use cursor::{Bias, OldTreeCursor, TreeVisitor};
pub use decoration::{DecoRange, Decoration, DecorationSet, Side, WidgetSpec};
pub use error::ReconcileError;
pub use node::{HostHandle, LineStyle, MarkSpec, NodeFlags, NodeId, NodeKind, ViewArena};
pub use reuse::{ReuseCache, ReuseKind, ReuseLedger};
pub use spans::{emit_spans, SpanVisitor};
pub use text::{DocText, TextSource, TextToken, MAX_TEXT_CHUNK};
pub use update::{
    reconcile, ChangedRange, Composition, DefaultHooks, HostHooks, UpdateResult,
};
pub use widget::{line_break_marker, LineBreakMarker, WidgetRenderer};
