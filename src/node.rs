//! View tree nodes stored in an arena
//!
//! Every node the reconciler consumes or produces lives in a `ViewArena`.
//! Parents own children by index; each child keeps a weak parent index used
//! only for upward traversal, never for ownership or iteration.

use std::fmt;
use std::sync::Arc;

use crate::widget::WidgetRenderer;

/// Opaque handle to a host-side resource (text node, element, ...).
///
/// The engine never creates or destroys host resources; it only decides which
/// handles carry over into the next tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HostHandle(pub u64);

/// Index of a node in the arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Per-node flag bitset.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const NONE: NodeFlags = NodeFlags(0);
    /// Host text node is owned by an active IME composition; never merge into
    /// or replace it.
    pub const COMPOSITION_PINNED: NodeFlags = NodeFlags(1);
    /// Widget participates in block layout rather than inline flow.
    pub const BLOCK: NodeFlags = NodeFlags(1 << 1);
    /// Zero-length point widget (as opposed to a replacing widget).
    pub const POINT: NodeFlags = NodeFlags(1 << 2);
    /// Cursor placed exactly at the start associates with this node.
    pub const INCLUSIVE_START: NodeFlags = NodeFlags(1 << 3);
    /// Cursor placed exactly at the end associates with this node.
    pub const INCLUSIVE_END: NodeFlags = NodeFlags(1 << 4);
    /// Synthetic trailing break marker appended by the trailing-break rule.
    pub const BREAK_MARKER: NodeFlags = NodeFlags(1 << 5);
    /// A line break (one document unit) follows this node.
    pub const BREAK_AFTER: NodeFlags = NodeFlags(1 << 6);

    #[inline]
    pub fn contains(self, other: NodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: NodeFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: NodeFlags) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for NodeFlags {
    type Output = NodeFlags;
    fn bitor(self, rhs: NodeFlags) -> NodeFlags {
        NodeFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for NodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeFlags({:#010b})", self.0)
    }
}

/// Attributes carried by a mark decoration and its Mark nodes.
///
/// Compared by value when deciding whether an open mark can continue.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MarkSpec {
    pub attrs: Vec<(String, String)>,
}

impl MarkSpec {
    pub fn new(attrs: Vec<(String, String)>) -> Self {
        Self { attrs }
    }
}

/// Style patch applied to a Line or BlockWrapper composite.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineStyle {
    pub attrs: Vec<(String, String)>,
}

impl LineStyle {
    pub fn new(attrs: Vec<(String, String)>) -> Self {
        Self { attrs }
    }

    /// Merge another patch into this one. Later attributes append; appliers
    /// resolve duplicates.
    pub fn merge(&mut self, other: &LineStyle) {
        self.attrs.extend(other.attrs.iter().cloned());
    }
}

/// Discriminant shared by composites and leaves, used for cache routing and
/// reuse queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Line,
    Mark,
    BlockWrapper,
    Text,
    Widget,
    WidgetBuffer,
}

/// Composite discriminant plus per-kind payload.
#[derive(Clone)]
pub enum CompositeKind {
    Root,
    Line { style: Option<Arc<LineStyle>> },
    Mark { spec: Arc<MarkSpec> },
    BlockWrapper { style: Arc<LineStyle> },
}

/// Leaf discriminant plus per-kind payload.
#[derive(Clone)]
pub enum LeafKind {
    /// Text run; `text.len()` always equals the node length.
    Text { text: String },
    Widget {
        renderer: Arc<dyn WidgetRenderer>,
        side: i32,
    },
    /// Zero-length cursor anchor adjacent to non-text content.
    WidgetBuffer { side: i32 },
}

/// Node payload: composites own ordered children, leaves carry content.
#[derive(Clone)]
pub enum NodeData {
    Composite {
        kind: CompositeKind,
        children: Vec<NodeId>,
    },
    Leaf { kind: LeafKind },
}

/// One element of the render tree.
#[derive(Clone)]
pub struct ViewNode {
    pub(crate) data: NodeData,
    /// Weak upward link; `None` for the root and detached nodes.
    pub(crate) parent: Option<NodeId>,
    /// Document units covered (children plus break units for composites).
    pub(crate) len: usize,
    pub(crate) flags: NodeFlags,
    pub(crate) handle: Option<HostHandle>,
}

impl ViewNode {
    fn composite(kind: CompositeKind) -> Self {
        Self {
            data: NodeData::Composite {
                kind,
                children: Vec::new(),
            },
            parent: None,
            len: 0,
            flags: NodeFlags::NONE,
            handle: None,
        }
    }

    fn leaf(kind: LeafKind, len: usize, flags: NodeFlags, handle: Option<HostHandle>) -> Self {
        Self {
            data: NodeData::Leaf { kind },
            parent: None,
            len,
            flags,
            handle,
        }
    }
}

/// Arena holding both the previous tree and the tree under construction.
#[derive(Default)]
pub struct ViewArena {
    nodes: Vec<ViewNode>,
}

impl ViewArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated nodes (old and new combined).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn alloc(&mut self, node: ViewNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> &ViewNode {
        &self.nodes[id.index()]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut ViewNode {
        &mut self.nodes[id.index()]
    }

    // === Constructors ===

    pub fn new_root(&mut self) -> NodeId {
        self.alloc(ViewNode::composite(CompositeKind::Root))
    }

    pub fn new_line(&mut self, style: Option<Arc<LineStyle>>) -> NodeId {
        self.alloc(ViewNode::composite(CompositeKind::Line { style }))
    }

    pub fn new_mark(&mut self, spec: Arc<MarkSpec>) -> NodeId {
        self.alloc(ViewNode::composite(CompositeKind::Mark { spec }))
    }

    pub fn new_block_wrapper(&mut self, style: Arc<LineStyle>) -> NodeId {
        self.alloc(ViewNode::composite(CompositeKind::BlockWrapper { style }))
    }

    pub fn new_text(&mut self, text: &str, handle: Option<HostHandle>) -> NodeId {
        let len = text.len();
        self.alloc(ViewNode::leaf(
            LeafKind::Text {
                text: text.to_string(),
            },
            len,
            NodeFlags::NONE,
            handle,
        ))
    }

    pub fn new_widget(
        &mut self,
        renderer: Arc<dyn WidgetRenderer>,
        len: usize,
        side: i32,
        flags: NodeFlags,
        handle: Option<HostHandle>,
    ) -> NodeId {
        let mut flags = flags;
        if len == 0 {
            flags.insert(NodeFlags::POINT);
        }
        self.alloc(ViewNode::leaf(
            LeafKind::Widget { renderer, side },
            len,
            flags,
            handle,
        ))
    }

    pub fn new_buffer(&mut self, side: i32) -> NodeId {
        self.alloc(ViewNode::leaf(
            LeafKind::WidgetBuffer { side },
            0,
            NodeFlags::POINT,
            None,
        ))
    }

    // === Accessors ===

    #[inline]
    pub fn len(&self, id: NodeId) -> usize {
        self.node(id).len
    }

    #[inline]
    pub fn flags(&self, id: NodeId) -> NodeFlags {
        self.node(id).flags
    }

    #[inline]
    pub fn handle(&self, id: NodeId) -> Option<HostHandle> {
        self.node(id).handle
    }

    #[inline]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        match &self.node(id).data {
            NodeData::Composite { kind, .. } => match kind {
                CompositeKind::Root => NodeKind::Root,
                CompositeKind::Line { .. } => NodeKind::Line,
                CompositeKind::Mark { .. } => NodeKind::Mark,
                CompositeKind::BlockWrapper { .. } => NodeKind::BlockWrapper,
            },
            NodeData::Leaf { kind } => match kind {
                LeafKind::Text { .. } => NodeKind::Text,
                LeafKind::Widget { .. } => NodeKind::Widget,
                LeafKind::WidgetBuffer { .. } => NodeKind::WidgetBuffer,
            },
        }
    }

    pub fn is_composite(&self, id: NodeId) -> bool {
        matches!(self.node(id).data, NodeData::Composite { .. })
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.node(id).data {
            NodeData::Composite { children, .. } => children,
            NodeData::Leaf { .. } => &[],
        }
    }

    /// True when a break unit follows this node inside its parent.
    #[inline]
    pub fn break_after(&self, id: NodeId) -> bool {
        self.node(id).flags.contains(NodeFlags::BREAK_AFTER)
    }

    /// Document units the node occupies in its parent, break included.
    #[inline]
    pub fn span_len(&self, id: NodeId) -> usize {
        self.len(id) + usize::from(self.break_after(id))
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Leaf {
                kind: LeafKind::Text { text },
            } => Some(text),
            _ => None,
        }
    }

    pub fn widget_renderer(&self, id: NodeId) -> Option<&Arc<dyn WidgetRenderer>> {
        match &self.node(id).data {
            NodeData::Leaf {
                kind: LeafKind::Widget { renderer, .. },
            } => Some(renderer),
            _ => None,
        }
    }

    pub fn widget_side(&self, id: NodeId) -> Option<i32> {
        match &self.node(id).data {
            NodeData::Leaf {
                kind: LeafKind::Widget { side, .. },
            } => Some(*side),
            _ => None,
        }
    }

    pub fn line_style(&self, id: NodeId) -> Option<&Arc<LineStyle>> {
        match &self.node(id).data {
            NodeData::Composite {
                kind: CompositeKind::Line { style },
                ..
            } => style.as_ref(),
            NodeData::Composite {
                kind: CompositeKind::BlockWrapper { style },
                ..
            } => Some(style),
            _ => None,
        }
    }

    pub fn mark_spec(&self, id: NodeId) -> Option<&Arc<MarkSpec>> {
        match &self.node(id).data {
            NodeData::Composite {
                kind: CompositeKind::Mark { spec },
                ..
            } => Some(spec),
            _ => None,
        }
    }

    // === Structure ===

    /// Attach `child` as the last child of `parent`. Length bookkeeping is the
    /// builder's job.
    pub(crate) fn push_child(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(child).parent = Some(parent);
        match &mut self.node_mut(parent).data {
            NodeData::Composite { children, .. } => children.push(child),
            NodeData::Leaf { .. } => unreachable!("leaf nodes have no children"),
        }
    }

    /// Deep copy of a subtree. Clones never carry host handles; the copy is
    /// wholly new as far as the host is concerned.
    pub(crate) fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let mut node = self.node(id).clone();
        node.parent = None;
        node.handle = None;
        let copy = self.alloc(node);
        let child_ids: Vec<NodeId> = self.children(copy).to_vec();
        if !child_ids.is_empty() {
            let mut copies = Vec::with_capacity(child_ids.len());
            for child in child_ids {
                let c = self.clone_subtree(child);
                self.node_mut(c).parent = Some(copy);
                copies.push(c);
            }
            if let NodeData::Composite { children, .. } = &mut self.node_mut(copy).data {
                *children = copies;
            }
        }
        copy
    }

    // === Whole-tree queries (used by callers and tests) ===

    /// Concatenated document content of a subtree: text runs plus one `\n`
    /// per break unit. Widget-covered ranges contribute nothing.
    pub fn collect_text(&self, id: NodeId) -> String {
        let mut out = String::with_capacity(self.len(id));
        self.collect_text_into(id, &mut out);
        out
    }

    fn collect_text_into(&self, id: NodeId, out: &mut String) {
        match &self.node(id).data {
            NodeData::Leaf { kind } => {
                if let LeafKind::Text { text } = kind {
                    out.push_str(text);
                }
            }
            NodeData::Composite { children, .. } => {
                for &child in children {
                    self.collect_text_into(child, out);
                    if self.break_after(child) {
                        out.push('\n');
                    }
                }
            }
        }
    }

    /// Number of Line composites in a subtree.
    pub fn count_lines(&self, id: NodeId) -> usize {
        let own = usize::from(self.kind(id) == NodeKind::Line);
        self.children(id)
            .iter()
            .map(|&c| self.count_lines(c))
            .sum::<usize>()
            + own
    }

    /// Sum of leaf lengths plus break units in a subtree.
    pub fn leaf_len_sum(&self, id: NodeId) -> usize {
        match &self.node(id).data {
            NodeData::Leaf { .. } => self.len(id),
            NodeData::Composite { children, .. } => children
                .iter()
                .map(|&c| self.leaf_len_sum(c) + usize::from(self.break_after(c)))
                .sum(),
        }
    }

    /// Structural equality ignoring identity and host handles.
    pub fn structural_eq(&self, a: NodeId, b: NodeId) -> bool {
        if self.len(a) != self.len(b) || self.break_after(a) != self.break_after(b) {
            return false;
        }
        match (&self.node(a).data, &self.node(b).data) {
            (
                NodeData::Composite {
                    kind: ka,
                    children: ca,
                },
                NodeData::Composite {
                    kind: kb,
                    children: cb,
                },
            ) => {
                composite_kind_eq(ka, kb)
                    && ca.len() == cb.len()
                    && ca
                        .iter()
                        .zip(cb.iter())
                        .all(|(&x, &y)| self.structural_eq(x, y))
            }
            (NodeData::Leaf { kind: ka }, NodeData::Leaf { kind: kb }) => match (ka, kb) {
                (LeafKind::Text { text: ta }, LeafKind::Text { text: tb }) => ta == tb,
                (
                    LeafKind::Widget {
                        renderer: ra,
                        side: sa,
                    },
                    LeafKind::Widget {
                        renderer: rb,
                        side: sb,
                    },
                ) => sa == sb && ra.eq_renderer(rb.as_ref()),
                (LeafKind::WidgetBuffer { side: sa }, LeafKind::WidgetBuffer { side: sb }) => {
                    sa == sb
                }
                _ => false,
            },
            _ => false,
        }
    }
}

pub(crate) fn composite_kind_eq(a: &CompositeKind, b: &CompositeKind) -> bool {
    match (a, b) {
        (CompositeKind::Root, CompositeKind::Root) => true,
        (CompositeKind::Line { style: sa }, CompositeKind::Line { style: sb }) => sa == sb,
        (CompositeKind::Mark { spec: sa }, CompositeKind::Mark { spec: sb }) => sa == sb,
        (CompositeKind::BlockWrapper { style: sa }, CompositeKind::BlockWrapper { style: sb }) => {
            sa == sb
        }
        _ => false,
    }
}
