//! Incremental construction of the new render tree
//!
//! The builder appends content strictly left to right, keeping one open
//! composite chain (root, wrappers, line, marks). Length bookkeeping is
//! local: appending adds to the innermost open composite, closing folds a
//! composite's length into its parent, and breaks add one unit at block
//! level. Widget buffers and the trailing break marker are appended here so
//! every caller gets the same cursor-anchoring behavior.

use std::sync::Arc;

use crate::error::ReconcileError;
use crate::node::{
    CompositeKind, LeafKind, LineStyle, MarkSpec, NodeData, NodeFlags, NodeId, NodeKind, ViewArena,
};
use crate::reuse::{ReuseCache, ReuseKind, ReuseLedger};
use crate::update::HostHooks;
use crate::widget::{line_break_marker, WidgetRenderer};

/// Buffer owed after the last appended widget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingBuffer {
    No,
    /// Owed only if the next node turns out to need a cursor position here.
    IfCursor,
    Yes,
}

/// Outcome of appending text: merged into the previous text leaf, or a new
/// leaf was created.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AppendedText {
    Merged,
    New(NodeId),
}

pub(crate) struct Builder {
    root: NodeId,
    /// Innermost open composite.
    current: NodeId,
    /// The position just written can host a cursor (text or an edge that
    /// accepts one).
    cursor_adjacent: bool,
    pending: PendingBuffer,
    /// The current block-level position is already covered by a line or
    /// block widget.
    block_covered: bool,
}

impl Builder {
    pub(crate) fn new(arena: &mut ViewArena) -> Self {
        let root = arena.new_root();
        Self {
            root,
            current: root,
            cursor_adjacent: false,
            pending: PendingBuffer::No,
            block_covered: false,
        }
    }

    // === Open-chain queries ===

    /// Open composites above the root, outermost first.
    pub(crate) fn open_chain(&self, arena: &ViewArena) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut node = self.current;
        while node != self.root {
            chain.push(node);
            match arena.parent(node) {
                Some(p) => node = p,
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    pub(crate) fn enclosing_line(&self, arena: &ViewArena) -> Option<NodeId> {
        let mut node = self.current;
        loop {
            match arena.kind(node) {
                NodeKind::Line => return Some(node),
                NodeKind::Mark => node = arena.parent(node)?,
                _ => return None,
            }
        }
    }

    pub(crate) fn in_line(&self, arena: &ViewArena) -> bool {
        self.enclosing_line(arena).is_some()
    }

    // === Structure primitives ===

    fn append(&mut self, arena: &mut ViewArena, node: NodeId) {
        let len = arena.len(node);
        arena.push_child(self.current, node);
        arena.node_mut(self.current).len += len;
    }

    /// Append an old node (or subtree) wholesale. Its break flag is cleared;
    /// the cursor reports break crossings separately.
    pub(crate) fn append_existing(&mut self, arena: &mut ViewArena, node: NodeId) {
        self.flush_buffer(arena);
        arena.node_mut(node).flags.remove(NodeFlags::BREAK_AFTER);
        self.append(arena, node);
        self.cursor_adjacent = trailing_leaf_is_text(arena, node);
        self.pending = PendingBuffer::No;
        if !self.in_line(arena) && arena.kind(node) != NodeKind::Mark {
            self.block_covered = true;
        }
    }

    /// Open a composite (fresh or a clone of an old one) as the new innermost.
    pub(crate) fn enter_node(&mut self, arena: &mut ViewArena, node: NodeId) {
        arena.node_mut(node).flags.remove(NodeFlags::BREAK_AFTER);
        arena.push_child(self.current, node);
        self.current = node;
        if matches!(arena.kind(node), NodeKind::Line | NodeKind::BlockWrapper) {
            self.block_covered = true;
        }
    }

    /// Close the innermost composite, folding its length into the parent.
    pub(crate) fn leave(&mut self, arena: &mut ViewArena) -> Result<(), ReconcileError> {
        if self.current == self.root {
            return Err(ReconcileError::LeftRoot);
        }
        let closed = self.current;
        let parent = match arena.parent(closed) {
            Some(p) => p,
            None => return Err(ReconcileError::UnbalancedNesting),
        };
        let len = arena.len(closed);
        arena.node_mut(parent).len += len;
        self.current = parent;
        Ok(())
    }

    // === Lines, wrappers, marks ===

    /// Make sure a line is open, reconciling the block wrapper chain first.
    /// Fresh lines adopt the host resource of a recently orphaned line.
    pub(crate) fn ensure_line(
        &mut self,
        arena: &mut ViewArena,
        ledger: &mut ReuseLedger,
        cache: &mut ReuseCache,
        wrappers: &[Arc<LineStyle>],
    ) -> Result<(), ReconcileError> {
        if self.in_line(arena) {
            return Ok(());
        }
        self.sync_wrappers(arena, wrappers)?;
        self.open_line(arena, ledger, cache)
    }

    /// Open a line under whatever block context is current, leaving the
    /// wrapper chain alone.
    fn open_line_if_needed(
        &mut self,
        arena: &mut ViewArena,
        ledger: &mut ReuseLedger,
        cache: &mut ReuseCache,
    ) -> Result<(), ReconcileError> {
        if self.in_line(arena) {
            return Ok(());
        }
        self.open_line(arena, ledger, cache)
    }

    fn open_line(
        &mut self,
        arena: &mut ViewArena,
        ledger: &mut ReuseLedger,
        cache: &mut ReuseCache,
    ) -> Result<(), ReconcileError> {
        let handle = match cache.take_line(ledger) {
            Some(old) => {
                ledger.claim(old, ReuseKind::ResourceOnly)?;
                arena.handle(old)
            }
            None => None,
        };
        let line = arena.new_line(None);
        arena.node_mut(line).handle = handle;
        self.enter_node(arena, line);
        self.cursor_adjacent = true;
        Ok(())
    }

    /// Align the open wrapper chain with the desired one by longest common
    /// value-equal prefix.
    fn sync_wrappers(
        &mut self,
        arena: &mut ViewArena,
        wrappers: &[Arc<LineStyle>],
    ) -> Result<(), ReconcileError> {
        let open: Vec<NodeId> = self
            .open_chain(arena)
            .into_iter()
            .filter(|&n| arena.kind(n) == NodeKind::BlockWrapper)
            .collect();
        let mut prefix = 0;
        while prefix < open.len()
            && prefix < wrappers.len()
            && arena.line_style(open[prefix]) == Some(&wrappers[prefix])
        {
            prefix += 1;
        }
        for _ in prefix..open.len() {
            self.leave(arena)?;
        }
        for style in &wrappers[prefix..] {
            let w = arena.new_block_wrapper(style.clone());
            self.enter_node(arena, w);
        }
        Ok(())
    }

    /// Merge a line style patch into the enclosing line, opening one if
    /// needed.
    pub(crate) fn add_line_style(
        &mut self,
        arena: &mut ViewArena,
        ledger: &mut ReuseLedger,
        cache: &mut ReuseCache,
        wrappers: &[Arc<LineStyle>],
        style: &LineStyle,
    ) -> Result<(), ReconcileError> {
        self.ensure_line(arena, ledger, cache, wrappers)?;
        let line = match self.enclosing_line(arena) {
            Some(l) => l,
            None => return Err(ReconcileError::UnbalancedNesting),
        };
        if let NodeData::Composite {
            kind: CompositeKind::Line { style: slot },
            ..
        } = &mut arena.node_mut(line).data
        {
            match slot {
                Some(existing) => Arc::make_mut(existing).merge(style),
                None => *slot = Some(Arc::new(style.clone())),
            }
        }
        Ok(())
    }

    /// Align the open mark chain with `marks` by longest common value-equal
    /// prefix: close the divergent suffix, open what is missing.
    pub(crate) fn ensure_marks(
        &mut self,
        arena: &mut ViewArena,
        ledger: &mut ReuseLedger,
        cache: &mut ReuseCache,
        wrappers: &[Arc<LineStyle>],
        marks: &[Arc<MarkSpec>],
    ) -> Result<(), ReconcileError> {
        self.ensure_line(arena, ledger, cache, wrappers)?;
        let open: Vec<NodeId> = self
            .open_chain(arena)
            .into_iter()
            .filter(|&n| arena.kind(n) == NodeKind::Mark)
            .collect();
        let mut prefix = 0;
        while prefix < open.len()
            && prefix < marks.len()
            && arena.mark_spec(open[prefix]) == Some(&marks[prefix])
        {
            prefix += 1;
        }
        for _ in prefix..open.len() {
            self.leave(arena)?;
        }
        for spec in &marks[prefix..] {
            let m = arena.new_mark(spec.clone());
            self.enter_node(arena, m);
        }
        Ok(())
    }

    // === Content ===

    /// Append break-free text, merging into a trailing unpinned text leaf
    /// when possible. `source` is the old node this text was preserved from,
    /// if any; a freshly created leaf adopts its host resource, or one from
    /// the cache when building new content.
    pub(crate) fn add_text(
        &mut self,
        arena: &mut ViewArena,
        ledger: &mut ReuseLedger,
        cache: &mut ReuseCache,
        text: &str,
        source: Option<NodeId>,
    ) -> Result<AppendedText, ReconcileError> {
        debug_assert_eq!(bytecount::count(text.as_bytes(), b'\n'), 0);
        self.open_line_if_needed(arena, ledger, cache)?;
        self.flush_buffer(arena);

        if let Some(&last) = arena.children(self.current).last() {
            if arena.kind(last) == NodeKind::Text
                && !arena.flags(last).contains(NodeFlags::COMPOSITION_PINNED)
            {
                if let NodeData::Leaf {
                    kind: LeafKind::Text { text: content },
                } = &mut arena.node_mut(last).data
                {
                    content.push_str(text);
                }
                arena.node_mut(last).len += text.len();
                arena.node_mut(self.current).len += text.len();
                // The merged-into leaf no longer matches its old content.
                ledger.downgrade(last);
                self.cursor_adjacent = true;
                return Ok(AppendedText::Merged);
            }
        }

        let handle = match source {
            Some(old) if !ledger.is_claimed(old) => {
                ledger.claim(old, ReuseKind::ResourceOnly)?;
                arena.handle(old)
            }
            Some(_) => None,
            None => match cache.take_text(ledger) {
                Some(old) => {
                    ledger.claim(old, ReuseKind::ResourceOnly)?;
                    arena.handle(old)
                }
                None => None,
            },
        };
        let leaf = arena.new_text(text, handle);
        self.append(arena, leaf);
        self.cursor_adjacent = true;
        Ok(AppendedText::New(leaf))
    }

    /// Append an inline widget, managing the cursor buffers around it.
    /// `existing` is a reuse decision made by the caller: a fully matching
    /// old node to relocate, or an old node whose resource to adopt.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_inline_widget(
        &mut self,
        arena: &mut ViewArena,
        ledger: &mut ReuseLedger,
        cache: &mut ReuseCache,
        existing: Option<(NodeId, ReuseKind)>,
        renderer: &Arc<dyn WidgetRenderer>,
        len: usize,
        side: i32,
        is_replace: bool,
        flags: NodeFlags,
    ) -> Result<NodeId, ReconcileError> {
        self.open_line_if_needed(arena, ledger, cache)?;
        let cursor_before = self.cursor_adjacent && (len > 0 || side > 0);
        let cursor_after = len > 0 || side <= 0;
        if self.pending == PendingBuffer::IfCursor && !cursor_before && !is_replace {
            self.pending = PendingBuffer::No;
        }
        self.flush_buffer(arena);
        if cursor_before {
            let b = arena.new_buffer(1);
            self.append(arena, b);
        }

        let node = match existing {
            Some((old, ReuseKind::Fully)) => {
                arena.node_mut(old).flags.remove(NodeFlags::BREAK_AFTER);
                old
            }
            Some((old, ReuseKind::ResourceOnly)) => {
                let handle = arena.handle(old);
                arena.new_widget(renderer.clone(), len, side, flags, handle)
            }
            None => arena.new_widget(renderer.clone(), len, side, flags, None),
        };
        self.append(arena, node);
        self.cursor_adjacent = cursor_after;
        self.pending = if !cursor_after {
            PendingBuffer::No
        } else if len > 0 {
            PendingBuffer::IfCursor
        } else {
            PendingBuffer::Yes
        };
        Ok(node)
    }

    /// Append a block widget at block level, under the wrapper chain active
    /// at its position. Block widgets split lines without consuming a break
    /// unit and never get cursor buffers.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_block_widget(
        &mut self,
        arena: &mut ViewArena,
        existing: Option<(NodeId, ReuseKind)>,
        renderer: &Arc<dyn WidgetRenderer>,
        len: usize,
        side: i32,
        flags: NodeFlags,
        hooks: &dyn HostHooks,
        wrappers: &[Arc<LineStyle>],
    ) -> Result<NodeId, ReconcileError> {
        self.pending = PendingBuffer::No;
        self.close_to_block(arena, hooks)?;
        self.sync_wrappers(arena, wrappers)?;
        if side > 0 && !self.block_covered {
            // The anchor position itself still needs a line before a widget
            // that renders after it.
            let line = arena.new_line(None);
            self.enter_node(arena, line);
            self.close_to_block(arena, hooks)?;
        }
        let node = match existing {
            Some((old, ReuseKind::Fully)) => {
                arena.node_mut(old).flags.remove(NodeFlags::BREAK_AFTER);
                old
            }
            Some((old, ReuseKind::ResourceOnly)) => {
                let handle = arena.handle(old);
                arena.new_widget(renderer.clone(), len, side, flags | NodeFlags::BLOCK, handle)
            }
            None => arena.new_widget(renderer.clone(), len, side, flags | NodeFlags::BLOCK, None),
        };
        self.append(arena, node);
        self.cursor_adjacent = false;
        self.block_covered = true;
        Ok(node)
    }

    /// Extend the most recently appended widget by `extra` covered units.
    /// Used when a replacing widget's range continues across a window edge.
    pub(crate) fn continue_widget(
        &mut self,
        arena: &mut ViewArena,
        extra: usize,
    ) -> Result<(), ReconcileError> {
        let last = arena
            .children(self.current)
            .last()
            .copied()
            .ok_or(ReconcileError::BadContinuation)?;
        if arena.kind(last) != NodeKind::Widget {
            return Err(ReconcileError::BadContinuation);
        }
        arena.node_mut(last).len += extra;
        arena.node_mut(self.current).len += extra;
        Ok(())
    }

    /// Consume one break unit: close the open line and mark it as followed
    /// by a break.
    pub(crate) fn add_break(
        &mut self,
        arena: &mut ViewArena,
        hooks: &dyn HostHooks,
    ) -> Result<(), ReconcileError> {
        if !self.in_line(arena) && !self.block_covered {
            // A break with nothing before it still ends a (empty) line.
            let line = arena.new_line(None);
            self.enter_node(arena, line);
        }
        self.close_to_block(arena, hooks)?;
        let last = arena
            .children(self.current)
            .last()
            .copied()
            .ok_or(ReconcileError::UnbalancedNesting)?;
        arena.node_mut(last).flags.insert(NodeFlags::BREAK_AFTER);
        arena.node_mut(self.current).len += 1;
        self.block_covered = false;
        self.cursor_adjacent = false;
        self.pending = PendingBuffer::No;
        Ok(())
    }

    /// Close marks and the line, applying the trailing-break-marker rule.
    pub(crate) fn close_to_block(
        &mut self,
        arena: &mut ViewArena,
        hooks: &dyn HostHooks,
    ) -> Result<(), ReconcileError> {
        while arena.kind(self.current) == NodeKind::Mark {
            self.leave(arena)?;
        }
        if arena.kind(self.current) == NodeKind::Line {
            if hooks.needs_break_marker() && line_needs_marker(arena, self.current) {
                let marker = arena.new_widget(
                    line_break_marker(),
                    0,
                    1,
                    NodeFlags::BREAK_MARKER,
                    None,
                );
                self.append(arena, marker);
            }
            self.leave(arena)?;
            self.block_covered = true;
        }
        self.cursor_adjacent = false;
        self.pending = PendingBuffer::No;
        Ok(())
    }

    /// Finish the tree: guarantee a trailing line, unwind everything, return
    /// the root.
    pub(crate) fn finish(
        mut self,
        arena: &mut ViewArena,
        hooks: &dyn HostHooks,
    ) -> Result<NodeId, ReconcileError> {
        if !self.in_line(arena) && !self.block_covered {
            // The position after the last break still is a line.
            let line = arena.new_line(None);
            self.enter_node(arena, line);
        }
        self.close_to_block(arena, hooks)?;
        while self.current != self.root {
            self.leave(arena)?;
        }
        Ok(self.root)
    }

    fn flush_buffer(&mut self, arena: &mut ViewArena) {
        if self.pending != PendingBuffer::No {
            let b = arena.new_buffer(-1);
            self.append(arena, b);
            self.pending = PendingBuffer::No;
        }
    }
}

/// Whether a closed line needs the synthetic trailing break marker: yes
/// unless its visible content ends in text (or a marker is already there).
fn line_needs_marker(arena: &ViewArena, line: NodeId) -> bool {
    let mut node = line;
    loop {
        match arena.children(node).last() {
            None => return !matches!(arena.kind(node), NodeKind::Text),
            Some(&last) => {
                if arena.flags(last).contains(NodeFlags::BREAK_MARKER) {
                    return false;
                }
                node = last;
            }
        }
    }
}

fn trailing_leaf_is_text(arena: &ViewArena, node: NodeId) -> bool {
    let mut n = node;
    while let Some(&last) = arena.children(n).last() {
        n = last;
    }
    arena.kind(n) == NodeKind::Text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::HostHandle;
    use crate::update::DefaultHooks;
    use crate::widget::testutil::tag;

    fn parts(arena: &mut ViewArena) -> (Builder, ReuseLedger, ReuseCache) {
        let builder = Builder::new(arena);
        let ledger = ReuseLedger::with_capacity(arena.node_count());
        let cache = ReuseCache::new(None);
        (builder, ledger, cache)
    }

    #[test]
    fn test_text_and_breaks_accumulate_length() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        b.add_text(&mut arena, &mut ledger, &mut cache, "ab", None)
            .unwrap();
        b.add_break(&mut arena, &DefaultHooks).unwrap();
        b.add_text(&mut arena, &mut ledger, &mut cache, "cde", None)
            .unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();

        assert_eq!(arena.len(root), 6);
        assert_eq!(arena.collect_text(root), "ab\ncde");
        assert_eq!(arena.count_lines(root), 2);
        assert_eq!(arena.leaf_len_sum(root), 6);
    }

    #[test]
    fn test_adjacent_text_merges_into_one_leaf() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        let first = b
            .add_text(&mut arena, &mut ledger, &mut cache, "ab", None)
            .unwrap();
        let second = b
            .add_text(&mut arena, &mut ledger, &mut cache, "cd", None)
            .unwrap();
        assert!(matches!(first, AppendedText::New(_)));
        assert_eq!(second, AppendedText::Merged);
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();
        let line = arena.children(root)[0];
        assert_eq!(arena.children(line).len(), 1);
        assert_eq!(arena.text(arena.children(line)[0]), Some("abcd"));
    }

    #[test]
    fn test_merge_does_not_touch_pinned_text() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        let first = match b
            .add_text(&mut arena, &mut ledger, &mut cache, "ab", None)
            .unwrap()
        {
            AppendedText::New(n) => n,
            AppendedText::Merged => panic!("first append cannot merge"),
        };
        arena
            .node_mut(first)
            .flags
            .insert(NodeFlags::COMPOSITION_PINNED);
        let second = b
            .add_text(&mut arena, &mut ledger, &mut cache, "cd", None)
            .unwrap();
        assert!(matches!(second, AppendedText::New(_)));
        assert_eq!(arena.text(first), Some("ab"));
    }

    #[test]
    fn test_marks_open_and_close_by_value() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        let bold = Arc::new(MarkSpec::new(vec![("b".into(), "1".into())]));
        let italic = Arc::new(MarkSpec::new(vec![("i".into(), "1".into())]));

        b.add_text(&mut arena, &mut ledger, &mut cache, "a", None)
            .unwrap();
        b.ensure_marks(&mut arena, &mut ledger, &mut cache, &[], &[bold.clone()])
            .unwrap();
        b.add_text(&mut arena, &mut ledger, &mut cache, "b", None)
            .unwrap();
        b.ensure_marks(
            &mut arena,
            &mut ledger,
            &mut cache,
            &[],
            &[bold.clone(), italic.clone()],
        )
        .unwrap();
        b.add_text(&mut arena, &mut ledger, &mut cache, "c", None)
            .unwrap();
        b.ensure_marks(&mut arena, &mut ledger, &mut cache, &[], &[])
            .unwrap();
        b.add_text(&mut arena, &mut ledger, &mut cache, "d", None)
            .unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();

        let line = arena.children(root)[0];
        // "a", Mark(bold)["b", Mark(italic)["c"]], "d"
        let kids = arena.children(line).to_vec();
        assert_eq!(kids.len(), 3);
        assert_eq!(arena.text(kids[0]), Some("a"));
        assert_eq!(arena.mark_spec(kids[1]), Some(&bold));
        let bold_kids = arena.children(kids[1]).to_vec();
        assert_eq!(arena.text(bold_kids[0]), Some("b"));
        assert_eq!(arena.mark_spec(bold_kids[1]), Some(&italic));
        assert_eq!(arena.text(kids[2]), Some("d"));
        assert_eq!(arena.len(root), 4);
    }

    #[test]
    fn test_buffer_between_adjacent_point_widgets() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        let r = tag("w");
        b.add_inline_widget(
            &mut arena, &mut ledger, &mut cache, None, &r, 0, -1, false, NodeFlags::NONE,
        )
        .unwrap();
        b.add_inline_widget(
            &mut arena, &mut ledger, &mut cache, None, &r, 0, -1, false, NodeFlags::NONE,
        )
        .unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();
        let line = arena.children(root)[0];
        let kinds: Vec<NodeKind> = arena
            .children(line)
            .iter()
            .map(|&c| arena.kind(c))
            .collect();
        // Widget, buffer, widget, then the trailing break marker.
        assert_eq!(
            kinds,
            vec![
                NodeKind::Widget,
                NodeKind::WidgetBuffer,
                NodeKind::Widget,
                NodeKind::Widget,
            ]
        );
        let last = *arena.children(line).last().unwrap();
        assert!(arena.flags(last).contains(NodeFlags::BREAK_MARKER));
    }

    #[test]
    fn test_buffer_between_text_and_widget() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        b.add_text(&mut arena, &mut ledger, &mut cache, "ab", None)
            .unwrap();
        b.add_inline_widget(
            &mut arena,
            &mut ledger,
            &mut cache,
            None,
            &tag("w"),
            0,
            1,
            false,
            NodeFlags::NONE,
        )
        .unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();
        let line = arena.children(root)[0];
        let kinds: Vec<NodeKind> = arena
            .children(line)
            .iter()
            .map(|&c| arena.kind(c))
            .collect();
        // Buffer before the widget because a cursor can sit after "ab".
        assert_eq!(
            kinds,
            vec![
                NodeKind::Text,
                NodeKind::WidgetBuffer,
                NodeKind::Widget,
                NodeKind::Widget,
            ]
        );
    }

    #[test]
    fn test_pending_buffer_materializes_before_text() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        // A zero-length side<=0 widget accepts the cursor after it; the owed
        // buffer is flushed when the next content arrives.
        b.add_inline_widget(
            &mut arena,
            &mut ledger,
            &mut cache,
            None,
            &tag("w"),
            0,
            -1,
            false,
            NodeFlags::NONE,
        )
        .unwrap();
        b.add_text(&mut arena, &mut ledger, &mut cache, "ab", None)
            .unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();
        let line = arena.children(root)[0];
        let kinds: Vec<NodeKind> = arena
            .children(line)
            .iter()
            .map(|&c| arena.kind(c))
            .collect();
        assert_eq!(
            kinds,
            vec![NodeKind::Widget, NodeKind::WidgetBuffer, NodeKind::Text]
        );
    }

    #[test]
    fn test_empty_line_gets_break_marker() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        b.add_break(&mut arena, &DefaultHooks).unwrap();
        b.add_text(&mut arena, &mut ledger, &mut cache, "x", None)
            .unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();

        assert_eq!(arena.count_lines(root), 2);
        assert_eq!(arena.len(root), 2);
        let first = arena.children(root)[0];
        assert!(arena.break_after(first));
        let marker = arena.children(first)[0];
        assert!(arena.flags(marker).contains(NodeFlags::BREAK_MARKER));
        assert_eq!(arena.len(marker), 0);
    }

    #[test]
    fn test_block_widget_splits_without_break_unit() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        b.add_text(&mut arena, &mut ledger, &mut cache, "abc", None)
            .unwrap();
        b.add_block_widget(
            &mut arena,
            None,
            &tag("rule"),
            0,
            1,
            NodeFlags::NONE,
            &DefaultHooks,
            &[],
        )
        .unwrap();
        b.add_text(&mut arena, &mut ledger, &mut cache, "def", None)
            .unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();

        // Line("abc"), Widget, Line("def"); length has no break in it.
        assert_eq!(arena.len(root), 6);
        assert_eq!(arena.count_lines(root), 2);
        let kids = arena.children(root).to_vec();
        assert_eq!(kids.len(), 3);
        assert_eq!(arena.kind(kids[1]), NodeKind::Widget);
        assert!(arena.flags(kids[1]).contains(NodeFlags::BLOCK));
        // No buffers anywhere around block widgets.
        for &line in &[kids[0], kids[2]] {
            for &c in arena.children(line) {
                assert_ne!(arena.kind(c), NodeKind::WidgetBuffer);
            }
        }
    }

    #[test]
    fn test_block_widget_lands_under_its_wrapper() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        let quote = Arc::new(LineStyle::new(vec![("class".into(), "quote".into())]));
        b.add_block_widget(
            &mut arena,
            None,
            &tag("rule"),
            0,
            0,
            NodeFlags::NONE,
            &DefaultHooks,
            &[quote.clone()],
        )
        .unwrap();
        b.ensure_line(&mut arena, &mut ledger, &mut cache, &[quote])
            .unwrap();
        b.add_text(&mut arena, &mut ledger, &mut cache, "ab", None)
            .unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();

        let kids = arena.children(root).to_vec();
        assert_eq!(kids.len(), 1);
        assert_eq!(arena.kind(kids[0]), NodeKind::BlockWrapper);
        let inner = arena.children(kids[0]).to_vec();
        assert_eq!(arena.kind(inner[0]), NodeKind::Widget);
        assert_eq!(arena.kind(inner[1]), NodeKind::Line);
        assert_eq!(arena.len(root), 2);
    }

    #[test]
    fn test_trailing_empty_line_after_final_break() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        b.add_text(&mut arena, &mut ledger, &mut cache, "ab", None)
            .unwrap();
        b.add_break(&mut arena, &DefaultHooks).unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();
        assert_eq!(arena.count_lines(root), 2);
        assert_eq!(arena.len(root), 3);
    }

    #[test]
    fn test_fresh_line_adopts_cached_resource() {
        let mut arena = ViewArena::new();
        let old_line = arena.new_line(None);
        arena.node_mut(old_line).handle = Some(HostHandle(42));
        let mut ledger = ReuseLedger::with_capacity(arena.node_count());
        let mut cache = ReuseCache::new(None);
        cache.offer(&arena, &ledger, old_line);

        let mut b = Builder::new(&mut arena);
        b.add_text(&mut arena, &mut ledger, &mut cache, "x", None)
            .unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();
        let line = arena.children(root)[0];
        assert_eq!(arena.handle(line), Some(HostHandle(42)));
        assert_eq!(ledger.get(old_line), Some(ReuseKind::ResourceOnly));
    }

    #[test]
    fn test_wrapper_chain_reconciliation() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        let quote = Arc::new(LineStyle::new(vec![("class".into(), "quote".into())]));
        b.ensure_line(&mut arena, &mut ledger, &mut cache, &[quote.clone()])
            .unwrap();
        b.add_text(&mut arena, &mut ledger, &mut cache, "a", None)
            .unwrap();
        b.add_break(&mut arena, &DefaultHooks).unwrap();
        // Same wrapper continues over the next line.
        b.ensure_line(&mut arena, &mut ledger, &mut cache, &[quote.clone()])
            .unwrap();
        b.add_text(&mut arena, &mut ledger, &mut cache, "b", None)
            .unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();

        let kids = arena.children(root).to_vec();
        assert_eq!(kids.len(), 1);
        assert_eq!(arena.kind(kids[0]), NodeKind::BlockWrapper);
        assert_eq!(arena.count_lines(kids[0]), 2);
        assert_eq!(arena.len(root), 3);
    }

    #[test]
    fn test_line_style_merges() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        let s1 = LineStyle::new(vec![("class".into(), "a".into())]);
        let s2 = LineStyle::new(vec![("class".into(), "b".into())]);
        b.add_line_style(&mut arena, &mut ledger, &mut cache, &[], &s1)
            .unwrap();
        b.add_line_style(&mut arena, &mut ledger, &mut cache, &[], &s2)
            .unwrap();
        b.add_text(&mut arena, &mut ledger, &mut cache, "x", None)
            .unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();
        let line = arena.children(root)[0];
        let style = arena.line_style(line).unwrap();
        assert_eq!(style.attrs.len(), 2);
    }

    #[test]
    fn test_continue_widget_requires_widget_tail() {
        let mut arena = ViewArena::new();
        let (mut b, mut ledger, mut cache) = parts(&mut arena);
        b.add_text(&mut arena, &mut ledger, &mut cache, "x", None)
            .unwrap();
        assert!(matches!(
            b.continue_widget(&mut arena, 2),
            Err(ReconcileError::BadContinuation)
        ));
        b.add_inline_widget(
            &mut arena,
            &mut ledger,
            &mut cache,
            None,
            &tag("r"),
            3,
            0,
            true,
            NodeFlags::NONE,
        )
        .unwrap();
        b.continue_widget(&mut arena, 2).unwrap();
        let root = b.finish(&mut arena, &DefaultHooks).unwrap();
        assert_eq!(arena.len(root), 6);
    }
}
