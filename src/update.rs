//! Reconciliation driver
//!
//! One pass over the changed ranges, left to right. Each range runs four
//! legs: preserve the unchanged stretch before it (relocating whole subtrees
//! when they fit), collect the replaced stretch into the reuse cache, emit
//! the new content from the decoration layers and the text stream, then sync
//! the builder's open nesting back to wherever the old-tree cursor stopped.
//! A final preserve leg carries the unchanged tail over.

use std::ops::Range;
use std::sync::Arc;

use crate::builder::Builder;
use crate::cursor::{Bias, OldTreeCursor, TreeVisitor};
use crate::decoration::{Decoration, DecorationSet, WidgetSpec};
use crate::error::ReconcileError;
use crate::node::{
    composite_kind_eq, CompositeKind, HostHandle, LeafKind, LineStyle, MarkSpec, NodeData,
    NodeFlags, NodeId, NodeKind, ViewArena,
};
use crate::reuse::{ReuseCache, ReuseKind, ReuseLedger};
use crate::spans::{emit_spans, SpanVisitor};
use crate::text::{TextSource, TextToken, MAX_TEXT_CHUNK};

/// One replaced stretch: `[from_old, to_old)` in the previous document became
/// `[from_new, to_new)` in the new one. Ranges must be sorted and
/// non-overlapping on both sides.
#[derive(Clone, Copy, Debug)]
pub struct ChangedRange {
    pub from_old: usize,
    pub to_old: usize,
    pub from_new: usize,
    pub to_new: usize,
}

/// An active IME composition. The host text resource under composition must
/// survive reconciliation untouched, so the node carrying it is relocated
/// into the new tree exactly once, pinned, with the same handle.
#[derive(Clone, Debug)]
pub struct Composition {
    pub old_range: Range<usize>,
    pub new_range: Range<usize>,
    /// The text leaf in the previous tree owned by the composition.
    pub node: NodeId,
    pub handle: HostHandle,
}

/// Host-specific knobs consulted during the build.
pub trait HostHooks {
    /// Whether closed lines without trailing text get a synthetic break
    /// marker widget so they keep visible height.
    fn needs_break_marker(&self) -> bool {
        true
    }
}

/// Hooks with every default behavior.
pub struct DefaultHooks;

impl HostHooks for DefaultHooks {}

/// The new tree plus the reuse record the host needs to retire resources.
#[derive(Debug)]
pub struct UpdateResult {
    pub root: NodeId,
    pub ledger: ReuseLedger,
}

/// Produce the new render tree for a document edit.
pub fn reconcile(
    arena: &mut ViewArena,
    old_root: NodeId,
    changes: &[ChangedRange],
    layers: &[DecorationSet],
    text: &mut dyn TextSource,
    composition: Option<&Composition>,
    hooks: &dyn HostHooks,
) -> Result<UpdateResult, ReconcileError> {
    let span = tracing::debug_span!("reconcile", changes = changes.len());
    let _guard = span.enter();

    let mut prev_old = 0usize;
    let mut prev_new = 0usize;
    for c in changes {
        if c.from_old > c.to_old
            || c.from_new > c.to_new
            || c.from_old < prev_old
            || c.from_new < prev_new
        {
            return Err(ReconcileError::UnorderedChanges);
        }
        prev_old = c.to_old;
        prev_new = c.to_new;
    }

    let old_len = arena.len(old_root);
    let mut ledger = ReuseLedger::with_capacity(arena.node_count());
    let mut cache = ReuseCache::new(composition.map(|c| c.node));
    let mut builder = Builder::new(arena);
    let mut cursor = OldTreeCursor::new(old_root);
    let restricted: Vec<bool> = layers.iter().map(|l| l.is_restricted()).collect();

    let mut old_pos = 0usize;
    let mut new_pos = 0usize;

    for change in changes {
        tracing::trace!(
            from_old = change.from_old,
            to_old = change.to_old,
            from_new = change.from_new,
            to_new = change.to_new,
            "change"
        );
        {
            let mut leg = PreserveLeg {
                builder: &mut builder,
                ledger: &mut ledger,
                cache: &mut cache,
                hooks,
            };
            cursor.advance(arena, change.from_old - old_pos, Bias::Before, &mut leg)?;
        }
        text.skip(change.from_new - new_pos);
        {
            let mut leg = CollectLeg {
                ledger: &ledger,
                cache: &mut cache,
            };
            cursor.advance(
                arena,
                change.to_old - change.from_old,
                Bias::After,
                &mut leg,
            )?;
        }

        let spliced = match composition {
            Some(comp)
                if comp.new_range.start >= change.from_new
                    && comp.new_range.end <= change.to_new =>
            {
                emit_window(
                    arena, &mut builder, &mut ledger, &mut cache, &mut cursor, text, layers,
                    &restricted, hooks, change.from_new, comp.new_range.start,
                )?;
                splice_composition(arena, &mut builder, &mut ledger, &mut cache, text, comp)?;
                emit_window(
                    arena, &mut builder, &mut ledger, &mut cache, &mut cursor, text, layers,
                    &restricted, hooks, comp.new_range.end, change.to_new,
                )?;
                true
            }
            _ => false,
        };
        if !spliced {
            emit_window(
                arena, &mut builder, &mut ledger, &mut cache, &mut cursor, text, layers,
                &restricted, hooks, change.from_new, change.to_new,
            )?;
        }

        sync_nesting(arena, &mut builder, &cursor, &mut ledger, hooks)?;
        old_pos = change.to_old;
        new_pos = change.to_new;
    }

    {
        let mut leg = PreserveLeg {
            builder: &mut builder,
            ledger: &mut ledger,
            cache: &mut cache,
            hooks,
        };
        cursor.advance(arena, old_len - old_pos, Bias::After, &mut leg)?;
    }

    let new_root = builder.finish(arena, hooks)?;
    let root_handle = arena.handle(old_root);
    arena.node_mut(new_root).handle = root_handle;
    let unchanged = arena.children(new_root) == arena.children(old_root);
    ledger.claim(
        old_root,
        if unchanged {
            ReuseKind::Fully
        } else {
            ReuseKind::ResourceOnly
        },
    )?;

    tracing::debug!(
        nodes = arena.node_count(),
        fully = ledger.count(ReuseKind::Fully),
        resource_only = ledger.count(ReuseKind::ResourceOnly),
        "reconciled"
    );
    Ok(UpdateResult {
        root: new_root,
        ledger,
    })
}

// === Preserve leg ===

struct PreserveLeg<'a> {
    builder: &'a mut Builder,
    ledger: &'a mut ReuseLedger,
    cache: &'a mut ReuseCache,
    hooks: &'a dyn HostHooks,
}

impl TreeVisitor for PreserveLeg<'_> {
    fn skip(
        &mut self,
        arena: &mut ViewArena,
        node: NodeId,
        from: usize,
        to: usize,
    ) -> Result<(), ReconcileError> {
        if from == 0 && to == arena.len(node) {
            return append_preserved(arena, self.builder, self.ledger, self.hooks, node);
        }
        match arena.kind(node) {
            NodeKind::Text => {
                let slice = match arena.text(node) {
                    Some(t) => t[from..to].to_string(),
                    None => return Err(ReconcileError::UnbalancedNesting),
                };
                self.builder
                    .add_text(arena, self.ledger, self.cache, &slice, Some(node))?;
            }
            NodeKind::Widget => {
                if from > 0 {
                    // Head of this replacing widget is already in the new
                    // tree; extend it over the preserved part.
                    self.builder.continue_widget(arena, to - from)?;
                } else {
                    let renderer = match arena.widget_renderer(node) {
                        Some(r) => r.clone(),
                        None => return Err(ReconcileError::UnbalancedNesting),
                    };
                    let side = arena.widget_side(node).unwrap_or(0);
                    let existing = if !self.ledger.is_claimed(node)
                        && arena.handle(node).is_some()
                    {
                        self.ledger.claim(node, ReuseKind::ResourceOnly)?;
                        Some((node, ReuseKind::ResourceOnly))
                    } else {
                        None
                    };
                    let mut flags = arena.flags(node);
                    flags.remove(NodeFlags::BREAK_AFTER);
                    self.builder.add_inline_widget(
                        arena,
                        self.ledger,
                        self.cache,
                        existing,
                        &renderer,
                        to - from,
                        side,
                        true,
                        flags,
                    )?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn enter(&mut self, arena: &mut ViewArena, node: NodeId) -> Result<(), ReconcileError> {
        let clone = clone_shell(arena, self.ledger, node)?;
        self.builder.enter_node(arena, clone);
        Ok(())
    }

    fn leave(&mut self, arena: &mut ViewArena, node: NodeId) -> Result<(), ReconcileError> {
        match arena.kind(node) {
            NodeKind::Line => self.builder.close_to_block(arena, self.hooks),
            _ => self.builder.leave(arena),
        }
    }

    fn cross_break(&mut self, arena: &mut ViewArena) -> Result<(), ReconcileError> {
        self.builder.add_break(arena, self.hooks)
    }
}

/// Carry a fully covered old subtree into the new tree. The fast path
/// relocates it wholesale; when some descendant was already claimed by a
/// reuse search, the structure is rebuilt around the claimed parts instead.
/// A line or wrapper continuing structure the builder already has open is
/// dissolved into it rather than appended alongside.
fn append_preserved(
    arena: &mut ViewArena,
    builder: &mut Builder,
    ledger: &mut ReuseLedger,
    hooks: &dyn HostHooks,
    node: NodeId,
) -> Result<(), ReconcileError> {
    if arena.kind(node) == NodeKind::Line && builder.in_line(arena) {
        // The open line runs to the next break; this line's content
        // continues it.
        if let Some(style) = arena.line_style(node).cloned() {
            if let Some(line) = builder.enclosing_line(arena) {
                merge_line_style(arena, line, style.as_ref());
            }
        }
        return append_children(arena, builder, ledger, hooks, node);
    }
    if arena.kind(node) == NodeKind::BlockWrapper && wrapper_already_open(arena, builder, node) {
        return append_children(arena, builder, ledger, hooks, node);
    }
    if !subtree_has_claims(arena, ledger, node) {
        ledger.claim_subtree(arena, node)?;
        builder.append_existing(arena, node);
        return Ok(());
    }
    if !arena.is_composite(node) {
        if arena.len(node) == 0 {
            // Already relocated by a reuse search.
            return Ok(());
        }
        let copy = arena.clone_subtree(node);
        builder.append_existing(arena, copy);
        return Ok(());
    }
    let clone = clone_shell(arena, ledger, node)?;
    builder.enter_node(arena, clone);
    append_children(arena, builder, ledger, hooks, node)?;
    match arena.kind(clone) {
        NodeKind::Line => builder.close_to_block(arena, hooks),
        _ => builder.leave(arena),
    }
}

fn append_children(
    arena: &mut ViewArena,
    builder: &mut Builder,
    ledger: &mut ReuseLedger,
    hooks: &dyn HostHooks,
    node: NodeId,
) -> Result<(), ReconcileError> {
    let children = arena.children(node).to_vec();
    for child in children {
        // Relocation strips the break flag, so read it first.
        let broke = arena.break_after(child);
        append_preserved(arena, builder, ledger, hooks, child)?;
        if broke {
            builder.add_break(arena, hooks)?;
        }
    }
    Ok(())
}

fn wrapper_already_open(arena: &ViewArena, builder: &Builder, node: NodeId) -> bool {
    builder
        .open_chain(arena)
        .iter()
        .rev()
        .find(|&&n| arena.kind(n) == NodeKind::BlockWrapper)
        .is_some_and(|&n| arena.line_style(n) == arena.line_style(node))
}

fn subtree_has_claims(arena: &ViewArena, ledger: &ReuseLedger, node: NodeId) -> bool {
    ledger.is_claimed(node)
        || arena
            .children(node)
            .iter()
            .any(|&c| subtree_has_claims(arena, ledger, c))
}

// === Collect leg ===

struct CollectLeg<'a> {
    ledger: &'a ReuseLedger,
    cache: &'a mut ReuseCache,
}

impl TreeVisitor for CollectLeg<'_> {
    fn skip(
        &mut self,
        arena: &mut ViewArena,
        node: NodeId,
        from: usize,
        to: usize,
    ) -> Result<(), ReconcileError> {
        // Partially covered nodes keep their resource for the surviving part.
        if from == 0 && to == arena.len(node) {
            offer_subtree(arena, self.ledger, self.cache, node);
        }
        Ok(())
    }
}

fn offer_subtree(arena: &ViewArena, ledger: &ReuseLedger, cache: &mut ReuseCache, node: NodeId) {
    cache.offer(arena, ledger, node);
    for &child in arena.children(node) {
        offer_subtree(arena, ledger, cache, child);
    }
}

// === Emit leg ===

struct EmitLeg<'a> {
    arena: &'a mut ViewArena,
    builder: &'a mut Builder,
    ledger: &'a mut ReuseLedger,
    cache: &'a mut ReuseCache,
    cursor: &'a OldTreeCursor,
    text: &'a mut dyn TextSource,
    restricted: &'a [bool],
    hooks: &'a dyn HostHooks,
    window_from: usize,
    window_to: usize,
}

#[allow(clippy::too_many_arguments)]
fn emit_window(
    arena: &mut ViewArena,
    builder: &mut Builder,
    ledger: &mut ReuseLedger,
    cache: &mut ReuseCache,
    cursor: &mut OldTreeCursor,
    text: &mut dyn TextSource,
    layers: &[DecorationSet],
    restricted: &[bool],
    hooks: &dyn HostHooks,
    from: usize,
    to: usize,
) -> Result<(), ReconcileError> {
    let mut leg = EmitLeg {
        arena,
        builder,
        ledger,
        cache,
        cursor,
        text,
        restricted,
        hooks,
        window_from: from,
        window_to: to,
    };
    emit_spans(layers, from, to, &mut leg)
}

impl SpanVisitor for EmitLeg<'_> {
    fn span(
        &mut self,
        from: usize,
        to: usize,
        marks: &[Arc<MarkSpec>],
        _open_start: usize,
        wrappers: &[Arc<LineStyle>],
    ) -> Result<(), ReconcileError> {
        self.builder
            .ensure_marks(self.arena, self.ledger, self.cache, wrappers, marks)?;
        let mut need = to - from;
        while need > 0 {
            match self.text.next(need.min(MAX_TEXT_CHUNK)) {
                TextToken::Chunk(chunk) => {
                    need -= chunk.len();
                    self.builder
                        .add_text(self.arena, self.ledger, self.cache, chunk, None)?;
                }
                TextToken::Break => {
                    need -= 1;
                    self.builder.add_break(self.arena, self.hooks)?;
                    if need > 0 {
                        self.builder.ensure_marks(
                            self.arena,
                            self.ledger,
                            self.cache,
                            wrappers,
                            marks,
                        )?;
                    }
                }
                TextToken::End => return Err(ReconcileError::TextExhausted { missing: need }),
            }
        }
        Ok(())
    }

    fn point(
        &mut self,
        from: usize,
        to: usize,
        deco: &Decoration,
        _marks: &[Arc<MarkSpec>],
        _open_start: usize,
        layer: usize,
        wrappers: &[Arc<LineStyle>],
    ) -> Result<(), ReconcileError> {
        match deco {
            Decoration::Line(style) => self.builder.add_line_style(
                self.arena,
                self.ledger,
                self.cache,
                wrappers,
                style,
            ),
            Decoration::Widget(spec) => self.emit_widget(from, to, spec, layer, wrappers),
            // Marks produce no content of their own; wrapper chains arrive
            // through the span callbacks.
            Decoration::Mark(_) | Decoration::BlockWrap(_) => Ok(()),
        }
    }
}

impl EmitLeg<'_> {
    fn emit_widget(
        &mut self,
        from: usize,
        to: usize,
        spec: &WidgetSpec,
        layer: usize,
        wrappers: &[Arc<LineStyle>],
    ) -> Result<(), ReconcileError> {
        // Only the part inside the window is covered here; a tail reaching
        // past it is covered when the following leg continues the widget.
        let covered_from = from.max(self.window_from);
        let covered_to = to.min(self.window_to);
        let cover = covered_to.saturating_sub(covered_from);
        if cover > 0 {
            let breaks = self.text.skip(cover);
            if breaks > 0 && self.restricted.get(layer).copied().unwrap_or(false) {
                return Err(ReconcileError::RestrictedBreak { layer });
            }
        }
        if from < self.window_from {
            // The widget's head was built before this window; just extend it
            // over the newly covered stretch.
            return self.builder.continue_widget(self.arena, cover);
        }

        let len = covered_to - from;
        let mut flags = NodeFlags::NONE;
        if spec.inclusive_start {
            flags.insert(NodeFlags::INCLUSIVE_START);
        }
        if spec.inclusive_end {
            flags.insert(NodeFlags::INCLUSIVE_END);
        }
        let existing = self.find_existing_widget(spec, len)?;
        if spec.block {
            self.builder.add_block_widget(
                self.arena,
                existing,
                &spec.renderer,
                len,
                spec.side,
                flags,
                self.hooks,
                wrappers,
            )?;
        } else {
            self.builder
                .ensure_line(self.arena, self.ledger, self.cache, wrappers)?;
            self.builder.add_inline_widget(
                self.arena,
                self.ledger,
                self.cache,
                existing,
                &spec.renderer,
                len,
                spec.side,
                spec.is_replace,
                flags,
            )?;
        }
        Ok(())
    }

    /// Reuse lookup for a widget about to be emitted: an identical old node
    /// adjacent to the cursor is relocated wholesale, otherwise the cache may
    /// supply a resource to adopt.
    fn find_existing_widget(
        &mut self,
        spec: &WidgetSpec,
        len: usize,
    ) -> Result<Option<(NodeId, ReuseKind)>, ReconcileError> {
        let exact = |a: &ViewArena, n: NodeId| {
            a.len(n) == len
                && a.flags(n).contains(NodeFlags::BLOCK) == spec.block
                && !self.ledger.is_claimed(n)
                && a.widget_renderer(n)
                    .is_some_and(|r| spec.renderer.eq_renderer(r.as_ref()))
        };
        let mut found = self
            .cursor
            .find_reusable_after(self.arena, NodeKind::Widget, exact);
        if found.is_none() {
            found = self
                .cursor
                .find_reusable_before(self.arena, NodeKind::Widget, exact);
        }
        if let Some(old) = found {
            self.ledger.claim(old, ReuseKind::Fully)?;
            return Ok(Some((old, ReuseKind::Fully)));
        }
        if let Some((old, kind)) =
            self.cache
                .take_widget(self.arena, self.ledger, spec.renderer.as_ref(), len)
        {
            self.ledger.claim(old, kind)?;
            return Ok(Some((old, kind)));
        }
        Ok(None)
    }
}

// === Composition splice ===

fn splice_composition(
    arena: &mut ViewArena,
    builder: &mut Builder,
    ledger: &mut ReuseLedger,
    cache: &mut ReuseCache,
    text: &mut dyn TextSource,
    comp: &Composition,
) -> Result<(), ReconcileError> {
    builder.ensure_line(arena, ledger, cache, &[])?;
    let mut content = String::with_capacity(comp.new_range.len());
    let mut need = comp.new_range.end - comp.new_range.start;
    while need > 0 {
        match text.next(need) {
            TextToken::Chunk(chunk) => {
                need -= chunk.len();
                content.push_str(chunk);
            }
            TextToken::Break => return Err(ReconcileError::CompositionBreak),
            TextToken::End => return Err(ReconcileError::TextExhausted { missing: need }),
        }
    }
    let len = content.len();
    let node = if arena.kind(comp.node) == NodeKind::Text {
        if let NodeData::Leaf {
            kind: LeafKind::Text { text: slot },
        } = &mut arena.node_mut(comp.node).data
        {
            *slot = content;
        }
        comp.node
    } else {
        // A corrupt composition record still must not lose the host node.
        arena.new_text(&content, Some(comp.handle))
    };
    arena.node_mut(node).len = len;
    arena
        .node_mut(node)
        .flags
        .insert(NodeFlags::COMPOSITION_PINNED);
    arena.node_mut(node).handle = Some(comp.handle);
    if node == comp.node {
        ledger.claim(node, ReuseKind::Fully)?;
    }
    builder.append_existing(arena, node);
    Ok(())
}

// === Nesting sync ===

/// After an emit window, realign the builder's open composites with the
/// ancestors the old-tree cursor is currently inside, so the following
/// preserve leg lands in matching structure. An open line never closes
/// here: lines end at breaks, and preserved content at a line boundary
/// keeps flowing into it.
fn sync_nesting(
    arena: &mut ViewArena,
    builder: &mut Builder,
    cursor: &OldTreeCursor,
    ledger: &mut ReuseLedger,
    hooks: &dyn HostHooks,
) -> Result<(), ReconcileError> {
    let targets = cursor.open_ancestors();
    let open = builder.open_chain(arena);
    let mut prefix = 0;
    while prefix < open.len() && prefix < targets.len() {
        let (new, old) = (open[prefix], targets[prefix]);
        if kinds_eq(arena, new, old) {
            prefix += 1;
        } else if arena.kind(new) == NodeKind::Line && arena.kind(old) == NodeKind::Line {
            // Joined lines: fold the old line's style into the open one
            // instead of closing it and opening an adjacent sibling.
            if let Some(style) = arena.line_style(old).cloned() {
                merge_line_style(arena, new, style.as_ref());
            }
            prefix += 1;
        } else {
            break;
        }
    }
    while builder.open_chain(arena).len() > prefix {
        let chain = builder.open_chain(arena);
        let innermost = chain[chain.len() - 1];
        match arena.kind(innermost) {
            NodeKind::Line if targets.len() <= prefix => break,
            NodeKind::Line => builder.close_to_block(arena, hooks)?,
            _ => builder.leave(arena)?,
        }
    }
    for &old in &targets[prefix..] {
        let clone = clone_shell(arena, ledger, old)?;
        builder.enter_node(arena, clone);
    }
    Ok(())
}

/// Fold a line style patch into an existing line node.
fn merge_line_style(arena: &mut ViewArena, line: NodeId, style: &LineStyle) {
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
}

fn kinds_eq(arena: &ViewArena, a: NodeId, b: NodeId) -> bool {
    match (&arena.node(a).data, &arena.node(b).data) {
        (
            NodeData::Composite { kind: ka, .. },
            NodeData::Composite { kind: kb, .. },
        ) => composite_kind_eq(ka, kb),
        _ => false,
    }
}

/// Fresh composite of the same kind as an old one, adopting its host
/// resource when that resource is still unclaimed.
fn clone_shell(
    arena: &mut ViewArena,
    ledger: &mut ReuseLedger,
    old: NodeId,
) -> Result<NodeId, ReconcileError> {
    let kind = match &arena.node(old).data {
        NodeData::Composite { kind, .. } => kind.clone(),
        NodeData::Leaf { .. } => return Err(ReconcileError::UnbalancedNesting),
    };
    let clone = match kind {
        CompositeKind::Line { style } => arena.new_line(style),
        CompositeKind::Mark { spec } => arena.new_mark(spec),
        CompositeKind::BlockWrapper { style } => arena.new_block_wrapper(style),
        CompositeKind::Root => return Err(ReconcileError::UnbalancedNesting),
    };
    if !ledger.is_claimed(old) && arena.handle(old).is_some() {
        ledger.claim(old, ReuseKind::ResourceOnly)?;
        let handle = arena.handle(old);
        arena.node_mut(clone).handle = handle;
    }
    Ok(clone)
}
