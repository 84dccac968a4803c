//! Stateful cursor over the previous render tree
//!
//! The cursor advances by document-length distances, reporting what it passes
//! to a visitor: fully-covered nodes as single `skip` runs (so whole subtrees
//! can be relocated intact), partially-covered composites as `enter`/`leave`
//! crossings, and break units as `cross_break`. Reports are strictly
//! ascending and never overlap.

use crate::error::ReconcileError;
use crate::node::{NodeId, NodeKind, ViewArena};

/// Disambiguates a zero-length boundary sitting exactly between two siblings:
/// stop before it, or pass zero-length content first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bias {
    Before,
    After,
}

/// Receiver for cursor reports. The arena is handed back mutably so visitors
/// can relocate or copy nodes as they are passed.
pub trait TreeVisitor {
    /// A run of `node` covering `[from, to)` of its length. `from == 0 &&
    /// to == len` means the node (and, for composites, its whole subtree) is
    /// fully covered.
    fn skip(
        &mut self,
        arena: &mut ViewArena,
        node: NodeId,
        from: usize,
        to: usize,
    ) -> Result<(), ReconcileError>;

    /// Entering a partially covered composite.
    fn enter(&mut self, _arena: &mut ViewArena, _node: NodeId) -> Result<(), ReconcileError> {
        Ok(())
    }

    /// Leaving a composite whose children are exhausted.
    fn leave(&mut self, _arena: &mut ViewArena, _node: NodeId) -> Result<(), ReconcileError> {
        Ok(())
    }

    /// Crossing one break unit.
    fn cross_break(&mut self, _arena: &mut ViewArena) -> Result<(), ReconcileError> {
        Ok(())
    }
}

struct Frame {
    node: NodeId,
    /// Index of the next child to process.
    child: usize,
    /// The previous child's break unit has not been crossed yet.
    pending_break: bool,
}

/// Pointer into the previous tree: current node, offset, ancestor stack.
pub struct OldTreeCursor {
    stack: Vec<Frame>,
    /// Offset inside the leaf at `stack.last().child`, when mid-leaf.
    leaf_offset: usize,
    pos: usize,
}

impl OldTreeCursor {
    pub fn new(root: NodeId) -> Self {
        Self {
            stack: vec![Frame {
                node: root,
                child: 0,
                pending_break: false,
            }],
            leaf_offset: 0,
            pos: 0,
        }
    }

    /// Absolute old-document position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Open ancestor chain at the current position, outermost first, root
    /// excluded. Used by the sync step to realign the builder's nesting.
    pub fn open_ancestors(&self) -> Vec<NodeId> {
        self.stack.iter().skip(1).map(|f| f.node).collect()
    }

    /// Consume `distance` document units, reporting everything passed.
    pub fn advance(
        &mut self,
        arena: &mut ViewArena,
        distance: usize,
        bias: Bias,
        visitor: &mut dyn TreeVisitor,
    ) -> Result<(), ReconcileError> {
        let mut remaining = distance;
        loop {
            let (node, child_idx, pending_break) = {
                let f = self.stack.last().expect("cursor stack never empty");
                (f.node, f.child, f.pending_break)
            };

            if pending_break {
                if remaining == 0 {
                    return Ok(());
                }
                visitor.cross_break(arena)?;
                self.top_mut().pending_break = false;
                remaining -= 1;
                self.pos += 1;
                continue;
            }

            if child_idx >= arena.children(node).len() {
                if self.stack.len() == 1 {
                    if remaining > 0 {
                        return Err(ReconcileError::CursorOverrun {
                            overshoot: remaining,
                        });
                    }
                    return Ok(());
                }
                if remaining == 0 && bias == Bias::Before {
                    return Ok(());
                }
                self.stack.pop();
                visitor.leave(arena, node)?;
                let parent = self.top_mut();
                parent.child += 1;
                if arena.break_after(node) {
                    parent.pending_break = true;
                }
                continue;
            }

            let child = arena.children(node)[child_idx];
            let child_len = arena.len(child);

            if remaining == 0 {
                match bias {
                    Bias::Before => return Ok(()),
                    Bias::After => {
                        // Pass zero-length content sitting on the boundary.
                        if child_len == 0 && self.leaf_offset == 0 && !arena.break_after(child) {
                            visitor.skip(arena, child, 0, 0)?;
                            self.top_mut().child += 1;
                            continue;
                        }
                        return Ok(());
                    }
                }
            }

            if arena.is_composite(child) {
                // A composite ending exactly at a Before stop is entered, not
                // skipped, so the position inside it stays addressable.
                if child_len < remaining || (child_len == remaining && bias == Bias::After) {
                    // Whole subtree fits: report it as one relocatable unit.
                    visitor.skip(arena, child, 0, child_len)?;
                    remaining -= child_len;
                    self.pos += child_len;
                    let f = self.top_mut();
                    f.child += 1;
                    if arena.break_after(child) {
                        f.pending_break = true;
                    }
                } else {
                    visitor.enter(arena, child)?;
                    self.stack.push(Frame {
                        node: child,
                        child: 0,
                        pending_break: false,
                    });
                }
                continue;
            }

            // Leaf run, possibly partial on either end.
            let from = self.leaf_offset;
            let take = (child_len - from).min(remaining);
            let to = from + take;
            visitor.skip(arena, child, from, to)?;
            remaining -= take;
            self.pos += take;
            if to == child_len {
                self.leaf_offset = 0;
                let f = self.top_mut();
                f.child += 1;
                if arena.break_after(child) {
                    f.pending_break = true;
                }
            } else {
                self.leaf_offset = to;
                debug_assert_eq!(remaining, 0);
            }
        }
    }

    /// First node of `kind` matching `pred` that starts exactly at the
    /// current position, scanning forward. The scan descends into composites,
    /// ascends past exhausted ones, and stops at the first non-matching node
    /// of nonzero length or at a break. Consumes no distance.
    pub fn find_reusable_after<F>(
        &self,
        arena: &ViewArena,
        kind: NodeKind,
        mut pred: F,
    ) -> Option<NodeId>
    where
        F: FnMut(&ViewArena, NodeId) -> bool,
    {
        if self.leaf_offset != 0 {
            return None;
        }
        for depth in (0..self.stack.len()).rev() {
            let f = &self.stack[depth];
            if f.pending_break {
                return None;
            }
            let start = if depth + 1 == self.stack.len() {
                f.child
            } else {
                // f.child points at the open child the inner frame covers.
                f.child + 1
            };
            match Self::scan_forward(arena, &arena.children(f.node)[start..], kind, &mut pred) {
                Scan::Found(id) => return Some(id),
                Scan::Blocked => return None,
                Scan::Clear => {
                    if arena.break_after(f.node) {
                        return None;
                    }
                }
            }
        }
        None
    }

    /// Mirror of `find_reusable_after` for nodes ending exactly at the
    /// current position, scanning backward.
    pub fn find_reusable_before<F>(
        &self,
        arena: &ViewArena,
        kind: NodeKind,
        mut pred: F,
    ) -> Option<NodeId>
    where
        F: FnMut(&ViewArena, NodeId) -> bool,
    {
        if self.leaf_offset != 0 {
            return None;
        }
        // A pending break has not been crossed yet, so the node it follows is
        // still adjacent on the left.
        let mut ignore_break = self.stack.last().map_or(false, |f| f.pending_break);
        for depth in (0..self.stack.len()).rev() {
            let f = &self.stack[depth];
            let ids = &arena.children(f.node)[..f.child];
            match Self::scan_backward(arena, ids, ignore_break, kind, &mut pred) {
                Scan::Found(id) => return Some(id),
                Scan::Blocked => return None,
                Scan::Clear => {}
            }
            ignore_break = false;
        }
        None
    }

    fn scan_forward<F>(arena: &ViewArena, ids: &[NodeId], kind: NodeKind, pred: &mut F) -> Scan
    where
        F: FnMut(&ViewArena, NodeId) -> bool,
    {
        for &c in ids {
            if arena.kind(c) == kind && pred(arena, c) {
                return Scan::Found(c);
            }
            if arena.is_composite(c) {
                match Self::scan_forward(arena, arena.children(c), kind, pred) {
                    Scan::Clear => {}
                    hit => return hit,
                }
            }
            if arena.span_len(c) > 0 {
                return Scan::Blocked;
            }
        }
        Scan::Clear
    }

    fn scan_backward<F>(
        arena: &ViewArena,
        ids: &[NodeId],
        mut ignore_break: bool,
        kind: NodeKind,
        pred: &mut F,
    ) -> Scan
    where
        F: FnMut(&ViewArena, NodeId) -> bool,
    {
        for &c in ids.iter().rev() {
            if arena.break_after(c) && !ignore_break {
                return Scan::Blocked;
            }
            ignore_break = false;
            if arena.kind(c) == kind && pred(arena, c) {
                return Scan::Found(c);
            }
            if arena.is_composite(c) {
                match Self::scan_backward(arena, arena.children(c), false, kind, pred) {
                    Scan::Clear => {}
                    hit => return hit,
                }
            }
            if arena.len(c) > 0 {
                return Scan::Blocked;
            }
        }
        Scan::Clear
    }

    fn top_mut(&mut self) -> &mut Frame {
        self.stack.last_mut().expect("cursor stack never empty")
    }
}

enum Scan {
    Found(NodeId),
    Blocked,
    Clear,
}
