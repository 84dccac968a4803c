//! Reuse accounting and the orphaned-resource cache
//!
//! The ledger records, per old node, whether the new tree took it wholesale
//! or only stole its host resource. The cache holds recently orphaned nodes
//! from rebuilt regions so their host resources can be adopted by fresh
//! nodes of the same kind.

use std::collections::VecDeque;

use crate::error::ReconcileError;
use crate::node::{NodeFlags, NodeId, NodeKind, ViewArena};

/// How an old node carried over into the new tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReuseKind {
    /// The node itself, content and resource, is in the new tree.
    Fully,
    /// Only the host resource was adopted; the host must sync its content.
    ResourceOnly,
}

/// Per-old-node reuse claims. Claiming the same node twice is fatal: it means
/// the same host resource would appear in two places.
#[derive(Debug)]
pub struct ReuseLedger {
    claims: Vec<Option<ReuseKind>>,
}

impl ReuseLedger {
    pub fn with_capacity(nodes: usize) -> Self {
        Self {
            claims: vec![None; nodes],
        }
    }

    pub fn claim(&mut self, node: NodeId, kind: ReuseKind) -> Result<(), ReconcileError> {
        if self.claims.len() <= node.index() {
            self.claims.resize(node.index() + 1, None);
        }
        let slot = &mut self.claims[node.index()];
        if slot.is_some() {
            return Err(ReconcileError::DoubleClaim(node));
        }
        *slot = Some(kind);
        Ok(())
    }

    /// Weaken a Fully claim after the node's content was merged away from
    /// under it. ResourceOnly claims stay as they are.
    pub fn downgrade(&mut self, node: NodeId) {
        if let Some(slot) = self.claims.get_mut(node.index()) {
            if *slot == Some(ReuseKind::Fully) {
                *slot = Some(ReuseKind::ResourceOnly);
            }
        }
    }

    pub fn get(&self, node: NodeId) -> Option<ReuseKind> {
        self.claims.get(node.index()).copied().flatten()
    }

    pub fn is_claimed(&self, node: NodeId) -> bool {
        self.get(node).is_some()
    }

    /// Claim a whole subtree as fully reused.
    pub fn claim_subtree(
        &mut self,
        arena: &ViewArena,
        node: NodeId,
    ) -> Result<(), ReconcileError> {
        self.claim(node, ReuseKind::Fully)?;
        for &child in arena.children(node) {
            self.claim_subtree(arena, child)?;
        }
        Ok(())
    }

    /// Count of claims of the given kind, for diagnostics and tests.
    pub fn count(&self, kind: ReuseKind) -> usize {
        self.claims.iter().filter(|c| **c == Some(kind)).count()
    }
}

const CACHE_CAPACITY: usize = 8;

/// Small LIFO rings of orphaned old nodes, one per reusable kind. Newest
/// entries win: they are the most likely to still be warm host-side.
pub struct ReuseCache {
    text: VecDeque<NodeId>,
    widget: VecDeque<NodeId>,
    line: VecDeque<NodeId>,
    /// Node that must never enter the cache (the composition-owned leaf).
    excluded: Option<NodeId>,
}

impl ReuseCache {
    pub fn new(excluded: Option<NodeId>) -> Self {
        Self {
            text: VecDeque::with_capacity(CACHE_CAPACITY),
            widget: VecDeque::with_capacity(CACHE_CAPACITY),
            line: VecDeque::with_capacity(CACHE_CAPACITY),
            excluded,
        }
    }

    /// Offer an orphaned node. Nodes without a host resource, pinned nodes,
    /// and already-claimed nodes carry nothing worth caching.
    pub fn offer(&mut self, arena: &ViewArena, ledger: &ReuseLedger, node: NodeId) {
        if self.excluded == Some(node)
            || arena.handle(node).is_none()
            || arena.flags(node).contains(NodeFlags::COMPOSITION_PINNED)
            || ledger.is_claimed(node)
        {
            return;
        }
        let ring = match arena.kind(node) {
            NodeKind::Text => &mut self.text,
            NodeKind::Widget => &mut self.widget,
            NodeKind::Line => &mut self.line,
            _ => return,
        };
        if ring.len() == CACHE_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(node);
    }

    /// Most recent unclaimed text node, removed from the cache.
    pub fn take_text(&mut self, ledger: &ReuseLedger) -> Option<NodeId> {
        Self::take_last(&mut self.text, ledger, |_| true)
    }

    /// Most recent unclaimed line node, removed from the cache.
    pub fn take_line(&mut self, ledger: &ReuseLedger) -> Option<NodeId> {
        Self::take_last(&mut self.line, ledger, |_| true)
    }

    /// Widget lookup in two passes: first an exact match (same renderer and
    /// length, eligible for full reuse), then any widget the renderer is
    /// willing to redraw over.
    pub fn take_widget(
        &mut self,
        arena: &ViewArena,
        ledger: &ReuseLedger,
        renderer: &dyn crate::widget::WidgetRenderer,
        len: usize,
    ) -> Option<(NodeId, ReuseKind)> {
        let exact = Self::take_last(&mut self.widget, ledger, |n| {
            arena.len(n) == len
                && arena
                    .widget_renderer(n)
                    .is_some_and(|r| renderer.eq_renderer(r.as_ref()))
        });
        if let Some(n) = exact {
            return Some((n, ReuseKind::Fully));
        }
        let loose = Self::take_last(&mut self.widget, ledger, |n| {
            arena
                .widget_renderer(n)
                .is_some_and(|r| renderer.can_replace(r.as_ref()))
        });
        loose.map(|n| (n, ReuseKind::ResourceOnly))
    }

    fn take_last(
        ring: &mut VecDeque<NodeId>,
        ledger: &ReuseLedger,
        mut pred: impl FnMut(NodeId) -> bool,
    ) -> Option<NodeId> {
        // Nodes claimed since they were offered are dropped lazily here.
        for i in (0..ring.len()).rev() {
            let n = ring[i];
            if ledger.is_claimed(n) {
                ring.remove(i);
                continue;
            }
            if pred(n) {
                ring.remove(i);
                return Some(n);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{HostHandle, ViewArena};
    use crate::widget::testutil::{tag, TagWidget};

    #[test]
    fn test_double_claim_is_fatal() {
        let mut arena = ViewArena::new();
        let t = arena.new_text("x", None);
        let mut ledger = ReuseLedger::with_capacity(arena.node_count());
        ledger.claim(t, ReuseKind::Fully).unwrap();
        assert!(matches!(
            ledger.claim(t, ReuseKind::ResourceOnly),
            Err(ReconcileError::DoubleClaim(n)) if n == t
        ));
    }

    #[test]
    fn test_downgrade_weakens_full_claim() {
        let mut arena = ViewArena::new();
        let t = arena.new_text("x", None);
        let mut ledger = ReuseLedger::with_capacity(arena.node_count());
        ledger.claim(t, ReuseKind::Fully).unwrap();
        ledger.downgrade(t);
        assert_eq!(ledger.get(t), Some(ReuseKind::ResourceOnly));
    }

    #[test]
    fn test_cache_is_lifo_and_skips_claimed() {
        let mut arena = ViewArena::new();
        let a = arena.new_text("a", Some(HostHandle(1)));
        let b = arena.new_text("b", Some(HostHandle(2)));
        let mut ledger = ReuseLedger::with_capacity(arena.node_count());
        let mut cache = ReuseCache::new(None);
        cache.offer(&arena, &ledger, a);
        cache.offer(&arena, &ledger, b);

        ledger.claim(b, ReuseKind::Fully).unwrap();
        assert_eq!(cache.take_text(&ledger), Some(a));
        assert_eq!(cache.take_text(&ledger), None);
    }

    #[test]
    fn test_offer_filters_ineligible_nodes() {
        let mut arena = ViewArena::new();
        let no_handle = arena.new_text("a", None);
        let pinned = arena.new_text("b", Some(HostHandle(1)));
        arena
            .node_mut(pinned)
            .flags
            .insert(NodeFlags::COMPOSITION_PINNED);
        let excluded = arena.new_text("c", Some(HostHandle(2)));
        let ledger = ReuseLedger::with_capacity(arena.node_count());
        let mut cache = ReuseCache::new(Some(excluded));
        cache.offer(&arena, &ledger, no_handle);
        cache.offer(&arena, &ledger, pinned);
        cache.offer(&arena, &ledger, excluded);
        assert_eq!(cache.take_text(&ledger), None);
    }

    #[test]
    fn test_widget_lookup_prefers_exact_match() {
        let mut arena = ViewArena::new();
        let loose = arena.new_widget(tag("other"), 0, 1, NodeFlags::NONE, Some(HostHandle(1)));
        let exact = arena.new_widget(tag("same"), 0, 1, NodeFlags::NONE, Some(HostHandle(2)));
        let ledger = ReuseLedger::with_capacity(arena.node_count());
        let mut cache = ReuseCache::new(None);
        // Exact candidate offered first, so a purely LIFO scan would miss it.
        cache.offer(&arena, &ledger, exact);
        cache.offer(&arena, &ledger, loose);

        let probe = TagWidget("same");
        assert_eq!(
            cache.take_widget(&arena, &ledger, &probe, 0),
            Some((exact, ReuseKind::Fully))
        );
        // Second lookup falls back to the redraw-over match.
        assert_eq!(
            cache.take_widget(&arena, &ledger, &probe, 0),
            Some((loose, ReuseKind::ResourceOnly))
        );
    }
}
