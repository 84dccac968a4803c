//! Declarative decorations layered over the document
//!
//! Decorations arrive in independent position-sorted layers contributed by
//! different sources, merged only at read time by the span iterator. A layer
//! flagged `restricted` may not contribute block effects; that restriction
//! protects invariants owned by the virtualization collaborator.

use std::sync::Arc;

use crate::node::{LineStyle, MarkSpec};
use crate::widget::WidgetRenderer;

/// Widget placement relative to its anchor position. Negative sides sort
/// before the anchor, positive after.
pub type Side = i32;

/// Widget decoration payload.
#[derive(Clone)]
pub struct WidgetSpec {
    pub renderer: Arc<dyn WidgetRenderer>,
    pub side: Side,
    /// Replacing widgets hide the document range they cover.
    pub is_replace: bool,
    /// Block widgets split the surrounding line.
    pub block: bool,
    pub inclusive_start: bool,
    pub inclusive_end: bool,
}

impl WidgetSpec {
    pub fn inline(renderer: Arc<dyn WidgetRenderer>, side: Side) -> Self {
        Self {
            renderer,
            side,
            is_replace: false,
            block: false,
            inclusive_start: false,
            inclusive_end: false,
        }
    }

    pub fn replace(renderer: Arc<dyn WidgetRenderer>) -> Self {
        Self {
            renderer,
            side: 0,
            is_replace: true,
            block: false,
            inclusive_start: false,
            inclusive_end: false,
        }
    }

    pub fn block(renderer: Arc<dyn WidgetRenderer>, side: Side) -> Self {
        Self {
            renderer,
            side,
            is_replace: false,
            block: true,
            inclusive_start: false,
            inclusive_end: false,
        }
    }
}

/// A declarative annotation attached to a document range or point.
#[derive(Clone)]
pub enum Decoration {
    /// Inline style wrapping a range; nests without crossing within a line.
    Mark(Arc<MarkSpec>),
    /// Widget at a point or replacing a range.
    Widget(Arc<WidgetSpec>),
    /// Style patch for the line containing the position.
    Line(Arc<LineStyle>),
    /// Wraps the whole lines a range touches in a BlockWrapper composite.
    /// A block effect for restriction purposes.
    BlockWrap(Arc<LineStyle>),
}

impl Decoration {
    /// Sort rank among decorations anchored at the same position.
    pub(crate) fn side_key(&self) -> i64 {
        match self {
            // Line patches and wrappers apply from the line start, ahead of
            // inline content.
            Decoration::Line(_) => i64::MIN,
            Decoration::BlockWrap(_) => i64::MIN + 1,
            Decoration::Mark(_) => 0,
            Decoration::Widget(spec) => spec.side as i64,
        }
    }

    pub(crate) fn is_block_effect(&self) -> bool {
        match self {
            Decoration::Widget(spec) => spec.block,
            Decoration::BlockWrap(_) => true,
            _ => false,
        }
    }
}

/// One decoration over `[from, to)`; `from == to` for points.
#[derive(Clone)]
pub struct DecoRange {
    pub from: usize,
    pub to: usize,
    pub deco: Decoration,
}

impl DecoRange {
    pub fn new(from: usize, to: usize, deco: Decoration) -> Self {
        debug_assert!(from <= to);
        Self { from, to, deco }
    }

    pub fn point(at: usize, deco: Decoration) -> Self {
        Self::new(at, at, deco)
    }
}

/// A position-sorted set of decorations contributed by one source.
pub struct DecorationSet {
    ranges: Vec<DecoRange>,
    restricted: bool,
}

impl DecorationSet {
    pub fn new(ranges: Vec<DecoRange>) -> Self {
        Self::build(ranges, false)
    }

    /// Restricted layers (plugin-contributed) may not supply block effects or
    /// decorations replacing line breaks.
    pub fn restricted(ranges: Vec<DecoRange>) -> Self {
        Self::build(ranges, true)
    }

    fn build(mut ranges: Vec<DecoRange>, restricted: bool) -> Self {
        ranges.sort_by_key(|r| (r.from, r.deco.side_key(), r.to));
        Self { ranges, restricted }
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    pub fn ranges(&self) -> &[DecoRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widget::testutil::tag;

    #[test]
    fn test_set_sorts_by_position_then_side() {
        let set = DecorationSet::new(vec![
            DecoRange::point(4, Decoration::Widget(Arc::new(WidgetSpec::inline(tag("b"), 1)))),
            DecoRange::point(4, Decoration::Widget(Arc::new(WidgetSpec::inline(tag("a"), -1)))),
            DecoRange::new(
                1,
                3,
                Decoration::Mark(Arc::new(MarkSpec::new(vec![]))),
            ),
        ]);
        let froms: Vec<usize> = set.ranges().iter().map(|r| r.from).collect();
        assert_eq!(froms, vec![1, 4, 4]);
        // Negative side sorts first at equal position.
        assert!(matches!(
            &set.ranges()[1].deco,
            Decoration::Widget(w) if w.side == -1
        ));
    }

    #[test]
    fn test_block_effect_classification() {
        let wrap = Decoration::BlockWrap(Arc::new(LineStyle::default()));
        let block = Decoration::Widget(Arc::new(WidgetSpec::block(tag("w"), 0)));
        let inline = Decoration::Widget(Arc::new(WidgetSpec::inline(tag("w"), 0)));
        assert!(wrap.is_block_effect());
        assert!(block.is_block_effect());
        assert!(!inline.is_block_effect());
    }
}
