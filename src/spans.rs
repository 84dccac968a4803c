//! Read-time merge of layered decoration sets
//!
//! Layers stay independent and position-sorted; this iterator merges them
//! over an emit window and reports maximal uniform stretches (spans) plus
//! the widget, line and wrapper points between them. Point callbacks carry
//! the decoration's true range, which may start before the window when a
//! replacing widget straddles its edge; consumers detect that continuation
//! by comparing against the window start.

use std::sync::Arc;

use crate::decoration::{Decoration, DecorationSet};
use crate::error::ReconcileError;
use crate::node::{LineStyle, MarkSpec};

/// Receiver for merged span output, in strictly ascending position order.
pub trait SpanVisitor {
    /// A stretch of document content under a uniform mark chain. `marks` is
    /// outermost-first; the first `open_start` of them continue from before
    /// this span.
    fn span(
        &mut self,
        from: usize,
        to: usize,
        marks: &[Arc<MarkSpec>],
        open_start: usize,
        wrappers: &[Arc<LineStyle>],
    ) -> Result<(), ReconcileError>;

    /// A widget or line decoration anchored at `from`. Replacing widgets
    /// cover `[from, to)`; the window skips past the covered stretch.
    #[allow(clippy::too_many_arguments)]
    fn point(
        &mut self,
        from: usize,
        to: usize,
        deco: &Decoration,
        marks: &[Arc<MarkSpec>],
        open_start: usize,
        layer: usize,
        wrappers: &[Arc<LineStyle>],
    ) -> Result<(), ReconcileError>;
}

struct Item<'a> {
    from: usize,
    to: usize,
    layer: usize,
    deco: &'a Decoration,
    restricted: bool,
}

struct ActiveMark {
    spec: Arc<MarkSpec>,
    from: usize,
    to: usize,
}

struct ActiveWrap {
    style: Arc<LineStyle>,
    to: usize,
}

/// Merge all layers over `[from, to)` and report the result to `visitor`.
pub fn emit_spans(
    layers: &[DecorationSet],
    from: usize,
    to: usize,
    visitor: &mut dyn SpanVisitor,
) -> Result<(), ReconcileError> {
    debug_assert!(from <= to);
    let mut items: Vec<Item> = Vec::new();
    for (layer, set) in layers.iter().enumerate() {
        for r in set.ranges() {
            let overlaps = (r.from < to && r.to > from)
                || (r.from == r.to && r.from >= from && r.from <= to);
            if overlaps {
                items.push(Item {
                    from: r.from,
                    to: r.to,
                    layer,
                    deco: &r.deco,
                    restricted: set.is_restricted(),
                });
            }
        }
    }
    // Longer ranges open first at equal positions so they nest outside.
    items.sort_by(|a, b| {
        (a.from, a.deco.side_key(), a.layer)
            .cmp(&(b.from, b.deco.side_key(), b.layer))
            .then(b.to.cmp(&a.to))
    });

    let mut active: Vec<ActiveMark> = Vec::new();
    let mut wrappers: Vec<ActiveWrap> = Vec::new();
    let mut pos = from;
    let mut i = 0;

    // Decorations that started before the window and reach into it.
    while i < items.len() && items[i].from < from {
        let item = &items[i];
        i += 1;
        if item.to <= pos {
            continue;
        }
        match item.deco {
            Decoration::Mark(spec) => active.push(ActiveMark {
                spec: spec.clone(),
                from: item.from,
                to: item.to,
            }),
            Decoration::Widget(_) => {
                if item.restricted && item.deco.is_block_effect() {
                    return Err(ReconcileError::RestrictedBlock { layer: item.layer });
                }
                // A replacing widget straddling the window start owns the
                // covered stretch; report it with its true range.
                emit_point(visitor, item, &active, &wrappers, pos)?;
                pos = item.to.min(to);
            }
            Decoration::BlockWrap(style) => {
                if item.restricted {
                    return Err(ReconcileError::RestrictedBlock { layer: item.layer });
                }
                wrappers.push(ActiveWrap {
                    style: style.clone(),
                    to: item.to,
                });
            }
            Decoration::Line(_) => {}
        }
    }

    loop {
        active.retain(|m| m.to > pos);
        wrappers.retain(|w| w.to > pos);

        while i < items.len() && items[i].from <= pos {
            let item = &items[i];
            i += 1;
            if item.from < pos {
                // Started inside a stretch a replacing widget covered. Marks
                // resume past the cover; everything else is hidden.
                if item.to > pos {
                    if let Decoration::Mark(spec) = item.deco {
                        active.push(ActiveMark {
                            spec: spec.clone(),
                            from: item.from,
                            to: item.to,
                        });
                    }
                }
                continue;
            }
            match item.deco {
                Decoration::Mark(spec) => {
                    if item.to > pos {
                        active.push(ActiveMark {
                            spec: spec.clone(),
                            from: item.from,
                            to: item.to,
                        });
                    }
                }
                Decoration::Widget(_) => {
                    if item.restricted && item.deco.is_block_effect() {
                        return Err(ReconcileError::RestrictedBlock { layer: item.layer });
                    }
                    emit_point(visitor, item, &active, &wrappers, pos)?;
                    if item.to > pos {
                        pos = item.to.min(to);
                        active.retain(|m| m.to > pos);
                        wrappers.retain(|w| w.to > pos);
                    }
                }
                Decoration::Line(_) => {
                    emit_point(visitor, item, &active, &wrappers, pos)?;
                }
                Decoration::BlockWrap(style) => {
                    if item.restricted {
                        return Err(ReconcileError::RestrictedBlock { layer: item.layer });
                    }
                    if item.to > pos {
                        wrappers.push(ActiveWrap {
                            style: style.clone(),
                            to: item.to,
                        });
                    }
                }
            }
        }

        if pos >= to {
            break;
        }
        let mut next = to;
        if i < items.len() {
            next = next.min(items[i].from);
        }
        for m in &active {
            next = next.min(m.to);
        }
        for w in &wrappers {
            next = next.min(w.to);
        }
        if next > pos {
            let specs: Vec<Arc<MarkSpec>> = active.iter().map(|m| m.spec.clone()).collect();
            let open_start = active.iter().take_while(|m| m.from < pos).count();
            let wraps: Vec<Arc<LineStyle>> = wrappers.iter().map(|w| w.style.clone()).collect();
            visitor.span(pos, next, &specs, open_start, &wraps)?;
        }
        pos = next;
    }
    Ok(())
}

fn emit_point(
    visitor: &mut dyn SpanVisitor,
    item: &Item<'_>,
    active: &[ActiveMark],
    wrappers: &[ActiveWrap],
    pos: usize,
) -> Result<(), ReconcileError> {
    let specs: Vec<Arc<MarkSpec>> = active.iter().map(|m| m.spec.clone()).collect();
    let open_start = active.iter().take_while(|m| m.from < pos).count();
    let wraps: Vec<Arc<LineStyle>> = wrappers.iter().map(|w| w.style.clone()).collect();
    visitor.point(item.from, item.to, item.deco, &specs, open_start, item.layer, &wraps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoration::{DecoRange, WidgetSpec};
    use crate::widget::testutil::tag;

    #[derive(Debug, PartialEq)]
    enum Ev {
        Span(usize, usize, usize, usize), // from, to, mark count, open_start
        Point(usize, usize, usize),       // from, to, layer
    }

    #[derive(Default)]
    struct Recorder(Vec<Ev>);

    impl SpanVisitor for Recorder {
        fn span(
            &mut self,
            from: usize,
            to: usize,
            marks: &[Arc<MarkSpec>],
            open_start: usize,
            _wrappers: &[Arc<LineStyle>],
        ) -> Result<(), ReconcileError> {
            self.0.push(Ev::Span(from, to, marks.len(), open_start));
            Ok(())
        }

        fn point(
            &mut self,
            from: usize,
            to: usize,
            _deco: &Decoration,
            _marks: &[Arc<MarkSpec>],
            _open_start: usize,
            layer: usize,
            _wrappers: &[Arc<LineStyle>],
        ) -> Result<(), ReconcileError> {
            self.0.push(Ev::Point(from, to, layer));
            Ok(())
        }
    }

    fn mark(from: usize, to: usize) -> DecoRange {
        DecoRange::new(from, to, Decoration::Mark(Arc::new(MarkSpec::default())))
    }

    #[test]
    fn test_plain_window_is_one_span() {
        let mut rec = Recorder::default();
        emit_spans(&[], 3, 9, &mut rec).unwrap();
        assert_eq!(rec.0, vec![Ev::Span(3, 9, 0, 0)]);
    }

    #[test]
    fn test_mark_splits_window() {
        let layers = [DecorationSet::new(vec![mark(4, 6)])];
        let mut rec = Recorder::default();
        emit_spans(&layers, 2, 8, &mut rec).unwrap();
        assert_eq!(
            rec.0,
            vec![
                Ev::Span(2, 4, 0, 0),
                Ev::Span(4, 6, 1, 0),
                Ev::Span(6, 8, 0, 0),
            ]
        );
    }

    #[test]
    fn test_straddling_mark_counts_as_open() {
        let layers = [DecorationSet::new(vec![mark(0, 5)])];
        let mut rec = Recorder::default();
        emit_spans(&layers, 2, 8, &mut rec).unwrap();
        assert_eq!(
            rec.0,
            vec![Ev::Span(2, 5, 1, 1), Ev::Span(5, 8, 0, 0)]
        );
    }

    #[test]
    fn test_point_widgets_sorted_by_side() {
        let layers = [DecorationSet::new(vec![
            DecoRange::point(
                4,
                Decoration::Widget(Arc::new(WidgetSpec::inline(tag("after"), 1))),
            ),
            DecoRange::point(
                4,
                Decoration::Widget(Arc::new(WidgetSpec::inline(tag("before"), -1))),
            ),
        ])];
        let mut rec = Recorder::default();
        emit_spans(&layers, 0, 8, &mut rec).unwrap();
        assert_eq!(
            rec.0,
            vec![
                Ev::Span(0, 4, 0, 0),
                Ev::Point(4, 4, 0),
                Ev::Point(4, 4, 0),
                Ev::Span(4, 8, 0, 0),
            ]
        );
    }

    #[test]
    fn test_replace_covers_stretch() {
        let layers = [DecorationSet::new(vec![
            DecoRange::new(
                3,
                6,
                Decoration::Widget(Arc::new(WidgetSpec::replace(tag("r")))),
            ),
            mark(4, 9),
        ])];
        let mut rec = Recorder::default();
        emit_spans(&layers, 0, 10, &mut rec).unwrap();
        // The mark starting inside the replaced stretch resumes after it.
        assert_eq!(
            rec.0,
            vec![
                Ev::Span(0, 3, 0, 0),
                Ev::Point(3, 6, 0),
                Ev::Span(6, 9, 1, 1),
                Ev::Span(9, 10, 0, 0),
            ]
        );
    }

    #[test]
    fn test_replace_straddling_window_start_keeps_true_range() {
        let layers = [DecorationSet::new(vec![DecoRange::new(
            2,
            7,
            Decoration::Widget(Arc::new(WidgetSpec::replace(tag("r")))),
        )])];
        let mut rec = Recorder::default();
        emit_spans(&layers, 5, 10, &mut rec).unwrap();
        assert_eq!(rec.0, vec![Ev::Point(2, 7, 0), Ev::Span(7, 10, 0, 0)]);
    }

    #[test]
    fn test_layers_merge_in_position_order() {
        let layers = [
            DecorationSet::new(vec![mark(5, 7)]),
            DecorationSet::new(vec![DecoRange::point(
                2,
                Decoration::Widget(Arc::new(WidgetSpec::inline(tag("w"), 0))),
            )]),
        ];
        let mut rec = Recorder::default();
        emit_spans(&layers, 0, 8, &mut rec).unwrap();
        assert_eq!(
            rec.0,
            vec![
                Ev::Span(0, 2, 0, 0),
                Ev::Point(2, 2, 1),
                Ev::Span(2, 5, 0, 0),
                Ev::Span(5, 7, 1, 0),
                Ev::Span(7, 8, 0, 0),
            ]
        );
    }

    #[test]
    fn test_restricted_layer_rejects_block_effects() {
        let layers = [
            DecorationSet::new(vec![]),
            DecorationSet::restricted(vec![DecoRange::point(
                3,
                Decoration::Widget(Arc::new(WidgetSpec::block(tag("b"), 0))),
            )]),
        ];
        let mut rec = Recorder::default();
        let err = emit_spans(&layers, 0, 8, &mut rec).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::RestrictedBlock { layer: 1 }
        ));
    }

    #[test]
    fn test_wrapper_styles_reach_spans() {
        struct WrapCheck(Vec<(usize, usize, usize)>);
        impl SpanVisitor for WrapCheck {
            fn span(
                &mut self,
                from: usize,
                to: usize,
                _marks: &[Arc<MarkSpec>],
                _open_start: usize,
                wrappers: &[Arc<LineStyle>],
            ) -> Result<(), ReconcileError> {
                self.0.push((from, to, wrappers.len()));
                Ok(())
            }
            fn point(
                &mut self,
                _from: usize,
                _to: usize,
                _deco: &Decoration,
                _marks: &[Arc<MarkSpec>],
                _open_start: usize,
                _layer: usize,
                _wrappers: &[Arc<LineStyle>],
            ) -> Result<(), ReconcileError> {
                Ok(())
            }
        }
        let layers = [DecorationSet::new(vec![DecoRange::new(
            2,
            6,
            Decoration::BlockWrap(Arc::new(LineStyle::default())),
        )])];
        let mut check = WrapCheck(Vec::new());
        emit_spans(&layers, 0, 8, &mut check).unwrap();
        assert_eq!(check.0, vec![(0, 2, 0), (2, 6, 1), (6, 8, 0)]);
    }
}
