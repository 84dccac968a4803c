//! Widget renderers attached to widget decorations and widget leaves
//!
//! The engine never draws anything. Renderers exist so reuse decisions can
//! compare widget content: exact equality keeps a node wholesale, and a
//! looser renderer-confirmed match lets a fresh node adopt an existing host
//! resource even when the widget content changed.

use std::any::Any;
use std::sync::Arc;

/// Renderer for widget content.
pub trait WidgetRenderer: Send + Sync {
    /// Exact identity used for full reuse.
    fn eq_renderer(&self, other: &dyn WidgetRenderer) -> bool;

    /// Loose compatibility: may `other`'s host resource be updated in place
    /// to show this widget? Defaults to exact equality.
    fn can_replace(&self, other: &dyn WidgetRenderer) -> bool {
        self.eq_renderer(other)
    }

    /// Renderer name for debugging.
    fn name(&self) -> &str {
        "widget"
    }

    /// Downcast support for type-specific comparison in `eq_renderer`.
    fn as_any(&self) -> &dyn Any;
}

/// Marker widget standing in for the visible break at the end of a line that
/// would otherwise have no height. Appended by the builder's trailing-break
/// rule; hosts paint it as a forced line break.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineBreakMarker;

impl WidgetRenderer for LineBreakMarker {
    fn eq_renderer(&self, other: &dyn WidgetRenderer) -> bool {
        other.as_any().downcast_ref::<LineBreakMarker>().is_some()
    }

    fn name(&self) -> &str {
        "line-break"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared marker instance; markers carry no state.
pub fn line_break_marker() -> Arc<dyn WidgetRenderer> {
    Arc::new(LineBreakMarker)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Test renderer identified by a tag; `can_replace` accepts any TagWidget
    /// so the two-pass cache lookup has something to find.
    #[derive(Clone, Debug)]
    pub struct TagWidget(pub &'static str);

    impl WidgetRenderer for TagWidget {
        fn eq_renderer(&self, other: &dyn WidgetRenderer) -> bool {
            other
                .as_any()
                .downcast_ref::<TagWidget>()
                .is_some_and(|w| w.0 == self.0)
        }

        fn can_replace(&self, other: &dyn WidgetRenderer) -> bool {
            other.as_any().downcast_ref::<TagWidget>().is_some()
        }

        fn name(&self) -> &str {
            self.0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    pub fn tag(name: &'static str) -> Arc<dyn WidgetRenderer> {
        Arc::new(TagWidget(name))
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn test_exact_and_loose_matching() {
        let a = tag("a");
        let a2 = tag("a");
        let b = tag("b");
        assert!(a.eq_renderer(a2.as_ref()));
        assert!(!a.eq_renderer(b.as_ref()));
        assert!(a.can_replace(b.as_ref()));
    }

    #[test]
    fn test_break_marker_identity() {
        let marker = line_break_marker();
        let other = line_break_marker();
        assert!(marker.eq_renderer(other.as_ref()));
        assert!(!marker.eq_renderer(tag("a").as_ref()));
        assert_eq!(marker.name(), "line-break");
    }
}
