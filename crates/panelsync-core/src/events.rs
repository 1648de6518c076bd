//! Panel events for presentation-layer subscribers
//!
//! The view itself is pulled; these events only tell a renderer when pulling
//! is worthwhile.

use crate::engine::{ActionKind, ActionStatus, DisplayState};
use crate::view::Page;

/// Events emitted by the panel actor
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    /// The display state changed
    DisplayChanged {
        /// The new state
        display: DisplayState,
    },
    /// A new snapshot was applied
    SnapshotReplaced {
        /// Sequence number of the fetch that produced it
        seq: u64,
    },
    /// The visible page must be re-rendered
    Rerender {
        /// The page to re-render
        page: Page,
    },
    /// An action finished
    ActionFinished {
        kind: ActionKind,
        status: ActionStatus,
    },
    /// A push payload was dropped
    PushDropped {
        /// Why it was dropped
        reason: String,
    },
}

impl PanelEvent {
    /// The page this event asks to re-render, if any
    pub fn page(&self) -> Option<Page> {
        match self {
            PanelEvent::Rerender { page } => Some(*page),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_page() {
        let event = PanelEvent::Rerender {
            page: Page::Actions,
        };
        assert_eq!(event.page(), Some(Page::Actions));

        let event = PanelEvent::SnapshotReplaced { seq: 3 };
        assert_eq!(event.page(), None);
    }
}
