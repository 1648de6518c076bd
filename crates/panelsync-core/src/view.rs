//! Read model for the presentation layer
//!
//! The panel publishes a fresh [`PanelView`] after every applied update. The
//! presentation layer pulls it whenever it renders; nothing here is pushed
//! into a UI.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::countdown::CountdownState;
use crate::engine::{ActionStatus, DisplayState, ReconciliationEngine};
use crate::feed::MessageFeedEntry;
use crate::types::UserSnapshot;

/// Text shown instead of the timer for users with no record yet
pub const NEW_USER_TIMER_TEXT: &str = "Join in chat to begin!";

/// Pages of the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Page {
    #[default]
    Overview,
    Actions,
    Messages,
    Tokens,
    Inventory,
    Status,
}

impl Page {
    pub const ALL: [Page; 6] = [
        Page::Overview,
        Page::Actions,
        Page::Messages,
        Page::Tokens,
        Page::Inventory,
        Page::Status,
    ];

    /// Whether the page renders `is_dungeon_active`
    pub fn depends_on_dungeon(&self) -> bool {
        matches!(self, Page::Actions)
    }

    /// Whether the page renders the message feed
    pub fn depends_on_feed(&self) -> bool {
        matches!(self, Page::Messages)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Page::Overview => "overview",
            Page::Actions => "actions",
            Page::Messages => "messages",
            Page::Tokens => "tokens",
            Page::Inventory => "inventory",
            Page::Status => "status",
        }
    }
}

impl std::str::FromStr for Page {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Page::ALL
            .iter()
            .copied()
            .find(|page| page.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown page '{}'", s))
    }
}

impl std::fmt::Display for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the presentation layer needs for one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelView {
    pub display: DisplayState,
    pub snapshot: Arc<UserSnapshot>,
    pub is_new_user: bool,
    pub countdown: CountdownState,
    /// Newest first
    pub feed: Vec<MessageFeedEntry>,
    pub check_in: ActionStatus,
    pub join_event: ActionStatus,
    pub can_check_in: bool,
    pub can_join_event: bool,
    pub page: Page,
}

impl PanelView {
    /// The view before anything has been fetched
    pub fn initial() -> Self {
        Self {
            display: DisplayState::Loading,
            snapshot: Arc::new(UserSnapshot::new_user_default()),
            is_new_user: false,
            countdown: CountdownState::ready(),
            feed: Vec::new(),
            check_in: ActionStatus::Idle,
            join_event: ActionStatus::Idle,
            can_check_in: false,
            can_join_event: false,
            page: Page::Overview,
        }
    }

    /// Build a view from the engine and countdown
    pub fn capture(engine: &ReconciliationEngine, countdown: &CountdownState, page: Page) -> Self {
        use crate::engine::ActionKind;

        Self {
            display: engine.display(),
            snapshot: engine.snapshot(),
            is_new_user: engine.is_new_user(),
            countdown: countdown.clone(),
            feed: engine.feed().to_vec(),
            check_in: engine.action_status(ActionKind::CheckIn).clone(),
            join_event: engine.action_status(ActionKind::JoinEvent).clone(),
            can_check_in: engine.can_check_in(),
            can_join_event: engine.can_join_event(),
            page,
        }
    }

    /// Timer line for the overview page
    pub fn timer_text(&self) -> String {
        if self.is_new_user || !self.snapshot.is_checked_in() {
            NEW_USER_TIMER_TEXT.to_string()
        } else {
            self.countdown.text()
        }
    }
}

impl Default for PanelView {
    fn default() -> Self {
        Self::initial()
    }
}
