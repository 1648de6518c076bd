//! Reconciliation engine - the single owner of user state
//!
//! The engine is a synchronous state machine with no I/O. The panel actor
//! feeds it fetch results, push patches, action outcomes and polled messages
//! one at a time, which puts every mutation on a single logical timeline.
//!
//! ## Display states
//!
//! ```text
//!            ┌──────────► Content        (fetch ok: snapshot replaced)
//!  Loading ──┼──────────► NewUser        (404: canonical zero snapshot)
//!     ▲      ├──────────► Offline        (5xx / transport: snapshot kept)
//!     │      └──────────► NotConfigured  (no EBS URL yet)
//!     └── manual refresh
//! ```
//!
//! ## Ordering
//!
//! Every fetch gets a monotonically increasing sequence number when issued.
//! A result is dropped if a fetch issued later has already replaced the
//! snapshot, so an old response can never overwrite newer state. Failures
//! that keep the snapshot (Offline) do not move that watermark.
//!
//! Dungeon patches from the push channel are applied in place and remembered
//! until a fetch issued after the patch lands; snapshots from fetches issued
//! before it get the patch re-applied so it is never lost.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::countdown::derive_deadline;
use crate::error::FetchError;
use crate::feed::{FeedOrigin, MessageFeed};
use crate::types::{ServerMessage, UserSnapshot};

pub const CHECK_IN_FEED_TEXT: &str = "Check-in successful!";
pub const JOIN_FEED_TEXT: &str = "Joined dungeon!";
pub const LOCAL_FEED_CATEGORY: &str = "chat";
pub const CONNECT_ERROR_TEXT: &str = "Error: Could not connect to server";
pub const NOT_CONFIGURED_TEXT: &str = "Extension not configured";

/// Top-level state of the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayState {
    Loading,
    Content,
    /// No record on the EBS yet; still shows (zeroed) content
    NewUser,
    /// Backend unreachable; the previous snapshot is still readable
    Offline,
    /// No EBS URL delivered by the host
    NotConfigured,
}

impl DisplayState {
    /// Whether content (possibly the new-user placeholder) is shown
    pub fn shows_content(&self) -> bool {
        matches!(self, DisplayState::Content | DisplayState::NewUser)
    }
}

impl std::fmt::Display for DisplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayState::Loading => write!(f, "Loading"),
            DisplayState::Content => write!(f, "Content"),
            DisplayState::NewUser => write!(f, "New user"),
            DisplayState::Offline => write!(f, "Offline"),
            DisplayState::NotConfigured => write!(f, "Not set up"),
        }
    }
}

/// User-initiated actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    CheckIn,
    JoinEvent,
}

impl ActionKind {
    /// Feed line added locally when the action succeeds
    pub fn feed_text(&self) -> &'static str {
        match self {
            ActionKind::CheckIn => CHECK_IN_FEED_TEXT,
            ActionKind::JoinEvent => JOIN_FEED_TEXT,
        }
    }
}

/// Inline status of one action.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActionStatus {
    #[default]
    Idle,
    Pending,
    Succeeded(String),
    /// Server-side validation failure; action re-enabled
    Rejected(String),
    /// Could not reach the server; action re-enabled
    Failed(String),
}

impl ActionStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, ActionStatus::Pending)
    }

    /// Status line text, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            ActionStatus::Idle => None,
            ActionStatus::Pending => Some("Working..."),
            ActionStatus::Succeeded(msg)
            | ActionStatus::Rejected(msg)
            | ActionStatus::Failed(msg) => Some(msg),
        }
    }
}

/// Handle for an issued fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchTicket(pub u64);

/// What applying a fetch result did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchApplied {
    /// The snapshot was replaced; the countdown must be recreated
    Replaced,
    /// Only the display state changed; the snapshot is untouched
    StateOnly,
    /// Superseded by a newer fetch and dropped
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct PendingDungeonPatch {
    active: bool,
    /// Highest sequence issued when the patch arrived
    issued_before: u64,
}

/// Owner of the user snapshot and everything derived from it.
#[derive(Debug)]
pub struct ReconciliationEngine {
    display: DisplayState,
    snapshot: Arc<UserSnapshot>,
    is_new_user: bool,
    /// Last issued sequence number
    issued_seq: u64,
    /// Sequence of the fetch whose snapshot is currently held
    applied_seq: u64,
    pending_dungeon: Option<PendingDungeonPatch>,
    feed: MessageFeed,
    check_in: ActionStatus,
    join_event: ActionStatus,
    fallback_cooldown: Duration,
}

impl ReconciliationEngine {
    pub fn new(fallback_cooldown: Duration) -> Self {
        Self {
            display: DisplayState::Loading,
            snapshot: Arc::new(UserSnapshot::new_user_default()),
            is_new_user: false,
            issued_seq: 0,
            applied_seq: 0,
            pending_dungeon: None,
            feed: MessageFeed::new(),
            check_in: ActionStatus::Idle,
            join_event: ActionStatus::Idle,
            fallback_cooldown,
        }
    }

    pub fn display(&self) -> DisplayState {
        self.display
    }

    /// Current snapshot; cheap to clone and never torn
    pub fn snapshot(&self) -> Arc<UserSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_new_user(&self) -> bool {
        self.is_new_user
    }

    pub fn feed(&self) -> &MessageFeed {
        &self.feed
    }

    pub fn action_status(&self, kind: ActionKind) -> &ActionStatus {
        match kind {
            ActionKind::CheckIn => &self.check_in,
            ActionKind::JoinEvent => &self.join_event,
        }
    }

    fn action_status_mut(&mut self, kind: ActionKind) -> &mut ActionStatus {
        match kind {
            ActionKind::CheckIn => &mut self.check_in,
            ActionKind::JoinEvent => &mut self.join_event,
        }
    }

    /// Last issued fetch sequence
    pub fn issued_seq(&self) -> u64 {
        self.issued_seq
    }

    /// Issue a new fetch. A manual refresh re-enters `Loading`.
    pub fn begin_fetch(&mut self, manual: bool) -> FetchTicket {
        self.issued_seq += 1;
        if manual {
            self.display = DisplayState::Loading;
        }
        debug!(seq = self.issued_seq, manual, "Issuing user state fetch");
        FetchTicket(self.issued_seq)
    }

    /// Apply the outcome of fetch `ticket`.
    pub fn apply_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<UserSnapshot, FetchError>,
    ) -> FetchApplied {
        let seq = ticket.0;
        if seq <= self.applied_seq {
            debug!(seq, applied = self.applied_seq, "Dropping superseded fetch result");
            return FetchApplied::Stale;
        }

        match result {
            Ok(snapshot) => {
                info!(seq, "User state loaded");
                self.replace_snapshot(seq, snapshot);
                self.display = DisplayState::Content;
                self.is_new_user = false;
                FetchApplied::Replaced
            }
            Err(err) if err.is_new_user() => {
                info!(seq, "No user record, showing new user state");
                self.replace_snapshot(seq, UserSnapshot::new_user_default());
                self.display = DisplayState::NewUser;
                self.is_new_user = true;
                FetchApplied::Replaced
            }
            Err(FetchError::NotConfigured) => {
                warn!(seq, "No EBS URL configured");
                self.display = DisplayState::NotConfigured;
                FetchApplied::StateOnly
            }
            Err(err) => {
                warn!(
                    seq,
                    %err,
                    offline = err.is_offline(),
                    "User state unavailable, keeping previous snapshot"
                );
                self.display = DisplayState::Offline;
                FetchApplied::StateOnly
            }
        }
    }

    fn replace_snapshot(&mut self, seq: u64, mut snapshot: UserSnapshot) {
        match self.pending_dungeon {
            Some(patch) if seq <= patch.issued_before => {
                debug!(seq, active = patch.active, "Re-applying dungeon patch over older fetch");
                snapshot.is_dungeon_active = patch.active;
            }
            Some(_) => self.pending_dungeon = None,
            None => {}
        }
        self.snapshot = Arc::new(snapshot);
        self.applied_seq = seq;
    }

    /// Patch `is_dungeon_active` without waiting for a poll.
    ///
    /// Returns `true` if the visible value changed.
    pub fn apply_dungeon_status(&mut self, active: bool) -> bool {
        self.pending_dungeon = Some(PendingDungeonPatch {
            active,
            issued_before: self.issued_seq,
        });

        if self.snapshot.is_dungeon_active == active {
            return false;
        }
        info!(active, "Dungeon status pushed");
        self.snapshot = Arc::new(self.snapshot.with_dungeon_active(active));
        true
    }

    /// Deadline for the check-in countdown
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        derive_deadline(&self.snapshot.stats, self.fallback_cooldown)
    }

    /// Mark `kind` as in progress. Returns `false` if it already is.
    pub fn begin_action(&mut self, kind: ActionKind) -> bool {
        let status = self.action_status_mut(kind);
        if status.is_pending() {
            return false;
        }
        *status = ActionStatus::Pending;
        true
    }

    /// Record the outcome of an action.
    ///
    /// Returns `true` when the caller must re-fetch the full state: the
    /// server is the only source of post-action state.
    pub fn complete_action(
        &mut self,
        kind: ActionKind,
        result: Result<String, FetchError>,
        now: DateTime<Utc>,
    ) -> bool {
        let (status, refetch) = match result {
            Ok(message) => {
                info!(?kind, %message, "Action succeeded");
                self.feed
                    .append_at(kind.feed_text(), LOCAL_FEED_CATEGORY, FeedOrigin::Local, now);
                (ActionStatus::Succeeded(message), true)
            }
            Err(FetchError::Rejected(message)) => {
                info!(?kind, %message, "Action rejected");
                (ActionStatus::Rejected(message), false)
            }
            Err(FetchError::NotConfigured) => {
                (ActionStatus::Failed(NOT_CONFIGURED_TEXT.to_string()), false)
            }
            Err(err) => {
                warn!(?kind, %err, "Action failed");
                (ActionStatus::Failed(CONNECT_ERROR_TEXT.to_string()), false)
            }
        };
        *self.action_status_mut(kind) = status;
        refetch
    }

    /// Add polled server messages to the feed.
    pub fn apply_messages(&mut self, messages: Vec<ServerMessage>, now: DateTime<Utc>) -> bool {
        if messages.is_empty() {
            return false;
        }
        debug!(count = messages.len(), "New server messages");
        self.feed.append_server_batch(messages, now);
        true
    }

    /// Whether the check-in action should be enabled
    pub fn can_check_in(&self) -> bool {
        self.snapshot.can_check_in.unwrap_or(false) && !self.check_in.is_pending()
    }

    /// Whether the join action should be enabled
    pub fn can_join_event(&self) -> bool {
        self.snapshot.is_dungeon_active && !self.join_event.is_pending()
    }

    /// Why check-in is disabled, when there is a reason worth showing.
    pub fn check_in_hint(&self, now: DateTime<Utc>) -> Option<&'static str> {
        self.snapshot.check_in_hint(now)
    }

    /// Dungeon status line for the actions page
    pub fn dungeon_line(&self) -> &'static str {
        self.snapshot.dungeon_line()
    }
}
