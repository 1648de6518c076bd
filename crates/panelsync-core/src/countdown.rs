//! Check-in countdown
//!
//! The countdown is derived from the current snapshot and ticked once per
//! second by the panel actor. Ticking is pure: it only reads the clock value
//! it is given and the snapshot, and tells the caller whether a refresh should
//! be scheduled. It never performs I/O.
//!
//! ## Lifecycle
//!
//! ```text
//! new snapshot ──► restart(deadline) ──► CountingDown ─tick─► ... ─► expired
//!                                                                     │
//!                      ┌──────────────────────┬───────────────────────┤
//!                      ▼                      ▼                       ▼
//!               BlockedByEvent           Refreshing (one            Ready
//!               (dungeon active,         refresh per deadline,
//!                server says no)         within grace window)
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{UserSnapshot, UserStats};

pub const READY_TEXT: &str = "Ready to check in!";
pub const BLOCKED_TEXT: &str = "Dungeon Active";
pub const REFRESHING_TEXT: &str = "Checking status...";

/// Where the countdown currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountdownPhase {
    /// Deadline in the future
    CountingDown,
    /// Check-in available (or no deadline at all)
    Ready,
    /// Timer is done but a dungeon blocks check-ins
    BlockedByEvent,
    /// Timer is done, server still says no; a status refresh is outstanding
    Refreshing,
}

/// Snapshot of the countdown for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownState {
    /// Absolute deadline, `None` when the user can check in immediately
    pub deadline: Option<DateTime<Utc>>,
    pub phase: CountdownPhase,
    /// Milliseconds left; never negative
    pub remaining_ms: u64,
}

impl CountdownState {
    /// A countdown with nothing to wait for
    pub fn ready() -> Self {
        Self {
            deadline: None,
            phase: CountdownPhase::Ready,
            remaining_ms: 0,
        }
    }

    /// Human-readable timer text
    pub fn text(&self) -> String {
        match self.phase {
            CountdownPhase::CountingDown => format_remaining(self.remaining_ms),
            CountdownPhase::Ready => READY_TEXT.to_string(),
            CountdownPhase::BlockedByEvent => BLOCKED_TEXT.to_string(),
            CountdownPhase::Refreshing => REFRESHING_TEXT.to_string(),
        }
    }
}

impl Default for CountdownState {
    fn default() -> Self {
        Self::ready()
    }
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The timer is stopped; nothing happened
    Idle,
    /// Still counting down
    Counting,
    /// Expired on this tick and stopped itself
    Settled,
    /// Expired on this tick; the caller should schedule one status refresh
    RequestRefresh,
}

/// Derive the check-in deadline from server stats.
///
/// Priority: the server's explicit next check-in time (it already reflects
/// modifiers), then last check-in plus `fallback_cooldown`, then none.
pub fn derive_deadline(stats: &UserStats, fallback_cooldown: Duration) -> Option<DateTime<Utc>> {
    if let Some(next) = stats.next_check_in_time {
        return Some(next);
    }
    let last = stats.last_check_in_time?;
    let cooldown = chrono::Duration::from_std(fallback_cooldown).ok()?;
    last.checked_add_signed(cooldown)
}

/// Format milliseconds as `m:ss`.
pub fn format_remaining(remaining_ms: u64) -> String {
    let minutes = remaining_ms / 60_000;
    let seconds = (remaining_ms % 60_000) / 1_000;
    format!("{}:{:02}", minutes, seconds)
}

/// 1 Hz countdown with a one-shot refresh guard.
#[derive(Debug, Clone)]
pub struct CountdownScheduler {
    state: CountdownState,
    running: bool,
    grace: chrono::Duration,
    /// Deadline for which a refresh was already requested
    refreshed_for: Option<DateTime<Utc>>,
    refresh_in_flight: bool,
}

impl CountdownScheduler {
    pub fn new(grace: Duration) -> Self {
        Self {
            state: CountdownState::ready(),
            running: false,
            grace: chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero()),
            refreshed_for: None,
            refresh_in_flight: false,
        }
    }

    pub fn state(&self) -> &CountdownState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_refresh_in_flight(&self) -> bool {
        self.refresh_in_flight
    }

    /// Tear down the current countdown and start one for `deadline`,
    /// evaluating it immediately.
    pub fn restart(
        &mut self,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        snapshot: &UserSnapshot,
    ) -> TickOutcome {
        self.state = CountdownState {
            deadline,
            phase: CountdownPhase::CountingDown,
            remaining_ms: 0,
        };
        self.running = true;
        self.tick(now, snapshot)
    }

    /// The refresh requested by [`TickOutcome::RequestRefresh`] has finished
    /// (successfully or not).
    pub fn refresh_completed(&mut self) {
        self.refresh_in_flight = false;
    }

    /// Advance the countdown to `now`.
    pub fn tick(&mut self, now: DateTime<Utc>, snapshot: &UserSnapshot) -> TickOutcome {
        if !self.running {
            return TickOutcome::Idle;
        }

        let remaining = self.state.deadline.map(|deadline| deadline - now);
        if let Some(remaining) = remaining {
            if remaining > chrono::Duration::zero() {
                self.state.phase = CountdownPhase::CountingDown;
                self.state.remaining_ms = remaining.num_milliseconds().max(0) as u64;
                return TickOutcome::Counting;
            }
        }

        self.running = false;
        self.state.remaining_ms = 0;

        let server_blocks = snapshot.can_check_in == Some(false);
        if server_blocks && snapshot.is_dungeon_active {
            self.state.phase = CountdownPhase::BlockedByEvent;
            return TickOutcome::Settled;
        }

        if server_blocks {
            if self.refresh_in_flight {
                self.state.phase = CountdownPhase::Refreshing;
                return TickOutcome::Settled;
            }

            let within_grace = remaining
                .map(|remaining| -remaining < self.grace)
                .unwrap_or(false);
            let already_refreshed = self.refreshed_for.is_some()
                && self.refreshed_for == self.state.deadline;

            if within_grace && !already_refreshed {
                self.state.phase = CountdownPhase::Refreshing;
                self.refreshed_for = self.state.deadline;
                self.refresh_in_flight = true;
                return TickOutcome::RequestRefresh;
            }
        }

        self.state.phase = CountdownPhase::Ready;
        TickOutcome::Settled
    }
}
