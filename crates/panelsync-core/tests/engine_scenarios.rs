//! Reconciliation scenarios
//!
//! End-to-end sequences through the synchronous engine, countdown and push
//! router without any runtime: each test plays one story of updates arriving
//! in a particular order.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use panelsync_core::countdown::{CountdownPhase, BLOCKED_TEXT, READY_TEXT, REFRESHING_TEXT};
use panelsync_core::{
    parse_push, ActionKind, ActionStatus, CountdownScheduler, DisplayState, FetchApplied,
    FetchError, Page, PanelView, PushEvent, ReconciliationEngine, ServerMessage, TickOutcome,
    UserSnapshot, UserStats, FEED_CAPACITY,
};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn engine() -> ReconciliationEngine {
    ReconciliationEngine::new(Duration::from_secs(300))
}

fn scheduler() -> CountdownScheduler {
    CountdownScheduler::new(Duration::from_secs(10))
}

fn player(next_check_in: Option<DateTime<Utc>>, can_check_in: bool) -> UserSnapshot {
    UserSnapshot {
        user_name: Some("Ada".to_string()),
        can_check_in: Some(can_check_in),
        stats: UserStats {
            level: 12,
            experience: 3400,
            total_check_ins: 41,
            next_check_in_time: next_check_in,
            ..UserStats::default()
        },
        ..UserSnapshot::default()
    }
}

// ============================================================================
// Fetch classification
// ============================================================================

/// 404 on first load: zeroed stats, no check-in, empty feed
#[test]
fn test_first_load_not_found() {
    let mut engine = engine();
    let ticket = engine.begin_fetch(true);
    assert_eq!(engine.display(), DisplayState::Loading);

    engine.apply_fetch(ticket, Err(FetchError::NotFound));

    let view = PanelView::capture(&engine, &scheduler().state().clone(), Page::Overview);
    assert_eq!(view.display, DisplayState::NewUser);
    assert!(view.is_new_user);
    assert_eq!(view.snapshot.stats, UserStats::default());
    assert!(!view.can_check_in);
    assert!(view.feed.is_empty());
    assert!(view.display.shows_content());
}

/// 503 after content: Offline, with the old stats still readable
#[test]
fn test_outage_keeps_last_known_state() {
    let mut engine = engine();
    let t1 = engine.begin_fetch(false);
    engine.apply_fetch(t1, Ok(player(None, true)));

    let t2 = engine.begin_fetch(false);
    engine.apply_fetch(t2, Err(FetchError::ServiceError(Some(503))));

    assert_eq!(engine.display(), DisplayState::Offline);
    assert!(!engine.display().shows_content());
    assert_eq!(engine.snapshot().stats.level, 12);
    assert_eq!(engine.snapshot().stats.experience, 3400);

    // Recovery on the next successful poll
    let t3 = engine.begin_fetch(false);
    engine.apply_fetch(t3, Ok(player(None, true)));
    assert_eq!(engine.display(), DisplayState::Content);
}

/// Responses completing in reverse order never regress the snapshot
#[test]
fn test_reordered_responses() {
    let mut engine = engine();
    let first = engine.begin_fetch(false);
    let second = engine.begin_fetch(false);
    let third = engine.begin_fetch(false);

    let mut newest = player(None, true);
    newest.stats.level = 13;

    assert_eq!(engine.apply_fetch(third, Ok(newest)), FetchApplied::Replaced);
    assert_eq!(engine.apply_fetch(first, Ok(player(None, true))), FetchApplied::Stale);
    assert_eq!(
        engine.apply_fetch(second, Err(FetchError::NotFound)),
        FetchApplied::Stale
    );

    assert_eq!(engine.snapshot().stats.level, 13);
    assert!(!engine.is_new_user());
}

// ============================================================================
// Actions
// ============================================================================

/// Check-in success: one local feed entry, then a re-fetch carries the truth
#[test]
fn test_check_in_then_refetch() {
    let mut engine = engine();
    let t1 = engine.begin_fetch(false);
    engine.apply_fetch(t1, Ok(player(None, true)));
    assert!(engine.can_check_in());

    assert!(engine.begin_action(ActionKind::CheckIn));
    assert!(!engine.can_check_in());
    let refetch = engine.complete_action(ActionKind::CheckIn, Ok("Checked in!".to_string()), at(0));
    assert!(refetch);

    let entries = engine.feed().to_vec();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content, "Check-in successful!");
    assert_eq!(entries[0].category, "chat");
    assert_eq!(entries[0].timestamp, at(0));

    // The snapshot only changes once the server says so
    assert_eq!(engine.snapshot().stats.total_check_ins, 41);
    let t2 = engine.begin_fetch(false);
    let mut after = player(Some(at(300)), false);
    after.stats.total_check_ins = 42;
    engine.apply_fetch(t2, Ok(after));
    assert_eq!(engine.snapshot().stats.total_check_ins, 42);
    assert_eq!(engine.deadline(), Some(at(300)));
}

/// Joining fails while closed, succeeds once a push opens the dungeon
#[test]
fn test_join_after_dungeon_push() {
    let mut engine = engine();
    let t1 = engine.begin_fetch(false);
    engine.apply_fetch(t1, Ok(player(None, true)));
    assert!(!engine.can_join_event());

    let event = parse_push(r#"{"type":"dungeonStatus","active":true}"#).unwrap();
    let PushEvent::DungeonStatus { active } = event else {
        panic!("expected dungeon status, got {:?}", event);
    };
    assert!(engine.apply_dungeon_status(active));
    assert!(engine.can_join_event());
    assert_eq!(engine.dungeon_line(), "Dungeon is open!");

    engine.begin_action(ActionKind::JoinEvent);
    let refetch = engine.complete_action(
        ActionKind::JoinEvent,
        Ok("Joined dungeon successfully!".to_string()),
        at(5),
    );
    assert!(refetch);
    assert_eq!(engine.feed().latest().unwrap().content, "Joined dungeon!");
    assert_eq!(
        engine.action_status(ActionKind::JoinEvent),
        &ActionStatus::Succeeded("Joined dungeon successfully!".to_string())
    );
}

// ============================================================================
// Countdown
// ============================================================================

/// 90 seconds: 1:30, 1:29, ..., then one refresh and ready
#[test]
fn test_ninety_second_countdown() {
    let mut engine = engine();
    let mut countdown = scheduler();
    let t1 = engine.begin_fetch(false);
    engine.apply_fetch(t1, Ok(player(Some(at(90)), false)));

    let snapshot = engine.snapshot();
    countdown.restart(engine.deadline(), at(0), &snapshot);
    assert_eq!(countdown.state().text(), "1:30");

    let mut texts = Vec::new();
    let mut refreshes = 0;
    for second in 1..=90 {
        match countdown.tick(at(second), &snapshot) {
            TickOutcome::RequestRefresh => refreshes += 1,
            TickOutcome::Idle => break,
            _ => {}
        }
        texts.push(countdown.state().text());
    }
    assert_eq!(texts[0], "1:29");
    assert_eq!(texts[88], "0:01");
    assert_eq!(texts[89], REFRESHING_TEXT);
    assert_eq!(refreshes, 1);

    // The refresh comes back still saying no: settle on ready, no second refresh
    let t2 = engine.begin_fetch(false);
    engine.apply_fetch(t2, Ok(player(Some(at(90)), false)));
    countdown.refresh_completed();
    let outcome = countdown.restart(engine.deadline(), at(91), &engine.snapshot());
    assert_eq!(outcome, TickOutcome::Settled);
    assert_eq!(countdown.state().text(), READY_TEXT);
}

/// Expired while a dungeon blocks check-ins
#[test]
fn test_expired_during_dungeon() {
    let mut engine = engine();
    let mut countdown = scheduler();
    let t1 = engine.begin_fetch(false);
    engine.apply_fetch(t1, Ok(player(Some(at(-5)), false)));
    engine.apply_dungeon_status(true);

    countdown.restart(engine.deadline(), at(0), &engine.snapshot());
    assert_eq!(countdown.state().phase, CountdownPhase::BlockedByEvent);
    assert_eq!(countdown.state().text(), BLOCKED_TEXT);
    assert_eq!(
        engine.check_in_hint(at(0)),
        Some("Check-ins disabled during dungeon")
    );
}

/// Server gives only the last check-in time: five minute fallback
#[test]
fn test_fallback_deadline() {
    let mut engine = engine();
    let t1 = engine.begin_fetch(false);
    let mut snapshot = player(None, false);
    snapshot.stats.last_check_in_time = Some(at(0));
    engine.apply_fetch(t1, Ok(snapshot));

    assert_eq!(engine.deadline(), Some(at(300)));
    let mut countdown = scheduler();
    countdown.restart(engine.deadline(), at(60), &engine.snapshot());
    assert_eq!(countdown.state().text(), "4:00");
}

// ============================================================================
// Feed
// ============================================================================

/// The feed stays bounded with local and server entries interleaved
#[test]
fn test_feed_bounded_across_sources() {
    let mut engine = engine();
    for i in 0..40 {
        engine.apply_messages(
            vec![ServerMessage {
                content: format!("server {}", i),
                category: "chat".to_string(),
            }],
            at(i),
        );
        engine.begin_action(ActionKind::CheckIn);
        engine.complete_action(ActionKind::CheckIn, Ok(String::new()), at(i));
    }

    assert_eq!(engine.feed().len(), FEED_CAPACITY);
    assert_eq!(engine.feed().latest().unwrap().content, "Check-in successful!");
    assert!(!engine.apply_messages(Vec::new(), at(100)));
}
