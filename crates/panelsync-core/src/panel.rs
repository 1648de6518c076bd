//! Panel lifecycle and the serializing update loop
//!
//! A [`Panel`] owns one background actor task. Every input - poll
//! completions, push payloads, countdown ticks, action outcomes, host
//! authorization and configuration changes - reaches the
//! [`ReconciliationEngine`] as a message on that task, so all state changes
//! happen on one logical timeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  PanelActor (single tokio task)                                 │
//! │  ├── cmd_rx: commands from PanelHandle + completed requests     │
//! │  ├── config_rx: watch on the EBS URL                            │
//! │  ├── refresh interval (60s)  ──► spawn get_user_state           │
//! │  ├── message interval (10s)  ──► spawn list_new_messages        │
//! │  ├── countdown tick (1s)     ──► CountdownScheduler::tick       │
//! │  │                                                              │
//! │  ├── ReconciliationEngine (snapshot, feed, action status)       │
//! │  ├── view_tx: watch::Sender<PanelView>    (pulled by renderers) │
//! │  └── event_tx: broadcast::Sender<PanelEvent>                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Network calls are always spawned; their results come back as messages
//! tagged with the fetch sequence number. The actor itself never awaits I/O,
//! so the countdown tick is never blocked.
//!
//! Spawned requests report back through a weak sender. Only handles keep the
//! command queue open, so the actor ends once the last [`PanelHandle`] is
//! dropped even without [`Panel::teardown`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::{require_base, EbsApi};
use crate::config::{ConfigResolver, PanelConfig};
use crate::countdown::{CountdownScheduler, TickOutcome};
use crate::engine::{ActionKind, ActionStatus, FetchApplied, FetchTicket, ReconciliationEngine};
use crate::error::{FetchError, PanelError, PanelResult};
use crate::events::PanelEvent;
use crate::push::{parse_push, PushEvent};
use crate::types::{BaseUrl, HostAuth, ServerMessage, UserSnapshot};
use crate::view::{Page, PanelView};

/// Wall clock for the countdown.
///
/// Anchored to a UTC instant once and advanced by tokio's monotonic clock,
/// so it follows paused/advanced time in tests.
#[derive(Debug, Clone, Copy)]
pub struct PanelClock {
    anchor_utc: DateTime<Utc>,
    anchor_instant: Instant,
}

impl PanelClock {
    /// Anchor at the current system time
    pub fn system() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Anchor at `utc`
    pub fn starting_at(utc: DateTime<Utc>) -> Self {
        Self {
            anchor_utc: utc,
            anchor_instant: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor_instant);
        let elapsed =
            chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_utc + elapsed
    }
}

/// Messages processed by the actor
enum PanelCommand {
    Authorize(HostAuth),
    Refresh,
    ShowPage(Page),
    Push(String),
    Action {
        kind: ActionKind,
        reply: oneshot::Sender<ActionStatus>,
    },
    FetchCompleted {
        ticket: FetchTicket,
        result: Result<UserSnapshot, FetchError>,
        /// Issued by the countdown at expiry
        from_countdown: bool,
    },
    MessagesFetched(Result<Vec<ServerMessage>, FetchError>),
    ActionCompleted {
        kind: ActionKind,
        result: Result<String, FetchError>,
        reply: oneshot::Sender<ActionStatus>,
    },
}

/// Cloneable handle used by the host and presentation layer.
#[derive(Clone)]
pub struct PanelHandle {
    cmd_tx: mpsc::UnboundedSender<PanelCommand>,
    view_rx: watch::Receiver<PanelView>,
    event_tx: broadcast::Sender<PanelEvent>,
    resolver: ConfigResolver,
}

impl PanelHandle {
    fn send(&self, cmd: PanelCommand) -> PanelResult<()> {
        self.cmd_tx.send(cmd).map_err(|_| PanelError::Closed)
    }

    /// Host authorization callback: supplies user id and bearer token.
    pub fn authorize(&self, auth: HostAuth) -> PanelResult<()> {
        self.send(PanelCommand::Authorize(auth))
    }

    /// Host configuration accessor: delivers the broadcaster config document.
    ///
    /// Returns `true` if the resolved EBS URL changed.
    pub fn configure(&self, document: Option<&str>) -> bool {
        self.resolver.deliver(document)
    }

    /// Manual refresh; re-enters `Loading`
    pub fn refresh(&self) -> PanelResult<()> {
        self.send(PanelCommand::Refresh)
    }

    /// Switch the visible page
    pub fn show_page(&self, page: Page) -> PanelResult<()> {
        self.send(PanelCommand::ShowPage(page))
    }

    /// Deliver a raw broadcast payload from the push channel
    pub fn push(&self, raw: impl Into<String>) -> PanelResult<()> {
        self.send(PanelCommand::Push(raw.into()))
    }

    async fn action(&self, kind: ActionKind) -> PanelResult<ActionStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(PanelCommand::Action { kind, reply })?;
        rx.await.map_err(|_| PanelError::Closed)
    }

    /// Check in. Resolves to the action's final inline status.
    pub async fn check_in(&self) -> PanelResult<ActionStatus> {
        self.action(ActionKind::CheckIn).await
    }

    /// Join the active dungeon. Resolves to the action's final inline status.
    pub async fn join_event(&self) -> PanelResult<ActionStatus> {
        self.action(ActionKind::JoinEvent).await
    }

    /// The most recently published view
    pub fn view(&self) -> PanelView {
        self.view_rx.borrow().clone()
    }

    /// Watch for new views
    pub fn subscribe_view(&self) -> watch::Receiver<PanelView> {
        self.view_rx.clone()
    }

    /// Subscribe to panel events
    pub fn subscribe_events(&self) -> broadcast::Receiver<PanelEvent> {
        self.event_tx.subscribe()
    }

    /// Whether the panel is still running
    pub fn is_open(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// A running panel. Dropping it without [`Panel::teardown`] leaves the actor
/// running until the last handle is dropped.
pub struct Panel {
    actor: JoinHandle<()>,
    handle: PanelHandle,
}

impl Panel {
    /// Start a panel on the current tokio runtime.
    pub fn create(api: Arc<dyn EbsApi>, resolver: ConfigResolver, config: PanelConfig) -> Self {
        Self::create_with_clock(api, resolver, config, PanelClock::system())
    }

    /// Start a panel with an explicit clock anchor.
    pub fn create_with_clock(
        api: Arc<dyn EbsApi>,
        resolver: ConfigResolver,
        config: PanelConfig,
        clock: PanelClock,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(PanelView::initial());
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        let actor = PanelActor {
            api,
            engine: ReconciliationEngine::new(config.fallback_cooldown),
            countdown: CountdownScheduler::new(config.refresh_grace),
            config_rx: resolver.subscribe(),
            resolver: resolver.clone(),
            config,
            clock,
            auth: None,
            config_seen: false,
            polling: false,
            page: Page::default(),
            countdown_restarted: false,
            polling_started: false,
            cmd_tx: cmd_tx.downgrade(),
            view_tx,
            event_tx: event_tx.clone(),
        };

        info!("Creating panel");
        let actor = tokio::spawn(actor.run(cmd_rx));

        Self {
            actor,
            handle: PanelHandle {
                cmd_tx,
                view_rx,
                event_tx,
                resolver,
            },
        }
    }

    /// A new handle to this panel
    pub fn handle(&self) -> PanelHandle {
        self.handle.clone()
    }

    /// Stop the actor and all periodic activities.
    ///
    /// Requests already in flight finish on their own; their results are
    /// discarded because nothing is listening any more.
    pub async fn teardown(self) {
        info!("Tearing down panel");
        self.actor.abort();
        let _ = self.actor.await;
    }
}

struct PanelActor {
    api: Arc<dyn EbsApi>,
    engine: ReconciliationEngine,
    countdown: CountdownScheduler,
    resolver: ConfigResolver,
    config_rx: watch::Receiver<Option<BaseUrl>>,
    config: PanelConfig,
    clock: PanelClock,
    auth: Option<HostAuth>,
    /// The EBS URL has been seen at least once
    config_seen: bool,
    polling: bool,
    page: Page,
    /// Set when the countdown was recreated; the tick interval is re-phased
    countdown_restarted: bool,
    /// Set when polling starts; the poll intervals are re-phased
    polling_started: bool,
    cmd_tx: mpsc::WeakUnboundedSender<PanelCommand>,
    view_tx: watch::Sender<PanelView>,
    event_tx: broadcast::Sender<PanelEvent>,
}

/// Report a finished request, unless every handle is gone.
fn report(tx: &mpsc::WeakUnboundedSender<PanelCommand>, cmd: PanelCommand) {
    if let Some(tx) = tx.upgrade() {
        let _ = tx.send(cmd);
    }
}

fn periodic(period: std::time::Duration, behavior: MissedTickBehavior) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(behavior);
    interval
}

impl PanelActor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<PanelCommand>) {
        let mut refresh = periodic(self.config.refresh_interval, MissedTickBehavior::Delay);
        let mut messages = periodic(self.config.message_poll_interval, MissedTickBehavior::Delay);
        let mut tick = periodic(self.config.tick_interval, MissedTickBehavior::Delay);

        self.config_seen = self.config_rx.borrow_and_update().is_some();
        debug!(configured = self.config_seen, "Panel actor started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                changed = self.config_rx.changed() => {
                    if changed.is_ok() {
                        self.on_config_changed();
                    }
                }
                _ = refresh.tick(), if self.polling => {
                    debug!("Periodic refresh");
                    self.issue_fetch(false, false);
                }
                _ = messages.tick(), if self.polling => self.poll_messages(),
                _ = tick.tick(), if self.countdown.is_running() => self.on_tick(),
            }

            if std::mem::take(&mut self.countdown_restarted) {
                tick.reset();
            }
            if std::mem::take(&mut self.polling_started) {
                refresh.reset();
                messages.reset();
            }
        }

        debug!("Panel actor ended");
    }

    fn handle(&mut self, cmd: PanelCommand) {
        match cmd {
            PanelCommand::Authorize(auth) => self.on_authorize(auth),
            PanelCommand::Refresh => self.issue_fetch(true, false),
            PanelCommand::ShowPage(page) => {
                self.page = page;
                self.publish();
            }
            PanelCommand::Push(raw) => self.on_push(&raw),
            PanelCommand::Action { kind, reply } => self.start_action(kind, reply),
            PanelCommand::FetchCompleted {
                ticket,
                result,
                from_countdown,
            } => self.on_fetch_completed(ticket, result, from_countdown),
            PanelCommand::MessagesFetched(result) => self.on_messages(result),
            PanelCommand::ActionCompleted {
                kind,
                result,
                reply,
            } => self.on_action_completed(kind, result, reply),
        }
    }

    fn emit(&self, event: PanelEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish(&self) {
        self.view_tx.send_replace(PanelView::capture(
            &self.engine,
            self.countdown.state(),
            self.page,
        ));
    }

    fn on_authorize(&mut self, auth: HostAuth) {
        let first = self.auth.is_none();
        info!(user_id = %auth.user_id, first, "Panel authorized");
        self.auth = Some(auth);
        if first {
            self.initialize("authorized");
        }
    }

    fn on_config_changed(&mut self) {
        let configured = self.config_rx.borrow_and_update().is_some();
        if configured && !self.config_seen {
            self.config_seen = true;
            if self.auth.is_some() {
                self.initialize("configuration became available");
            }
        }
    }

    /// Load state and start the polls (once).
    fn initialize(&mut self, reason: &str) {
        info!(reason, "Initializing panel");
        self.issue_fetch(true, false);
        if !self.polling {
            self.polling = true;
            self.polling_started = true;
        }
    }

    fn issue_fetch(&mut self, manual: bool, from_countdown: bool) {
        let Some(auth) = self.auth.clone() else {
            debug!("Fetch skipped: not authorized yet");
            if from_countdown {
                self.countdown.refresh_completed();
            }
            return;
        };

        let ticket = self.engine.begin_fetch(manual);
        if manual {
            self.publish();
        }

        let base = self.resolver.resolve();
        let api = self.api.clone();
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let result = match require_base(base) {
                Ok(base) => api.get_user_state(&base, &auth).await,
                Err(err) => Err(err),
            };
            report(
                &tx,
                PanelCommand::FetchCompleted {
                    ticket,
                    result,
                    from_countdown,
                },
            );
        });
    }

    fn on_fetch_completed(
        &mut self,
        ticket: FetchTicket,
        result: Result<UserSnapshot, FetchError>,
        from_countdown: bool,
    ) {
        if from_countdown {
            self.countdown.refresh_completed();
        }

        let before = self.engine.display();
        let applied = self.engine.apply_fetch(ticket, result);

        match applied {
            FetchApplied::Replaced => {
                self.restart_countdown();
                self.emit(PanelEvent::SnapshotReplaced { seq: ticket.0 });
                self.emit(PanelEvent::Rerender { page: self.page });
            }
            // The countdown's own refresh failed or was overtaken; settle it
            // against the current snapshot
            FetchApplied::StateOnly | FetchApplied::Stale if from_countdown => {
                self.restart_countdown();
            }
            FetchApplied::StateOnly | FetchApplied::Stale => {}
        }

        let display = self.engine.display();
        if display != before {
            self.emit(PanelEvent::DisplayChanged { display });
        }
        if applied != FetchApplied::Stale || from_countdown {
            self.publish();
        }
    }

    fn restart_countdown(&mut self) {
        let snapshot = self.engine.snapshot();
        let outcome = self
            .countdown
            .restart(self.engine.deadline(), self.clock.now(), &snapshot);
        self.countdown_restarted = true;
        if outcome == TickOutcome::RequestRefresh {
            info!("Countdown already expired, refreshing status");
            self.issue_fetch(false, true);
        }
    }

    fn on_tick(&mut self) {
        let snapshot = self.engine.snapshot();
        match self.countdown.tick(self.clock.now(), &snapshot) {
            TickOutcome::Idle => return,
            TickOutcome::RequestRefresh => {
                info!("Countdown finished, refreshing status");
                self.issue_fetch(false, true);
            }
            TickOutcome::Counting | TickOutcome::Settled => {}
        }
        self.publish();
    }

    fn on_push(&mut self, raw: &str) {
        match parse_push(raw) {
            Ok(event) if !event.is_actionable() => {
                debug!(?event, "Ignoring push event");
            }
            Ok(PushEvent::DungeonStatus { active }) => {
                let changed = self.engine.apply_dungeon_status(active);
                if changed && !self.countdown.is_running() {
                    // A settled countdown depends on the dungeon flag
                    self.restart_countdown();
                }
                self.publish();
                if changed && self.page.depends_on_dungeon() {
                    self.emit(PanelEvent::Rerender { page: self.page });
                }
            }
            Ok(PushEvent::Ignored { .. }) => {}
            Err(err) => {
                warn!(%err, "Dropping push payload");
                self.emit(PanelEvent::PushDropped {
                    reason: err.to_string(),
                });
            }
        }
    }

    fn poll_messages(&mut self) {
        let (Some(base), Some(auth)) = (self.resolver.resolve(), self.auth.clone()) else {
            return;
        };
        let api = self.api.clone();
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let result = api.list_new_messages(&base, &auth).await;
            report(&tx, PanelCommand::MessagesFetched(result));
        });
    }

    fn on_messages(&mut self, result: Result<Vec<ServerMessage>, FetchError>) {
        match result {
            Ok(messages) => {
                if self.engine.apply_messages(messages, self.clock.now()) {
                    self.publish();
                    if self.page.depends_on_feed() {
                        self.emit(PanelEvent::Rerender { page: self.page });
                    }
                }
            }
            Err(err) => debug!(%err, "Message poll failed"),
        }
    }

    fn start_action(&mut self, kind: ActionKind, reply: oneshot::Sender<ActionStatus>) {
        if !self.engine.begin_action(kind) {
            debug!(?kind, "Action already in progress");
            let _ = reply.send(self.engine.action_status(kind).clone());
            return;
        }
        self.publish();

        let base = self.resolver.resolve();
        let auth = self.auth.clone();
        let api = self.api.clone();
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let result = match (require_base(base), auth) {
                (Ok(base), Some(auth)) => match kind {
                    ActionKind::CheckIn => api.check_in(&base, &auth).await,
                    ActionKind::JoinEvent => api.join_event(&base, &auth).await,
                },
                _ => Err(FetchError::NotConfigured),
            };
            report(
                &tx,
                PanelCommand::ActionCompleted {
                    kind,
                    result,
                    reply,
                },
            );
        });
    }

    fn on_action_completed(
        &mut self,
        kind: ActionKind,
        result: Result<String, FetchError>,
        reply: oneshot::Sender<ActionStatus>,
    ) {
        let refetch = self.engine.complete_action(kind, result, self.clock.now());
        if refetch {
            self.issue_fetch(false, false);
        }

        let status = self.engine.action_status(kind).clone();
        self.publish();
        self.emit(PanelEvent::ActionFinished {
            kind,
            status: status.clone(),
        });
        if matches!(self.page, Page::Actions | Page::Messages) {
            self.emit(PanelEvent::Rerender { page: self.page });
        }
        let _ = reply.send(status);
    }
}
