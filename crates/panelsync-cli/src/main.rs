//! PanelSync CLI
//!
//! Headless terminal stand-in for the extension host and presentation layer.
//! The host boundary maps onto flags: `--user-id`/`--token` play the
//! authorization callback and `--config` the broadcaster configuration.
//!
//! ## Usage
//!
//! ```bash
//! export PANELSYNC_USER_ID=12345
//! export PANELSYNC_TOKEN=eyJ...
//! export PANELSYNC_CONFIG='{"ebsUrl":"https://ebs.example.com"}'
//!
//! # Load once and print a page
//! panelsync status --page inventory
//!
//! # Check in / join the active dungeon
//! panelsync checkin
//! panelsync join
//!
//! # Run until Ctrl+C; stdin lines are push payloads or commands
//! panelsync watch
//!
//! # Tooling
//! panelsync config
//! panelsync route '{"type":"dungeonStatus","active":true}'
//! panelsync click 0.25 0.75
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast::error::RecvError;

use panelsync_core::{
    parse_base_url, parse_push, ActionStatus, ClickBroadcast, ConfigResolver, DisplayState,
    EbsApi, HostAuth, HttpEbsClient, MessageFeed, Page, Panel, PanelConfig, PanelEvent,
    PanelHandle, PanelView, PushEvent,
};

/// Extra time on top of the request timeout before giving up on a load
const LOAD_SLACK: Duration = Duration::from_secs(5);

const NOT_SET_UP_TEXT: &str = "Not set up: the broadcaster has not configured the extension yet.";
const NOT_CHECKED_IN_TEXT: &str = "Not currently checked in";

/// PanelSync - terminal panel for the stream extension backend
#[derive(Parser)]
#[command(name = "panelsync")]
#[command(version)]
#[command(about = "PanelSync - terminal panel for the stream extension backend")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Viewer id used in EBS endpoint paths
    #[arg(long, env = "PANELSYNC_USER_ID", global = true)]
    user_id: Option<String>,

    /// Bearer token sent with every EBS request
    #[arg(long, env = "PANELSYNC_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Broadcaster configuration document, e.g. '{"ebsUrl":"https://..."}'
    #[arg(long, env = "PANELSYNC_CONFIG", global = true)]
    config: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 15, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the panel once and print a page
    Status {
        /// Page to print (overview, actions, messages, tokens, inventory, status)
        #[arg(short, long, default_value = "overview")]
        page: Page,

        /// Print the whole view as JSON instead
        #[arg(long)]
        json: bool,
    },

    /// Check in
    Checkin,

    /// Join the active dungeon
    Join,

    /// Fetch and print new messages
    Messages,

    /// Run the panel until Ctrl+C
    ///
    /// Each stdin line is either a push payload (JSON) or one of:
    /// refresh, checkin, join, page <name>.
    Watch {
        /// Page to show
        #[arg(short, long, default_value = "overview")]
        page: Page,
    },

    /// Show the EBS URL resolved from the configuration document
    Config,

    /// Validate a push payload and show how it would be routed
    Route {
        /// Raw broadcast payload
        payload: String,
    },

    /// Print a click broadcast payload for the overlay channel
    Click {
        /// Horizontal position, 0.0 to 1.0
        x: f64,
        /// Vertical position, 0.0 to 1.0
        y: f64,
        /// Broadcaster channel id
        #[arg(long)]
        broadcaster_id: Option<String>,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn host_auth(cli: &Cli) -> Result<HostAuth> {
    let user_id = cli
        .user_id
        .clone()
        .context("missing --user-id (or PANELSYNC_USER_ID)")?;
    let token = cli
        .token
        .clone()
        .context("missing --token (or PANELSYNC_TOKEN)")?;
    Ok(HostAuth::new(user_id, token))
}

fn panel_config(cli: &Cli) -> PanelConfig {
    PanelConfig {
        request_timeout: Duration::from_secs(cli.timeout),
        ..PanelConfig::default()
    }
}

/// Create the panel and hand it the host inputs
fn start_panel(cli: &Cli) -> Result<Panel> {
    let auth = host_auth(cli)?;
    let config = panel_config(cli);
    let api = Arc::new(HttpEbsClient::new(config.request_timeout)?);

    let resolver = ConfigResolver::new();
    resolver.deliver(cli.config.as_deref());
    tracing::info!(
        user_id = %auth.user_id,
        configured = resolver.is_configured(),
        "Starting panel"
    );

    let panel = Panel::create(api, resolver, config);
    panel.handle().authorize(auth)?;
    Ok(panel)
}

/// Wait until the first load has settled
async fn wait_loaded(handle: &PanelHandle, timeout: Duration) -> Result<PanelView> {
    let mut views = handle.subscribe_view();
    let view = tokio::time::timeout(
        timeout,
        views.wait_for(|view| view.display != DisplayState::Loading),
    )
    .await
    .context("timed out waiting for the EBS")?
    .context("panel stopped unexpectedly")?
    .clone();
    Ok(view)
}

// ============================================================================
// Rendering
// ============================================================================

/// Render the current page of `view` as terminal text
fn render(view: &PanelView, now: DateTime<Utc>) -> String {
    let mut lines = Vec::new();

    match view.display {
        DisplayState::Loading => return "Loading...".to_string(),
        DisplayState::NotConfigured => return NOT_SET_UP_TEXT.to_string(),
        DisplayState::Offline => {
            lines.push("Offline: could not reach the server, showing last known state.".to_string())
        }
        DisplayState::Content | DisplayState::NewUser => {}
    }

    let snapshot = &view.snapshot;
    lines.push(format!("== {} ==", view.page));

    match view.page {
        Page::Overview => {
            let name = snapshot.user_name.as_deref().unwrap_or("New adventurer");
            let stats = &snapshot.stats;
            lines.push(name.to_string());
            lines.push(format!("Level {}  XP {}", stats.level, stats.experience));
            lines.push(format!("Attack {}  Defense {}", stats.attack, stats.defense));
            lines.push(format!(
                "Check-ins: {} total, {} this session",
                stats.total_check_ins, stats.session_check_ins
            ));
            lines.push(format!(
                "Prestige: rank {}, tier {}",
                stats.prestige_rank, stats.prestige_tier
            ));
            lines.push(format!("Clips made: {}", stats.clips_made));
            lines.push(snapshot.faction.loyalty_line());
            if snapshot.faction.is_default_only() {
                lines.push(format!("  {}", NOT_CHECKED_IN_TEXT));
            }
            lines.push(format!("Timer: {}", view.timer_text()));
        }
        Page::Actions => {
            let availability = if view.can_check_in { "available" } else { "unavailable" };
            lines.push(format!("Check in: {}", availability));
            if let Some(hint) = snapshot.check_in_hint(now) {
                lines.push(format!("  {}", hint));
            }
            if let Some(message) = view.check_in.message() {
                lines.push(format!("  {}", message));
            }

            lines.push(format!("Dungeon: {}", snapshot.dungeon_line()));
            let availability = if view.can_join_event { "available" } else { "unavailable" };
            lines.push(format!("Join: {}", availability));
            if let Some(message) = view.join_event.message() {
                lines.push(format!("  {}", message));
            }
        }
        Page::Messages => {
            if view.feed.is_empty() {
                lines.push("No messages yet".to_string());
            }
            for entry in &view.feed {
                lines.push(format!(
                    "[{}] {}: {}",
                    entry.timestamp.format("%H:%M:%S"),
                    entry.category,
                    entry.content
                ));
            }
        }
        Page::Tokens => {
            if snapshot.tokens.is_empty() {
                lines.push("No tokens yet".to_string());
            }
            for token in &snapshot.tokens {
                lines.push(format!("  {} x{}", token.name, token.count));
            }
        }
        Page::Inventory => {
            if snapshot.inventory.is_empty() {
                lines.push("Inventory is empty".to_string());
            }
            for item in &snapshot.inventory {
                let unique = if item.is_unique { " (unique)" } else { "" };
                let mut line = format!("  {} x{}{}", item.name, item.count, unique);
                if !item.description.is_empty() {
                    line.push_str(&format!(" - {}", item.description));
                }
                lines.push(line);
            }
        }
        Page::Status => {
            if snapshot.effects.is_empty() {
                lines.push("No active effects".to_string());
            }
            for effect in &snapshot.effects {
                lines.push(format!("  {} x{}", effect.name, effect.count));
            }
        }
    }

    lines.join("\n")
}

fn print_action_outcome(status: ActionStatus) -> Result<()> {
    match status {
        ActionStatus::Succeeded(message) => {
            println!("{}", message);
            Ok(())
        }
        ActionStatus::Rejected(message) | ActionStatus::Failed(message) => bail!(message),
        ActionStatus::Idle | ActionStatus::Pending => bail!("action did not complete"),
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run_action(cli: &Cli, join: bool) -> Result<()> {
    let panel = start_panel(cli)?;
    let handle = panel.handle();
    let view = wait_loaded(&handle, Duration::from_secs(cli.timeout) + LOAD_SLACK).await?;

    if view.display == DisplayState::NotConfigured {
        panel.teardown().await;
        bail!(NOT_SET_UP_TEXT);
    }

    let status = if join {
        handle.join_event().await?
    } else {
        handle.check_in().await?
    };
    panel.teardown().await;
    print_action_outcome(status)
}

async fn handle_input(handle: &PanelHandle, line: &str) -> Result<()> {
    if line.is_empty() {
        return Ok(());
    }
    if line.starts_with('{') {
        handle.push(line)?;
        return Ok(());
    }

    match line.split_once(' ').unwrap_or((line, "")) {
        ("refresh", _) => handle.refresh()?,
        ("checkin", _) => {
            let handle = handle.clone();
            tokio::spawn(async move { handle.check_in().await });
        }
        ("join", _) => {
            let handle = handle.clone();
            tokio::spawn(async move { handle.join_event().await });
        }
        ("page", name) => match name.parse::<Page>() {
            Ok(page) => {
                handle.show_page(page)?;
                // Let the actor publish the page switch before rendering
                tokio::task::yield_now().await;
                println!("{}", render(&handle.view(), Utc::now()));
            }
            Err(err) => eprintln!("{}", err),
        },
        (other, _) => eprintln!("Unknown command '{}'", other),
    }
    Ok(())
}

async fn watch(cli: &Cli, page: Page) -> Result<()> {
    let panel = start_panel(cli)?;
    let handle = panel.handle();
    handle.show_page(page)?;

    let mut events = handle.subscribe_events();
    let mut views = handle.subscribe_view();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_timer = String::new();

    println!("Panel is running. Press Ctrl+C to stop.");
    println!("Type a push payload (JSON) or: refresh, checkin, join, page <name>");
    println!();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Received shutdown signal...");
                break;
            }
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) => handle_input(&handle, line.trim()).await?,
                None => stdin_open = false,
            },
            event = events.recv() => match event {
                Ok(PanelEvent::Rerender { .. }) | Ok(PanelEvent::ActionFinished { .. }) => {
                    println!("{}", render(&handle.view(), Utc::now()));
                }
                Ok(PanelEvent::DisplayChanged { display }) if !display.shows_content() => {
                    println!("{}", render(&handle.view(), Utc::now()));
                }
                Ok(PanelEvent::PushDropped { reason }) => eprintln!("{}", reason),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                if view.display.shows_content() && view.page == Page::Overview {
                    let timer = view.timer_text();
                    if timer != last_timer {
                        println!("Timer: {}", timer);
                        last_timer = timer;
                    }
                }
            }
        }
    }

    println!("Shutting down...");
    panel.teardown().await;
    Ok(())
}

async fn messages(cli: &Cli) -> Result<()> {
    let auth = host_auth(cli)?;
    let Some(base) = cli.config.as_deref().and_then(parse_base_url) else {
        bail!(NOT_SET_UP_TEXT);
    };

    let client = HttpEbsClient::new(Duration::from_secs(cli.timeout))?;
    let batch = client.list_new_messages(&base, &auth).await?;

    let mut feed = MessageFeed::new();
    feed.append_server_batch(batch, Utc::now());
    let view = PanelView {
        display: DisplayState::Content,
        feed: feed.to_vec(),
        page: Page::Messages,
        ..PanelView::initial()
    };
    println!("{}", render(&view, Utc::now()));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match &cli.command {
        Commands::Status { page, json } => {
            let panel = start_panel(&cli)?;
            let handle = panel.handle();
            handle.show_page(*page)?;
            let mut view =
                wait_loaded(&handle, Duration::from_secs(cli.timeout) + LOAD_SLACK).await?;
            panel.teardown().await;
            view.page = *page;

            if *json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                println!("{}", render(&view, Utc::now()));
            }
        }

        Commands::Checkin => run_action(&cli, false).await?,

        Commands::Join => run_action(&cli, true).await?,

        Commands::Messages => messages(&cli).await?,

        Commands::Watch { page } => watch(&cli, *page).await?,

        Commands::Config => match cli.config.as_deref().and_then(parse_base_url) {
            Some(url) => println!("EBS URL: {}", url),
            None => println!("EBS URL: not configured"),
        },

        Commands::Route { payload } => match parse_push(payload)? {
            PushEvent::DungeonStatus { active } => {
                println!("dungeonStatus: active={}", active);
            }
            PushEvent::Ignored { kind } => println!("ignored: {}", kind),
        },

        Commands::Click {
            x,
            y,
            broadcaster_id,
        } => {
            if !(0.0..=1.0).contains(x) || !(0.0..=1.0).contains(y) {
                bail!("coordinates must be between 0.0 and 1.0");
            }
            let click = ClickBroadcast::new(
                *x,
                *y,
                Utc::now().timestamp_millis(),
                broadcaster_id.clone(),
            );
            println!("{}", serde_json::to_string(&click)?);
        }
    }

    Ok(())
}
