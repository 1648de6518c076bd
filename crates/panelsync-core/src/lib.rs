//! PanelSync Core Library
//!
//! Client-side state engine for a stream-overlay extension panel.
//!
//! ## Overview
//!
//! A viewer's panel keeps a local copy of their game state (level, stats,
//! tokens, inventory, faction, check-in cooldown) in sync with an Extension
//! Backend Service (EBS). Three sources feed that copy:
//!
//! - **Polling**: full state every 60s, new messages every 10s
//! - **Push**: broadcast payloads such as `dungeonStatus`
//! - **Actions**: check-in and join-dungeon requests issued by the viewer
//!
//! All of them are reconciled on one task, so an older response can never
//! overwrite newer state and the countdown always reflects the latest
//! snapshot.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use panelsync_core::{ConfigResolver, HostAuth, HttpEbsClient, Panel, PanelConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PanelConfig::default();
//!     let api = Arc::new(HttpEbsClient::new(config.request_timeout)?);
//!     let resolver = ConfigResolver::with_document(r#"{"ebsUrl":"https://ebs.example.com"}"#);
//!
//!     let panel = Panel::create(api, resolver, config);
//!     let handle = panel.handle();
//!     handle.authorize(HostAuth::new("12345", "jwt"))?;
//!
//!     let mut views = handle.subscribe_view();
//!     while views.changed().await.is_ok() {
//!         println!("{}", views.borrow().timer_text());
//!     }
//!
//!     panel.teardown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod countdown;
pub mod engine;
pub mod error;
pub mod events;
pub mod feed;
pub mod panel;
pub mod push;
pub mod types;
pub mod view;

// Re-exports
pub use client::{EbsApi, HttpEbsClient};
pub use config::{parse_base_url, ConfigResolver, PanelConfig};
pub use countdown::{CountdownPhase, CountdownScheduler, CountdownState, TickOutcome};
pub use engine::{
    ActionKind, ActionStatus, DisplayState, FetchApplied, FetchTicket, ReconciliationEngine,
};
pub use error::{FetchError, PanelError, PanelResult, PushError};
pub use events::PanelEvent;
pub use feed::{FeedOrigin, MessageFeed, MessageFeedEntry, FEED_CAPACITY};
pub use panel::{Panel, PanelClock, PanelHandle};
pub use push::{parse_push, ClickBroadcast, PushEvent};
pub use types::*;
pub use view::{Page, PanelView};
