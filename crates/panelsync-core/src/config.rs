//! Configuration for the panel
//!
//! Two kinds of configuration live here:
//!
//! - [`ConfigResolver`]: the EBS base URL, extracted from the broadcaster's
//!   configuration document. The host may deliver that document late or
//!   change it at any time; consumers observe it through a `watch` channel.
//! - [`PanelConfig`]: timing constants of the engine itself.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::types::BaseUrl;

/// Full state refresh period
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// New message poll period
pub const MESSAGE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Countdown tick period
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How long after expiry a still-blocked countdown may ask for one refresh
pub const REFRESH_GRACE: Duration = Duration::from_secs(10);

/// Cooldown assumed when the server gives only the last check-in time
pub const FALLBACK_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Per-request timeout for EBS calls
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default capacity for the panel event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Key of the EBS URL inside the broadcaster configuration document
const EBS_URL_KEY: &str = "ebsUrl";

/// Timing configuration for a panel.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub refresh_interval: Duration,
    pub message_poll_interval: Duration,
    pub tick_interval: Duration,
    pub refresh_grace: Duration,
    pub fallback_cooldown: Duration,
    pub request_timeout: Duration,
    pub event_channel_capacity: usize,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            refresh_interval: REFRESH_INTERVAL,
            message_poll_interval: MESSAGE_POLL_INTERVAL,
            tick_interval: TICK_INTERVAL,
            refresh_grace: REFRESH_GRACE,
            fallback_cooldown: FALLBACK_COOLDOWN,
            request_timeout: REQUEST_TIMEOUT,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Extract the EBS base URL from a broadcaster configuration document.
///
/// The document's shape is owned by the host, so anything unexpected
/// (malformed JSON, a non-object, a missing or non-string key, a blank
/// value) yields `None`.
pub fn parse_base_url(document: &str) -> Option<BaseUrl> {
    let value: serde_json::Value = match serde_json::from_str(document) {
        Ok(value) => value,
        Err(err) => {
            debug!(%err, "Could not parse broadcaster config");
            return None;
        }
    };

    value
        .get(EBS_URL_KEY)
        .and_then(|url| url.as_str())
        .and_then(BaseUrl::new)
}

/// Observable holder for the EBS base URL.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct ConfigResolver {
    tx: watch::Sender<Option<BaseUrl>>,
}

impl ConfigResolver {
    /// Create an unconfigured resolver
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Create a resolver already holding `document`
    pub fn with_document(document: &str) -> Self {
        let resolver = Self::new();
        resolver.deliver(Some(document));
        resolver
    }

    /// Deliver a (possibly absent) configuration document from the host.
    ///
    /// Subscribers are only notified when the resolved URL actually changes,
    /// so repeated deliveries of the same content are silent.
    ///
    /// Returns `true` if the resolved value changed.
    pub fn deliver(&self, document: Option<&str>) -> bool {
        let resolved = document.and_then(parse_base_url);
        let changed = self.tx.send_if_modified(|current| {
            if *current == resolved {
                false
            } else {
                *current = resolved.clone();
                true
            }
        });

        if changed {
            match &resolved {
                Some(url) => info!(%url, "EBS URL configured"),
                None => info!("EBS URL cleared"),
            }
        }
        changed
    }

    /// The current base URL, if configured
    pub fn resolve(&self) -> Option<BaseUrl> {
        self.tx.borrow().clone()
    }

    /// Whether a base URL is available
    pub fn is_configured(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> watch::Receiver<Option<BaseUrl>> {
        self.tx.subscribe()
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}
