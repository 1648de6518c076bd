//! Remote state client for the EBS
//!
//! The [`EbsApi`] trait is the seam between the panel and the network; the
//! production implementation is [`HttpEbsClient`]. Every failure is turned
//! into a [`FetchError`] here, so the engine never sees a raw transport error.
//!
//! ## Endpoints
//!
//! ```text
//! GET  {base}/api/user/{userId}/data          -> {success, data?, error?}
//! POST {base}/api/user/{userId}/checkin       -> {success, message?, error?}
//! POST {base}/api/user/{userId}/dungeon/join  -> {success, message?, error?}
//! GET  {base}/api/user/{userId}/messages      -> {success, messages?}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::types::{BaseUrl, HostAuth, ServerMessage, UserSnapshot};

const DEFAULT_CHECK_IN_MESSAGE: &str = "Check-in successful!";
const DEFAULT_CHECK_IN_ERROR: &str = "Check-in failed";
const DEFAULT_JOIN_MESSAGE: &str = "Joined dungeon successfully!";
const DEFAULT_JOIN_ERROR: &str = "Could not join dungeon";
const DEFAULT_DATA_ERROR: &str = "Failed to load user data";

/// Operations the panel performs against the EBS.
#[async_trait]
pub trait EbsApi: Send + Sync {
    /// Fetch the full user snapshot
    async fn get_user_state(
        &self,
        base: &BaseUrl,
        auth: &HostAuth,
    ) -> Result<UserSnapshot, FetchError>;

    /// Check in; returns the server's confirmation message
    async fn check_in(&self, base: &BaseUrl, auth: &HostAuth) -> Result<String, FetchError>;

    /// Join the active dungeon; returns the server's confirmation message
    async fn join_event(&self, base: &BaseUrl, auth: &HostAuth) -> Result<String, FetchError>;

    /// Messages queued for the user since the last poll
    async fn list_new_messages(
        &self,
        base: &BaseUrl,
        auth: &HostAuth,
    ) -> Result<Vec<ServerMessage>, FetchError>;
}

/// Resolve an optional base URL, failing with `NotConfigured`.
pub fn require_base(base: Option<BaseUrl>) -> Result<BaseUrl, FetchError> {
    base.ok_or(FetchError::NotConfigured)
}

/// Map a non-success HTTP status to its error class.
///
/// 404 is the only "new user" signal; everything else is the backend being
/// unavailable.
pub fn classify_status(status: u16) -> Result<(), FetchError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(FetchError::NotFound),
        other => Err(FetchError::ServiceError(Some(other))),
    }
}

#[derive(Debug, Deserialize)]
struct DataResponse {
    #[serde(default)]
    success: bool,
    data: Option<UserSnapshot>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default)]
    success: bool,
    message: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    success: bool,
    messages: Option<Vec<ServerMessage>>,
}

/// A raw response: status and body bytes.
struct RawResponse {
    status: StatusCode,
    body: Vec<u8>,
}

/// HTTP implementation of [`EbsApi`] using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpEbsClient {
    http: reqwest::Client,
}

impl HttpEbsClient {
    /// Create a client with the given per-request timeout
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        auth: &HostAuth,
    ) -> Result<RawResponse, FetchError> {
        debug!(%method, %url, "EBS request");
        let response = self
            .http
            .request(method, &url)
            .bearer_auth(&auth.token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|err| {
                warn!(%url, %err, "EBS request failed");
                FetchError::ServiceError(err.status().map(|s| s.as_u16()))
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|err| {
            warn!(%url, %err, "Failed to read EBS response body");
            FetchError::ServiceError(Some(status.as_u16()))
        })?;

        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }

    /// Shared handling for the two POST actions.
    ///
    /// The body is inspected whatever the status, so a 4xx carrying
    /// `{success: false, error}` surfaces as a rejection with the server's
    /// message.
    async fn action(
        &self,
        url: String,
        auth: &HostAuth,
        default_message: &str,
        default_error: &str,
    ) -> Result<String, FetchError> {
        let raw = self.send(Method::POST, url, auth).await?;
        match serde_json::from_slice::<ActionResponse>(&raw.body) {
            Ok(reply) if reply.success && raw.status.is_success() => Ok(reply
                .message
                .unwrap_or_else(|| default_message.to_string())),
            Ok(reply) if !reply.success => Err(FetchError::Rejected(
                reply.error.unwrap_or_else(|| default_error.to_string()),
            )),
            _ => {
                classify_status(raw.status.as_u16())?;
                warn!(status = raw.status.as_u16(), "Undecodable action response");
                Err(FetchError::ServiceError(Some(raw.status.as_u16())))
            }
        }
    }
}

#[async_trait]
impl EbsApi for HttpEbsClient {
    async fn get_user_state(
        &self,
        base: &BaseUrl,
        auth: &HostAuth,
    ) -> Result<UserSnapshot, FetchError> {
        let url = base.user_endpoint(&auth.user_id, "data");
        let raw = self.send(Method::GET, url, auth).await?;
        classify_status(raw.status.as_u16())?;

        let reply: DataResponse = serde_json::from_slice(&raw.body).map_err(|err| {
            warn!(%err, "Undecodable user data response");
            FetchError::ServiceError(Some(raw.status.as_u16()))
        })?;

        match (reply.success, reply.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(FetchError::Rejected(
                reply.error.unwrap_or_else(|| DEFAULT_DATA_ERROR.to_string()),
            )),
        }
    }

    async fn check_in(&self, base: &BaseUrl, auth: &HostAuth) -> Result<String, FetchError> {
        let url = base.user_endpoint(&auth.user_id, "checkin");
        self.action(url, auth, DEFAULT_CHECK_IN_MESSAGE, DEFAULT_CHECK_IN_ERROR)
            .await
    }

    async fn join_event(&self, base: &BaseUrl, auth: &HostAuth) -> Result<String, FetchError> {
        let url = base.user_endpoint(&auth.user_id, "dungeon/join");
        self.action(url, auth, DEFAULT_JOIN_MESSAGE, DEFAULT_JOIN_ERROR)
            .await
    }

    async fn list_new_messages(
        &self,
        base: &BaseUrl,
        auth: &HostAuth,
    ) -> Result<Vec<ServerMessage>, FetchError> {
        let url = base.user_endpoint(&auth.user_id, "messages");
        let raw = self.send(Method::GET, url, auth).await?;
        classify_status(raw.status.as_u16())?;

        let reply: MessagesResponse = serde_json::from_slice(&raw.body)
            .map_err(|_| FetchError::ServiceError(Some(raw.status.as_u16())))?;

        if reply.success {
            Ok(reply.messages.unwrap_or_default())
        } else {
            Err(FetchError::Rejected("Message poll rejected".to_string()))
        }
    }
}
