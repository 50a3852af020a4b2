use std::collections::HashMap;
use std::error::Error as _;
use std::io;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://getpocket.com";

// The inbox view this client mirrors: unread, untagged, newest first,
// with full item detail so video/image metadata is present.
const STATE_FILTER: &str = "unread";
const TAG_FILTER: &str = "_untagged_";
const SORT_ORDER: &str = "newest";
const DETAIL_TYPE: &str = "complete";

#[derive(Debug, Error)]
pub enum LaterError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api error: {0}")]
    Server(String),
    #[error("undecodable api response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl LaterError {
    /// User-facing description of the failure. Transport problems map to
    /// distinct messages; protocol problems get a generic one.
    pub fn user_message(&self) -> String {
        match self {
            LaterError::Request(err) => describe_transport_error(err),
            LaterError::Url(_) => "Invalid URL".to_string(),
            LaterError::Server(_) => "Failed to load items".to_string(),
            LaterError::Decode(_) => "Failed to parse response.".to_string(),
        }
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return "Request timed out.".to_string();
    }
    match io_error_kind(err) {
        Some(
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe,
        ) => "Network connection was lost.".to_string(),
        Some(io::ErrorKind::NetworkUnreachable | io::ErrorKind::NetworkDown) => {
            "No internet connection.".to_string()
        }
        _ if err.is_connect() => "Server not found.".to_string(),
        _ => format!("Other network error: {err}."),
    }
}

fn io_error_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = cause.source();
    }
    None
}

#[derive(Clone)]
pub struct LaterClient {
    http: Client,
    base_url: Url,
    consumer_key: String,
    access_token: String,
}

impl LaterClient {
    pub fn new(
        consumer_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, LaterError> {
        Self::with_base_url(DEFAULT_BASE_URL, consumer_key, access_token)
    }

    pub fn with_base_url(
        base_url: &str,
        consumer_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, LaterError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            consumer_key: consumer_key.into(),
            access_token: access_token.into(),
        })
    }

    /// Fetches one page of the saved-item inbox.
    ///
    /// A non-success HTTP status on its own does not fail the call: the
    /// body is still parsed and decides the outcome. A non-empty server
    /// `error` field or an undecodable body does.
    pub async fn get_saved_items(
        &self,
        since: i64,
        count: u32,
        offset: u32,
    ) -> Result<SavedItemsPage, LaterError> {
        let url = self.endpoint("/v3/get")?;
        let body = SavedItemsRequest {
            consumer_key: &self.consumer_key,
            access_token: &self.access_token,
            state: STATE_FILTER,
            tag: TAG_FILTER,
            sort: SORT_ORDER,
            detail_type: DETAIL_TYPE,
            since,
            count,
            offset,
            total: "1",
        };
        let response = self.http.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "list endpoint returned non-success status");
        }
        let bytes = response.bytes().await?;
        let parsed: SavedItemsList = serde_json::from_slice(&bytes)?;
        if let Some(error) = parsed.error.filter(|message| !message.is_empty()) {
            tracing::error!(%error, "list endpoint reported an error");
            return Err(LaterError::Server(error));
        }
        let total = parsed
            .total
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);
        let items = parsed
            .list
            .map(|list| list.into_values().collect())
            .unwrap_or_default();
        Ok(SavedItemsPage { items, total })
    }

    /// Sends a single mutation against the send endpoint.
    ///
    /// Like the list endpoint, a non-success HTTP status does not abort
    /// the call; the caller inspects both the parsed action status and
    /// the HTTP status on the reply.
    pub async fn send_action(&self, action: &ItemAction) -> Result<SendReply, LaterError> {
        let actions = serde_json::to_string(&[action])?;
        let mut url = self.endpoint("/v3/send")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("actions", &actions);
            query.append_pair("access_token", &self.access_token);
            query.append_pair("consumer_key", &self.consumer_key);
        }
        let response = self.http.get(url).send().await?;
        let http_status = response.status();
        if !http_status.is_success() {
            tracing::warn!(status = %http_status, "send endpoint returned non-success status");
        }
        let bytes = response.bytes().await?;
        let parsed: SendActionResponse = serde_json::from_slice(&bytes)?;
        Ok(SendReply {
            status: parsed.status,
            action_results: parsed.action_results,
            http_status,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, LaterError> {
        Ok(self.base_url.join(path)?)
    }
}

/// One entry of the `actions` array understood by the send endpoint.
/// Item identities travel as decimal strings on this wire.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ItemAction {
    Archive { item_id: String },
    TagsAdd { item_id: String, tags: String },
}

impl ItemAction {
    pub fn archive(item_id: i64) -> Self {
        ItemAction::Archive {
            item_id: item_id.to_string(),
        }
    }

    pub fn tags_add(item_id: i64, tags: impl Into<String>) -> Self {
        ItemAction::TagsAdd {
            item_id: item_id.to_string(),
            tags: tags.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SavedItemsRequest<'a> {
    consumer_key: &'a str,
    access_token: &'a str,
    state: &'a str,
    tag: &'a str,
    sort: &'a str,
    detail_type: &'a str,
    since: i64,
    count: u32,
    offset: u32,
    total: &'a str,
}

#[derive(Debug, Deserialize)]
struct SavedItemsList {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    list: Option<HashMap<String, SavedItem>>,
    #[serde(default)]
    total: Option<String>,
}

/// One page of the saved-item inbox plus the server-reported total.
#[derive(Debug)]
pub struct SavedItemsPage {
    pub items: Vec<SavedItem>,
    pub total: u32,
}

/// Wire representation of one saved inbox entry. Identity, flags and
/// timestamps arrive as decimal strings; consumers parse them with a
/// zero fallback.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SavedItem {
    pub item_id: String,
    pub resolved_title: String,
    pub resolved_url: String,
    #[serde(default)]
    pub excerpt: String,
    pub favorite: String,
    pub is_article: String,
    pub has_video: String,
    #[serde(default)]
    pub lang: String,
    pub time_added: String,
    pub time_updated: String,
    #[serde(default)]
    pub time_to_read: i64,
    #[serde(default)]
    pub top_image_url: Option<String>,
    #[serde(default)]
    pub videos: Option<HashMap<String, VideoItem>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoItem {
    pub length: String,
    pub src: String,
}

#[derive(Debug, Deserialize)]
struct SendActionResponse {
    action_results: Vec<bool>,
    status: i64,
}

/// Outcome of a send-endpoint call: the parsed action status alongside
/// the HTTP status the server answered with.
#[derive(Debug, Clone)]
pub struct SendReply {
    pub status: i64,
    pub action_results: Vec<bool>,
    pub http_status: StatusCode,
}
