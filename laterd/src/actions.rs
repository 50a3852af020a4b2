use std::collections::HashSet;

use later_core::{ItemAction, LaterClient, LaterError, SendReply};
use thiserror::Error;
use tracing::{error, info};

use crate::messages;
use crate::sync::store::{StoreError, StoreHandle};

#[derive(Debug, Error)]
pub enum ActionError {
    /// The remote service did not accept the action; the message is
    /// ready to show to the user.
    #[error("{0}")]
    Rejected(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Which user action is being performed, for failure messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionKind {
    Archive,
    SaveTags,
}

/// Sends tag/archive mutations for single items. Each call is one
/// independent remote mutation, outside the sync run and its
/// cancellation token. A success removes the item from the local inbox
/// directly — an archived or fully tagged item leaves the untagged
/// view.
pub struct ActionDispatcher {
    client: LaterClient,
    store: StoreHandle,
}

impl ActionDispatcher {
    pub fn new(client: LaterClient, store: StoreHandle) -> Self {
        Self { client, store }
    }

    pub async fn archive(&self, item_id: i64) -> Result<(), ActionError> {
        let reply = self.client.send_action(&ItemAction::archive(item_id)).await;
        self.conclude(item_id, ActionKind::Archive, reply).await
    }

    pub async fn save_tags(
        &self,
        item_id: i64,
        names: &HashSet<String>,
    ) -> Result<(), ActionError> {
        let tags = joined_tag_names(names);
        let reply = self
            .client
            .send_action(&ItemAction::tags_add(item_id, tags))
            .await;
        self.conclude(item_id, ActionKind::SaveTags, reply).await
    }

    async fn conclude(
        &self,
        item_id: i64,
        kind: ActionKind,
        reply: Result<SendReply, LaterError>,
    ) -> Result<(), ActionError> {
        let description = match reply {
            Ok(reply) if reply.status == 1 => {
                self.store.delete_item(item_id).await?;
                info!(item_id, kind = ?kind, "action accepted");
                return Ok(());
            }
            Ok(reply) if !reply.http_status.is_success() => {
                format!("Status Code: {}", reply.http_status.as_u16())
            }
            Ok(reply) => format!("Action status: {}", reply.status),
            Err(err) => err.user_message(),
        };
        error!(item_id, kind = ?kind, description = %description, "action rejected");
        let message = match kind {
            ActionKind::Archive => messages::ARCHIVE_FAILED,
            ActionKind::SaveTags => messages::TAG_SAVE_FAILED,
        };
        Err(ActionError::Rejected(format!("{message}\n({description})")))
    }
}

/// Joins tag names sorted and comma-separated, the exact string the
/// send endpoint expects.
pub fn joined_tag_names(names: &HashSet<String>) -> String {
    let mut sorted: Vec<&str> = names.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(",")
}
