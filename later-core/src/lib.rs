mod auth;
mod client;

pub use auth::{AccessGrant, AuthClient, AuthError};
pub use client::{
    ItemAction, LaterClient, LaterError, SavedItem, SavedItemsPage, SendReply, VideoItem,
};
