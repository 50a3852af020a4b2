//! User-facing strings surfaced by event consumers.

/// Shown when a sync run finds the remote inbox empty.
pub const ZERO_INBOX: &str =
    "It looks like you have a Zero Inbox!\nTry pulling to refresh to make sure";

/// Title for a failed sync run.
pub const DOWNLOADING_FAILED_TITLE: &str = "Downloading Failed";

/// Shown when archiving an item is rejected.
pub const ARCHIVE_FAILED: &str = "Problem while archiving the item.\nPlease try again later";

/// Shown when saving tags is rejected.
pub const TAG_SAVE_FAILED: &str = "Problem while saving tags.\nPlease try again later";
