use std::collections::{HashMap, HashSet};

use later_core::{SavedItem, VideoItem};

use super::store::{ItemInput, Section, StoreError, StoreHandle};

/// Merges one fetched page into the store: insert unseen identities,
/// overwrite stored rows only when the incoming `time_updated` is
/// strictly newer, silently skip the rest. All writes land in a single
/// transaction. Returns every identity observed in the page, accepted
/// or not.
pub async fn merge_page(
    store: &StoreHandle,
    page: &[SavedItem],
) -> Result<HashSet<i64>, StoreError> {
    let inputs: Vec<ItemInput> = page.iter().map(map_item).collect();
    let ids: Vec<i64> = inputs.iter().map(|input| input.item_id).collect();

    let existing = store.get_items_by_ids(&ids).await?;
    let stored_stamps: HashMap<i64, i64> = existing
        .iter()
        .map(|record| (record.item_id, record.time_updated))
        .collect();

    let accepted: Vec<ItemInput> = inputs
        .into_iter()
        .filter(|input| match stored_stamps.get(&input.item_id) {
            Some(&stamp) => input.time_updated > stamp,
            None => true,
        })
        .collect();
    store.upsert_items(&accepted).await?;

    Ok(ids.into_iter().collect())
}

/// Maps a wire item onto a store row. String-typed numerics degrade to
/// zero instead of failing the page.
fn map_item(saved: &SavedItem) -> ItemInput {
    ItemInput {
        item_id: parse_or_zero(&saved.item_id),
        title: saved.resolved_title.clone(),
        excerpt: saved.excerpt.clone(),
        section: classify(saved),
        favorite: saved.favorite == "1",
        time_added: parse_or_zero(&saved.time_added),
        time_updated: parse_or_zero(&saved.time_updated),
        time_to_read: saved.time_to_read,
        video_length: saved
            .videos
            .as_ref()
            .map(video_length_minutes)
            .unwrap_or(0),
        url: Some(saved.resolved_url.clone()),
        image_url: saved.top_image_url.clone(),
    }
}

fn classify(saved: &SavedItem) -> Section {
    if saved.is_article == "1" {
        Section::Article
    } else if saved.has_video == "2" {
        Section::Video
    } else {
        Section::Other
    }
}

fn parse_or_zero(value: &str) -> i64 {
    value.parse().unwrap_or(0)
}

/// Duration in whole minutes, rounded up, of the item's lead video.
/// The wire map is unordered, so the entry with the lowest numeric key
/// is picked to keep the choice deterministic.
fn video_length_minutes(videos: &HashMap<String, VideoItem>) -> i64 {
    let seconds = videos
        .iter()
        .min_by_key(|(key, _)| key.parse::<u64>().unwrap_or(u64::MAX))
        .map(|(_, video)| video.length.parse::<i64>().unwrap_or(0))
        .unwrap_or(0);
    (seconds.max(0) as u64).div_ceil(60) as i64
}
