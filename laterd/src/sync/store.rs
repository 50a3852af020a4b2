use std::collections::HashSet;
use std::{fs, path::PathBuf};

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;
use tokio::sync::broadcast;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const CHANGE_CHANNEL_CAPACITY: usize = 64;

const ITEM_COLUMNS: &str = "item_id, title, excerpt, section, favorite, time_added, \
     time_updated, time_to_read, video_length, url, image_url, image_data";

const SORT_PREF_KEY: &str = "item_sorting";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("invalid section: {0}")]
    InvalidSection(String),
    #[error("invalid sorting: {0}")]
    InvalidSorting(String),
}

/// List grouping of a stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Article,
    Video,
    Other,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Article => "article",
            Section::Video => "video",
            Section::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "article" => Ok(Section::Article),
            "video" => Ok(Section::Video),
            "other" => Ok(Section::Other),
            other => Err(StoreError::InvalidSection(other.to_string())),
        }
    }
}

/// Sort order for inbox listings, persisted as a preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemSorting {
    #[default]
    DateAdded,
    TimeToRead,
}

impl ItemSorting {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSorting::DateAdded => "date_added",
            ItemSorting::TimeToRead => "time_to_read",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "date_added" => Ok(ItemSorting::DateAdded),
            "time_to_read" => Ok(ItemSorting::TimeToRead),
            other => Err(StoreError::InvalidSorting(other.to_string())),
        }
    }
}

/// Fields written for an item. The cached image bytes are deliberately
/// absent: they are only ever written by a successful image download.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemInput {
    pub item_id: i64,
    pub title: String,
    pub excerpt: String,
    pub section: Section,
    pub favorite: bool,
    pub time_added: i64,
    pub time_updated: i64,
    pub time_to_read: i64,
    pub video_length: i64,
    pub url: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub item_id: i64,
    pub title: String,
    pub excerpt: String,
    pub section: Section,
    pub favorite: bool,
    pub time_added: i64,
    pub time_updated: i64,
    pub time_to_read: i64,
    pub video_length: i64,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub image_data: Option<Vec<u8>>,
}

/// Which side of the store a handle mutates on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Ui,
    Worker,
}

/// Notification published after a committed write so the other scope
/// observes it without polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub origin: Scope,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Upserted(Vec<i64>),
    Removed(Vec<i64>),
    TagsChanged,
}

/// Durable owner of items and tags, backed by SQLite. Mutation happens
/// through scoped [`StoreHandle`]s; every committed write is announced
/// on a broadcast channel.
pub struct ItemStore {
    pool: SqlitePool,
    changes: broadcast::Sender<StoreChange>,
}

impl ItemStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, StoreError> {
        let db_path = default_db_path()?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn handle(&self, scope: Scope) -> StoreHandle {
        StoreHandle {
            pool: self.pool.clone(),
            scope,
            changes: self.changes.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// A scoped view onto the store. Handles share one pool; each write is
/// atomic on its own and publishes a change tagged with the handle's
/// scope.
#[derive(Clone)]
pub struct StoreHandle {
    pool: SqlitePool,
    scope: Scope,
    changes: broadcast::Sender<StoreChange>,
}

impl StoreHandle {
    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub async fn get_item(&self, item_id: i64) -> Result<Option<ItemRecord>, StoreError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE item_id = ?1");
        let row = sqlx::query(&sql)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| item_from_row(&row)).transpose()
    }

    /// Batched lookup for a page's identity set; one query, not one per
    /// item.
    pub async fn get_items_by_ids(&self, ids: &[i64]) -> Result<Vec<ItemRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE item_id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(item_from_row).collect()
    }

    pub async fn list_items(&self, sorting: ItemSorting) -> Result<Vec<ItemRecord>, StoreError> {
        let order = match sorting {
            ItemSorting::DateAdded => "time_added DESC, item_id ASC",
            ItemSorting::TimeToRead => "time_to_read ASC, item_id ASC",
        };
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY {order}");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(item_from_row).collect()
    }

    pub async fn count_items(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Writes a batch of accepted items in one transaction. An existing
    /// row keeps its cached image bytes; everything else is overwritten.
    pub async fn upsert_items(&self, items: &[ItemInput]) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                "INSERT INTO items (
                    item_id, title, excerpt, section, favorite, time_added,
                    time_updated, time_to_read, video_length, url, image_url
                 )
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(item_id) DO UPDATE SET
                    title = excluded.title,
                    excerpt = excluded.excerpt,
                    section = excluded.section,
                    favorite = excluded.favorite,
                    time_added = excluded.time_added,
                    time_updated = excluded.time_updated,
                    time_to_read = excluded.time_to_read,
                    video_length = excluded.video_length,
                    url = excluded.url,
                    image_url = excluded.image_url;",
            )
            .bind(item.item_id)
            .bind(&item.title)
            .bind(&item.excerpt)
            .bind(item.section.as_str())
            .bind(if item.favorite { 1 } else { 0 })
            .bind(item.time_added)
            .bind(item.time_updated)
            .bind(item.time_to_read)
            .bind(item.video_length)
            .bind(&item.url)
            .bind(&item.image_url)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.publish(ChangeKind::Upserted(
            items.iter().map(|item| item.item_id).collect(),
        ));
        Ok(())
    }

    /// Bulk set-difference delete: removes every item whose identity is
    /// not in `keep`, in one statement. The removed identities are
    /// returned and announced explicitly, since a bulk delete would not
    /// otherwise name the affected rows.
    pub async fn delete_items_not_in(&self, keep: &HashSet<i64>) -> Result<Vec<i64>, StoreError> {
        let keep: Vec<i64> = keep.iter().copied().collect();
        let predicate = if keep.is_empty() {
            String::new()
        } else {
            let placeholders = vec!["?"; keep.len()].join(", ");
            format!(" WHERE item_id NOT IN ({placeholders})")
        };

        let mut tx = self.pool.begin().await?;

        let select_sql = format!("SELECT item_id FROM items{predicate}");
        let mut select = sqlx::query(&select_sql);
        for id in &keep {
            select = select.bind(id);
        }
        let rows = select.fetch_all(&mut *tx).await?;
        let removed: Vec<i64> = rows
            .iter()
            .map(|row| row.try_get("item_id"))
            .collect::<Result<_, _>>()?;

        let delete_sql = format!("DELETE FROM items{predicate}");
        let mut delete = sqlx::query(&delete_sql);
        for id in &keep {
            delete = delete.bind(id);
        }
        delete.execute(&mut *tx).await?;
        tx.commit().await?;

        if !removed.is_empty() {
            self.publish(ChangeKind::Removed(removed.clone()));
        }
        Ok(removed)
    }

    pub async fn delete_item(&self, item_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM items WHERE item_id = ?1")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        self.publish(ChangeKind::Removed(vec![item_id]));
        Ok(())
    }

    /// Caches downloaded lead-image bytes on the row. This is the only
    /// write path that touches `image_data`.
    pub async fn save_image_data(&self, item_id: i64, data: &[u8]) -> Result<(), StoreError> {
        sqlx::query("UPDATE items SET image_data = ?1 WHERE item_id = ?2")
            .bind(data)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        self.publish(ChangeKind::Upserted(vec![item_id]));
        Ok(())
    }

    /// Items that advertise a lead image whose bytes are not cached yet.
    pub async fn list_missing_image_items(&self) -> Result<Vec<(i64, String)>, StoreError> {
        let rows = sqlx::query(
            "SELECT item_id, image_url FROM items
             WHERE image_url IS NOT NULL AND image_data IS NULL
             ORDER BY item_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push((row.try_get("item_id")?, row.try_get("image_url")?));
        }
        Ok(out)
    }

    pub async fn create_tag(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO tags (name) VALUES (?1) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        self.publish(ChangeKind::TagsChanged);
        Ok(())
    }

    pub async fn delete_tag(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tags WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        self.publish(ChangeKind::TagsChanged);
        Ok(())
    }

    pub async fn list_tags(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT name FROM tags ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("name").map_err(StoreError::from))
            .collect()
    }

    pub async fn sort_preference(&self) -> Result<ItemSorting, StoreError> {
        let row = sqlx::query("SELECT value FROM prefs WHERE key = ?1")
            .bind(SORT_PREF_KEY)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let value: String = row.try_get("value")?;
                ItemSorting::parse(&value)
            }
            None => Ok(ItemSorting::default()),
        }
    }

    pub async fn set_sort_preference(&self, sorting: ItemSorting) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO prefs (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        )
        .bind(SORT_PREF_KEY)
        .bind(sorting.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn publish(&self, kind: ChangeKind) {
        // No receivers is fine; the send result is irrelevant then.
        let _ = self.changes.send(StoreChange {
            origin: self.scope,
            kind,
        });
    }
}

fn item_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ItemRecord, StoreError> {
    let section: String = row.try_get("section")?;
    let favorite: i64 = row.try_get("favorite")?;
    Ok(ItemRecord {
        item_id: row.try_get("item_id")?,
        title: row.try_get("title")?,
        excerpt: row.try_get("excerpt")?,
        section: Section::parse(&section)?,
        favorite: favorite != 0,
        time_added: row.try_get("time_added")?,
        time_updated: row.try_get("time_updated")?,
        time_to_read: row.try_get("time_to_read")?,
        video_length: row.try_get("video_length")?,
        url: row.try_get("url")?,
        image_url: row.try_get("image_url")?,
        image_data: row.try_get("image_data")?,
    })
}

fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("laterd");
    path.push("items.db");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    // One connection: every pool connection to `sqlite::memory:` would
    // otherwise get its own empty database.
    async fn make_store() -> ItemStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = ItemStore::from_pool(pool);
        store.init().await.unwrap();
        store
    }

    fn input(item_id: i64, time_updated: i64) -> ItemInput {
        ItemInput {
            item_id,
            title: format!("Item {item_id}"),
            excerpt: "An excerpt".into(),
            section: Section::Article,
            favorite: false,
            time_added: 1_700_000_000,
            time_updated,
            time_to_read: 300,
            video_length: 0,
            url: Some("https://example.com/a".into()),
            image_url: Some("https://example.com/a.png".into()),
        }
    }

    #[tokio::test]
    async fn upsert_and_fetch_item() {
        let store = make_store().await;
        let handle = store.handle(Scope::Worker);

        handle.upsert_items(&[input(10, 100)]).await.unwrap();
        let fetched = handle.get_item(10).await.unwrap().unwrap();

        assert_eq!(fetched.item_id, 10);
        assert_eq!(fetched.title, "Item 10");
        assert_eq!(fetched.section, Section::Article);
        assert_eq!(fetched.time_updated, 100);
        assert_eq!(fetched.image_data, None);
    }

    #[tokio::test]
    async fn upsert_overwrites_fields_but_keeps_image_data() {
        let store = make_store().await;
        let handle = store.handle(Scope::Worker);

        handle.upsert_items(&[input(10, 100)]).await.unwrap();
        handle.save_image_data(10, b"png-bytes").await.unwrap();

        let mut updated = input(10, 101);
        updated.title = "Renamed".into();
        updated.image_url = None;
        handle.upsert_items(&[updated]).await.unwrap();

        let fetched = handle.get_item(10).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Renamed");
        assert_eq!(fetched.image_url, None);
        assert_eq!(fetched.image_data.as_deref(), Some(&b"png-bytes"[..]));
    }

    #[tokio::test]
    async fn get_items_by_ids_is_batched_lookup() {
        let store = make_store().await;
        let handle = store.handle(Scope::Worker);
        handle
            .upsert_items(&[input(1, 100), input(2, 100), input(3, 100)])
            .await
            .unwrap();

        let found = handle.get_items_by_ids(&[1, 3, 99]).await.unwrap();
        let mut ids: Vec<i64> = found.iter().map(|record| record.item_id).collect();
        ids.sort_unstable();

        assert_eq!(ids, vec![1, 3]);
        assert!(handle.get_items_by_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_items_not_in_removes_unseen_and_reports_them() {
        let store = make_store().await;
        let handle = store.handle(Scope::Worker);
        let mut changes = store.subscribe();
        handle
            .upsert_items(&[input(1, 100), input(2, 100), input(3, 100)])
            .await
            .unwrap();

        let keep: HashSet<i64> = [1, 3].into_iter().collect();
        let mut removed = handle.delete_items_not_in(&keep).await.unwrap();
        removed.sort_unstable();

        assert_eq!(removed, vec![2]);
        assert!(handle.get_item(2).await.unwrap().is_none());
        assert!(handle.get_item(1).await.unwrap().is_some());

        // Skip the upsert notification, then expect the removal.
        let first = changes.recv().await.unwrap();
        assert!(matches!(first.kind, ChangeKind::Upserted(_)));
        let second = changes.recv().await.unwrap();
        assert_eq!(second.origin, Scope::Worker);
        assert_eq!(second.kind, ChangeKind::Removed(vec![2]));
    }

    #[tokio::test]
    async fn delete_items_not_in_with_empty_set_clears_store() {
        let store = make_store().await;
        let handle = store.handle(Scope::Worker);
        handle
            .upsert_items(&[input(1, 100), input(2, 100)])
            .await
            .unwrap();

        let removed = handle.delete_items_not_in(&HashSet::new()).await.unwrap();

        assert_eq!(removed.len(), 2);
        assert_eq!(handle.count_items().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn worker_writes_are_observed_from_the_ui_scope() {
        let store = make_store().await;
        let worker = store.handle(Scope::Worker);
        let ui = store.handle(Scope::Ui);
        let mut changes = store.subscribe();

        worker.upsert_items(&[input(7, 100)]).await.unwrap();

        let change = changes.recv().await.unwrap();
        assert_eq!(change.origin, Scope::Worker);
        assert_eq!(change.kind, ChangeKind::Upserted(vec![7]));
        assert!(ui.get_item(7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_items_honors_sorting() {
        let store = make_store().await;
        let handle = store.handle(Scope::Ui);
        let mut slow = input(1, 100);
        slow.time_added = 50;
        slow.time_to_read = 900;
        let mut fast = input(2, 100);
        fast.time_added = 60;
        fast.time_to_read = 60;
        handle.upsert_items(&[slow, fast]).await.unwrap();

        let by_date = handle.list_items(ItemSorting::DateAdded).await.unwrap();
        assert_eq!(by_date[0].item_id, 2);

        let by_read_time = handle.list_items(ItemSorting::TimeToRead).await.unwrap();
        assert_eq!(by_read_time[0].item_id, 2);
        assert_eq!(by_read_time[1].item_id, 1);
    }

    #[tokio::test]
    async fn tags_round_trip() {
        let store = make_store().await;
        let handle = store.handle(Scope::Ui);

        handle.create_tag("banana").await.unwrap();
        handle.create_tag("apple").await.unwrap();
        handle.create_tag("apple").await.unwrap();

        assert_eq!(handle.list_tags().await.unwrap(), vec!["apple", "banana"]);

        handle.delete_tag("banana").await.unwrap();
        assert_eq!(handle.list_tags().await.unwrap(), vec!["apple"]);
    }

    #[tokio::test]
    async fn sort_preference_defaults_and_round_trips() {
        let store = make_store().await;
        let handle = store.handle(Scope::Ui);

        assert_eq!(
            handle.sort_preference().await.unwrap(),
            ItemSorting::DateAdded
        );

        handle
            .set_sort_preference(ItemSorting::TimeToRead)
            .await
            .unwrap();
        assert_eq!(
            handle.sort_preference().await.unwrap(),
            ItemSorting::TimeToRead
        );
    }

    #[tokio::test]
    async fn list_missing_image_items_skips_cached_and_imageless_rows() {
        let store = make_store().await;
        let handle = store.handle(Scope::Worker);
        let mut no_image = input(1, 100);
        no_image.image_url = None;
        handle
            .upsert_items(&[no_image, input(2, 100), input(3, 100)])
            .await
            .unwrap();
        handle.save_image_data(2, b"bytes").await.unwrap();

        let missing = handle.list_missing_image_items().await.unwrap();

        assert_eq!(missing, vec![(3, "https://example.com/a.png".to_string())]);
    }

    #[tokio::test]
    async fn new_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("items.db");
        let url = format!("sqlite:{}?mode=rwc", db_path.display());

        let store = ItemStore::new(&url).await.unwrap();
        store
            .handle(Scope::Worker)
            .upsert_items(&[input(1, 100)])
            .await
            .unwrap();

        assert!(db_path.exists());
    }
}
