use std::time::Duration;

use anyhow::Context;
use later_core::LaterClient;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::images::ImageFetcher;
use crate::messages;
use crate::sync::cursor::DEFAULT_PAGE_SIZE;
use crate::sync::engine::{SyncCoordinator, SyncEvent};
use crate::sync::fetcher::PageFetcher;
use crate::sync::store::{ItemStore, Scope, StoreError, StoreHandle};
use crate::token_storage::TokenStorage;

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
const DEFAULT_REDIRECT_URI: &str = "laterd:authorization-finished";

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub consumer_key: Option<String>,
    pub api_base_url: Option<String>,
    pub database_url: Option<String>,
    pub sync_interval: Duration,
    pub page_size: u32,
    pub redirect_uri: String,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let consumer_key = std::env::var("LATERD_CONSUMER_KEY").ok();
        let api_base_url = std::env::var("LATERD_API_BASE_URL").ok();
        let database_url = std::env::var("LATERD_DATABASE_URL").ok();
        let sync_interval = Duration::from_secs(read_u64_env(
            "LATERD_SYNC_INTERVAL_SECS",
            DEFAULT_SYNC_INTERVAL_SECS,
        ));
        let page_size = read_u64_env("LATERD_PAGE_SIZE", u64::from(DEFAULT_PAGE_SIZE)) as u32;
        let redirect_uri = std::env::var("LATERD_REDIRECT_URI")
            .unwrap_or_else(|_| DEFAULT_REDIRECT_URI.to_string());

        Ok(Self {
            consumer_key,
            api_base_url,
            database_url,
            sync_interval,
            page_size,
            redirect_uri,
        })
    }

    /// The consumer key is only needed by modes that talk to the remote
    /// service.
    pub fn consumer_key(&self) -> anyhow::Result<&str> {
        self.consumer_key
            .as_deref()
            .context("LATERD_CONSUMER_KEY is not set")
    }
}

pub fn build_client(config: &DaemonConfig, access_token: &str) -> anyhow::Result<LaterClient> {
    let consumer_key = config.consumer_key()?;
    let client = match &config.api_base_url {
        Some(base) => LaterClient::with_base_url(base, consumer_key, access_token)?,
        None => LaterClient::new(consumer_key, access_token)?,
    };
    Ok(client)
}

pub async fn open_store(config: &DaemonConfig) -> Result<ItemStore, StoreError> {
    match &config.database_url {
        Some(url) => ItemStore::new(url).await,
        None => ItemStore::new_default().await,
    }
}

/// The assembled daemon: a coordinator syncing on an interval, an event
/// consumer logging phase transitions, and a lead-image pass after each
/// completed run.
pub struct DaemonRuntime {
    coordinator: SyncCoordinator,
    events: mpsc::UnboundedReceiver<SyncEvent>,
    images: ImageFetcher,
    ui_store: StoreHandle,
    sync_interval: Duration,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        Self::bootstrap_with_storage(config, TokenStorage::new()).await
    }

    /// Token storage is injected so alternate frontends and tests can
    /// substitute the backend; production uses the keyring default.
    pub async fn bootstrap_with_storage(
        config: DaemonConfig,
        storage: TokenStorage,
    ) -> anyhow::Result<Self> {
        let access_token = storage
            .load_access_token()?
            .context("no access token saved; run `laterd --login` first")?;
        let client = build_client(&config, &access_token)?;
        let store = open_store(&config).await?;
        let coordinator = SyncCoordinator::with_page_size(
            PageFetcher::new(client),
            store.handle(Scope::Worker),
            config.page_size,
        );
        let events = coordinator.observe();
        Ok(Self {
            coordinator,
            events,
            images: ImageFetcher::new(),
            ui_store: store.handle(Scope::Ui),
            sync_interval: config.sync_interval,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let DaemonRuntime {
            coordinator,
            mut events,
            images,
            ui_store,
            sync_interval,
        } = self;

        let mut ticker = tokio::time::interval(sync_interval);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!(interval_secs = sync_interval.as_secs(), "laterd running");
        loop {
            tokio::select! {
                _ = ticker.tick() => coordinator.load_all_pages(),
                event = events.recv() => {
                    if let Some(event) = event {
                        handle_event(&ui_store, &images, event).await;
                    }
                }
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn handle_event(ui_store: &StoreHandle, images: &ImageFetcher, event: SyncEvent) {
    match event {
        SyncEvent::Started => info!("sync started"),
        SyncEvent::PagingStarted => info!("loading further pages"),
        SyncEvent::Empty => info!("{}", messages::ZERO_INBOX),
        SyncEvent::Failed(reason) => {
            warn!("{}: {reason}", messages::DOWNLOADING_FAILED_TITLE);
        }
        SyncEvent::Finished => {
            match ui_store.count_items().await {
                Ok(count) => info!(count, "sync finished"),
                Err(err) => error!(%err, "failed to count items"),
            }
            match images.fetch_missing(ui_store).await {
                Ok(fetched) if fetched > 0 => info!(fetched, "cached lead images"),
                Ok(_) => {}
                Err(err) => warn!(%err, "lead image pass failed"),
            }
        }
    }
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
