use std::collections::HashSet;

use anyhow::Context;
use later_core::AuthClient;

use laterd::actions::ActionDispatcher;
use laterd::daemon::{DaemonConfig, DaemonRuntime, build_client, open_store};
use laterd::sync::store::{ItemSorting, Scope};
use laterd::token_storage::TokenStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run,
    Login,
    Logout,
    List,
    ListTags,
    CreateTag(String),
    DeleteTag(String),
    Archive(i64),
    Tag { item_id: i64, names: Vec<String> },
    SetSorting(String),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(first) = args.next() else {
        return Ok(CliMode::Run);
    };
    let mode = match first.as_str() {
        "--login" => CliMode::Login,
        "--logout" => CliMode::Logout,
        "--list" => CliMode::List,
        "--list-tags" => CliMode::ListTags,
        "--create-tag" => CliMode::CreateTag(args.next().context("--create-tag needs a name")?),
        "--delete-tag" => CliMode::DeleteTag(args.next().context("--delete-tag needs a name")?),
        "--archive" => CliMode::Archive(parse_item_id(args.next())?),
        "--tag" => {
            let item_id = parse_item_id(args.next())?;
            let names: Vec<String> = args.by_ref().collect();
            if names.is_empty() {
                anyhow::bail!("--tag needs at least one tag name");
            }
            CliMode::Tag { item_id, names }
        }
        "--sort" => CliMode::SetSorting(args.next().context("--sort needs a value")?),
        "--help" | "-h" => CliMode::Help,
        other => anyhow::bail!("unknown argument: {other}"),
    };
    if let Some(extra) = args.next() {
        anyhow::bail!("unexpected argument: {extra}");
    }
    Ok(mode)
}

fn parse_item_id(arg: Option<String>) -> anyhow::Result<i64> {
    let raw = arg.context("an item id is required")?;
    raw.parse().with_context(|| format!("invalid item id: {raw}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match parse_cli_mode(std::env::args())? {
        CliMode::Run => {
            let config = DaemonConfig::from_env()?;
            let daemon = DaemonRuntime::bootstrap(config).await?;
            daemon.run().await
        }
        CliMode::Login => login().await,
        CliMode::Logout => {
            TokenStorage::new().delete_access_token()?;
            println!("saved access token removed");
            Ok(())
        }
        CliMode::List => list_inbox().await,
        CliMode::ListTags => {
            let store = open_store(&DaemonConfig::from_env()?).await?;
            for name in store.handle(Scope::Ui).list_tags().await? {
                println!("{name}");
            }
            Ok(())
        }
        CliMode::CreateTag(name) => {
            let store = open_store(&DaemonConfig::from_env()?).await?;
            store.handle(Scope::Ui).create_tag(&name).await?;
            println!("created tag {name}");
            Ok(())
        }
        CliMode::DeleteTag(name) => {
            let store = open_store(&DaemonConfig::from_env()?).await?;
            store.handle(Scope::Ui).delete_tag(&name).await?;
            println!("deleted tag {name}");
            Ok(())
        }
        CliMode::Archive(item_id) => {
            let dispatcher = make_dispatcher().await?;
            dispatcher.archive(item_id).await?;
            println!("archived item {item_id}");
            Ok(())
        }
        CliMode::Tag { item_id, names } => {
            let dispatcher = make_dispatcher().await?;
            let names: HashSet<String> = names.into_iter().collect();
            dispatcher.save_tags(item_id, &names).await?;
            println!("tagged item {item_id}");
            Ok(())
        }
        CliMode::SetSorting(value) => {
            let sorting = ItemSorting::parse(&value)?;
            let store = open_store(&DaemonConfig::from_env()?).await?;
            store.handle(Scope::Ui).set_sort_preference(sorting).await?;
            println!("inbox sorting set to {}", sorting.as_str());
            Ok(())
        }
        CliMode::Help => {
            println!("Usage: laterd [MODE]");
            println!("  (no mode)            run the sync daemon");
            println!("  --login              authorize and save an access token");
            println!("  --logout             remove the saved access token");
            println!("  --list               print the local inbox");
            println!("  --archive <id>       archive one item");
            println!("  --tag <id> <name>... tag one item");
            println!("  --create-tag <name>  create a tag");
            println!("  --delete-tag <name>  delete a tag");
            println!("  --list-tags          print all tags");
            println!("  --sort <value>       set inbox sorting (date_added | time_to_read)");
            println!("  --help               show this help");
            Ok(())
        }
    }
}

async fn login() -> anyhow::Result<()> {
    let config = DaemonConfig::from_env()?;
    let consumer_key = config.consumer_key()?;
    let auth = match &config.api_base_url {
        Some(base) => AuthClient::with_base_url(base, consumer_key, &config.redirect_uri)?,
        None => AuthClient::new(consumer_key, &config.redirect_uri)?,
    };
    let request_token = auth.request_token().await?;
    println!(
        "Authorize this app at:\n  {}",
        auth.authorize_url(&request_token)?
    );
    println!("Press Enter once you have approved access.");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let grant = auth.access_token(&request_token).await?;
    TokenStorage::new().save_access_token(&grant.access_token)?;
    println!("logged in as {}", grant.username);
    Ok(())
}

async fn list_inbox() -> anyhow::Result<()> {
    let store = open_store(&DaemonConfig::from_env()?).await?;
    let handle = store.handle(Scope::Ui);
    let sorting = handle.sort_preference().await?;
    for item in handle.list_items(sorting).await? {
        println!(
            "[{:>9}] {:<8} {}",
            item.item_id,
            item.section.as_str(),
            item.title
        );
    }
    Ok(())
}

async fn make_dispatcher() -> anyhow::Result<ActionDispatcher> {
    let config = DaemonConfig::from_env()?;
    let token = TokenStorage::new()
        .load_access_token()?
        .context("no access token saved; run `laterd --login` first")?;
    let client = build_client(&config, &token)?;
    let store = open_store(&config).await?;
    Ok(ActionDispatcher::new(client, store.handle(Scope::Ui)))
}
