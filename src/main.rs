use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feedshelf::config::Config;
use feedshelf::feed::{refresh, refresh_all, FetchStatus, Fetcher};
use feedshelf::storage::{Database, Feed, FeedKey, FeedListOptions, SearchIndex, StoreError};
use feedshelf::util::{now, validate_feed_url};

/// Get the config directory path (~/.config/feedshelf/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedshelf"))
}

/// Treat anything with a scheme as a URL, everything else as a feed ID.
fn key_from_arg(arg: &str) -> FeedKey<'_> {
    if arg.contains("://") {
        FeedKey::Url(arg)
    } else {
        FeedKey::Id(arg)
    }
}

#[derive(Parser, Debug)]
#[command(name = "feedshelf", version, about = "Feed sync and content store")]
struct Args {
    /// Config file (default: ~/.config/feedshelf/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed
    Add {
        url: String,
        #[arg(long)]
        title: Option<String>,
        /// Tag to attach (repeatable)
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,
        /// Fetch the feed right away
        #[arg(long)]
        fetch: bool,
    },
    /// List feeds, most recently authored first
    List {
        /// Substring of title or URL
        #[arg(long, short = 's', default_value = "")]
        search: String,
        /// Tag filter; prefix with '-' to exclude (repeatable)
        #[arg(long = "tag", short = 't', allow_hyphen_values = true)]
        tags: Vec<String>,
        /// Only feeds not refreshed in this many hours
        #[arg(long, value_name = "HOURS")]
        stale: Option<i64>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Print a feed and its items as JSON
    Show { feed: String },
    /// Fetch and store new items
    Refresh {
        /// Feed ID or URL
        #[arg(required_unless_present = "all")]
        feed: Option<String>,
        /// Refresh every feed
        #[arg(long, conflicts_with = "feed")]
        all: bool,
    },
    /// Delete a feed and its items
    Remove { feed: String },
    /// Delete one item from a feed
    RemoveItem { feed: String, item: String },
    /// Full-text search over bookmarks or thoughts
    Search { index: SearchIndex, query: String },
    /// Verify the full-text indexes match their tables
    CheckIndex,
    /// Rebuild the full-text indexes
    RebuildIndex { index: Option<SearchIndex> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| config.resolve_database_path(&config_dir));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::InstanceLocked) => {
            eprintln!("Error: The database is locked by another process. Close it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    run(args.command, &config, &db).await
}

async fn run(command: Command, config: &Config, db: &Database) -> Result<()> {
    match command {
        Command::Add {
            url,
            title,
            tags,
            fetch,
        } => {
            let fetcher_config = config.fetcher_config();
            validate_feed_url(&url, fetcher_config.host_policy)?;

            let mut feed = Feed {
                title: title.unwrap_or_default(),
                tags,
                ..Feed::with_url(url)
            };
            db.persist_feed(&mut feed).await?;
            println!("{}", feed.id);

            if fetch {
                let fetcher = Fetcher::new(fetcher_config)?;
                let result = refresh(db, &fetcher, &mut feed).await;
                report_refresh(&feed, result);
            }
        }

        Command::List {
            search,
            tags,
            stale,
            limit,
            offset,
        } => {
            let options = FeedListOptions {
                search,
                tags,
                not_refreshed_since: stale.map(|hours| now() - Duration::hours(hours)),
                limit: limit.unwrap_or(config.list_limit),
                offset,
            };
            let (feeds, total) = db.try_list_feeds(&options).await?;
            for feed in &feeds {
                println!(
                    "{}  {:>4} items  [{}]  {}  <{}>",
                    feed.id,
                    feed.items.len(),
                    feed.tags.join(","),
                    feed.title,
                    feed.url
                );
            }
            println!("{} of {} feeds", feeds.len(), total);
        }

        Command::Show { feed } => {
            let feed = db.get_feed(key_from_arg(&feed)).await?;
            println!("{}", serde_json::to_string_pretty(&feed)?);
        }

        Command::Refresh { feed, all } => {
            let fetcher = Fetcher::new(config.fetcher_config())?;
            if all {
                let (feeds, _) = db
                    .try_list_feeds(&FeedListOptions {
                        limit: -1,
                        ..FeedListOptions::default()
                    })
                    .await?;
                for result in refresh_all(db, &fetcher, feeds, config.refresh_concurrency).await {
                    report_refresh(&result.feed, result.result);
                }
            } else if let Some(feed) = feed {
                let mut feed = db.get_feed(key_from_arg(&feed)).await?;
                let result = refresh(db, &fetcher, &mut feed).await;
                report_refresh(&feed, result);
            }
        }

        Command::Remove { feed } => {
            let deleted = db.delete_feed(key_from_arg(&feed)).await?;
            println!("Deleted {} feed(s)", deleted);
        }

        Command::RemoveItem { feed, item } => {
            let mut feed = db.get_feed(key_from_arg(&feed)).await?;
            let removed = feed.delete_item(&item)?;
            db.persist_feed(&mut feed).await?;
            println!("Removed \"{}\" from {}", removed.title, feed.title);
        }

        Command::Search { index, query } => {
            for hit in db.search(index, &query).await? {
                match hit.url {
                    Some(url) => println!("{}  {}  <{}>", hit.id, hit.title, url),
                    None => println!("{}  {}", hit.id, hit.title),
                }
            }
        }

        Command::CheckIndex => {
            let mut consistent = true;
            for index in SearchIndex::ALL {
                let ok = db.check_fts_consistency(index).await?;
                println!("{}: {}", index.table(), if ok { "ok" } else { "out of sync" });
                consistent &= ok;
            }
            if !consistent {
                eprintln!("Run `feedshelf rebuild-index` to fix.");
                std::process::exit(1);
            }
        }

        Command::RebuildIndex { index } => {
            let indexes = match index {
                Some(index) => vec![index],
                None => SearchIndex::ALL.to_vec(),
            };
            for index in indexes {
                let count = db
                    .rebuild_fts_index(index)
                    .await
                    .with_context(|| format!("Failed to rebuild {}", index.fts_table()))?;
                println!("{}: {} rows indexed", index.table(), count);
            }
        }
    }

    Ok(())
}

fn report_refresh<E: std::fmt::Display>(feed: &Feed, result: Result<FetchStatus, E>) {
    match result {
        Ok(FetchStatus::NotModified) => println!("{}  not modified", feed.url),
        Ok(FetchStatus::Updated(outcome)) => println!(
            "{}  {} new, {} already seen, {} future-dated",
            feed.url, outcome.accepted, outcome.rejected_stale, outcome.rejected_future
        ),
        Err(e) => eprintln!("{}  error: {}", feed.url, e),
    }
}
