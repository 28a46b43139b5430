use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::time::Duration;

use crate::aggregator::{shutdown_on_ctrl_c, Poller, Scheduler};
use crate::context::AppContext;
use crate::util::parse_duration;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a user and log in as them
    Register { name: String },

    /// Switch to an existing user
    Login { name: String },

    /// List all users
    Users,

    /// Delete every user, feed and post
    Reset,

    /// Add a feed owned by the current user
    Addfeed { name: String, url: String },

    /// List all feeds and who added them
    Feeds,

    /// Poll feeds forever, one feed per interval (e.g. "30s", "1m", "1h30m")
    Agg {
        #[arg(value_parser = parse_duration)]
        time_between_reqs: Duration,
    },

    /// Show the newest posts from your feeds
    Browse {
        #[arg(default_value_t = 2, value_parser = clap::value_parser!(i64).range(1..))]
        limit: i64,
    },
}

impl Command {
    pub async fn run(self, ctx: &mut AppContext) -> Result<()> {
        match self {
            Command::Register { name } => register(ctx, &name).await,
            Command::Login { name } => login(ctx, &name).await,
            Command::Users => users(ctx).await,
            Command::Reset => reset(ctx).await,
            Command::Addfeed { name, url } => add_feed(ctx, &name, &url).await,
            Command::Feeds => feeds(ctx).await,
            Command::Agg { time_between_reqs } => aggregate(ctx, time_between_reqs).await,
            Command::Browse { limit } => browse(ctx, limit).await,
        }
    }
}

async fn register(ctx: &mut AppContext, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("User name cannot be empty");
    }
    if ctx.db.get_user_by_name(name).await?.is_some() {
        bail!("User '{name}' already exists");
    }

    let user = ctx
        .db
        .create_user(name)
        .await
        .with_context(|| format!("Failed to create user '{name}'"))?;
    ctx.set_current_user(&user.name)?;

    tracing::info!(user_id = user.id, name = %user.name, "Registered user");
    println!("User '{}' created and logged in", user.name);
    Ok(())
}

async fn login(ctx: &mut AppContext, name: &str) -> Result<()> {
    let Some(user) = ctx.db.get_user_by_name(name).await? else {
        bail!("User '{name}' does not exist; run `gator register {name}` first");
    };
    ctx.set_current_user(&user.name)?;
    println!("Logged in as '{}'", user.name);
    Ok(())
}

async fn users(ctx: &mut AppContext) -> Result<()> {
    let current = ctx.config.current_user_name.as_deref();
    for user in ctx.db.list_users().await.context("Failed to list users")? {
        if Some(user.name.as_str()) == current {
            println!("* {} (current)", user.name);
        } else {
            println!("* {}", user.name);
        }
    }
    Ok(())
}

async fn reset(ctx: &mut AppContext) -> Result<()> {
    let removed = ctx
        .db
        .delete_all_users()
        .await
        .context("Failed to reset database")?;
    tracing::info!(users = removed, "Database reset");
    println!("Database reset ({removed} users removed)");
    Ok(())
}

async fn add_feed(ctx: &mut AppContext, name: &str, url: &str) -> Result<()> {
    let user = ctx.current_user().await?;

    let parsed = url::Url::parse(url.trim()).with_context(|| format!("Invalid feed URL '{url}'"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("Feed URL must use http or https, got '{}'", parsed.scheme());
    }

    let feed = ctx
        .db
        .create_feed(name.trim(), parsed.as_str(), user.id)
        .await
        .with_context(|| format!("Failed to add feed '{}' (is it already registered?)", parsed))?;

    tracing::info!(feed_id = feed.id, url = %feed.url, user = %user.name, "Added feed");
    println!("Added feed '{}' ({}) for {}", feed.name, feed.url, user.name);
    Ok(())
}

async fn feeds(ctx: &mut AppContext) -> Result<()> {
    let feeds = ctx.db.list_feeds().await.context("Failed to list feeds")?;
    if feeds.is_empty() {
        println!("No feeds yet; add one with `gator addfeed <name> <url>`");
    }
    for entry in feeds {
        let fetched = entry
            .feed
            .last_fetched_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("* {}", entry.feed.name);
        println!("  URL:     {}", entry.feed.url);
        println!("  Owner:   {}", entry.owner_name);
        println!("  Fetched: {fetched}");
    }
    Ok(())
}

async fn aggregate(ctx: &mut AppContext, interval: Duration) -> Result<()> {
    let fetcher = ctx.http_fetcher().context("Failed to build HTTP client")?;
    let poller = Poller::new(Scheduler::new(ctx.db.clone(), fetcher), interval);

    println!("Collecting feeds every {interval:?} (Ctrl-C to stop)");
    let stats = poller.run(shutdown_on_ctrl_c()).await;
    println!(
        "Stopped after {} cycles ({} failed, {} new posts)",
        stats.cycles, stats.failed_cycles, stats.posts_inserted
    );
    Ok(())
}

async fn browse(ctx: &mut AppContext, limit: i64) -> Result<()> {
    let user = ctx.current_user().await?;
    let posts = ctx
        .db
        .get_posts_for_user(user.id, limit)
        .await
        .context("Failed to load posts")?;

    if posts.is_empty() {
        println!("No posts yet; run `gator agg <interval>` to fetch some");
    }
    for post in posts {
        let published = post
            .published_at
            .map(|t| t.format("%a %b %e %Y").to_string())
            .unwrap_or_else(|| "unknown date".to_string());
        println!("{published} | {}", post.title);
        println!("  {}", post.url);
        if let Some(description) = &post.description {
            println!("  {description}");
        }
    }
    Ok(())
}
