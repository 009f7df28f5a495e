use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::{parse_interval, Aggregator, FeedSummary};
use crate::config::Config;
use crate::db::{Database, StoreError, User};
use crate::fetcher::Fetcher;

const DEFAULT_BROWSE_LIMIT: i64 = 2;

#[derive(Parser, Debug)]
#[command(name = "gator", about = "Command-line RSS feed aggregator")]
pub struct Cli {
    /// Config file holding the database url and current user
    /// (defaults to ~/.gatorconfig.json)
    #[arg(global = true, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch to an existing user
    Login { name: String },
    /// List all users
    Users,
    /// Delete every user along with their feeds, follows and posts
    Reset,
    /// Add a feed and follow it
    Addfeed { name: String, url: String },
    /// List all feeds
    Feeds,
    /// Follow a feed someone already added
    Follow { url: String },
    /// Stop following a feed
    Unfollow { url: String },
    /// List the feeds you follow
    Following,
    /// Show the newest posts from the feeds you follow
    Browse {
        #[arg(default_value_t = DEFAULT_BROWSE_LIMIT)]
        limit: i64,
    },
    /// Fetch feeds forever, one every INTERVAL (e.g. 30s, 1m)
    Agg { interval: String },
}

impl Command {
    fn requires_login(&self) -> bool {
        matches!(
            self,
            Command::Addfeed { .. }
                | Command::Follow { .. }
                | Command::Unfollow { .. }
                | Command::Following
                | Command::Browse { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no user logged in, run `register` or `login` first")]
    NotLoggedIn,
    #[error("user '{0}' does not exist")]
    UnknownUser(String),
    #[error("no feed with url '{0}'")]
    UnknownFeed(String),
    #[error("you are not following '{0}'")]
    NotFollowing(String),
    #[error("limit must be positive, got {0}")]
    InvalidLimit(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything a command needs: the database and the config file that records
/// who the current user is.
pub struct Session {
    pub db: Database,
    pub config: Config,
    pub config_path: PathBuf,
}

impl Session {
    pub fn new(db: Database, config: Config, config_path: PathBuf) -> Self {
        Self {
            db,
            config,
            config_path,
        }
    }

    /// Resolves the configured user name to a stored user.
    pub async fn current_user(&self) -> Result<User, CommandError> {
        let name = self
            .config
            .current_user_name
            .as_deref()
            .ok_or(CommandError::NotLoggedIn)?;
        self.db
            .get_user(name)
            .await?
            .ok_or_else(|| CommandError::UnknownUser(name.to_string()))
    }

    fn set_current_user(&mut self, name: &str) -> anyhow::Result<()> {
        self.config.set_user(name, &self.config_path)
    }
}

pub async fn run(session: &mut Session, command: Command, out: &mut dyn Write) -> anyhow::Result<()> {
    let user = if command.requires_login() {
        Some(session.current_user().await?)
    } else {
        None
    };

    match (command, user) {
        (Command::Register { name }, _) => register(session, &name, out).await,
        (Command::Login { name }, _) => login(session, &name, out).await,
        (Command::Users, _) => users(session, out).await,
        (Command::Reset, _) => reset(session, out).await,
        (Command::Feeds, _) => feeds(session, out).await,
        (Command::Agg { interval }, _) => agg(session, &interval, out).await,
        (Command::Addfeed { name, url }, Some(user)) => add_feed(session, &user, &name, &url, out).await,
        (Command::Follow { url }, Some(user)) => follow(session, &user, &url, out).await,
        (Command::Unfollow { url }, Some(user)) => unfollow(session, &user, &url, out).await,
        (Command::Following, Some(user)) => following(session, &user, out).await,
        (Command::Browse { limit }, Some(user)) => browse(session, &user, limit, out).await,
        (_, None) => Err(CommandError::NotLoggedIn.into()),
    }
}

async fn register(session: &mut Session, name: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    if session.db.get_user(name).await?.is_some() {
        return Err(StoreError::UserExists(name.to_string()).into());
    }

    let user = session.db.create_user(name).await?;
    session.set_current_user(&user.name)?;
    info!(user = %user.name, id = %user.id, "Registered user");

    writeln!(out, "User successfully created: {}", user.name)?;
    Ok(())
}

async fn login(session: &mut Session, name: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let user = session
        .db
        .get_user(name)
        .await?
        .ok_or_else(|| CommandError::UnknownUser(name.to_string()))?;
    session.set_current_user(&user.name)?;

    writeln!(out, "User successfully set to: {}", user.name)?;
    Ok(())
}

async fn users(session: &Session, out: &mut dyn Write) -> anyhow::Result<()> {
    let current = session.config.current_user_name.as_deref();
    for user in session.db.get_users().await? {
        if Some(user.name.as_str()) == current {
            writeln!(out, "* {} (current)", user.name)?;
        } else {
            writeln!(out, "* {}", user.name)?;
        }
    }
    Ok(())
}

async fn reset(session: &Session, out: &mut dyn Write) -> anyhow::Result<()> {
    let deleted = session.db.reset_users().await?;
    info!(deleted, "Reset users");
    writeln!(out, "All users successfully reset")?;
    Ok(())
}

async fn add_feed(
    session: &Session,
    user: &User,
    name: &str,
    url: &str,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let feed = session.db.create_feed(name, url, user.id).await?;
    session.db.create_feed_follow(user.id, feed.id).await?;
    info!(feed = %feed.name, url = %feed.url, user = %user.name, "Added feed");

    writeln!(out, "Feed created successfully:")?;
    writeln!(out, "  Name: {}", feed.name)?;
    writeln!(out, "  URL:  {}", feed.url)?;
    Ok(())
}

async fn feeds(session: &Session, out: &mut dyn Write) -> anyhow::Result<()> {
    let feeds = session.db.get_feeds_with_creator().await?;
    writeln!(out, "=== FEEDS ===")?;
    for feed in feeds {
        writeln!(out, "  Name: {}", feed.name)?;
        writeln!(out, "  URL:  {}", feed.url)?;
        writeln!(
            out,
            "  Created by: {}",
            feed.creator_name.as_deref().unwrap_or("unknown")
        )?;
    }
    Ok(())
}

async fn follow(session: &Session, user: &User, url: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let feed = session
        .db
        .get_feed_by_url(url)
        .await?
        .ok_or_else(|| CommandError::UnknownFeed(url.to_string()))?;
    let follow = session.db.create_feed_follow(user.id, feed.id).await?;

    writeln!(out, "Feed {} followed successfully.", follow.feed_name)?;
    writeln!(out, "Followed by {}.", follow.user_name)?;
    Ok(())
}

async fn unfollow(session: &Session, user: &User, url: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let feed = session
        .db
        .get_feed_by_url(url)
        .await?
        .ok_or_else(|| CommandError::UnknownFeed(url.to_string()))?;
    if !session.db.delete_feed_follow(user.id, feed.id).await? {
        return Err(CommandError::NotFollowing(feed.name).into());
    }

    writeln!(out, "Feed {} unfollowed successfully.", feed.name)?;
    Ok(())
}

async fn following(session: &Session, user: &User, out: &mut dyn Write) -> anyhow::Result<()> {
    for follow in session.db.get_feed_follows_for_user(user.id).await? {
        writeln!(out, "* {}", follow.feed_name)?;
    }
    Ok(())
}

async fn browse(session: &Session, user: &User, limit: i64, out: &mut dyn Write) -> anyhow::Result<()> {
    if limit <= 0 {
        return Err(CommandError::InvalidLimit(limit).into());
    }

    let posts = session.db.get_posts_for_user(user.id, limit).await?;
    if posts.is_empty() {
        writeln!(out, "No posts yet. Follow a feed and run `agg` to collect some.")?;
        return Ok(());
    }

    for entry in posts {
        let post = entry.post;
        writeln!(out, "{}", post.title)?;
        writeln!(out, "  From: {}", entry.feed_name)?;
        if let Some(published_at) = post.published_at {
            writeln!(out, "  Published: {}", published_at.format("%Y-%m-%d %H:%M UTC"))?;
        }
        writeln!(out, "  Link: {}", post.url)?;
        if !post.description.is_empty() {
            writeln!(out, "  {}", post.description)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

async fn agg(session: &Session, interval: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let interval = parse_interval(interval)?;
    let aggregator = Aggregator::new(session.db.clone(), Fetcher::new()?, interval)?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping");
            on_ctrl_c.cancel();
        }
    });

    writeln!(out, "Collecting feeds every {:?}", aggregator.interval())?;
    writeln!(out, "Press Ctrl+C to stop")?;

    aggregator
        .run(cancel, |summary| {
            if let Err(e) = write_summary(out, summary) {
                warn!(feed = %summary.feed_name, error = %e, "Failed to write feed summary");
            }
        })
        .await;
    Ok(())
}

/// Errors are returned for the caller to log; `agg` keeps running.
fn write_summary(out: &mut dyn Write, summary: &FeedSummary) -> std::io::Result<()> {
    write!(out, "{}", summary)?;
    out.flush()
}
