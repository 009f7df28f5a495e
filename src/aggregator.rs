use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::{Database, StoreError};
use crate::fetcher::{FetchError, Fetcher};
use crate::ingest::{ingest, IngestOutcome};

pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid interval '{input}': {reason}")]
    InvalidInterval { input: String, reason: String },
}

/// Parses a time-between-requests value such as `30s`, `1m30s` or `1.5h`
/// (units: ns, us, µs, ms, s, m, h). The result must be at least one second.
pub fn parse_interval(input: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidInterval {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let interval = parse_duration(input.trim()).map_err(invalid)?;
    if interval.is_zero() {
        return Err(invalid("must be positive"));
    }
    if interval < MIN_INTERVAL {
        return Err(invalid("time between requests must be at least 1s"));
    }
    Ok(interval)
}

fn parse_duration(input: &str) -> Result<Duration, &'static str> {
    let (negative, mut rest) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err("empty duration");
    }

    let mut total_nanos = 0f64;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);
        let value: f64 = number.parse().map_err(|_| "expected a number")?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        let unit_nanos = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err("missing unit"),
            _ => return Err("unknown unit"),
        };

        total_nanos += value * unit_nanos;
        rest = tail;
    }

    if negative && total_nanos > 0.0 {
        return Err("must be positive");
    }
    if total_nanos > u64::MAX as f64 {
        return Err("duration out of range");
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[derive(Debug, Error)]
pub enum TickError {
    #[error("no feeds to fetch")]
    NoFeeds,
    #[error("couldn't get next feed: {0}")]
    Select(#[source] StoreError),
    #[error("couldn't mark feed as fetched: {0}")]
    Mark(#[source] StoreError),
    #[error("failed to fetch feed '{feed}': {source}")]
    Fetch {
        feed: String,
        #[source]
        source: FetchError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemSummary {
    pub title: String,
    pub link: String,
    /// Raw `<pubDate>`, if the item had one
    pub published: Option<String>,
}

/// What one tick did to one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSummary {
    pub feed_id: i64,
    pub feed_name: String,
    pub feed_url: String,
    pub channel_title: String,
    pub items: Vec<ItemSummary>,
    pub saved: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub date_warnings: usize,
}

impl FeedSummary {
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

impl fmt::Display for FeedSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = if self.channel_title.is_empty() {
            &self.feed_name
        } else {
            &self.channel_title
        };
        writeln!(f, "=== {} ===", title)?;
        writeln!(f, "Found {} posts in {}:", self.item_count(), self.feed_name)?;
        writeln!(f)?;
        for (i, item) in self.items.iter().enumerate() {
            writeln!(f, "{}. {}", i + 1, item.title)?;
            writeln!(f, "   Link: {}", item.link)?;
            if let Some(published) = &item.published {
                writeln!(f, "   Published: {}", published)?;
            }
            writeln!(f)?;
        }
        writeln!(
            f,
            "Saved {}, skipped {} already stored, {} failed",
            self.saved, self.duplicates, self.failed
        )
    }
}

pub struct Aggregator {
    db: Database,
    fetcher: Fetcher,
    interval: Duration,
}

impl Aggregator {
    pub fn new(db: Database, fetcher: Fetcher, interval: Duration) -> Result<Self, ConfigError> {
        if interval < MIN_INTERVAL {
            return Err(ConfigError::InvalidInterval {
                input: format!("{:?}", interval),
                reason: "time between requests must be at least 1s".to_string(),
            });
        }
        Ok(Self {
            db,
            fetcher,
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetches the feed that has waited longest and stores its items.
    ///
    /// The feed is marked as fetched before the request goes out, so a feed
    /// that keeps failing still yields its turn to the others.
    pub async fn scrape_next_feed(&self) -> Result<FeedSummary, TickError> {
        let feed = self
            .db
            .next_feed_to_fetch()
            .await
            .map_err(TickError::Select)?
            .ok_or(TickError::NoFeeds)?;

        self.db
            .mark_feed_fetched(feed.id)
            .await
            .map_err(TickError::Mark)?;

        let parsed = self
            .fetcher
            .fetch(&feed.url)
            .await
            .map_err(|source| TickError::Fetch {
                feed: feed.name.clone(),
                source,
            })?;

        let mut summary = FeedSummary {
            feed_id: feed.id,
            feed_name: feed.name.clone(),
            feed_url: feed.url.clone(),
            channel_title: parsed.title.clone(),
            items: Vec::with_capacity(parsed.items.len()),
            saved: 0,
            duplicates: 0,
            failed: 0,
            date_warnings: 0,
        };

        for item in &parsed.items {
            match ingest(&self.db, item, feed.id).await {
                Ok(ingested) => {
                    match ingested.outcome {
                        IngestOutcome::Saved(_) => summary.saved += 1,
                        IngestOutcome::DuplicateSkipped => summary.duplicates += 1,
                    }
                    if ingested.date_warning.is_some() {
                        summary.date_warnings += 1;
                    }
                }
                Err(e) => {
                    error!(feed = %feed.name, title = %item.title, error = %e, "Error saving post");
                    summary.failed += 1;
                }
            }

            summary.items.push(ItemSummary {
                title: item.title.clone(),
                link: item.link.clone(),
                published: (!item.pub_date.is_empty()).then(|| item.pub_date.clone()),
            });
        }

        info!(
            feed = %feed.name,
            items = summary.item_count(),
            saved = summary.saved,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "Feed processed"
        );
        Ok(summary)
    }

    /// Runs one tick immediately and then one per interval until `cancel`
    /// fires. A failed tick is logged and never ends the loop.
    pub async fn run<F>(&self, cancel: CancellationToken, mut report: F)
    where
        F: FnMut(&FeedSummary),
    {
        info!(interval = ?self.interval, "Collecting feeds");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Cancelled while a feed was in flight");
                    break;
                }
                outcome = self.scrape_next_feed() => outcome,
            };

            match outcome {
                Ok(summary) => report(&summary),
                Err(TickError::NoFeeds) => warn!("No feeds to fetch, add one with `addfeed`"),
                Err(e) => error!(error = %e, "Error fetching feeds"),
            }
        }

        info!("Stopped collecting feeds");
    }
}
