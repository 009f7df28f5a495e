//! Turns parsed feed items into stored posts.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{Database, NewPost, Post, StoreError};
use crate::fetcher::FeedItem;

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// The publish date formats accepted in `<pubDate>`, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `Mon, 02 Jan 2006 15:04:05 -0700`
    Rfc1123Z,
    /// `Mon, 02 Jan 2006 15:04:05 MST`
    Rfc1123,
    /// `2006-01-02T15:04:05Z07:00`
    Rfc3339,
    /// `02 Jan 06 15:04 -0700`
    Rfc822Z,
    /// `02 Jan 06 15:04 MST`
    Rfc822,
}

impl DateFormat {
    pub const ALL: [DateFormat; 5] = [
        DateFormat::Rfc1123Z,
        DateFormat::Rfc1123,
        DateFormat::Rfc3339,
        DateFormat::Rfc822Z,
        DateFormat::Rfc822,
    ];

    pub fn parse(self, input: &str) -> Option<DateTime<Utc>> {
        let parsed = match self {
            DateFormat::Rfc1123Z => {
                let rest = strip_weekday(input)?;
                DateTime::parse_from_str(rest, "%d %b %Y %H:%M:%S %z").ok()
            }
            DateFormat::Rfc1123 => {
                let rest = strip_weekday(input)?;
                parse_with_named_zone(rest, "%d %b %Y %H:%M:%S")
            }
            DateFormat::Rfc3339 => DateTime::parse_from_rfc3339(input).ok(),
            DateFormat::Rfc822Z => DateTime::parse_from_str(input, "%d %b %y %H:%M %z").ok(),
            DateFormat::Rfc822 => parse_with_named_zone(input, "%d %b %y %H:%M"),
        };
        parsed.map(|dt| dt.with_timezone(&Utc))
    }
}

/// Removes a leading `Mon, ` style weekday. The weekday is not checked
/// against the date itself.
fn strip_weekday(input: &str) -> Option<&str> {
    let (weekday, rest) = input.split_once(", ")?;
    WEEKDAYS.contains(&weekday).then_some(rest)
}

fn parse_with_named_zone(input: &str, layout: &str) -> Option<DateTime<FixedOffset>> {
    let (local, zone) = input.rsplit_once(' ')?;
    if zone.is_empty() || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(local, layout).ok()?;
    let offset = FixedOffset::east_opt(zone_offset_seconds(zone))?;
    offset.from_local_datetime(&naive).single()
}

/// Offsets for the zone names RFC 822 defines. Unknown names are read as UTC.
fn zone_offset_seconds(zone: &str) -> i32 {
    let hours = match zone {
        "EDT" => -4,
        "EST" | "CDT" => -5,
        "CST" | "MDT" => -6,
        "MST" | "PDT" => -7,
        "PST" => -8,
        _ => 0,
    };
    hours * 3600
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("couldn't parse date format: {raw}")]
pub struct DateParseWarning {
    pub raw: String,
}

/// Parses a raw `<pubDate>`. Empty input means the item has no date, which is
/// not an error.
pub fn parse_published_date(raw: &str) -> Result<Option<DateTime<Utc>>, DateParseWarning> {
    match parse_published_date_with_format(raw)? {
        Some((published, _)) => Ok(Some(published)),
        None => Ok(None),
    }
}

/// Like [`parse_published_date`], also reporting which format matched.
pub fn parse_published_date_with_format(
    raw: &str,
) -> Result<Option<(DateTime<Utc>, DateFormat)>, DateParseWarning> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    DateFormat::ALL
        .iter()
        .find_map(|format| format.parse(trimmed).map(|dt| (dt, *format)))
        .map(Some)
        .ok_or_else(|| DateParseWarning {
            raw: raw.to_string(),
        })
}

#[derive(Debug)]
pub enum IngestOutcome {
    Saved(Post),
    /// A post with the same url already exists; nothing was written.
    DuplicateSkipped,
}

#[derive(Debug)]
pub struct Ingested {
    pub outcome: IngestOutcome,
    /// Set when the item had a publish date that could not be parsed. The
    /// post is stored without one.
    pub date_warning: Option<DateParseWarning>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("item '{title}' has no link")]
    MissingLink { title: String },
    #[error("database insertion failed: {0}")]
    Store(#[from] StoreError),
}

pub async fn ingest(db: &Database, item: &FeedItem, feed_id: i64) -> Result<Ingested, IngestError> {
    if item.link.trim().is_empty() {
        return Err(IngestError::MissingLink {
            title: item.title.clone(),
        });
    }

    let (published_at, date_warning) = match parse_published_date(&item.pub_date) {
        Ok(published_at) => (published_at, None),
        Err(warning) => {
            warn!(
                title = %item.title,
                pub_date = %item.pub_date,
                "Couldn't parse publish date, storing post without one"
            );
            (None, Some(warning))
        }
    };

    let new_post = NewPost {
        title: item.title.clone(),
        url: item.link.clone(),
        description: item.description.clone(),
        published_at,
        feed_id,
    };

    let outcome = match db.create_post(&new_post).await {
        Ok(post) => {
            debug!(title = %post.title, url = %post.url, "Saved post");
            IngestOutcome::Saved(post)
        }
        Err(StoreError::DuplicateUrl(url)) => {
            debug!(url = %url, "Post already stored, skipping");
            IngestOutcome::DuplicateSkipped
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Ingested {
        outcome,
        date_warning,
    })
}
