//! Gator - A command-line RSS Feed Aggregator
//!
//! Users register, add and follow RSS feeds, and a background loop fetches
//! the least recently fetched feed on a fixed interval and stores its posts
//! for later browsing.

pub mod aggregator;
pub mod commands;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod ingest;
