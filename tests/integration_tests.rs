//! Integration tests for the gator RSS aggregator
//!
//! These tests run the aggregation cycle against a mock HTTP server and a
//! file-backed SQLite database.

mod common {
    use gator::db::{Database, Feed, User};
    use tempfile::TempDir;

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database path
    pub fn create_db_path(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        format!("sqlite:{}?mode=rwc", db_path.display())
    }

    pub async fn create_db(temp_dir: &TempDir) -> Database {
        let db = Database::new(&create_db_path(temp_dir)).await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    pub async fn create_feed(db: &Database, user: &User, name: &str, url: &str) -> Feed {
        let feed = db.create_feed(name, url, user.id).await.unwrap();
        db.create_feed_follow(user.id, feed.id).await.unwrap();
        feed
    }

    pub fn rss_document(title: &str, items: &[(&str, &str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(item_title, link, pub_date)| {
                let pub_date = if pub_date.is_empty() {
                    String::new()
                } else {
                    format!("<pubDate>{}</pubDate>", pub_date)
                };
                format!(
                    "<item><title>{}</title><link>{}</link><description>About {}</description>{}</item>",
                    item_title, link, item_title, pub_date
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <rss version="2.0"><channel>
                <title>{}</title>
                <link>https://example.com</link>
                <description>Test feed</description>
                {}
            </channel></rss>"#,
            title, items
        )
    }
}

#[cfg(test)]
mod database_integration_tests {
    use super::common::*;
    use gator::db::{Database, NewPost};

    #[tokio::test]
    async fn test_database_persistence() {
        let temp_dir = create_temp_dir();

        {
            let db = create_db(&temp_dir).await;
            let user = db.create_user("kahya").await.unwrap();
            let feed = create_feed(&db, &user, "Persistent Feed", "https://persistent.com/rss").await;
            db.create_post(&NewPost {
                title: "Persistent Article".to_string(),
                url: "https://persistent.com/article".to_string(),
                description: String::new(),
                published_at: None,
                feed_id: feed.id,
            })
            .await
            .unwrap();
        }

        // Reopen without reinitializing
        {
            let db = Database::new(&create_db_path(&temp_dir)).await.unwrap();
            let user = db.get_user("kahya").await.unwrap().unwrap();

            let posts = db.get_posts_for_user(user.id, 10).await.unwrap();
            assert_eq!(posts.len(), 1);
            assert_eq!(posts[0].post.title, "Persistent Article");
            assert_eq!(posts[0].feed_name, "Persistent Feed");
        }
    }
}

#[cfg(test)]
mod aggregation_integration_tests {
    use super::common::*;
    use gator::aggregator::{Aggregator, TickError, MIN_INTERVAL};
    use gator::fetcher::{FetchError, Fetcher};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_feed(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_ingesting_twice_skips_duplicates() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let user = db.create_user("kahya").await.unwrap();

        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/feed.xml",
            rss_document(
                "Two Items",
                &[
                    ("Dated", "https://example.com/dated", "Mon, 02 Jan 2006 15:04:05 -0700"),
                    ("Undated", "https://example.com/undated", ""),
                ],
            ),
        )
        .await;
        let feed = create_feed(&db, &user, "Two", &format!("{}/feed.xml", server.uri())).await;

        let aggregator = Aggregator::new(db.clone(), Fetcher::new().unwrap(), MIN_INTERVAL).unwrap();

        let first = aggregator.scrape_next_feed().await.unwrap();
        assert_eq!(first.item_count(), 2);
        assert_eq!(first.saved, 2);
        assert_eq!(first.duplicates, 0);
        let first_fetch = db.get_feed(feed.id).await.unwrap().unwrap().last_fetched_at.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = aggregator.scrape_next_feed().await.unwrap();
        assert_eq!(second.saved, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(second.failed, 0);
        let second_fetch = db.get_feed(feed.id).await.unwrap().unwrap().last_fetched_at.unwrap();

        assert!(second_fetch > first_fetch);
        assert_eq!(db.get_post_count_for_feed(feed.id).await.unwrap(), 2);

        let posts = db.get_posts_for_user(user.id, 10).await.unwrap();
        let dated = posts.iter().find(|p| p.post.title == "Dated").unwrap();
        let undated = posts.iter().find(|p| p.post.title == "Undated").unwrap();
        assert_eq!(
            dated.post.published_at.unwrap().to_rfc3339(),
            "2006-01-02T22:04:05+00:00"
        );
        assert!(undated.post.published_at.is_none());
    }

    #[tokio::test]
    async fn test_entities_decoded_once_before_storage() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let user = db.create_user("kahya").await.unwrap();

        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/feed.xml",
            rss_document(
                "Entities",
                &[("Rust &amp;amp; Go &amp;amp;amp; C", "https://example.com/1", "")],
            ),
        )
        .await;
        create_feed(&db, &user, "Entities", &format!("{}/feed.xml", server.uri())).await;

        let aggregator = Aggregator::new(db.clone(), Fetcher::new().unwrap(), MIN_INTERVAL).unwrap();
        let summary = aggregator.scrape_next_feed().await.unwrap();
        assert_eq!(summary.items[0].title, "Rust & Go &amp; C");

        let posts = db.get_posts_for_user(user.id, 10).await.unwrap();
        assert_eq!(posts[0].post.title, "Rust & Go &amp; C");
    }

    #[tokio::test]
    async fn test_unparseable_date_still_saves_post() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let user = db.create_user("kahya").await.unwrap();

        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/feed.xml",
            rss_document("Odd dates", &[("Odd", "https://example.com/odd", "yesterday")]),
        )
        .await;
        create_feed(&db, &user, "Odd", &format!("{}/feed.xml", server.uri())).await;

        let aggregator = Aggregator::new(db.clone(), Fetcher::new().unwrap(), MIN_INTERVAL).unwrap();
        let summary = aggregator.scrape_next_feed().await.unwrap();

        assert_eq!(summary.saved, 1);
        assert_eq!(summary.date_warnings, 1);
        assert_eq!(summary.items[0].published.as_deref(), Some("yesterday"));
    }

    #[tokio::test]
    async fn test_not_found_feed_is_unexpected_status() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let user = db.create_user("kahya").await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let feed = create_feed(&db, &user, "Gone", &format!("{}/gone.xml", server.uri())).await;

        let aggregator = Aggregator::new(db.clone(), Fetcher::new().unwrap(), MIN_INTERVAL).unwrap();
        let result = aggregator.scrape_next_feed().await;

        match result {
            Err(TickError::Fetch {
                source: FetchError::UnexpectedStatus(code),
                ..
            }) => assert_eq!(code, 404),
            other => panic!("expected UnexpectedStatus(404), got {:?}", other),
        }
        assert_eq!(db.get_post_count_for_feed(feed.id).await.unwrap(), 0);
        assert!(db.get_feed(feed.id).await.unwrap().unwrap().last_fetched_at.is_some());
    }

    #[tokio::test]
    async fn test_loop_keeps_going_after_failed_feed() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let user = db.create_user("kahya").await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken.xml"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_feed(
            &server,
            "/good.xml",
            rss_document("Good", &[("Fine", "https://example.com/fine", "")]),
        )
        .await;

        // Created first, so it is picked on the first tick
        create_feed(&db, &user, "Broken", &format!("{}/broken.xml", server.uri())).await;
        let good = create_feed(&db, &user, "Good", &format!("{}/good.xml", server.uri())).await;

        let aggregator = Aggregator::new(db.clone(), Fetcher::new().unwrap(), MIN_INTERVAL).unwrap();
        let cancel = CancellationToken::new();
        let stop = cancel.clone();

        let mut summaries = Vec::new();
        tokio::time::timeout(
            Duration::from_secs(10),
            aggregator.run(cancel, |summary| {
                summaries.push(summary.clone());
                stop.cancel();
            }),
        )
        .await
        .expect("loop did not stop after cancellation");

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].feed_id, good.id);
        assert_eq!(summaries[0].saved, 1);
    }

    #[tokio::test]
    async fn test_loop_visits_every_feed_before_repeating() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let user = db.create_user("kahya").await.unwrap();

        let server = MockServer::start().await;
        mount_feed(&server, "/a.xml", rss_document("A", &[("A1", "https://a.example/1", "")])).await;
        mount_feed(&server, "/b.xml", rss_document("B", &[("B1", "https://b.example/1", "")])).await;
        let a = create_feed(&db, &user, "A", &format!("{}/a.xml", server.uri())).await;
        let b = create_feed(&db, &user, "B", &format!("{}/b.xml", server.uri())).await;

        let aggregator = Aggregator::new(db.clone(), Fetcher::new().unwrap(), MIN_INTERVAL).unwrap();
        let cancel = CancellationToken::new();
        let stop = cancel.clone();

        let mut visited = Vec::new();
        tokio::time::timeout(
            Duration::from_secs(10),
            aggregator.run(cancel, |summary| {
                visited.push(summary.feed_id);
                if visited.len() == 2 {
                    stop.cancel();
                }
            }),
        )
        .await
        .expect("loop did not stop after cancellation");

        visited.sort();
        assert_eq!(visited, vec![a.id, b.id]);
    }
}

#[cfg(test)]
mod end_to_end_tests {
    use super::common::*;
    use gator::commands::{run, Command, Session};
    use gator::config::Config;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn exec(session: &mut Session, command: Command) -> String {
        let mut out = Vec::new();
        run(session, command, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_register_addfeed_scrape_browse() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let config_path = temp_dir.path().join("gatorconfig.json");
        let mut session = Session::new(db.clone(), Config::default(), config_path.clone());

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss_document(
                "Blog",
                &[
                    ("Newer", "https://blog.example/2", "Tue, 03 Jan 2006 10:00:00 +0000"),
                    ("Older", "https://blog.example/1", "Mon, 02 Jan 2006 10:00:00 +0000"),
                ],
            )))
            .mount(&server)
            .await;

        exec(
            &mut session,
            Command::Register {
                name: "kahya".to_string(),
            },
        )
        .await;
        exec(
            &mut session,
            Command::Addfeed {
                name: "Blog".to_string(),
                url: server.uri(),
            },
        )
        .await;

        let aggregator = gator::aggregator::Aggregator::new(
            db.clone(),
            gator::fetcher::Fetcher::new().unwrap(),
            gator::aggregator::MIN_INTERVAL,
        )
        .unwrap();
        aggregator.scrape_next_feed().await.unwrap();

        let output = exec(&mut session, Command::Browse { limit: 1 }).await;
        assert!(output.contains("Newer"));
        assert!(!output.contains("Older"));
        assert!(output.contains("From: Blog"));

        // A fresh session picks the user up from the config file
        let reloaded = Config::load(&config_path).unwrap();
        let mut session = Session::new(db, reloaded, config_path);
        let output = exec(&mut session, Command::Browse { limit: 10 }).await;
        assert!(output.contains("Newer"));
        assert!(output.contains("Older"));
    }
}
