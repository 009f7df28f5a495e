use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

/// Error text fragments that identify a uniqueness violation when the driver
/// does not classify the error itself.
const UNIQUE_VIOLATION_PHRASES: &[&str] = &[
    "UNIQUE constraint failed",
    "duplicate key",
    "unique constraint",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a post with url '{0}' already exists")]
    DuplicateUrl(String),
    #[error("user '{0}' already exists")]
    UserExists(String),
    #[error("a feed with url '{0}' already exists")]
    FeedExists(String),
    #[error("user is already following this feed")]
    AlreadyFollowing,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// True when `err` reports a violated UNIQUE constraint, either through the
/// driver's own classification or through the error text.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.is_unique_violation() {
            return true;
        }
    }
    let message = err.to_string();
    UNIQUE_VIOLATION_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

/// A feed joined with the name of the user who added it.
#[derive(Debug, Clone, FromRow)]
pub struct FeedWithCreator {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub creator_name: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedFollowDetails {
    pub id: i64,
    pub user_id: Uuid,
    pub feed_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub feed_name: String,
    pub user_name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub feed_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A post together with the name of the feed it came from.
#[derive(Debug, Clone, FromRow)]
pub struct UserPost {
    #[sqlx(flatten)]
    pub post: Post,
    pub feed_name: String,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub url: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub feed_id: i64,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BLOB PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_fetched_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_follows (
                id INTEGER PRIMARY KEY,
                user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, feed_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                published_at TEXT,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_posts_feed_published
            ON posts(feed_id, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Users

    pub async fn create_user(&self, name: &str) -> Result<User, StoreError> {
        let now = Utc::now();
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, name, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::UserExists(name.to_string())
            } else {
                StoreError::Database(e)
            }
        })
    }

    pub async fn get_user(&self, name: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_users(&self) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    /// Deletes every user. Feeds, follows and posts go with them.
    pub async fn reset_users(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM users")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // Feeds

    pub async fn create_feed(
        &self,
        name: &str,
        url: &str,
        user_id: Uuid,
    ) -> Result<Feed, StoreError> {
        let now = Utc::now();
        sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (name, url, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::FeedExists(url.to_string())
            } else {
                StoreError::Database(e)
            }
        })
    }

    pub async fn get_feeds_with_creator(&self) -> Result<Vec<FeedWithCreator>, StoreError> {
        let feeds = sqlx::query_as::<_, FeedWithCreator>(
            r#"
            SELECT feeds.id, feeds.name, feeds.url, users.name AS creator_name
            FROM feeds
            LEFT JOIN users ON feeds.user_id = users.id
            ORDER BY feeds.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, StoreError> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// The feed fetched longest ago. Feeds never fetched come first.
    pub async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, StoreError> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            SELECT * FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    pub async fn mark_feed_fetched(&self, feed_id: i64) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Feed follows

    pub async fn create_feed_follow(
        &self,
        user_id: Uuid,
        feed_id: i64,
    ) -> Result<FeedFollowDetails, StoreError> {
        let now = Utc::now();
        let (follow_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyFollowing
            } else {
                StoreError::Database(e)
            }
        })?;

        let details = sqlx::query_as::<_, FeedFollowDetails>(
            r#"
            SELECT feed_follows.*, feeds.name AS feed_name, users.name AS user_name
            FROM feed_follows
            JOIN feeds ON feeds.id = feed_follows.feed_id
            JOIN users ON users.id = feed_follows.user_id
            WHERE feed_follows.id = ?
            "#,
        )
        .bind(follow_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(details)
    }

    pub async fn get_feed_follows_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<FeedFollowDetails>, StoreError> {
        let follows = sqlx::query_as::<_, FeedFollowDetails>(
            r#"
            SELECT feed_follows.*, feeds.name AS feed_name, users.name AS user_name
            FROM feed_follows
            JOIN feeds ON feeds.id = feed_follows.feed_id
            JOIN users ON users.id = feed_follows.user_id
            WHERE feed_follows.user_id = ?
            ORDER BY feed_follows.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(follows)
    }

    /// Returns whether a follow existed.
    pub async fn delete_feed_follow(&self, user_id: Uuid, feed_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // Posts

    pub async fn create_post(&self, post: &NewPost) -> Result<Post, StoreError> {
        let now = Utc::now();
        sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (title, url, description, published_at, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(post.published_at)
        .bind(post.feed_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateUrl(post.url.clone())
            } else {
                StoreError::Database(e)
            }
        })
    }

    /// Newest posts from the feeds `user_id` follows. Undated posts sort last.
    pub async fn get_posts_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<UserPost>, StoreError> {
        let posts = sqlx::query_as::<_, UserPost>(
            r#"
            SELECT posts.*, feeds.name AS feed_name
            FROM posts
            JOIN feed_follows ON feed_follows.feed_id = posts.feed_id
            JOIN feeds ON feeds.id = posts.feed_id
            WHERE feed_follows.user_id = ?
            ORDER BY posts.published_at DESC NULLS LAST, posts.id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    pub async fn get_post_count_for_feed(&self, feed_id: i64) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Runs arbitrary SQL so tests can put the store into a failing state.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<(), StoreError> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }
}
