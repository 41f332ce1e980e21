//! SQLite persistence and the per-source known-URL set.
//!
//! All sources share one `articles` table keyed by `(source, url)`. Inserts
//! use `ON CONFLICT (source, url) DO NOTHING`, so a URL captured twice (by a
//! second section, or by a concurrent writer) is reported as
//! [`InsertOutcome::AlreadyPresent`] instead of failing.
//!
//! ```no_run
//! use newsroom_scraper::store::{ArticleStore, Database};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ArticleStore::new(Database::new(Path::new("articles.db")).await?);
//! let known = store.load_known("capital_gazette").await?;
//! println!("{} URLs already captured", known.len());
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::models::{ArticleRecord, ImageInfo};
use crate::utils::now_rfc3339;

/// SQLite allows a single writer; a small pool is plenty.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("failed to encode images: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Connection pool with the schema applied.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path`, enables WAL,
    /// and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the file cannot be opened and
    /// [`StoreError::Migration`] if the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same memory image.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every pooled connection.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row for `(source, url)` already existed; nothing was written.
    AlreadyPresent,
}

/// URLs already stored for one source.
///
/// Owned by the task processing that source. Grows as records are persisted.
#[derive(Debug, Clone, Default)]
pub struct CrawlState {
    source: String,
    known: HashSet<String>,
}

impl CrawlState {
    pub fn new(source: impl Into<String>, known: impl IntoIterator<Item = String>) -> Self {
        Self {
            source: source.into(),
            known: known.into_iter().collect(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn contains(&self, url: &str) -> bool {
        self.known.contains(url)
    }

    /// Marks `url` known. Returns `false` when it already was.
    pub fn record_known(&mut self, url: &str) -> bool {
        if self.known.contains(url) {
            return false;
        }
        self.known.insert(url.to_string())
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

/// A persisted row, as read back from `articles`.
#[derive(Debug, Clone, FromRow)]
pub struct StoredArticle {
    pub id: i64,
    pub source: String,
    pub section: String,
    pub url: String,
    /// RFC 3339, or `None` when the page had no usable date.
    pub pub_date: Option<String>,
    pub headline: String,
    pub headline_len: i64,
    pub word_count: i64,
    pub num_links: i64,
    pub num_images: i64,
    pub num_ads_est: i64,
    /// JSON array of `{src, width, height}`.
    pub images: String,
    pub body_text: Option<String>,
    pub scraped_at: String,
}

impl StoredArticle {
    /// Decodes the `images` column.
    pub fn images(&self) -> Result<Vec<ImageInfo>, serde_json::Error> {
        serde_json::from_str(&self.images)
    }
}

/// Article persistence on top of a [`Database`].
#[derive(Debug, Clone)]
pub struct ArticleStore {
    db: Database,
}

impl ArticleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Loads every URL stored for `source`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the query fails.
    #[instrument(skip(self))]
    pub async fn load_known(&self, source: &str) -> Result<CrawlState, StoreError> {
        let urls: Vec<String> = sqlx::query_scalar("SELECT url FROM articles WHERE source = ?")
            .bind(source)
            .fetch_all(self.db.pool())
            .await?;
        debug!(source, count = urls.len(), "Loaded known URLs");
        Ok(CrawlState::new(source, urls))
    }

    /// Inserts `record` under `source` unless `(source, url)` already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialize`] if the image list cannot be encoded
    /// and [`StoreError::Connection`] if the write fails.
    #[instrument(skip(self, record), fields(url = %record.url))]
    pub async fn insert(
        &self,
        source: &str,
        record: &ArticleRecord,
    ) -> Result<InsertOutcome, StoreError> {
        let images = serde_json::to_string(&record.images)?;
        let result = sqlx::query(
            r"INSERT INTO articles (
                  source, section, url, pub_date, headline, headline_len,
                  word_count, num_links, num_images, num_ads_est, images,
                  body_text, scraped_at
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT (source, url) DO NOTHING",
        )
        .bind(source)
        .bind(&record.section)
        .bind(&record.url)
        .bind(record.pub_date.map(|d| d.to_rfc3339()))
        .bind(&record.headline)
        .bind(i64::from(record.headline_len()))
        .bind(i64::from(record.word_count))
        .bind(i64::from(record.num_links))
        .bind(i64::from(record.num_images()))
        .bind(i64::from(record.num_ads_est))
        .bind(images)
        .bind(record.body_text.as_deref())
        .bind(now_rfc3339())
        .execute(self.db.pool())
        .await?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::AlreadyPresent
        } else {
            InsertOutcome::Inserted
        })
    }

    /// Number of rows stored for `source`.
    pub async fn count(&self, source: &str) -> Result<i64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE source = ?")
            .bind(source)
            .fetch_one(self.db.pool())
            .await?;
        Ok(n)
    }

    /// Rows stored for `source`, oldest first.
    pub async fn list(&self, source: &str) -> Result<Vec<StoredArticle>, StoreError> {
        let rows = sqlx::query_as::<_, StoredArticle>(
            "SELECT * FROM articles WHERE source = ? ORDER BY id ASC",
        )
        .bind(source)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }
}
