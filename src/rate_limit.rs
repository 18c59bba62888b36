//! Per-user daily request quota backed by SQLite.
//!
//! Counters are keyed by user and UTC date, so every quota resets at
//! midnight UTC. Each call opens its own connection on the blocking pool and
//! runs inside an `IMMEDIATE` transaction, which serialises concurrent
//! check-and-increment calls across tasks and processes.

use crate::config::Settings;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// How long a connection waits for a competing writer
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the usage store
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// SQLite failure
    #[error("Rate limit database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Database directory could not be created
    #[error("Failed to create {path}: {source}")]
    Io {
        /// Directory that failed
        path: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// Blocking task failed to complete
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Outcome of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request accepted and counted
    Allowed {
        /// Requests used today, including this one
        used: u32,
        /// Requests left today, `None` when unlimited
        remaining: Option<u32>,
    },
    /// Quota exhausted for today
    Limited {
        /// Daily quota
        limit: u32,
        /// Start of the next UTC day
        resets_at: DateTime<Utc>,
    },
}

/// Today's usage for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    /// Requests used today
    pub used: u32,
    /// Daily quota, 0 for unlimited
    pub limit: u32,
    /// Whether the user bypasses the quota
    pub exempt: bool,
}

/// Daily quota enforcement
#[derive(Debug, Clone)]
pub struct RateLimiter {
    db_path: Arc<PathBuf>,
    limit: u32,
    exempt: Arc<HashSet<i64>>,
}

fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn next_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or_else(|| now + ChronoDuration::days(1), |d| d.and_utc())
}

fn open_connection(path: &Path) -> Result<Connection, RateLimitError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn to_count(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

impl RateLimiter {
    /// Open (or create) the usage store at `db_path`.
    ///
    /// A `limit` of 0 disables the quota.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or schema cannot be created.
    pub fn open(
        db_path: impl Into<PathBuf>,
        limit: u32,
        exempt: HashSet<i64>,
    ) -> Result<Self, RateLimitError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RateLimitError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let conn = open_connection(&db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS daily_usage (
                user_id INTEGER NOT NULL,
                day TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, day)
            )",
            [],
        )?;

        Ok(Self {
            db_path: Arc::new(db_path),
            limit,
            exempt: Arc::new(exempt),
        })
    }

    /// Open the store configured by `DAILY_REQUEST_LIMIT`, `RATE_LIMIT_DB`
    /// and `RATE_LIMIT_EXEMPT_USERS`.
    ///
    /// # Errors
    ///
    /// See [`RateLimiter::open`].
    pub fn from_settings(settings: &Settings) -> Result<Self, RateLimitError> {
        Self::open(
            settings.rate_limit_db.clone(),
            settings.daily_request_limit,
            settings.rate_limit_exempt_users(),
        )
    }

    fn unlimited_for(&self, user_id: i64) -> bool {
        self.limit == 0 || self.exempt.contains(&user_id)
    }

    async fn run<T, F>(&self, f: F) -> Result<T, RateLimitError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RateLimitError> + Send + 'static,
    {
        let path = Arc::clone(&self.db_path);
        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| RateLimitError::Task(e.to_string()))?
    }

    /// Count one request for `user_id` unless today's quota is used up.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or updated.
    pub async fn check_and_increment(&self, user_id: i64) -> Result<RateDecision, RateLimitError> {
        self.check_and_increment_at(user_id, Utc::now()).await
    }

    /// [`RateLimiter::check_and_increment`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or updated.
    pub async fn check_and_increment_at(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, RateLimitError> {
        if self.unlimited_for(user_id) {
            return Ok(RateDecision::Allowed {
                used: 0,
                remaining: None,
            });
        }

        let limit = self.limit;
        let today = day_key(now.date_naive());
        let decision = self
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let pruned = tx.execute("DELETE FROM daily_usage WHERE day < ?1", params![today])?;
                if pruned > 0 {
                    debug!("Pruned {pruned} stale usage rows");
                }

                let used: i64 = tx
                    .query_row(
                        "SELECT count FROM daily_usage WHERE user_id = ?1 AND day = ?2",
                        params![user_id, today],
                        |row| row.get(0),
                    )
                    .optional()?
                    .unwrap_or(0);
                let used = to_count(used);

                if used >= limit {
                    tx.commit()?;
                    return Ok(RateDecision::Limited {
                        limit,
                        resets_at: next_reset(now),
                    });
                }

                tx.execute(
                    "INSERT INTO daily_usage (user_id, day, count) VALUES (?1, ?2, 1)
                     ON CONFLICT(user_id, day) DO UPDATE SET count = count + 1",
                    params![user_id, today],
                )?;
                tx.commit()?;

                let used = used + 1;
                Ok(RateDecision::Allowed {
                    used,
                    remaining: Some(limit.saturating_sub(used)),
                })
            })
            .await?;

        debug!("Rate limit decision for user {user_id}: {decision:?}");
        Ok(decision)
    }

    /// Today's usage for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn usage(&self, user_id: i64) -> Result<Usage, RateLimitError> {
        self.usage_at(user_id, Utc::now()).await
    }

    /// [`RateLimiter::usage`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn usage_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<Usage, RateLimitError> {
        let today = day_key(now.date_naive());
        let used = self
            .run(move |conn| {
                let used: Option<i64> = conn
                    .query_row(
                        "SELECT count FROM daily_usage WHERE user_id = ?1 AND day = ?2",
                        params![user_id, today],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(to_count(used.unwrap_or(0)))
            })
            .await?;

        Ok(Usage {
            used,
            limit: self.limit,
            exempt: self.exempt.contains(&user_id),
        })
    }
}
